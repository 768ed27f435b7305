use crate::enums::{ContextState, JSObjectClass};
use crate::jsvalue::{JS_NULL, JSValue, ValueTag};
use crate::object::ObjectData;
use crate::refcount::object_ref;
use crate::runtime::{JSRuntime, RuntimeError};
use crate::teardown::{
    AnomalyCause, AnomalyDetail, TeardownCause, TeardownDecision, TeardownDiagnostic,
    teardown_decision,
};
use core::ffi::c_void;

/// Handle to a context owned by a runtime. Slots of freed contexts are kept
/// as tombstones, so an id is never reused within one runtime.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ContextId(u32);

impl ContextId {
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for ContextId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One slot per possible `u8` class id.
const MAX_CLASS_SLOTS: usize = u8::MAX as usize + 1;

/// Context initialization parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContextConfig {
    /// Number of class prototype slots. Values below the built-in class
    /// count are raised to it and values above 256 are lowered to it. Host
    /// class ids without a slot get a `null` prototype.
    pub class_count: u16,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            class_count: JSObjectClass::COUNT,
        }
    }
}

pub struct JSContext {
    id: ContextId,
    state: ContextState,
    ref_count: i32,
    pub(crate) global_obj: JSValue,
    pub(crate) class_proto: Vec<JSValue>,
    /// Values the host registered through `retain_active`; each holds one reference.
    pub(crate) active_values: Vec<JSValue>,
}

impl JSContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count
    }

    /// Not yet freed. A closing context is still open.
    pub fn is_open(&self) -> bool {
        self.state != ContextState::Freed
    }
}

impl JSRuntime {
    pub fn new_context(&mut self, config: ContextConfig) -> Result<ContextId, RuntimeError> {
        if self.is_shut_down() {
            return Err(RuntimeError::ShutDown);
        }
        let class_count = (config.class_count.max(JSObjectClass::COUNT) as usize)
            .min(MAX_CLASS_SLOTS);
        let object_proto = self.new_plain_object(JS_NULL)?;
        let mut class_proto = Vec::with_capacity(class_count);
        class_proto.push(object_proto);
        for _ in 1..class_count {
            match self.new_plain_object(object_proto) {
                Ok(proto) => class_proto.push(proto),
                Err(err) => {
                    self.release_all(class_proto);
                    return Err(err);
                }
            }
        }
        let proto = self.dup_value(object_proto);
        let global_obj = match self.alloc_object(
            JSObjectClass::Global as u8,
            ObjectData::Plain {
                proto,
                props: Vec::new(),
            },
        ) {
            Ok(global) => global,
            Err(err) => {
                self.release_all(class_proto);
                return Err(err);
            }
        };

        let id = ContextId::from_index(self.contexts.len() as u32);
        self.contexts.push(JSContext {
            id,
            state: ContextState::Active,
            ref_count: 1,
            global_obj,
            class_proto,
            active_values: Vec::new(),
        });
        tracing::debug!(context = %id, class_count, "context created");
        Ok(id)
    }

    pub fn dup_context(&mut self, id: ContextId) {
        match self.context_mut(id) {
            Ok(ctx) => ctx.ref_count += 1,
            Err(_) => {
                self.stale_context(id);
            }
        }
    }

    /// Gives back one reference on a context and tears it down when the
    /// policy says so.
    pub fn free_context(&mut self, id: ContextId) -> TeardownDecision {
        let ctx = match self.context_mut(id) {
            Ok(ctx) => ctx,
            Err(_) => return TeardownDecision::TolerateAndLog(self.stale_context(id)),
        };
        ctx.ref_count -= 1;
        let decision = teardown_decision(id, ctx.ref_count, TeardownCause::Release);
        match &decision {
            TeardownDecision::Defer => {}
            TeardownDecision::Proceed => self.close_context(id, TeardownCause::Release),
            TeardownDecision::TolerateAndLog(diag) => {
                self.record(diag.clone());
                self.close_context(id, TeardownCause::Release);
            }
        }
        decision
    }

    /// Drives an open context through `Closing` to `Freed`.
    ///
    /// Registered host values that are still live and shared are released
    /// once; values holding their last reference are left to the collector.
    pub(crate) fn close_context(&mut self, id: ContextId, cause: TeardownCause) {
        let Some(ctx) = self.contexts.get_mut(id.index() as usize) else {
            return;
        };
        if ctx.state == ContextState::Freed {
            return;
        }
        ctx.state = ContextState::Closing;
        tracing::debug!(context = %id, ?cause, ref_count = ctx.ref_count, "context closing");
        let active = core::mem::take(&mut ctx.active_values);
        let class_proto = core::mem::take(&mut ctx.class_proto);
        let global_obj = core::mem::replace(&mut ctx.global_obj, JS_NULL);

        for val in active {
            if self.is_live_object(val) && self.read_count(val) > 1 {
                self.free_value(val);
            }
        }
        self.free_value(global_obj);
        self.release_all(class_proto);

        if let Some(ctx) = self.contexts.get_mut(id.index() as usize) {
            ctx.state = ContextState::Freed;
        }
        tracing::debug!(context = %id, "context freed");
    }

    /// State of a context, or `None` for an id this runtime never issued.
    pub fn context_state(&self, id: ContextId) -> Option<ContextState> {
        self.contexts.get(id.index() as usize).map(JSContext::state)
    }

    pub fn context(&self, id: ContextId) -> Result<&JSContext, RuntimeError> {
        match self.contexts.get(id.index() as usize) {
            Some(ctx) if ctx.state == ContextState::Active => Ok(ctx),
            _ => Err(RuntimeError::ContextFreed(id)),
        }
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Result<&mut JSContext, RuntimeError> {
        match self.contexts.get_mut(id.index() as usize) {
            Some(ctx) if ctx.state == ContextState::Active => Ok(ctx),
            _ => Err(RuntimeError::ContextFreed(id)),
        }
    }

    fn stale_context(&mut self, id: ContextId) -> TeardownDiagnostic {
        let diag = TeardownDiagnostic::new(
            AnomalyCause::StaleContext,
            AnomalyDetail::FreedContext { context: id },
        );
        self.record(diag.clone());
        diag
    }

    fn release_all(&mut self, vals: Vec<JSValue>) {
        for val in vals {
            self.free_value(val);
        }
    }

    /// New reference to the context's global object.
    pub fn global_object(&self, id: ContextId) -> Result<JSValue, RuntimeError> {
        let global = self.context(id)?.global_obj;
        Ok(self.dup_value(global))
    }

    /// New reference to the prototype registered for `class_id`.
    pub fn class_proto(&self, id: ContextId, class_id: u8) -> Result<JSValue, RuntimeError> {
        let proto = self.borrowed_class_proto(id, class_id)?;
        Ok(self.dup_value(proto))
    }

    fn borrowed_class_proto(&self, id: ContextId, class_id: u8) -> Result<JSValue, RuntimeError> {
        let ctx = self.context(id)?;
        match ctx.class_proto.get(class_id as usize) {
            Some(&proto) => Ok(proto),
            None if JSObjectClass::is_user(class_id) => Ok(JS_NULL),
            None => Err(RuntimeError::InvalidClassId(class_id)),
        }
    }

    pub fn new_object(&mut self, ctx: ContextId) -> Result<JSValue, RuntimeError> {
        self.new_object_class(ctx, JSObjectClass::Object as u8)
    }

    pub fn new_array(&mut self, ctx: ContextId) -> Result<JSValue, RuntimeError> {
        self.new_object_class(ctx, JSObjectClass::Array as u8)
    }

    pub fn new_object_class(&mut self, ctx: ContextId, class_id: u8) -> Result<JSValue, RuntimeError> {
        let proto = self.borrowed_class_proto(ctx, class_id)?;
        self.new_object_proto_class(proto, class_id)
    }

    /// New object of `class_id` with `proto`, which is duplicated. String and
    /// number classes are created through their own constructors instead.
    pub fn new_object_proto_class(&mut self, proto: JSValue, class_id: u8) -> Result<JSValue, RuntimeError> {
        let data = match JSObjectClass::from_id(class_id) {
            Some(JSObjectClass::Object | JSObjectClass::Global) => ObjectData::Plain {
                proto,
                props: Vec::new(),
            },
            Some(JSObjectClass::Array) => ObjectData::Array {
                proto,
                items: Vec::new(),
            },
            Some(JSObjectClass::Function) => ObjectData::Function {
                proto,
                name: "".into(),
                props: Vec::new(),
            },
            Some(JSObjectClass::User) => ObjectData::User {
                proto,
                props: Vec::new(),
                opaque: core::ptr::null_mut(),
            },
            Some(JSObjectClass::String | JSObjectClass::Float64) | None => {
                return Err(RuntimeError::InvalidClassId(class_id));
            }
        };
        self.dup_value(proto);
        self.alloc_object(class_id, data)
    }

    /// New object whose prototype is `ctor.prototype` when that property
    /// holds an object, else the context's prototype for `class_id`.
    pub fn create_from_ctor(
        &mut self,
        ctx: ContextId,
        ctor: JSValue,
        class_id: u8,
    ) -> Result<JSValue, RuntimeError> {
        self.context(ctx)?;
        if !ctor.is_undefined() {
            let proto = self.get_property(ctor, "prototype");
            if self.is_object(proto) {
                let obj = self.new_object_proto_class(proto, class_id);
                self.free_value(proto);
                return obj;
            }
            self.free_value(proto);
        }
        self.new_object_class(ctx, class_id)
    }

    /// Whether `val` is a heap object that can carry properties.
    pub fn is_object(&self, val: JSValue) -> bool {
        object_ref(val).is_some_and(|obj| {
            !matches!(
                obj.class(),
                Some(JSObjectClass::String | JSObjectClass::Float64)
            )
        })
    }

    pub fn new_plain_object(&mut self, proto: JSValue) -> Result<JSValue, RuntimeError> {
        self.new_object_proto_class(proto, JSObjectClass::Object as u8)
    }

    /// New array taking ownership of `items`; `proto` is duplicated.
    pub fn new_array_from(&mut self, proto: JSValue, items: Vec<JSValue>) -> Result<JSValue, RuntimeError> {
        self.dup_value(proto);
        self.alloc_object(JSObjectClass::Array as u8, ObjectData::Array { proto, items })
    }

    pub fn new_function(&mut self, name: &str, proto: JSValue) -> Result<JSValue, RuntimeError> {
        self.dup_value(proto);
        self.alloc_object(
            JSObjectClass::Function as u8,
            ObjectData::Function {
                proto,
                name: name.into(),
                props: Vec::new(),
            },
        )
    }

    /// New object of host class `class_id` carrying `opaque`, which is handed
    /// to the class finalizer when the object is freed.
    pub fn new_user_object(
        &mut self,
        proto: JSValue,
        class_id: u8,
        opaque: *mut c_void,
    ) -> Result<JSValue, RuntimeError> {
        if !JSObjectClass::is_user(class_id) {
            return Err(RuntimeError::InvalidClassId(class_id));
        }
        self.dup_value(proto);
        self.alloc_object(
            class_id,
            ObjectData::User {
                proto,
                props: Vec::new(),
                opaque,
            },
        )
    }

    pub fn new_string(&mut self, s: &str) -> Result<JSValue, RuntimeError> {
        self.alloc_object(JSObjectClass::String as u8, ObjectData::String(s.into()))
    }

    /// Always boxes `d` as a heap number.
    pub fn new_float64(&mut self, d: f64) -> Result<JSValue, RuntimeError> {
        self.alloc_object(JSObjectClass::Float64 as u8, ObjectData::Float64(d))
    }

    /// Encodes `d` as an immediate when it fits and boxes it otherwise.
    pub fn new_number(&mut self, d: f64) -> Result<JSValue, RuntimeError> {
        if d.fract() == 0.0
            && d >= crate::jsvalue::JS_SHORTINT_MIN as f64
            && d <= crate::jsvalue::JS_SHORTINT_MAX as f64
            && !(d == 0.0 && d.is_sign_negative())
        {
            return Ok(JSValue::new_short_int(d as i32));
        }
        match JSValue::try_short_float(d) {
            Some(val) => Ok(val),
            None => self.new_float64(d),
        }
    }

    pub fn get_number(&self, val: JSValue) -> Option<f64> {
        match val.tag() {
            ValueTag::Int => Some(val.get_int() as f64),
            #[cfg(target_pointer_width = "64")]
            ValueTag::Float => Some(val.get_short_float()),
            ValueTag::Object => match *object_ref(val)?.data() {
                ObjectData::Float64(d) => Some(d),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_string(&self, val: JSValue) -> Option<String> {
        match &*object_ref(val)?.data() {
            ObjectData::String(s) => Some(s.to_string()),
            _ => None,
        }
    }
}
