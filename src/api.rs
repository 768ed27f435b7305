//! Embedding entry points.
//!
//! Thin `js_*` wrappers over `JSRuntime` for hosts that drive the runtime
//! through a flat, value-returning API. Fallible constructors return
//! `JS_EXCEPTION` instead of a `Result`; the error is logged.
//!
//! - `js_new_runtime` / `js_free_runtime` - runtime lifetime
//! - `js_new_context` / `js_free_context` - context lifetime
//! - `js_create_from_ctor` - object creation from a constructor's prototype
//! - `js_get_own_property_names` / `js_free_prop_enum` - key enumeration
//! - `js_get_refcount` / `js_decrement_refcount` - host-side count control

use crate::context::{ContextConfig, ContextId};
use crate::external::ExternalOwnership;
use crate::jsvalue::{JS_EXCEPTION, JSValue};
use crate::runtime::{JSRuntime, RuntimeConfig, RuntimeError};
use crate::teardown::{ShutdownReport, TeardownDecision};

fn value_or_exception(result: Result<JSValue, RuntimeError>) -> JSValue {
    match result {
        Ok(val) => val,
        Err(err) => {
            tracing::debug!(%err, "api call failed");
            JS_EXCEPTION
        }
    }
}

pub fn js_new_runtime(config: RuntimeConfig) -> JSRuntime {
    JSRuntime::new(config)
}

/// Shuts the runtime down and returns what teardown found.
pub fn js_free_runtime(mut rt: JSRuntime) -> ShutdownReport {
    rt.shutdown()
}

pub fn js_new_context(rt: &mut JSRuntime, config: ContextConfig) -> Option<ContextId> {
    match rt.new_context(config) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            tracing::debug!(%err, "context creation failed");
            None
        }
    }
}

pub fn js_dup_context(rt: &mut JSRuntime, ctx: ContextId) {
    rt.dup_context(ctx);
}

pub fn js_free_context(rt: &mut JSRuntime, ctx: ContextId) -> TeardownDecision {
    rt.free_context(ctx)
}

pub fn js_get_global_object(rt: &JSRuntime, ctx: ContextId) -> JSValue {
    value_or_exception(rt.global_object(ctx))
}

pub fn js_new_object(rt: &mut JSRuntime, ctx: ContextId) -> JSValue {
    value_or_exception(rt.new_object(ctx))
}

pub fn js_new_object_class(rt: &mut JSRuntime, ctx: ContextId, class_id: u8) -> JSValue {
    value_or_exception(rt.new_object_class(ctx, class_id))
}

pub fn js_new_array(rt: &mut JSRuntime, ctx: ContextId) -> JSValue {
    value_or_exception(rt.new_array(ctx))
}

pub fn js_new_string(rt: &mut JSRuntime, s: &str) -> JSValue {
    value_or_exception(rt.new_string(s))
}

pub fn js_new_float64(rt: &mut JSRuntime, d: f64) -> JSValue {
    value_or_exception(rt.new_number(d))
}

pub fn js_new_function(rt: &mut JSRuntime, ctx: ContextId, name: &str) -> JSValue {
    let proto = match rt.class_proto(ctx, crate::enums::JSObjectClass::Function as u8) {
        Ok(proto) => proto,
        Err(err) => return value_or_exception(Err(err)),
    };
    let func = rt.new_function(name, proto);
    rt.free_value(proto);
    value_or_exception(func)
}

/// New object with `ctor.prototype` as its prototype, falling back to the
/// context's prototype for `class_id` when `ctor` is `undefined` or its
/// `prototype` property is not an object.
pub fn js_create_from_ctor(rt: &mut JSRuntime, ctx: ContextId, ctor: JSValue, class_id: u8) -> JSValue {
    value_or_exception(rt.create_from_ctor(ctx, ctor, class_id))
}

/// Consumes `val`. Returns `false` if the store failed.
pub fn js_set_property_str(rt: &mut JSRuntime, obj: JSValue, name: &str, val: JSValue) -> bool {
    match rt.set_property(obj, name, val) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(%err, name, "property store failed");
            false
        }
    }
}

pub fn js_get_property_str(rt: &JSRuntime, obj: JSValue, name: &str) -> JSValue {
    rt.get_property(obj, name)
}

pub fn js_delete_property_str(rt: &mut JSRuntime, obj: JSValue, name: &str) -> bool {
    rt.delete_property(obj, name)
}

/// One entry of an own-property table. `atom` is a string value that owns
/// one reference.
#[derive(Debug)]
pub struct PropertyEnum {
    pub is_enumerable: bool,
    pub atom: JSValue,
}

/// Own property names of `obj`. Release the table with `js_free_prop_enum`.
///
/// Returns `None` if a name could not be allocated; entries made so far are
/// released first.
pub fn js_get_own_property_names(rt: &mut JSRuntime, obj: JSValue) -> Option<Vec<PropertyEnum>> {
    let keys = rt.own_property_keys(obj);
    let mut tab = Vec::with_capacity(keys.len());
    for key in keys {
        match rt.new_string(&key) {
            Ok(atom) => tab.push(PropertyEnum {
                is_enumerable: true,
                atom,
            }),
            Err(err) => {
                tracing::debug!(%err, "property enumeration failed");
                js_free_prop_enum(rt, tab);
                return None;
            }
        }
    }
    Some(tab)
}

pub fn js_free_prop_enum(rt: &mut JSRuntime, tab: Vec<PropertyEnum>) {
    for prop in tab {
        rt.free_value(prop.atom);
    }
}

pub fn js_to_string(rt: &JSRuntime, val: JSValue) -> Option<String> {
    rt.get_string(val)
}

pub fn js_to_number(rt: &JSRuntime, val: JSValue) -> Option<f64> {
    rt.get_number(val)
}

pub fn js_dup_value(rt: &JSRuntime, val: JSValue) -> JSValue {
    rt.dup_value(val)
}

pub fn js_free_value(rt: &mut JSRuntime, val: JSValue) {
    rt.free_value(val);
}

pub fn js_get_refcount(rt: &JSRuntime, val: JSValue) -> i32 {
    rt.inspect(val)
}

/// Host-side release. May free the object and may drive the count negative.
pub fn js_decrement_refcount(rt: &mut JSRuntime, val: JSValue) -> i32 {
    rt.release_external_reference(val)
}

pub fn js_adopt_value(rt: &mut JSRuntime, val: JSValue) {
    rt.adopt_extra_reference(val);
}

pub fn js_is_live_object(rt: &JSRuntime, val: JSValue) -> bool {
    rt.is_live_object(val)
}

pub fn js_run_gc(rt: &mut JSRuntime) -> usize {
    rt.run_gc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::JSObjectClass;
    use crate::jsvalue::JS_UNDEFINED;

    #[test]
    fn property_names_are_owned_strings() {
        let mut rt = js_new_runtime(RuntimeConfig::default());
        let ctx = js_new_context(&mut rt, ContextConfig::default()).expect("context");
        let obj = js_new_object(&mut rt, ctx);
        assert!(js_set_property_str(&mut rt, obj, "a", JSValue::new_short_int(1)));
        assert!(js_set_property_str(&mut rt, obj, "b", JS_UNDEFINED));

        let before = rt.live_objects();
        let tab = js_get_own_property_names(&mut rt, obj).expect("names");
        let names: Vec<String> = tab
            .iter()
            .filter_map(|p| js_to_string(&rt, p.atom))
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert!(tab.iter().all(|p| p.is_enumerable && js_get_refcount(&rt, p.atom) == 1));
        js_free_prop_enum(&mut rt, tab);
        assert_eq!(rt.live_objects(), before);

        js_free_value(&mut rt, obj);
        js_free_context(&mut rt, ctx);
        assert!(js_free_runtime(rt).is_clean());
    }

    #[test]
    fn allocation_failure_maps_to_exception() {
        let mut rt = js_new_runtime(RuntimeConfig {
            memory_limit: Some(0),
            ..RuntimeConfig::default()
        });
        assert!(js_new_string(&mut rt, "x").is_exception());
        assert!(js_new_context(&mut rt, ContextConfig::default()).is_none());
    }

    #[test]
    fn create_from_ctor_falls_back_for_non_object_prototype() {
        let mut rt = js_new_runtime(RuntimeConfig::default());
        let ctx = js_new_context(&mut rt, ContextConfig::default()).expect("context");
        let ctor = js_new_function(&mut rt, ctx, "F");
        assert!(js_set_property_str(&mut rt, ctor, "prototype", JSValue::new_short_int(5)));
        let obj = js_create_from_ctor(&mut rt, ctx, ctor, JSObjectClass::Array as u8);
        let array_proto = rt.class_proto(ctx, JSObjectClass::Array as u8).expect("proto");
        assert_eq!(rt.get_proto(obj), array_proto);
        for val in [array_proto, obj, ctor] {
            js_free_value(&mut rt, val);
        }
        js_free_context(&mut rt, ctx);
        assert!(js_free_runtime(rt).is_clean());
    }

    #[test]
    fn host_decrement_reports_new_count() {
        let mut rt = js_new_runtime(RuntimeConfig::default());
        let s = js_new_string(&mut rt, "s");
        js_adopt_value(&mut rt, s);
        assert_eq!(js_get_refcount(&rt, s), 2);
        assert_eq!(js_decrement_refcount(&mut rt, s), 1);
        assert_eq!(js_decrement_refcount(&mut rt, s), 0);
        assert!(!js_is_live_object(&rt, s));
    }
}
