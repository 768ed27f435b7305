use crate::context::{ContextId, JSContext};
use crate::enums::JSObjectClass;
use crate::jsvalue::JSValue;
use crate::list::GcObjectList;
use crate::object::{GcObject, ObjectData, ObjectFlags};
use crate::teardown::{
    AnomalyCause, AnomalyDetail, ResidualObject, ShutdownReport, TeardownCause, TeardownDiagnostic,
};
use core::ffi::c_void;
use core::ptr::NonNull;
use std::collections::VecDeque;

/// Finalizer for host classes, called with the object's opaque pointer when
/// the object is freed.
pub type JSCFinalizer = fn(opaque: *mut c_void);

const DEFAULT_GC_THRESHOLD: usize = 256;

/// Runtime construction parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuntimeConfig {
    /// Upper bound on accounted heap bytes; `None` disables the limit.
    pub memory_limit: Option<usize>,
    /// Live-object count that triggers an opportunistic cycle collection.
    pub gc_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            gc_threshold: DEFAULT_GC_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuntimeError {
    OutOfMemory { limit: usize, requested: usize },
    InvalidClassId(u8),
    ContextFreed(ContextId),
    NotAnObject,
    ShutDown,
}

impl core::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RuntimeError::OutOfMemory { limit, requested } => {
                write!(f, "out of memory (limit {limit} bytes, requested {requested})")
            }
            RuntimeError::InvalidClassId(id) => write!(f, "invalid class id {id}"),
            RuntimeError::ContextFreed(ctx) => write!(f, "context {ctx} is freed"),
            RuntimeError::NotAnObject => write!(f, "not an object"),
            RuntimeError::ShutDown => write!(f, "runtime is shut down"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Process- or embedder-scoped root of the object graph.
///
/// Invariants:
/// - Every live heap object is linked in `gc_obj_list`.
/// - Headers in `zombies` are unlinked, carry `FREED`, and are reclaimed only
///   by `shutdown`.
/// - `zero_refs` holds objects whose count reached zero and that are waiting
///   to be freed; it is drained before any public operation returns.
pub struct JSRuntime {
    pub(crate) gc_obj_list: GcObjectList,
    pub(crate) zero_refs: VecDeque<NonNull<GcObject>>,
    pub(crate) freeing: bool,
    pub(crate) zombies: Vec<NonNull<GcObject>>,
    pub(crate) contexts: Vec<JSContext>,
    pub(crate) finalizers: Vec<Option<JSCFinalizer>>,
    pub(crate) diagnostics: Vec<TeardownDiagnostic>,
    pub(crate) in_gc: bool,
    config: RuntimeConfig,
    malloc_size: usize,
    gc_threshold: usize,
    shut_down: bool,
}

impl JSRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let gc_threshold = config.gc_threshold;
        tracing::debug!(
            memory_limit = ?config.memory_limit,
            gc_threshold,
            "runtime created"
        );
        Self {
            gc_obj_list: GcObjectList::new(),
            zero_refs: VecDeque::new(),
            freeing: false,
            zombies: Vec::new(),
            contexts: Vec::new(),
            finalizers: Vec::new(),
            diagnostics: Vec::new(),
            in_gc: false,
            config,
            malloc_size: 0,
            gc_threshold,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.config.memory_limit = limit;
    }

    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.config.gc_threshold = threshold;
        self.gc_threshold = threshold;
    }

    /// Registers the finalizer run when an object of host class `class_id` is freed.
    pub fn set_class_finalizer(
        &mut self,
        class_id: u8,
        finalizer: Option<JSCFinalizer>,
    ) -> Result<(), RuntimeError> {
        if !JSObjectClass::is_user(class_id) {
            return Err(RuntimeError::InvalidClassId(class_id));
        }
        let idx = (class_id - JSObjectClass::User as u8) as usize;
        if self.finalizers.len() <= idx {
            self.finalizers.resize(idx + 1, None);
        }
        self.finalizers[idx] = finalizer;
        Ok(())
    }

    pub fn malloc_size(&self) -> usize {
        self.malloc_size
    }

    pub fn live_objects(&self) -> usize {
        self.gc_obj_list.len()
    }

    pub fn parked_objects(&self) -> usize {
        self.zombies.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn diagnostics(&self) -> &[TeardownDiagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<TeardownDiagnostic> {
        core::mem::take(&mut self.diagnostics)
    }

    pub(crate) fn record(&mut self, diag: TeardownDiagnostic) {
        tracing::warn!(cause = ?diag.cause, "{diag}");
        self.diagnostics.push(diag);
    }

    pub(crate) fn note_growth(&mut self, bytes: usize) {
        self.malloc_size += bytes;
    }

    pub(crate) fn note_shrink(&mut self, bytes: usize) {
        self.malloc_size = self.malloc_size.saturating_sub(bytes);
    }

    /// Allocates a heap object owning the references inside `data`.
    ///
    /// On failure the references held by `data` are released.
    pub(crate) fn alloc_object(
        &mut self,
        class_id: u8,
        data: ObjectData,
    ) -> Result<JSValue, RuntimeError> {
        if self.shut_down {
            for child in data.into_children() {
                self.free_value(child);
            }
            return Err(RuntimeError::ShutDown);
        }
        if !self.in_gc && self.gc_obj_list.len() >= self.gc_threshold {
            self.trigger_gc();
        }
        let size = core::mem::size_of::<GcObject>() + data.heap_size();
        if let Some(limit) = self.config.memory_limit
            && self.malloc_size + size > limit
        {
            if !self.in_gc {
                self.run_gc();
            }
            if self.malloc_size + size > limit {
                tracing::debug!(limit, requested = size, "allocation refused");
                for child in data.into_children() {
                    self.free_value(child);
                }
                return Err(RuntimeError::OutOfMemory {
                    limit,
                    requested: size,
                });
            }
        }
        let ptr = self.gc_obj_list.push_back(Box::new(GcObject::new(class_id, data)));
        self.malloc_size += size;
        tracing::trace!(class_id, size, "object allocated");
        Ok(JSValue::from_object(ptr))
    }

    fn trigger_gc(&mut self) {
        self.run_gc();
        let live = self.gc_obj_list.len();
        self.gc_threshold = self.config.gc_threshold.max(live + live / 2);
    }

    pub(crate) fn finalize(&self, class_id: u8, data: &ObjectData) {
        let ObjectData::User { opaque, .. } = data else {
            return;
        };
        if !JSObjectClass::is_user(class_id) {
            return;
        }
        let idx = (class_id - JSObjectClass::User as u8) as usize;
        if let Some(finalizer) = self.finalizers.get(idx).copied().flatten() {
            finalizer(*opaque);
        }
    }

    /// Unlinks a header whose payload is already released and either frees it
    /// or parks it.
    ///
    /// # Safety
    /// `ptr` must be linked in `gc_obj_list` and carry `FREED`.
    pub(crate) unsafe fn release_header(&mut self, ptr: NonNull<GcObject>, size: usize, park: bool) {
        // SAFETY: caller guarantees `ptr` is linked in `gc_obj_list`.
        let boxed = unsafe { self.gc_obj_list.unlink(ptr) };
        // A parked header stays allocated, so only its payload is given back.
        let released = if park {
            size.saturating_sub(core::mem::size_of::<GcObject>())
        } else {
            size
        };
        self.malloc_size = self.malloc_size.saturating_sub(released);
        if park {
            tracing::trace!(class_id = boxed.class_id(), "object header parked");
            self.zombies.push(NonNull::from(Box::leak(boxed)));
        } else {
            tracing::trace!(class_id = boxed.class_id(), "object freed");
        }
    }

    /// Closes every context, collects cycles, and reclaims whatever is left.
    ///
    /// Objects still on the collector list after the final collection do not
    /// abort shutdown: they are reported as residual, logged, and reclaimed.
    /// Handles to them are dangling afterwards. The runtime is torn down once:
    /// later allocations fail with `RuntimeError::ShutDown` and calling this
    /// again returns an empty report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        let mut report = ShutdownReport::default();

        let open: Vec<ContextId> = self
            .contexts
            .iter()
            .filter(|ctx| ctx.is_open())
            .map(JSContext::id)
            .collect();
        for id in open {
            self.close_context(id, TeardownCause::RuntimeShutdown);
            report.contexts_closed += 1;
        }

        report.cycles_collected = self.run_gc();

        if !self.gc_obj_list.is_empty() {
            report.residual = self
                .gc_obj_list
                .iter()
                .map(|obj| ResidualObject {
                    class_id: obj.class_id(),
                    ref_count: obj.ref_count(),
                    externally_adopted: obj.has_flag(ObjectFlags::EXTERNAL),
                })
                .collect();
            let externally_adopted = report
                .residual
                .iter()
                .filter(|obj| obj.externally_adopted)
                .count();
            self.record(TeardownDiagnostic::new(
                AnomalyCause::ExternalHold,
                AnomalyDetail::ResidualObjects {
                    count: report.residual.len(),
                    externally_adopted,
                },
            ));
            // Residual objects reference each other and possibly parked
            // headers; payloads are dropped without touching any child.
            while let Some(obj) = self.gc_obj_list.pop_front() {
                let data = obj.take_data();
                self.finalize(obj.class_id(), &data);
            }
        }

        report.zombies_reclaimed = self.zombies.len();
        for ptr in self.zombies.drain(..) {
            // SAFETY: parked headers were leaked from boxes and are unlinked.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }

        self.malloc_size = 0;
        self.shut_down = true;
        report.diagnostics = core::mem::take(&mut self.diagnostics);
        tracing::debug!(
            contexts = report.contexts_closed,
            collected = report.cycles_collected,
            residual = report.residual.len(),
            zombies = report.zombies_reclaimed,
            "runtime shut down"
        );
        report
    }
}

impl Default for JSRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Drop for JSRuntime {
    fn drop(&mut self) {
        if !self.shut_down {
            let _ = self.shutdown();
        }
    }
}
