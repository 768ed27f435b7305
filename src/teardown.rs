//! Teardown policy and the diagnostics recorded for tolerated anomalies.
//!
//! A teardown step never asserts. It resolves to one of three decisions, and
//! every anomaly it tolerates is tagged with who is held responsible so hosts
//! and tests can tell a host over-release from an engine-side double free.

use crate::context::ContextId;

/// Why a context is being torn down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TeardownCause {
    /// The context's own count was released.
    Release,
    /// The runtime is shutting down and closes every context.
    RuntimeShutdown,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AnomalyCause {
    /// A count went below zero through the external release path.
    HostOverRelease,
    /// Objects still on the collector list at shutdown, presumed held by the host.
    ExternalHold,
    /// An ordinary release found a count that was already zero or below.
    EngineDoubleFree,
    /// An operation named a context that is already freed.
    StaleContext,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AnomalyDetail {
    OverReleasedContext { context: ContextId, ref_count: i32 },
    OverReleasedObject { class_id: u8, ref_count: i32 },
    ResidualObjects { count: usize, externally_adopted: usize },
    ReleaseAtZero { class_id: u8, ref_count: i32 },
    FreedContext { context: ContextId },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownDiagnostic {
    pub cause: AnomalyCause,
    pub detail: AnomalyDetail,
}

impl TeardownDiagnostic {
    pub fn new(cause: AnomalyCause, detail: AnomalyDetail) -> Self {
        Self { cause, detail }
    }
}

impl core::fmt::Display for TeardownDiagnostic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.detail {
            AnomalyDetail::OverReleasedContext { context, ref_count } => {
                write!(f, "context {context} over-released (ref_count {ref_count})")
            }
            AnomalyDetail::OverReleasedObject { class_id, ref_count } => {
                write!(f, "object of class {class_id} over-released (ref_count {ref_count})")
            }
            AnomalyDetail::ResidualObjects {
                count,
                externally_adopted,
            } => write!(
                f,
                "{count} objects left on the gc list at shutdown ({externally_adopted} externally adopted)"
            ),
            AnomalyDetail::ReleaseAtZero { class_id, ref_count } => {
                write!(f, "release of class {class_id} object at ref_count {ref_count} ignored")
            }
            AnomalyDetail::FreedContext { context } => {
                write!(f, "context {context} is already freed")
            }
        }
    }
}

/// Outcome of a teardown step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownDecision {
    Proceed,
    Defer,
    TolerateAndLog(TeardownDiagnostic),
}

impl TeardownDecision {
    /// Whether teardown runs now. A tolerated anomaly still proceeds.
    pub fn proceeds(&self) -> bool {
        !matches!(self, TeardownDecision::Defer)
    }
}

/// Decides what a context does on entry to `Closing`.
///
/// Only a positive count under an ordinary release defers. Any count at or
/// below zero proceeds; below zero it is also reported as a host over-release.
/// Runtime shutdown proceeds regardless of the count.
pub fn teardown_decision(context: ContextId, ref_count: i32, cause: TeardownCause) -> TeardownDecision {
    match cause {
        TeardownCause::RuntimeShutdown => TeardownDecision::Proceed,
        TeardownCause::Release if ref_count > 0 => TeardownDecision::Defer,
        TeardownCause::Release if ref_count == 0 => TeardownDecision::Proceed,
        TeardownCause::Release => TeardownDecision::TolerateAndLog(TeardownDiagnostic::new(
            AnomalyCause::HostOverRelease,
            AnomalyDetail::OverReleasedContext { context, ref_count },
        )),
    }
}

/// One object still on the collector list when the runtime shut down.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResidualObject {
    pub class_id: u8,
    pub ref_count: i32,
    pub externally_adopted: bool,
}

/// Summary returned by `JSRuntime::shutdown`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShutdownReport {
    pub contexts_closed: usize,
    pub cycles_collected: usize,
    pub residual: Vec<ResidualObject>,
    pub zombies_reclaimed: usize,
    pub diagnostics: Vec<TeardownDiagnostic>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.residual.is_empty()
    }
}
