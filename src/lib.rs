//! Reference-counted, cycle-collecting value runtime core.
//!
//! Objects are counted handles collected by trial deletion. A host embedding
//! may hold and release references on collector-tracked objects through
//! [`external::ExternalOwnership`]; over-release and objects still held at
//! shutdown are recorded as diagnostics instead of aborting teardown.

pub mod api;
pub mod context;
pub mod enums;
pub mod external;
pub mod gc;
pub mod jsvalue;
pub mod list;
pub mod object;
pub mod property;
pub mod refcount;
pub mod runtime;
pub mod tagged_ptr;
pub mod teardown;
