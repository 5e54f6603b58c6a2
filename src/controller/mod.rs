//! Release controller: steady-state reconciliation and finalization.
//!
//! The reconciler is stateless between invocations; the surrounding
//! controller runtime guarantees invocations for one Release never overlap.

pub mod conditions;
pub mod finalize;
pub mod release;

pub use release::{error_policy, reconcile, Context};
