//! The dependency-graph engine: provider map construction, cycle rejection, the solver that
//! orders provider calls, and the verifications that run around it.  Control flow through these
//! phases is strictly linear per injector and lives in the crate root's `plan_program`.

pub(crate) mod checks;
pub(crate) mod cycles;
pub(crate) mod map;
pub(crate) mod solve;
pub(crate) mod usage;

pub use solve::{Call, CallKind, InjectorPlan, SourceRef};

pub(crate) use solve::solve;
