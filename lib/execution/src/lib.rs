//! # Driving partitioning switches
//!
//! The [`Executor`] is the entry point for running a transition: it skips
//! non-members, compiles the transition into a primitive, deadlock-free
//! action sequence (recording it into a [`TransitionPlan`] for replay when
//! one is supplied) and hands the sequence to the transport.
//!
//! The [`Data`] container owns the process-local side of one partitioned
//! array: its mappings, the switch statistics and the neighbour-free parts
//! of a switch — local copies of kept slices and initialization of
//! reduction identities — which run after the executor returns.

mod container;
mod executor;

pub use self::{container::Data, executor::Executor};
