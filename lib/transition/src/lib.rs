//! # Transitions and compiled action sequences
//!
//! A [`Transition`] is the precomputed description of one partitioning
//! switch: which slices stay local, which must be initialized to a
//! reduction identity, what flows to and from which peer, and which slices
//! are reduced over which sub-groups. It is produced by the partitioner (or
//! directly by tests) and consumed exactly once per switch.
//!
//! A [`TransitionPlan`] is the compiled form: an append-only sequence of
//! primitive [`Action`]s that the executor can record on first execution and
//! replay afterwards. Two idempotent transformations prepare the sequence:
//! [`TransitionPlan::split_transition_execs`] expands the composite
//! transition into primitives, and [`TransitionPlan::sort_two_phase`]
//! establishes the deadlock-free peer ordering.

mod model;
mod plan;

pub use self::{
    model::{GroupRef, InitOp, LocalOp, RecvOp, RedOp, SendOp, TaskGroup, Transition},
    plan::{Action, TransitionPlan},
};
