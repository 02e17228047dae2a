//! # Index spaces, slices and process groups
//!
//! The index algebra underneath every partitioned container: up to
//! three-dimensional [`Index`]es, half-open hyper-rectangle [`Slice`]s over a
//! named [`Space`], and the lexicographic traversal which is the sole
//! primitive used for packing, unpacking and element streaming.
//!
//! [`Group`]s describe the set of processes a container is partitioned over.
//! A group maps its dense task indices to stable [`LocationId`]s, which is
//! what transports address peers by, and can be shrunk to a subset of its
//! members while keeping that mapping intact.

pub mod group;
pub mod index;
pub mod slice;

mod space;

pub use self::{
    group::{Group, LocationId, TaskId},
    index::Index,
    slice::Slice,
    space::Space,
};
