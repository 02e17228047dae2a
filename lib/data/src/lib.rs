//! # Element types, layouts and local memory mappings
//!
//! A [`Mapping`] owns the contiguous byte buffer a process holds for its
//! part of a partitioned container: the buffer covers a *required slice*
//! (usually a superset of the owned slice, to accommodate halos) and is
//! addressed through a [`Layout`] translating global indices to linear
//! offsets. Buffers are allocated lazily on first real use.
//!
//! [`ElemType`] is the capability table of an element type: its byte size
//! plus, where supported, elementwise reduction and reduction-identity
//! initialization over raw byte buffers. The built-in registry covers the
//! usual POD scalars ([`CHAR`], [`INT32`], [`INT64`], [`FLOAT`],
//! [`DOUBLE`]).
//!
//! Packing and unpacking for non-contiguous sends traverse slices in
//! lexicographic order and are cursor-driven: callers loop until the cursor
//! reaches the end of the slice, which makes the chunking of the transport
//! invisible to the data layer.

pub mod layout;
pub mod mapping;
pub mod types;

mod stat;

pub use self::{
    layout::{Layout, Lexicographic},
    mapping::{Mapping, MappingList},
    stat::SwitchStat,
    types::{ElemType, ReduceOp, CHAR, DOUBLE, FLOAT, INT32, INT64},
};
