use crate::{index::Index, slice::Slice};

/// A named index domain. Immutable after creation.
#[derive(Clone, Debug)]
pub struct Space {
    name: String,
    shape: Slice,
}

impl Space {
    pub fn new_1d(name: impl Into<String>, s0: i64) -> Self {
        Space {
            name: name.into(),
            shape: Slice::d1(0, s0),
        }
    }

    pub fn new_2d(name: impl Into<String>, s0: i64, s1: i64) -> Self {
        Space {
            name: name.into(),
            shape: Slice::d2((0, 0), (s0, s1)),
        }
    }

    pub fn new_3d(name: impl Into<String>, s0: i64, s1: i64, s2: i64) -> Self {
        Space {
            name: name.into(),
            shape: Slice::d3((0, 0, 0), (s0, s1, s2)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> u32 {
        self.shape.dims()
    }

    /// The full index domain as a slice anchored at the origin.
    pub fn shape(&self) -> &Slice {
        &self.shape
    }

    pub fn size(&self) -> u64 {
        self.shape.size()
    }

    pub fn contains(&self, idx: &Index) -> bool {
        self.shape.contains(idx)
    }
}
