use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in an up to three-dimensional index space.
///
/// All three components are always present; how many of them are significant
/// is decided by the `dims` of the [`Slice`](crate::Slice) or
/// [`Space`](crate::Space) the index is used with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index(pub [i64; 3]);

impl Index {
    pub fn d1(i0: i64) -> Self {
        Index([i0, 0, 0])
    }

    pub fn d2(i0: i64, i1: i64) -> Self {
        Index([i0, i1, 0])
    }

    pub fn d3(i0: i64, i1: i64, i2: i64) -> Self {
        Index([i0, i1, i2])
    }

    /// Equality over the first `dims` components only.
    pub fn equals(&self, dims: u32, other: &Index) -> bool {
        self.0[..dims as usize] == other.0[..dims as usize]
    }

    /// Render as `i0[/i1[/i2]]`, the notation used in wire positions and logs.
    pub fn display(&self, dims: u32) -> IndexDisplay<'_> {
        IndexDisplay { idx: self, dims }
    }
}

pub struct IndexDisplay<'a> {
    idx: &'a Index,
    dims: u32,
}

impl fmt::Display for IndexDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.idx.0[0])?;
        for d in 1..self.dims as usize {
            write!(f, "/{}", self.idx.0[d])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_significant_dims() {
        let idx = Index::d3(4, 7, 2);
        assert_eq!(idx.display(1).to_string(), "4");
        assert_eq!(idx.display(2).to_string(), "4/7");
        assert_eq!(idx.display(3).to_string(), "4/7/2");
    }

    #[test]
    fn equality_ignores_insignificant_dims() {
        let a = Index::d2(1, 2);
        let b = Index::d3(1, 2, 9);
        assert!(a.equals(2, &b));
        assert!(!a.equals(3, &b));
    }
}
