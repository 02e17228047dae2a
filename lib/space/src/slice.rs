use std::fmt;

use serde::{Deserialize, Serialize};

use crate::index::Index;

/// A half-open hyper-rectangle `[from, to)` over an index space.
///
/// A slice is *empty* iff any significant dimension has `from >= to`. Empty
/// slices have size 0 and contain no index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub from: Index,
    pub to: Index,
    dims: u32,
}

impl Slice {
    pub fn new(dims: u32, from: Index, to: Index) -> Self {
        assert!((1..=3).contains(&dims), "unsupported dims {dims}");
        Slice { from, to, dims }
    }

    pub fn d1(from: i64, to: i64) -> Self {
        Slice::new(1, Index::d1(from), Index::d1(to))
    }

    pub fn d2(from: (i64, i64), to: (i64, i64)) -> Self {
        Slice::new(2, Index::d2(from.0, from.1), Index::d2(to.0, to.1))
    }

    pub fn d3(from: (i64, i64, i64), to: (i64, i64, i64)) -> Self {
        Slice::new(
            3,
            Index::d3(from.0, from.1, from.2),
            Index::d3(to.0, to.1, to.2),
        )
    }

    pub fn dims(&self) -> u32 {
        self.dims
    }

    /// Number of indices inside the slice.
    pub fn size(&self) -> u64 {
        let mut size = 1u64;
        for d in 0..self.dims as usize {
            let extent = self.to.0[d] - self.from.0[d];
            if extent <= 0 {
                return 0;
            }
            size *= extent as u64;
        }
        size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, idx: &Index) -> bool {
        (0..self.dims as usize).all(|d| idx.0[d] >= self.from.0[d] && idx.0[d] < self.to.0[d])
    }

    pub fn contains_slice(&self, other: &Slice) -> bool {
        assert_eq!(self.dims, other.dims);
        other.is_empty()
            || (0..self.dims as usize)
                .all(|d| other.from.0[d] >= self.from.0[d] && other.to.0[d] <= self.to.0[d])
    }

    /// Advance `idx` lexicographically within the slice, dimension 0 fastest.
    ///
    /// Returns `false` once the sweep is complete. Starting at `self.from`,
    /// `loop { visit(idx); if !next_lex(&mut idx) { break } }` visits exactly
    /// [`size`](Self::size) positions without repetition.
    pub fn next_lex(&self, idx: &mut Index) -> bool {
        idx.0[0] += 1;
        if idx.0[0] < self.to.0[0] {
            return true;
        }
        if self.dims == 1 {
            return false;
        }

        idx.0[1] += 1;
        idx.0[0] = self.from.0[0];
        if idx.0[1] < self.to.0[1] {
            return true;
        }
        if self.dims == 2 {
            return false;
        }

        idx.0[2] += 1;
        idx.0[1] = self.from.0[1];
        idx.0[2] < self.to.0[2]
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{};{}[",
            self.from.display(self.dims),
            self.to.display(self.dims)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(slc: &Slice) -> Vec<Index> {
        let mut seen = Vec::new();
        if slc.is_empty() {
            return seen;
        }
        let mut idx = slc.from;
        loop {
            seen.push(idx);
            if !slc.next_lex(&mut idx) {
                break;
            }
        }
        seen
    }

    #[test]
    fn traversal_visits_size_positions() {
        for slc in [
            Slice::d1(3, 11),
            Slice::d2((0, 0), (4, 4)),
            Slice::d2((1, 2), (3, 7)),
            Slice::d3((0, 1, 2), (2, 3, 4)),
        ] {
            let seen = sweep(&slc);
            assert_eq!(seen.len() as u64, slc.size());
            for idx in &seen {
                assert!(slc.contains(idx));
            }
            // no repetitions
            for (i, a) in seen.iter().enumerate() {
                for b in &seen[i + 1..] {
                    assert!(!a.equals(slc.dims(), b));
                }
            }
        }
    }

    #[test]
    fn traversal_is_dim0_fastest() {
        let slc = Slice::d2((0, 0), (2, 2));
        let seen = sweep(&slc);
        let expect = [
            Index::d2(0, 0),
            Index::d2(1, 0),
            Index::d2(0, 1),
            Index::d2(1, 1),
        ];
        assert_eq!(seen, expect);
    }

    #[test]
    fn empty_slices() {
        assert!(Slice::d1(5, 5).is_empty());
        assert!(Slice::d2((0, 3), (4, 3)).is_empty());
        assert_eq!(Slice::d2((0, 3), (4, 3)).size(), 0);
        assert!(!Slice::d1(5, 5).contains(&Index::d1(5)));
    }

    #[test]
    fn containment() {
        let outer = Slice::d2((0, 0), (4, 4));
        assert!(outer.contains_slice(&Slice::d2((1, 1), (3, 3))));
        assert!(outer.contains_slice(&Slice::d2((2, 2), (2, 4)))); // empty
        assert!(!outer.contains_slice(&Slice::d2((1, 1), (5, 3))));
    }
}
