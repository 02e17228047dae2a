use std::fmt;

use space::{Index, Slice};

/// Translation from global indices to linear element offsets within a
/// mapping's allocation.
///
/// Offsets are relative to the allocation base, in elements. 1-D
/// lexicographic layouts are contiguous and let the executor hand raw
/// buffer ranges to the transport instead of going through pack/unpack.
pub trait Layout: fmt::Debug + Send {
    fn offset(&self, idx: &Index) -> u64;

    fn is_contiguous_1d(&self) -> bool {
        false
    }
}

/// Row-major layout over the required slice, dimension 0 fastest — the same
/// order [`Slice::next_lex`] traverses.
#[derive(Clone, Debug)]
pub struct Lexicographic {
    required: Slice,
}

impl Lexicographic {
    pub fn new(required: Slice) -> Self {
        Lexicographic { required }
    }

    pub fn required(&self) -> &Slice {
        &self.required
    }
}

impl Layout for Lexicographic {
    fn offset(&self, idx: &Index) -> u64 {
        debug_assert!(
            self.required.contains(idx),
            "index {} outside required slice {}",
            idx.display(self.required.dims()),
            self.required
        );
        let from = &self.required.from.0;
        let to = &self.required.to.0;
        match self.required.dims() {
            1 => (idx.0[0] - from[0]) as u64,
            2 => {
                let ext0 = (to[0] - from[0]) as u64;
                (idx.0[1] - from[1]) as u64 * ext0 + (idx.0[0] - from[0]) as u64
            }
            _ => {
                let ext0 = (to[0] - from[0]) as u64;
                let ext1 = (to[1] - from[1]) as u64;
                ((idx.0[2] - from[2]) as u64 * ext1 + (idx.0[1] - from[1]) as u64) * ext0
                    + (idx.0[0] - from[0]) as u64
            }
        }
    }

    fn is_contiguous_1d(&self) -> bool {
        self.required.dims() == 1
    }
}
