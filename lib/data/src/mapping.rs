use std::ops::Range;

use bytemuck::Pod;
use tracing::trace;

use space::{Index, Slice};

use crate::layout::{Layout, Lexicographic};

/// A process-local allocation covering a required slice of the global index
/// space.
///
/// The buffer holds `count × elemsize` bytes and is owned by the mapping;
/// allocation is deferred until first real use. Any index read or written
/// through the mapping must lie inside the required slice.
#[derive(Debug)]
pub struct Mapping {
    required: Slice,
    elemsize: usize,
    count: u64,
    layout: Box<dyn Layout>,
    base: Option<Vec<u8>>,
}

impl Mapping {
    pub fn new(required: Slice, elemsize: usize) -> Self {
        assert!(elemsize > 0);
        Mapping {
            required,
            elemsize,
            count: required.size(),
            layout: Box::new(Lexicographic::new(required)),
            base: None,
        }
    }

    pub fn required(&self) -> &Slice {
        &self.required
    }

    pub fn elemsize(&self) -> usize {
        self.elemsize
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn layout(&self) -> &dyn Layout {
        self.layout.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.base.is_some()
    }

    /// Allocate the backing buffer if this is the first real use.
    pub fn ensure_allocated(&mut self) {
        if self.base.is_none() && self.count > 0 {
            let bytes = self.count as usize * self.elemsize;
            trace!(required = %self.required, bytes, "allocating mapping");
            self.base = Some(vec![0u8; bytes]);
        }
    }

    pub fn base(&self) -> Option<&[u8]> {
        self.base.as_deref()
    }

    pub fn base_mut(&mut self) -> Option<&mut [u8]> {
        self.base.as_deref_mut()
    }

    /// Byte offset of a global index within the allocation.
    pub fn byte_offset(&self, idx: &Index) -> usize {
        self.layout.offset(idx) as usize * self.elemsize
    }

    /// Byte range of a 1-D contiguous sub-slice, for the direct send/recv
    /// fast path.
    pub fn byte_range_1d(&self, slc: &Slice) -> Range<usize> {
        assert!(self.layout.is_contiguous_1d());
        assert!(self.required.contains_slice(slc));
        let from = (slc.from.0[0] - self.required.from.0[0]) as usize * self.elemsize;
        let to = (slc.to.0[0] - self.required.from.0[0]) as usize * self.elemsize;
        from..to
    }

    pub fn element(&self, idx: &Index) -> &[u8] {
        let off = self.byte_offset(idx);
        &self.base.as_ref().expect("mapping not allocated")[off..off + self.elemsize]
    }

    pub fn element_mut(&mut self, idx: &Index) -> &mut [u8] {
        let off = self.byte_offset(idx);
        let elemsize = self.elemsize;
        &mut self.base.as_mut().expect("mapping not allocated")[off..off + elemsize]
    }

    /// Pack elements of `slc` in traversal order into `out`, starting at
    /// `cursor`.
    ///
    /// Advances the cursor and returns the number of bytes packed; packing
    /// stops when `out` cannot hold another element or the slice is
    /// exhausted, in which case the cursor is left equal to `slc.to`. The
    /// caller drives repeated pack/send rounds until `cursor == slc.to`.
    pub fn pack(&self, slc: &Slice, cursor: &mut Index, out: &mut [u8]) -> usize {
        assert!(self.required.contains_slice(slc));
        let base = self.base.as_ref().expect("packing unallocated mapping");
        let es = self.elemsize;
        let mut packed = 0;
        while packed + es <= out.len() {
            let off = self.byte_offset(cursor);
            out[packed..packed + es].copy_from_slice(&base[off..off + es]);
            packed += es;
            if !slc.next_lex(cursor) {
                *cursor = slc.to;
                break;
            }
        }
        packed
    }

    /// Unpack `bytes` (a whole number of elements) into `slc` in traversal
    /// order, starting at `cursor`; returns the number of elements written
    /// and leaves the cursor equal to `slc.to` once the slice is complete.
    pub fn unpack(&mut self, slc: &Slice, cursor: &mut Index, bytes: &[u8]) -> usize {
        assert!(self.required.contains_slice(slc));
        let es = self.elemsize;
        assert_eq!(bytes.len() % es, 0, "partial element in unpack");
        self.ensure_allocated();
        let base = self.base.as_mut().expect("unpacking empty mapping");
        let mut unpacked = 0;
        for chunk in bytes.chunks_exact(es) {
            assert!(
                !cursor.equals(slc.dims(), &slc.to),
                "unpack past end of slice {slc}"
            );
            let off = self.layout.offset(cursor) as usize * es;
            base[off..off + es].copy_from_slice(chunk);
            unpacked += 1;
            if !slc.next_lex(cursor) {
                *cursor = slc.to;
            }
        }
        unpacked
    }

    /// View the allocation as a typed slice. Allocates on first use.
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        bytemuck::cast_slice(self.base.as_ref().expect("mapping not allocated"))
    }

    pub fn as_mut_slice<T: Pod>(&mut self) -> &mut [T] {
        self.ensure_allocated();
        bytemuck::cast_slice_mut(self.base.as_mut().expect("mapping is empty"))
    }
}

/// The per-transition list of mappings, indexed by the map numbers carried
/// in transition operations.
#[derive(Debug, Default)]
pub struct MappingList {
    maps: Vec<Mapping>,
}

impl MappingList {
    pub fn new(maps: Vec<Mapping>) -> Self {
        MappingList { maps }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn map(&self, map_no: usize) -> &Mapping {
        &self.maps[map_no]
    }

    pub fn map_mut(&mut self, map_no: usize) -> &mut Mapping {
        &mut self.maps[map_no]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.maps.iter()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn filled_2d() -> Mapping {
        let required = Slice::d2((0, 0), (4, 4));
        let mut m = Mapping::new(required, 8);
        let vals = m.as_mut_slice::<f64>();
        for (i, v) in vals.iter_mut().enumerate() {
            *v = i as f64;
        }
        m
    }

    #[test]
    fn lazy_allocation() {
        let mut m = Mapping::new(Slice::d1(0, 16), 8);
        assert!(!m.is_allocated());
        m.ensure_allocated();
        assert!(m.is_allocated());
        assert_eq!(m.base().unwrap().len(), 16 * 8);
    }

    #[test]
    fn byte_range_for_contiguous_1d() {
        let m = Mapping::new(Slice::d1(8, 24), 4);
        assert_eq!(m.byte_range_1d(&Slice::d1(10, 14)), 8..24);
    }

    #[test]
    fn pack_unpack_round_trip_any_chunking() {
        let src = filled_2d();
        let slc = Slice::d2((1, 1), (3, 3));
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let mut dst = Mapping::new(Slice::d2((0, 0), (4, 4)), 8);
            dst.ensure_allocated();

            let mut pack_cursor = slc.from;
            let mut unpack_cursor = slc.from;
            while !pack_cursor.equals(2, &slc.to) {
                // chunk capacity chosen at random, at least one element
                let elems = rng.gen_range(1..=4usize);
                let mut buf = vec![0u8; elems * 8];
                let packed = src.pack(&slc, &mut pack_cursor, &mut buf);
                assert!(packed > 0);
                let unpacked = dst.unpack(&slc, &mut unpack_cursor, &buf[..packed]);
                assert_eq!(unpacked * 8, packed);
            }
            assert!(unpack_cursor.equals(2, &slc.to));

            // restriction to the slice matches, everything else untouched
            let mut idx = slc.from;
            loop {
                assert_eq!(dst.element(&idx), src.element(&idx));
                if !slc.next_lex(&mut idx) {
                    break;
                }
            }
            let outside = Index::d2(0, 0);
            assert_eq!(dst.element(&outside), [0u8; 8]);
        }
    }

    #[test]
    fn pack_respects_capacity() {
        let src = filled_2d();
        let slc = Slice::d2((0, 0), (4, 4));
        let mut cursor = slc.from;
        let mut buf = [0u8; 3 * 8 + 5]; // room for three elements plus change
        assert_eq!(src.pack(&slc, &mut cursor, &mut buf), 3 * 8);
        assert_eq!(cursor, Index::d2(3, 0));
    }
}
