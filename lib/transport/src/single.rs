use data::{ElemType, ReduceOp};
use space::{Group, LocationId};

use crate::{Result, Transport};

/// Transport for a group of size 1.
///
/// There is nobody to talk to: point-to-point operations must never be
/// reached, and reductions collapse to copies of the single contribution.
#[derive(Debug, Default)]
pub struct Single;

impl Single {
    pub fn new() -> Self {
        Single
    }
}

impl Transport for Single {
    fn name(&self) -> &'static str {
        "single"
    }

    fn send(&mut self, _buf: &[u8], _elem: &dyn ElemType, to: LocationId) -> Result<()> {
        unreachable!("single transport asked to send to {to}");
    }

    fn recv(&mut self, _buf: &mut [u8], _elem: &dyn ElemType, from: LocationId) -> Result<usize> {
        unreachable!("single transport asked to receive from {from}");
    }

    fn native_reduce(&self) -> bool {
        true
    }

    fn all_reduce(
        &mut self,
        from: Option<&[u8]>,
        to: &mut [u8],
        _elem: &dyn ElemType,
        _op: ReduceOp,
    ) -> Result<()> {
        if let Some(from) = from {
            to.copy_from_slice(from);
        }
        Ok(())
    }

    fn reduce(
        &mut self,
        from: Option<&[u8]>,
        to: Option<&mut [u8]>,
        _elem: &dyn ElemType,
        _op: ReduceOp,
        root: LocationId,
    ) -> Result<()> {
        assert_eq!(root, LocationId(0));
        if let (Some(from), Some(to)) = (from, to) {
            to.copy_from_slice(from);
        }
        Ok(())
    }

    fn update_group(&mut self, group: &Group) -> Result<()> {
        assert_eq!(group.size(), 1);
        Ok(())
    }
}
