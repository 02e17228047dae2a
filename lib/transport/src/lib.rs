//! # Transports: how transition actions reach the wire
//!
//! A [`Transport`] moves bytes between the processes of a group, addressed
//! by [`LocationId`]. Three implementations exist:
//!
//! - [`Single`]: the degenerate size-1 group; point-to-point operations
//!   must never be reached, reductions collapse to copies.
//! - [`Collective`]: wraps a synchronous in-process group-messaging
//!   primitive ([`collective::Comm`]) with rendezvous send/receive, native
//!   collectives and a split primitive for group shrink.
//! - [`Dynamic`]: a text-framed, credit-based protocol over per-peer TCP
//!   streams, driven by a cooperative single-threaded reactor. Public
//!   operations suspend by re-entering the event loop until a completion
//!   condition is satisfied by an inbound frame.
//!
//! The trait also carries the execution walk for compiled transition plans
//! ([`Transport::exec`]) and, in [`reduce`], the generic sub-group
//! reduction protocol. Both are written against the trait surface so every
//! transport gets them for free; transports with better primitives
//! (native collectives, slice-level credit transfers) override the
//! relevant methods.

pub mod collective;
pub mod dynamic;
pub mod reduce;
pub mod single;

mod error;
mod walk;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use data::{ElemType, Mapping, MappingList, ReduceOp, SwitchStat};
use space::{Group, LocationId, Slice, TaskId};
use tracing::info;
use transition::{Transition, TransitionPlan};

pub use self::{
    collective::{Collective, Comm},
    dynamic::{Dynamic, DynamicConfig},
    error::{Error, Result},
    single::Single,
};

/// Size of the scratch buffer used for packing and reduction gathers.
pub const PACK_BUF_SIZE: usize = 10 * 1024 * 1024;

/// Everything a transport needs to resolve a compiled action against the
/// current transition: mapping lists, group, element type, statistics and
/// the pack scratch buffer.
///
/// `from = None` marks an in-place transition: reductions read their own
/// contribution from the target mappings.
pub struct ExecCtx<'a> {
    pub transition: &'a Transition,
    pub group: &'a Group,
    pub elem: &'a dyn ElemType,
    pub from: Option<&'a MappingList>,
    pub to: Option<&'a mut MappingList>,
    pub stat: &'a mut SwitchStat,
    pub scratch: &'a mut Vec<u8>,
}

/// Point-to-point and collective primitives of one communication backend.
///
/// All operations block (or cooperatively suspend) until complete. Peers
/// are addressed by location id; the caller resolves task indices through
/// its group.
pub trait Transport: Send {
    fn name(&self) -> &'static str;

    /// Send densely packed elements. Blocks until the message is delivered
    /// or staged.
    fn send(&mut self, buf: &[u8], elem: &dyn ElemType, to: LocationId) -> Result<()>;

    /// Receive into `buf`, which must hold a whole number of elements.
    /// Blocks until a message arrives; returns the element count received.
    fn recv(&mut self, buf: &mut [u8], elem: &dyn ElemType, from: LocationId) -> Result<usize>;

    /// Whether this transport has native collective reductions.
    fn native_reduce(&self) -> bool {
        false
    }

    /// Native all-reduce over the whole group; `from = None` reduces in
    /// place over `to`.
    fn all_reduce(
        &mut self,
        _from: Option<&[u8]>,
        _to: &mut [u8],
        _elem: &dyn ElemType,
        _op: ReduceOp,
    ) -> Result<()> {
        Err(Error::Unsupported(self.name()))
    }

    /// Native reduce-to-root. Only the root receives a result; non-root
    /// callers pass `to = None`.
    fn reduce(
        &mut self,
        _from: Option<&[u8]>,
        _to: Option<&mut [u8]>,
        _elem: &dyn ElemType,
        _op: ReduceOp,
        _root: LocationId,
    ) -> Result<()> {
        Err(Error::Unsupported(self.name()))
    }

    /// Send a whole slice out of a mapping. The default drives a pack loop
    /// through `scratch`: pack as much as fits, send, repeat until the
    /// cursor reaches the end of the slice.
    fn send_slice(
        &mut self,
        map: &Mapping,
        slc: &Slice,
        elem: &dyn ElemType,
        to: LocationId,
        scratch: &mut Vec<u8>,
    ) -> Result<u64> {
        if scratch.is_empty() {
            scratch.resize(PACK_BUF_SIZE, 0);
        }
        let size = slc.size();
        assert!(size > 0);
        let mut cursor = slc.from;
        let mut sent = 0u64;
        while !cursor.equals(slc.dims(), &slc.to) {
            let packed = map.pack(slc, &mut cursor, scratch);
            assert!(packed > 0, "pack made no progress");
            self.send(&scratch[..packed], elem, to)?;
            sent += (packed / elem.size()) as u64;
        }
        assert_eq!(sent, size, "sent element count does not match slice");
        Ok(sent)
    }

    /// Receive a whole slice into a mapping, chunk by chunk. Termination is
    /// cursor equality with the slice end, never a precomputed chunk count.
    /// `ro` other than `None` folds received elements into existing values.
    fn recv_slice(
        &mut self,
        map: &mut Mapping,
        slc: &Slice,
        elem: &dyn ElemType,
        from: LocationId,
        ro: ReduceOp,
        scratch: &mut Vec<u8>,
    ) -> Result<u64> {
        if scratch.is_empty() {
            scratch.resize(PACK_BUF_SIZE, 0);
        }
        map.ensure_allocated();
        let es = elem.size();
        let mut cursor = slc.from;
        let mut received = 0u64;
        while !cursor.equals(slc.dims(), &slc.to) {
            let n = self.recv(scratch, elem, from)?;
            assert!(n > 0, "receive made no progress");
            if ro == ReduceOp::None {
                let unpacked = map.unpack(slc, &mut cursor, &scratch[..n * es]);
                assert_eq!(unpacked, n);
            } else {
                for chunk in scratch[..n * es].chunks_exact(es) {
                    assert!(!cursor.equals(slc.dims(), &slc.to), "receive overruns slice");
                    elem.reduce(map.element_mut(&cursor), chunk, ro);
                    if !slc.next_lex(&mut cursor) {
                        cursor = slc.to;
                    }
                }
            }
            received += n as u64;
        }
        assert_eq!(received, slc.size(), "received element count does not match slice");
        Ok(received)
    }

    /// Execute a compiled action sequence: the fast path for prepared
    /// plans. The sequence must already be primitive and sorted.
    fn exec(&mut self, plan: &TransitionPlan, ctx: &mut ExecCtx<'_>) -> Result<()> {
        walk::exec_plan(self, plan, ctx)
    }

    /// Rebuild internal communicator state after a group shrink.
    fn update_group(&mut self, group: &Group) -> Result<()>;
}

/// `LAIK_DEBUG_RANK`: busy-loop the given rank at startup so a debugger
/// can attach and release it by flipping `waiting`.
pub(crate) fn wait_for_debugger(rank: TaskId) {
    let Ok(val) = std::env::var("LAIK_DEBUG_RANK") else {
        return;
    };
    let Ok(wanted) = val.parse::<i32>() else {
        return;
    };
    if wanted >= 0 && wanted != rank {
        return;
    }
    info!(rank, "waiting for debugger attach (LAIK_DEBUG_RANK)");
    static WAITING: AtomicBool = AtomicBool::new(true);
    while WAITING.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(10));
    }
}
