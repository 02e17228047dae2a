use data::ReduceOp;
use space::Slice;
use tracing::{debug, trace};
use transition::GroupRef;

use crate::{ExecCtx, Result, Transport, PACK_BUF_SIZE};

/// Where a gathered contribution lives during a manual reduction.
enum Contribution {
    /// The root's own input buffer.
    Own,
    /// Byte offset into the gather scratch region.
    Staged(usize),
}

/// Execute one reduction entry of a transition.
///
/// With native collectives and all-process input, the transport's
/// `all_reduce`/`reduce` primitives are used directly; in-place operation
/// is selected when the transition carries no source mapping list.
/// Otherwise the reduction is performed manually: the lowest-ranked task of
/// the output group gathers all contributions, folds them with the element
/// type's reduce capability, and sends the result to the remaining output
/// members.
#[allow(clippy::too_many_arguments)]
pub fn exec_group_reduce<T: Transport + ?Sized>(
    t: &mut T,
    ctx: &mut ExecCtx<'_>,
    slc: &Slice,
    input: GroupRef,
    output: GroupRef,
    op: ReduceOp,
    from_map_no: usize,
    to_map_no: usize,
) -> Result<()> {
    assert_eq!(ctx.transition.dims, 1, "reductions are 1-D only");
    let myid = ctx.group.myid();
    let size = ctx.group.size();
    let elem = ctx.elem;
    let es = elem.size();
    let elems = slc.size();
    let bytes = elems as usize * es;
    let in_place = ctx.from.is_none();

    // native fast path needs every process to contribute
    let single_root = match output {
        GroupRef::All => None,
        GroupRef::Subgroup(i) => {
            let tasks = &ctx.transition.subgroups[i].tasks;
            (tasks.len() == 1).then(|| tasks[0])
        }
    };
    let native = t.native_reduce()
        && input == GroupRef::All
        && (output == GroupRef::All || single_root.is_some());

    if native {
        let to_list = ctx.to.as_mut().expect("reduction requires a target mapping list");
        let to_map = to_list.map_mut(to_map_no);
        let in_output = ctx.transition.is_in_group(output, myid, size);
        if in_output {
            to_map.ensure_allocated();
        }

        match single_root {
            None => {
                debug!(%slc, %op, in_place, "native all-reduce");
                let range = to_map.byte_range_1d(slc);
                if in_place {
                    let to = &mut to_map.base_mut().expect("target mapping is empty")[range];
                    t.all_reduce(None, to, elem, op)?;
                } else {
                    let from_map = ctx.from.unwrap().map(from_map_no);
                    let from_range = from_map.byte_range_1d(slc);
                    let from = &from_map.base().expect("source mapping never written")[from_range];
                    let to = &mut to_map.base_mut().expect("target mapping is empty")[range];
                    t.all_reduce(Some(from), to, elem, op)?;
                }
            }
            Some(root) => {
                debug!(%slc, %op, root, in_place, "native reduce to root");
                let root_lid = ctx.group.location_id(root);
                let range = to_map.byte_range_1d(slc);
                if in_place {
                    // the contribution sits in the target mapping: the root
                    // reduces into it, everyone else sends it as input
                    if myid == root {
                        let to = &mut to_map.base_mut().expect("target mapping is empty")[range];
                        t.reduce(None, Some(to), elem, op, root_lid)?;
                    } else {
                        let from = &to_map.base().expect("contribution never written")[range];
                        t.reduce(Some(from), None, elem, op, root_lid)?;
                    }
                } else {
                    let to = if myid == root {
                        Some(&mut to_map.base_mut().expect("target mapping is empty")[range.clone()])
                    } else {
                        None
                    };
                    let from_map = ctx.from.unwrap().map(from_map_no);
                    let from_range = from_map.byte_range_1d(slc);
                    let from = &from_map.base().expect("source mapping never written")[from_range];
                    t.reduce(Some(from), to, elem, op, root_lid)?;
                }
            }
        }
        return Ok(());
    }

    // manual reduction via send/recv and a local fold
    let in_tasks = ctx.transition.group_tasks(input, size);
    let out_tasks = ctx.transition.group_tasks(output, size);
    let root = *out_tasks.iter().min().expect("empty output group");
    let root_lid = ctx.group.location_id(root);
    let in_input = ctx.transition.is_in_group(input, myid, size);
    let in_output = ctx.transition.is_in_group(output, myid, size);

    debug!(%slc, %op, root, in_input, in_output, "manual reduction");

    if myid != root {
        if in_input {
            trace!(root, "sending contribution to reduce process");
            if in_place {
                let to_list = ctx.to.as_mut().expect("in-place reduction needs target mappings");
                let m = to_list.map_mut(from_map_no);
                let range = m.byte_range_1d(slc);
                let base = m.base().expect("contribution never written");
                t.send(&base[range], elem, root_lid)?;
            } else {
                let m = ctx.from.unwrap().map(from_map_no);
                let range = m.byte_range_1d(slc);
                let base = m.base().expect("contribution never written");
                t.send(&base[range], elem, root_lid)?;
            }
        }
        if in_output {
            trace!(root, "receiving result from reduce process");
            let to_list = ctx.to.as_mut().expect("reduction requires a target mapping list");
            let m = to_list.map_mut(to_map_no);
            m.ensure_allocated();
            let range = m.byte_range_1d(slc);
            let base = m.base_mut().expect("target mapping is empty");
            let n = t.recv(&mut base[range], elem, root_lid)?;
            assert_eq!(n as u64, elems, "short reduction result");
        }
        return Ok(());
    }

    // this is the reduce process: gather contributions in canonical order
    if ctx.scratch.len() < in_tasks.len() * bytes {
        ctx.scratch.resize(PACK_BUF_SIZE.max(in_tasks.len() * bytes), 0);
    }
    let mut order = Vec::with_capacity(in_tasks.len());
    let mut off = 0;
    for &task in &in_tasks {
        if task == myid {
            order.push(Contribution::Own);
            continue;
        }
        let lid = ctx.group.location_id(task);
        trace!(task, %lid, off, "receiving contribution");
        let n = t.recv(&mut ctx.scratch[off..off + bytes], elem, lid)?;
        assert_eq!(n as u64, elems, "short contribution");
        order.push(Contribution::Staged(off));
        off += bytes;
    }

    // let the output buffer alias our own input: swap our contribution to
    // slot 0 so it is consumed before being overwritten
    if let Some(pos) = order.iter().position(|c| matches!(c, Contribution::Own)) {
        order.swap(0, pos);
    }

    {
        let to_list = ctx.to.as_mut().expect("reduction requires a target mapping list");
        let to_map = to_list.map_mut(to_map_no);
        to_map.ensure_allocated();
        let out_range = to_map.byte_range_1d(slc);

        // seed the accumulator with slot 0
        match order[0] {
            Contribution::Own => {
                if !in_place {
                    let from_map = ctx.from.unwrap().map(from_map_no);
                    let from_range = from_map.byte_range_1d(slc);
                    let src = &from_map.base().expect("contribution never written")[from_range];
                    to_map.base_mut().expect("target mapping is empty")[out_range.clone()]
                        .copy_from_slice(src);
                }
                // in place: the accumulator already holds our contribution
            }
            Contribution::Staged(o) => {
                to_map.base_mut().expect("target mapping is empty")[out_range.clone()]
                    .copy_from_slice(&ctx.scratch[o..o + bytes]);
            }
        }
        for c in &order[1..] {
            let rhs = match c {
                Contribution::Own => {
                    unreachable!("own contribution was swapped to slot 0")
                }
                Contribution::Staged(o) => &ctx.scratch[*o..*o + bytes],
            };
            let acc = &mut to_map.base_mut().expect("target mapping is empty")[out_range.clone()];
            elem.reduce(acc, rhs, op);
        }
    }

    // send the result to every other member of the output group
    for &task in &out_tasks {
        if task == myid {
            continue;
        }
        let lid = ctx.group.location_id(task);
        trace!(task, %lid, "sending reduction result");
        let to_list = ctx.to.as_mut().unwrap();
        let to_map = to_list.map_mut(to_map_no);
        let out_range = to_map.byte_range_1d(slc);
        let base = to_map.base().expect("target mapping is empty");
        t.send(&base[out_range], elem, lid)?;
    }
    Ok(())
}
