use tracing::{debug, trace};
use transition::{Action, TransitionPlan};

use crate::{reduce, ExecCtx, Result, Transport};

/// Execute a primitive, sorted action sequence against a transport.
///
/// Point-to-point actions resolve their buffers against the mapping lists
/// at this point; target mappings are allocated lazily on first write.
pub(crate) fn exec_plan<T: Transport + ?Sized>(
    t: &mut T,
    plan: &TransitionPlan,
    ctx: &mut ExecCtx<'_>,
) -> Result<()> {
    assert!(plan.is_primitive(), "plan must be split before execution");
    let elem = ctx.elem;
    let es = elem.size();

    debug!(
        transport = t.name(),
        actions = plan.actions().len(),
        myid = ctx.group.myid(),
        "executing plan"
    );

    for action in plan.actions() {
        match action {
            Action::TransitionExec => unreachable!("composite action in primitive plan"),

            Action::Send {
                slc,
                to_task,
                map_no,
                count,
            } => {
                assert_ne!(*to_task, ctx.group.myid());
                assert!(*count > 0, "empty send slice {slc}");
                let lid = ctx.group.location_id(*to_task);
                let m = ctx.from.expect("send requires a source mapping list").map(*map_no);
                let Some(base) = m.base() else {
                    panic!(
                        "about to send slice {slc} to preserve it for the next phase, \
                         but it was never written to in the previous phase"
                    );
                };
                trace!(%slc, task = to_task, %lid, "direct send");
                let range = m.byte_range_1d(slc);
                t.send(&base[range], elem, lid)?;
                ctx.stat.add_sent(*count, es);
            }

            Action::Recv {
                slc,
                from_task,
                map_no,
                count,
            } => {
                assert_ne!(*from_task, ctx.group.myid());
                assert!(*count > 0, "empty receive slice {slc}");
                let lid = ctx.group.location_id(*from_task);
                let to_list = ctx.to.as_mut().expect("receive requires a target mapping list");
                let m = to_list.map_mut(*map_no);
                m.ensure_allocated();
                trace!(%slc, task = from_task, %lid, "direct recv");
                let range = m.byte_range_1d(slc);
                let base = m.base_mut().expect("target mapping is empty");
                let n = t.recv(&mut base[range], elem, lid)?;
                assert_eq!(n as u64, *count, "short receive for {slc}");
                ctx.stat.add_received(*count, es);
            }

            Action::PackAndSend {
                slc,
                to_task,
                map_no,
                count,
            } => {
                assert_ne!(*to_task, ctx.group.myid());
                let lid = ctx.group.location_id(*to_task);
                let m = ctx.from.expect("send requires a source mapping list").map(*map_no);
                assert!(m.is_allocated(), "packing slice {slc} from unwritten mapping");
                trace!(%slc, task = to_task, %lid, "pack and send");
                let sent = t.send_slice(m, slc, elem, lid, ctx.scratch)?;
                assert_eq!(sent, *count);
                ctx.stat.add_sent(*count, es);
            }

            Action::RecvAndUnpack {
                slc,
                from_task,
                map_no,
                count,
            } => {
                assert_ne!(*from_task, ctx.group.myid());
                let lid = ctx.group.location_id(*from_task);
                let to_list = ctx.to.as_mut().expect("receive requires a target mapping list");
                let m = to_list.map_mut(*map_no);
                trace!(%slc, task = from_task, %lid, "recv and unpack");
                let received =
                    t.recv_slice(m, slc, elem, lid, data::ReduceOp::None, ctx.scratch)?;
                assert_eq!(received, *count);
                ctx.stat.add_received(*count, es);
            }

            Action::Copy {
                slc,
                from_map_no,
                to_map_no,
                count,
            } => {
                let from_list = ctx.from.expect("copy requires a source mapping list");
                let src = from_list.map(*from_map_no);
                let to_list = ctx.to.as_mut().expect("copy requires a target mapping list");
                let dst = to_list.map_mut(*to_map_no);
                dst.ensure_allocated();
                let mut idx = slc.from;
                loop {
                    dst.element_mut(&idx).copy_from_slice(src.element(&idx));
                    if !slc.next_lex(&mut idx) {
                        break;
                    }
                }
                ctx.stat.add_copied(*count, es);
            }

            Action::GroupReduce {
                slc,
                input,
                output,
                op,
                from_map_no,
                to_map_no,
                count,
            } => {
                reduce::exec_group_reduce(
                    t,
                    ctx,
                    slc,
                    *input,
                    *output,
                    *op,
                    *from_map_no,
                    *to_map_no,
                )?;
                ctx.stat.add_reduced(*count, es);
            }
        }
    }
    Ok(())
}
