use data::{ElemType, MappingList, SwitchStat};
use space::Group;
use tracing::debug;
use transition::{Transition, TransitionPlan};
use transport::{ExecCtx, Result, Transport};

/// Runs transitions against a transport.
///
/// Owns the pack/gather scratch buffer (its lifetime equals the
/// executor's); the buffer is grown on first use and shared by all
/// transitions this executor drives, which is safe because execution is
/// strictly sequential on the single logical thread.
#[derive(Default)]
pub struct Executor {
    scratch: Vec<u8>,
}

impl Executor {
    pub fn new() -> Self {
        Executor::default()
    }

    /// Create a plan for later recording and replay.
    pub fn prepare(&mut self, _transition: &Transition) -> TransitionPlan {
        TransitionPlan::new()
    }

    /// Release a plan and its resources.
    pub fn cleanup(&mut self, plan: TransitionPlan) {
        drop(plan);
    }

    /// Execute a transition.
    ///
    /// Preconditions: `from` covers every send and reduction-input slice
    /// (`None` marks an in-place transition), `to` covers every receive and
    /// reduction-output slice; target mappings are allocated lazily on
    /// first write. A process with negative task id in `group` returns
    /// immediately without any externally observable effect.
    ///
    /// With a plan, the first call records the primitive sequence (split
    /// and two-phase sort) and executes it; later calls replay the
    /// identical sequence. Reductions run first, then point-to-point
    /// exchanges in the phased order; `local`/`init` entries are the
    /// container layer's job after this returns.
    #[allow(clippy::too_many_arguments)]
    pub fn exec(
        &mut self,
        transport: &mut dyn Transport,
        group: &Group,
        elem: &dyn ElemType,
        transition: &Transition,
        plan: Option<&mut TransitionPlan>,
        from: Option<&MappingList>,
        to: Option<&mut MappingList>,
        stat: &mut SwitchStat,
    ) -> Result<()> {
        if !group.is_member() {
            return Ok(());
        }

        debug!(
            transport = transport.name(),
            myid = group.myid(),
            size = group.size(),
            reds = transition.red.len(),
            sends = transition.send.len(),
            recvs = transition.recv.len(),
            "executing transition"
        );

        if let Some(from) = from {
            for op in &transition.send {
                assert!(
                    from.map(op.map_no).required().contains_slice(&op.slc),
                    "send slice {} not covered by source mapping",
                    op.slc
                );
            }
        }
        if let Some(to) = &to {
            for op in &transition.recv {
                assert!(
                    to.map(op.map_no).required().contains_slice(&op.slc),
                    "receive slice {} not covered by target mapping",
                    op.slc
                );
            }
        }

        let mut ctx = ExecCtx {
            transition,
            group,
            elem,
            from,
            to,
            stat,
            scratch: &mut self.scratch,
        };

        match plan {
            Some(plan) => {
                if !plan.is_primitive() {
                    // first execution: record the primitive sequence
                    plan.split_transition_execs(transition);
                    plan.sort_two_phase(group.size(), group.myid());
                }
                transport.exec(plan, &mut ctx)
            }
            None => {
                let mut plan = TransitionPlan::new();
                plan.split_transition_execs(transition);
                plan.sort_two_phase(group.size(), group.myid());
                transport.exec(&plan, &mut ctx)
            }
        }
    }
}
