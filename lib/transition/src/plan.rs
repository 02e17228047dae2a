use data::ReduceOp;
use space::{Slice, TaskId};
use tracing::debug;

use crate::model::{GroupRef, Transition};

/// One primitive step of a compiled transition, carrying only what is
/// needed at execution time. Buffers are addressed by map number and slice;
/// the executor resolves them against the active mapping lists.
#[derive(Clone, Debug)]
pub enum Action {
    /// Composite placeholder recorded by `prepare`; expanded by
    /// [`TransitionPlan::split_transition_execs`] before execution.
    TransitionExec,

    /// Send a 1-D contiguous range directly from the source mapping.
    Send {
        slc: Slice,
        to_task: TaskId,
        map_no: usize,
        count: u64,
    },
    /// Receive a 1-D contiguous range directly into the target mapping.
    Recv {
        slc: Slice,
        from_task: TaskId,
        map_no: usize,
        count: u64,
    },
    /// Pack a non-contiguous slice chunk-wise and send each chunk.
    PackAndSend {
        slc: Slice,
        to_task: TaskId,
        map_no: usize,
        count: u64,
    },
    /// Receive chunk-wise and unpack into a non-contiguous slice.
    RecvAndUnpack {
        slc: Slice,
        from_task: TaskId,
        map_no: usize,
        count: u64,
    },
    /// Local copy between source and target mapping.
    Copy {
        slc: Slice,
        from_map_no: usize,
        to_map_no: usize,
        count: u64,
    },
    /// Reduction over input/output sub-groups.
    GroupReduce {
        slc: Slice,
        input: GroupRef,
        output: GroupRef,
        op: ReduceOp,
        from_map_no: usize,
        to_map_no: usize,
        count: u64,
    },
}

/// The compiled, reorderable action sequence of one transition.
///
/// Created by `prepare` holding a single composite action, populated on the
/// first `exec` (recording mode) and replayed on subsequent ones, released
/// by `cleanup`. Transformations are idempotent: running them twice yields
/// the same sequence.
#[derive(Debug, Default)]
pub struct TransitionPlan {
    actions: Vec<Action>,
    /// Element totals for statistics, filled during splitting.
    pub send_elems: u64,
    pub recv_elems: u64,
}

impl TransitionPlan {
    /// A fresh plan as handed out by `prepare`.
    pub fn new() -> Self {
        TransitionPlan {
            actions: vec![Action::TransitionExec],
            send_elems: 0,
            recv_elems: 0,
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True once no composite actions remain.
    pub fn is_primitive(&self) -> bool {
        !self
            .actions
            .iter()
            .any(|a| matches!(a, Action::TransitionExec))
    }

    /// Expand composite transition actions into primitives: one
    /// `GroupReduce` per reduction entry, then per-peer receive and send
    /// primitives (direct for 1-D, pack/unpack otherwise). Returns whether
    /// the sequence changed.
    pub fn split_transition_execs(&mut self, t: &Transition) -> bool {
        if self.is_primitive() {
            return false;
        }

        let mut out = Vec::new();
        for action in self.actions.drain(..) {
            if !matches!(action, Action::TransitionExec) {
                out.push(action);
                continue;
            }

            for op in &t.red {
                out.push(Action::GroupReduce {
                    slc: op.slc,
                    input: op.input,
                    output: op.output,
                    op: op.op,
                    from_map_no: op.from_map_no,
                    to_map_no: op.to_map_no,
                    count: op.slc.size(),
                });
            }
            for op in &t.recv {
                let count = op.slc.size();
                self.recv_elems += count;
                out.push(if t.dims == 1 {
                    Action::Recv {
                        slc: op.slc,
                        from_task: op.from_task,
                        map_no: op.map_no,
                        count,
                    }
                } else {
                    Action::RecvAndUnpack {
                        slc: op.slc,
                        from_task: op.from_task,
                        map_no: op.map_no,
                        count,
                    }
                });
            }
            for op in &t.send {
                let count = op.slc.size();
                self.send_elems += count;
                out.push(if t.dims == 1 {
                    Action::Send {
                        slc: op.slc,
                        to_task: op.to_task,
                        map_no: op.map_no,
                        count,
                    }
                } else {
                    Action::PackAndSend {
                        slc: op.slc,
                        to_task: op.to_task,
                        map_no: op.map_no,
                        count,
                    }
                });
            }
        }
        self.actions = out;
        debug!(actions = self.actions.len(), "split transition execs");
        true
    }

    /// Stable-sort the sequence into the two-phase peer order that avoids
    /// deadlocks between pairwise exchanges.
    ///
    /// With N tasks there are 2·N phases. A send to task T happens in phase
    /// T if T is higher-ranked than us, else in phase 2·N−1−T; a receive
    /// from T in phase T if T is lower-ranked, else in phase 2·N−1−T.
    /// Reductions order before all point-to-point actions; within one phase
    /// receives come before sends. For every unordered pair {A,B} with
    /// A < B this lets A send while B receives in the first half and the
    /// reverse in the second half, so no two tasks ever try to send to each
    /// other at the same time.
    pub fn sort_two_phase(&mut self, group_size: usize, myid: TaskId) -> bool {
        assert!(
            self.is_primitive(),
            "split_transition_execs must run before sorting"
        );
        let n = group_size as i64;
        let key = |a: &Action| -> (i64, u8) {
            match a {
                Action::GroupReduce { .. } => (-1, 0),
                Action::Recv { from_task, .. } | Action::RecvAndUnpack { from_task, .. } => {
                    let t = *from_task as i64;
                    let phase = if t < myid as i64 { t } else { 2 * n - 1 - t };
                    (phase, 0)
                }
                Action::Send { to_task, .. } | Action::PackAndSend { to_task, .. } => {
                    let t = *to_task as i64;
                    let phase = if t > myid as i64 { t } else { 2 * n - 1 - t };
                    (phase, 1)
                }
                Action::Copy { .. } => (2 * n, 0),
                Action::TransitionExec => unreachable!(),
            }
        };

        let before: Vec<(i64, u8)> = self.actions.iter().map(key).collect();
        self.actions.sort_by_key(key);
        let changed = self.actions.iter().map(key).ne(before.into_iter());
        debug!(changed, "two-phase sort");
        changed
    }
}
