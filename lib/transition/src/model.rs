use data::ReduceOp;
use space::{Slice, TaskId};

/// An ordered list of task ids acting as input or output of a reduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskGroup {
    pub tasks: Vec<TaskId>,
}

/// Reference to a reduction sub-group: either the whole group or an entry
/// of the transition's sub-group table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupRef {
    All,
    Subgroup(usize),
}

/// Slice this process keeps: copy from the source to the target mapping.
#[derive(Clone, Debug)]
pub struct LocalOp {
    pub slc: Slice,
    pub from_map_no: usize,
    pub to_map_no: usize,
}

/// Slice to initialize to the identity of a reduction operation.
#[derive(Clone, Debug)]
pub struct InitOp {
    pub slc: Slice,
    pub map_no: usize,
    pub op: ReduceOp,
}

#[derive(Clone, Debug)]
pub struct SendOp {
    pub slc: Slice,
    pub to_task: TaskId,
    pub map_no: usize,
}

#[derive(Clone, Debug)]
pub struct RecvOp {
    pub slc: Slice,
    pub from_task: TaskId,
    pub map_no: usize,
}

#[derive(Clone, Debug)]
pub struct RedOp {
    pub slc: Slice,
    pub input: GroupRef,
    pub output: GroupRef,
    pub op: ReduceOp,
    pub from_map_no: usize,
    pub to_map_no: usize,
}

/// Everything that must flow when the partitioning of a container changes.
///
/// Created per switch and consumed once. The `local` and `init` lists are
/// neighbour-free and handled by the container layer; everything else is
/// driven by the executor through a transport.
#[derive(Clone, Debug)]
pub struct Transition {
    pub dims: u32,
    pub local: Vec<LocalOp>,
    pub init: Vec<InitOp>,
    pub send: Vec<SendOp>,
    pub recv: Vec<RecvOp>,
    pub red: Vec<RedOp>,
    pub subgroups: Vec<TaskGroup>,
}

impl Transition {
    pub fn new(dims: u32) -> Self {
        assert!((1..=3).contains(&dims), "unsupported dims {dims}");
        Transition {
            dims,
            local: Vec::new(),
            init: Vec::new(),
            send: Vec::new(),
            recv: Vec::new(),
            red: Vec::new(),
            subgroups: Vec::new(),
        }
    }

    /// Tasks of a group reference, in canonical order.
    pub fn group_tasks(&self, gref: GroupRef, group_size: usize) -> Vec<TaskId> {
        match gref {
            GroupRef::All => (0..group_size as TaskId).collect(),
            GroupRef::Subgroup(i) => self.subgroups[i].tasks.clone(),
        }
    }

    pub fn group_count(&self, gref: GroupRef, group_size: usize) -> usize {
        match gref {
            GroupRef::All => group_size,
            GroupRef::Subgroup(i) => self.subgroups[i].tasks.len(),
        }
    }

    pub fn is_in_group(&self, gref: GroupRef, task: TaskId, group_size: usize) -> bool {
        match gref {
            GroupRef::All => task >= 0 && (task as usize) < group_size,
            GroupRef::Subgroup(i) => self.subgroups[i].tasks.contains(&task),
        }
    }
}
