use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Index of a task within one specific group; depends on group membership.
pub type TaskId = i32;

/// Sentinel task id of a process that is not a member of a group.
pub const NOT_A_MEMBER: TaskId = -1;

/// Stable integer identifying a process across group changes. Transports
/// address peers by location id, never by task id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationId(pub usize);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LID {}", self.0)
    }
}

/// A set of processes a container can be partitioned over.
///
/// Task indices are dense `0..size`; `myid` is this process' task index or
/// [`NOT_A_MEMBER`] if it was dropped from the group. Each task resolves to
/// the [`LocationId`] under which the transport layer knows the process.
#[derive(Clone, Debug)]
pub struct Group {
    gid: u32,
    myid: TaskId,
    locations: Vec<LocationId>,
    /// For shrunk groups: maps our task indices back to parent task indices.
    from_parent: Vec<usize>,
}

impl Group {
    /// The initial world group: task index and location id coincide.
    pub fn world(size: usize, myid: TaskId) -> Self {
        assert!(size > 0);
        assert!(myid >= NOT_A_MEMBER && (myid as i64) < size as i64);
        Group {
            gid: 0,
            myid,
            locations: (0..size).map(LocationId).collect(),
            from_parent: Vec::new(),
        }
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn size(&self) -> usize {
        self.locations.len()
    }

    pub fn myid(&self) -> TaskId {
        self.myid
    }

    pub fn is_member(&self) -> bool {
        self.myid >= 0
    }

    /// Resolve a task index to the location id used by the transport.
    pub fn location_id(&self, task: TaskId) -> LocationId {
        assert!(task >= 0, "task {task} is not addressable");
        self.locations[task as usize]
    }

    /// Parent task index of one of our tasks (identity for the world group).
    pub fn parent_task(&self, task: TaskId) -> usize {
        if self.from_parent.is_empty() {
            task as usize
        } else {
            self.from_parent[task as usize]
        }
    }

    /// Derive a child group keeping only the tasks in `keep` (parent task
    /// indices, ascending). Processes not kept get `myid = -1` in the child
    /// and must skip all transition execution.
    pub fn shrink(&self, keep: &[usize]) -> Group {
        assert!(!keep.is_empty());
        assert!(keep.len() < self.size(), "shrink must remove at least one task");
        assert!(keep.windows(2).all(|w| w[0] < w[1]));
        assert!(*keep.last().unwrap() < self.size());

        let myid = match self.myid {
            m if m < 0 => NOT_A_MEMBER,
            m => keep
                .iter()
                .position(|&t| t == m as usize)
                .map_or(NOT_A_MEMBER, |p| p as TaskId),
        };
        let child = Group {
            gid: self.gid + 1,
            myid,
            locations: keep.iter().map(|&t| self.locations[t]).collect(),
            from_parent: keep.to_vec(),
        };
        debug!(
            parent = self.gid,
            child = child.gid,
            parent_myid = self.myid,
            child_myid = child.myid,
            size = child.size(),
            "shrunk group"
        );
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_maps_tasks_to_identical_lids() {
        let g = Group::world(4, 2);
        assert_eq!(g.size(), 4);
        assert_eq!(g.location_id(3), LocationId(3));
        assert!(g.is_member());
    }

    #[test]
    fn shrink_keeps_location_ids_stable() {
        let g = Group::world(4, 3);
        let child = g.shrink(&[1, 3]);
        assert_eq!(child.size(), 2);
        assert_eq!(child.myid(), 1);
        assert_eq!(child.location_id(0), LocationId(1));
        assert_eq!(child.location_id(1), LocationId(3));
        assert_eq!(child.parent_task(1), 3);
    }

    #[test]
    fn dropped_member_gets_negative_myid() {
        let g = Group::world(4, 2);
        let child = g.shrink(&[0, 1]);
        assert_eq!(child.myid(), NOT_A_MEMBER);
        assert!(!child.is_member());
    }
}
