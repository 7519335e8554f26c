//! Hands out disjoint batches of task ids within one run.
//!
//! Each batch moves through `Drawn → Pushed → Recorded`, or
//! `Drawn → Released` when upstream definitively refused it. Released ids
//! go back to the cursor and are handed out before untouched ones.

use std::collections::VecDeque;

use crate::model::TaskId;

/// Lifecycle of a drawn batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Taken from the pool, not yet acknowledged upstream.
    Drawn,
    /// Upstream accepted the assignment.
    Pushed,
    /// Audit row and work items written.
    Recorded,
    /// Returned to the pool after a definitive rejection.
    Released,
}

impl BatchState {
    pub fn can_transition_to(&self, target: BatchState) -> bool {
        use BatchState::*;

        matches!(
            (self, target),
            (Drawn, Pushed) | (Drawn, Released) | (Pushed, Recorded)
        )
    }
}

/// A slice of the pool reserved for one user.
#[derive(Debug, Clone)]
pub struct Batch {
    pub task_ids: Vec<TaskId>,
    pub requested: u32,
    state: BatchState,
}

impl Batch {
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// True when the pool ran dry before `requested` ids were drawn.
    pub fn is_short(&self) -> bool {
        self.task_ids.len() < self.requested as usize
    }

    pub fn mark_pushed(&mut self) {
        self.transition(BatchState::Pushed);
    }

    pub fn mark_recorded(&mut self) {
        self.transition(BatchState::Recorded);
    }

    fn transition(&mut self, target: BatchState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "invalid batch transition {:?} -> {target:?}",
            self.state
        );
        self.state = target;
    }
}

/// Single shared cursor over one pool snapshot.
#[derive(Debug)]
pub struct PoolCursor {
    ids: Vec<TaskId>,
    next: usize,
    released: VecDeque<TaskId>,
}

impl PoolCursor {
    pub fn new(ids: Vec<TaskId>) -> Self {
        Self {
            ids,
            next: 0,
            released: VecDeque::new(),
        }
    }

    /// Ids still available to draw.
    pub fn remaining(&self) -> usize {
        self.released.len() + self.ids.len().saturating_sub(self.next)
    }

    /// Draw up to `count` ids, released ones first.
    pub fn draw(&mut self, count: u32) -> Batch {
        let want = count as usize;
        let mut task_ids = Vec::with_capacity(want.min(self.remaining()));

        while task_ids.len() < want {
            if let Some(id) = self.released.pop_front() {
                task_ids.push(id);
            } else if let Some(id) = self.ids.get(self.next) {
                task_ids.push(*id);
                self.next += 1;
            } else {
                break;
            }
        }

        Batch {
            task_ids,
            requested: count,
            state: BatchState::Drawn,
        }
    }

    /// Return a drawn batch's ids to the front of the cursor.
    pub fn release(&mut self, batch: &mut Batch) {
        batch.transition(BatchState::Released);
        for id in batch.task_ids.iter().rev() {
            self.released.push_front(*id);
        }
    }
}
