// One-shot task queue driven by the global clock
// Tasks are handle-based so that they can be cancelled before they fire

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Handle to a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Work the engine performs when a task fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Start a joining timeline's scheduler on the bar boundary
    JoinTimeline(super::TimelineId),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    time: f64,
    id: TaskId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the BinaryHeap pops the earliest task first (FIFO on ties)
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Time-ordered queue of cancellable one-shot tasks
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Entry>,
    tasks: HashMap<TaskId, Task>,
    next_id: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` at clock position `time` (bars)
    pub fn schedule(&mut self, time: f64, task: Task) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.heap.push(Entry { time, id });
        self.tasks.insert(id, task);
        id
    }

    /// Cancel a pending task; returns false if it already fired or was cancelled
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Time of the earliest live task
    pub fn next_time(&mut self) -> Option<f64> {
        self.discard_cancelled();
        self.heap.peek().map(|entry| entry.time)
    }

    /// Remove and return the earliest live task if it is due before `until`
    pub fn pop_due(&mut self, until: f64) -> Option<(f64, TaskId, Task)> {
        self.discard_cancelled();
        let entry = *self.heap.peek()?;
        if entry.time >= until {
            return None;
        }
        self.heap.pop();
        let task = self.tasks.remove(&entry.id)?;
        Some((entry.time, entry.id, task))
    }

    /// Cancel everything
    pub fn clear(&mut self) {
        self.heap.clear();
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.tasks.contains_key(&entry.id) {
                break;
            }
            self.heap.pop();
        }
    }
}
