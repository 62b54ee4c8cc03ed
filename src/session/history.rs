// SnapshotHistory - bounded undo/redo stacks of serialized sessions

use std::collections::VecDeque;

/// Default maximum number of snapshots kept per stack
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// Undo and redo stacks of serialized session snapshots
///
/// - Pushing a new state clears the redo stack.
/// - When a stack exceeds its depth, the oldest entry is dropped.
/// - Undo/redo take the current state so it can be moved to the opposite
///   stack.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    /// Most recent at the back
    undo_stack: VecDeque<Vec<u8>>,
    /// Most recent at the back
    redo_stack: VecDeque<Vec<u8>>,
    max_depth: usize,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_depth),
            redo_stack: VecDeque::with_capacity(max_depth),
            max_depth,
        }
    }

    /// Record the state before a mutating action
    pub fn push(&mut self, state: Vec<u8>) {
        push_bounded(&mut self.undo_stack, state, self.max_depth);
        self.redo_stack.clear();
    }

    /// Step back: returns the previous state and parks `current` for redo
    pub fn undo(&mut self, current: Vec<u8>) -> Option<Vec<u8>> {
        let previous = self.undo_stack.pop_back()?;
        push_bounded(&mut self.redo_stack, current, self.max_depth);
        Some(previous)
    }

    /// Step forward again after an undo
    pub fn redo(&mut self, current: Vec<u8>) -> Option<Vec<u8>> {
        let next = self.redo_stack.pop_back()?;
        push_bounded(&mut self.undo_stack, current, self.max_depth);
        Some(next)
    }

    /// State the next undo would return
    pub fn peek_undo(&self) -> Option<&[u8]> {
        self.undo_stack.back().map(Vec::as_slice)
    }

    pub fn peek_redo(&self) -> Option<&[u8]> {
        self.redo_stack.back().map(Vec::as_slice)
    }

    /// Drop the next undo entry without touching the redo stack
    pub fn discard_undo(&mut self) -> bool {
        self.undo_stack.pop_back().is_some()
    }

    /// Drop the next redo entry without touching the undo stack
    pub fn discard_redo(&mut self) -> bool {
        self.redo_stack.pop_back().is_some()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(stack: &mut VecDeque<Vec<u8>>, state: Vec<u8>, max_depth: usize) {
    stack.push_back(state);
    while stack.len() > max_depth {
        stack.pop_front();
    }
}
