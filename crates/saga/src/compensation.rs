//! Stack of steps awaiting compensation.

/// Indices of completed compensable steps, popped last-in first-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationStack {
    entries: Vec<usize>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that step `index` completed and can be undone.
    pub fn push(&mut self, index: usize) {
        self.entries.push(index);
    }

    /// Removes the most recently completed step.
    pub fn pop(&mut self) -> Option<usize> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
