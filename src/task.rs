use super::*;

/// One unit of deferred work. `context` is the placeholder element the task
/// replaces; tasks added through `addStr`/`addUrl` by page code have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    InlineScript { text: String, context: Option<NodeId> },
    ExternalScript { url: String, context: Option<NodeId> },
}

impl Task {
    pub fn context(&self) -> Option<NodeId> {
        match self {
            Self::InlineScript { context, .. } | Self::ExternalScript { context, .. } => *context,
        }
    }
}

/// Ordered tasks plus the replay cursor. Consumed tasks stay in place; the
/// cursor only moves forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionQueue {
    tasks: Vec<Task>,
    next: usize,
}

impl ExecutionQueue {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.tasks.len()
    }

    /// Inserts at `pos` or appends. Position 0 means "append", matching the
    /// page-facing `submitTask` contract, and nothing is ever inserted in
    /// front of the cursor.
    pub fn submit(&mut self, task: Task, pos: Option<usize>) -> usize {
        let pos = match pos {
            Some(pos) if pos != 0 => pos.clamp(self.next, self.tasks.len()),
            _ => self.tasks.len(),
        };
        self.tasks.insert(pos, task);
        pos
    }

    /// Returns the task under the cursor and moves past it.
    pub fn advance(&mut self) -> Option<Task> {
        let task = self.tasks.get(self.next)?.clone();
        self.next += 1;
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(text: &str) -> Task {
        Task::InlineScript {
            text: text.to_string(),
            context: None,
        }
    }

    #[test]
    fn splices_ahead_of_pending_tasks_but_never_behind_cursor() {
        let mut queue = ExecutionQueue::default();
        queue.submit(inline("a"), None);
        queue.submit(inline("b"), None);
        queue.submit(inline("c"), None);
        assert_eq!(queue.advance(), Some(inline("a")));
        assert_eq!(queue.advance(), Some(inline("b")));

        assert_eq!(queue.submit(inline("w"), Some(2)), 2);
        assert_eq!(queue.submit(inline("early"), Some(1)), 2);
        assert_eq!(queue.advance(), Some(inline("early")));
        assert_eq!(queue.advance(), Some(inline("w")));
        assert_eq!(queue.advance(), Some(inline("c")));
        assert_eq!(queue.advance(), None);
        assert!(queue.is_exhausted());
        assert_eq!(queue.next_index(), 5);
    }

    #[test]
    fn position_zero_appends() {
        let mut queue = ExecutionQueue::default();
        queue.submit(inline("a"), None);
        assert_eq!(queue.submit(inline("b"), Some(0)), 1);
        assert_eq!(queue.submit(inline("c"), Some(99)), 2);
        assert_eq!(queue.len(), 3);
    }
}
