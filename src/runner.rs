use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    High,
    Low,
}

impl Tier {
    /// `type` value of this tier's placeholder scripts.
    pub fn script_type(self) -> &'static str {
        match self {
            Self::High => PRIORITY_PSA_SCRIPT_TYPE,
            Self::Low => PSA_SCRIPT_TYPE,
        }
    }

    /// Attribute hiding elements this tier has not reached yet.
    pub fn not_processed_attr(self) -> &'static str {
        match self {
            Self::High => PRIORITY_PSA_NOT_PROCESSED,
            Self::Low => PSA_NOT_PROCESSED,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Low => f.write_str("low"),
        }
    }
}

/// Bounded log of one runner, mirrored to the `log` facade.
#[derive(Debug, Clone)]
pub struct DeferLog {
    tier: Tier,
    lines: VecDeque<String>,
    limit: usize,
    to_console: bool,
}

impl DeferLog {
    pub(crate) fn new(tier: Tier, limit: usize, to_console: bool) -> Self {
        Self {
            tier,
            lines: VecDeque::new(),
            limit,
            to_console,
        }
    }

    pub(crate) fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if self.to_console {
            log::debug!(target: "defer_js", "[{}] {}", self.tier, dom_utils::truncate_chars(&line, 200));
        }
        self.append(line);
    }

    /// Logs a failure. The exception text gets its own line.
    pub(crate) fn error(&mut self, line: impl Into<String>, err: &Error) {
        let line = line.into();
        let message = err.to_string();
        if self.to_console {
            log::warn!(target: "defer_js", "PSA ERROR: {line}{message}");
        }
        self.append(line);
        self.append(message);
    }

    fn append(&mut self, line: String) {
        if self.limit == 0 {
            return;
        }
        while self.lines.len() >= self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// State of one priority tier. The [`Page`] drives it; this type only holds
/// the queue, the bookkeeping and the pending listeners.
#[derive(Debug)]
pub struct DeferJs {
    pub(crate) tier: Tier,
    pub(crate) queue: ExecutionQueue,
    pub(crate) logs: DeferLog,
    pub(crate) dynamic_inserted_script_count: usize,
    pub(crate) dynamic_inserted_scripts: Vec<NodeId>,
    /// `document.write` output of the running task.
    pub(crate) document_write_html: String,
    pub(crate) event_listeners: HashMap<EventState, Vec<PendingListener>>,
    /// Shims intercept only while this is set; afterwards they delegate.
    pub(crate) override_default_implementation: bool,
    pub(crate) state: RunnerState,
    pub(crate) event_state: EventState,
    pub(crate) first_incremental_run: bool,
    pub(crate) last_incremental_run: bool,
    pub(crate) incremental_scripts_done_callback: Option<Listener>,
    pub(crate) no_defer_async_scripts_count: usize,
    pub(crate) no_defer_async_scripts: Vec<NodeId>,
    pub(crate) opt_last_index: i64,
}

impl DeferJs {
    pub(crate) fn new(tier: Tier, config: &DeferConfig) -> Self {
        Self {
            tier,
            queue: ExecutionQueue::default(),
            logs: DeferLog::new(tier, config.log_limit, config.log_to_console),
            dynamic_inserted_script_count: 0,
            dynamic_inserted_scripts: Vec::new(),
            document_write_html: String::new(),
            event_listeners: HashMap::new(),
            override_default_implementation: true,
            state: RunnerState::NotStarted,
            event_state: EventState::NotStarted,
            first_incremental_run: true,
            last_incremental_run: true,
            incremental_scripts_done_callback: None,
            no_defer_async_scripts_count: 0,
            no_defer_async_scripts: Vec::new(),
            opt_last_index: -1,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn event_state(&self) -> EventState {
        self.event_state
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub fn logs(&self) -> &DeferLog {
        &self.logs
    }

    pub fn scripts_are_done(&self) -> bool {
        self.state == RunnerState::ScriptsDone
    }

    pub fn is_low_priority(&self) -> bool {
        self.tier == Tier::Low
    }

    pub fn pending_write(&self) -> &str {
        &self.document_write_html
    }

    pub fn dynamic_script_count(&self) -> usize {
        self.dynamic_inserted_script_count
    }

    pub fn pending_listener_count(&self, event: EventState) -> usize {
        self.event_listeners.get(&event).map(Vec::len).unwrap_or(0)
    }

    pub(crate) fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line);
    }

    pub(crate) fn log_error(&mut self, line: impl Into<String>, err: &Error) {
        self.logs.error(line, err);
    }

    pub(crate) fn submit_task(&mut self, task: Task, pos: Option<usize>) {
        self.queue.submit(task, pos);
    }

    pub(crate) fn push_listener(&mut self, event: EventState, pending: PendingListener) {
        self.event_listeners.entry(event).or_default().push(pending);
    }

    pub(crate) fn take_listeners(&mut self, event: EventState) -> Vec<PendingListener> {
        self.event_listeners.remove(&event).unwrap_or_default()
    }
}

/// Both tiers plus the reference to the one page code currently talks to.
#[derive(Debug)]
pub(crate) struct DeferOrchestrator {
    pub(crate) high: DeferJs,
    pub(crate) low: DeferJs,
    pub(crate) active: Tier,
    pub(crate) started: bool,
    pub(crate) experimental: bool,
}

impl DeferOrchestrator {
    pub(crate) fn new(config: &DeferConfig) -> Self {
        Self {
            high: DeferJs::new(Tier::High, config),
            low: DeferJs::new(Tier::Low, config),
            active: Tier::High,
            started: false,
            experimental: config.experimental,
        }
    }

    pub(crate) fn runner(&self, tier: Tier) -> &DeferJs {
        match tier {
            Tier::High => &self.high,
            Tier::Low => &self.low,
        }
    }

    pub(crate) fn runner_mut(&mut self, tier: Tier) -> &mut DeferJs {
        match tier {
            Tier::High => &mut self.high,
            Tier::Low => &mut self.low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_keeps_only_the_newest_lines() {
        let mut log = DeferLog::new(Tier::Low, 2, false);
        log.push("a");
        log.push("b");
        log.error("c", &Error::ScriptRuntime("boom".into()));
        assert_eq!(
            log.lines().collect::<Vec<_>>(),
            vec!["c", "script runtime error: boom"]
        );
    }

    #[test]
    fn tiers_use_disjoint_markers() {
        assert_ne!(Tier::High.script_type(), Tier::Low.script_type());
        assert_ne!(Tier::High.not_processed_attr(), Tier::Low.not_processed_attr());
    }

    #[test]
    fn waiting_for_next_run_sorts_before_registration() {
        assert!(RunnerState::WaitingForNextRun < RunnerState::ScriptsRegistered);
        assert!(RunnerState::SyncScriptsDone < RunnerState::WaitingForOnload);
        assert!(EventState::DomReady < EventState::Load);
    }
}
