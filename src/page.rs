use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl ReadyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Interactive => "interactive",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum LoopTask {
    /// Run the in-order script list as far as its head allows.
    OrderedScripts,
    AsyncScript { node: NodeId, outcome: FetchOutcome },
    /// Zero-delay timeout that moves replay to the low tier.
    HandOff { from: Tier },
}

#[derive(Debug, Clone)]
pub(crate) struct OrderedScript {
    pub(crate) node: NodeId,
    pub(crate) outcome: FetchOutcome,
}

#[derive(Debug, Clone)]
pub(crate) struct Microtask {
    pub(crate) listener: Listener,
    pub(crate) event: SyntheticEvent,
}

/// Everything a page owns except its script host.
pub(crate) struct PageEnv {
    pub(crate) dom: Dom,
    pub(crate) defer: DeferOrchestrator,
    pub(crate) caps: Capabilities,
    pub(crate) auto_start: bool,
    pub(crate) adapter: Rc<dyn DocumentAdapter>,
    pub(crate) native_listeners: NativeListenerStore,
    pub(crate) window_onload: Option<Listener>,
    pub(crate) document_onreadystatechange: Option<Listener>,
    pub(crate) ready_state: ReadyState,
    /// `document.readyState` answers from the high tier's state while set.
    pub(crate) ready_state_shadowed: bool,
    pub(crate) loader: Box<dyn ResourceLoader>,
    pub(crate) tasks: VecDeque<LoopTask>,
    pub(crate) ordered_scripts: VecDeque<OrderedScript>,
    pub(crate) microtasks: VecDeque<Microtask>,
    /// Scripts connected by page script, prepared once it returns.
    pub(crate) inserted_scripts: VecDeque<NodeId>,
    pub(crate) console: Vec<String>,
    pub(crate) fetched: Vec<String>,
    pub(crate) now_ms: i64,
    pub(crate) load_fired: bool,
    pub(crate) task_step_limit: usize,
}

impl PageEnv {
    pub(crate) fn new(dom: Dom, config: &DeferConfig, loader: Box<dyn ResourceLoader>) -> Self {
        Self {
            dom,
            defer: DeferOrchestrator::new(config),
            caps: config.capabilities(),
            auto_start: config.auto_start,
            adapter: Rc::new(NativeAdapter::default()),
            native_listeners: NativeListenerStore::default(),
            window_onload: None,
            document_onreadystatechange: None,
            ready_state: ReadyState::Loading,
            ready_state_shadowed: false,
            loader,
            tasks: VecDeque::new(),
            ordered_scripts: VecDeque::new(),
            microtasks: VecDeque::new(),
            inserted_scripts: VecDeque::new(),
            console: Vec::new(),
            fetched: Vec::new(),
            now_ms: 0,
            load_fired: false,
            task_step_limit: 10_000,
        }
    }

    pub(crate) fn visible_ready_state(&self) -> ReadyState {
        if !self.ready_state_shadowed {
            return self.ready_state;
        }
        if self.defer.high.state >= RunnerState::SyncScriptsDone {
            ReadyState::Interactive
        } else {
            ReadyState::Loading
        }
    }

    pub(crate) fn report(&mut self, context: &str, err: &Error) {
        log::warn!(target: "defer_js", "{context}: {err}");
        self.console.push(format!("{context}: {err}"));
    }

    pub(crate) fn install_adapter(&mut self, adapter: impl DocumentAdapter + 'static) {
        self.adapter = Rc::new(adapter);
    }

    /// Queues every not yet started script under `node` for preparation.
    pub(crate) fn note_inserted(&mut self, node: NodeId) {
        if !self.dom.is_connected(node) {
            return;
        }
        let mut elements = Vec::new();
        self.dom.collect_elements_dfs(node, &mut elements);
        for element in elements {
            if self.dom.is_tag(element, "script") {
                self.inserted_scripts.push_back(element);
            }
        }
    }

    /// "Prepare a script": external scripts are fetched and scheduled here.
    /// Returns the node when it is an inline script the caller must run.
    pub(crate) fn prepare_script(&mut self, node: NodeId) -> Option<NodeId> {
        if !self.dom.is_connected(node) || !self.dom.is_tag(node, "script") {
            return None;
        }
        let element = self.dom.element(node)?;
        if element.already_started || !replay::is_js_node(&self.dom, node) {
            return None;
        }
        let force_async = element.force_async;
        let src = self
            .dom
            .attr(node, "src")
            .filter(|src| !src.is_empty())
            .map(str::to_string);

        let Some(src) = src else {
            if self.dom.text_content(node).is_empty() {
                return None;
            }
            return Some(node);
        };

        self.mark_started(node);
        let outcome = self.fetch(&src);
        if force_async || self.dom.has_attr(node, "async") {
            if outcome != FetchOutcome::Pending {
                self.tasks.push_back(LoopTask::AsyncScript { node, outcome });
            }
        } else {
            self.ordered_scripts
                .push_back(OrderedScript { node, outcome });
            self.tasks.push_back(LoopTask::OrderedScripts);
        }
        None
    }

    pub(crate) fn mark_started(&mut self, node: NodeId) {
        if let Some(element) = self.dom.element_mut(node) {
            element.already_started = true;
        }
    }

    pub(crate) fn fetch(&mut self, url: &str) -> FetchOutcome {
        if !url.starts_with("data:") {
            self.fetched.push(url.to_string());
        }
        loader::fetch_script(self.loader.as_mut(), url)
    }

    /// `document.write` outside replay: the markup lands at the end of the
    /// body and its scripts run like any other inserted script.
    pub(crate) fn native_write(&mut self, html: &str) -> Result<()> {
        let body = self
            .dom
            .body()
            .ok_or_else(|| Error::ScriptRuntime("document has no body".into()))?;
        let container = self.dom.create_detached_element("div");
        html::parse_fragment(&mut self.dom, container, html)?;
        let children = self.dom.children(container).to_vec();
        for child in children {
            self.dom.append_child(body, child)?;
            self.note_inserted(child);
        }
        Ok(())
    }

    /// `document.open()` on a loaded document discards its content.
    pub(crate) fn native_open(&mut self) -> Result<()> {
        let Some(body) = self.dom.body() else {
            return Ok(());
        };
        for child in self.dom.children(body).to_vec() {
            self.dom.remove_child(body, child)?;
        }
        Ok(())
    }
}

/// A loaded page: parsed DOM, event loop, both replay tiers and the host
/// that evaluates its scripts.
pub struct Page<H: ScriptHost> {
    pub(crate) env: PageEnv,
    pub(crate) host: H,
}

impl<H: ScriptHost> fmt::Debug for Page<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("ready_state", &self.env.ready_state)
            .field("active", &self.env.defer.active)
            .field("high", &self.env.defer.high.state)
            .field("low", &self.env.defer.low.state)
            .field("pending_tasks", &self.env.tasks.len())
            .finish()
    }
}

impl<H: ScriptHost> Page<H> {
    pub fn new(html: &str, host: H) -> Result<Self> {
        Self::with_options(html, host, StaticLoader::new(), DeferConfig::default())
    }

    /// Parses `html`, runs its executable scripts, then fires
    /// `DOMContentLoaded` (which starts replay unless `auto_start` is off).
    pub fn with_options(
        html: &str,
        host: H,
        loader: impl ResourceLoader + 'static,
        config: DeferConfig,
    ) -> Result<Self> {
        let (dom, parser_scripts) = html::parse_document(html)?;
        let env = PageEnv::new(dom, &config, Box::new(loader));
        let mut page = Self { env, host };
        page.defer_init();

        for script in parser_scripts {
            page.run_parser_script(script);
        }

        page.env.ready_state = ReadyState::Interactive;
        page.dispatch_native(EventTarget::Document, "readystatechange");
        page.dispatch_native(EventTarget::Document, "DOMContentLoaded");
        page.dispatch_native(EventTarget::Window, "DOMContentLoaded");
        page.perform_microtask_checkpoint();
        Ok(page)
    }

    pub fn set_task_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::ScriptRuntime(
                "set_task_step_limit requires at least 1 step".into(),
            ));
        }
        self.env.task_step_limit = max_steps;
        Ok(())
    }

    /// Runs tasks until nothing is left, firing window `load` once no
    /// in-order script is outstanding.
    pub fn run_until_idle(&mut self) -> Result<()> {
        let mut steps = 0usize;
        loop {
            while let Some(task) = self.env.tasks.pop_front() {
                steps += 1;
                if steps > self.env.task_step_limit {
                    return Err(Error::ScriptRuntime(format!(
                        "event loop exceeded max task steps: limit={}, steps={steps}",
                        self.env.task_step_limit
                    )));
                }
                self.env.now_ms += 1;
                self.run_loop_task(task);
                self.perform_microtask_checkpoint();
            }
            if self.env.load_fired
                || self.env.ready_state == ReadyState::Loading
                || !self.env.ordered_scripts.is_empty()
            {
                return Ok(());
            }
            self.env.load_fired = true;
            self.env.ready_state = ReadyState::Complete;
            self.dispatch_native(EventTarget::Document, "readystatechange");
            self.dispatch_native(EventTarget::Window, "load");
            self.perform_microtask_checkpoint();
        }
    }

    /// Evaluates `source` as a top-level inline script.
    pub fn run_script(&mut self, source: &str) -> Result<()> {
        let result = self.evaluate(source, ScriptOrigin::Inline, None);
        self.perform_microtask_checkpoint();
        result
    }

    /// Runs `f` against the document the way a script would.
    pub fn with_document<R>(&mut self, f: impl FnOnce(&mut Document<'_>) -> Result<R>) -> Result<R> {
        let result = f(&mut Document::new(&mut self.env));
        self.flush_inserted_scripts();
        self.perform_microtask_checkpoint();
        result
    }

    pub fn dom(&self) -> &Dom {
        &self.env.dom
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// `document.readyState` as page script sees it.
    pub fn ready_state(&self) -> ReadyState {
        self.env.visible_ready_state()
    }

    /// Uncaught script errors and other page-level diagnostics.
    pub fn console(&self) -> &[String] {
        &self.env.console
    }

    /// Network URLs requested so far, in order.
    pub fn fetched_urls(&self) -> &[String] {
        &self.env.fetched
    }

    pub fn native_listener_count(&self, target: EventTarget, event: &str) -> usize {
        self.env.native_listeners.count(target, event)
    }

    pub fn adapter(&self) -> Rc<dyn DocumentAdapter> {
        Rc::clone(&self.env.adapter)
    }

    pub(crate) fn run_parser_script(&mut self, script: NodeId) {
        if !self.env.dom.is_connected(script) || !is_runnable(&self.env.dom, script) {
            return;
        }
        let src = self
            .env
            .dom
            .attr(script, "src")
            .filter(|src| !src.is_empty())
            .map(str::to_string);
        let Some(src) = src else {
            if let Some(inline) = self.env.prepare_script(script) {
                self.run_inline_reporting(inline);
            }
            return;
        };
        if self.env.dom.has_attr(script, "async") {
            self.env.prepare_script(script);
            return;
        }
        self.env.mark_started(script);
        let outcome = self.env.fetch(&src);
        if outcome == FetchOutcome::Pending {
            self.env.console.push(format!("parser-blocking script never loaded: {src}"));
            return;
        }
        self.run_fetched_script(script, outcome);
    }

    fn run_loop_task(&mut self, task: LoopTask) {
        match task {
            LoopTask::OrderedScripts => {
                while self
                    .env
                    .ordered_scripts
                    .front()
                    .is_some_and(|head| head.outcome != FetchOutcome::Pending)
                {
                    if let Some(OrderedScript { node, outcome }) = self.env.ordered_scripts.pop_front() {
                        self.run_fetched_script(node, outcome);
                    }
                }
            }
            LoopTask::AsyncScript { node, outcome } => self.run_fetched_script(node, outcome),
            LoopTask::HandOff { from } => self.hand_off(from),
        }
    }

    fn run_fetched_script(&mut self, node: NodeId, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Ready(body) => {
                let url = self.env.dom.attr(node, "src").unwrap_or_default().to_string();
                if let Err(err) = self.evaluate(&body, ScriptOrigin::External(url.clone()), None) {
                    self.env.report(&format!("uncaught error in {url}"), &err);
                }
                self.dispatch_native(EventTarget::Element(node), "load");
            }
            FetchOutcome::Failed => self.dispatch_native(EventTarget::Element(node), "error"),
            FetchOutcome::Pending => {}
        }
    }

    /// Marks `node` started and evaluates its text.
    pub(crate) fn run_inline_script(&mut self, node: NodeId) -> Result<()> {
        self.env.mark_started(node);
        let source = self.env.dom.text_content(node);
        self.evaluate(&source, ScriptOrigin::Inline, None)
    }

    fn run_inline_reporting(&mut self, node: NodeId) {
        if let Err(err) = self.run_inline_script(node) {
            self.env.report("uncaught error in inline script", &err);
        }
    }

    pub(crate) fn evaluate(
        &mut self,
        source: &str,
        origin: ScriptOrigin,
        event: Option<&SyntheticEvent>,
    ) -> Result<()> {
        let invocation = Invocation {
            source,
            origin,
            event,
        };
        let result = self
            .host
            .evaluate(&invocation, &mut Document::new(&mut self.env));
        self.flush_inserted_scripts();
        result
    }

    pub(crate) fn flush_inserted_scripts(&mut self) {
        while let Some(node) = self.env.inserted_scripts.pop_front() {
            if let Some(inline) = self.env.prepare_script(node) {
                self.run_inline_reporting(inline);
            }
        }
    }

    pub(crate) fn invoke_listener(&mut self, listener: &Listener, event: &SyntheticEvent) -> Result<()> {
        match listener {
            Listener::Script(source) => self.evaluate(source, ScriptOrigin::Listener, Some(event)),
            Listener::Callback(callback) => {
                let result = callback.as_ref()(&mut Document::new(&mut self.env), event);
                self.flush_inserted_scripts();
                result
            }
            Listener::Internal(handler) => {
                self.handle_internal(handler.clone());
                Ok(())
            }
        }
    }

    pub(crate) fn dispatch_native(&mut self, target: EventTarget, event_type: &str) {
        let event = SyntheticEvent::at_target(event_type, target, self.env.now_ms);
        let mut listeners = self.env.native_listeners.get(target, event_type);
        match (target, event_type) {
            (EventTarget::Window, "load") => listeners.extend(self.env.window_onload.clone()),
            (EventTarget::Document, "readystatechange") => {
                listeners.extend(self.env.document_onreadystatechange.clone())
            }
            _ => {}
        }
        for listener in listeners {
            if let Err(err) = self.invoke_listener(&listener, &event) {
                self.env
                    .report(&format!("uncaught error in {event_type} listener"), &err);
            }
        }
    }

    pub(crate) fn perform_microtask_checkpoint(&mut self) {
        while let Some(Microtask { listener, event }) = self.env.microtasks.pop_front() {
            if let Err(err) = self.invoke_listener(&listener, &event) {
                self.env.report("uncaught error in microtask", &err);
            }
        }
    }
}

/// Whether the browser would execute `node` when it is connected.
fn is_runnable(dom: &Dom, node: NodeId) -> bool {
    dom.is_tag(node, "script")
        && dom.element(node).is_some_and(|element| !element.already_started)
        && replay::is_js_node(dom, node)
}
