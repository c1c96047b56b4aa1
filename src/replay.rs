use super::*;

const JS_MIME_TYPES: &[&str] = &[
    "application/ecmascript",
    "application/javascript",
    "application/x-ecmascript",
    "application/x-javascript",
    "text/ecmascript",
    "text/javascript",
    "text/javascript1.0",
    "text/javascript1.1",
    "text/javascript1.2",
    "text/javascript1.3",
    "text/javascript1.4",
    "text/javascript1.5",
    "text/jscript",
    "text/livescript",
    "text/x-ecmascript",
    "text/x-javascript",
];

/// Script element whose `type` (or legacy `language`) names JavaScript.
pub(crate) fn is_js_node(dom: &Dom, node: NodeId) -> bool {
    if !dom.is_tag(node, "script") {
        return false;
    }
    if let Some(script_type) = dom.attr(node, "type") {
        let script_type = script_type.trim().to_ascii_lowercase();
        return script_type.is_empty() || JS_MIME_TYPES.contains(&script_type.as_str());
    }
    if let Some(language) = dom.attr(node, "language") {
        let mime = format!("text/{}", language.trim().to_ascii_lowercase());
        return language.trim().is_empty() || JS_MIME_TYPES.contains(&mime.as_str());
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskFlow {
    Continue,
    /// Waiting for the trigger script's load/error to resume the queue.
    Suspended,
}

// Runner steps that only touch page state.
impl PageEnv {
    pub(crate) fn set_not_processed_attribute_for_nodes(&mut self, tier: Tier) {
        for node in self.dom.all_element_nodes() {
            let _ = self.dom.set_attr(node, tier.not_processed_attr(), "");
        }
    }

    /// Unhides every element before `stop` in document order, except the
    /// tier's own placeholders.
    pub(crate) fn remove_not_processed_till(&mut self, tier: Tier, stop: Option<NodeId>) {
        if !self.caps.query_selector_all {
            return;
        }
        let attr = tier.not_processed_attr();
        let marked = self
            .dom
            .all_element_nodes()
            .into_iter()
            .filter(|node| self.dom.has_attr(*node, attr))
            .collect::<Vec<_>>();
        for node in marked {
            if Some(node) == stop {
                return;
            }
            if self.dom.attr(node, "type") != Some(tier.script_type()) {
                let _ = self.dom.remove_attr(node, attr);
            }
        }
    }

    /// First placeholder of this tier still in the document.
    pub(crate) fn next_psa_js_node(&self, tier: Tier) -> Option<NodeId> {
        self.dom
            .all_element_nodes()
            .into_iter()
            .find(|node| self.dom.attr(*node, "type") == Some(tier.script_type()))
    }

    /// Insertion point for replayed nodes: the current placeholder, or the
    /// `psanode` appended to the body.
    pub(crate) fn current_dom_location(&self) -> Option<NodeId> {
        self.dom
            .first_with_attr(PSA_CURRENT_NODE)
            .or_else(|| self.dom.elements_by_tag_name(PSA_NODE_TAG).into_iter().next())
    }

    pub(crate) fn remove_current_dom_location(&mut self) {
        if let Some(node) = self.current_dom_location() {
            if self.dom.is_tag(node, "script") {
                let _ = self.dom.remove_node(node);
            }
        }
    }

    /// New detached script carrying the placeholder's own attributes, which
    /// move off the placeholder.
    pub(crate) fn clone_script_node(&mut self, tier: Tier, context: Option<NodeId>) -> Result<NodeId> {
        let script = self.dom.create_detached_element("script");
        let Some(context) = context else {
            return Ok(script);
        };
        let reserved = [
            "type",
            "src",
            "async",
            "defer",
            PSA_ORIG_TYPE,
            PSA_ORIG_SRC,
            PSA_ORIG_INDEX,
            PSA_CURRENT_NODE,
            tier.not_processed_attr(),
        ];
        for name in self.dom.attr_names(context) {
            if reserved.contains(&name.as_str()) {
                continue;
            }
            let value = self.dom.attr(context, &name).unwrap_or_default().to_string();
            self.dom.set_attr(script, &name, &value)?;
            self.dom.remove_attr(context, &name)?;
        }
        Ok(script)
    }

    fn insert_at_current_location(&mut self, node: NodeId) -> Result<()> {
        let location = self
            .current_dom_location()
            .ok_or_else(|| Error::ScriptRuntime("no current DOM location".into()))?;
        let parent = self
            .dom
            .parent(location)
            .ok_or_else(|| Error::ScriptRuntime("current DOM location is detached".into()))?;
        self.dom.insert_before(parent, node, Some(location))
    }

    /// Inserts the executable clone of an external placeholder followed by
    /// its trigger script.
    fn insert_external_script(&mut self, tier: Tier, url: &str, context: Option<NodeId>) -> Result<()> {
        let script = self.clone_script_node(tier, context)?;
        self.dom.set_force_async(script, false);
        self.dom.set_attr(script, "type", "text/javascript")?;
        self.dom.set_attr(script, "src", url)?;
        if let Some(context) = context {
            let text = self.dom.text_content(context);
            if !text.is_empty() {
                let text = self.dom.create_detached_text(text);
                self.dom.append_child(script, text)?;
            }
        }

        match self.next_psa_js_node(tier) {
            Some(anchor) => {
                self.dom.set_attr(anchor, PSA_CURRENT_NODE, "")?;
                let parent = self
                    .dom
                    .parent(anchor)
                    .ok_or_else(|| Error::ScriptRuntime("placeholder is detached".into()))?;
                self.dom.insert_before(parent, script, Some(anchor))?;
            }
            None => self.insert_at_current_location(script)?,
        }
        self.prepare_script(script);
        self.script_on_load(tier, url)
    }

    /// Zero-byte script queued right behind the external one; its load (or
    /// error) resumes the queue even if the real script never reports.
    pub(crate) fn script_on_load(&mut self, tier: Tier, url: &str) -> Result<()> {
        let trigger = self.dom.create_detached_element("script");
        self.dom.set_force_async(trigger, false);
        self.dom.set_attr(trigger, "type", "text/javascript")?;
        self.dom.set_attr(trigger, PSA_TO_BE_DELETED, "")?;
        self.dom.set_attr(trigger, PSA_NOT_PROCESSED, "")?;
        self.dom.set_attr(trigger, PRIORITY_PSA_NOT_PROCESSED, "")?;
        let resume = Listener::Internal(InternalHandler::RunNext {
            tier,
            url: url.to_string(),
        });
        self.native_listeners
            .add(EventTarget::Element(trigger), "load", resume.clone());
        self.native_listeners
            .add(EventTarget::Element(trigger), "error", resume);
        self.dom.set_attr(
            trigger,
            "src",
            &dom_utils::javascript_data_uri("window.pagespeed.psatemp=0;"),
        )?;
        self.insert_at_current_location(trigger)?;
        self.prepare_script(trigger);
        Ok(())
    }

    pub(crate) fn add_node(&mut self, tier: Tier, script: NodeId, pos: Option<usize>, prefetch: bool) {
        let src = self
            .dom
            .attr(script, PSA_ORIG_SRC)
            .filter(|src| !src.is_empty())
            .or_else(|| self.dom.attr(script, "src").filter(|src| !src.is_empty()))
            .map(str::to_string);
        match src {
            Some(src) => {
                if prefetch {
                    self.prefetch(&src);
                }
                self.add_url(tier, &src, Some(script), pos);
            }
            None => {
                let text = self.dom.text_content(script);
                self.add_str(tier, &text, Some(script), pos);
            }
        }
    }

    pub(crate) fn add_str(&mut self, tier: Tier, text: &str, context: Option<NodeId>, pos: Option<usize>) {
        if self.caps.inline_scripts_as_data_uri {
            let url = dom_utils::javascript_data_uri(text);
            self.add_url(tier, &url, context, pos);
            return;
        }
        let runner = self.defer.runner_mut(tier);
        runner.log(format!("Add to queue str: {text}"));
        runner.submit_task(
            Task::InlineScript {
                text: text.to_string(),
                context,
            },
            pos,
        );
    }

    pub(crate) fn add_url(&mut self, tier: Tier, url: &str, context: Option<NodeId>, pos: Option<usize>) {
        let runner = self.defer.runner_mut(tier);
        runner.log(format!("Add to queue url: {url}"));
        runner.submit_task(
            Task::ExternalScript {
                url: url.to_string(),
                context,
            },
            pos,
        );
    }

    fn prefetch(&mut self, url: &str) {
        let Some(head) = self.dom.head() else {
            return;
        };
        let link = self.dom.create_detached_element("link");
        let attrs = [("rel", "preload"), ("as", "script"), ("href", url)];
        for (name, value) in attrs {
            let _ = self.dom.set_attr(link, name, value);
        }
        let _ = self.dom.append_child(head, link);
    }

    /// Flushes the tier's `document.write` buffer in front of the current
    /// location, queueing written scripts right behind the cursor.
    pub(crate) fn handle_pending_document_writes(&mut self, tier: Tier) -> Result<()> {
        let runner = self.defer.runner_mut(tier);
        if runner.document_write_html.is_empty() {
            return Ok(());
        }
        let html = std::mem::take(&mut runner.document_write_html);
        runner.log(format!("handle_dw: {html}"));
        let pos = runner.queue.next_index();
        let location = self.current_dom_location();
        self.insert_html(tier, &html, pos, location)
    }

    pub(crate) fn insert_html(
        &mut self,
        tier: Tier,
        html: &str,
        pos: usize,
        location: Option<NodeId>,
    ) -> Result<()> {
        let container = self.dom.create_detached_element("div");
        html::parse_fragment(&mut self.dom, container, html)?;

        let mut scripts = Vec::new();
        self.mark_nodes_and_extract_script_nodes(tier, container, &mut scripts)?;

        match location {
            Some(location) => self.dom.move_children_before(container, location)?,
            None => self
                .defer
                .runner_mut(tier)
                .log("Unable to insert nodes, no context element found"),
        }

        for (i, script) in scripts.into_iter().enumerate() {
            self.add_node(tier, script, Some(pos + i), i > 0);
        }
        Ok(())
    }

    /// Relabels written JavaScript so the parser leaves it alone, collecting
    /// the scripts in document order.
    fn mark_nodes_and_extract_script_nodes(
        &mut self,
        tier: Tier,
        node: NodeId,
        scripts: &mut Vec<NodeId>,
    ) -> Result<()> {
        stacker::maybe_grow(64 * 1024, 32 * 1024 * 1024, || {
            for child in self.dom.children(node).to_vec() {
                if !self.dom.is_tag(child, "script") {
                    self.mark_nodes_and_extract_script_nodes(tier, child, scripts)?;
                    continue;
                }
                if !is_js_node(&self.dom, child) {
                    continue;
                }
                let orig_type = self.dom.attr(child, "type").unwrap_or_default().to_string();
                let orig_src = self.dom.attr(child, "src").unwrap_or_default().to_string();
                self.dom.set_attr(child, PSA_ORIG_TYPE, &orig_type)?;
                self.dom.set_attr(child, "type", tier.script_type())?;
                self.dom.set_attr(child, PSA_ORIG_SRC, &orig_src)?;
                self.dom.set_attr(child, "src", "")?;
                self.dom.set_attr(child, tier.not_processed_attr(), "")?;
                scripts.push(child);
            }
            Ok(())
        })
    }

    pub(crate) fn track_no_defer_script(&mut self, node: NodeId) {
        let high = &mut self.defer.high;
        high.no_defer_async_scripts.push(node);
        high.no_defer_async_scripts_count += 1;
        let done = Listener::Internal(InternalHandler::NoDeferScriptDone { node });
        self.native_listeners
            .add(EventTarget::Element(node), "load", done.clone());
        self.native_listeners
            .add(EventTarget::Element(node), "error", done);
    }

    pub(crate) fn track_dynamic_script(&mut self, tier: Tier, node: NodeId) {
        let runner = self.defer.runner_mut(tier);
        runner.dynamic_inserted_scripts.push(node);
        runner.dynamic_inserted_script_count += 1;
        let done = Listener::Internal(InternalHandler::DynamicScriptDone { tier, node });
        self.native_listeners
            .add(EventTarget::Element(node), "load", done.clone());
        self.native_listeners
            .add(EventTarget::Element(node), "error", done);
    }

    /// Scripts that will never report load: detached, or without a `src`.
    pub(crate) fn num_scripts_with_no_onload(&self, scripts: &[NodeId]) -> usize {
        scripts
            .iter()
            .filter(|node| {
                !self.dom.is_connected(**node)
                    || self.dom.attr(**node, "src").is_none_or(str::is_empty)
            })
            .count()
    }

    pub(crate) fn can_call_on_complete(&self, tier: Tier) -> bool {
        let runner = self.defer.runner(tier);
        if runner.state != RunnerState::SyncScriptsDone {
            return false;
        }
        let count = if runner.dynamic_inserted_script_count != 0 {
            self.num_scripts_with_no_onload(&runner.dynamic_inserted_scripts)
        } else {
            0
        };
        runner.dynamic_inserted_script_count == count
    }

    /// `addEventListener` as seen through the shims. `original` is set when
    /// page script called the registration function itself.
    pub(crate) fn psa_add_event_listener(
        &mut self,
        target: EventTarget,
        event_name: &str,
        listener: Listener,
        original: bool,
    ) {
        if original && matches!(target, EventTarget::Element(_)) {
            self.native_listeners.add(target, event_name, listener);
            return;
        }

        let tier = self.defer.active;
        let runner = self.defer.runner(tier);
        let synthetic = events::synthetic_event_for(event_name);

        if let Some(event @ (EventState::DomReady | EventState::Load)) = synthetic {
            if runner.event_state >= event {
                let event = SyntheticEvent::at_target(event.event_type(), target, self.now_ms);
                self.microtasks.push_back(page::Microtask { listener, event });
                return;
            }
        }

        if runner.state >= RunnerState::WaitingForOnload {
            if original {
                self.native_listeners.add(target, event_name, listener);
                return;
            }
            if runner.state >= RunnerState::ScriptsDone {
                return;
            }
        }

        let event = match synthetic {
            Some(event @ (EventState::DomReady | EventState::Load)) if runner.event_state < event => {
                event
            }
            Some(event @ (EventState::BeforeScripts | EventState::AfterScripts)) => event,
            _ => {
                if original {
                    self.native_listeners.add(target, event_name, listener);
                }
                return;
            }
        };
        self.defer
            .runner_mut(tier)
            .push_listener(event, PendingListener { target, listener });
    }
}

// Runner steps that evaluate script.
impl<H: ScriptHost> Page<H> {
    pub(crate) fn defer_init(&mut self) {
        self.env.set_not_processed_attribute_for_nodes(Tier::High);
        self.env.set_not_processed_attribute_for_nodes(Tier::Low);
        self.env.defer.active = Tier::High;
        self.env.install_adapter(NativeAdapter {
            track_no_defer_scripts: true,
        });
        if self.env.auto_start {
            let start = Listener::Internal(InternalHandler::StartDeferJs);
            self.env
                .native_listeners
                .add(EventTarget::Document, "DOMContentLoaded", start.clone());
            self.env
                .native_listeners
                .add(EventTarget::Window, "load", start);
        }
    }

    fn start_defer_js_inner(&mut self) {
        if self.env.defer.started {
            return;
        }
        self.env.defer.started = true;
        let tier = self.env.defer.active;
        self.register_script_tags_for(tier, None, None);
        self.execute_for(tier);
    }

    pub(crate) fn register_script_tags_for(
        &mut self,
        tier: Tier,
        callback: Option<Listener>,
        last_index: Option<i64>,
    ) {
        let experimental = self.env.defer.experimental;
        let runner = self.env.defer.runner_mut(tier);
        if runner.state >= RunnerState::ScriptsRegistered {
            return;
        }
        let incremental = callback.is_some();
        match callback {
            Some(callback) if !experimental => {
                self.exec(tier, &callback, EventTarget::Window, "");
                return;
            }
            Some(callback) => {
                runner.last_incremental_run = false;
                runner.incremental_scripts_done_callback = Some(callback);
                if let Some(last_index) = last_index.filter(|index| *index != 0) {
                    runner.opt_last_index = last_index;
                }
            }
            None => runner.last_incremental_run = true,
        }
        runner.state = RunnerState::ScriptsRegistered;

        for script in self.env.dom.elements_by_tag_name("script") {
            if self.env.dom.attr(script, "type") != Some(tier.script_type()) {
                continue;
            }
            let runner = self.env.defer.runner_mut(tier);
            let is_first_script = runner.queue.len() == runner.queue.next_index();
            let orig_index = self
                .env
                .dom
                .attr(script, PSA_ORIG_INDEX)
                .and_then(|index| index.trim().parse::<i64>().ok());
            if incremental {
                if orig_index.unwrap_or(0) <= runner.opt_last_index {
                    self.env.add_node(tier, script, None, !is_first_script);
                }
                continue;
            }
            if let Some(index) = orig_index.filter(|index| *index < runner.opt_last_index) {
                runner.log_error(
                    format!("Executing a script twice. Orig_Index: {index}"),
                    &Error::ScriptRuntime("script was already part of an incremental batch".into()),
                );
            }
            self.env.add_node(tier, script, None, !is_first_script);
        }
    }

    pub(crate) fn execute_for(&mut self, tier: Tier) {
        let runner = self.env.defer.runner(tier);
        if runner.state != RunnerState::ScriptsRegistered {
            return;
        }
        let count = if runner.no_defer_async_scripts_count != 0 {
            self.env
                .num_scripts_with_no_onload(&runner.no_defer_async_scripts)
        } else {
            0
        };
        if runner.no_defer_async_scripts_count == count {
            self.run_for(tier);
        }
    }

    pub(crate) fn run_for(&mut self, tier: Tier) {
        let runner = self.env.defer.runner(tier);
        if runner.state != RunnerState::ScriptsRegistered {
            return;
        }
        if runner.first_incremental_run {
            self.fire_event(tier, EventState::BeforeScripts);
        }
        self.env.defer.runner_mut(tier).state = RunnerState::ScriptsExecuting;
        self.set_up(tier);
        self.run_next(tier);
    }

    fn set_up(&mut self, tier: Tier) {
        let runner = self.env.defer.runner(tier);
        if runner.first_incremental_run && tier == Tier::High {
            if let Some(body) = self.env.dom.body() {
                let target = self.env.dom.create_detached_element(PSA_NODE_TAG);
                let _ = self.env.dom.set_attr(target, PSA_DW_TARGET, "true");
                let _ = self.env.dom.append_child(body, target);
            }
            if self.env.caps.ready_state_overridable {
                self.env.ready_state_shadowed = true;
            } else {
                self.env.defer.high.log_error(
                    "Exception while overriding document.readyState.",
                    &Error::ScriptRuntime("document.readyState is not configurable".into()),
                );
            }
        }
        self.env.defer.runner_mut(tier).override_default_implementation = true;
        self.env.install_adapter(InterceptingAdapter { tier });
    }

    /// Drives the queue until it suspends on an external script or runs dry.
    pub(crate) fn run_next(&mut self, tier: Tier) {
        loop {
            if let Err(err) = self.env.handle_pending_document_writes(tier) {
                self.env
                    .defer
                    .runner_mut(tier)
                    .log_error("Exception while inserting document.write output.", &err);
            }
            self.env.remove_current_dom_location();
            let Some(task) = self.env.defer.runner_mut(tier).queue.advance() else {
                break;
            };
            if self.run_task(tier, task) == TaskFlow::Suspended {
                return;
            }
        }

        let runner = self.env.defer.runner_mut(tier);
        if !runner.last_incremental_run {
            self.on_complete(tier);
            return;
        }
        runner.state = RunnerState::SyncScriptsDone;
        self.env.remove_not_processed_till(tier, None);
        self.fire_event(tier, EventState::DomReady);
        if self.env.can_call_on_complete(tier) {
            self.on_complete(tier);
        }
    }

    fn run_task(&mut self, tier: Tier, task: Task) -> TaskFlow {
        match task {
            Task::InlineScript { text, context } => {
                self.env.remove_not_processed_till(tier, context);
                if let Some(node) = self.env.next_psa_js_node(tier) {
                    let _ = self.env.dom.set_attr(node, PSA_CURRENT_NODE, "");
                }
                if let Err(err) = self.global_eval(tier, &text, context) {
                    self.env
                        .defer
                        .runner_mut(tier)
                        .log_error("Exception while evaluating.", &err);
                }
                self.env
                    .defer
                    .runner_mut(tier)
                    .log(format!("Evaluated: {text}"));
                TaskFlow::Continue
            }
            Task::ExternalScript { url, context } => {
                self.env.remove_not_processed_till(tier, context);
                match self.env.insert_external_script(tier, &url, context) {
                    Ok(()) => TaskFlow::Suspended,
                    Err(err) => {
                        self.env
                            .defer
                            .runner_mut(tier)
                            .log_error(format!("Exception while loading {url}."), &err);
                        TaskFlow::Continue
                    }
                }
            }
        }
    }

    /// Evaluates `text` through a fresh script element placed at the current
    /// location.
    fn global_eval(&mut self, tier: Tier, text: &str, context: Option<NodeId>) -> Result<()> {
        let script = self.env.clone_script_node(tier, context)?;
        self.env.dom.set_text_content(script, text)?;
        self.env.dom.set_attr(script, "type", "text/javascript")?;
        self.env.insert_at_current_location(script)?;
        self.run_inline_script(script)
    }

    pub(crate) fn on_complete(&mut self, tier: Tier) {
        let runner = self.env.defer.runner(tier);
        if runner.state >= RunnerState::WaitingForOnload {
            return;
        }
        let last_run = runner.last_incremental_run;
        if last_run && tier == Tier::Low {
            self.env.ready_state_shadowed = false;
        }
        // The shims stay installed and delegate from here on; listener
        // registration keeps routing through the active runner.
        self.env.defer.runner_mut(tier).override_default_implementation = false;

        if last_run {
            self.env.defer.runner_mut(tier).state = RunnerState::WaitingForOnload;
            match tier {
                Tier::Low if self.env.ready_state != ReadyState::Complete => {
                    self.env.native_listeners.add(
                        EventTarget::Window,
                        "load",
                        Listener::Internal(InternalHandler::FireOnload),
                    );
                }
                Tier::Low => {
                    // The native load is over, so run the page's handlers
                    // along with the replayed one.
                    if let Some(handler) = self.env.document_onreadystatechange.clone() {
                        self.exec(Tier::Low, &handler, EventTarget::Document, "readystatechange");
                    }
                    if let Some(onload) = self.env.window_onload.take() {
                        self.env
                            .psa_add_event_listener(EventTarget::Window, "onload", onload, false);
                    }
                    self.fire_onload(Tier::Low);
                }
                Tier::High => self.high_priority_finalize(Tier::High),
            }
            return;
        }

        let runner = self.env.defer.runner_mut(tier);
        runner.state = RunnerState::WaitingForNextRun;
        runner.first_incremental_run = false;
        if tier == Tier::Low && runner.incremental_scripts_done_callback.is_some() {
            let callback = runner.incremental_scripts_done_callback.take();
            self.env.defer.active = Tier::High;
            if let Some(callback) = callback {
                self.exec(tier, &callback, EventTarget::Window, "");
            }
        } else {
            self.high_priority_finalize(tier);
        }
    }

    fn high_priority_finalize(&mut self, from: Tier) {
        self.env.tasks.push_back(LoopTask::HandOff { from });
    }

    pub(crate) fn hand_off(&mut self, from: Tier) {
        let runner = self.env.defer.runner_mut(from);
        let callback = runner.incremental_scripts_done_callback.take();
        let last_index = runner.opt_last_index;
        self.env.defer.active = Tier::Low;
        match callback {
            Some(callback) => self.register_script_tags_for(Tier::Low, Some(callback), Some(last_index)),
            None => self.register_script_tags_for(Tier::Low, None, None),
        }
        self.execute_for(Tier::Low);
    }

    pub(crate) fn fire_onload(&mut self, tier: Tier) {
        if tier == Tier::Low {
            self.add_deferred_onload_listeners();
            self.fire_onload(Tier::High);
        }

        self.fire_event(tier, EventState::Load);

        if tier == Tier::Low {
            let leftovers = self
                .env
                .dom
                .query_selector_all(&format!("{PSA_NODE_TAG}, .{PSA_PREFETCH_CONTAINER}"))
                .unwrap_or_default();
            for node in leftovers {
                let _ = self.env.dom.remove_node(node);
            }
        }

        self.env.defer.runner_mut(tier).state = RunnerState::ScriptsDone;
        self.fire_event(tier, EventState::AfterScripts);
    }

    pub(crate) fn fire_event(&mut self, tier: Tier, event: EventState) {
        let runner = self.env.defer.runner_mut(tier);
        runner.event_state = event;
        runner.log(format!("Firing Event: {event:?}"));
        loop {
            let listeners = self.env.defer.runner_mut(tier).take_listeners(event);
            if listeners.is_empty() {
                break;
            }
            for pending in listeners {
                self.exec(tier, &pending.listener, pending.target, event.event_type());
            }
        }
    }

    /// Runs a listener, logging instead of propagating its failure.
    fn exec(&mut self, tier: Tier, listener: &Listener, target: EventTarget, event_type: &str) {
        let event = SyntheticEvent::at_target(event_type, target, self.env.now_ms);
        if let Err(err) = self.invoke_listener(listener, &event) {
            self.env
                .defer
                .runner_mut(tier)
                .log_error("Exception while evaluating.", &err);
        }
    }

    fn add_deferred_onload_listeners(&mut self) {
        let selector = format!("[{PAGESPEED_ONLOAD}][{PAGESPEED_LOADED}]");
        let elements = self.env.dom.query_selector_all(&selector).unwrap_or_default();
        for element in elements {
            let handler = self
                .env
                .dom
                .attr(element, PAGESPEED_ONLOAD)
                .unwrap_or_default()
                .to_string();
            if let Err(err) = self.host.compile(&handler) {
                self.env
                    .defer
                    .low
                    .log_error("Function is not defined", &err);
                continue;
            }
            self.env.psa_add_event_listener(
                EventTarget::Element(element),
                "onload",
                Listener::Script(handler),
                false,
            );
        }
    }

    pub(crate) fn handle_internal(&mut self, handler: InternalHandler) {
        match handler {
            InternalHandler::RunNext { tier, url } => {
                if let Some(trigger) = self.env.dom.first_with_attr(PSA_TO_BE_DELETED) {
                    let _ = self.env.dom.remove_node(trigger);
                }
                self.env
                    .defer
                    .runner_mut(tier)
                    .log(format!("Executed: {url}"));
                self.run_next(tier);
            }
            InternalHandler::DynamicScriptDone { tier, node } => {
                let runner = self.env.defer.runner_mut(tier);
                runner.dynamic_inserted_script_count =
                    runner.dynamic_inserted_script_count.saturating_sub(1);
                let Some(index) = runner.dynamic_inserted_scripts.iter().position(|n| *n == node)
                else {
                    return;
                };
                runner.dynamic_inserted_scripts.remove(index);
                if self.env.can_call_on_complete(tier) {
                    self.on_complete(tier);
                }
            }
            InternalHandler::NoDeferScriptDone { node } => {
                let high = &mut self.env.defer.high;
                let Some(index) = high.no_defer_async_scripts.iter().position(|n| *n == node) else {
                    return;
                };
                high.no_defer_async_scripts.remove(index);
                high.no_defer_async_scripts_count = high.no_defer_async_scripts_count.saturating_sub(1);
                self.execute_for(Tier::High);
            }
            InternalHandler::FireOnload => self.fire_onload(Tier::Low),
            InternalHandler::StartDeferJs => self.start_defer_js_inner(),
        }
    }
}

/// The `pagespeed.deferJs` surface. Calls go to the active tier.
impl<H: ScriptHost> Page<H> {
    pub fn register_script_tags(&mut self, callback: Option<Listener>, last_index: Option<i64>) {
        let tier = self.env.defer.active;
        self.register_script_tags_for(tier, callback, last_index);
        self.perform_microtask_checkpoint();
    }

    /// Runs the registered scripts once no async script created by
    /// non-deferred code is outstanding.
    pub fn execute(&mut self) {
        let tier = self.env.defer.active;
        self.execute_for(tier);
        self.perform_microtask_checkpoint();
    }

    pub fn run(&mut self) {
        let tier = self.env.defer.active;
        self.run_for(tier);
        self.perform_microtask_checkpoint();
    }

    pub fn scripts_are_done(&self) -> bool {
        self.env.defer.runner(self.env.defer.active).scripts_are_done()
    }

    pub fn add_before_defer_run_function(&mut self, listener: Listener) {
        self.env
            .psa_add_event_listener(EventTarget::Window, "onbeforescripts", listener, false);
    }

    pub fn add_after_defer_run_function(&mut self, listener: Listener) {
        self.env
            .psa_add_event_listener(EventTarget::Window, "onafterscripts", listener, false);
    }

    pub fn add_url(&mut self, url: &str) {
        let tier = self.env.defer.active;
        self.env.add_url(tier, url, None, None);
    }

    pub fn add_str(&mut self, source: &str) {
        let tier = self.env.defer.active;
        self.env.add_str(tier, source, None, None);
    }

    pub fn is_experimental_mode(&self) -> bool {
        self.env.defer.experimental
    }

    /// Registers and executes the active tier, once per page.
    pub fn start_defer_js(&mut self) {
        self.start_defer_js_inner();
        self.perform_microtask_checkpoint();
    }

    pub fn defer_js_started(&self) -> bool {
        self.env.defer.started
    }

    pub fn runner(&self, tier: Tier) -> &DeferJs {
        self.env.defer.runner(tier)
    }

    pub fn active_tier(&self) -> Tier {
        self.env.defer.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_javascript_by_type_or_language() -> Result<()> {
        let (dom, scripts) = html::parse_document(
            "<script></script>\
             <script type='text/javascript'></script>\
             <script type='text/psajs'></script>\
             <script language='JavaScript1.2'></script>\
             <script language='vbscript'></script>\
             <script type=''></script>",
        )?;
        let flags = scripts
            .iter()
            .map(|node| is_js_node(&dom, *node))
            .collect::<Vec<_>>();
        assert_eq!(flags, vec![true, true, false, true, false, true]);
        Ok(())
    }

    #[test]
    fn clone_moves_page_attributes_off_the_placeholder() -> Result<()> {
        let (dom, scripts) = html::parse_document(
            "<script id='s' class='c' type='text/psajs' data-pagespeed-orig-index='3' \
             psa_not_processed priority_psa_not_processed>x</script>",
        )?;
        let mut env = PageEnv::new(dom, &DeferConfig::default(), Box::new(StaticLoader::new()));
        let clone = env.clone_script_node(Tier::Low, Some(scripts[0]))?;
        assert_eq!(env.dom.attr(clone, "id"), Some("s"));
        assert_eq!(env.dom.attr(clone, "class"), Some("c"));
        assert!(env.dom.has_attr(clone, PRIORITY_PSA_NOT_PROCESSED));
        assert!(!env.dom.has_attr(clone, "type"));
        assert!(!env.dom.has_attr(clone, PSA_ORIG_INDEX));
        assert!(!env.dom.has_attr(clone, PSA_NOT_PROCESSED));
        assert_eq!(env.dom.attr(scripts[0], "id"), None);
        assert_eq!(env.dom.attr(scripts[0], "type"), Some("text/psajs"));
        Ok(())
    }

    #[test]
    fn written_scripts_are_relabelled_and_spliced_at_the_cursor() -> Result<()> {
        let (dom, _) = html::parse_document("<psanode psa_dw_target='true'></psanode>")?;
        let mut env = PageEnv::new(dom, &DeferConfig::default(), Box::new(StaticLoader::new()));
        env.add_str(Tier::Low, "writer()", None, None);
        env.add_str(Tier::Low, "later()", None, None);
        env.defer.low.queue.advance();
        let location = env.current_dom_location();
        env.insert_html(
            Tier::Low,
            "<p id='w'></p><script>a()</script><script src='b.js'></script>",
            env.defer.low.queue().next_index(),
            location,
        )?;

        let written = env.dom.elements_by_tag_name("script");
        assert_eq!(written.len(), 2);
        for script in &written {
            assert_eq!(env.dom.attr(*script, "type"), Some(PSA_SCRIPT_TYPE));
            assert_eq!(env.dom.attr(*script, "src"), Some(""));
            assert!(env.dom.has_attr(*script, PSA_NOT_PROCESSED));
        }
        assert_eq!(env.dom.attr(written[1], PSA_ORIG_SRC), Some("b.js"));
        assert!(env.dom.element_by_id("w").is_some());

        let tasks = env.defer.low.queue().tasks();
        assert_eq!(tasks.len(), 4);
        assert!(matches!(&tasks[1], Task::InlineScript { text, .. } if text == "a()"));
        assert!(matches!(&tasks[2], Task::ExternalScript { url, .. } if url == "b.js"));
        assert!(matches!(&tasks[3], Task::InlineScript { text, .. } if text == "later()"));
        Ok(())
    }

    #[test]
    fn unmarking_stops_at_the_context_node() -> Result<()> {
        let (dom, scripts) = html::parse_document(
            "<div id='a'></div><script type='text/psajs'></script><div id='b'></div>",
        )?;
        let mut env = PageEnv::new(dom, &DeferConfig::default(), Box::new(StaticLoader::new()));
        env.set_not_processed_attribute_for_nodes(Tier::Low);
        env.remove_not_processed_till(Tier::Low, Some(scripts[0]));
        let a = env.dom.element_by_id("a");
        let b = env.dom.element_by_id("b");
        assert!(a.is_some_and(|a| !env.dom.has_attr(a, PSA_NOT_PROCESSED)));
        assert!(b.is_some_and(|b| env.dom.has_attr(b, PSA_NOT_PROCESSED)));

        env.remove_not_processed_till(Tier::Low, None);
        assert!(b.is_some_and(|b| !env.dom.has_attr(b, PSA_NOT_PROCESSED)));
        assert!(env.dom.has_attr(scripts[0], PSA_NOT_PROCESSED));
        Ok(())
    }
}
