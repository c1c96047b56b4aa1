use super::*;

/// The document entry points replay has to intercept. Page script reaches
/// them through [`Document`]; the page installs an [`InterceptingAdapter`]
/// when a tier starts replaying.
pub trait DocumentAdapter: fmt::Debug {
    fn write(&self, doc: &mut Document<'_>, html: &str) -> Result<()>;

    fn writeln(&self, doc: &mut Document<'_>, html: &str) -> Result<()> {
        self.write(doc, &format!("{html}\n"))
    }

    fn open(&self, doc: &mut Document<'_>) -> Result<()>;
    fn close(&self, doc: &mut Document<'_>) -> Result<()>;
    fn get_element_by_id(&self, doc: &mut Document<'_>, id: &str) -> Result<Option<NodeId>>;
    fn get_elements_by_tag_name(&self, doc: &mut Document<'_>, tag: &str) -> Result<Vec<NodeId>>;
    fn create_element(&self, doc: &mut Document<'_>, tag: &str) -> Result<NodeId>;
    fn add_event_listener(
        &self,
        doc: &mut Document<'_>,
        target: EventTarget,
        event: &str,
        listener: Listener,
    ) -> Result<()>;
}

/// Browser behaviour, untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeAdapter {
    /// Count async scripts created by non-deferred code so the high tier
    /// waits for them before it runs.
    pub track_no_defer_scripts: bool,
}

impl DocumentAdapter for NativeAdapter {
    fn write(&self, doc: &mut Document<'_>, html: &str) -> Result<()> {
        doc.env.native_write(html)
    }

    fn open(&self, doc: &mut Document<'_>) -> Result<()> {
        doc.env.native_open()
    }

    fn close(&self, _doc: &mut Document<'_>) -> Result<()> {
        Ok(())
    }

    fn get_element_by_id(&self, doc: &mut Document<'_>, id: &str) -> Result<Option<NodeId>> {
        Ok(doc.env.dom.element_by_id(id))
    }

    fn get_elements_by_tag_name(&self, doc: &mut Document<'_>, tag: &str) -> Result<Vec<NodeId>> {
        Ok(doc.env.dom.elements_by_tag_name(tag))
    }

    fn create_element(&self, doc: &mut Document<'_>, tag: &str) -> Result<NodeId> {
        let node = doc.env.dom.create_detached_element(tag);
        if self.track_no_defer_scripts && tag.eq_ignore_ascii_case("script") {
            doc.env.track_no_defer_script(node);
        }
        Ok(node)
    }

    fn add_event_listener(
        &self,
        doc: &mut Document<'_>,
        target: EventTarget,
        event: &str,
        listener: Listener,
    ) -> Result<()> {
        doc.env.native_listeners.add(target, event, listener);
        Ok(())
    }
}

/// Shims installed while `tier` replays. Each entry point checks the tier's
/// override flag and delegates to [`NativeAdapter`] once it is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptingAdapter {
    pub tier: Tier,
}

impl InterceptingAdapter {
    fn overriding(&self, doc: &Document<'_>) -> bool {
        doc.env
            .defer
            .runner(self.tier)
            .override_default_implementation
    }
}

impl DocumentAdapter for InterceptingAdapter {
    fn write(&self, doc: &mut Document<'_>, html: &str) -> Result<()> {
        if !self.overriding(doc) {
            return NativeAdapter::default().write(doc, html);
        }
        let runner = doc.env.defer.runner_mut(self.tier);
        runner.log(format!("dw: {html}"));
        runner.document_write_html.push_str(html);
        Ok(())
    }

    fn open(&self, doc: &mut Document<'_>) -> Result<()> {
        if self.overriding(doc) {
            return Ok(());
        }
        NativeAdapter::default().open(doc)
    }

    fn close(&self, doc: &mut Document<'_>) -> Result<()> {
        if self.overriding(doc) {
            return Ok(());
        }
        NativeAdapter::default().close(doc)
    }

    fn get_element_by_id(&self, doc: &mut Document<'_>, id: &str) -> Result<Option<NodeId>> {
        doc.env.handle_pending_document_writes(self.tier)?;
        let node = doc.env.dom.element_by_id(id);
        Ok(node.filter(|node| !doc.env.dom.has_attr(*node, self.tier.not_processed_attr())))
    }

    fn get_elements_by_tag_name(&self, doc: &mut Document<'_>, tag: &str) -> Result<Vec<NodeId>> {
        if doc.env.caps.query_selector_all && self.overriding(doc) {
            let selector = format!("{tag}:not([{}])", self.tier.not_processed_attr());
            if let Ok(nodes) = doc.env.dom.query_selector_all(&selector) {
                return Ok(nodes);
            }
        }
        NativeAdapter::default().get_elements_by_tag_name(doc, tag)
    }

    fn create_element(&self, doc: &mut Document<'_>, tag: &str) -> Result<NodeId> {
        let node = NativeAdapter::default().create_element(doc, tag)?;
        if self.overriding(doc) && tag.eq_ignore_ascii_case("script") {
            doc.env.track_dynamic_script(self.tier, node);
        }
        Ok(node)
    }

    fn add_event_listener(
        &self,
        doc: &mut Document<'_>,
        target: EventTarget,
        event: &str,
        listener: Listener,
    ) -> Result<()> {
        doc.env.psa_add_event_listener(target, event, listener, true);
        Ok(())
    }
}

/// What page script sees as `document` (and the `window` registration
/// entry points). Shimmed calls go through the active adapter, everything
/// else is plain DOM access.
pub struct Document<'a> {
    pub(crate) env: &'a mut PageEnv,
}

impl<'a> Document<'a> {
    pub(crate) fn new(env: &'a mut PageEnv) -> Self {
        Self { env }
    }

    fn adapter(&self) -> Rc<dyn DocumentAdapter> {
        Rc::clone(&self.env.adapter)
    }

    pub fn write(&mut self, html: &str) -> Result<()> {
        self.adapter().write(self, html)
    }

    pub fn writeln(&mut self, html: &str) -> Result<()> {
        self.adapter().writeln(self, html)
    }

    pub fn open(&mut self) -> Result<()> {
        self.adapter().open(self)
    }

    pub fn close(&mut self) -> Result<()> {
        self.adapter().close(self)
    }

    pub fn get_element_by_id(&mut self, id: &str) -> Result<Option<NodeId>> {
        self.adapter().get_element_by_id(self, id)
    }

    pub fn get_elements_by_tag_name(&mut self, tag: &str) -> Result<Vec<NodeId>> {
        self.adapter().get_elements_by_tag_name(self, tag)
    }

    pub fn create_element(&mut self, tag: &str) -> Result<NodeId> {
        self.adapter().create_element(self, tag)
    }

    pub fn add_event_listener(
        &mut self,
        target: EventTarget,
        event: &str,
        listener: Listener,
    ) -> Result<()> {
        self.adapter().add_event_listener(self, target, event, listener)
    }

    /// `document.readyState`, including the replay shadow.
    pub fn ready_state(&self) -> ReadyState {
        self.env.visible_ready_state()
    }

    pub fn dom(&self) -> &Dom {
        &self.env.dom
    }

    pub fn body(&self) -> Option<NodeId> {
        self.env.dom.body()
    }

    pub fn head(&self) -> Option<NodeId> {
        self.env.dom.head()
    }

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.env.dom.attr(node, name)
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.env.dom.set_attr(node, name, value)
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.env.dom.remove_attr(node, name)
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<()> {
        self.env.dom.set_text_content(node, text)
    }

    /// `script.async = value`.
    pub fn set_async(&mut self, node: NodeId, value: bool) {
        self.env.dom.set_force_async(node, value);
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Inserting a script into the document prepares it: inline scripts run
    /// once the current script returns, external ones are fetched.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        self.env.dom.insert_before(parent, child, reference)?;
        self.env.note_inserted(child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.env.dom.remove_child(parent, child)
    }

    /// Assigns `window.onload`.
    pub fn set_window_onload(&mut self, listener: Option<Listener>) {
        self.env.window_onload = listener;
    }

    /// Assigns `document.onreadystatechange`.
    pub fn set_document_onreadystatechange(&mut self, listener: Option<Listener>) {
        self.env.document_onreadystatechange = listener;
    }

    /// `pagespeed.deferJs.addStr(source)` on the active tier.
    pub fn defer_add_str(&mut self, source: &str) {
        let tier = self.env.defer.active;
        self.env.add_str(tier, source, None, None);
    }

    /// `pagespeed.deferJs.addUrl(url)` on the active tier.
    pub fn defer_add_url(&mut self, url: &str) {
        let tier = self.env.defer.active;
        self.env.add_url(tier, url, None, None);
    }

    pub fn now(&self) -> i64 {
        self.env.now_ms
    }
}

impl fmt::Debug for Document<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("adapter", &self.env.adapter)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}
