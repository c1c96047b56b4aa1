use super::*;

/// Runner lifecycle. Ordering matters: several checks compare states, and
/// `WaitingForNextRun` sorts before `ScriptsRegistered` so a waiting runner
/// can register its next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunnerState {
    NotStarted,
    WaitingForNextRun,
    ScriptsRegistered,
    ScriptsExecuting,
    SyncScriptsDone,
    WaitingForOnload,
    ScriptsDone,
}

/// Last synthetic lifecycle event a runner fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventState {
    NotStarted,
    BeforeScripts,
    DomReady,
    Load,
    AfterScripts,
}

impl EventState {
    /// `type` carried by the synthesized event object.
    pub fn event_type(self) -> &'static str {
        match self {
            Self::DomReady => "DOMContentLoaded",
            Self::Load => "load",
            Self::NotStarted | Self::BeforeScripts | Self::AfterScripts => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Window,
    Document,
    Element(NodeId),
}

/// Event object handed to listeners, native or synthetic.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticEvent {
    pub event_type: String,
    pub bubbles: bool,
    pub cancelable: bool,
    pub event_phase: u8,
    pub time_stamp: i64,
    /// Never `Window`: a window listener sees the document as target.
    pub target: EventTarget,
    pub current_target: EventTarget,
}

impl SyntheticEvent {
    pub(crate) fn at_target(event_type: &str, target: EventTarget, time_stamp: i64) -> Self {
        let event_target = match target {
            EventTarget::Window => EventTarget::Document,
            other => other,
        };
        Self {
            event_type: event_type.to_string(),
            bubbles: false,
            cancelable: false,
            event_phase: 2,
            time_stamp,
            target: event_target,
            current_target: target,
        }
    }
}

pub type Callback = Rc<dyn Fn(&mut Document<'_>, &SyntheticEvent) -> Result<()>>;

/// Something to invoke when an event fires.
#[derive(Clone)]
pub enum Listener {
    /// Script source run through the page's [`ScriptHost`].
    Script(String),
    Callback(Callback),
    /// Runner bookkeeping attached to native events.
    Internal(InternalHandler),
}

impl Listener {
    pub fn script(source: impl Into<String>) -> Self {
        Self::Script(source.into())
    }

    pub fn callback(
        f: impl Fn(&mut Document<'_>, &SyntheticEvent) -> Result<()> + 'static,
    ) -> Self {
        Self::Callback(Rc::new(f))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(source) => f.debug_tuple("Script").field(source).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Internal(handler) => f.debug_tuple("Internal").field(handler).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalHandler {
    /// Load/error of the zero-byte trigger script after an external task.
    RunNext { tier: Tier, url: String },
    /// Load/error of a script created while replay is active.
    DynamicScriptDone { tier: Tier, node: NodeId },
    /// Load/error of an async script created before replay started.
    NoDeferScriptDone { node: NodeId },
    /// Native window load while the low tier waits for it.
    FireOnload,
    /// `DOMContentLoaded` / window `load`: start replay once.
    StartDeferJs,
}

/// Listeners registered through the unshimmed registration functions.
#[derive(Debug, Default, Clone)]
pub(crate) struct NativeListenerStore {
    map: HashMap<EventTarget, HashMap<String, Vec<Listener>>>,
}

impl NativeListenerStore {
    pub(crate) fn add(&mut self, target: EventTarget, event: &str, listener: Listener) {
        self.map
            .entry(target)
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    pub(crate) fn get(&self, target: EventTarget, event: &str) -> Vec<Listener> {
        self.map
            .get(&target)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, target: EventTarget, event: &str) -> usize {
        self.map
            .get(&target)
            .and_then(|events| events.get(event))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// A listener held back until its synthetic event fires.
#[derive(Debug, Clone)]
pub(crate) struct PendingListener {
    pub(crate) target: EventTarget,
    pub(crate) listener: Listener,
}

/// Maps a registration to the synthetic event that satisfies it, if any.
pub(crate) fn synthetic_event_for(event_name: &str) -> Option<EventState> {
    match event_name {
        "DOMContentLoaded" | "readystatechange" | "onDOMContentLoaded" | "onreadystatechange" => {
            Some(EventState::DomReady)
        }
        "load" | "onload" => Some(EventState::Load),
        "onbeforescripts" => Some(EventState::BeforeScripts),
        "onafterscripts" => Some(EventState::AfterScripts),
        _ => None,
    }
}
