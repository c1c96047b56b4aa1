/// Engine quirks the runner has to work around.
///
/// Historical engines are recognised from their user agent once, at page
/// construction; the runner itself only ever asks about capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Inline deferred scripts are replayed as `data:` URI scripts so that an
    /// exception in one of them cannot reorder the ones after it.
    pub inline_scripts_as_data_uri: bool,
    /// `querySelectorAll` works on the document. Without it the not-processed
    /// markers are never stripped and `getElementsByTagName` is not shimmed.
    pub query_selector_all: bool,
    /// `document.readyState` can be shadowed with an accessor.
    pub ready_state_overridable: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            inline_scripts_as_data_uri: false,
            query_selector_all: true,
            ready_state_overridable: true,
        }
    }
}

impl Capabilities {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let firefox = fancy_regex::Regex::new(r"Firefox/\d")
            .ok()
            .and_then(|re| re.is_match(user_agent).ok())
            .unwrap_or(false);
        let legacy_ie = ie_version(user_agent).is_some_and(|version| version <= 8.0);
        Self {
            inline_scripts_as_data_uri: firefox,
            query_selector_all: !legacy_ie,
            ready_state_overridable: !legacy_ie,
        }
    }
}

fn ie_version(user_agent: &str) -> Option<f32> {
    let re = fancy_regex::Regex::new(r"MSIE.(\d+\.\d+)").ok()?;
    let captures = re.captures(user_agent).ok()??;
    captures.get(1)?.as_str().parse::<f32>().ok()
}
