use super::*;

/// Result of fetching a script URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready(String),
    /// Network or HTTP failure; the element receives `error`.
    Failed,
    /// The server never answers.
    Pending,
}

pub trait ResourceLoader {
    fn fetch(&mut self, url: &str) -> FetchOutcome;
}

/// Serves a fixed URL map. Unknown URLs fail.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    resources: HashMap<String, FetchOutcome>,
    requests: Vec<String>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: &str) -> Self {
        self.resources
            .insert(url.to_string(), FetchOutcome::Ready(body.to_string()));
        self
    }

    pub fn with_outcome(mut self, url: &str, outcome: FetchOutcome) -> Self {
        self.resources.insert(url.to_string(), outcome);
        self
    }

    /// URLs requested so far. `data:` URIs are answered before reaching the loader.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }
}

impl ResourceLoader for StaticLoader {
    fn fetch(&mut self, url: &str) -> FetchOutcome {
        self.requests.push(url.to_string());
        self.resources
            .get(url)
            .cloned()
            .unwrap_or(FetchOutcome::Failed)
    }
}

/// Fetches through `loader`, answering `data:` URIs locally.
pub(crate) fn fetch_script(loader: &mut dyn ResourceLoader, url: &str) -> FetchOutcome {
    match decode_data_uri(url) {
        Some(Ok(body)) => FetchOutcome::Ready(body),
        Some(Err(_)) => FetchOutcome::Failed,
        None => loader.fetch(url),
    }
}

fn decode_data_uri(url: &str) -> Option<Result<String>> {
    let rest = url.strip_prefix("data:")?;
    let Some(comma) = rest.find(',') else {
        return Some(Err(Error::ScriptRuntime("data URI without payload".into())));
    };
    let (meta, payload) = (&rest[..comma], &rest[comma + 1..]);
    if meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Some(Err(Error::ScriptRuntime("base64 data URIs are not supported".into())));
    }
    Some(dom_utils::decode_uri_component(payload))
}
