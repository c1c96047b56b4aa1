use super::*;
use serde::Deserialize;

/// Page-level settings, as the rewriter emits them in the `pagespeed` object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeferConfig {
    /// Enables incremental (batched) registration.
    #[serde(rename = "defer_js_experimental")]
    pub experimental: bool,
    pub user_agent: Option<String>,
    /// Upper bound on retained log lines per runner.
    pub log_limit: usize,
    /// Mirror runner log lines to the `log` facade.
    pub log_to_console: bool,
    /// Start replay from `DOMContentLoaded` / window `load`. When off, the
    /// embedder calls `registerScriptTags`/`execute` itself.
    pub auto_start: bool,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            experimental: false,
            user_agent: None,
            log_limit: 10_000,
            log_to_console: true,
            auto_start: true,
        }
    }
}

impl DeferConfig {
    pub fn from_json(src: &str) -> Result<Self> {
        serde_json::from_str(src).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn capabilities(&self) -> Capabilities {
        self.user_agent
            .as_deref()
            .map(Capabilities::from_user_agent)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rewriter_settings() -> Result<()> {
        let config = DeferConfig::from_json(
            r#"{"defer_js_experimental": true, "user_agent": "Firefox/99.0", "log_limit": 5}"#,
        )?;
        assert!(config.experimental);
        assert_eq!(config.log_limit, 5);
        assert!(config.log_to_console);
        assert!(config.capabilities().inline_scripts_as_data_uri);
        Ok(())
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() -> Result<()> {
        assert_eq!(DeferConfig::from_json("{}")?, DeferConfig::default());
        Ok(())
    }

    #[test]
    fn malformed_settings_are_config_errors() {
        match DeferConfig::from_json("{\"log_limit\": \"many\"}") {
            Err(Error::Config(message)) => assert!(message.contains("invalid type")),
            other => panic!("expected config error, got: {other:?}"),
        }
    }
}
