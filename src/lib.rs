//! Deferred-script replay for pages whose `<script>` tags were relabelled by a
//! server-side rewriter.
//!
//! A [`Page`] owns a small deterministic browser model (arena DOM, event loop,
//! resource loader) and two [`DeferJs`] runners, one per priority tier. Page
//! scripts are evaluated by a [`ScriptHost`] and talk to the document through a
//! [`Document`] handle whose `write`/`getElementById`/`createElement`/
//! `addEventListener` entry points are routed to the active
//! [`DocumentAdapter`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

mod adapter;
mod capabilities;
mod config;
mod dom;
mod dom_utils;
mod events;
mod html;
mod loader;
mod page;
mod replay;
mod runner;
mod script_host;
mod selector;
mod stats;
mod task;

pub use adapter::{Document, DocumentAdapter, InterceptingAdapter, NativeAdapter};
pub use capabilities::Capabilities;
pub use config::DeferConfig;
pub use dom::{Dom, NodeId};
pub use events::{
    Callback, EventState, EventTarget, InternalHandler, Listener, RunnerState, SyntheticEvent,
};
pub use loader::{FetchOutcome, ResourceLoader, StaticLoader};
pub use page::{Page, ReadyState};
pub use runner::{DeferJs, DeferLog, Tier};
pub use script_host::{Invocation, ScriptHost, ScriptOrigin, StatementHost};
pub use stats::{StatsPayload, StatsQuery, parse_stats_json};
pub use task::{ExecutionQueue, Task};

use dom::NodeType;
use events::{NativeListenerStore, PendingListener};
use page::{LoopTask, PageEnv};
use runner::DeferOrchestrator;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("html parse error: {0}")]
    HtmlParse(String),
    #[error("script runtime error: {0}")]
    ScriptRuntime(String),
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("stats payload error: {0}")]
    StatsPayload(String),
}

/// Marker `type` of low priority deferred scripts.
pub const PSA_SCRIPT_TYPE: &str = "text/psajs";
/// Marker `type` of high priority deferred scripts.
pub const PRIORITY_PSA_SCRIPT_TYPE: &str = "text/prioritypsajs";
pub const PSA_NOT_PROCESSED: &str = "psa_not_processed";
pub const PRIORITY_PSA_NOT_PROCESSED: &str = "priority_psa_not_processed";
pub const PSA_CURRENT_NODE: &str = "psa_current_node";
pub const PSA_TO_BE_DELETED: &str = "psa_to_be_deleted";
pub const PSA_ORIG_TYPE: &str = "data-pagespeed-orig-type";
pub const PSA_ORIG_SRC: &str = "data-pagespeed-orig-src";
pub const PSA_ORIG_INDEX: &str = "data-pagespeed-orig-index";
pub const PAGESPEED_ONLOAD: &str = "data-pagespeed-onload";
pub const PAGESPEED_LOADED: &str = "data-pagespeed-loaded";
pub const PSA_NODE_TAG: &str = "psanode";
pub const PSA_DW_TARGET: &str = "psa_dw_target";
pub const PSA_PREFETCH_CONTAINER: &str = "psa_prefetch_container";

#[cfg(test)]
mod tests;
