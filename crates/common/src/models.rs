use serde::Deserialize;

use crate::config::DEFAULT_QUERY_TIMEOUT_SECS;
use crate::value::ParamValue;

fn default_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

/// One inbound execution request: the statement text, its ordered
/// parameters, and the execution timeout in seconds. The timeout is
/// always positive and capped at [`MAX_QUERY_TIMEOUT_SECS`];
/// "no timeout" does not exist.
///
/// [`MAX_QUERY_TIMEOUT_SECS`]: crate::config::MAX_QUERY_TIMEOUT_SECS
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,

    #[serde(default)]
    pub params: Vec<ParamValue>,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}
