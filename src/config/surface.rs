use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// HTTP interaction surface used by the binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceConfig {
    /// Endpoint receiving acquisition POSTs (required by the binary).
    /// TOML: `surface.acquire_url`.
    #[serde(default)]
    pub acquire_url: Option<Url>,

    /// Endpoint polled for contention markers; falls back to `acquire_url`.
    /// TOML: `surface.status_url`.
    #[serde(default)]
    pub status_url: Option<Url>,

    /// Label of the resource being acquired, used in logs and status records.
    /// TOML: `surface.target`. Default: `resource`.
    #[serde(default = "default_target")]
    pub target: String,

    /// JSON object sent as the acquisition body.
    /// TOML: `[surface.payload]`.
    #[serde(default)]
    pub payload: Map<String, Value>,

    /// Case-insensitive markers that identify a "temporarily unavailable" response.
    /// TOML: `surface.contention_keywords`.
    #[serde(default = "default_contention_keywords")]
    pub contention_keywords: Vec<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            acquire_url: None,
            status_url: None,
            target: default_target(),
            payload: Map::new(),
            contention_keywords: default_contention_keywords(),
        }
    }
}

fn default_target() -> String {
    "resource".to_string()
}

fn default_contention_keywords() -> Vec<String> {
    [
        "busy",
        "try again",
        "too many requests",
        "temporarily unavailable",
        "queue",
        "rate limit",
        "congest",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
