//! Client Configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::Method;

/// Defaults merged under every request, plus native host options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default HTTP method
    pub method: Method,

    /// Issue requests asynchronously
    #[serde(rename = "async")]
    pub async_: bool,

    /// Treat requests as cross-domain unless overridden
    pub cross_domain: bool,

    /// Headers sent with every Ajax request
    pub headers: HashMap<String, String>,

    /// Placeholder replaced by the callback reference in JSONP URLs
    pub jsonp_token: String,

    /// Prefix of the callback references handed to JSONP scripts
    pub callback_namespace: String,

    /// User agent string (native host)
    pub user_agent: String,

    /// Request timeout (native host)
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            method: Method::Get,
            async_: true,
            cross_domain: false,
            headers: HashMap::new(),
            jsonp_token: "JSONPCallback".to_string(),
            callback_namespace: "rxnet.jsonp".to_string(),
            user_agent: format!("rxnet/{}", crate::VERSION),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl Config {
    /// Parse a JSON configuration; absent fields keep their defaults
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.method, Method::Get);
        assert!(config.async_);
        assert_eq!(config.jsonp_token, "JSONPCallback");
        assert!(config.user_agent.starts_with("rxnet/"));
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json(r#"{"method": "POST", "headers": {"X-Api": "1"}, "timeout": null}"#).unwrap();
        assert_eq!(config.method, Method::Post);
        assert_eq!(config.headers.get("X-Api").map(String::as_str), Some("1"));
        assert_eq!(config.timeout, None);
        assert_eq!(config.callback_namespace, "rxnet.jsonp");
    }
}
