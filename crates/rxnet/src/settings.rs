//! Request Settings
//!
//! `RequestOptions` is the partial, caller-facing record; `normalize` merges
//! it (or a bare URL) over the configured defaults into the immutable
//! `RequestSettings` one request attempt runs with.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::observable::Notification;
use crate::transport::PlatformEvent;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

/// Response interpretation hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Text,
    ArrayBuffer,
    Blob,
    Document,
    Json,
}

impl ResponseType {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "arraybuffer" => ResponseType::ArrayBuffer,
            "blob" => ResponseType::Blob,
            "document" => ResponseType::Document,
            "json" => ResponseType::Json,
            _ => ResponseType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Text => "",
            ResponseType::ArrayBuffer => "arraybuffer",
            ResponseType::Blob => "blob",
            ResponseType::Document => "document",
            ResponseType::Json => "json",
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    /// Structured value, serialized to JSON before sending
    Json(Value),
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

/// Sink for progress notifications
#[derive(Clone)]
pub struct ProgressObserver {
    sink: Rc<RefCell<dyn FnMut(Notification<PlatformEvent>)>>,
}

impl ProgressObserver {
    pub fn new(sink: impl FnMut(Notification<PlatformEvent>) + 'static) -> Self {
        Self {
            sink: Rc::new(RefCell::new(sink)),
        }
    }

    pub(crate) fn notify(&self, notification: Notification<PlatformEvent>) {
        // A reentrant notification is dropped rather than panicking
        if let Ok(mut sink) = self.sink.try_borrow_mut() {
            sink(notification);
        }
    }
}

impl fmt::Debug for ProgressObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressObserver")
    }
}

/// Partial request options; unset fields fall back to `Config`
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub url: Option<String>,
    pub method: Option<Method>,
    pub body: Option<Body>,
    pub headers: HashMap<String, String>,
    pub async_: Option<bool>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub cross_domain: Option<bool>,
    pub response_type: Option<ResponseType>,
    pub progress_observer: Option<ProgressObserver>,
    pub upload_observer: Option<ProgressObserver>,
}

impl RequestOptions {
    pub fn new(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn asynchronous(mut self, async_: bool) -> Self {
        self.async_ = Some(async_);
        self
    }

    pub fn credentials(mut self, user: &str, password: Option<&str>) -> Self {
        self.user = Some(user.to_string());
        self.password = password.map(|p| p.to_string());
        self
    }

    pub fn cross_domain(mut self, cross_domain: bool) -> Self {
        self.cross_domain = Some(cross_domain);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn progress_observer(mut self, observer: ProgressObserver) -> Self {
        self.progress_observer = Some(observer);
        self
    }

    pub fn upload_observer(mut self, observer: ProgressObserver) -> Self {
        self.upload_observer = Some(observer);
        self
    }
}

/// A URL or a set of options
#[derive(Debug, Clone)]
pub enum RequestInput {
    Url(String),
    Options(RequestOptions),
}

impl From<&str> for RequestInput {
    fn from(url: &str) -> Self {
        RequestInput::Url(url.to_string())
    }
}

impl From<String> for RequestInput {
    fn from(url: String) -> Self {
        RequestInput::Url(url)
    }
}

impl From<RequestOptions> for RequestInput {
    fn from(options: RequestOptions) -> Self {
        RequestInput::Options(options)
    }
}

/// Canonical settings for one request attempt
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub url: String,
    pub method: Method,
    pub body: Option<Body>,
    pub headers: HashMap<String, String>,
    pub async_: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub cross_domain: bool,
    pub response_type: Option<ResponseType>,
    pub progress_observer: Option<ProgressObserver>,
    pub upload_observer: Option<ProgressObserver>,
}

impl RequestSettings {
    /// Whether the declared Content-Type is a JSON media type
    pub fn declares_json(&self) -> bool {
        self.content_type()
            .map(|value| value.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }

    /// Declared Content-Type header, matched case-insensitively
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// Merge a URL or options over the configured defaults
pub fn normalize(input: impl Into<RequestInput>, config: &Config) -> RequestSettings {
    let mut settings = RequestSettings {
        url: String::new(),
        method: config.method,
        body: None,
        headers: config.headers.clone(),
        async_: config.async_,
        user: None,
        password: None,
        cross_domain: config.cross_domain,
        response_type: None,
        progress_observer: None,
        upload_observer: None,
    };

    match input.into() {
        RequestInput::Url(url) => settings.url = url,
        RequestInput::Options(options) => {
            if let Some(url) = options.url {
                settings.url = url;
            }
            if let Some(method) = options.method {
                settings.method = method;
            }
            if let Some(async_) = options.async_ {
                settings.async_ = async_;
            }
            if let Some(cross_domain) = options.cross_domain {
                settings.cross_domain = cross_domain;
            }
            settings.headers.extend(options.headers);
            settings.body = options.body;
            settings.user = options.user;
            settings.password = options.password;
            settings.response_type = options.response_type;
            settings.progress_observer = options.progress_observer;
            settings.upload_observer = options.upload_observer;
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_input_uses_defaults() {
        let settings = normalize("/products", &Config::default());
        assert_eq!(settings.url, "/products");
        assert_eq!(settings.method, Method::Get);
        assert!(settings.async_);
        assert!(!settings.cross_domain);
        assert!(settings.body.is_none());
        assert!(settings.headers.is_empty());
    }

    #[test]
    fn test_options_overwrite_defaults() {
        let options = RequestOptions::new("/items")
            .method(Method::Put)
            .asynchronous(false)
            .cross_domain(true)
            .credentials("alice", Some("secret"))
            .response_type(ResponseType::Json);
        let settings = normalize(options, &Config::default());

        assert_eq!(settings.method, Method::Put);
        assert!(!settings.async_);
        assert!(settings.cross_domain);
        assert_eq!(settings.user.as_deref(), Some("alice"));
        assert_eq!(settings.password.as_deref(), Some("secret"));
        assert_eq!(settings.response_type, Some(ResponseType::Json));
    }

    #[test]
    fn test_headers_merge_per_key() {
        let mut config = Config::default();
        config.headers.insert("Accept".to_string(), "text/plain".to_string());
        config.headers.insert("X-Client".to_string(), "rxnet".to_string());

        let options = RequestOptions::new("/a").header("Accept", "application/json");
        let settings = normalize(options, &config);

        assert_eq!(settings.headers.get("Accept").unwrap(), "application/json");
        assert_eq!(settings.headers.get("X-Client").unwrap(), "rxnet");
    }

    #[test]
    fn test_missing_url_is_left_empty() {
        let settings = normalize(RequestOptions::default(), &Config::default());
        assert_eq!(settings.url, "");
    }

    #[test]
    fn test_declares_json() {
        let settings = normalize(
            RequestOptions::new("/a").header("content-type", "application/vnd.api+json; charset=utf-8"),
            &Config::default(),
        );
        assert!(settings.declares_json());

        let settings = normalize(
            RequestOptions::new("/a").header("Content-Type", "text/plain"),
            &Config::default(),
        );
        assert!(!settings.declares_json());
    }

    #[test]
    fn test_body_conversions() {
        assert_eq!(Body::from("raw"), Body::Text("raw".to_string()));
        assert_eq!(Body::from(json!({"a": 1})), Body::Json(json!({"a": 1})));
    }

    #[test]
    fn test_response_type_names() {
        assert_eq!(ResponseType::parse("JSON"), ResponseType::Json);
        assert_eq!(ResponseType::parse("unknown"), ResponseType::Text);
        assert_eq!(ResponseType::ArrayBuffer.as_str(), "arraybuffer");
        assert_eq!(ResponseType::Text.as_str(), "");
    }
}
