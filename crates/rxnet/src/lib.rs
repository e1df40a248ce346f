//! rxnet
//!
//! Ajax and JSONP requests as lazily-started, cancellable, single-result
//! streams. Nothing touches the network until a consumer subscribes;
//! unsubscribing aborts the request and releases everything it created.
//!
//! ```ignore
//! let client = Client::new(Rc::new(NativeHost::new(&Config::default())?));
//! let subscription = client.get_json("http://127.0.0.1:8080/products").subscribe(|n| println!("{n:?}"));
//! ```

mod ajax;
pub mod capabilities;
pub mod config;
pub mod envelope;
pub mod error;
pub mod jsonp;
pub mod native;
pub mod observable;
pub mod settings;
pub mod sim;
pub mod transport;

use std::rc::Rc;

use serde_json::Value;

pub use ajax::RequestState;
pub use capabilities::{CapabilityCache, TransportCapabilities, TransportTier};
pub use config::Config;
pub use envelope::{ErrorEnvelope, ResponseEnvelope};
pub use error::{AjaxError, ErrorKind, HostError};
pub use jsonp::{JsonpInput, JsonpOptions, JsonpSettings};
pub use native::NativeHost;
pub use observable::{Notification, Observable, Subscriber, Subscription, Teardown};
pub use settings::{Body, Method, ProgressObserver, RequestInput, RequestOptions, RequestSettings, ResponseType};
pub use transport::{Host, Payload, PlatformEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entry point for issuing requests against a host
#[derive(Clone)]
pub struct Client {
    host: Rc<dyn Host>,
    config: Rc<Config>,
    capabilities: Rc<CapabilityCache>,
}

impl Client {
    pub fn new(host: Rc<dyn Host>) -> Self {
        Self::with_config(host, Config::default())
    }

    pub fn with_config(host: Rc<dyn Host>, config: Config) -> Self {
        Self {
            host,
            config: Rc::new(config),
            capabilities: Rc::new(CapabilityCache::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Host capabilities, probed on first use
    pub fn capabilities(&self) -> TransportCapabilities {
        self.capabilities.get_or_detect(self.host.as_ref())
    }

    /// Request stream for a URL or a set of options
    pub fn ajax(&self, input: impl Into<RequestInput>) -> Observable<ResponseEnvelope> {
        let settings = settings::normalize(input, &self.config);
        ajax::execute(self.host.clone(), self.capabilities.clone(), settings)
    }

    pub fn get(&self, url: &str) -> Observable<ResponseEnvelope> {
        self.ajax(RequestOptions::new(url).method(Method::Get))
    }

    pub fn post(&self, url: &str, body: impl Into<Body>) -> Observable<ResponseEnvelope> {
        self.ajax(RequestOptions::new(url).method(Method::Post).body(body))
    }

    /// GET whose response text is parsed as JSON
    pub fn get_json(&self, url: &str) -> Observable<Value> {
        if !self.host.supports_json() {
            return Observable::throw(|| AjaxError::JsonUnsupported);
        }
        self.get(url).try_map(|envelope| match envelope.response {
            Payload::Json(value) => Ok(value),
            Payload::Text(text) if text.trim().is_empty() => Ok(Value::Null),
            Payload::Text(text) => Ok(serde_json::from_str(&text)?),
        })
    }

    /// Script-injection request for a URL or a set of JSONP options
    pub fn jsonp_request(&self, input: impl Into<JsonpInput>) -> Observable<ResponseEnvelope> {
        let settings = jsonp::normalize(input, &self.config);
        jsonp::execute(self.host.clone(), self.config.callback_namespace.clone(), settings)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimHost;
    use std::cell::RefCell;

    #[test]
    fn test_capabilities_detected_once() {
        let host = Rc::new(SimHost::new(TransportCapabilities::full()));
        let client = Client::new(host.clone());
        assert_eq!(host.detect_calls(), 0);

        client.capabilities();
        let _ = client.get("/a").subscribe(|_| {});
        let _ = client.get("/b").subscribe(|_| {});
        assert_eq!(host.detect_calls(), 1);
    }

    #[test]
    fn test_get_json_without_json_support() {
        let host = Rc::new(SimHost::new(TransportCapabilities::full()).without_json());
        let client = Client::new(host.clone());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        client.get_json("/data").subscribe(move |n| sink.borrow_mut().push(n));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Notification::Error(AjaxError::JsonUnsupported)));
        assert!(host.transports().is_empty());
    }

    #[test]
    fn test_get_json_parses_text() {
        let host = Rc::new(SimHost::new(TransportCapabilities::full()));
        let client = Client::new(host.clone());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let _subscription = client.get_json("/data").subscribe(move |n| sink.borrow_mut().push(n));
        host.last_transport().unwrap().respond(200, r#"{"ok":true}"#);

        let seen = seen.borrow();
        assert!(matches!(&seen[0], Notification::Next(v) if v == &serde_json::json!({"ok": true})));
        assert!(matches!(seen[1], Notification::Completed));
    }
}
