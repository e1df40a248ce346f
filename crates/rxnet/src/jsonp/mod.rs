//! JSONP Executor
//!
//! Cross-origin requests through script injection. Each subscription gets
//! its own callback slot and script element; the element's `load`/`error`
//! events decide the outcome from what the slot captured.
//!
//! There is no abort primitive for a script fetch. Teardown only removes the
//! slot, the handlers and the element, so a late response has nowhere to go.

pub mod registry;

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;

use crate::config::Config;
use crate::envelope::{ErrorEnvelope, ResponseEnvelope};
use crate::error::{AjaxError, ErrorKind, HostError};
use crate::observable::{Observable, Subscriber, Teardown};
use crate::transport::{EventHandler, EventKind, Host, Payload, PlatformEvent, ScriptDocument, ScriptId};

pub use registry::CallbackSlot;

/// Canonical JSONP settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonpSettings {
    pub url: String,
    /// Placeholder in `url` replaced by the callback reference
    pub jsonp: String,
    pub async_: bool,
}

/// Partial JSONP options
#[derive(Debug, Clone, Default)]
pub struct JsonpOptions {
    pub url: Option<String>,
    pub jsonp: Option<String>,
    pub async_: Option<bool>,
}

impl JsonpOptions {
    pub fn new(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn jsonp(mut self, token: &str) -> Self {
        self.jsonp = Some(token.to_string());
        self
    }

    pub fn asynchronous(mut self, async_: bool) -> Self {
        self.async_ = Some(async_);
        self
    }
}

/// A URL or a set of JSONP options
#[derive(Debug, Clone)]
pub enum JsonpInput {
    Url(String),
    Options(JsonpOptions),
}

impl From<&str> for JsonpInput {
    fn from(url: &str) -> Self {
        JsonpInput::Url(url.to_string())
    }
}

impl From<String> for JsonpInput {
    fn from(url: String) -> Self {
        JsonpInput::Url(url)
    }
}

impl From<JsonpOptions> for JsonpInput {
    fn from(options: JsonpOptions) -> Self {
        JsonpInput::Options(options)
    }
}

/// Merge a URL or options over the configured defaults
pub fn normalize(input: impl Into<JsonpInput>, config: &Config) -> JsonpSettings {
    let mut settings = JsonpSettings {
        url: String::new(),
        jsonp: config.jsonp_token.clone(),
        async_: config.async_,
    };
    match input.into() {
        JsonpInput::Url(url) => settings.url = url,
        JsonpInput::Options(options) => {
            if let Some(url) = options.url {
                settings.url = url;
            }
            if let Some(jsonp) = options.jsonp {
                settings.jsonp = jsonp;
            }
            if let Some(async_) = options.async_ {
                settings.async_ = async_;
            }
        }
    }
    settings
}

/// Cold stream injecting one script per subscription
pub(crate) fn execute(host: Rc<dyn Host>, namespace: String, settings: JsonpSettings) -> Observable<ResponseEnvelope> {
    Observable::new(move |subscriber: Subscriber<ResponseEnvelope>| {
        let Some(document) = host.document() else {
            subscriber.error(AjaxError::TransportUnavailable(HostError::NoDocument));
            return Teardown::noop();
        };

        let slot = registry::register();
        let reference = format!("{}.{}", namespace, slot.id());
        let src = settings.url.replacen(&settings.jsonp, &reference, 1);

        let script = match document.create_script(&src, settings.async_) {
            Ok(script) => script,
            Err(err) => {
                registry::remove(slot.id());
                subscriber.error(AjaxError::TransportUnavailable(err));
                return Teardown::noop();
            }
        };

        tracing::debug!(%src, callback = slot.id(), "JSONP request");

        let request = Rc::new(JsonpRequest {
            slot,
            document,
            script,
            subscriber,
            settled: Cell::new(false),
            torn_down: Cell::new(false),
        });

        for kind in [EventKind::Load, EventKind::Error] {
            let target = request.clone();
            let handler: EventHandler = Rc::new(move |event: &PlatformEvent| target.settle(event));
            request.document.set_script_handler(script, kind, Some(handler));
        }

        if let Err(err) = request.document.append_script(script) {
            request.settled.set(true);
            request.subscriber.error(AjaxError::Host(err));
        }

        Teardown::new(move || request.teardown())
    })
}

struct JsonpRequest {
    slot: Rc<CallbackSlot>,
    document: Rc<dyn ScriptDocument>,
    script: ScriptId,
    subscriber: Subscriber<ResponseEnvelope>,
    settled: Cell<bool>,
    torn_down: Cell<bool>,
}

impl JsonpRequest {
    fn settle(&self, event: &PlatformEvent) {
        if self.settled.replace(true) {
            return;
        }

        if event.kind == EventKind::Load && self.slot.called() {
            let data = self.slot.data().unwrap_or(Value::Null);
            self.subscriber.next(ResponseEnvelope {
                response: Payload::Json(data),
                status: 200,
                response_type: String::new(),
                raw_handle: None,
                original_event: event.clone(),
            });
            self.subscriber.complete();
        } else {
            let original_event = if event.kind == EventKind::Load {
                tracing::debug!(callback = self.slot.id(), "Script loaded without invoking its callback");
                PlatformEvent::new(EventKind::Error)
            } else {
                event.clone()
            };
            let envelope = ErrorEnvelope {
                kind: ErrorKind::NetworkError,
                status: 400,
                raw_handle: None,
                original_event,
            };
            self.subscriber.error(envelope.into_error());
        }
    }

    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        self.settled.set(true);
        registry::remove(self.slot.id());
        self.document.set_script_handler(self.script, EventKind::Load, None);
        self.document.set_script_handler(self.script, EventKind::Error, None);
        self.document.remove_script(self.script);
        tracing::trace!(callback = self.slot.id(), "JSONP request torn down");
    }
}
