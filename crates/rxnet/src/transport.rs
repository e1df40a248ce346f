//! Host Platform Interfaces
//!
//! The seams between the executors and whatever actually moves bytes: a
//! `Host` hands out `TransportHandle`s (one per Ajax request) and optionally
//! a `ScriptDocument` for JSONP script injection.
//!
//! All methods take `&self`. Implementations keep their state behind
//! `Cell`/`RefCell` and must release every borrow before invoking a handler,
//! since handlers call back into the handle (status, response, abort).

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::capabilities::{TransportCapabilities, TransportTier};
use crate::error::HostError;
use crate::settings::ResponseType;

/// Shared reference to a live transport handle
pub type TransportRef = Rc<dyn TransportHandle>;

/// Event handler registered on a handle or script element
pub type EventHandler = Rc<dyn Fn(&PlatformEvent)>;

/// Transport ready states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ReadyState {
    /// Created, open() not called yet
    #[default]
    Unsent = 0,
    /// open() has been called
    Opened = 1,
    /// send() has been called, headers received
    HeadersReceived = 2,
    /// Downloading
    Loading = 3,
    /// Operation complete
    Done = 4,
}

/// Platform event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Load,
    Error,
    Abort,
    Progress,
    ReadyStateChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Load => "load",
            EventKind::Error => "error",
            EventKind::Abort => "abort",
            EventKind::Progress => "progress",
            EventKind::ReadyStateChange => "readystatechange",
        }
    }
}

/// Which object of a transport an event is dispatched on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Request,
    Upload,
}

/// Raw notification from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEvent {
    pub kind: EventKind,
    /// Bytes transferred so far
    pub loaded: u64,
    /// Total bytes, when known
    pub total: Option<u64>,
}

impl PlatformEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            loaded: 0,
            total: None,
        }
    }

    pub fn progress(loaded: u64, total: Option<u64>) -> Self {
        Self {
            kind: EventKind::Progress,
            loaded,
            total,
        }
    }

    /// Is the total length computable?
    pub fn length_computable(&self) -> bool {
        self.total.is_some()
    }
}

/// Response body as exposed by a transport or captured from a script
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(_) => None,
        }
    }
}

/// Basic-auth credentials passed to `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub user: &'a str,
    pub password: Option<&'a str>,
}

/// One in-flight HTTP request on the host
pub trait TransportHandle {
    /// Open the request
    fn open(
        &self,
        method: &str,
        url: &str,
        async_: bool,
        credentials: Option<Credentials<'_>>,
    ) -> Result<(), HostError>;

    /// Set a request header (only valid while opened)
    fn set_request_header(&self, name: &str, value: &str) -> Result<(), HostError>;

    /// Ask the transport to interpret the response as `response_type`
    fn set_response_type(&self, response_type: ResponseType) -> Result<(), HostError>;

    /// Install or remove (`None`) the handler for `kind` on `target`
    fn set_handler(&self, target: EventTarget, kind: EventKind, handler: Option<EventHandler>);

    /// Start the request
    fn send(&self, body: Option<String>) -> Result<(), HostError>;

    /// Abort the request
    fn abort(&self);

    fn ready_state(&self) -> ReadyState;

    /// HTTP status; `None` while the transport reports no status at all
    fn status(&self) -> Option<u16>;

    /// Typed response, for transports that expose one
    fn response(&self) -> Option<Payload>;

    fn response_text(&self) -> String;
}

/// Identifier of a script element inside a `ScriptDocument`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptId(pub u32);

/// Script element creation and removal
pub trait ScriptDocument {
    /// Create a detached script element pointing at `src`
    fn create_script(&self, src: &str, async_: bool) -> Result<ScriptId, HostError>;

    /// Install or remove (`None`) a `load`/`error` handler
    fn set_script_handler(&self, script: ScriptId, kind: EventKind, handler: Option<EventHandler>);

    /// Insert the element into the document, starting the fetch
    fn append_script(&self, script: ScriptId) -> Result<(), HostError>;

    /// Detach and destroy the element; unknown ids are ignored
    fn remove_script(&self, script: ScriptId);
}

/// The platform the executors run on
pub trait Host {
    /// Probe transport capabilities. Must not fail.
    fn detect(&self) -> TransportCapabilities;

    /// Create a transport handle for `tier`
    fn create_transport(&self, tier: TransportTier) -> Result<TransportRef, HostError>;

    /// Script document for JSONP, if the host has one
    fn document(&self) -> Option<Rc<dyn ScriptDocument>>;

    /// Whether JSON parsing is available
    fn supports_json(&self) -> bool {
        true
    }
}

impl fmt::Debug for dyn TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("ready_state", &self.ready_state())
            .field("status", &self.status())
            .finish()
    }
}
