//! Simulated Host
//!
//! In-memory transports and script document whose network side is driven
//! explicitly: nothing happens until the caller invokes `respond`, `progress`,
//! `fail`, `load` and friends, which dispatch events synchronously the way a
//! host event loop would.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::capabilities::{TransportCapabilities, TransportTier};
use crate::error::HostError;
use crate::jsonp::registry;
use crate::settings::ResponseType;
use crate::transport::{
    Credentials, EventHandler, EventKind, EventTarget, Host, Payload, PlatformEvent, ReadyState,
    ScriptDocument, ScriptId, TransportHandle, TransportRef,
};

/// Host with scripted transports
pub struct SimHost {
    capabilities: TransportCapabilities,
    detect_calls: Cell<usize>,
    transports: RefCell<Vec<Rc<SimTransport>>>,
    document: Option<Rc<SimDocument>>,
    transport_available: bool,
    json: bool,
    rejected_response_types: Vec<ResponseType>,
    fail_send: bool,
    auto_response: Option<(u16, String)>,
}

impl SimHost {
    pub fn new(capabilities: TransportCapabilities) -> Self {
        Self {
            capabilities,
            detect_calls: Cell::new(0),
            transports: RefCell::new(Vec::new()),
            document: Some(Rc::new(SimDocument::new())),
            transport_available: true,
            json: true,
            rejected_response_types: Vec::new(),
            fail_send: false,
            auto_response: None,
        }
    }

    /// Host where creating any transport fails
    pub fn without_transport(mut self) -> Self {
        self.transport_available = false;
        self
    }

    pub fn without_document(mut self) -> Self {
        self.document = None;
        self
    }

    pub fn without_json(mut self) -> Self {
        self.json = false;
        self
    }

    /// Transports refuse `response_type` assignments
    pub fn rejecting_response_type(mut self, response_type: ResponseType) -> Self {
        self.rejected_response_types.push(response_type);
        self
    }

    /// Transports throw from `send`
    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Transports answer inside `send`, before it returns
    pub fn auto_respond(mut self, status: u16, body: &str) -> Self {
        self.auto_response = Some((status, body.to_string()));
        self
    }

    /// How many times capabilities were probed
    pub fn detect_calls(&self) -> usize {
        self.detect_calls.get()
    }

    /// Every transport created so far
    pub fn transports(&self) -> Vec<Rc<SimTransport>> {
        self.transports.borrow().clone()
    }

    pub fn last_transport(&self) -> Option<Rc<SimTransport>> {
        self.transports.borrow().last().cloned()
    }

    pub fn sim_document(&self) -> Option<Rc<SimDocument>> {
        self.document.clone()
    }
}

impl Host for SimHost {
    fn detect(&self) -> TransportCapabilities {
        self.detect_calls.set(self.detect_calls.get() + 1);
        self.capabilities
    }

    fn create_transport(&self, tier: TransportTier) -> Result<TransportRef, HostError> {
        if !self.transport_available {
            return Err(HostError::Unsupported("XMLHttpRequest".to_string()));
        }
        let transport = Rc::new(SimTransport::new(tier));
        transport.rejected.borrow_mut().extend(self.rejected_response_types.iter().copied());
        transport.fail_send.set(self.fail_send);
        *transport.auto_response.borrow_mut() = self.auto_response.clone();
        self.transports.borrow_mut().push(transport.clone());
        Ok(transport)
    }

    fn document(&self) -> Option<Rc<dyn ScriptDocument>> {
        self.document.clone().map(|document| document as Rc<dyn ScriptDocument>)
    }

    fn supports_json(&self) -> bool {
        self.json
    }
}

#[derive(Debug, Default)]
struct SimState {
    ready_state: ReadyState,
    method: String,
    url: String,
    async_: bool,
    credentials: Option<(String, Option<String>)>,
    headers: Vec<(String, String)>,
    response_type: Option<ResponseType>,
    sent: bool,
    body: Option<String>,
    status: Option<u16>,
    response_text: String,
}

/// Scripted transport handle
pub struct SimTransport {
    tier: TransportTier,
    state: RefCell<SimState>,
    handlers: RefCell<HashMap<(EventTarget, EventKind), EventHandler>>,
    rejected: RefCell<Vec<ResponseType>>,
    fail_send: Cell<bool>,
    auto_response: RefCell<Option<(u16, String)>>,
    abort_calls: Cell<usize>,
}

impl SimTransport {
    pub fn new(tier: TransportTier) -> Self {
        Self {
            tier,
            state: RefCell::new(SimState::default()),
            handlers: RefCell::new(HashMap::new()),
            rejected: RefCell::new(Vec::new()),
            fail_send: Cell::new(false),
            auto_response: RefCell::new(None),
            abort_calls: Cell::new(0),
        }
    }

    pub fn tier(&self) -> TransportTier {
        self.tier
    }

    pub fn method(&self) -> String {
        self.state.borrow().method.clone()
    }

    pub fn url(&self) -> String {
        self.state.borrow().url.clone()
    }

    pub fn is_async(&self) -> bool {
        self.state.borrow().async_
    }

    pub fn credentials(&self) -> Option<(String, Option<String>)> {
        self.state.borrow().credentials.clone()
    }

    /// Request header value, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.state.borrow().headers.clone()
    }

    pub fn was_sent(&self) -> bool {
        self.state.borrow().sent
    }

    pub fn sent_body(&self) -> Option<String> {
        self.state.borrow().body.clone()
    }

    /// Calls to `abort`, whether or not they had an effect
    pub fn abort_calls(&self) -> usize {
        self.abort_calls.get()
    }

    pub fn has_handler(&self, target: EventTarget, kind: EventKind) -> bool {
        self.handlers.borrow().contains_key(&(target, kind))
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Finish with `status` and `body`
    pub fn respond(&self, status: u16, body: &str) {
        self.finish(Some(status), body);
    }

    /// Finish without any status (legacy hosts report an empty string)
    pub fn respond_without_status(&self, body: &str) {
        self.finish(None, body);
    }

    /// Download progress
    pub fn progress(&self, loaded: u64, total: Option<u64>) {
        self.state.borrow_mut().ready_state = ReadyState::Loading;
        self.dispatch(EventTarget::Request, PlatformEvent::progress(loaded, total));
    }

    pub fn upload_progress(&self, loaded: u64, total: Option<u64>) {
        self.dispatch(EventTarget::Upload, PlatformEvent::progress(loaded, total));
    }

    pub fn upload_complete(&self) {
        self.dispatch(EventTarget::Upload, PlatformEvent::new(EventKind::Load));
    }

    pub fn upload_fail(&self) {
        self.dispatch(EventTarget::Upload, PlatformEvent::new(EventKind::Error));
    }

    /// Network failure
    pub fn fail(&self) {
        self.settle(Some(0));
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::ReadyStateChange));
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::Error));
    }

    /// Abort initiated by the host itself
    pub fn host_abort(&self) {
        self.settle(Some(0));
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::ReadyStateChange));
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::Abort));
    }

    fn finish(&self, status: Option<u16>, body: &str) {
        self.settle(status);
        self.state.borrow_mut().response_text = body.to_string();
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::ReadyStateChange));
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::Load));
    }

    fn settle(&self, status: Option<u16>) {
        let mut state = self.state.borrow_mut();
        state.ready_state = ReadyState::Done;
        state.status = status;
    }

    fn dispatch(&self, target: EventTarget, event: PlatformEvent) {
        let handler = self.handlers.borrow().get(&(target, event.kind)).cloned();
        if let Some(handler) = handler {
            handler(&event);
        }
    }

    fn is_legacy(&self) -> bool {
        matches!(self.tier, TransportTier::LegacyPoll | TransportTier::LegacyCrossDomain)
    }
}

impl TransportHandle for SimTransport {
    fn open(
        &self,
        method: &str,
        url: &str,
        async_: bool,
        credentials: Option<Credentials<'_>>,
    ) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.method = method.to_uppercase();
        state.url = url.to_string();
        state.async_ = async_;
        state.credentials = credentials.map(|c| (c.user.to_string(), c.password.map(|p| p.to_string())));
        state.headers.clear();
        state.sent = false;
        state.ready_state = ReadyState::Opened;
        Ok(())
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if state.ready_state != ReadyState::Opened || state.sent {
            return Err(HostError::InvalidState);
        }
        state.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn set_response_type(&self, response_type: ResponseType) -> Result<(), HostError> {
        let legacy_rejects = self.is_legacy() && response_type != ResponseType::Text;
        if legacy_rejects || self.rejected.borrow().contains(&response_type) {
            return Err(HostError::ResponseTypeRejected(response_type.as_str().to_string()));
        }
        self.state.borrow_mut().response_type = Some(response_type);
        Ok(())
    }

    fn set_handler(&self, target: EventTarget, kind: EventKind, handler: Option<EventHandler>) {
        let mut handlers = self.handlers.borrow_mut();
        match handler {
            Some(handler) => {
                handlers.insert((target, kind), handler);
            }
            None => {
                handlers.remove(&(target, kind));
            }
        }
    }

    fn send(&self, body: Option<String>) -> Result<(), HostError> {
        {
            let mut state = self.state.borrow_mut();
            if state.ready_state != ReadyState::Opened || state.sent {
                return Err(HostError::InvalidState);
            }
            if self.fail_send.get() {
                return Err(HostError::Network("send failed".to_string()));
            }
            state.sent = true;
            state.body = body;
        }

        let auto_response = self.auto_response.borrow_mut().take();
        if let Some((status, body)) = auto_response {
            self.respond(status, &body);
        }
        Ok(())
    }

    fn abort(&self) {
        self.abort_calls.set(self.abort_calls.get() + 1);
        let in_flight = {
            let state = self.state.borrow();
            state.sent && state.ready_state != ReadyState::Done
        };
        if in_flight {
            self.host_abort();
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.state.borrow().ready_state
    }

    fn status(&self) -> Option<u16> {
        self.state.borrow().status
    }

    fn response(&self) -> Option<Payload> {
        let state = self.state.borrow();
        if self.is_legacy() || state.ready_state != ReadyState::Done {
            return None;
        }
        match state.response_type {
            Some(ResponseType::Json) => Some(Payload::Json(
                serde_json::from_str(&state.response_text).unwrap_or(Value::Null),
            )),
            _ => Some(Payload::Text(state.response_text.clone())),
        }
    }

    fn response_text(&self) -> String {
        self.state.borrow().response_text.clone()
    }
}

struct SimScript {
    src: String,
    async_: bool,
    attached: bool,
    handlers: HashMap<EventKind, EventHandler>,
}

/// Script document whose scripts load on command
#[derive(Default)]
pub struct SimDocument {
    next_id: Cell<u32>,
    scripts: RefCell<HashMap<ScriptId, SimScript>>,
    removed: Cell<usize>,
}

impl SimDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts currently in the document, oldest first
    pub fn scripts(&self) -> Vec<ScriptId> {
        let mut ids: Vec<ScriptId> = self
            .scripts
            .borrow()
            .iter()
            .filter(|(_, script)| script.attached)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    pub fn last_script(&self) -> Option<ScriptId> {
        self.scripts().last().copied()
    }

    pub fn src(&self, script: ScriptId) -> Option<String> {
        self.scripts.borrow().get(&script).map(|s| s.src.clone())
    }

    pub fn is_async(&self, script: ScriptId) -> Option<bool> {
        self.scripts.borrow().get(&script).map(|s| s.async_)
    }

    /// Whether the element still exists (attached or not)
    pub fn contains(&self, script: ScriptId) -> bool {
        self.scripts.borrow().contains_key(&script)
    }

    pub fn handler_count(&self, script: ScriptId) -> usize {
        self.scripts
            .borrow()
            .get(&script)
            .map(|s| s.handlers.len())
            .unwrap_or(0)
    }

    /// Elements destroyed through `remove_script`
    pub fn removed_count(&self) -> usize {
        self.removed.get()
    }

    /// Run the script, calling the callback referenced in its URL with
    /// `payload` (if any), then fire `load`
    pub fn load(&self, script: ScriptId, payload: Option<Value>) {
        if let (Some(payload), Some(src)) = (payload, self.src(script)) {
            let invoked = src
                .split(['?', '&', '=', '/'])
                .any(|token| registry::invoke(token, payload.clone()));
            if !invoked {
                tracing::warn!(%src, "Script references no registered callback");
            }
        }
        self.dispatch(script, EventKind::Load);
    }

    /// Fire `error` (fetch failure)
    pub fn fail(&self, script: ScriptId) {
        self.dispatch(script, EventKind::Error);
    }

    /// Fire an arbitrary event on the script element
    pub fn dispatch_event(&self, script: ScriptId, event: PlatformEvent) {
        let handler = self
            .scripts
            .borrow()
            .get(&script)
            .and_then(|s| s.handlers.get(&event.kind).cloned());
        if let Some(handler) = handler {
            handler(&event);
        }
    }

    fn dispatch(&self, script: ScriptId, kind: EventKind) {
        self.dispatch_event(script, PlatformEvent::new(kind));
    }
}

impl ScriptDocument for SimDocument {
    fn create_script(&self, src: &str, async_: bool) -> Result<ScriptId, HostError> {
        let id = ScriptId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.scripts.borrow_mut().insert(
            id,
            SimScript {
                src: src.to_string(),
                async_,
                attached: false,
                handlers: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn set_script_handler(&self, script: ScriptId, kind: EventKind, handler: Option<EventHandler>) {
        if let Some(entry) = self.scripts.borrow_mut().get_mut(&script) {
            match handler {
                Some(handler) => {
                    entry.handlers.insert(kind, handler);
                }
                None => {
                    entry.handlers.remove(&kind);
                }
            }
        }
    }

    fn append_script(&self, script: ScriptId) -> Result<(), HostError> {
        match self.scripts.borrow_mut().get_mut(&script) {
            Some(entry) => {
                entry.attached = true;
                Ok(())
            }
            None => Err(HostError::InvalidState),
        }
    }

    fn remove_script(&self, script: ScriptId) {
        if self.scripts.borrow_mut().remove(&script).is_some() {
            self.removed.set(self.removed.get() + 1);
        }
    }
}
