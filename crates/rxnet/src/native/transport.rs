//! Native Transport Handle

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::{parse_url, FetchJob, FetchOutcome, Reactor};
use crate::error::HostError;
use crate::settings::ResponseType;
use crate::transport::{
    Credentials, EventHandler, EventKind, EventTarget, Payload, PlatformEvent, ReadyState, TransportHandle,
};

#[derive(Debug, Default)]
struct NativeState {
    ready_state: ReadyState,
    method: Option<reqwest::Method>,
    url: Option<url::Url>,
    async_: bool,
    credentials: Option<(String, Option<String>)>,
    headers: Vec<(String, String)>,
    response_type: ResponseType,
    sent: bool,
    upload_size: Option<u64>,
    request_id: Option<u64>,
    status: Option<u16>,
    response_text: String,
}

/// One HTTP request executed by a worker thread
pub struct NativeTransport {
    this: Weak<NativeTransport>,
    client: reqwest::blocking::Client,
    reactor: Rc<Reactor>,
    state: RefCell<NativeState>,
    handlers: RefCell<HashMap<(EventTarget, EventKind), EventHandler>>,
}

impl NativeTransport {
    pub(crate) fn new(client: reqwest::blocking::Client, reactor: Rc<Reactor>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            client,
            reactor,
            state: RefCell::new(NativeState::default()),
            handlers: RefCell::new(HashMap::new()),
        })
    }

    /// Apply a finished fetch and fire the events a browser would
    pub(crate) fn complete(&self, outcome: FetchOutcome) {
        match outcome {
            Ok(fetched) => {
                let (upload_size, received) = {
                    let mut state = self.state.borrow_mut();
                    state.ready_state = ReadyState::Done;
                    state.request_id = None;
                    state.status = Some(fetched.status);
                    state.response_text = fetched.body;
                    (state.upload_size, state.response_text.len() as u64)
                };
                tracing::debug!(status = fetched.status, bytes = received, "Native request finished");

                if let Some(size) = upload_size {
                    self.dispatch(EventTarget::Upload, PlatformEvent::progress(size, Some(size)));
                    self.dispatch(EventTarget::Upload, PlatformEvent::new(EventKind::Load));
                }
                self.dispatch(EventTarget::Request, PlatformEvent::progress(received, Some(received)));
                self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::ReadyStateChange));
                self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::Load));
            }
            Err(err) => {
                tracing::debug!(%err, "Native request failed");
                self.settle_failed();
                self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::ReadyStateChange));
                self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::Error));
            }
        }
    }

    fn settle_failed(&self) {
        let mut state = self.state.borrow_mut();
        state.ready_state = ReadyState::Done;
        state.request_id = None;
        state.status = Some(0);
    }

    fn dispatch(&self, target: EventTarget, event: PlatformEvent) {
        let handler = self.handlers.borrow().get(&(target, event.kind)).cloned();
        if let Some(handler) = handler {
            handler(&event);
        }
    }
}

impl TransportHandle for NativeTransport {
    fn open(
        &self,
        method: &str,
        url: &str,
        async_: bool,
        credentials: Option<Credentials<'_>>,
    ) -> Result<(), HostError> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| HostError::Unsupported(format!("method {method}")))?;
        let url = parse_url(url)?;

        let mut state = self.state.borrow_mut();
        *state = NativeState {
            ready_state: ReadyState::Opened,
            method: Some(method),
            url: Some(url),
            async_,
            credentials: credentials.map(|c| (c.user.to_string(), c.password.map(str::to_string))),
            ..Default::default()
        };
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
        match response_type {
            ResponseType::Text | ResponseType::Json => {
                self.state.borrow_mut().response_type = response_type;
                Ok(())
            }
            other => Err(HostError::ResponseTypeRejected(other.as_str().to_string())),
        }
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
        let (job, async_) = {
            let mut state = self.state.borrow_mut();
            if state.ready_state != ReadyState::Opened || state.sent {
                return Err(HostError::InvalidState);
            }
            let (Some(method), Some(url)) = (state.method.clone(), state.url.clone()) else {
                return Err(HostError::InvalidState);
            };
            state.sent = true;
            state.upload_size = body.as_ref().map(|b| b.len() as u64);
            let job = FetchJob {
                method,
                url,
                headers: state.headers.clone(),
                credentials: state.credentials.clone(),
                body,
            };
            (job, state.async_)
        };

        tracing::debug!(method = %job.method, url = %job.url, async_, "Native request sent");

        if async_ {
            let id = self.reactor.spawn_transport(&self.client, job, self.this.clone())?;
            self.state.borrow_mut().request_id = Some(id);
        } else {
            self.complete(job.run(&self.client));
        }
        Ok(())
    }

    fn abort(&self) {
        let request_id = {
            let state = self.state.borrow();
            if !state.sent || state.ready_state == ReadyState::Done {
                return;
            }
            state.request_id
        };
        if let Some(id) = request_id {
            self.reactor.cancel(id);
        }
        self.settle_failed();
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::ReadyStateChange));
        self.dispatch(EventTarget::Request, PlatformEvent::new(EventKind::Abort));
    }

    fn ready_state(&self) -> ReadyState {
        self.state.borrow().ready_state
    }

    fn status(&self) -> Option<u16> {
        self.state.borrow().status
    }

    fn response(&self) -> Option<Payload> {
        let state = self.state.borrow();
        if state.ready_state != ReadyState::Done {
            return None;
        }
        match state.response_type {
            // An unparsable body leaves no typed response
            ResponseType::Json => serde_json::from_str(&state.response_text).ok().map(Payload::Json),
            _ => Some(Payload::Text(state.response_text.clone())),
        }
    }

    fn response_text(&self) -> String {
        self.state.borrow().response_text.clone()
    }
}
