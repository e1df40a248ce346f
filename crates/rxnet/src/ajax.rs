//! Ajax Executor
//!
//! One `AjaxRequest` per subscription drives a transport handle through
//! `Idle → Opened → Sent → Progressing* → Completed | Errored | Aborted`.
//! Handlers are wired per capability tier; whichever fires first with a
//! terminal outcome wins and every later notification is ignored.

use std::cell::Cell;
use std::rc::Rc;

use crate::capabilities::{CapabilityCache, TransportCapabilities, TransportTier};
use crate::envelope::{self, ResponseEnvelope};
use crate::error::{AjaxError, ErrorKind, HostError};
use crate::observable::{Notification, Observable, Subscriber, Teardown};
use crate::settings::{Body, RequestSettings, ResponseType};
use crate::transport::{
    Credentials, EventHandler, EventKind, EventTarget, Host, PlatformEvent, ReadyState, TransportRef,
};

/// Request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Opened,
    Sent,
    Progressing,
    Completed,
    Errored,
    Aborted,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Errored | RequestState::Aborted)
    }
}

const REQUEST_EVENTS: [EventKind; 5] = [
    EventKind::Load,
    EventKind::Error,
    EventKind::Abort,
    EventKind::Progress,
    EventKind::ReadyStateChange,
];

const UPLOAD_EVENTS: [EventKind; 4] = [
    EventKind::Load,
    EventKind::Error,
    EventKind::Abort,
    EventKind::Progress,
];

/// Cold stream issuing one request per subscription
pub(crate) fn execute(
    host: Rc<dyn Host>,
    capabilities: Rc<CapabilityCache>,
    settings: RequestSettings,
) -> Observable<ResponseEnvelope> {
    let settings = Rc::new(settings);

    Observable::new(move |subscriber: Subscriber<ResponseEnvelope>| {
        let caps = capabilities.get_or_detect(host.as_ref());

        let tier = match TransportTier::select(caps, settings.cross_domain) {
            Ok(tier) => tier,
            Err(err) => {
                tracing::debug!(url = %settings.url, "Cross-domain request without a capable transport");
                subscriber.error(err);
                return Teardown::noop();
            }
        };

        let handle = match host.create_transport(tier) {
            Ok(handle) => handle,
            Err(err) => {
                subscriber.error(AjaxError::TransportUnavailable(err));
                return Teardown::noop();
            }
        };

        tracing::debug!(method = settings.method.as_str(), url = %settings.url, ?tier, "Ajax request");

        let request = Rc::new(AjaxRequest {
            settings: settings.clone(),
            handle,
            tier,
            state: Cell::new(RequestState::Idle),
            upload_settled: Cell::new(false),
            subscriber,
        });

        if let Err(err) = request.start(caps) {
            request.fail(err);
        }

        Teardown::new(move || request.cancel())
    })
}

struct AjaxRequest {
    settings: Rc<RequestSettings>,
    handle: TransportRef,
    tier: TransportTier,
    state: Cell<RequestState>,
    upload_settled: Cell<bool>,
    subscriber: Subscriber<ResponseEnvelope>,
}

impl AjaxRequest {
    /// Open, configure, wire and send. Any error is the request's failure.
    fn start(self: &Rc<Self>, caps: TransportCapabilities) -> Result<(), AjaxError> {
        let settings = &self.settings;

        let credentials = settings.user.as_deref().map(|user| Credentials {
            user,
            password: settings.password.as_deref(),
        });
        self.handle
            .open(settings.method.as_str(), &settings.url, settings.async_, credentials)
            .map_err(AjaxError::Host)?;
        self.state.set(RequestState::Opened);

        for (name, value) in &settings.headers {
            self.handle.set_request_header(name, value).map_err(AjaxError::Host)?;
        }

        if self.tier.is_event_driven() {
            self.wire_events();
        } else {
            self.on(EventTarget::Request, EventKind::ReadyStateChange, |request, event| {
                request.on_ready_state_change(event)
            });
        }

        if let Some(response_type) = settings.response_type {
            self.apply_response_type(response_type)?;
        }

        if settings.upload_observer.is_some() && self.tier.has_upload_events(caps) {
            self.wire_upload_events();
        }

        let body = self.prepare_body()?;

        self.state.set(RequestState::Sent);
        self.handle.send(body).map_err(AjaxError::Host)
    }

    fn wire_events(self: &Rc<Self>) {
        self.on(EventTarget::Request, EventKind::Load, |request, event| request.on_load(event));
        self.on(EventTarget::Request, EventKind::Progress, |request, event| {
            request.on_progress(event)
        });
        self.on(EventTarget::Request, EventKind::Error, |request, event| {
            request.on_failure(event, ErrorKind::NetworkError)
        });
        self.on(EventTarget::Request, EventKind::Abort, |request, event| {
            request.on_failure(event, ErrorKind::Aborted)
        });
    }

    fn wire_upload_events(self: &Rc<Self>) {
        self.on(EventTarget::Upload, EventKind::Progress, |request, event| {
            request.notify_upload(Notification::Next(event.clone()))
        });
        self.on(EventTarget::Upload, EventKind::Load, |request, _| {
            request.notify_upload(Notification::Completed)
        });
        self.on(EventTarget::Upload, EventKind::Error, |request, event| {
            let envelope = envelope::to_error(event, &request.handle, ErrorKind::NetworkError);
            request.notify_upload(Notification::Error(envelope.into_error()))
        });
        self.on(EventTarget::Upload, EventKind::Abort, |request, event| {
            let envelope = envelope::to_error(event, &request.handle, ErrorKind::Aborted);
            request.notify_upload(Notification::Error(envelope.into_error()))
        });
    }

    fn on(self: &Rc<Self>, target: EventTarget, kind: EventKind, f: fn(&AjaxRequest, &PlatformEvent)) {
        let request = self.clone();
        let handler: EventHandler = Rc::new(move |event: &PlatformEvent| f(&request, event));
        self.handle.set_handler(target, kind, Some(handler));
    }

    fn apply_response_type(&self, response_type: ResponseType) -> Result<(), AjaxError> {
        match self.handle.set_response_type(response_type) {
            Ok(()) => Ok(()),
            Err(err) if response_type == ResponseType::Json => {
                tracing::debug!(%err, "Host rejected json response type, parsing text instead");
                Ok(())
            }
            Err(source) => Err(AjaxError::UnsupportedResponseType {
                response_type: response_type.as_str().to_string(),
                source,
            }),
        }
    }

    fn prepare_body(&self) -> Result<Option<String>, AjaxError> {
        match &self.settings.body {
            None => Ok(None),
            Some(Body::Text(text)) => Ok(Some(text.clone())),
            Some(Body::Json(value)) => {
                if self.settings.content_type().is_none() {
                    self.handle
                        .set_request_header("Content-Type", "application/json")
                        .map_err(AjaxError::Host)?;
                } else if !self.settings.declares_json() {
                    tracing::warn!(
                        content_type = self.settings.content_type().unwrap_or_default(),
                        "Structured body sent as JSON under a non-JSON content type"
                    );
                }
                Ok(Some(serde_json::to_string(value)?))
            }
        }
    }

    fn on_load(&self, event: &PlatformEvent) {
        if self.state.get().is_terminal() {
            return;
        }
        match envelope::to_response(event, &self.handle, &self.settings) {
            Ok(response) => {
                self.state.set(RequestState::Completed);
                tracing::trace!(status = response.status, url = %self.settings.url, "Ajax request completed");
                self.notify_progress(Notification::Completed);
                self.subscriber.next(response);
                self.subscriber.complete();
            }
            Err(err) => self.fail(err),
        }
    }

    fn on_ready_state_change(&self, event: &PlatformEvent) {
        if self.handle.ready_state() != ReadyState::Done || self.state.get().is_terminal() {
            return;
        }
        if envelope::is_success_status(self.handle.status()) {
            self.on_load(event);
        } else {
            self.on_failure(event, ErrorKind::NetworkError);
        }
    }

    fn on_progress(&self, event: &PlatformEvent) {
        if self.state.get().is_terminal() {
            return;
        }
        self.state.set(RequestState::Progressing);
        self.notify_progress(Notification::Next(event.clone()));
    }

    fn on_failure(&self, event: &PlatformEvent, kind: ErrorKind) {
        if self.state.get().is_terminal() {
            return;
        }
        self.fail(envelope::to_error(event, &self.handle, kind).into_error());
    }

    fn fail(&self, err: AjaxError) {
        if self.state.replace(RequestState::Errored).is_terminal() {
            return;
        }
        tracing::debug!(%err, url = %self.settings.url, "Ajax request failed");
        if let Some(observer) = &self.settings.progress_observer {
            observer.notify(Notification::Error(self.progress_error(&err)));
        }
        self.subscriber.error(err);
    }

    /// Progress observers get their own copy of the failure
    fn progress_error(&self, err: &AjaxError) -> AjaxError {
        match err.envelope() {
            Some(envelope) => envelope.clone().into_error(),
            None => AjaxError::Host(HostError::Network(err.to_string())),
        }
    }

    fn notify_progress(&self, notification: Notification<PlatformEvent>) {
        if let Some(observer) = &self.settings.progress_observer {
            observer.notify(notification);
        }
    }

    fn notify_upload(&self, notification: Notification<PlatformEvent>) {
        if self.state.get().is_terminal() || self.upload_settled.get() {
            return;
        }
        if notification.is_terminal() {
            self.upload_settled.set(true);
        }
        if let Some(observer) = &self.settings.upload_observer {
            observer.notify(notification);
        }
    }

    /// Teardown: abort if still in flight, then drop every handler
    fn cancel(&self) {
        let state = self.state.get();
        if !state.is_terminal() {
            self.state.set(RequestState::Aborted);
            if self.handle.ready_state() != ReadyState::Done {
                tracing::debug!(url = %self.settings.url, "Aborting in-flight request");
                self.handle.abort();
            }
        }
        self.detach();
    }

    fn detach(&self) {
        for kind in REQUEST_EVENTS {
            self.handle.set_handler(EventTarget::Request, kind, None);
        }
        for kind in UPLOAD_EVENTS {
            self.handle.set_handler(EventTarget::Upload, kind, None);
        }
    }
}
