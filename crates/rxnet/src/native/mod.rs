//! Native Host
//!
//! Real HTTP behind the host interfaces. Each request is fetched with a
//! blocking `reqwest` client on its own worker thread; completions come back
//! over a channel and are dispatched on the thread that calls
//! [`NativeHost::run`], so handlers always run on the event-loop thread.

mod document;
mod transport;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::thread;

use smol::channel::{Receiver, Sender};

use crate::capabilities::{TransportCapabilities, TransportTier};
use crate::config::Config;
use crate::error::HostError;
use crate::transport::{Host, ScriptDocument, ScriptId, TransportRef};

pub use document::NativeDocument;
pub use transport::NativeTransport;

/// Host backed by `reqwest`
pub struct NativeHost {
    client: reqwest::blocking::Client,
    reactor: Rc<Reactor>,
    document: Rc<NativeDocument>,
}

impl NativeHost {
    /// Build the HTTP client from `config`
    pub fn new(config: &Config) -> Result<Self, HostError> {
        let mut builder = reqwest::blocking::Client::builder().user_agent(config.user_agent.as_str());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| HostError::Network(e.to_string()))?;

        let reactor = Rc::new(Reactor::new());
        let document = NativeDocument::new(client.clone(), reactor.clone());

        Ok(Self {
            client,
            reactor,
            document,
        })
    }

    /// Requests whose completion has not been dispatched yet
    pub fn pending(&self) -> usize {
        self.reactor.pending.borrow().len()
    }

    /// Dispatch completions until nothing is in flight
    pub fn run(&self) {
        while self.pending() > 0 {
            match smol::block_on(self.reactor.receiver.recv()) {
                Ok(completion) => self.reactor.dispatch(completion),
                Err(_) => break,
            }
        }
    }

    pub fn native_document(&self) -> Rc<NativeDocument> {
        self.document.clone()
    }
}

impl Host for NativeHost {
    fn detect(&self) -> TransportCapabilities {
        TransportCapabilities::full()
    }

    fn create_transport(&self, tier: TransportTier) -> Result<TransportRef, HostError> {
        tracing::trace!(?tier, "Creating native transport");
        let transport: TransportRef = NativeTransport::new(self.client.clone(), self.reactor.clone());
        Ok(transport)
    }

    fn document(&self) -> Option<Rc<dyn ScriptDocument>> {
        let document: Rc<dyn ScriptDocument> = self.document.clone();
        Some(document)
    }
}

/// Outcome of one background fetch
#[derive(Debug)]
pub(crate) struct Fetched {
    pub status: u16,
    pub body: String,
}

pub(crate) type FetchOutcome = Result<Fetched, String>;

struct Completion {
    id: u64,
    outcome: FetchOutcome,
}

enum Pending {
    Transport(Weak<NativeTransport>),
    Script(Weak<NativeDocument>, ScriptId),
}

/// A request ready to leave the event-loop thread
pub(crate) struct FetchJob {
    pub method: reqwest::Method,
    pub url: url::Url,
    pub headers: Vec<(String, String)>,
    pub credentials: Option<(String, Option<String>)>,
    pub body: Option<String>,
}

impl FetchJob {
    pub fn get(url: url::Url) -> Self {
        Self {
            method: reqwest::Method::GET,
            url,
            headers: Vec::new(),
            credentials: None,
            body: None,
        }
    }

    /// Perform the request on the current thread
    pub fn run(self, client: &reqwest::blocking::Client) -> FetchOutcome {
        let mut request = client.request(self.method, self.url);
        for (name, value) in self.headers {
            request = request.header(name, value);
        }
        if let Some((user, password)) = self.credentials {
            request = request.basic_auth(user, password);
        }
        if let Some(body) = self.body {
            request = request.body(body);
        }

        let response = request.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| e.to_string())?;
        Ok(Fetched { status, body })
    }
}

/// Completion queue shared by transports and the document
pub(crate) struct Reactor {
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    next_id: Cell<u64>,
    pending: RefCell<HashMap<u64, Pending>>,
}

impl Reactor {
    fn new() -> Self {
        let (sender, receiver) = smol::channel::unbounded();
        Self {
            sender,
            receiver,
            next_id: Cell::new(1),
            pending: RefCell::new(HashMap::new()),
        }
    }

    fn spawn(&self, client: &reqwest::blocking::Client, job: FetchJob, pending: Pending) -> Result<u64, HostError> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let client = client.clone();
        let sender = self.sender.clone();
        thread::Builder::new()
            .name(format!("rxnet-fetch-{id}"))
            .spawn(move || {
                let outcome = job.run(&client);
                // The receiver is gone once the host is dropped
                let _ = sender.send_blocking(Completion { id, outcome });
            })
            .map_err(|e| HostError::Network(e.to_string()))?;

        self.pending.borrow_mut().insert(id, pending);
        Ok(id)
    }

    pub(crate) fn spawn_transport(
        &self,
        client: &reqwest::blocking::Client,
        job: FetchJob,
        transport: Weak<NativeTransport>,
    ) -> Result<u64, HostError> {
        self.spawn(client, job, Pending::Transport(transport))
    }

    pub(crate) fn spawn_script(
        &self,
        client: &reqwest::blocking::Client,
        job: FetchJob,
        document: Weak<NativeDocument>,
        script: ScriptId,
    ) -> Result<u64, HostError> {
        self.spawn(client, job, Pending::Script(document, script))
    }

    /// Forget a request; its completion will be dropped
    pub(crate) fn cancel(&self, id: u64) {
        self.pending.borrow_mut().remove(&id);
    }

    fn dispatch(&self, completion: Completion) {
        let pending = self.pending.borrow_mut().remove(&completion.id);
        match pending {
            Some(Pending::Transport(transport)) => {
                if let Some(transport) = transport.upgrade() {
                    transport.complete(completion.outcome);
                }
            }
            Some(Pending::Script(document, script)) => {
                if let Some(document) = document.upgrade() {
                    document.complete(script, completion.outcome);
                }
            }
            None => tracing::trace!(id = completion.id, "Dropping completion of cancelled request"),
        }
    }
}

/// Parse an absolute URL the way the transport and document require
pub(crate) fn parse_url(url: &str) -> Result<url::Url, HostError> {
    url::Url::parse(url).map_err(|e| HostError::InvalidUrl(format!("{url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert!(parse_url("http://127.0.0.1:8080/products").is_ok());
        assert!(matches!(parse_url("/products"), Err(HostError::InvalidUrl(_))));
    }

    #[test]
    fn test_native_capabilities() {
        let host = NativeHost::new(&Config::default()).unwrap();
        let caps = host.detect();
        assert!(caps.supports_credentialed_cors);
        assert!(caps.supports_upload_progress);
        assert!(host.document().is_some());
        assert_eq!(host.pending(), 0);
        host.run();
    }
}
