//! Native Script Document
//!
//! Script elements are fetched in the background. A successful fetch is
//! "executed" by handing the body to the callback registry, which understands
//! the `reference(<json>)` shape JSONP endpoints return.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::{parse_url, FetchJob, FetchOutcome, Reactor};
use crate::error::HostError;
use crate::jsonp::registry;
use crate::transport::{EventHandler, EventKind, PlatformEvent, ScriptDocument, ScriptId};

struct NativeScript {
    src: String,
    request_id: Option<u64>,
    handlers: HashMap<EventKind, EventHandler>,
}

/// Script document that fetches and evaluates JSONP responses
pub struct NativeDocument {
    this: Weak<NativeDocument>,
    client: reqwest::blocking::Client,
    reactor: Rc<Reactor>,
    next_id: Cell<u32>,
    scripts: RefCell<HashMap<ScriptId, NativeScript>>,
}

impl NativeDocument {
    pub(crate) fn new(client: reqwest::blocking::Client, reactor: Rc<Reactor>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            client,
            reactor,
            next_id: Cell::new(0),
            scripts: RefCell::new(HashMap::new()),
        })
    }

    /// Number of script elements alive
    pub fn script_count(&self) -> usize {
        self.scripts.borrow().len()
    }

    pub(crate) fn complete(&self, script: ScriptId, outcome: FetchOutcome) {
        let src = match self.scripts.borrow_mut().get_mut(&script) {
            Some(entry) => {
                entry.request_id = None;
                entry.src.clone()
            }
            None => return,
        };

        let kind = match outcome {
            Ok(fetched) if (200..300).contains(&fetched.status) => {
                if !registry::evaluate_script(&fetched.body) {
                    tracing::debug!(%src, "Script did not invoke a registered callback");
                }
                EventKind::Load
            }
            Ok(fetched) => {
                tracing::debug!(%src, status = fetched.status, "Script fetch rejected");
                EventKind::Error
            }
            Err(err) => {
                tracing::debug!(%src, %err, "Script fetch failed");
                EventKind::Error
            }
        };

        let handler = self
            .scripts
            .borrow()
            .get(&script)
            .and_then(|entry| entry.handlers.get(&kind).cloned());
        if let Some(handler) = handler {
            handler(&PlatformEvent::new(kind));
        }
    }
}

impl ScriptDocument for NativeDocument {
    fn create_script(&self, src: &str, _async_: bool) -> Result<ScriptId, HostError> {
        let id = ScriptId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.scripts.borrow_mut().insert(
            id,
            NativeScript {
                src: src.to_string(),
                request_id: None,
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
        let src = self
            .scripts
            .borrow()
            .get(&script)
            .map(|entry| entry.src.clone())
            .ok_or(HostError::InvalidState)?;
        let url = parse_url(&src)?;

        let id = self
            .reactor
            .spawn_script(&self.client, FetchJob::get(url), self.this.clone(), script)?;
        if let Some(entry) = self.scripts.borrow_mut().get_mut(&script) {
            entry.request_id = Some(id);
        }
        tracing::trace!(%src, "Script appended");
        Ok(())
    }

    fn remove_script(&self, script: ScriptId) {
        let removed = self.scripts.borrow_mut().remove(&script);
        if let Some(request_id) = removed.and_then(|entry| entry.request_id) {
            self.reactor.cancel(request_id);
        }
    }
}
