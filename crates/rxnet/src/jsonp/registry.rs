//! Callback Slot Registry
//!
//! Table of capture slots that JSONP scripts call into, keyed by
//! `callback_<base36>` identifiers drawn from a process-wide counter. The
//! table itself lives on the event-loop thread: slots are created, invoked
//! and removed there.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

static NEXT_CALLBACK: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static SLOTS: RefCell<HashMap<String, Rc<CallbackSlot>>> = RefCell::new(HashMap::new());
}

/// Capture cell written by an injected script
#[derive(Debug)]
pub struct CallbackSlot {
    id: String,
    called: Cell<bool>,
    data: RefCell<Option<Value>>,
}

impl CallbackSlot {
    fn new(id: String) -> Self {
        Self {
            id,
            called: Cell::new(false),
            data: RefCell::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the script has invoked this slot
    pub fn called(&self) -> bool {
        self.called.get()
    }

    /// Captured payload
    pub fn data(&self) -> Option<Value> {
        self.data.borrow().clone()
    }

    /// Record the script's payload; only the first invocation counts
    pub fn record(&self, payload: Value) {
        if self.called.replace(true) {
            tracing::warn!(id = %self.id, "Callback invoked more than once, keeping first payload");
            return;
        }
        *self.data.borrow_mut() = Some(payload);
    }
}

/// Allocate a fresh identifier; never reused within the process
pub fn next_id() -> String {
    format!("callback_{}", to_base36(NEXT_CALLBACK.fetch_add(1, Ordering::Relaxed)))
}

/// Create and register a slot under a fresh identifier
pub fn register() -> Rc<CallbackSlot> {
    let slot = Rc::new(CallbackSlot::new(next_id()));
    SLOTS.with(|slots| {
        slots.borrow_mut().insert(slot.id.clone(), slot.clone());
    });
    tracing::trace!(id = %slot.id, "Callback slot registered");
    slot
}

pub fn get(id: &str) -> Option<Rc<CallbackSlot>> {
    SLOTS.with(|slots| slots.borrow().get(id).cloned())
}

pub fn remove(id: &str) -> Option<Rc<CallbackSlot>> {
    let removed = SLOTS.with(|slots| slots.borrow_mut().remove(id));
    if removed.is_some() {
        tracing::trace!(%id, "Callback slot removed");
    }
    removed
}

pub fn contains(id: &str) -> bool {
    SLOTS.with(|slots| slots.borrow().contains_key(id))
}

/// Number of live slots
pub fn len() -> usize {
    SLOTS.with(|slots| slots.borrow().len())
}

/// Call the slot a script refers to (`namespace.callback_x` or `callback_x`)
pub fn invoke(reference: &str, payload: Value) -> bool {
    let id = reference.rsplit('.').next().unwrap_or(reference);
    match get(id) {
        Some(slot) => {
            slot.record(payload);
            true
        }
        None => false,
    }
}

/// Evaluate a JSONP response body of the form `reference(<json>);`
///
/// Returns whether a registered slot was invoked.
pub fn evaluate_script(source: &str) -> bool {
    let source = source.trim();
    let source = source.strip_prefix("/**/").unwrap_or(source);
    let source = source.trim_end().trim_end_matches(';').trim_end();

    let Some(open) = source.find('(') else {
        return false;
    };
    let Some(args) = source[open + 1..].strip_suffix(')') else {
        return false;
    };
    let reference = source[..open].trim();
    if reference.is_empty() {
        return false;
    }

    let payload = if args.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str(args) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(%reference, %err, "JSONP argument is not JSON");
                return false;
            }
        }
    };

    invoke(reference, payload)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
