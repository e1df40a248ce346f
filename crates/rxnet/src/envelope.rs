//! Event Normalization
//!
//! Turns raw transport notifications into the two canonical terminal
//! records, whatever tier produced them.

use serde_json::Value;

use crate::error::{AjaxError, ErrorKind};
use crate::settings::{RequestSettings, ResponseType};
use crate::transport::{Payload, PlatformEvent, TransportRef};

/// Successful request result
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub response: Payload,
    pub status: u16,
    pub response_type: String,
    /// Transport that served the request (absent for JSONP)
    pub raw_handle: Option<TransportRef>,
    pub original_event: PlatformEvent,
}

/// Failed request result
#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    /// `NetworkError` or `Aborted`
    pub kind: ErrorKind,
    pub status: u16,
    pub raw_handle: Option<TransportRef>,
    pub original_event: PlatformEvent,
}

impl ErrorEnvelope {
    /// Wrap into the matching `AjaxError` variant
    pub fn into_error(self) -> AjaxError {
        match self.kind {
            ErrorKind::Aborted => AjaxError::Aborted(self),
            _ => AjaxError::Network(self),
        }
    }
}

/// Build the success envelope from a finished transport
pub fn to_response(
    event: &PlatformEvent,
    handle: &TransportRef,
    settings: &RequestSettings,
) -> Result<ResponseEnvelope, AjaxError> {
    let json_requested = settings.response_type == Some(ResponseType::Json);

    let response = match handle.response() {
        // Hosts report an unparsable JSON body as null
        Some(Payload::Json(Value::Null)) if json_requested => Payload::Json(parse_json(&handle.response_text())?),
        Some(Payload::Json(value)) => Payload::Json(value),
        _ if json_requested => Payload::Json(parse_json(&handle.response_text())?),
        Some(payload) => payload,
        None => Payload::Text(handle.response_text()),
    };

    Ok(ResponseEnvelope {
        response,
        status: handle.status().unwrap_or(0),
        response_type: settings
            .response_type
            .map(|rt| rt.as_str().to_string())
            .unwrap_or_default(),
        raw_handle: Some(handle.clone()),
        original_event: event.clone(),
    })
}

/// Build the error envelope for a failed or aborted transport
pub fn to_error(event: &PlatformEvent, handle: &TransportRef, kind: ErrorKind) -> ErrorEnvelope {
    ErrorEnvelope {
        kind,
        status: handle.status().unwrap_or(0),
        raw_handle: Some(handle.clone()),
        original_event: event.clone(),
    }
}

/// Ready-state classification: 200..=300, 0 and no status count as success
pub fn is_success_status(status: Option<u16>) -> bool {
    match status {
        None | Some(0) => true,
        Some(code) => (200..=300).contains(&code),
    }
}

fn parse_json(text: &str) -> Result<Value, AjaxError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::settings::{normalize, RequestOptions};
    use crate::sim::SimTransport;
    use crate::capabilities::TransportTier;
    use crate::transport::{EventKind, TransportHandle};
    use serde_json::json;
    use std::rc::Rc;

    fn finished(tier: TransportTier, status: u16, body: &str, json: bool) -> TransportRef {
        let transport = Rc::new(SimTransport::new(tier));
        if json {
            transport.set_response_type(ResponseType::Json).unwrap();
        }
        transport.respond(status, body);
        transport
    }

    #[test]
    fn test_status_classification() {
        for code in [200, 201, 204, 299, 300] {
            assert!(is_success_status(Some(code)), "{code} should be success");
        }
        assert!(is_success_status(Some(0)));
        assert!(is_success_status(None));
        for code in [100, 199, 301, 304, 404, 500] {
            assert!(!is_success_status(Some(code)), "{code} should fail");
        }
    }

    #[test]
    fn test_structured_response_wins() {
        let handle = finished(TransportTier::PlainA, 200, r#"{"id":1}"#, true);
        let settings = normalize(
            RequestOptions::new("/p").response_type(ResponseType::Json),
            &Config::default(),
        );
        let envelope = to_response(&PlatformEvent::new(EventKind::Load), &handle, &settings).unwrap();

        assert_eq!(envelope.response, Payload::Json(json!({"id": 1})));
        assert_eq!(envelope.status, 200);
        assert_eq!(envelope.response_type, "json");
    }

    #[test]
    fn test_manual_json_parse_for_legacy_transport() {
        let handle = finished(TransportTier::LegacyPoll, 200, r#"[1,2]"#, false);
        let settings = normalize(
            RequestOptions::new("/p").response_type(ResponseType::Json),
            &Config::default(),
        );
        let envelope = to_response(&PlatformEvent::new(EventKind::ReadyStateChange), &handle, &settings).unwrap();
        assert_eq!(envelope.response, Payload::Json(json!([1, 2])));
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let handle = finished(TransportTier::LegacyPoll, 200, "<html>", false);
        let settings = normalize(
            RequestOptions::new("/p").response_type(ResponseType::Json),
            &Config::default(),
        );
        let err = to_response(&PlatformEvent::new(EventKind::Load), &handle, &settings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadParse);
    }

    #[test]
    fn test_structured_null_with_bad_body_is_parse_error() {
        let handle = finished(TransportTier::PlainA, 200, "{not json", true);
        let settings = normalize(
            RequestOptions::new("/p").response_type(ResponseType::Json),
            &Config::default(),
        );
        let err = to_response(&PlatformEvent::new(EventKind::Load), &handle, &settings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadParse);

        let handle = finished(TransportTier::PlainA, 200, "null", true);
        let envelope = to_response(&PlatformEvent::new(EventKind::Load), &handle, &settings).unwrap();
        assert_eq!(envelope.response, Payload::Json(Value::Null));
    }

    #[test]
    fn test_raw_text_without_json() {
        let handle = finished(TransportTier::LegacyPoll, 200, "plain", false);
        let settings = normalize("/p", &Config::default());
        let envelope = to_response(&PlatformEvent::new(EventKind::Load), &handle, &settings).unwrap();
        assert_eq!(envelope.response, Payload::Text("plain".to_string()));
        assert_eq!(envelope.response_type, "");
    }

    #[test]
    fn test_error_envelope() {
        let handle = finished(TransportTier::PlainA, 502, "", false);
        let envelope = to_error(&PlatformEvent::new(EventKind::Error), &handle, ErrorKind::NetworkError);
        assert_eq!(envelope.status, 502);
        assert!(matches!(envelope.into_error(), AjaxError::Network(_)));
    }
}
