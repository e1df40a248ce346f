//! Transport Capability Detection
//!
//! The host is probed once; every executor then reads the cached result and
//! picks one of four wiring tiers from it.

use std::cell::OnceCell;

use crate::error::AjaxError;
use crate::transport::Host;

/// What the host transport supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportCapabilities {
    /// Cross-origin requests with credentials on the plain transport
    pub supports_credentialed_cors: bool,
    /// A separate transport that only does cross-domain requests
    pub supports_legacy_cross_domain: bool,
    /// Load/progress events (download and upload)
    pub supports_upload_progress: bool,
}

impl TransportCapabilities {
    /// Everything a current host offers
    pub fn full() -> Self {
        Self {
            supports_credentialed_cors: true,
            supports_legacy_cross_domain: false,
            supports_upload_progress: true,
        }
    }
}

/// Event-wiring strategy for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportTier {
    /// Same-origin transport with load/progress events
    PlainA,
    /// Plain transport used cross-origin
    CredentialedCors,
    /// Cross-domain-only legacy transport
    LegacyCrossDomain,
    /// Ready-state polling transport
    LegacyPoll,
}

impl TransportTier {
    /// Pick the tier for a request
    pub fn select(capabilities: TransportCapabilities, cross_domain: bool) -> Result<Self, AjaxError> {
        if cross_domain {
            if capabilities.supports_credentialed_cors {
                Ok(TransportTier::CredentialedCors)
            } else if capabilities.supports_legacy_cross_domain {
                Ok(TransportTier::LegacyCrossDomain)
            } else {
                Err(AjaxError::CorsUnsupported)
            }
        } else if capabilities.supports_upload_progress {
            Ok(TransportTier::PlainA)
        } else {
            Ok(TransportTier::LegacyPoll)
        }
    }

    /// Tier A wiring: load/error/abort events. Tier B polls ready state.
    pub fn is_event_driven(&self) -> bool {
        !matches!(self, TransportTier::LegacyPoll)
    }

    /// Whether upload events can be wired for this tier
    pub fn has_upload_events(&self, capabilities: TransportCapabilities) -> bool {
        capabilities.supports_upload_progress
            && matches!(self, TransportTier::PlainA | TransportTier::CredentialedCors)
    }
}

/// Lazily probed, then read-only
#[derive(Debug, Default)]
pub struct CapabilityCache {
    cell: OnceCell<TransportCapabilities>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached capabilities, probing the host on first use
    pub fn get_or_detect(&self, host: &dyn Host) -> TransportCapabilities {
        *self.cell.get_or_init(|| {
            let capabilities = host.detect();
            tracing::debug!(?capabilities, "Transport capabilities detected");
            capabilities
        })
    }

    /// Cached value, if the host was probed already
    pub fn get(&self) -> Option<TransportCapabilities> {
        self.cell.get().copied()
    }
}
