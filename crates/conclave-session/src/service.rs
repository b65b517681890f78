//! Portal lookup and join arbitration.

use crate::error::{PortalError, Result};
use crate::message::{PortalId, PortalSnapshot};
use crate::portal::Portal;
use crate::transport::Envelope;
use async_trait::async_trait;
use conclave_text::SiteId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// The host's answer to a join request: the guest's assigned site id,
/// the portal state to replicate from, and the guest's envelope stream.
/// The stream was opened before the snapshot was taken, so no message
/// falls between them.
#[derive(Debug)]
pub struct JoinResponse {
    pub site_id: SiteId,
    pub snapshot: PortalSnapshot,
    pub subscription: mpsc::UnboundedReceiver<Envelope>,
}

/// Directory of joinable portals. In production this is a remote service;
/// [`LocalSessionService`] is the in-process implementation.
#[async_trait]
pub trait SessionService: Send + Sync + 'static {
    /// Make a hosted portal discoverable by id.
    async fn register_portal(&self, portal: &Arc<Portal>);

    /// Ask a portal's host to admit a new guest.
    async fn join_portal(&self, id: &PortalId) -> Result<JoinResponse>;
}

/// In-process portal directory. Holds portals weakly so a dropped host
/// portal reads as closed, not as a leak.
#[derive(Default)]
pub struct LocalSessionService {
    portals: RwLock<HashMap<PortalId, Weak<Portal>>>,
}

impl LocalSessionService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for LocalSessionService {
    async fn register_portal(&self, portal: &Arc<Portal>) {
        self.portals
            .write()
            .insert(portal.id().clone(), Arc::downgrade(portal));
    }

    async fn join_portal(&self, id: &PortalId) -> Result<JoinResponse> {
        let host = {
            let portals = self.portals.read();
            let Some(weak) = portals.get(id) else {
                return Err(PortalError::PortalNotFound(id.clone()));
            };
            weak.upgrade()
        };
        let Some(host) = host else {
            return Err(PortalError::PortalClosed(id.clone()));
        };
        let (site_id, snapshot, subscription) = host.admit_guest().await?;
        tracing::debug!(portal = %id, site = %site_id, "admitted guest");
        Ok(JoinResponse {
            site_id,
            snapshot,
            subscription,
        })
    }
}
