//! Application entry point: create or join portals over a service and a
//! transport.

use crate::error::Result;
use crate::message::PortalId;
use crate::portal::Portal;
use crate::service::SessionService;
use crate::transport::PortalTransport;
use std::sync::Arc;

/// One application instance's handle on the collaboration system. Cheap
/// to clone; portals created through it share its service and transport.
#[derive(Clone)]
pub struct PortalClient {
    service: Arc<dyn SessionService>,
    transport: Arc<dyn PortalTransport>,
}

impl PortalClient {
    pub fn new(service: Arc<dyn SessionService>, transport: Arc<dyn PortalTransport>) -> Self {
        Self { service, transport }
    }

    /// Host a new portal and register it for joining.
    pub async fn create_portal(&self) -> Result<Arc<Portal>> {
        let portal = Portal::host(self.transport.clone());
        self.service.register_portal(&portal).await;
        tracing::info!(portal = %portal.id(), "hosting portal");
        Ok(portal)
    }

    /// Join an existing portal as a guest.
    pub async fn join_portal(&self, id: &PortalId) -> Result<Arc<Portal>> {
        let response = self.service.join_portal(id).await?;
        let portal = Portal::guest(
            id.clone(),
            response.site_id,
            response.snapshot,
            response.subscription,
            self.transport.clone(),
        )?;
        tracing::info!(portal = %id, site = %response.site_id, "joined portal");
        Ok(portal)
    }
}
