//! Transport abstraction for portal message delivery.
//!
//! The core never performs network I/O itself; it publishes opaque
//! payloads through a [`PortalTransport`] and pumps a single envelope
//! stream per subscription. Delivery is at-least-once and ordered per
//! sender; nothing is guaranteed across senders.

use crate::message::PortalId;
use async_trait::async_trait;
use conclave_text::SiteId;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Connectivity change for one peer of a portal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// One item on a subscriber's stream: either a peer's message or a
/// connectivity event. Merging both into one stream keeps their relative
/// order observable by the portal.
#[derive(Clone, Debug)]
pub enum Envelope {
    Delivery { from: SiteId, payload: Vec<u8> },
    Connectivity { site: SiteId, event: ConnectionEvent },
}

/// Transport error type.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("not subscribed to portal {0}")]
    NotSubscribed(PortalId),
}

/// Abstract portal-scoped publish/subscribe transport.
#[async_trait]
pub trait PortalTransport: Send + Sync + 'static {
    /// Broadcast a payload to every other subscriber of the portal.
    async fn publish(
        &self,
        portal: &PortalId,
        from: SiteId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Subscribe as `site`, announcing it to existing subscribers.
    fn subscribe(&self, portal: &PortalId, site: SiteId) -> mpsc::UnboundedReceiver<Envelope>;

    /// Drop `site` from the portal, surfacing a Disconnected event to the
    /// remaining subscribers.
    fn disconnect(&self, portal: &PortalId, site: SiteId);
}

struct Subscriber {
    site: SiteId,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// In-memory transport for tests and simulation. Per-subscriber unbounded
/// queues preserve per-sender ordering without blocking the event loop.
#[derive(Default)]
pub struct MemoryBus {
    topics: RwLock<HashMap<PortalId, Vec<Subscriber>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a portal (test observability).
    pub fn subscriber_count(&self, portal: &PortalId) -> usize {
        self.topics
            .read()
            .get(portal)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PortalTransport for MemoryBus {
    async fn publish(
        &self,
        portal: &PortalId,
        from: SiteId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let topics = self.topics.read();
        let Some(subscribers) = topics.get(portal) else {
            return Err(TransportError::NotSubscribed(portal.clone()));
        };
        for subscriber in subscribers.iter().filter(|s| s.site != from) {
            let _ = subscriber.tx.send(Envelope::Delivery {
                from,
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn subscribe(&self, portal: &PortalId, site: SiteId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.write();
        let subscribers = topics.entry(portal.clone()).or_default();
        for existing in subscribers.iter() {
            let _ = existing.tx.send(Envelope::Connectivity {
                site,
                event: ConnectionEvent::Connected,
            });
        }
        subscribers.push(Subscriber { site, tx });
        rx
    }

    fn disconnect(&self, portal: &PortalId, site: SiteId) {
        let mut topics = self.topics.write();
        let Some(subscribers) = topics.get_mut(portal) else {
            return;
        };
        subscribers.retain(|s| s.site != site);
        for remaining in subscribers.iter() {
            let _ = remaining.tx.send(Envelope::Connectivity {
                site,
                event: ConnectionEvent::Disconnected,
            });
        }
        if subscribers.is_empty() {
            topics.remove(portal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_skips_the_sender() {
        let bus = MemoryBus::new();
        let portal = PortalId::new("p");
        let mut rx1 = bus.subscribe(&portal, SiteId(1));
        let mut rx2 = bus.subscribe(&portal, SiteId(2));

        bus.publish(&portal, SiteId(1), b"hi".to_vec()).await.unwrap();

        match rx2.recv().await {
            Some(Envelope::Delivery { from, payload }) => {
                assert_eq!(from, SiteId(1));
                assert_eq!(payload, b"hi");
            }
            other => panic!("expected delivery, got {:?}", other),
        }
        // Site 1 sees site 2's join announcement but not its own publish.
        match rx1.try_recv() {
            Ok(Envelope::Connectivity { site, event }) => {
                assert_eq!(site, SiteId(2));
                assert_eq!(event, ConnectionEvent::Connected);
            }
            other => panic!("expected connectivity, got {:?}", other),
        }
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_subscribers() {
        let bus = MemoryBus::new();
        let portal = PortalId::new("p");
        let mut rx1 = bus.subscribe(&portal, SiteId(1));
        let _rx2 = bus.subscribe(&portal, SiteId(2));

        bus.disconnect(&portal, SiteId(2));

        // First the join announcement, then the disconnect.
        match rx1.recv().await {
            Some(Envelope::Connectivity { site, event }) => {
                assert_eq!(site, SiteId(2));
                assert_eq!(event, ConnectionEvent::Connected);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
        match rx1.recv().await {
            Some(Envelope::Connectivity { site, event }) => {
                assert_eq!(site, SiteId(2));
                assert_eq!(event, ConnectionEvent::Disconnected);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
        assert_eq!(bus.subscriber_count(&portal), 1);
    }
}
