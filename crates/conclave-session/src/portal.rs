//! A portal: one shared workspace with a host site and any number of
//! guest sites.
//!
//! Each portal owns its replicated buffers and editors, tracks
//! membership, and pumps the transport's envelope stream on a background
//! task. All remote state converges through idempotent message handling;
//! redelivered or reordered messages are absorbed rather than failed.

use crate::buffer::BufferProxy;
use crate::editor::EditorProxy;
use crate::error::{PortalError, Result};
use crate::message::{
    BufferSnapshot, EditorId, EditorSnapshot, MembershipStatus, Message, PortalId, PortalSnapshot,
};
use crate::registry::SiteRegistry;
use crate::transport::{ConnectionEvent, Envelope, PortalTransport};
use conclave_text::{SelectionSet, SiteId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle of a portal replica. Host portals move Open to Closed or
/// Disconnected; guest portals move Joining to Active to one of the
/// guest-side terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalState {
    /// Host side, accepting guests.
    Open,
    /// Host side, closed by the host.
    Closed,
    /// This site lost its connection to the portal.
    Disconnected,
    /// Guest side, join in flight.
    Joining,
    /// Guest side, participating.
    Active,
    /// Guest side, left voluntarily.
    Left,
    /// Guest side, host closed the portal.
    HostClosed,
    /// Guest side, lost the connection to the host.
    HostDisconnected,
}

impl PortalState {
    /// Terminal states accept no further operations or messages.
    pub fn is_terminal(self) -> bool {
        !matches!(self, PortalState::Open | PortalState::Joining | PortalState::Active)
    }
}

/// Callbacks into the host application for portal-level events. Held
/// weakly; dropping the delegate silences notifications.
pub trait PortalDelegate: Send + Sync {
    /// The portal's active editor changed, locally or remotely.
    fn did_change_active_editor(&self, editor: Option<Arc<EditorProxy>>);
    /// Guest side: the host closed the portal. Replicas are already torn
    /// down when this fires.
    fn host_closed_portal(&self);
    /// Guest side: the connection to the host was lost. Replicas are
    /// already torn down when this fires.
    fn host_lost_connection(&self);
}

/// One site's handle on a shared portal.
pub struct Portal {
    id: PortalId,
    site: SiteId,
    state: RwLock<PortalState>,
    registry: RwLock<SiteRegistry>,
    buffers: RwLock<HashMap<String, Arc<BufferProxy>>>,
    editors: RwLock<HashMap<EditorId, Arc<EditorProxy>>>,
    active_editor: RwLock<Option<EditorId>>,
    /// An ActiveEditorChanged can outrun the EditorCreated that defines
    /// its target. The id parks here until the editor replica exists.
    pending_active: RwLock<Option<EditorId>>,
    /// Messages referencing a buffer or editor this site has not
    /// replicated yet. Cross-sender delivery is unordered, so a creation
    /// from one sender can trail another sender's messages that depend on
    /// it; these are retried whenever a replica appears.
    deferred: RwLock<Vec<(SiteId, Message)>>,
    next_editor_seq: RwLock<u32>,
    delegate: RwLock<Option<Weak<dyn PortalDelegate>>>,
    transport: Arc<dyn PortalTransport>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Portal {
    /// Open a new portal as its host (site 1).
    pub(crate) fn host(transport: Arc<dyn PortalTransport>) -> Arc<Self> {
        let id = PortalId::generate();
        let rx = transport.subscribe(&id, SiteId::HOST);
        let portal = Arc::new(Self {
            id,
            site: SiteId::HOST,
            state: RwLock::new(PortalState::Open),
            registry: RwLock::new(SiteRegistry::host()),
            buffers: RwLock::new(HashMap::new()),
            editors: RwLock::new(HashMap::new()),
            active_editor: RwLock::new(None),
            pending_active: RwLock::new(None),
            deferred: RwLock::new(Vec::new()),
            next_editor_seq: RwLock::new(1),
            delegate: RwLock::new(None),
            transport,
            pump: Mutex::new(None),
        });
        portal.spawn_pump(rx);
        portal
    }

    /// Join an existing portal as a guest, rebuilding its current state
    /// from the host's snapshot. Buffer replicas are built before the
    /// editors that reference them.
    pub(crate) fn guest(
        id: PortalId,
        site: SiteId,
        snapshot: PortalSnapshot,
        subscription: mpsc::UnboundedReceiver<Envelope>,
        transport: Arc<dyn PortalTransport>,
    ) -> Result<Arc<Self>> {
        let portal = Arc::new(Self {
            id: id.clone(),
            site,
            state: RwLock::new(PortalState::Active),
            registry: RwLock::new(SiteRegistry::guest(site, snapshot.sites)),
            buffers: RwLock::new(HashMap::new()),
            editors: RwLock::new(HashMap::new()),
            active_editor: RwLock::new(snapshot.active_editor),
            pending_active: RwLock::new(None),
            deferred: RwLock::new(Vec::new()),
            next_editor_seq: RwLock::new(1),
            delegate: RwLock::new(None),
            transport: transport.clone(),
            pump: Mutex::new(None),
        });

        for buffer in snapshot.buffers {
            let replica = BufferProxy::replica(
                buffer.uri.clone(),
                buffer.state,
                id.clone(),
                site,
                transport.clone(),
            );
            portal.buffers.write().insert(buffer.uri, replica);
        }
        for editor in snapshot.editors {
            let buffer = portal.buffers.read().get(&editor.buffer_uri).cloned();
            let Some(buffer) = buffer else {
                return Err(PortalError::InvalidSnapshot(editor.buffer_uri));
            };
            let replica =
                EditorProxy::replica(editor, buffer.clone(), id.clone(), site, transport.clone());
            buffer.attach_editor(Arc::downgrade(&replica));
            portal.editors.write().insert(replica.id(), replica);
        }

        portal.spawn_pump(subscription);
        Ok(portal)
    }

    pub fn id(&self) -> &PortalId {
        &self.id
    }

    pub fn site_id(&self) -> SiteId {
        self.site
    }

    pub fn is_host(&self) -> bool {
        self.site == SiteId::HOST
    }

    pub fn state(&self) -> PortalState {
        *self.state.read()
    }

    pub fn active_site_ids(&self) -> Vec<SiteId> {
        self.registry.read().active_sites()
    }

    pub fn membership(&self, site: SiteId) -> Option<MembershipStatus> {
        self.registry.read().status(site)
    }

    /// The current active editor's local replica, if any.
    pub fn active_text_editor(&self) -> Option<Arc<EditorProxy>> {
        let id = (*self.active_editor.read())?;
        self.editors.read().get(&id).cloned()
    }

    pub fn text_buffer(&self, uri: &str) -> Option<Arc<BufferProxy>> {
        self.buffers.read().get(uri).cloned()
    }

    pub fn text_editor(&self, id: EditorId) -> Option<Arc<EditorProxy>> {
        self.editors.read().get(&id).cloned()
    }

    /// Attach the application delegate. The current active editor is
    /// pushed immediately so a late-attached delegate starts in sync.
    pub fn set_delegate(&self, delegate: Arc<dyn PortalDelegate>) {
        *self.delegate.write() = Some(Arc::downgrade(&delegate));
        delegate.did_change_active_editor(self.active_text_editor());
    }

    /// Create (or reuse, by uri) a shared buffer and announce it to the
    /// other sites.
    pub async fn create_text_buffer(&self, uri: &str, text: &str) -> Result<Arc<BufferProxy>> {
        self.ensure_live()?;
        if let Some(existing) = self.buffers.read().get(uri).cloned() {
            return Ok(existing);
        }
        let buffer = BufferProxy::local(
            uri.to_string(),
            text,
            self.id.clone(),
            self.site,
            self.transport.clone(),
        )?;
        self.buffers.write().insert(uri.to_string(), buffer.clone());
        self.publish(Message::BufferCreated {
            uri: uri.to_string(),
            state: buffer.snapshot_state(),
        })
        .await?;
        Ok(buffer)
    }

    /// Create a shared editor over a buffer and announce it.
    pub async fn create_text_editor(
        &self,
        buffer: &Arc<BufferProxy>,
        initial_selections: SelectionSet,
    ) -> Result<Arc<EditorProxy>> {
        self.ensure_live()?;
        let id = {
            let mut next = self.next_editor_seq.write();
            let id = EditorId {
                site: self.site,
                seq: *next,
            };
            *next += 1;
            id
        };
        let editor = EditorProxy::local(
            id,
            buffer.clone(),
            initial_selections,
            self.id.clone(),
            self.site,
            self.transport.clone(),
        );
        buffer.attach_editor(Arc::downgrade(&editor));
        self.editors.write().insert(id, editor.clone());
        let snapshot = editor.snapshot();
        self.publish(Message::EditorCreated {
            id: snapshot.id,
            buffer_uri: snapshot.buffer_uri,
            selections: snapshot.selections,
            selection_seqs: snapshot.selection_seqs,
        })
        .await?;
        Ok(editor)
    }

    /// Switch (or clear) the portal's active editor and announce it. The
    /// local delegate is notified synchronously.
    pub async fn set_active_text_editor(&self, editor: Option<&Arc<EditorProxy>>) -> Result<()> {
        self.ensure_live()?;
        let id = editor.map(|e| e.id());
        self.set_active_locally(id);
        self.publish(Message::ActiveEditorChanged { editor: id }).await
    }

    /// Leave the portal. Hosts close it for everyone; guests depart and
    /// the portal stays up. Idempotent once terminal.
    pub async fn dispose(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            if previous.is_terminal() {
                return Ok(());
            }
            *state = if previous == PortalState::Open {
                PortalState::Closed
            } else {
                PortalState::Left
            };
            previous
        };
        let broadcast = if previous == PortalState::Open {
            self.publish(Message::PortalClosed).await
        } else {
            self.publish(Message::MembershipChanged {
                site: self.site,
                status: MembershipStatus::Left,
            })
            .await
        };
        self.transport.disconnect(&self.id, self.site);
        self.stop_pump();
        self.tear_down_replicas();
        broadcast
    }

    /// Drop off the portal without notifying anyone, as a real network
    /// failure would. Peers learn of it through the transport's
    /// disconnect event.
    pub fn simulate_network_failure(&self) {
        {
            let mut state = self.state.write();
            if state.is_terminal() {
                return;
            }
            *state = PortalState::Disconnected;
        }
        self.transport.disconnect(&self.id, self.site);
        self.stop_pump();
        self.tear_down_replicas();
    }

    /// Host side: admit a guest, returning its site id, a snapshot of
    /// current portal state, and its already-open envelope stream.
    /// The subscription is opened before the snapshot is taken, so every
    /// message is either in the snapshot or in the guest's queue; the
    /// overlap redelivers idempotently. Membership is announced before
    /// this returns so existing guests order the announcement ahead of
    /// the new guest's own messages.
    pub(crate) async fn admit_guest(
        &self,
    ) -> Result<(SiteId, PortalSnapshot, mpsc::UnboundedReceiver<Envelope>)> {
        if self.state() != PortalState::Open {
            return Err(PortalError::PortalClosed(self.id.clone()));
        }
        let site = self.registry.write().allocate_guest();
        let subscription = self.transport.subscribe(&self.id, site);
        let snapshot = self.snapshot();
        self.publish(Message::MembershipChanged {
            site,
            status: MembershipStatus::Active,
        })
        .await?;
        Ok((site, snapshot, subscription))
    }

    fn snapshot(&self) -> PortalSnapshot {
        let mut buffers: Vec<BufferSnapshot> = self
            .buffers
            .read()
            .values()
            .map(|buffer| BufferSnapshot {
                uri: buffer.uri().to_string(),
                state: buffer.snapshot_state(),
            })
            .collect();
        buffers.sort_unstable_by(|a, b| a.uri.cmp(&b.uri));
        let mut editors: Vec<EditorSnapshot> =
            self.editors.read().values().map(|editor| editor.snapshot()).collect();
        editors.sort_unstable_by_key(|editor| (editor.id.site, editor.id.seq));
        PortalSnapshot {
            sites: self.registry.read().snapshot(),
            buffers,
            editors,
            active_editor: *self.active_editor.read(),
        }
    }

    fn spawn_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let Some(portal) = weak.upgrade() else {
                    break;
                };
                if let Err(error) = portal.handle_envelope(envelope) {
                    tracing::error!(portal = %portal.id, %error, "failed to apply remote message");
                }
                if portal.state().is_terminal() {
                    break;
                }
            }
        });
        *self.pump.lock() = Some(handle);
    }

    fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    fn handle_envelope(&self, envelope: Envelope) -> Result<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        match envelope {
            Envelope::Delivery { from, payload } => {
                let message = Message::decode(&payload)?;
                self.handle_message(from, message)?;
                self.retry_deferred();
                Ok(())
            }
            Envelope::Connectivity { site, event } => {
                match event {
                    ConnectionEvent::Connected => {
                        // Membership is authoritative via MembershipChanged;
                        // the transport-level join needs no action.
                    }
                    ConnectionEvent::Disconnected => self.handle_disconnect(site),
                }
                Ok(())
            }
        }
    }

    fn handle_message(&self, from: SiteId, message: Message) -> Result<()> {
        tracing::trace!(portal = %self.id, %from, "applying remote message");
        match message {
            Message::BufferCreated { uri, state } => {
                let mut buffers = self.buffers.write();
                if !buffers.contains_key(&uri) {
                    let replica = BufferProxy::replica(
                        uri.clone(),
                        state,
                        self.id.clone(),
                        self.site,
                        self.transport.clone(),
                    );
                    buffers.insert(uri, replica);
                }
            }
            Message::EditorCreated {
                id,
                buffer_uri,
                selections,
                selection_seqs,
            } => {
                if self.editors.read().contains_key(&id) {
                    return Ok(());
                }
                let buffer = self.buffers.read().get(&buffer_uri).cloned();
                let Some(buffer) = buffer else {
                    tracing::debug!(portal = %self.id, %buffer_uri, "deferring editor for unknown buffer");
                    self.deferred.write().push((
                        from,
                        Message::EditorCreated {
                            id,
                            buffer_uri,
                            selections,
                            selection_seqs,
                        },
                    ));
                    return Ok(());
                };
                let snapshot = EditorSnapshot {
                    id,
                    buffer_uri,
                    selections,
                    selection_seqs,
                };
                let replica = EditorProxy::replica(
                    snapshot,
                    buffer.clone(),
                    self.id.clone(),
                    self.site,
                    self.transport.clone(),
                );
                buffer.attach_editor(Arc::downgrade(&replica));
                self.editors.write().insert(id, replica);
                let pending = *self.pending_active.read();
                if pending == Some(id) {
                    *self.pending_active.write() = None;
                    self.set_active_locally(Some(id));
                }
            }
            Message::Edit { uri, op } => {
                let buffer = self.buffers.read().get(&uri).cloned();
                match buffer {
                    Some(buffer) => buffer.integrate_remote(&op)?,
                    None => {
                        tracing::debug!(portal = %self.id, %uri, "deferring edit for unknown buffer");
                        self.deferred.write().push((from, Message::Edit { uri, op }));
                    }
                }
            }
            Message::SelectionUpdate {
                editor,
                site,
                seq,
                changes,
            } => {
                // Only updates from departed sites are stale. A site whose
                // membership record has not arrived yet still applies;
                // cross-sender ordering cannot be assumed.
                if matches!(
                    self.registry.read().status(site),
                    Some(MembershipStatus::Left) | Some(MembershipStatus::Disconnected)
                ) {
                    return Ok(());
                }
                let target = self.editors.read().get(&editor).cloned();
                match target {
                    Some(target) => target.integrate_selections(site, seq, &changes),
                    None => {
                        tracing::debug!(portal = %self.id, %editor, "deferring selections for unknown editor");
                        self.deferred.write().push((
                            from,
                            Message::SelectionUpdate {
                                editor,
                                site,
                                seq,
                                changes,
                            },
                        ));
                    }
                }
            }
            Message::ActiveEditorChanged { editor } => match editor {
                None => {
                    *self.pending_active.write() = None;
                    self.set_active_locally(None);
                }
                Some(id) => {
                    if self.editors.read().contains_key(&id) {
                        self.set_active_locally(Some(id));
                    } else {
                        *self.pending_active.write() = Some(id);
                    }
                }
            },
            Message::MembershipChanged { site, status } => match status {
                MembershipStatus::Active => {
                    self.registry.write().record(site, status);
                }
                MembershipStatus::Left | MembershipStatus::Disconnected => {
                    self.handle_site_departure(site, status);
                }
            },
            Message::PortalClosed => {
                self.tear_down_replicas();
                *self.state.write() = PortalState::HostClosed;
                if let Some(delegate) = self.delegate() {
                    delegate.host_closed_portal();
                }
            }
        }
        Ok(())
    }

    /// Replay deferred messages until a pass makes no progress; messages
    /// whose dependencies are still missing keep waiting.
    fn retry_deferred(&self) {
        loop {
            let pending = {
                let mut deferred = self.deferred.write();
                if deferred.is_empty() {
                    return;
                }
                std::mem::take(&mut *deferred)
            };
            let before = pending.len();
            for (from, message) in pending {
                if let Err(error) = self.handle_message(from, message) {
                    tracing::error!(portal = %self.id, %error, "failed to apply deferred message");
                }
            }
            if self.deferred.read().len() >= before {
                return;
            }
        }
    }

    fn handle_disconnect(&self, site: SiteId) {
        if site == SiteId::HOST && !self.is_host() {
            self.tear_down_replicas();
            *self.state.write() = PortalState::HostDisconnected;
            if let Some(delegate) = self.delegate() {
                delegate.host_lost_connection();
            }
        } else {
            self.handle_site_departure(site, MembershipStatus::Disconnected);
        }
    }

    /// A guest left or dropped. Its selections disappear everywhere; its
    /// text contributions stay.
    fn handle_site_departure(&self, site: SiteId, status: MembershipStatus) {
        let changed = self.registry.write().record(site, status);
        if changed {
            tracing::debug!(portal = %self.id, %site, ?status, "site departed");
        }
        let editors: Vec<Arc<EditorProxy>> = self.editors.read().values().cloned().collect();
        for editor in editors {
            editor.remove_site(site);
        }
    }

    fn set_active_locally(&self, editor: Option<EditorId>) {
        *self.active_editor.write() = editor;
        if let Some(delegate) = self.delegate() {
            delegate.did_change_active_editor(self.active_text_editor());
        }
    }

    fn tear_down_replicas(&self) {
        let editors: Vec<Arc<EditorProxy>> = {
            let mut editors = self.editors.write();
            editors.drain().map(|(_, editor)| editor).collect()
        };
        for editor in &editors {
            editor.tear_down();
        }
        let buffers: Vec<Arc<BufferProxy>> = {
            let mut buffers = self.buffers.write();
            buffers.drain().map(|(_, buffer)| buffer).collect()
        };
        for buffer in &buffers {
            buffer.tear_down();
        }
        *self.active_editor.write() = None;
        *self.pending_active.write() = None;
        self.deferred.write().clear();
    }

    fn delegate(&self) -> Option<Arc<dyn PortalDelegate>> {
        self.delegate.read().as_ref().and_then(|weak| weak.upgrade())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(PortalError::Disposed);
        }
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<()> {
        let payload = message.encode()?;
        self.transport
            .publish(&self.id, self.site, payload)
            .await?;
        Ok(())
    }
}

impl Drop for Portal {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBus;
    use conclave_text::{Point, Range};
    use std::time::Duration;

    #[tokio::test]
    async fn test_messages_sent_during_a_join_reach_the_new_guest() {
        let bus: Arc<dyn PortalTransport> = Arc::new(MemoryBus::new());
        let host = Portal::host(bus.clone());
        let buffer = host.create_text_buffer("a.txt", "hi").await.unwrap();

        let (site, snapshot, subscription) = host.admit_guest().await.unwrap();
        // This edit lands after the snapshot was taken but before the
        // guest portal exists; the subscription opened during admission
        // must already be queueing it.
        buffer
            .set_text_in_range(Range::collapsed(Point::new(0, 2)), "!")
            .await
            .unwrap();

        let guest =
            Portal::guest(host.id().clone(), site, snapshot, subscription, bus.clone()).unwrap();
        let replica = guest.text_buffer("a.txt").expect("buffer replica");
        for _ in 0..1000 {
            if replica.text() == "hi!" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(replica.text(), "hi!");
    }
}
