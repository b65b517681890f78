//! Replicated editor proxy: per-site selections layered over a shared
//! buffer.

use crate::buffer::BufferProxy;
use crate::error::Result;
use crate::message::{EditorId, EditorSnapshot, Message, PortalId};
use crate::transport::PortalTransport;
use conclave_text::{MarkerId, Selection, SelectionSet, SiteId, TextChange};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Callbacks into the host application's editor view.
pub trait EditorDelegate: Send + Sync {
    /// The per-site selection map changed for any reason: a remote update,
    /// a local update, a text edit shifting ranges, or a site departing.
    fn did_change_selections(&self, selections_by_site: &HashMap<SiteId, SelectionSet>);
}

/// One site's replica of a shared editor.
pub struct EditorProxy {
    id: EditorId,
    portal: PortalId,
    site: SiteId,
    /// Replicas push current selections to a freshly attached delegate; a
    /// locally created editor's delegate already has them.
    remote: bool,
    buffer: Arc<BufferProxy>,
    selections: RwLock<HashMap<SiteId, SelectionSet>>,
    /// Per-site update counters. Updates carry the sender's counter and
    /// are dropped unless it strictly exceeds the last one applied, which
    /// makes at-least-once redelivery harmless.
    selection_seqs: RwLock<HashMap<SiteId, u32>>,
    delegate: RwLock<Option<Weak<dyn EditorDelegate>>>,
    transport: Arc<dyn PortalTransport>,
    disposed: AtomicBool,
}

impl EditorProxy {
    pub(crate) fn local(
        id: EditorId,
        buffer: Arc<BufferProxy>,
        initial_selections: SelectionSet,
        portal: PortalId,
        site: SiteId,
        transport: Arc<dyn PortalTransport>,
    ) -> Arc<Self> {
        let mut selections = HashMap::new();
        let mut selection_seqs = HashMap::new();
        if !initial_selections.is_empty() {
            selections.insert(site, initial_selections);
            selection_seqs.insert(site, 1);
        }
        Arc::new(Self {
            id,
            portal,
            site,
            remote: false,
            buffer,
            selections: RwLock::new(selections),
            selection_seqs: RwLock::new(selection_seqs),
            delegate: RwLock::new(None),
            transport,
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn replica(
        snapshot: EditorSnapshot,
        buffer: Arc<BufferProxy>,
        portal: PortalId,
        site: SiteId,
        transport: Arc<dyn PortalTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: snapshot.id,
            portal,
            site,
            remote: true,
            buffer,
            selections: RwLock::new(snapshot.selections.into_iter().collect()),
            selection_seqs: RwLock::new(snapshot.selection_seqs.into_iter().collect()),
            delegate: RwLock::new(None),
            transport,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> EditorId {
        self.id
    }

    pub fn text_buffer(&self) -> &Arc<BufferProxy> {
        &self.buffer
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Current selections of every site, including the local one.
    pub fn selections_by_site(&self) -> HashMap<SiteId, SelectionSet> {
        self.selections.read().clone()
    }

    pub fn selections_for_site(&self, site: SiteId) -> Option<SelectionSet> {
        self.selections.read().get(&site).cloned()
    }

    pub fn set_delegate(&self, delegate: Arc<dyn EditorDelegate>) {
        *self.delegate.write() = Some(Arc::downgrade(&delegate));
        if self.remote {
            delegate.did_change_selections(&self.selections.read().clone());
        }
    }

    /// Upsert or delete (`None`) markers in the local site's selection
    /// set. The local delegate is notified synchronously before the
    /// update is broadcast.
    pub async fn update_selections(
        &self,
        changes: HashMap<MarkerId, Option<Selection>>,
    ) -> Result<()> {
        self.ensure_live()?;
        if changes.is_empty() {
            return Ok(());
        }
        let seq = {
            let mut selections = self.selections.write();
            let set = selections.entry(self.site).or_default();
            Self::apply_selection_changes(set, &changes);
            if set.is_empty() {
                selections.remove(&self.site);
            }
            let mut seqs = self.selection_seqs.write();
            let seq = seqs.entry(self.site).or_insert(0);
            *seq += 1;
            *seq
        };
        self.notify();
        self.publish(Message::SelectionUpdate {
            editor: self.id,
            site: self.site,
            seq,
            changes,
        })
        .await
    }

    /// Apply another site's selection update. Stale or redelivered
    /// updates (seq not past the last applied) are dropped.
    pub(crate) fn integrate_selections(
        &self,
        site: SiteId,
        seq: u32,
        changes: &HashMap<MarkerId, Option<Selection>>,
    ) {
        if self.is_disposed() {
            return;
        }
        {
            let mut seqs = self.selection_seqs.write();
            let last = seqs.entry(site).or_insert(0);
            if seq <= *last {
                return;
            }
            *last = seq;
        }
        {
            let mut selections = self.selections.write();
            let set = selections.entry(site).or_default();
            Self::apply_selection_changes(set, changes);
            if set.is_empty() {
                selections.remove(&site);
            }
        }
        self.notify();
    }

    /// Shift every site's selections through a run of text changes.
    pub(crate) fn apply_text_changes(&self, changes: &[TextChange]) {
        if self.is_disposed() {
            return;
        }
        let mut moved = false;
        {
            let mut selections = self.selections.write();
            for set in selections.values_mut() {
                for selection in set.values_mut() {
                    let before = selection.clone();
                    for change in changes {
                        selection.apply_change(change);
                    }
                    if *selection != before {
                        moved = true;
                    }
                }
            }
        }
        if moved {
            self.notify();
        }
    }

    /// Drop a departed site's selections. Returns whether it had any.
    pub(crate) fn remove_site(&self, site: SiteId) -> bool {
        if self.is_disposed() {
            return false;
        }
        let removed = self.selections.write().remove(&site).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    pub(crate) fn snapshot(&self) -> EditorSnapshot {
        let mut selections: Vec<(SiteId, SelectionSet)> = self
            .selections
            .read()
            .iter()
            .map(|(site, set)| (*site, set.clone()))
            .collect();
        selections.sort_unstable_by_key(|(site, _)| *site);
        let mut selection_seqs: Vec<(SiteId, u32)> = self
            .selection_seqs
            .read()
            .iter()
            .map(|(site, seq)| (*site, *seq))
            .collect();
        selection_seqs.sort_unstable_by_key(|(site, _)| *site);
        EditorSnapshot {
            id: self.id,
            buffer_uri: self.buffer.uri().to_string(),
            selections,
            selection_seqs,
        }
    }

    pub(crate) fn tear_down(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.selections.write().clear();
        self.notify();
    }

    fn apply_selection_changes(
        set: &mut SelectionSet,
        changes: &HashMap<MarkerId, Option<Selection>>,
    ) {
        for (marker, selection) in changes {
            match selection {
                Some(selection) => {
                    set.insert(*marker, selection.clone());
                }
                None => {
                    set.remove(marker);
                }
            }
        }
    }

    fn notify(&self) {
        let delegate = self.delegate.read().as_ref().and_then(|weak| weak.upgrade());
        if let Some(delegate) = delegate {
            let selections = self.selections.read().clone();
            delegate.did_change_selections(&selections);
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(crate::error::PortalError::Disposed);
        }
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<()> {
        let payload = message.encode()?;
        self.transport
            .publish(&self.portal, self.site, payload)
            .await?;
        Ok(())
    }
}
