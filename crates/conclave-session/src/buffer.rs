//! Replicated buffer proxy: pairs the text CRDT with a delegate and the
//! editors attached to it.

use crate::editor::EditorProxy;
use crate::error::Result;
use crate::message::{Message, PortalId};
use crate::transport::PortalTransport;
use conclave_text::{
    index_for_point, EditOperation, Range, SiteId, TextChange, TextCrdt, TextError, TextSnapshot,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Callbacks into the host application's text storage. Held weakly; the
/// core notifies but never owns the delegate.
pub trait BufferDelegate: Send + Sync {
    /// The replica's full text was (re)established, e.g. from a join
    /// snapshot.
    fn did_set_text(&self, text: &str);
    /// Remote edits were applied. Changes are coherent when spliced in
    /// order.
    fn did_change_text(&self, changes: &[TextChange]);
}

/// One site's replica of a shared text buffer.
pub struct BufferProxy {
    uri: String,
    portal: PortalId,
    site: SiteId,
    /// Whether this replica was created from another site's state. Only
    /// replicas push their text to a freshly attached delegate; a locally
    /// created buffer's delegate already has it.
    remote: bool,
    crdt: RwLock<TextCrdt>,
    delegate: RwLock<Option<Weak<dyn BufferDelegate>>>,
    editors: RwLock<Vec<Weak<EditorProxy>>>,
    transport: Arc<dyn PortalTransport>,
    disposed: AtomicBool,
}

impl BufferProxy {
    pub(crate) fn local(
        uri: String,
        text: &str,
        portal: PortalId,
        site: SiteId,
        transport: Arc<dyn PortalTransport>,
    ) -> Result<Arc<Self>> {
        let mut crdt = TextCrdt::new(site);
        if !text.is_empty() {
            crdt.splice(0, 0, text)?;
        }
        Ok(Arc::new(Self {
            uri,
            portal,
            site,
            remote: false,
            crdt: RwLock::new(crdt),
            delegate: RwLock::new(None),
            editors: RwLock::new(Vec::new()),
            transport,
            disposed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn replica(
        uri: String,
        state: TextSnapshot,
        portal: PortalId,
        site: SiteId,
        transport: Arc<dyn PortalTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uri,
            portal,
            site,
            remote: true,
            crdt: RwLock::new(TextCrdt::from_snapshot(site, state)),
            delegate: RwLock::new(None),
            editors: RwLock::new(Vec::new()),
            transport,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn text(&self) -> String {
        self.crdt.read().text()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn set_delegate(&self, delegate: Arc<dyn BufferDelegate>) {
        *self.delegate.write() = Some(Arc::downgrade(&delegate));
        if self.remote {
            delegate.did_set_text(&self.text());
        }
    }

    /// Replace `old_range` with `text`. The mutation applies locally and
    /// synchronously; only the broadcast can fail, and a broadcast failure
    /// never rolls the local state back. The caller's own delegate is not
    /// re-notified for its own edit.
    pub async fn set_text_in_range(&self, old_range: Range, text: &str) -> Result<()> {
        self.ensure_live()?;
        let op = {
            let mut crdt = self.crdt.write();
            let chars = crdt.chars();
            let start = index_for_point(&chars, old_range.start)
                .ok_or(TextError::InvalidPoint(old_range.start))?;
            let end = index_for_point(&chars, old_range.end)
                .ok_or(TextError::InvalidPoint(old_range.end))?;
            let deleted = end
                .checked_sub(start)
                .ok_or(TextError::InvalidPoint(old_range.end))?;
            crdt.splice(start, deleted, text)?
        };
        if op.is_empty() {
            return Ok(());
        }

        let change = TextChange {
            old_range,
            new_text: text.to_string(),
        };
        self.apply_changes_to_editors(&[change]);

        self.publish(Message::Edit {
            uri: self.uri.clone(),
            op,
        })
        .await
    }

    /// Apply an edit received from another site.
    pub(crate) fn integrate_remote(&self, op: &EditOperation) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let changes = self.crdt.write().integrate(op)?;
        if changes.is_empty() {
            return Ok(());
        }
        if let Some(delegate) = self.delegate() {
            delegate.did_change_text(&changes);
        }
        self.apply_changes_to_editors(&changes);
        Ok(())
    }

    pub(crate) fn attach_editor(&self, editor: Weak<EditorProxy>) {
        self.editors.write().push(editor);
    }

    pub(crate) fn snapshot_state(&self) -> TextSnapshot {
        self.crdt.read().snapshot()
    }

    pub(crate) fn tear_down(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn apply_changes_to_editors(&self, changes: &[TextChange]) {
        let editors: Vec<Arc<EditorProxy>> = {
            let mut attached = self.editors.write();
            attached.retain(|weak| weak.strong_count() > 0);
            attached.iter().filter_map(|weak| weak.upgrade()).collect()
        };
        for editor in editors {
            editor.apply_text_changes(changes);
        }
    }

    fn delegate(&self) -> Option<Arc<dyn BufferDelegate>> {
        self.delegate.read().as_ref().and_then(|weak| weak.upgrade())
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
