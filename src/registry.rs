use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::TriggerConfig;
use crate::dom::{Document, WeakDocument};
use crate::engine::InsertionEngine;
use crate::store::ReplyStore;
use crate::trigger::{PopupController, TriggerListener};

/// Document marker set once a trigger listener is installed.
pub const ATTACH_MARKER: &str = "quickreply-attached";

struct AttachedDocument {
    document: WeakDocument,
    listener: Arc<TriggerListener>,
}

/// Tracks every document that has a trigger listener installed.
pub struct SurfaceRegistry {
    trigger: TriggerConfig,
    store: Arc<dyn ReplyStore>,
    popup: Arc<dyn PopupController>,
    engine: Arc<InsertionEngine>,
    attached: DashMap<u64, AttachedDocument>,
}

impl SurfaceRegistry {
    pub fn new(
        trigger: TriggerConfig,
        store: Arc<dyn ReplyStore>,
        popup: Arc<dyn PopupController>,
        engine: Arc<InsertionEngine>,
    ) -> Self {
        Self {
            trigger,
            store,
            popup,
            engine,
            attached: DashMap::new(),
        }
    }

    /// Installs a trigger listener unless the document already has one.
    /// Safe to call repeatedly and from concurrent scans.
    pub fn attach(&self, document: &Document) -> bool {
        if !document.try_mark(ATTACH_MARKER, document.id()) {
            return false;
        }
        let listener = TriggerListener::new(
            document,
            self.trigger.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.popup),
            Arc::clone(&self.engine),
        );
        let installed = document
            .add_key_listener(listener.clone())
            .and_then(|()| document.add_click_listener(listener.clone()));
        if let Err(e) = installed {
            warn!("could not instrument document {}: {}", document.id(), e);
            return false;
        }
        self.attached.insert(
            document.id(),
            AttachedDocument {
                document: document.downgrade(),
                listener,
            },
        );
        info!("instrumented document {} ({})", document.id(), document.url());
        true
    }

    pub fn is_attached(&self, document_id: u64) -> bool {
        self.attached.contains_key(&document_id)
    }

    pub fn listener(&self, document_id: u64) -> Option<Arc<TriggerListener>> {
        self.attached
            .get(&document_id)
            .map(|entry| Arc::clone(&entry.listener))
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    /// Forgets documents that were dropped or detached. Returns how many.
    pub fn prune(&self) -> usize {
        let before = self.attached.len();
        self.attached.retain(|_, entry| {
            entry
                .document
                .upgrade()
                .is_some_and(|doc| !doc.is_detached())
        });
        let pruned = before.saturating_sub(self.attached.len());
        if pruned > 0 {
            debug!("pruned {} stale documents", pruned);
        }
        pruned
    }
}
