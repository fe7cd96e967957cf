use std::sync::Arc;

use super::{Document, NodeId};

/// A key-down as seen by a document listener.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyDisposition {
    pub default_prevented: bool,
}

impl KeyDisposition {
    pub fn ignored() -> Self {
        Self::default()
    }

    pub fn prevented() -> Self {
        Self {
            default_prevented: true,
        }
    }
}

/// Notifications a page listens to in order to learn that a field changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Input,
    Change,
    Paste,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedEvent {
    pub kind: EventKind,
    pub target: NodeId,
    /// Clipboard payload for paste events.
    pub data: Option<String>,
    pub bubbles: bool,
}

impl DispatchedEvent {
    pub fn input(target: NodeId) -> Self {
        Self {
            kind: EventKind::Input,
            target,
            data: None,
            bubbles: true,
        }
    }

    pub fn change(target: NodeId) -> Self {
        Self {
            kind: EventKind::Change,
            target,
            data: None,
            bubbles: true,
        }
    }

    pub fn paste(target: NodeId, text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Paste,
            target,
            data: Some(text.into()),
            bubbles: true,
        }
    }
}

/// One structural change. `target` is the parent whose child list changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

pub type MutationCallback = Arc<dyn Fn(&Document, &MutationRecord) + Send + Sync>;
pub type LoadCallback = Arc<dyn Fn(&Document, NodeId) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&Document, &DispatchedEvent) + Send + Sync>;

pub trait KeyListener: Send + Sync {
    fn on_key_down(&self, document: &Document, event: &KeyEvent) -> KeyDisposition;
}

pub trait ClickListener: Send + Sync {
    fn on_click(&self, document: &Document, target: NodeId);
}
