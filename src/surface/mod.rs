//! Editable surfaces and the three write strategies.
//!
//! A [`Surface`] is resolved from an [`Anchor`] right before each write and
//! dropped right after; it borrows nothing beyond the attempt it serves.

mod plain;
mod resolve;
mod rich;

use std::fmt;

use crate::dom::{Document, NodeId};
use crate::errors::InsertError;

pub use plain::PlainField;
pub use resolve::{AttributePasteDetector, NeverPaste, PasteDetector, SurfaceResolver};
pub use rich::{FramedLegacyEditor, RichRegion};

/// The element that had focus when the trigger fired, with the document
/// that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub document: Document,
    pub node: NodeId,
}

impl Anchor {
    pub fn new(document: &Document, node: NodeId) -> Self {
        Self {
            document: document.clone(),
            node,
        }
    }

    /// The top document of the frame tree this anchor lives in.
    pub fn top_document(&self) -> Document {
        let mut current = self.document.clone();
        while let Some(parent) = current
            .owner_frame()
            .and_then(|(owner, _)| owner.upgrade())
        {
            current = parent;
        }
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Archetype {
    PlainField,
    RichRegion,
    FramedLegacyEditor,
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Archetype::PlainField => "plain field",
            Archetype::RichRegion => "rich region",
            Archetype::FramedLegacyEditor => "framed legacy editor",
        };
        f.write_str(name)
    }
}

/// What every archetype can do once resolved.
pub trait EditableSurface {
    fn archetype(&self) -> Archetype;

    /// Writes `payload` (line breaks already normalized) at the caret and
    /// notifies the page.
    fn write(&self, payload: &str) -> Result<(), InsertError>;

    /// Emits the events the host page listens to after a programmatic edit.
    fn notify(&self) -> Result<(), InsertError>;

    /// Deletes `trigger` if it sits right before the caret. Returns whether
    /// anything was removed.
    fn strip_trigger(&self, trigger: char) -> Result<bool, InsertError>;
}

#[derive(Debug, Clone)]
pub enum Surface {
    Plain(PlainField),
    Rich(RichRegion),
    Framed(FramedLegacyEditor),
}

impl Surface {
    fn inner(&self) -> &dyn EditableSurface {
        match self {
            Surface::Plain(s) => s,
            Surface::Rich(s) => s,
            Surface::Framed(s) => s,
        }
    }
}

impl EditableSurface for Surface {
    fn archetype(&self) -> Archetype {
        self.inner().archetype()
    }

    fn write(&self, payload: &str) -> Result<(), InsertError> {
        self.inner().write(payload)
    }

    fn notify(&self) -> Result<(), InsertError> {
        self.inner().notify()
    }

    fn strip_trigger(&self, trigger: char) -> Result<bool, InsertError> {
        self.inner().strip_trigger(trigger)
    }
}
