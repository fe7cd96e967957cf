use std::sync::Arc;

use tracing::{debug, trace};

use super::{Anchor, FramedLegacyEditor, PlainField, RichRegion, Surface};
use crate::config::{LegacyEditorConfig, PasteWidgetConfig};
use crate::dom::{Document, NodeId};
use crate::errors::{DomError, InsertError};

/// Decides whether a rich region belongs to a widget that only accepts
/// content through paste events, and which node should receive them.
pub trait PasteDetector: Send + Sync {
    fn paste_target(&self, document: &Document, region: NodeId) -> Option<NodeId>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverPaste;

impl PasteDetector for NeverPaste {
    fn paste_target(&self, _document: &Document, _region: NodeId) -> Option<NodeId> {
        None
    }
}

/// Nearest ancestor-or-self with `contenteditable="true"` that carries every
/// configured attribute.
#[derive(Debug, Clone)]
pub struct AttributePasteDetector {
    attributes: Vec<String>,
}

impl AttributePasteDetector {
    pub fn new(attributes: Vec<String>) -> Self {
        Self { attributes }
    }

    pub fn from_config(config: &PasteWidgetConfig) -> Arc<dyn PasteDetector> {
        if config.enabled && !config.attributes.is_empty() {
            Arc::new(Self::new(config.attributes.clone()))
        } else {
            Arc::new(NeverPaste)
        }
    }

    fn matches(&self, doc: &Document, node: NodeId) -> Result<bool, DomError> {
        if doc.attribute(node, "contenteditable")?.as_deref() != Some("true") {
            return Ok(false);
        }
        for name in &self.attributes {
            if doc.attribute(node, name)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl PasteDetector for AttributePasteDetector {
    fn paste_target(&self, doc: &Document, region: NodeId) -> Option<NodeId> {
        let mut current = Some(region);
        while let Some(node) = current {
            if self.matches(doc, node).unwrap_or(false) {
                return Some(node);
            }
            current = doc.parent(node).ok().flatten();
        }
        None
    }
}

/// Turns an anchor into the surface to write into. Run again for every
/// attempt; nothing here is cached.
#[derive(Clone)]
pub struct SurfaceResolver {
    legacy: LegacyEditorConfig,
    paste: Arc<dyn PasteDetector>,
}

impl SurfaceResolver {
    pub fn new(legacy: LegacyEditorConfig, paste: Arc<dyn PasteDetector>) -> Self {
        Self { legacy, paste }
    }

    /// Field, then contentEditable, then a frame with an editable body, then
    /// a legacy editor frame somewhere in the anchor's document.
    pub fn resolve(&self, anchor: &Anchor) -> Result<Surface, InsertError> {
        let doc = &anchor.document;
        let node = anchor.node;
        if !doc.is_connected(node)? {
            return Err(InsertError::StaleAnchor);
        }
        if doc.is_text_field(node)? {
            return Ok(Surface::Plain(PlainField::new(doc, node)));
        }
        if doc.is_content_editable(node)? {
            let paste_target = self.paste.paste_target(doc, node);
            return Ok(Surface::Rich(
                RichRegion::new(doc, node).with_paste_target(paste_target),
            ));
        }
        if doc.is_frame(node)? {
            return self.framed(doc, node);
        }
        match self.find_legacy_editor_frame(doc) {
            Some(frame) => {
                trace!("anchor {:?} is a container; using legacy frame {:?}", node, frame);
                self.framed(doc, frame)
            }
            None => Err(InsertError::TransientUnavailable(format!(
                "no editable surface at <{}>",
                doc.tag(node)?
            ))),
        }
    }

    /// A frame surface if the frame's document is reachable and its body is
    /// editable.
    pub fn framed(&self, host: &Document, frame: NodeId) -> Result<Surface, InsertError> {
        let inner = match host.content_document(frame) {
            Ok(Some(inner)) => inner,
            Ok(None) => {
                return Err(InsertError::TransientUnavailable(format!(
                    "frame {frame:?} has no document yet"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let body = inner.body();
        if !inner.is_content_editable(body)? {
            return Err(InsertError::TransientUnavailable(format!(
                "body of frame {frame:?} is not editable yet"
            )));
        }
        Ok(Surface::Framed(FramedLegacyEditor::new(host, frame, &inner)))
    }

    /// Looks for the frame of an embedded legacy editor: first by reserved
    /// element id, then by address markers in configured order. Frames of
    /// another origin never match.
    pub fn find_legacy_editor_frame(&self, doc: &Document) -> Option<NodeId> {
        for id in &self.legacy.frame_ids {
            if let Ok(Some(node)) = doc.element_by_id(id) {
                if doc.is_frame(node).unwrap_or(false) && reachable(doc, node) {
                    return Some(node);
                }
            }
        }
        let frames = match doc.frames() {
            Ok(frames) => frames,
            Err(e) => {
                debug!("cannot list frames of document {}: {}", doc.id(), e);
                return None;
            }
        };
        for marker in &self.legacy.src_markers {
            let hit = frames.iter().copied().find(|frame| {
                doc.attribute(*frame, "src")
                    .ok()
                    .flatten()
                    .is_some_and(|src| src.contains(marker.as_str()))
                    && reachable(doc, *frame)
            });
            if hit.is_some() {
                return hit;
            }
        }
        None
    }
}

/// Pending and loaded frames qualify; cross-origin ones do not.
fn reachable(doc: &Document, frame: NodeId) -> bool {
    match doc.content_document(frame) {
        Err(DomError::CrossOrigin(_)) => {
            trace!("skipping cross-origin frame {:?}", frame);
            false
        }
        Err(_) => false,
        Ok(_) => true,
    }
}
