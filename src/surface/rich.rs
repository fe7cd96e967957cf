use tracing::debug;

use super::{Archetype, EditableSurface};
use crate::dom::{Boundary, DispatchedEvent, Document, NodeId, Range};
use crate::errors::{DomError, InsertError};
use crate::text::split_lines;

/// A contentEditable element. Reads and writes the selection of the
/// document that owns it.
#[derive(Debug, Clone)]
pub struct RichRegion {
    document: Document,
    region: NodeId,
    paste_target: Option<NodeId>,
}

impl RichRegion {
    pub fn new(document: &Document, region: NodeId) -> Self {
        Self {
            document: document.clone(),
            region,
            paste_target: None,
        }
    }

    /// Routes writes through a paste event aimed at `target` instead of
    /// editing the tree, for widgets that rebuild their content from paste.
    pub fn with_paste_target(mut self, target: Option<NodeId>) -> Self {
        self.paste_target = target;
        self
    }

    pub fn node(&self) -> NodeId {
        self.region
    }

    pub fn paste_target(&self) -> Option<NodeId> {
        self.paste_target
    }
}

impl EditableSurface for RichRegion {
    fn archetype(&self) -> Archetype {
        Archetype::RichRegion
    }

    fn write(&self, payload: &str) -> Result<(), InsertError> {
        if let Some(target) = self.paste_target {
            self.document.focus(target)?;
            self.document
                .dispatch_event(DispatchedEvent::paste(target, payload))?;
            debug!("handed {} bytes to paste widget {:?}", payload.len(), target);
            return Ok(());
        }
        write_lines(&self.document, self.region, payload)?;
        self.notify()
    }

    fn notify(&self) -> Result<(), InsertError> {
        self.document
            .dispatch_event(DispatchedEvent::input(self.region))?;
        Ok(())
    }

    fn strip_trigger(&self, trigger: char) -> Result<bool, InsertError> {
        Ok(strip_trigger_in(&self.document, self.region, trigger)?)
    }
}

/// A same-origin frame whose inner body is editable. Host and inner
/// documents keep their own selections; only the inner one is touched.
#[derive(Debug, Clone)]
pub struct FramedLegacyEditor {
    host: Document,
    frame: NodeId,
    document: Document,
    body: NodeId,
}

impl FramedLegacyEditor {
    pub fn new(host: &Document, frame: NodeId, document: &Document) -> Self {
        Self {
            host: host.clone(),
            frame,
            document: document.clone(),
            body: document.body(),
        }
    }

    pub fn host(&self) -> &Document {
        &self.host
    }

    pub fn frame(&self) -> NodeId {
        self.frame
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl EditableSurface for FramedLegacyEditor {
    fn archetype(&self) -> Archetype {
        Archetype::FramedLegacyEditor
    }

    fn write(&self, payload: &str) -> Result<(), InsertError> {
        self.document.focus(self.body)?;
        write_lines(&self.document, self.body, payload)?;
        self.notify()
    }

    fn notify(&self) -> Result<(), InsertError> {
        self.document.dispatch_event(DispatchedEvent::input(self.body))?;
        Ok(())
    }

    fn strip_trigger(&self, trigger: char) -> Result<bool, InsertError> {
        Ok(strip_trigger_in(&self.document, self.body, trigger)?)
    }
}

/// Inline and block wrappers that render nothing by themselves.
const WRAPPER_TAGS: &[&str] = &[
    "p", "div", "span", "font", "b", "i", "u", "em", "strong", "blockquote",
];

/// An editor's empty state: nothing but whitespace text, `<br>`s and
/// wrappers around them, e.g. `<p><br></p>`.
fn is_placeholder(doc: &Document, region: NodeId) -> Result<bool, DomError> {
    if !doc.inner_text(region)?.trim().is_empty() {
        return Ok(false);
    }
    for node in doc.descendants(region)? {
        if doc.is_text_node(node)? {
            continue;
        }
        let tag = doc.tag(node)?;
        if tag == "br" {
            continue;
        }
        // leaves such as <img> are content even without text
        if !WRAPPER_TAGS.contains(&tag.as_str()) && doc.children(node)?.is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn selection_within(doc: &Document, region: NodeId) -> Option<Range> {
    doc.selection().filter(|range| {
        doc.boundary_within(range.start, region).unwrap_or(false)
            && doc.boundary_within(range.end, region).unwrap_or(false)
    })
}

fn insertion_point(doc: &Document, region: NodeId) -> Result<Boundary, DomError> {
    match selection_within(doc, region) {
        None => doc.end_of(region),
        Some(range) if range.is_collapsed() => Ok(range.start),
        Some(range) => match doc.delete_range(range) {
            Ok(at) => Ok(at),
            Err(DomError::InvalidBoundary(reason)) => {
                debug!("keeping selected content ({}); inserting at its start", reason);
                Ok(range.start)
            }
            Err(e) => Err(e),
        },
    }
}

/// Inserts one text node per non-empty line with a `<br>` between lines,
/// then collapses the selection right after the fragment.
fn write_lines(doc: &Document, region: NodeId, payload: &str) -> Result<(), DomError> {
    let at = if is_placeholder(doc, region)? {
        doc.clear_children(region)?;
        Boundary::new(region, 0)
    } else {
        insertion_point(doc, region)?
    };

    let lines = split_lines(payload);
    let mut nodes = Vec::with_capacity(lines.len() * 2);
    for (i, line) in lines.iter().enumerate() {
        if !line.is_empty() {
            nodes.push(doc.create_text(line));
        }
        if i + 1 < lines.len() {
            nodes.push(doc.create_element("br"));
        }
    }

    let after = doc.insert_nodes_at(at, &nodes)?;
    doc.set_selection(Some(Range::collapsed(after)))?;
    debug!("inserted {} lines into {:?} of document {}", lines.len(), region, doc.id());
    Ok(())
}

fn strip_trigger_in(doc: &Document, region: NodeId, trigger: char) -> Result<bool, DomError> {
    let trigger_text = trigger.to_string();
    match selection_within(doc, region) {
        Some(range) => {
            let Some((before, ch)) = doc.char_before(range.start)? else {
                return Ok(false);
            };
            if ch != trigger_text {
                return Ok(false);
            }
            let at = doc.delete_range(before)?;
            doc.set_selection(Some(Range::collapsed(at)))?;
        }
        None => {
            if !doc.inner_text(region)?.ends_with(trigger) {
                return Ok(false);
            }
            let Some(node) = doc.last_text_node(region)? else {
                return Ok(false);
            };
            let text = doc.text(node)?;
            let Some(trimmed) = text.strip_suffix(trigger) else {
                return Ok(false);
            };
            doc.set_text(node, trimmed)?;
        }
    }
    doc.dispatch_event(DispatchedEvent::input(region))?;
    Ok(true)
}
