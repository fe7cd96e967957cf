//! Selection boundaries and the range edits the insertion strategies need.
//!
//! Offsets inside text nodes count characters; offsets inside elements count
//! children. A range always belongs to the document whose nodes it names.

use super::{char_len, split_at_char, Document, DocumentState, NodeId, NodeKind};
use crate::errors::DomError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Boundary,
    pub end: Boundary,
}

impl Range {
    pub fn new(start: Boundary, end: Boundary) -> Self {
        Self { start, end }
    }

    pub fn collapsed(at: Boundary) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

impl DocumentState {
    fn check_boundary(&self, boundary: Boundary) -> Result<(), DomError> {
        let node = self.node(boundary.node)?;
        let max = match &node.kind {
            NodeKind::Text(text) => char_len(text),
            NodeKind::Element(_) => node.children.len(),
        };
        if boundary.offset > max {
            return Err(DomError::InvalidBoundary(format!(
                "offset {} exceeds {} in {:?}",
                boundary.offset, max, boundary.node
            )));
        }
        Ok(())
    }

    /// The single-character range ending at `caret`, with its text.
    pub(super) fn char_before(&self, caret: Boundary) -> Result<Option<(Range, String)>, DomError> {
        self.check_boundary(caret)?;
        let node = self.node(caret.node)?;
        match &node.kind {
            NodeKind::Text(text) => {
                if caret.offset == 0 {
                    return Ok(None);
                }
                let ch = text.chars().nth(caret.offset - 1).map(String::from);
                Ok(ch.map(|c| {
                    let start = Boundary::new(caret.node, caret.offset - 1);
                    (Range::new(start, caret), c)
                }))
            }
            NodeKind::Element(_) => {
                if caret.offset == 0 {
                    return Ok(None);
                }
                let prev = node.children[caret.offset - 1];
                match &self.node(prev)?.kind {
                    NodeKind::Text(text) if !text.is_empty() => {
                        let len = char_len(text);
                        let last = text.chars().last().map(String::from).unwrap_or_default();
                        let range = Range::new(Boundary::new(prev, len - 1), Boundary::new(prev, len));
                        Ok(Some((range, last)))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    pub(super) fn delete_range(&mut self, range: Range) -> Result<Boundary, DomError> {
        self.check_boundary(range.start)?;
        self.check_boundary(range.end)?;
        if range.is_collapsed() {
            return Ok(range.start);
        }
        if range.start.node != range.end.node {
            return Err(DomError::InvalidBoundary(
                "range spans more than one container".into(),
            ));
        }
        let container = range.start.node;
        let (from, to) = (
            range.start.offset.min(range.end.offset),
            range.start.offset.max(range.end.offset),
        );
        let mut removed = Vec::new();
        {
            let node = self.node_mut(container)?;
            match &mut node.kind {
                NodeKind::Text(text) => {
                    let (head, rest) = split_at_char(text, from);
                    let (_, tail) = split_at_char(&rest, to - from);
                    *text = format!("{head}{tail}");
                }
                NodeKind::Element(_) => {
                    removed = node.children.drain(from..to).collect();
                }
            }
        }
        if !removed.is_empty() {
            for child in &removed {
                if let Ok(data) = self.node_mut(*child) {
                    data.parent = None;
                }
            }
            self.record(container, Vec::new(), removed);
        }
        Ok(Boundary::new(container, from))
    }

    /// Inserts detached `nodes` at `at`, splitting a text node when the
    /// boundary falls inside one. Returns the boundary just after the last
    /// inserted node.
    pub(super) fn insert_nodes_at(&mut self, at: Boundary, nodes: &[NodeId]) -> Result<Boundary, DomError> {
        self.check_boundary(at)?;
        let text = match &self.node(at.node)?.kind {
            NodeKind::Text(text) => Some(text.clone()),
            NodeKind::Element(_) => None,
        };
        let (parent, index) = match text {
            None => (at.node, at.offset),
            Some(text) => {
                let len = char_len(&text);
                let parent = self
                    .node(at.node)?
                    .parent
                    .ok_or_else(|| DomError::InvalidBoundary("text node has no parent".into()))?;
                let position = self.index_in_parent(at.node)?;
                if at.offset == 0 {
                    (parent, position)
                } else if at.offset == len {
                    (parent, position + 1)
                } else {
                    let (head, tail) = split_at_char(&text, at.offset);
                    if let NodeKind::Text(t) = &mut self.node_mut(at.node)?.kind {
                        *t = head;
                    }
                    let tail_node = self.alloc(NodeKind::Text(tail));
                    self.insert_child(parent, position + 1, tail_node)?;
                    (parent, position + 1)
                }
            }
        };
        for (i, node) in nodes.iter().enumerate() {
            self.insert_child(parent, index + i, *node)?;
        }
        Ok(Boundary::new(parent, index + nodes.len()))
    }
}

impl Document {
    pub fn char_before(&self, caret: Boundary) -> Result<Option<(Range, String)>, DomError> {
        self.read(|state| state.char_before(caret))
    }

    /// Removes the contents of a range confined to one container and returns
    /// the collapsed boundary where the contents used to start.
    pub fn delete_range(&self, range: Range) -> Result<Boundary, DomError> {
        self.mutate(|state| state.delete_range(range))
    }

    pub fn insert_nodes_at(&self, at: Boundary, nodes: &[NodeId]) -> Result<Boundary, DomError> {
        self.mutate(|state| state.insert_nodes_at(at, nodes))
    }

    pub fn end_of(&self, node: NodeId) -> Result<Boundary, DomError> {
        self.read(|state| Ok(Boundary::new(node, state.node(node)?.children.len())))
    }

    /// Whether a boundary lies inside `region` (inclusive).
    pub fn boundary_within(&self, boundary: Boundary, region: NodeId) -> Result<bool, DomError> {
        self.read(|state| state.is_inclusive_ancestor(region, boundary.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_with_text(text: &str) -> (Document, NodeId, NodeId) {
        let doc = Document::new("https://example.test/");
        let div = doc.create_element("div");
        doc.append_child(doc.body(), div).unwrap();
        let t = doc.create_text(text);
        doc.append_child(div, t).unwrap();
        (doc, div, t)
    }

    #[test]
    fn char_before_inside_text() {
        let (doc, _, t) = region_with_text("ab/");
        let (range, ch) = doc.char_before(Boundary::new(t, 3)).unwrap().unwrap();
        assert_eq!(ch, "/");
        assert_eq!(range.start, Boundary::new(t, 2));
        assert!(doc.char_before(Boundary::new(t, 0)).unwrap().is_none());
    }

    #[test]
    fn char_before_element_boundary_uses_previous_text() {
        let (doc, div, t) = region_with_text("xy");
        let (range, ch) = doc.char_before(Boundary::new(div, 1)).unwrap().unwrap();
        assert_eq!(ch, "y");
        assert_eq!(range.start, Boundary::new(t, 1));
    }

    #[test]
    fn delete_single_char() {
        let (doc, _, t) = region_with_text("héllo/");
        let at = doc
            .delete_range(Range::new(Boundary::new(t, 5), Boundary::new(t, 6)))
            .unwrap();
        assert_eq!(at, Boundary::new(t, 5));
        assert_eq!(doc.text(t).unwrap(), "héllo");
    }

    #[test]
    fn insert_splits_text_node() {
        let (doc, div, t) = region_with_text("abcd");
        let br = doc.create_element("br");
        let after = doc.insert_nodes_at(Boundary::new(t, 2), &[br]).unwrap();
        assert_eq!(after, Boundary::new(div, 2));
        let children = doc.children(div).unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(doc.text(children[0]).unwrap(), "ab");
        assert_eq!(doc.tag(children[1]).unwrap(), "br");
        assert_eq!(doc.text(children[2]).unwrap(), "cd");
    }

    #[test]
    fn insert_at_text_edges_does_not_split() {
        let (doc, div, t) = region_with_text("ab");
        let x = doc.create_text("x");
        doc.insert_nodes_at(Boundary::new(t, 2), &[x]).unwrap();
        let y = doc.create_text("y");
        doc.insert_nodes_at(Boundary::new(t, 0), &[y]).unwrap();
        let texts: Vec<String> = doc
            .children(div)
            .unwrap()
            .into_iter()
            .map(|c| doc.text(c).unwrap())
            .collect();
        assert_eq!(texts, vec!["y", "ab", "x"]);
    }

    #[test]
    fn out_of_range_boundary_is_rejected() {
        let (doc, _, t) = region_with_text("ab");
        assert!(matches!(
            doc.char_before(Boundary::new(t, 9)),
            Err(DomError::InvalidBoundary(_))
        ));
    }
}
