//! In-process model of a host page.
//!
//! A [`Document`] is a cheap, cloneable handle to one document: the top page
//! or the inner document of a same-origin frame. Every document owns its own
//! node arena, focus, selection and listeners; nodes of one document are never
//! valid in another. Frames hold their inner document (or the fact that it is
//! cross-origin or still loading) on the frame element.
//!
//! The per-document lock is released before any observer or listener runs,
//! so callbacks are free to read and mutate the document they are handed.

pub mod events;
pub mod selection;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::DomError;

pub use events::{
    ClickListener, DispatchedEvent, EventCallback, EventKind, KeyDisposition, KeyEvent,
    KeyListener, LoadCallback, MutationCallback, MutationRecord, ObserverId,
};
pub use selection::{Boundary, Range};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// What a frame element currently shows.
#[derive(Clone)]
pub enum FrameContent {
    /// Navigation has not produced a document yet.
    Pending,
    Loaded(Document),
    CrossOrigin,
}

impl fmt::Debug for FrameContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameContent::Pending => write!(f, "Pending"),
            FrameContent::Loaded(doc) => write!(f, "Loaded({})", doc.id()),
            FrameContent::CrossOrigin => write!(f, "CrossOrigin"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FieldState {
    value: String,
    selection: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
struct ElementData {
    tag: String,
    attributes: BTreeMap<String, String>,
    field: Option<FieldState>,
    frame: Option<FrameContent>,
    markers: HashMap<String, u64>,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct DocumentState {
    id: u64,
    url: String,
    nodes: Vec<NodeData>,
    root: NodeId,
    body: NodeId,
    active: Option<NodeId>,
    selection: Option<Range>,
    detached: bool,
    design_mode: bool,
    markers: HashMap<String, u64>,
    events: Vec<DispatchedEvent>,
    pending: Vec<MutationRecord>,
    observers: Vec<(ObserverId, MutationCallback)>,
    key_listeners: Vec<Arc<dyn KeyListener>>,
    click_listeners: Vec<Arc<dyn ClickListener>>,
    event_listeners: Vec<(NodeId, EventKind, EventCallback)>,
    load_listeners: Vec<(NodeId, LoadCallback)>,
    owner: Option<(WeakDocument, NodeId)>,
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub(crate) fn split_at_char(text: &str, index: usize) -> (String, String) {
    let byte = text
        .char_indices()
        .nth(index)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    (text[..byte].to_string(), text[byte..].to_string())
}

impl DocumentState {
    fn node(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.nodes.get(id.0).ok_or(DomError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes.get_mut(id.0).ok_or(DomError::NodeNotFound(id))
    }

    fn element(&self, id: NodeId) -> Result<&ElementData, DomError> {
        match &self.node(id)?.kind {
            NodeKind::Element(data) => Ok(data),
            NodeKind::Text(_) => Err(DomError::NodeNotFound(id)),
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData, DomError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(data) => Ok(data),
            NodeKind::Text(_) => Err(DomError::NodeNotFound(id)),
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    fn alloc_element(&mut self, tag: &str) -> NodeId {
        let tag = tag.to_ascii_lowercase();
        let field = matches!(tag.as_str(), "input" | "textarea").then(FieldState::default);
        let frame = matches!(tag.as_str(), "iframe" | "frame").then_some(FrameContent::Pending);
        self.alloc(NodeKind::Element(ElementData {
            tag,
            attributes: BTreeMap::new(),
            field,
            frame,
            markers: HashMap::new(),
        }))
    }

    fn record(&mut self, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        self.pending.push(MutationRecord {
            target,
            added,
            removed,
        });
    }

    fn index_in_parent(&self, node: NodeId) -> Result<usize, DomError> {
        let parent = self
            .node(node)?
            .parent
            .ok_or_else(|| DomError::InvalidBoundary(format!("{node:?} has no parent")))?;
        self.node(parent)?
            .children
            .iter()
            .position(|c| *c == node)
            .ok_or(DomError::NodeNotFound(node))
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool, DomError> {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = self.node(id)?.parent;
        }
        Ok(false)
    }

    fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<(), DomError> {
        if matches!(self.node(parent)?.kind, NodeKind::Text(_)) {
            return Err(DomError::InvalidBoundary("text nodes cannot have children".into()));
        }
        if self.is_inclusive_ancestor(child, parent)? {
            return Err(DomError::InvalidBoundary("cannot insert a node into itself".into()));
        }
        if let Some(old_parent) = self.node(child)?.parent {
            let old_index = self.index_in_parent(child)?;
            self.node_mut(old_parent)?.children.remove(old_index);
            self.record(old_parent, Vec::new(), vec![child]);
        }
        let siblings = &mut self.node_mut(parent)?.children;
        let index = index.min(siblings.len());
        siblings.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        self.record(parent, vec![child], Vec::new());
        Ok(())
    }

    fn descendants(&self, node: NodeId) -> Result<Vec<NodeId>, DomError> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(node)?.children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.node(id)?.children.iter().rev().copied());
        }
        Ok(out)
    }

    fn is_connected(&self, node: NodeId) -> Result<bool, DomError> {
        self.is_inclusive_ancestor(self.root, node)
    }

    fn loaded_frames_in(&self, node: NodeId) -> Vec<Document> {
        let mut nodes = self.descendants(node).unwrap_or_default();
        nodes.push(node);
        nodes
            .into_iter()
            .filter_map(|id| match self.element(id) {
                Ok(ElementData {
                    frame: Some(FrameContent::Loaded(doc)),
                    ..
                }) => Some(doc.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Shared handle to one document.
#[derive(Clone)]
pub struct Document {
    id: u64,
    inner: Arc<Mutex<DocumentState>>,
}

/// Non-owning handle; upgrading fails once every strong handle is gone.
#[derive(Clone)]
pub struct WeakDocument {
    id: u64,
    inner: Weak<Mutex<DocumentState>>,
}

impl WeakDocument {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn upgrade(&self) -> Option<Document> {
        self.inner.upgrade().map(|inner| Document { id: self.id, inner })
    }
}

impl fmt::Debug for WeakDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDocument").field("id", &self.id).finish()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("url", &self.url())
            .finish()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Document {}

impl Document {
    /// A fresh document with an empty `<html><body>` skeleton.
    pub fn new(url: impl Into<String>) -> Self {
        let id = NEXT_DOCUMENT_ID.fetch_add(1, Ordering::SeqCst);
        let mut state = DocumentState {
            id,
            url: url.into(),
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
            active: None,
            selection: None,
            detached: false,
            design_mode: false,
            markers: HashMap::new(),
            events: Vec::new(),
            pending: Vec::new(),
            observers: Vec::new(),
            key_listeners: Vec::new(),
            click_listeners: Vec::new(),
            event_listeners: Vec::new(),
            load_listeners: Vec::new(),
            owner: None,
        };
        let root = state.alloc_element("html");
        let body = state.alloc_element("body");
        state.nodes[body.0].parent = Some(root);
        state.nodes[root.0].children.push(body);
        state.root = root;
        state.body = body;
        Self {
            id,
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> String {
        self.inner.lock().url.clone()
    }

    pub fn downgrade(&self) -> WeakDocument {
        WeakDocument {
            id: self.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.inner.lock().detached
    }

    /// The frame element hosting this document, if it is not a top document.
    pub fn owner_frame(&self) -> Option<(WeakDocument, NodeId)> {
        self.inner.lock().owner.clone()
    }

    /// Marks the document (and every frame document inside it) as gone. All
    /// later operations report [`DomError::Detached`].
    pub fn detach(&self) {
        let nested = {
            let mut state = self.inner.lock();
            if state.detached {
                return;
            }
            state.detached = true;
            state.observers.clear();
            state.key_listeners.clear();
            state.click_listeners.clear();
            state.event_listeners.clear();
            state.load_listeners.clear();
            let root = state.root;
            state.loaded_frames_in(root)
        };
        debug!("document {} detached", self.id);
        for doc in nested {
            doc.detach();
        }
    }

    fn read<R>(
        &self,
        f: impl FnOnce(&DocumentState) -> Result<R, DomError>,
    ) -> Result<R, DomError> {
        let state = self.inner.lock();
        if state.detached {
            return Err(DomError::Detached(state.id));
        }
        f(&state)
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut DocumentState) -> Result<R, DomError>,
    ) -> Result<R, DomError> {
        let (result, records, observers) = {
            let mut state = self.inner.lock();
            if state.detached {
                return Err(DomError::Detached(state.id));
            }
            let result = f(&mut state);
            let records = std::mem::take(&mut state.pending);
            let observers: Vec<MutationCallback> = if records.is_empty() {
                Vec::new()
            } else {
                state.observers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
            };
            (result, records, observers)
        };
        for record in &records {
            for observer in &observers {
                observer(self, record);
            }
        }
        result
    }

    // ----- Tree -----

    pub fn root(&self) -> NodeId {
        self.inner.lock().root
    }

    pub fn body(&self) -> NodeId {
        self.inner.lock().body
    }

    /// Creates a detached element. `input`, `textarea` and frame elements get
    /// their field or frame state up front.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner.lock().alloc_element(tag)
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.inner.lock().alloc(NodeKind::Text(text.to_string()))
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.mutate(|state| {
            let index = state.node(parent)?.children.len();
            state.insert_child(parent, index, child)
        })
    }

    /// Detaches `node` from its parent. Frame documents inside the removed
    /// subtree become stale.
    pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let stale = self.mutate(|state| {
            let Some(parent) = state.node(node)?.parent else {
                return Ok(Vec::new());
            };
            let index = state.index_in_parent(node)?;
            state.node_mut(parent)?.children.remove(index);
            state.node_mut(node)?.parent = None;
            state.record(parent, Vec::new(), vec![node]);
            if state.selection.is_some_and(|r| {
                state.is_inclusive_ancestor(node, r.start.node).unwrap_or(false)
            }) {
                state.selection = None;
            }
            Ok(state.loaded_frames_in(node))
        })?;
        for doc in stale {
            doc.detach();
        }
        Ok(())
    }

    pub fn clear_children(&self, node: NodeId) -> Result<(), DomError> {
        let stale = self.mutate(|state| {
            let removed: Vec<NodeId> = std::mem::take(&mut state.node_mut(node)?.children);
            let mut stale = Vec::new();
            for child in &removed {
                stale.extend(state.loaded_frames_in(*child));
                state.node_mut(*child)?.parent = None;
            }
            if !removed.is_empty() {
                state.record(node, Vec::new(), removed);
            }
            Ok(stale)
        })?;
        for doc in stale {
            doc.detach();
        }
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>, DomError> {
        self.read(|state| Ok(state.node(node)?.parent))
    }

    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>, DomError> {
        self.read(|state| Ok(state.node(node)?.children.clone()))
    }

    /// Every node below `node`, in document order.
    pub fn descendants(&self, node: NodeId) -> Result<Vec<NodeId>, DomError> {
        self.read(|state| state.descendants(node))
    }

    pub fn is_connected(&self, node: NodeId) -> Result<bool, DomError> {
        self.read(|state| state.is_connected(node))
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> Result<bool, DomError> {
        self.read(|state| state.is_inclusive_ancestor(ancestor, node))
    }

    /// Lowercase tag name, or `#text` for text nodes.
    pub fn tag(&self, node: NodeId) -> Result<String, DomError> {
        self.read(|state| {
            Ok(match &state.node(node)?.kind {
                NodeKind::Element(data) => data.tag.clone(),
                NodeKind::Text(_) => "#text".to_string(),
            })
        })
    }

    pub fn is_text_node(&self, node: NodeId) -> Result<bool, DomError> {
        self.read(|state| Ok(matches!(state.node(node)?.kind, NodeKind::Text(_))))
    }

    /// Contents of a text node.
    pub fn text(&self, node: NodeId) -> Result<String, DomError> {
        self.read(|state| match &state.node(node)?.kind {
            NodeKind::Text(text) => Ok(text.clone()),
            NodeKind::Element(_) => Err(DomError::NodeNotFound(node)),
        })
    }

    pub fn set_text(&self, node: NodeId, value: &str) -> Result<(), DomError> {
        self.mutate(|state| match &mut state.node_mut(node)?.kind {
            NodeKind::Text(text) => {
                *text = value.to_string();
                Ok(())
            }
            NodeKind::Element(_) => Err(DomError::NodeNotFound(node)),
        })
    }

    /// Rendered text: text nodes in order, `<br>` as a newline.
    pub fn inner_text(&self, node: NodeId) -> Result<String, DomError> {
        self.read(|state| {
            let mut out = String::new();
            for id in state.descendants(node)? {
                match &state.node(id)?.kind {
                    NodeKind::Text(text) => out.push_str(text),
                    NodeKind::Element(data) if data.tag == "br" => out.push('\n'),
                    NodeKind::Element(_) => {}
                }
            }
            Ok(out)
        })
    }

    /// Last non-empty text node under `node`, in document order.
    pub fn last_text_node(&self, node: NodeId) -> Result<Option<NodeId>, DomError> {
        self.read(|state| {
            let nodes = state.descendants(node)?;
            Ok(nodes.into_iter().rev().find(|id| {
                matches!(state.node(*id).map(|n| &n.kind), Ok(NodeKind::Text(t)) if !t.is_empty())
            }))
        })
    }

    // ----- Attributes -----

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.mutate(|state| {
            state
                .element_mut(node)?
                .attributes
                .insert(name.to_ascii_lowercase(), value.to_string());
            Ok(())
        })
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>, DomError> {
        self.read(|state| {
            Ok(state
                .element(node)
                .ok()
                .and_then(|data| data.attributes.get(&name.to_ascii_lowercase()).cloned()))
        })
    }

    pub fn element_by_id(&self, id: &str) -> Result<Option<NodeId>, DomError> {
        self.read(|state| {
            let root = state.root;
            Ok(state.descendants(root)?.into_iter().find(|node| {
                state
                    .element(*node)
                    .is_ok_and(|data| data.attributes.get("id").is_some_and(|v| v == id))
            }))
        })
    }

    // ----- Editing state -----

    pub fn set_design_mode(&self, on: bool) -> Result<(), DomError> {
        self.mutate(|state| {
            state.design_mode = on;
            Ok(())
        })
    }

    /// Editable through `contenteditable` on the node or its nearest ancestor
    /// that sets it, or because the whole document is in design mode.
    pub fn is_content_editable(&self, node: NodeId) -> Result<bool, DomError> {
        self.read(|state| {
            if state.design_mode && state.is_connected(node)? {
                return Ok(true);
            }
            let mut current = Some(node);
            while let Some(id) = current {
                if let Ok(data) = state.element(id) {
                    match data.attributes.get("contenteditable").map(String::as_str) {
                        Some("" | "true" | "plaintext-only") => return Ok(true),
                        Some("false") => return Ok(false),
                        _ => {}
                    }
                }
                current = state.node(id)?.parent;
            }
            Ok(false)
        })
    }

    pub fn is_text_field(&self, node: NodeId) -> Result<bool, DomError> {
        self.read(|state| Ok(state.element(node).is_ok_and(|data| data.field.is_some())))
    }

    pub fn value(&self, node: NodeId) -> Result<String, DomError> {
        self.read(|state| {
            state
                .element(node)?
                .field
                .as_ref()
                .map(|f| f.value.clone())
                .ok_or(DomError::NotAField(node))
        })
    }

    /// Replaces a field's value; the caret moves to the end as in a browser.
    pub fn set_value(&self, node: NodeId, value: &str) -> Result<(), DomError> {
        self.mutate(|state| {
            let field = state
                .element_mut(node)?
                .field
                .as_mut()
                .ok_or(DomError::NotAField(node))?;
            field.value = value.to_string();
            let end = char_len(value);
            field.selection = Some((end, end));
            Ok(())
        })
    }

    pub fn field_selection(&self, node: NodeId) -> Result<Option<(usize, usize)>, DomError> {
        self.read(|state| {
            state
                .element(node)?
                .field
                .as_ref()
                .map(|f| f.selection)
                .ok_or(DomError::NotAField(node))
        })
    }

    pub fn set_field_selection(&self, node: NodeId, start: usize, end: usize) -> Result<(), DomError> {
        self.mutate(|state| {
            let field = state
                .element_mut(node)?
                .field
                .as_mut()
                .ok_or(DomError::NotAField(node))?;
            let len = char_len(&field.value);
            let start = start.min(len);
            let end = end.clamp(start, len);
            field.selection = Some((start, end));
            Ok(())
        })
    }

    // ----- Focus and selection -----

    pub fn focus(&self, node: NodeId) -> Result<(), DomError> {
        self.mutate(|state| {
            state.node(node)?;
            state.active = Some(node);
            Ok(())
        })
    }

    pub fn blur(&self) {
        self.inner.lock().active = None;
    }

    /// The focused element, if it is still part of the document.
    pub fn active_element(&self) -> Option<NodeId> {
        let state = self.inner.lock();
        if state.detached {
            return None;
        }
        state
            .active
            .filter(|node| state.is_connected(*node).unwrap_or(false))
    }

    pub fn selection(&self) -> Option<Range> {
        let state = self.inner.lock();
        if state.detached {
            return None;
        }
        state.selection
    }

    pub fn set_selection(&self, range: Option<Range>) -> Result<(), DomError> {
        self.mutate(|state| {
            if let Some(r) = range {
                state.node(r.start.node)?;
                state.node(r.end.node)?;
            }
            state.selection = range;
            Ok(())
        })
    }

    // ----- Frames -----

    /// Creates a detached frame element pointing at `src`; its content is
    /// pending until [`Document::load_frame`] is called.
    pub fn create_frame(&self, src: &str) -> NodeId {
        let mut state = self.inner.lock();
        let frame = state.alloc_element("iframe");
        if let NodeKind::Element(data) = &mut state.nodes[frame.0].kind {
            data.attributes.insert("src".into(), src.to_string());
        }
        frame
    }

    pub fn is_frame(&self, node: NodeId) -> Result<bool, DomError> {
        self.read(|state| Ok(state.element(node).is_ok_and(|data| data.frame.is_some())))
    }

    /// Connected frame elements, in document order.
    pub fn frames(&self) -> Result<Vec<NodeId>, DomError> {
        self.read(|state| {
            let root = state.root;
            Ok(state
                .descendants(root)?
                .into_iter()
                .filter(|id| state.element(*id).is_ok_and(|data| data.frame.is_some()))
                .collect())
        })
    }

    /// Frame elements inside `node` (inclusive).
    pub fn frames_within(&self, node: NodeId) -> Result<Vec<NodeId>, DomError> {
        self.read(|state| {
            let mut nodes = vec![node];
            nodes.extend(state.descendants(node)?);
            Ok(nodes
                .into_iter()
                .filter(|id| state.element(*id).is_ok_and(|data| data.frame.is_some()))
                .collect())
        })
    }

    /// The inner document of a frame: `Ok(None)` while it is still loading,
    /// [`DomError::CrossOrigin`] when it belongs to another origin.
    pub fn content_document(&self, frame: NodeId) -> Result<Option<Document>, DomError> {
        self.read(|state| match &state.element(frame)?.frame {
            Some(FrameContent::Pending) => Ok(None),
            Some(FrameContent::Loaded(doc)) if doc.is_detached() => Ok(None),
            Some(FrameContent::Loaded(doc)) => Ok(Some(doc.clone())),
            Some(FrameContent::CrossOrigin) => Err(DomError::CrossOrigin(frame)),
            None => Err(DomError::NotAFrame(frame)),
        })
    }

    /// Completes (or repeats) navigation of a frame and fires its load
    /// listeners. A previously loaded document becomes stale.
    pub fn load_frame(&self, frame: NodeId, content: FrameContent) -> Result<(), DomError> {
        self.replace_frame_content(frame, content, true)
    }

    /// Swaps frame content without a load signal, as when a script writes
    /// into an `about:blank` frame.
    pub fn write_frame(&self, frame: NodeId, content: FrameContent) -> Result<(), DomError> {
        self.replace_frame_content(frame, content, false)
    }

    fn replace_frame_content(
        &self,
        frame: NodeId,
        content: FrameContent,
        signal: bool,
    ) -> Result<(), DomError> {
        if let FrameContent::Loaded(doc) = &content {
            doc.inner.lock().owner = Some((self.downgrade(), frame));
        }
        let (previous, listeners) = self.mutate(|state| {
            let data = state.element_mut(frame)?;
            let slot = data.frame.as_mut().ok_or(DomError::NotAFrame(frame))?;
            let previous = std::mem::replace(slot, content);
            let listeners: Vec<LoadCallback> = if signal {
                state
                    .load_listeners
                    .iter()
                    .filter(|(node, _)| *node == frame)
                    .map(|(_, cb)| Arc::clone(cb))
                    .collect()
            } else {
                Vec::new()
            };
            Ok((previous, listeners))
        })?;
        if let FrameContent::Loaded(old) = previous {
            old.detach();
        }
        trace!("frame {:?} in document {} loaded", frame, self.id);
        for listener in listeners {
            listener(self, frame);
        }
        Ok(())
    }

    pub fn add_load_listener(&self, frame: NodeId, callback: LoadCallback) -> Result<(), DomError> {
        self.mutate(|state| {
            state.node(frame)?;
            state.load_listeners.push((frame, callback));
            Ok(())
        })
    }

    // ----- Markers -----

    /// Sets a document marker unless it is already present. Returns whether
    /// this call set it.
    pub fn try_mark(&self, name: &str, value: u64) -> bool {
        let mut state = self.inner.lock();
        if state.detached || state.markers.contains_key(name) {
            return false;
        }
        state.markers.insert(name.to_string(), value);
        true
    }

    pub fn marker(&self, name: &str) -> Option<u64> {
        self.inner.lock().markers.get(name).copied()
    }

    pub fn try_mark_node(&self, node: NodeId, name: &str, value: u64) -> Result<bool, DomError> {
        self.mutate(|state| {
            let markers = &mut state.element_mut(node)?.markers;
            if markers.contains_key(name) {
                return Ok(false);
            }
            markers.insert(name.to_string(), value);
            Ok(true)
        })
    }

    pub fn set_node_marker(&self, node: NodeId, name: &str, value: u64) -> Result<(), DomError> {
        self.mutate(|state| {
            state.element_mut(node)?.markers.insert(name.to_string(), value);
            Ok(())
        })
    }

    /// Sets a node marker and returns the value it replaced.
    pub fn swap_node_marker(&self, node: NodeId, name: &str, value: u64) -> Result<Option<u64>, DomError> {
        self.mutate(|state| Ok(state.element_mut(node)?.markers.insert(name.to_string(), value)))
    }

    pub fn node_marker(&self, node: NodeId, name: &str) -> Result<Option<u64>, DomError> {
        self.read(|state| Ok(state.element(node)?.markers.get(name).copied()))
    }

    // ----- Listeners and events -----

    pub fn observe_mutations(&self, callback: MutationCallback) -> Result<ObserverId, DomError> {
        let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::SeqCst));
        self.mutate(|state| {
            state.observers.push((id, callback));
            Ok(id)
        })
    }

    pub fn disconnect(&self, observer: ObserverId) {
        self.inner.lock().observers.retain(|(id, _)| *id != observer);
    }

    pub fn add_key_listener(&self, listener: Arc<dyn KeyListener>) -> Result<(), DomError> {
        self.mutate(|state| {
            state.key_listeners.push(listener);
            Ok(())
        })
    }

    pub fn add_click_listener(&self, listener: Arc<dyn ClickListener>) -> Result<(), DomError> {
        self.mutate(|state| {
            state.click_listeners.push(listener);
            Ok(())
        })
    }

    pub fn add_event_listener(
        &self,
        node: NodeId,
        kind: EventKind,
        callback: EventCallback,
    ) -> Result<(), DomError> {
        self.mutate(|state| {
            state.node(node)?;
            state.event_listeners.push((node, kind, callback));
            Ok(())
        })
    }

    /// Delivers a key-down to every key listener of this document.
    pub fn dispatch_key_down(&self, event: &KeyEvent) -> KeyDisposition {
        let listeners: Vec<Arc<dyn KeyListener>> = {
            let state = self.inner.lock();
            if state.detached {
                return KeyDisposition::ignored();
            }
            state.key_listeners.clone()
        };
        let mut disposition = KeyDisposition::ignored();
        for listener in listeners {
            if listener.on_key_down(self, event).default_prevented {
                disposition.default_prevented = true;
            }
        }
        disposition
    }

    pub fn dispatch_click(&self, target: NodeId) {
        let listeners: Vec<Arc<dyn ClickListener>> = {
            let state = self.inner.lock();
            if state.detached {
                return;
            }
            state.click_listeners.clone()
        };
        for listener in listeners {
            listener.on_click(self, target);
        }
    }

    /// Records the event and runs listeners on the target (and, for bubbling
    /// events, on its ancestors).
    pub fn dispatch_event(&self, event: DispatchedEvent) -> Result<(), DomError> {
        let listeners: Vec<EventCallback> = {
            let mut state = self.inner.lock();
            if state.detached {
                return Err(DomError::Detached(state.id));
            }
            state.node(event.target)?;
            state.events.push(event.clone());
            state
                .event_listeners
                .iter()
                .filter(|(node, kind, _)| {
                    *kind == event.kind
                        && (*node == event.target
                            || (event.bubbles
                                && state.is_inclusive_ancestor(*node, event.target).unwrap_or(false)))
                })
                .map(|(_, _, cb)| Arc::clone(cb))
                .collect()
        };
        for listener in listeners {
            listener(self, &event);
        }
        Ok(())
    }

    /// Every event dispatched so far, oldest first.
    pub fn events(&self) -> Vec<DispatchedEvent> {
        self.inner.lock().events.clone()
    }
}
