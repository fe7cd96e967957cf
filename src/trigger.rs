//! Per-document trigger handling and the picker session it drives.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::TriggerConfig;
use crate::dom::{ClickListener, Document, KeyDisposition, KeyEvent, KeyListener, NodeId, WeakDocument};
use crate::engine::{InsertOutcome, InsertionEngine};
use crate::reply::{group_by_category, needs_normalization, normalize, CategoryGroup, ReplyEntry};
use crate::store::ReplyStore;
use crate::surface::Anchor;

/// What the popup needs to render one picker.
#[derive(Debug, Clone)]
pub struct PickerView {
    pub document: u64,
    pub session: u64,
    pub anchor: Anchor,
    pub groups: Vec<CategoryGroup>,
}

impl PickerView {
    pub fn entry_count(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }
}

/// Renders pickers. Layout and styling live entirely on the other side.
pub trait PopupController: Send + Sync {
    fn show(&self, view: PickerView, handle: PickerHandle);

    fn dismiss(&self, document: u64);

    /// Whether `node` belongs to the popup, so clicking it is not an
    /// outside click.
    fn contains(&self, _document: &Document, _node: NodeId) -> bool {
        false
    }
}

/// Callback half given to the popup. Tied to one session; once that session
/// is closed or replaced every call is a no-op.
#[derive(Clone)]
pub struct PickerHandle {
    listener: Weak<TriggerListener>,
    session: u64,
}

impl PickerHandle {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_live(&self) -> bool {
        self.listener
            .upgrade()
            .is_some_and(|l| l.session() == Some(self.session))
    }

    /// Closes the picker and inserts `entry`. `None` if the session is over.
    pub async fn choose(&self, entry: &ReplyEntry) -> Option<InsertOutcome> {
        let listener = self.listener.upgrade()?;
        listener.choose(self.session, entry).await
    }

    pub fn cancel(&self) -> bool {
        self.listener
            .upgrade()
            .is_some_and(|l| l.cancel(self.session))
    }
}

impl fmt::Debug for PickerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickerHandle")
            .field("session", &self.session)
            .finish()
    }
}

/// The open session keeps its anchor weakly so a removed document is not
/// held alive by its own listener.
#[derive(Debug)]
enum PickerState {
    Idle,
    PickerOpen {
        session: u64,
        document: WeakDocument,
        node: NodeId,
    },
}

pub struct TriggerListener {
    document: WeakDocument,
    trigger: TriggerConfig,
    store: Arc<dyn ReplyStore>,
    popup: Arc<dyn PopupController>,
    engine: Arc<InsertionEngine>,
    state: Mutex<PickerState>,
    sessions: AtomicU64,
    me: Weak<TriggerListener>,
}

impl TriggerListener {
    pub fn new(
        document: &Document,
        trigger: TriggerConfig,
        store: Arc<dyn ReplyStore>,
        popup: Arc<dyn PopupController>,
        engine: Arc<InsertionEngine>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            document: document.downgrade(),
            trigger,
            store,
            popup,
            engine,
            state: Mutex::new(PickerState::Idle),
            sessions: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    pub fn document_id(&self) -> u64 {
        self.document.id()
    }

    pub fn is_open(&self) -> bool {
        self.session().is_some()
    }

    /// The open session, if any.
    pub fn session(&self) -> Option<u64> {
        match &*self.state.lock() {
            PickerState::PickerOpen { session, .. } => Some(*session),
            PickerState::Idle => None,
        }
    }

    /// Opens a picker anchored at the element focused in `document`,
    /// replacing any picker already open. Entries are fetched on a spawned
    /// task; its result says whether the popup was shown.
    pub fn open(&self, document: &Document) -> Option<JoinHandle<bool>> {
        let node = document.active_element()?;
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = std::mem::replace(
            &mut *self.state.lock(),
            PickerState::PickerOpen {
                session,
                document: document.downgrade(),
                node,
            },
        );
        if let PickerState::PickerOpen { session: old, .. } = previous {
            debug!("picker session {} replaced by {}", old, session);
            self.popup.dismiss(self.document_id());
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("cannot fetch replies without an async runtime: {}", e);
                self.take_session(session);
                return None;
            }
        };
        let me = self.me.clone();
        Some(runtime.spawn(async move {
            match me.upgrade() {
                Some(listener) => listener.populate(session).await,
                None => false,
            }
        }))
    }

    async fn populate(&self, session: u64) -> bool {
        let entries = self.load_entries().await;
        let anchor = {
            let mut state = self.state.lock();
            let anchor = match &*state {
                PickerState::PickerOpen { session: open, document, node } if *open == session => {
                    document.upgrade().map(|doc| Anchor::new(&doc, *node))
                }
                _ => {
                    debug!("picker session {} closed before replies arrived", session);
                    return false;
                }
            };
            let Some(anchor) = anchor else {
                debug!("document of picker session {} is gone", session);
                *state = PickerState::Idle;
                return false;
            };
            if entries.is_empty() {
                info!("no quick replies stored; picker not shown");
                *state = PickerState::Idle;
                return false;
            }
            anchor
        };

        let view = PickerView {
            document: self.document_id(),
            session,
            anchor,
            groups: group_by_category(&entries),
        };
        debug!(
            "showing picker {} with {} replies in {} categories",
            session,
            view.entry_count(),
            view.groups.len()
        );
        self.popup.show(
            view,
            PickerHandle {
                listener: self.me.clone(),
                session,
            },
        );
        true
    }

    /// Fetches and normalizes the stored replies, writing the normalized list
    /// back when legacy shapes were found.
    async fn load_entries(&self) -> Vec<ReplyEntry> {
        let raw = match self.store.get().await {
            Ok(raw) => raw,
            Err(e) => {
                error!("could not read quick replies: {}", e);
                return Vec::new();
            }
        };
        let entries = normalize(&raw);
        if needs_normalization(&raw) {
            match self.store.set(&entries).await {
                Ok(()) => info!("migrated {} stored replies to the current format", entries.len()),
                Err(e) => warn!("could not save migrated replies: {}", e),
            }
        }
        entries
    }

    /// Ends `session` if it is the open one, handing back where it was
    /// anchored. The inner `None` means the anchor's document is gone.
    fn take_session(&self, session: u64) -> Option<Option<Anchor>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, PickerState::Idle) {
            PickerState::PickerOpen { session: open, document, node } if open == session => {
                Some(document.upgrade().map(|doc| Anchor::new(&doc, node)))
            }
            other => {
                *state = other;
                None
            }
        }
    }

    /// Closes the picker, then runs the insertion for `entry`.
    pub async fn choose(&self, session: u64, entry: &ReplyEntry) -> Option<InsertOutcome> {
        let Some(anchor) = self.take_session(session) else {
            debug!("ignoring selection from closed picker session {}", session);
            return None;
        };
        self.popup.dismiss(self.document_id());
        let Some(anchor) = anchor else {
            debug!("document of picker session {} is gone; nothing inserted", session);
            return None;
        };
        Some(self.engine.insert(&anchor, &entry.text).await)
    }

    pub fn cancel(&self, session: u64) -> bool {
        if self.take_session(session).is_none() {
            return false;
        }
        self.popup.dismiss(self.document_id());
        true
    }
}

impl KeyListener for TriggerListener {
    fn on_key_down(&self, document: &Document, event: &KeyEvent) -> KeyDisposition {
        if !self.trigger.matches(event) {
            return KeyDisposition::ignored();
        }
        if self.open(document).is_none() {
            trace!("trigger pressed in document {} with nothing focused", document.id());
        }
        KeyDisposition::prevented()
    }
}

impl ClickListener for TriggerListener {
    fn on_click(&self, document: &Document, target: NodeId) {
        let Some(session) = self.session() else {
            return;
        };
        if self.popup.contains(document, target) {
            return;
        }
        if self.cancel(session) {
            debug!("picker {} closed by outside click", session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::reply::RawReply;
    use crate::store::MemoryStore;
    use crate::text::FixedClock;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingPopup {
        shown: Mutex<Vec<(PickerView, PickerHandle)>>,
        dismissed: AtomicUsize,
        inside: Mutex<Option<NodeId>>,
    }

    impl RecordingPopup {
        fn last(&self) -> (PickerView, PickerHandle) {
            self.shown.lock().last().cloned().unwrap()
        }
    }

    impl PopupController for RecordingPopup {
        fn show(&self, view: PickerView, handle: PickerHandle) {
            self.shown.lock().push((view, handle));
        }

        fn dismiss(&self, _document: u64) {
            self.dismissed.fetch_add(1, Ordering::SeqCst);
        }

        fn contains(&self, _document: &Document, node: NodeId) -> bool {
            *self.inside.lock() == Some(node)
        }
    }

    struct Fixture {
        doc: Document,
        field: NodeId,
        store: Arc<MemoryStore>,
        popup: Arc<RecordingPopup>,
        listener: Arc<TriggerListener>,
    }

    fn fixture(raw: Vec<RawReply>) -> Fixture {
        let config = Config::default();
        let doc = Document::new("https://example.test/");
        let field = doc.create_element("textarea");
        doc.append_child(doc.body(), field).unwrap();
        doc.focus(field).unwrap();
        let store = Arc::new(MemoryStore::new(raw));
        let popup = Arc::new(RecordingPopup::default());
        let engine = Arc::new(InsertionEngine::with_clock(config.clone(), Arc::new(FixedClock(15))));
        let listener = TriggerListener::new(&doc, config.trigger, store.clone(), popup.clone(), engine);
        doc.add_key_listener(listener.clone()).unwrap();
        doc.add_click_listener(listener.clone()).unwrap();
        Fixture {
            doc,
            field,
            store,
            popup,
            listener,
        }
    }

    fn trigger_key() -> KeyEvent {
        KeyEvent::new("/").with_ctrl()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn trigger_opens_grouped_picker() {
        let f = fixture(vec![
            RawReply::from(ReplyEntry::new("Sales", "Bom dia")),
            RawReply::from(ReplyEntry::new("Support", "Olá")),
            RawReply::from(ReplyEntry::new("Sales", "Até logo")),
        ]);

        let disposition = f.doc.dispatch_key_down(&trigger_key());
        assert!(disposition.default_prevented);
        assert!(f.listener.is_open());
        settle().await;

        let (view, handle) = f.popup.last();
        assert_eq!(view.anchor, Anchor::new(&f.doc, f.field));
        assert_eq!(view.groups.len(), 2);
        assert_eq!(view.groups[0].name, "Sales");
        assert_eq!(view.entry_count(), 3);
        assert!(handle.is_live());
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn other_keys_are_ignored() {
        let f = fixture(vec![RawReply::from("x")]);
        assert!(!f.doc.dispatch_key_down(&KeyEvent::new("/")).default_prevented);
        assert!(!f.doc.dispatch_key_down(&KeyEvent::new("a").with_ctrl()).default_prevented);
        assert!(!f.listener.is_open());
    }

    #[tokio::test]
    async fn legacy_entries_are_written_back() {
        let f = fixture(vec![RawReply::from("[Vendas] Bom dia"), RawReply::from("solto")]);
        let shown = f.listener.open(&f.doc).unwrap().await.unwrap();
        assert!(shown);
        assert_eq!(f.store.write_count(), 1);
        assert!(f.store.snapshot().iter().all(RawReply::is_canonical));
    }

    #[tokio::test]
    async fn empty_store_returns_to_idle() {
        let f = fixture(vec![RawReply::from("   ")]);
        let shown = f.listener.open(&f.doc).unwrap().await.unwrap();
        assert!(!shown);
        assert!(!f.listener.is_open());
        assert!(f.popup.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn nothing_focused_does_not_open() {
        let f = fixture(vec![RawReply::from("x")]);
        f.doc.blur();
        assert!(f.doc.dispatch_key_down(&trigger_key()).default_prevented);
        assert!(!f.listener.is_open());
    }

    #[tokio::test]
    async fn choosing_inserts_once() {
        let f = fixture(vec![RawReply::from(ReplyEntry::new("Sales", "Bom dia, obrigado!"))]);
        f.listener.open(&f.doc).unwrap().await.unwrap();
        let (view, handle) = f.popup.last();
        let entry = view.groups[0].entries[0].clone();

        let outcome = handle.choose(&entry).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(f.doc.value(f.field).unwrap(), "Boa tarde, obrigado!");
        assert!(!f.listener.is_open());
        assert_eq!(f.popup.dismissed.load(Ordering::SeqCst), 1);

        assert!(handle.choose(&entry).await.is_none());
        assert_eq!(f.doc.value(f.field).unwrap(), "Boa tarde, obrigado!");
    }

    #[tokio::test]
    async fn reopening_replaces_previous_picker() {
        let f = fixture(vec![RawReply::from("x")]);
        f.listener.open(&f.doc).unwrap().await.unwrap();
        let (_, first) = f.popup.last();
        f.listener.open(&f.doc).unwrap().await.unwrap();
        let (_, second) = f.popup.last();

        assert_ne!(first.session(), second.session());
        assert!(!first.is_live());
        assert!(second.is_live());
        assert!(!first.cancel());
        assert_eq!(f.popup.dismissed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outside_click_closes_but_popup_click_does_not() {
        let f = fixture(vec![RawReply::from("x")]);
        f.listener.open(&f.doc).unwrap().await.unwrap();

        let popup_node = f.doc.create_element("div");
        f.doc.append_child(f.doc.body(), popup_node).unwrap();
        *f.popup.inside.lock() = Some(popup_node);
        f.doc.dispatch_click(popup_node);
        assert!(f.listener.is_open());

        f.doc.dispatch_click(f.doc.body());
        assert!(!f.listener.is_open());
        let (_, handle) = f.popup.last();
        assert!(handle.choose(&ReplyEntry::new("c", "x")).await.is_none());
    }

    #[tokio::test]
    async fn open_picker_does_not_keep_its_document_alive() {
        let Fixture { doc, popup, listener, .. } = fixture(vec![RawReply::from("x")]);
        listener.open(&doc).unwrap().await.unwrap();
        let (_, handle) = popup.last();
        assert!(listener.is_open());

        let weak = doc.downgrade();
        popup.shown.lock().clear();
        drop(doc);
        assert!(weak.upgrade().is_none());

        assert!(handle.choose(&ReplyEntry::new("c", "x")).await.is_none());
        assert!(!listener.is_open());
    }

    #[tokio::test]
    async fn cancel_before_entries_arrive_suppresses_popup() {
        let f = fixture(vec![RawReply::from("x")]);
        f.doc.dispatch_key_down(&trigger_key());
        let session = f.listener.session().unwrap();
        assert!(f.listener.cancel(session));
        settle().await;
        assert!(f.popup.shown.lock().is_empty());
    }
}
