//! Quickreply - Snippet Insertion Engine
//!
//! Discovers editable surfaces in a host page (including same-origin frames
//! that load late), listens for the trigger keystroke, and writes a chosen
//! reply into whatever had focus.

pub mod config;
pub mod dom;
pub mod engine;
pub mod errors;
pub mod frames;
pub mod registry;
pub mod reply;
pub mod store;
pub mod surface;
pub mod text;
pub mod trigger;

pub use config::{get_config_path, load_config, load_config_from, Config};
pub use dom::{Document, FrameContent, KeyEvent, NodeId};
pub use engine::{InsertOutcome, InsertionEngine};
pub use errors::{ConfigError, DomError, InsertError, QuickReplyError, Result, StoreError};
pub use frames::{FrameWatcher, ProbeOutcome};
pub use registry::SurfaceRegistry;
pub use reply::{normalize, CategoryGroup, RawReply, ReplyEntry};
pub use store::{spawn_store_service, JsonFileStore, MemoryStore, ReplyStore, StoreClient};
pub use surface::{Anchor, Archetype, Surface};
pub use text::{Clock, FixedClock, SystemClock};
pub use trigger::{PickerHandle, PickerView, PopupController, TriggerListener};

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

/// Everything wired together: one engine, one registry, one frame watcher.
pub struct QuickReplies {
    engine: Arc<InsertionEngine>,
    registry: Arc<SurfaceRegistry>,
    watcher: Arc<FrameWatcher>,
}

impl QuickReplies {
    pub fn new(config: Config, store: Arc<dyn ReplyStore>, popup: Arc<dyn PopupController>) -> Self {
        Self::with_clock(config, store, popup, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        store: Arc<dyn ReplyStore>,
        popup: Arc<dyn PopupController>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(InsertionEngine::with_clock(config.clone(), clock));
        let registry = Arc::new(SurfaceRegistry::new(
            config.trigger.clone(),
            store,
            popup,
            Arc::clone(&engine),
        ));
        let watcher = FrameWatcher::new(&registry, config.frames.clone());
        Self {
            engine,
            registry,
            watcher,
        }
    }

    /// Instruments a top-level document and everything that appears in it.
    /// Returns the periodic rescan task when a runtime is available.
    pub fn install(&self, document: &Document) -> Option<JoinHandle<()>> {
        info!("installing quick replies into {}", document.url());
        self.watcher.start(document)
    }

    pub fn engine(&self) -> &Arc<InsertionEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<SurfaceRegistry> {
        &self.registry
    }

    pub fn watcher(&self) -> &Arc<FrameWatcher> {
        &self.watcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedPopup {
        shown: Mutex<Vec<(PickerView, PickerHandle)>>,
    }

    impl ScriptedPopup {
        fn take(&self) -> (PickerView, PickerHandle) {
            self.shown.lock().pop().unwrap()
        }
    }

    impl PopupController for ScriptedPopup {
        fn show(&self, view: PickerView, handle: PickerHandle) {
            self.shown.lock().push((view, handle));
        }

        fn dismiss(&self, _document: u64) {}
    }

    fn app(entries: Vec<ReplyEntry>, hour: u32) -> (QuickReplies, Arc<ScriptedPopup>) {
        let popup = Arc::new(ScriptedPopup::default());
        let app = QuickReplies::with_clock(
            Config::default(),
            Arc::new(MemoryStore::from_entries(entries)),
            popup.clone(),
            Arc::new(FixedClock(hour)),
        );
        (app, popup)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn trigger() -> KeyEvent {
        KeyEvent::new("/").with_ctrl()
    }

    #[tokio::test(start_paused = true)]
    async fn textarea_gets_afternoon_greeting() {
        let (app, popup) = app(vec![ReplyEntry::new("Sales", "Bom dia, obrigado!")], 15);
        let page = Document::new("https://crm.example.test/");
        let field = page.create_element("textarea");
        page.append_child(page.body(), field).unwrap();
        app.install(&page);

        page.focus(field).unwrap();
        page.set_field_selection(field, 0, 0).unwrap();
        assert!(page.dispatch_key_down(&trigger()).default_prevented);
        settle().await;

        let (view, handle) = popup.take();
        let entry = view.groups[0].entries[0].clone();
        let outcome = handle.choose(&entry).await.unwrap();

        assert_eq!(
            outcome,
            InsertOutcome::Inserted { archetype: Archetype::PlainField, attempts: 1 }
        );
        assert_eq!(page.value(field).unwrap(), "Boa tarde, obrigado!");
        assert_eq!(page.field_selection(field).unwrap(), Some((20, 20)));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_rich_region_gets_two_lines() {
        let (app, popup) = app(vec![ReplyEntry::new("Notes", "Line1\nLine2")], 9);
        let page = Document::new("https://crm.example.test/");
        let region = page.create_element("div");
        page.set_attribute(region, "contenteditable", "true").unwrap();
        page.append_child(page.body(), region).unwrap();
        app.install(&page);

        page.focus(region).unwrap();
        page.dispatch_key_down(&trigger());
        settle().await;
        let (view, handle) = popup.take();
        handle.choose(&view.groups[0].entries[0]).await.unwrap();

        let children = page.children(region).unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(page.text(children[0]).unwrap(), "Line1");
        assert_eq!(page.tag(children[1]).unwrap(), "br");
        assert_eq!(page.text(children[2]).unwrap(), "Line2");
    }

    #[tokio::test(start_paused = true)]
    async fn late_frame_is_instrumented_and_written() {
        let (app, popup) = app(vec![ReplyEntry::new("Mail", "Prezado cliente")], 9);
        let page = Document::new("https://mail.example.test/");
        app.install(&page);

        let frame = page.create_frame("/fckeditor/editor/fckeditor.html?InstanceName=mensagem");
        page.append_child(page.body(), frame).unwrap();
        let loader_page = page.clone();
        let loader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let editor = Document::new("https://mail.example.test/fckeditor.html");
            editor.set_design_mode(true).unwrap();
            loader_page
                .write_frame(frame, FrameContent::Loaded(editor.clone()))
                .unwrap();
            editor
        });
        let editor = loader.await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(app.registry().is_attached(editor.id()));

        editor.focus(editor.body()).unwrap();
        assert!(editor.dispatch_key_down(&trigger()).default_prevented);
        settle().await;
        let (view, handle) = popup.take();
        assert_eq!(view.document, editor.id());
        handle.choose(&view.groups[0].entries[0]).await.unwrap();

        assert_eq!(editor.inner_text(editor.body()).unwrap(), "Prezado cliente");
    }

    #[tokio::test(start_paused = true)]
    async fn cross_origin_frame_is_left_alone() {
        let (app, _popup) = app(vec![ReplyEntry::new("x", "y")], 9);
        let page = Document::new("https://mail.example.test/");
        let foreign = page.create_frame("https://ads.example.net/");
        page.append_child(page.body(), foreign).unwrap();
        page.load_frame(foreign, FrameContent::CrossOrigin).unwrap();
        app.install(&page);

        let started = tokio::time::Instant::now();
        let outcome = app
            .engine()
            .insert(&Anchor::new(&page, foreign), "y")
            .await;
        assert!(matches!(outcome, InsertOutcome::Failed(InsertError::AccessDenied(_))));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(app.registry().attached_count(), 1);
    }
}
