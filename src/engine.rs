//! The insertion engine: trigger removal, strategy dispatch, retry and
//! fallback.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dom::{Document, NodeId};
use crate::errors::InsertError;
use crate::surface::{
    Anchor, Archetype, AttributePasteDetector, EditableSurface, PasteDetector, RichRegion, Surface,
    SurfaceResolver,
};
use crate::text::{normalize_line_breaks, Clock, GreetingRewriter, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Written through the anchor's own surface on attempt `attempts`.
    Inserted { archetype: Archetype, attempts: u32 },
    /// Written by the post-exhaustion scan into some other editable surface.
    InsertedByFallback { archetype: Archetype, attempts: u32 },
    Failed(InsertError),
}

impl InsertOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, InsertOutcome::Failed(_))
    }
}

pub struct InsertionEngine {
    config: Config,
    resolver: SurfaceResolver,
    greeting: GreetingRewriter,
    clock: Arc<dyn Clock>,
}

impl InsertionEngine {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let paste = AttributePasteDetector::from_config(&config.paste_widget);
        Self::with_parts(config, clock, paste)
    }

    pub fn with_parts(config: Config, clock: Arc<dyn Clock>, paste: Arc<dyn PasteDetector>) -> Self {
        let resolver = SurfaceResolver::new(config.legacy_editor.clone(), paste);
        let greeting = GreetingRewriter::new(config.greeting.clone());
        Self {
            config,
            resolver,
            greeting,
            clock,
        }
    }

    pub fn resolver(&self) -> &SurfaceResolver {
        &self.resolver
    }

    /// The text as it will be written right now: greeting adjusted to the
    /// hour, line breaks normalized.
    pub fn prepare(&self, raw: &str) -> String {
        let adjusted = self.greeting.rewrite(raw, self.clock.hour());
        normalize_line_breaks(&adjusted)
    }

    /// Removes the trigger character, then writes `raw` at the anchor.
    /// Never returns an error; failures are folded into the outcome.
    pub async fn insert(&self, anchor: &Anchor, raw: &str) -> InsertOutcome {
        let text = self.prepare(raw);
        self.remove_trigger_character(anchor);

        let retries = self.config.insert.retries.max(1);
        let delay = self.config.insert.retry_delay();
        let mut last_error = InsertError::TransientUnavailable("no attempt made".into());

        for attempt in 1..=retries {
            match self.attempt(anchor, &text) {
                Ok(archetype) => {
                    info!(
                        "inserted {} chars into {} on attempt {}",
                        text.chars().count(),
                        archetype,
                        attempt
                    );
                    return InsertOutcome::Inserted { archetype, attempts: attempt };
                }
                Err(e) if !e.is_retryable() => {
                    warn!("insertion abandoned: {}", e);
                    return InsertOutcome::Failed(e);
                }
                Err(e) => {
                    debug!("attempt {}/{} failed: {}", attempt, retries, e);
                    last_error = e;
                }
            }
            if attempt < retries {
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(archetype) = self.fallback(anchor, &text) {
            info!("inserted into {} found by fallback scan", archetype);
            return InsertOutcome::InsertedByFallback { archetype, attempts: retries };
        }

        let error = InsertError::Exhausted {
            attempts: retries,
            message: last_error.to_string(),
        };
        warn!("{}", error);
        InsertOutcome::Failed(error)
    }

    fn attempt(&self, anchor: &Anchor, text: &str) -> Result<Archetype, InsertError> {
        let surface = self.resolver.resolve(anchor)?;
        surface.write(text)?;
        Ok(surface.archetype())
    }

    /// Deletes the trigger character right before the caret of the anchor's
    /// surface. Any failure is logged and ignored.
    pub fn remove_trigger_character(&self, anchor: &Anchor) -> bool {
        let Some(trigger) = self.config.trigger.trigger_char() else {
            return false;
        };
        let removed = self
            .resolver
            .resolve(anchor)
            .and_then(|surface| surface.strip_trigger(trigger));
        match removed {
            Ok(removed) => removed,
            Err(e) => {
                debug!("trigger removal skipped: {}", e);
                false
            }
        }
    }

    /// One immediate write into any reachable editable frame body, nested
    /// frames included, else into the top document's focused
    /// contentEditable element.
    fn fallback(&self, anchor: &Anchor, text: &str) -> Option<Archetype> {
        let top = anchor.top_document();
        let mut frames = Vec::new();
        collect_frames(&top, 0, &mut frames);
        for (host, frame) in frames {
            let Ok(Surface::Framed(editor)) = self.resolver.framed(&host, frame) else {
                continue;
            };
            match editor.write(text) {
                Ok(()) => return Some(Archetype::FramedLegacyEditor),
                Err(e) => debug!("fallback write into frame {:?} failed: {}", frame, e),
            }
        }
        focused_rich_region(&top).and_then(|region| match region.write(text) {
            Ok(()) => Some(Archetype::RichRegion),
            Err(e) => {
                debug!("fallback write into focused region failed: {}", e);
                None
            }
        })
    }
}

const MAX_FRAME_DEPTH: usize = 8;

/// Every frame reachable from `doc` paired with its host, depth first in
/// document order.
fn collect_frames(doc: &Document, depth: usize, out: &mut Vec<(Document, NodeId)>) {
    if depth >= MAX_FRAME_DEPTH {
        return;
    }
    for frame in doc.frames().unwrap_or_default() {
        out.push((doc.clone(), frame));
        if let Ok(Some(inner)) = doc.content_document(frame) {
            collect_frames(&inner, depth + 1, out);
        }
    }
}

fn focused_rich_region(doc: &Document) -> Option<RichRegion> {
    let active = doc.active_element()?;
    doc.is_content_editable(active)
        .ok()?
        .then(|| RichRegion::new(doc, active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Boundary, EventKind, FrameContent, Range};
    use crate::text::FixedClock;
    use std::time::Duration;

    fn engine_at(hour: u32) -> InsertionEngine {
        InsertionEngine::with_clock(Config::default(), Arc::new(FixedClock(hour)))
    }

    fn page() -> Document {
        Document::new("https://example.test/")
    }

    #[tokio::test(start_paused = true)]
    async fn plain_field_with_greeting_rewrite() {
        let doc = page();
        let field = doc.create_element("textarea");
        doc.append_child(doc.body(), field).unwrap();
        doc.set_field_selection(field, 0, 0).unwrap();

        let outcome = engine_at(15)
            .insert(&Anchor::new(&doc, field), "Bom dia, obrigado!")
            .await;

        assert_eq!(
            outcome,
            InsertOutcome::Inserted { archetype: Archetype::PlainField, attempts: 1 }
        );
        assert_eq!(doc.value(field).unwrap(), "Boa tarde, obrigado!");
        let caret = "Boa tarde, obrigado!".chars().count();
        assert_eq!(doc.field_selection(field).unwrap(), Some((caret, caret)));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_is_removed_before_insert() {
        let doc = page();
        let field = doc.create_element("input");
        doc.append_child(doc.body(), field).unwrap();
        doc.set_value(field, "Oi /").unwrap();

        engine_at(9).insert(&Anchor::new(&doc, field), "tudo bem?").await;
        assert_eq!(doc.value(field).unwrap(), "Oi tudo bem?");
    }

    #[tokio::test(start_paused = true)]
    async fn rich_region_gets_crlf_normalized_lines() {
        let doc = page();
        let region = doc.create_element("div");
        doc.append_child(doc.body(), region).unwrap();
        doc.set_attribute(region, "contenteditable", "true").unwrap();

        let outcome = engine_at(9)
            .insert(&Anchor::new(&doc, region), "Line1\r\nLine2")
            .await;

        assert!(outcome.is_success());
        let children = doc.children(region).unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(doc.text(children[0]).unwrap(), "Line1");
        assert_eq!(doc.tag(children[1]).unwrap(), "br");
        assert_eq!(doc.text(children[2]).unwrap(), "Line2");
        let kinds: Vec<EventKind> = doc.events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Input]);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_that_loads_late_succeeds_on_third_attempt() {
        let host = page();
        let frame = host.create_frame("/fckeditor/editor/fckeditor.html");
        host.append_child(host.body(), frame).unwrap();

        let loader_host = host.clone();
        let loader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let inner = Document::new("https://example.test/fckeditor.html");
            inner.set_design_mode(true).unwrap();
            loader_host
                .load_frame(frame, FrameContent::Loaded(inner.clone()))
                .unwrap();
            inner
        });

        let outcome = engine_at(9).insert(&Anchor::new(&host, frame), "Olá").await;
        let inner = loader.await.unwrap();

        assert_eq!(
            outcome,
            InsertOutcome::Inserted { archetype: Archetype::FramedLegacyEditor, attempts: 3 }
        );
        assert_eq!(inner.inner_text(inner.body()).unwrap(), "Olá");
    }

    #[tokio::test(start_paused = true)]
    async fn cross_origin_frame_fails_without_retrying() {
        let host = page();
        let frame = host.create_frame("https://elsewhere.test/editor");
        host.append_child(host.body(), frame).unwrap();
        host.load_frame(frame, FrameContent::CrossOrigin).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = engine_at(9).insert(&Anchor::new(&host, frame), "x").await;

        assert!(matches!(outcome, InsertOutcome::Failed(InsertError::AccessDenied(_))));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_falls_back_to_editable_frame() {
        let host = page();
        let div = host.create_element("div");
        host.append_child(host.body(), div).unwrap();
        let frame = host.create_frame("/compose.html");
        host.append_child(host.body(), frame).unwrap();
        let inner = Document::new("https://example.test/compose.html");
        inner.set_design_mode(true).unwrap();
        host.load_frame(frame, FrameContent::Loaded(inner.clone()))
            .unwrap();

        let started = tokio::time::Instant::now();
        let outcome = engine_at(9).insert(&Anchor::new(&host, div), "fallback").await;

        assert_eq!(
            outcome,
            InsertOutcome::InsertedByFallback {
                archetype: Archetype::FramedLegacyEditor,
                attempts: 6
            }
        );
        assert_eq!(inner.inner_text(inner.body()).unwrap(), "fallback");
        assert_eq!(started.elapsed(), Duration::from_millis(5 * 80));
    }

    #[tokio::test(start_paused = true)]
    async fn body_anchor_passes_over_cross_origin_editor_frame() {
        let host = page();
        let foreign = host.create_frame("https://cdn.other.test/ckeditor/frame.html");
        host.append_child(host.body(), foreign).unwrap();
        host.load_frame(foreign, FrameContent::CrossOrigin).unwrap();
        let local = host.create_frame("/editor/ckeditor.html");
        host.append_child(host.body(), local).unwrap();
        let inner = Document::new("https://example.test/editor/ckeditor.html");
        inner.set_design_mode(true).unwrap();
        host.load_frame(local, FrameContent::Loaded(inner.clone()))
            .unwrap();

        let outcome = engine_at(9)
            .insert(&Anchor::new(&host, host.body()), "Olá")
            .await;

        assert_eq!(
            outcome,
            InsertOutcome::Inserted { archetype: Archetype::FramedLegacyEditor, attempts: 1 }
        );
        assert_eq!(inner.inner_text(inner.body()).unwrap(), "Olá");
    }

    #[tokio::test(start_paused = true)]
    async fn body_anchor_with_only_cross_origin_frame_still_falls_back() {
        let doc = page();
        let foreign = doc.create_frame("https://cdn.other.test/fckeditor.html");
        doc.append_child(doc.body(), foreign).unwrap();
        doc.load_frame(foreign, FrameContent::CrossOrigin).unwrap();
        let region = doc.create_element("div");
        doc.append_child(doc.body(), region).unwrap();
        doc.set_attribute(region, "contenteditable", "true").unwrap();
        doc.focus(region).unwrap();

        let outcome = engine_at(9)
            .insert(&Anchor::new(&doc, doc.body()), "aqui")
            .await;

        assert!(matches!(
            outcome,
            InsertOutcome::InsertedByFallback { archetype: Archetype::RichRegion, attempts: 6 }
        ));
        assert_eq!(doc.inner_text(region).unwrap(), "aqui");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_falls_back_to_nested_frame() {
        let host = page();
        let div = host.create_element("div");
        host.append_child(host.body(), div).unwrap();
        let outer = host.create_frame("/shell.html");
        host.append_child(host.body(), outer).unwrap();
        let shell = Document::new("https://example.test/shell.html");
        host.load_frame(outer, FrameContent::Loaded(shell.clone()))
            .unwrap();
        let nested = shell.create_frame("/compose.html");
        shell.append_child(shell.body(), nested).unwrap();
        let inner = Document::new("https://example.test/compose.html");
        inner.set_design_mode(true).unwrap();
        shell
            .load_frame(nested, FrameContent::Loaded(inner.clone()))
            .unwrap();

        let outcome = engine_at(9).insert(&Anchor::new(&host, div), "deep").await;

        assert!(matches!(
            outcome,
            InsertOutcome::InsertedByFallback { archetype: Archetype::FramedLegacyEditor, .. }
        ));
        assert_eq!(inner.inner_text(inner.body()).unwrap(), "deep");
        assert_eq!(shell.inner_text(shell.body()).unwrap(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_falls_back_to_focused_region() {
        let doc = page();
        let stale = doc.create_element("textarea");
        doc.append_child(doc.body(), stale).unwrap();
        let region = doc.create_element("div");
        doc.append_child(doc.body(), region).unwrap();
        doc.set_attribute(region, "contenteditable", "true").unwrap();
        doc.focus(region).unwrap();
        doc.remove(stale).unwrap();

        let outcome = engine_at(9).insert(&Anchor::new(&doc, stale), "here").await;

        assert!(matches!(
            outcome,
            InsertOutcome::InsertedByFallback { archetype: Archetype::RichRegion, .. }
        ));
        assert_eq!(doc.inner_text(region).unwrap(), "here");
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_leaves_no_content() {
        let doc = page();
        let div = doc.create_element("div");
        doc.append_child(doc.body(), div).unwrap();

        let outcome = engine_at(9).insert(&Anchor::new(&doc, div), "nothing").await;

        assert!(matches!(
            outcome,
            InsertOutcome::Failed(InsertError::Exhausted { attempts: 6, .. })
        ));
        assert_eq!(doc.inner_text(doc.body()).unwrap(), "");
        assert!(doc.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn body_anchor_strips_trigger_inside_legacy_frame() {
        let host = page();
        let frame = host.create_frame("/editor/fckeditor.html?InstanceName=mensagem");
        host.append_child(host.body(), frame).unwrap();
        let inner = Document::new("https://example.test/fckeditor.html");
        inner.set_design_mode(true).unwrap();
        host.load_frame(frame, FrameContent::Loaded(inner.clone()))
            .unwrap();
        let typed = inner.create_text("Prezado/");
        inner.append_child(inner.body(), typed).unwrap();
        inner
            .set_selection(Some(Range::collapsed(Boundary::new(typed, 8))))
            .unwrap();

        let outcome = engine_at(20)
            .insert(&Anchor::new(&host, host.body()), " boa tarde")
            .await;

        assert!(outcome.is_success());
        assert_eq!(inner.inner_text(inner.body()).unwrap(), "Prezado Boa noite");
    }

    #[test]
    fn prepare_applies_greeting_and_line_breaks() {
        let engine = engine_at(6);
        assert_eq!(engine.prepare("Boa noite\r\nTchau"), "Bom dia\nTchau");
    }
}
