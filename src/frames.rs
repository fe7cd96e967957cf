//! Discovery of frames present now and created later.
//!
//! Every frame element is probed once: immediately, on each load signal, and
//! on a bounded schedule of deferred attempts. Ready same-origin documents are
//! handed to the registry and watched for nested frames in turn.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::FrameConfig;
use crate::dom::{Document, MutationCallback, MutationRecord, NodeId, ObserverId};
use crate::errors::DomError;
use crate::registry::SurfaceRegistry;

/// Set on a frame element once probing has been scheduled for it.
pub const FRAME_PROBE_MARKER: &str = "quickreply-frame-probe";
/// Id of the inner document that was last attached through this frame.
pub const FRAME_ATTACHED_MARKER: &str = "quickreply-frame-attached";
/// Set on a frame element whose document belongs to another origin.
pub const FRAME_DENIED_MARKER: &str = "quickreply-frame-denied";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Attached,
    AlreadyAttached,
    NotReady,
    Denied,
    /// The frame or its host document no longer exists.
    Gone,
}

pub struct FrameWatcher {
    registry: Weak<SurfaceRegistry>,
    config: FrameConfig,
    me: Weak<FrameWatcher>,
}

impl FrameWatcher {
    pub fn new(registry: &Arc<SurfaceRegistry>, config: FrameConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry: Arc::downgrade(registry),
            config,
            me: me.clone(),
        })
    }

    /// Instruments `document`, every frame in it, and every frame added
    /// later. Also keeps a periodic rescan running while the document lives.
    pub fn start(&self, document: &Document) -> Option<JoinHandle<()>> {
        if let Some(registry) = self.registry.upgrade() {
            registry.attach(document);
        }
        self.observe(document);
        for frame in self.scan(document) {
            self.try_attach(document, frame);
        }
        self.spawn_rescan(document)
    }

    /// Frame elements currently in `document`.
    pub fn scan(&self, document: &Document) -> Vec<NodeId> {
        match document.frames() {
            Ok(frames) => frames,
            Err(e) => {
                debug!("scan of document {} skipped: {}", document.id(), e);
                Vec::new()
            }
        }
    }

    /// Watches `document` for inserted frames, including frames inside an
    /// inserted subtree. Each structural change also re-attaches the document,
    /// which is a no-op once it is instrumented.
    pub fn observe(&self, document: &Document) -> Option<ObserverId> {
        let watcher = self.me.clone();
        let callback: MutationCallback = Arc::new(move |doc: &Document, record: &MutationRecord| {
            let Some(watcher) = watcher.upgrade() else {
                return;
            };
            if let Some(registry) = watcher.registry.upgrade() {
                registry.attach(doc);
            }
            for node in &record.added {
                for frame in doc.frames_within(*node).unwrap_or_default() {
                    watcher.try_attach(doc, frame);
                }
            }
        });
        match document.observe_mutations(callback) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("cannot observe document {}: {}", document.id(), e);
                None
            }
        }
    }

    /// Starts probing `frame` unless it is already being probed.
    pub fn try_attach(&self, host: &Document, frame: NodeId) {
        match host.try_mark_node(frame, FRAME_PROBE_MARKER, host.id()) {
            Ok(true) => {}
            Ok(false) => {
                trace!("frame {:?} in document {} already probed", frame, host.id());
                return;
            }
            Err(e) => {
                debug!("cannot mark frame {:?}: {}", frame, e);
                return;
            }
        }

        let watcher = self.me.clone();
        let on_load = Arc::new(move |host: &Document, frame: NodeId| {
            if let Some(watcher) = watcher.upgrade() {
                watcher.probe(host, frame);
            }
        });
        if let Err(e) = host.add_load_listener(frame, on_load) {
            debug!("cannot listen for loads of frame {:?}: {}", frame, e);
        }

        if self.probe(host, frame) == ProbeOutcome::NotReady {
            self.schedule_probes(host, frame);
        }
    }

    /// One look at the frame's document.
    pub fn probe(&self, host: &Document, frame: NodeId) -> ProbeOutcome {
        if matches!(host.node_marker(frame, FRAME_DENIED_MARKER), Ok(Some(_))) {
            return ProbeOutcome::Denied;
        }
        let inner = match host.content_document(frame) {
            Ok(Some(inner)) => inner,
            Ok(None) => return ProbeOutcome::NotReady,
            Err(DomError::CrossOrigin(_)) => {
                if let Err(e) = host.set_node_marker(frame, FRAME_DENIED_MARKER, 1) {
                    debug!("cannot mark denied frame {:?}: {}", frame, e);
                }
                info!(
                    "frame {:?} in document {} is cross-origin; not instrumenting it",
                    frame,
                    host.id()
                );
                return ProbeOutcome::Denied;
            }
            Err(e) => {
                debug!("frame {:?} is gone: {}", frame, e);
                return ProbeOutcome::Gone;
            }
        };

        let navigated = match host.swap_node_marker(frame, FRAME_ATTACHED_MARKER, inner.id()) {
            Ok(Some(previous)) if previous == inner.id() => return ProbeOutcome::AlreadyAttached,
            Ok(previous) => previous.is_some(),
            Err(e) => {
                debug!("frame {:?} is gone: {}", frame, e);
                return ProbeOutcome::Gone;
            }
        };

        match self.registry.upgrade() {
            Some(registry) => {
                if navigated {
                    registry.prune();
                }
                registry.attach(&inner);
            }
            None => {
                warn!("registry dropped; frame document {} left alone", inner.id());
                return ProbeOutcome::Gone;
            }
        }
        self.observe(&inner);
        for nested in self.scan(&inner) {
            self.try_attach(&inner, nested);
        }
        debug!("frame {:?} attached document {}", frame, inner.id());
        ProbeOutcome::Attached
    }

    fn schedule_probes(&self, host: &Document, frame: NodeId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime; frame {:?} relies on its load signal", frame);
            return;
        };
        let delays: Vec<Duration> = self.config.probe_delays().collect();
        let watcher = self.me.clone();
        let host = host.downgrade();
        runtime.spawn(async move {
            let mut waited = Duration::ZERO;
            for delay in delays {
                tokio::time::sleep(delay.saturating_sub(waited)).await;
                waited = delay;
                let (Some(watcher), Some(host)) = (watcher.upgrade(), host.upgrade()) else {
                    return;
                };
                match watcher.probe(&host, frame) {
                    ProbeOutcome::NotReady => continue,
                    outcome => {
                        trace!("deferred probe of frame {:?}: {:?}", frame, outcome);
                        return;
                    }
                }
            }
            debug!("frame {:?} never produced a document; giving up", frame);
        });
    }

    fn spawn_rescan(&self, document: &Document) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let period = self.config.rescan_interval();
        if period.is_zero() {
            return None;
        }
        let watcher = self.me.clone();
        let document = document.downgrade();
        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (Some(watcher), Some(doc)) = (watcher.upgrade(), document.upgrade()) else {
                    break;
                };
                if doc.is_detached() {
                    break;
                }
                if let Some(registry) = watcher.registry.upgrade() {
                    registry.prune();
                }
                for frame in watcher.scan(&doc) {
                    watcher.try_attach(&doc, frame);
                }
            }
            debug!("rescan of document {} stopped", document.id());
        }))
    }
}
