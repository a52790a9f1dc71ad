//! Scheduler: the single loop through which a session reacts to anything.
//!
//! DESIGN
//! ======
//! One task owns the `SessionContext` and handles one event at a time, so
//! the element store never sees two writers. Every store change, whether
//! it comes from a peer, a local edit, another tab or a bootstrap, goes
//! through the reconciler and lands with a single `replace_all`.
//!
//! TIMERS
//! ======
//! Two timers share the `select!` with the event channel:
//! - a cloud-save interval that writes the board when it is dirty;
//! - a tab-sync deadline armed when the tab becomes visible, debounced so a
//!   burst of focus and visibility events triggers one storage check.
//!
//! ERROR HANDLING
//! ==============
//! Collaborator failures are logged and shown in `errorMessage`; the loop
//! keeps running. Only a closed channel or `Shutdown` stops it.

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod scheduler_test;

use scene::mutate::bump;
use std::time::Duration;

use scene::{SceneElement, reconcile_into, reconcile_values};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collab::{BoardUpdate, Collaborators, SaveReport};
use crate::config::SessionConfig;
use crate::context::SessionContext;
use crate::error::{ErrorCode, SessionError};
use crate::events::{EnvironmentEvent, Flow, SessionEvent};
use crate::link::is_collaboration_link;
use crate::loader::{Bootstrap, ExternalScene, initialize_scene};
use crate::tabsync::StorageKey;

const STATUS_SAVED: &str = "saved";
const STATUS_ERROR: &str = "error";

/// `tokio::time::interval` rejects a zero period.
const MIN_CLOUD_SAVE_INTERVAL: Duration = Duration::from_millis(1);

pub struct Scheduler {
    ctx: SessionContext,
    deps: Collaborators,
    config: SessionConfig,
    cloud_dirty: bool,
    tab_sync_at: Option<Instant>,
}

impl Scheduler {
    #[must_use]
    pub fn new(ctx: SessionContext, deps: Collaborators, config: SessionConfig) -> Self {
        Self { ctx, deps, config, cloud_dirty: false, tab_sync_at: None }
    }

    /// Seed a context from local persistence and run the first bootstrap.
    pub async fn start(config: SessionConfig, deps: Collaborators, href: &str) -> Self {
        let ctx = SessionContext::start(&config, deps.local.as_ref()).await;
        let mut scheduler = Self::new(ctx, deps, config);
        scheduler.bootstrap(href, true).await;
        scheduler
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    #[must_use]
    pub fn is_cloud_dirty(&self) -> bool {
        self.cloud_dirty
    }

    #[must_use]
    pub fn tab_sync_pending(&self) -> bool {
        self.tab_sync_at.is_some()
    }

    /// Run until `Shutdown` or until every sender is dropped, then flush and
    /// return the context.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> SessionContext {
        let mut cloud_tick = tokio::time::interval(self.config.cloud_save_interval.max(MIN_CLOUD_SAVE_INTERVAL));
        cloud_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.tab_sync_at;
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        debug!("session event channel closed");
                        break;
                    };
                    match self.handle(event).await {
                        Flow::Stop => break,
                        Flow::PreventUnload => info!("unsaved files pending; unload should be confirmed"),
                        Flow::Continue => {}
                    }
                }
                _ = cloud_tick.tick() => self.save_to_cloud().await,
                () = wait_until(deadline) => {
                    self.tab_sync_at = None;
                    self.sync_tabs().await;
                }
            }
        }

        self.save_to_cloud().await;
        if let Err(e) = self.deps.local.flush_save().await {
            warn!(error = %e, "final local flush failed");
        }
        info!(elements = self.ctx.store.len(), "session stopped");
        self.ctx
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    pub async fn handle(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Environment(env) => return self.on_environment(env).await,
            SessionEvent::RemoteBatch(values) => self.on_remote_batch(&values).await,
            SessionEvent::LocalEdit(elements) => self.on_local_edit(&elements).await,
            SessionEvent::AppStateChanged(patch) => {
                self.ctx.merge_app_state(patch);
                self.persist_local().await;
            }
            SessionEvent::UnloadCheck(reply) => {
                let blocked = self.on_before_exit().await == Flow::PreventUnload;
                if reply.send(blocked).is_err() {
                    debug!("unload check abandoned by host");
                }
            }
            SessionEvent::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    async fn on_environment(&mut self, event: EnvironmentEvent) -> Flow {
        match event {
            EnvironmentEvent::NavigationChanged { href } => {
                if self.deps.collab.is_collaborating() && !is_collaboration_link(&href) {
                    info!("left collaboration link; stopping collaboration");
                    self.deps.collab.stop_collaboration(false).await;
                    self.ctx.room = None;
                }
                self.ctx.set_loading(true);
                self.render();
                self.bootstrap(&href, false).await;
            }
            EnvironmentEvent::VisibilityChanged { visible: false } | EnvironmentEvent::Blur => self.flush_local().await,
            EnvironmentEvent::VisibilityChanged { visible: true } | EnvironmentEvent::Focus => {
                if let Some(href) = self.ctx.deferred_href.take() {
                    debug!("running deferred bootstrap");
                    self.bootstrap(&href, true).await;
                }
                self.tab_sync_at = Some(Instant::now() + self.config.sync_tabs_debounce);
            }
            EnvironmentEvent::BeforeExit => return self.on_before_exit().await,
        }
        Flow::Continue
    }

    async fn on_before_exit(&mut self) -> Flow {
        self.flush_local().await;
        if self.deps.local.should_prevent_unload(self.ctx.store.all()) {
            Flow::PreventUnload
        } else {
            Flow::Continue
        }
    }

    async fn on_remote_batch(&mut self, values: &[Value]) {
        let result = reconcile_values(values, self.ctx.store.all());
        if result.dropped > 0 {
            warn!(dropped = result.dropped, "remote batch carried invalid elements");
        }
        if result.is_noop() {
            return;
        }
        debug!(changed = result.changed.len(), "remote batch applied");
        self.ctx.store.replace_all(result.elements);
        self.render();
        self.persist_local().await;
        self.cloud_dirty = true;
    }

    async fn on_local_edit(&mut self, elements: &[SceneElement]) {
        let result = reconcile_into(&mut self.ctx.store, elements);
        if result.is_noop() {
            debug!(count = elements.len(), "local edit superseded; nothing to apply");
            return;
        }
        self.publish(&result.changed_elements()).await;
        self.persist_local().await;
        self.cloud_dirty = true;
    }

    /// Send locally produced versions to the room, if there is one.
    async fn publish(&mut self, changed: &[SceneElement]) {
        if changed.is_empty() || !self.deps.collab.is_collaborating() {
            return;
        }
        if let Err(e) = self.deps.collab.sync_elements(changed).await {
            self.report(&e);
        }
    }

    // =========================================================================
    // BOOTSTRAP
    // =========================================================================

    async fn bootstrap(&mut self, href: &str, initial_load: bool) {
        match initialize_scene(&mut self.ctx, &self.deps, href).await {
            Ok(Bootstrap::Loaded(initial)) => {
                let in_room = matches!(initial.external, Some(ExternalScene::Room(_)));
                let revision = self.ctx.load_scene(initial.scene);
                self.ctx.set_loading(false);
                self.render();
                info!(revision, elements = self.ctx.store.len(), in_room, "scene loaded");
                if !in_room {
                    self.load_local_images(initial_load).await;
                }
            }
            Ok(Bootstrap::Deferred) => debug!("bootstrap deferred until the document is visible"),
            Err(e) => self.report(&e),
        }
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Save the scene locally. Image elements whose files were just written
    /// (or failed to write) get a new version carrying their status, which is
    /// published and saved like any local edit.
    async fn persist_local(&mut self) {
        let Some(report) = self.save_scene().await else {
            return;
        };
        let mut changed = self.set_image_status(&report.saved_files, STATUS_SAVED);
        changed.extend(self.set_image_status(&report.errored_files, STATUS_ERROR));
        if changed.is_empty() {
            return;
        }
        debug!(count = changed.len(), "image status updated after local save");
        self.render();
        self.publish(&changed).await;
        self.save_scene().await;
        self.cloud_dirty = true;
    }

    async fn save_scene(&mut self) -> Option<SaveReport> {
        if self.deps.local.is_save_paused() {
            debug!("local save paused");
            return None;
        }
        match self.deps.local.save(&self.ctx.scene()).await {
            Ok(report) => {
                self.ctx.tabs.mark_saved(StorageKey::DataState, self.deps.local.stamp(StorageKey::DataState));
                self.ctx.tabs.mark_saved(StorageKey::Files, self.deps.local.stamp(StorageKey::Files));
                Some(report)
            }
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }

    async fn flush_local(&mut self) {
        if let Err(e) = self.deps.local.flush_save().await {
            self.report(&e);
        }
    }

    /// Write the board to the cloud if anything changed since the last write.
    pub async fn save_to_cloud(&mut self) {
        if !self.cloud_dirty || self.ctx.board_id.is_empty() {
            return;
        }
        let update = BoardUpdate {
            id: self.ctx.board_id.clone(),
            title: None,
            elements: self.ctx.store.snapshot(),
            files: self.ctx.files.clone(),
        };
        match self.deps.boards.update_board(&update).await {
            Ok(updated) => {
                self.cloud_dirty = false;
                if updated {
                    debug!(board_id = %update.id, elements = update.elements.len(), "board saved to cloud");
                } else {
                    warn!(board_id = %update.id, "board save was not applied");
                }
            }
            Err(e) => {
                self.cloud_dirty = e.retryable();
                warn!(error = %e, code = e.error_code(), retry = self.cloud_dirty, "board save failed");
            }
        }
    }

    // =========================================================================
    // TAB SYNC
    // =========================================================================

    /// Pick up writes made by other tabs. Skipped while hidden or in a room.
    pub async fn sync_tabs(&mut self) {
        if self.deps.renderer.is_document_hidden() || self.deps.collab.is_collaborating() {
            return;
        }

        let data_stamp = self.deps.local.stamp(StorageKey::DataState);
        if self.ctx.tabs.is_newer(StorageKey::DataState, data_stamp) {
            match self.deps.local.load().await {
                Ok(stored) => {
                    let result = reconcile_into(&mut self.ctx.store, &stored.elements);
                    self.ctx.merge_app_state(stored.app_state);
                    self.ctx.lang_code.clone_from(&self.config.lang_code);
                    self.render();
                    info!(stamp = data_stamp, changed = result.changed.len(), "synced scene from another tab");
                }
                Err(e) => warn!(error = %e, "tab sync could not read local scene"),
            }
        }

        let files_stamp = self.deps.local.stamp(StorageKey::Files);
        if self.ctx.tabs.is_newer(StorageKey::Files, files_stamp) {
            self.load_local_images(false).await;
        }
    }

    /// Load files for image elements that have none yet. On the first load
    /// of a session, also drop stored files nothing references.
    async fn load_local_images(&mut self, clear_obsolete: bool) {
        let file_ids: Vec<String> = self.ctx.store.all().iter().filter_map(SceneElement::file_id).map(str::to_owned).collect();
        let missing: Vec<String> = file_ids.iter().filter(|id| !self.ctx.files.contains_key(*id)).cloned().collect();

        if !missing.is_empty() {
            match self.deps.local.load_files(&missing).await {
                Ok(files) => {
                    let loaded = files.loaded.len();
                    self.ctx.files.extend(files.loaded);
                    let changed = self.set_image_status(&files.errored, STATUS_ERROR);
                    self.render();
                    debug!(loaded, errored = files.errored.len(), "image files loaded");
                    if !changed.is_empty() {
                        self.publish(&changed).await;
                        self.persist_local().await;
                        self.cloud_dirty = true;
                    }
                }
                Err(e) => warn!(error = %e, "image files could not be loaded"),
            }
        }

        if clear_obsolete {
            if let Err(e) = self.deps.local.clear_obsolete_files(&file_ids).await {
                warn!(error = %e, "obsolete files were not cleared");
            }
        }
    }

    /// Give image elements whose file is in `file_ids` a new version with
    /// `status`. Returns the versions that landed in the store.
    fn set_image_status(&mut self, file_ids: &[String], status: &str) -> Vec<SceneElement> {
        if file_ids.is_empty() {
            return Vec::new();
        }
        let mut patch = Map::new();
        patch.insert("status".into(), Value::from(status));
        let updates: Vec<SceneElement> = self
            .ctx
            .store
            .all()
            .iter()
            .filter(|e| e.status() != Some(status))
            .filter(|e| e.file_id().is_some_and(|id| file_ids.iter().any(|f| f == id)))
            .map(|e| bump(e, &patch))
            .collect();
        reconcile_into(&mut self.ctx.store, &updates).changed_elements()
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    fn render(&self) {
        self.deps.renderer.update_scene(&self.ctx.scene());
    }

    fn report(&mut self, err: &SessionError) {
        warn!(error = %err, code = err.error_code(), "session operation failed");
        if err.is_silent() {
            return;
        }
        self.ctx.set_error_message(err.to_string());
        self.render();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Host-side sender for a running scheduler.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// # Errors
    ///
    /// Returns `SessionError::Closed` once the scheduler has stopped.
    pub async fn send(&self, event: impl Into<SessionEvent>) -> Result<(), SessionError> {
        self.tx.send(event.into()).await.map_err(|_| SessionError::Closed)
    }

    /// Flush and ask whether closing now would lose unsaved files.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` once the scheduler has stopped.
    pub async fn before_exit(&self) -> Result<bool, SessionError> {
        let (reply, answer) = oneshot::channel();
        self.send(SessionEvent::UnloadCheck(reply)).await?;
        answer.await.map_err(|_| SessionError::Closed)
    }

    /// # Errors
    ///
    /// Returns `SessionError::Closed` once the scheduler has stopped.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionEvent::Shutdown).await
    }
}

/// Run `scheduler` on its own task.
#[must_use]
pub fn spawn(scheduler: Scheduler, capacity: usize) -> (SessionHandle, JoinHandle<SessionContext>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(scheduler.run(rx));
    (SessionHandle { tx }, task)
}
