use std::sync::atomic::Ordering;
use std::time::Duration;

use scene::{ElementId, Scene};
use serde_json::json;

use super::*;
use crate::collab::test_helpers::Fakes;
use crate::context::BootstrapState;
use crate::link::RoomLink;

const ORIGIN: &str = "https://draw.example.com";

fn el(id: &str, version: i64, nonce: i64) -> SceneElement {
    SceneElement {
        id: ElementId::new(id),
        version,
        version_nonce: nonce,
        is_deleted: false,
        updated: 0,
        props: Map::new(),
    }
}

fn image(id: &str, file_id: &str, status: &str) -> SceneElement {
    let mut e = el(id, 1, 1);
    e.props.insert("type".into(), json!("image"));
    e.props.insert("fileId".into(), json!(file_id));
    e.props.insert("status".into(), json!(status));
    e
}

fn scheduler_with(fakes: &Fakes, ctx: SessionContext) -> Scheduler {
    Scheduler::new(ctx, fakes.collaborators(), SessionConfig::default())
}

fn scheduler(fakes: &Fakes) -> Scheduler {
    scheduler_with(fakes, SessionContext::new(&SessionConfig::default()))
}

fn version_of(scheduler: &Scheduler, id: &str) -> Option<i64> {
    scheduler.context().store.get(&ElementId::new(id)).map(|e| e.version)
}

// =============================================================
// Remote batches and local edits
// =============================================================

#[tokio::test]
async fn remote_batch_updates_store_renders_and_persists() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);

    let batch = vec![json!({"id": "a", "version": 1, "versionNonce": 3}), json!({"id": "", "version": 1})];
    let flow = s.handle(SessionEvent::RemoteBatch(batch)).await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(version_of(&s, "a"), Some(1));
    assert_eq!(s.context().store.len(), 1);
    assert_eq!(fakes.renderer.update_count(), 1);
    assert_eq!(fakes.local.save_count(), 1);
    assert!(s.is_cloud_dirty());
}

#[tokio::test]
async fn stale_remote_batch_changes_nothing() {
    let fakes = Fakes::new();
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.store.replace_all(vec![el("a", 5, 1)]);
    let mut s = scheduler_with(&fakes, ctx);

    s.handle(SessionEvent::RemoteBatch(vec![json!({"id": "a", "version": 3})])).await;

    assert_eq!(version_of(&s, "a"), Some(5));
    assert_eq!(fakes.renderer.update_count(), 0);
    assert_eq!(fakes.local.save_count(), 0);
    assert!(!s.is_cloud_dirty());
}

#[tokio::test]
async fn local_edit_syncs_changed_elements_when_collaborating() {
    let fakes = Fakes::new();
    fakes.collab.collaborating.store(true, Ordering::SeqCst);
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.store.replace_all(vec![el("a", 1, 1), el("b", 1, 1)]);
    let mut s = scheduler_with(&fakes, ctx);

    s.handle(SessionEvent::LocalEdit(vec![el("b", 2, 9)])).await;

    assert_eq!(*fakes.collab.synced.lock().unwrap(), vec![vec![el("b", 2, 9)]]);
    assert_eq!(fakes.local.save_count(), 1);
    assert!(s.is_cloud_dirty());
}

#[tokio::test]
async fn local_edit_is_not_sent_when_solo() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    s.handle(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await;
    assert!(fakes.collab.synced.lock().unwrap().is_empty());
    assert_eq!(fakes.local.save_count(), 1);
}

#[tokio::test]
async fn paused_storage_skips_local_save() {
    let fakes = Fakes::new();
    fakes.local.set_paused(true);
    let mut s = scheduler(&fakes);

    s.handle(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await;

    assert_eq!(version_of(&s, "a"), Some(1));
    assert_eq!(fakes.local.save_count(), 0);
}

#[tokio::test]
async fn saved_files_mark_images_saved() {
    let fakes = Fakes::new();
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.files.insert("f1".into(), json!({"mimeType": "image/png"}));
    let mut s = scheduler_with(&fakes, ctx);

    s.handle(SessionEvent::LocalEdit(vec![image("img", "f1", "pending")])).await;

    let stored = s.context().store.get(&ElementId::new("img")).cloned().unwrap();
    assert_eq!(stored.status(), Some("saved"));
    assert_eq!(stored.version, 2);
    assert_eq!(fakes.renderer.update_count(), 1);
}

#[tokio::test]
async fn saved_image_status_reaches_peers_storage_and_cloud() {
    let fakes = Fakes::new();
    fakes.collab.collaborating.store(true, Ordering::SeqCst);
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.board_id = "b1".into();
    ctx.files.insert("f1".into(), json!({"mimeType": "image/png"}));
    let mut s = scheduler_with(&fakes, ctx);

    s.handle(SessionEvent::LocalEdit(vec![image("img", "f1", "pending")])).await;

    let synced = fakes.collab.synced.lock().unwrap().clone();
    let last = synced.last().and_then(|batch| batch.first()).cloned().unwrap();
    assert_eq!((last.version, last.status()), (2, Some("saved")));

    let persisted = fakes.local.stored_scene().elements;
    assert_eq!(persisted.len(), 1);
    assert_eq!((persisted[0].version, persisted[0].status()), (2, Some("saved")));

    assert!(s.is_cloud_dirty());
    s.save_to_cloud().await;
    let updates = fakes.boards.updates.lock().unwrap().clone();
    assert_eq!(updates[0].elements[0].status(), Some("saved"));
}

#[tokio::test(start_paused = true)]
async fn missing_image_files_are_marked_errored_and_saved() {
    let stored = Scene::new(vec![image("img", "gone", "saved")]);
    let fakes = Fakes::with_local(crate::memory::MemoryPersistence::with_scene(stored));

    let s = Scheduler::start(SessionConfig::default(), fakes.collaborators(), ORIGIN).await;

    let local = s.context().store.get(&ElementId::new("img")).cloned().unwrap();
    assert_eq!((local.version, local.status()), (2, Some("error")));
    assert_eq!(fakes.local.stored_scene().elements[0].status(), Some("error"));
    assert!(s.is_cloud_dirty());
}

#[tokio::test]
async fn app_state_change_updates_theme_and_saves() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    let mut patch = Map::new();
    patch.insert("theme".into(), json!("dark"));

    s.handle(SessionEvent::AppStateChanged(patch)).await;

    assert_eq!(s.context().theme, crate::context::Theme::Dark);
    assert_eq!(fakes.local.stored_scene().app_state.get("theme"), Some(&json!("dark")));
}

// =============================================================
// Environment events
// =============================================================

#[tokio::test]
async fn navigating_away_from_room_stops_collaboration() {
    let fakes = Fakes::new();
    fakes.collab.collaborating.store(true, Ordering::SeqCst);
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.room = Some(RoomLink { room_id: "r".into(), room_key: "k".into() });
    let mut s = scheduler_with(&fakes, ctx);

    let href = format!("{ORIGIN}/");
    s.handle(EnvironmentEvent::NavigationChanged { href }.into()).await;

    assert_eq!(fakes.collab.stops.load(Ordering::SeqCst), 1);
    assert!(s.context().room.is_none());
    assert_eq!(s.context().bootstrap_state(), BootstrapState::Ready);
    assert!(!s.context().is_loading());
}

#[tokio::test]
async fn navigating_between_rooms_keeps_collaboration_running() {
    let fakes = Fakes::new();
    fakes.collab.collaborating.store(true, Ordering::SeqCst);
    let mut s = scheduler(&fakes);

    let href = format!("{ORIGIN}/#room=other,key");
    s.handle(EnvironmentEvent::NavigationChanged { href }.into()).await;

    assert_eq!(fakes.collab.stops.load(Ordering::SeqCst), 0);
    let joined = fakes.collab.joined.lock().unwrap().clone();
    assert_eq!(joined, vec![RoomLink { room_id: "other".into(), room_key: "key".into() }]);
}

#[tokio::test]
async fn failed_room_join_shows_error_message() {
    let fakes = Fakes::new();
    fakes.collab.fail_start.store(true, Ordering::SeqCst);
    let mut s = scheduler(&fakes);

    let href = format!("{ORIGIN}/#room=r,k");
    s.handle(EnvironmentEvent::NavigationChanged { href }.into()).await;

    assert!(s.context().error_message().is_some());
}

#[tokio::test]
async fn hiding_and_blur_flush_local_storage() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    s.handle(EnvironmentEvent::VisibilityChanged { visible: false }.into()).await;
    s.handle(EnvironmentEvent::Blur.into()).await;
    assert_eq!(fakes.local.flush_count(), 2);
    assert!(!s.tab_sync_pending());
}

#[tokio::test]
async fn focus_arms_tab_sync_and_runs_deferred_bootstrap() {
    let fakes = Fakes::new();
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.deferred_href = Some(format!("{ORIGIN}/"));
    let mut s = scheduler_with(&fakes, ctx);

    s.handle(EnvironmentEvent::Focus.into()).await;

    assert!(s.tab_sync_pending());
    assert!(s.context().deferred_href.is_none());
    assert_eq!(s.context().bootstrap_state(), BootstrapState::Ready);
}

#[tokio::test]
async fn before_exit_blocks_on_unsaved_images() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    s.handle(SessionEvent::LocalEdit(vec![image("img", "f1", "pending")])).await;

    let flow = s.handle(EnvironmentEvent::BeforeExit.into()).await;

    assert_eq!(flow, Flow::PreventUnload);
    assert_eq!(fakes.local.flush_count(), 1);
}

#[tokio::test]
async fn before_exit_with_everything_saved_continues() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    s.handle(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await;
    assert_eq!(s.handle(EnvironmentEvent::BeforeExit.into()).await, Flow::Continue);
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    assert_eq!(s.handle(SessionEvent::Shutdown).await, Flow::Stop);
}

// =============================================================
// Cloud saves
// =============================================================

fn board_scheduler(fakes: &Fakes) -> Scheduler {
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.board_id = "b1".into();
    scheduler_with(fakes, ctx)
}

#[tokio::test]
async fn dirty_board_is_saved_once() {
    let fakes = Fakes::new();
    let mut s = board_scheduler(&fakes);
    s.handle(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await;

    s.save_to_cloud().await;
    s.save_to_cloud().await;

    let updates = fakes.boards.updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, "b1");
    assert_eq!(updates[0].elements, vec![el("a", 1, 1)]);
    assert!(!s.is_cloud_dirty());
}

#[tokio::test]
async fn retryable_cloud_failure_keeps_board_dirty() {
    let fakes = Fakes::new();
    fakes.boards.fail.store(true, Ordering::SeqCst);
    let mut s = board_scheduler(&fakes);
    s.handle(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await;

    s.save_to_cloud().await;
    assert!(s.is_cloud_dirty());

    fakes.boards.fail.store(false, Ordering::SeqCst);
    s.save_to_cloud().await;
    assert!(!s.is_cloud_dirty());
    assert_eq!(fakes.boards.updates.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn no_board_means_no_cloud_save() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    s.handle(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await;
    s.save_to_cloud().await;
    assert!(fakes.boards.updates.lock().unwrap().is_empty());
}

// =============================================================
// Tab sync
// =============================================================

#[tokio::test]
async fn newer_storage_from_another_tab_is_reconciled_in() {
    let fakes = Fakes::new();
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.store.replace_all(vec![el("a", 1, 1), el("b", 4, 1)]);
    let mut s = scheduler_with(&fakes, ctx);

    fakes.local.write_from_other_tab(&Scene::new(vec![el("a", 2, 1), el("b", 3, 1)]));
    s.sync_tabs().await;

    assert_eq!(version_of(&s, "a"), Some(2));
    assert_eq!(version_of(&s, "b"), Some(4));
    assert_eq!(fakes.renderer.update_count(), 1);

    s.sync_tabs().await;
    assert_eq!(fakes.renderer.update_count(), 1);
}

#[tokio::test]
async fn own_saves_do_not_trigger_reload() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    s.handle(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await;

    s.sync_tabs().await;
    assert_eq!(fakes.renderer.update_count(), 0);
}

#[tokio::test]
async fn tab_sync_waits_while_collaborating_or_hidden() {
    let fakes = Fakes::new();
    let mut s = scheduler(&fakes);
    fakes.local.write_from_other_tab(&Scene::new(vec![el("a", 1, 1)]));

    fakes.collab.collaborating.store(true, Ordering::SeqCst);
    s.sync_tabs().await;
    assert!(s.context().store.is_empty());

    fakes.collab.collaborating.store(false, Ordering::SeqCst);
    fakes.renderer.hidden.store(true, Ordering::SeqCst);
    s.sync_tabs().await;
    assert!(s.context().store.is_empty());

    fakes.renderer.hidden.store(false, Ordering::SeqCst);
    s.sync_tabs().await;
    assert_eq!(s.context().store.len(), 1);
}

#[tokio::test]
async fn newer_files_load_missing_images() {
    let fakes = Fakes::new();
    let img = image("img", "f9", "saved");
    let mut ctx = SessionContext::new(&SessionConfig::default());
    ctx.store.replace_all(vec![img.clone()]);
    let mut s = scheduler_with(&fakes, ctx);

    let mut other = Scene::new(vec![img]);
    other.files.insert("f9".into(), json!({"mimeType": "image/png"}));
    fakes.local.write_from_other_tab(&other);
    s.sync_tabs().await;

    assert!(s.context().files.contains_key("f9"));
}

// =============================================================
// Running loop
// =============================================================

#[tokio::test(start_paused = true)]
async fn spawned_session_saves_to_cloud_and_answers_unload_checks() {
    let fakes = Fakes::new();
    let (handle, task) = spawn(board_scheduler(&fakes), 16);

    handle.send(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await.unwrap();
    handle.send(EnvironmentEvent::Focus).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!handle.before_exit().await.unwrap());
    handle.shutdown().await.unwrap();
    let ctx = task.await.unwrap();

    assert_eq!(ctx.store.len(), 1);
    assert_eq!(fakes.boards.updates.lock().unwrap().len(), 1);
    assert!(matches!(handle.send(EnvironmentEvent::Blur).await, Err(SessionError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn zero_cloud_save_interval_does_not_stop_the_loop() {
    let fakes = Fakes::new();
    let config = SessionConfig { cloud_save_interval: Duration::ZERO, ..SessionConfig::default() };
    let mut ctx = SessionContext::new(&config);
    ctx.board_id = "b1".into();
    let (handle, task) = spawn(Scheduler::new(ctx, fakes.collaborators(), config), 4);

    handle.send(SessionEvent::LocalEdit(vec![el("a", 1, 1)])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    handle.shutdown().await.unwrap();

    let ctx = task.await.unwrap();
    assert_eq!(ctx.store.len(), 1);
    assert_eq!(fakes.boards.updates.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn session_start_bootstraps_from_local_storage() {
    let stored = Scene::new(vec![el("a", 1, 1)]);
    let fakes = Fakes::with_local(crate::memory::MemoryPersistence::with_scene(stored));

    let s = Scheduler::start(SessionConfig::default(), fakes.collaborators(), ORIGIN).await;

    assert_eq!(s.context().bootstrap_state(), BootstrapState::Ready);
    assert_eq!(s.context().store.len(), 1);
    assert_eq!(fakes.renderer.update_count(), 1);
}
