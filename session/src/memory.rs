//! In-memory local persistence for headless hosts and tests.
//!
//! Behaves like browser storage shared between tabs: every write bumps the
//! stamp of the key it touched, and `write_from_other_tab` lets a caller
//! play the part of a second tab.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use scene::{Scene, SceneElement};
use serde_json::{Map, Value};

use crate::collab::{LoadedFiles, LocalPersistence, SaveReport};
use crate::error::SessionError;
use crate::tabsync::StorageKey;

#[derive(Debug, Default)]
struct Inner {
    scene: Scene,
    files: Map<String, Value>,
    data_stamp: u64,
    files_stamp: u64,
    paused: bool,
    saves: usize,
    flushes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    inner: Mutex<Inner>,
}

impl MemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `scene`; its files land in the file store.
    #[must_use]
    pub fn with_scene(scene: Scene) -> Self {
        let Scene { elements, app_state, files } = scene;
        Self {
            inner: Mutex::new(Inner {
                scene: Scene { elements, app_state, files: Map::new() },
                files,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `scene` as another tab would, bumping the stamps it touches.
    pub fn write_from_other_tab(&self, scene: &Scene) {
        let mut inner = self.lock();
        inner.scene.elements.clone_from(&scene.elements);
        inner.scene.app_state.clone_from(&scene.app_state);
        inner.data_stamp += 1;
        if !scene.files.is_empty() {
            for (id, file) in &scene.files {
                inner.files.insert(id.clone(), file.clone());
            }
            inner.files_stamp += 1;
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    /// Stored scene including files.
    #[must_use]
    pub fn stored_scene(&self) -> Scene {
        let inner = self.lock();
        Scene { files: inner.files.clone(), ..inner.scene.clone() }
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }
}

#[async_trait]
impl LocalPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Scene, SessionError> {
        Ok(self.lock().scene.clone())
    }

    async fn save(&self, scene: &Scene) -> Result<SaveReport, SessionError> {
        let mut inner = self.lock();
        inner.scene.elements.clone_from(&scene.elements);
        inner.scene.app_state.clone_from(&scene.app_state);
        inner.data_stamp += 1;
        inner.saves += 1;

        let mut report = SaveReport::default();
        for (id, file) in &scene.files {
            if !inner.files.contains_key(id) {
                inner.files.insert(id.clone(), file.clone());
                report.saved_files.push(id.clone());
            }
        }
        if !report.saved_files.is_empty() {
            inner.files_stamp += 1;
        }
        Ok(report)
    }

    async fn flush_save(&self) -> Result<(), SessionError> {
        self.lock().flushes += 1;
        Ok(())
    }

    fn is_save_paused(&self) -> bool {
        self.lock().paused
    }

    fn stamp(&self, key: StorageKey) -> u64 {
        let inner = self.lock();
        match key {
            StorageKey::DataState => inner.data_stamp,
            StorageKey::Files => inner.files_stamp,
        }
    }

    async fn load_files(&self, file_ids: &[String]) -> Result<LoadedFiles, SessionError> {
        let inner = self.lock();
        let mut out = LoadedFiles::default();
        for id in file_ids {
            match inner.files.get(id) {
                Some(file) => {
                    out.loaded.insert(id.clone(), file.clone());
                }
                None => out.errored.push(id.clone()),
            }
        }
        Ok(out)
    }

    async fn clear_obsolete_files(&self, keep: &[String]) -> Result<(), SessionError> {
        self.lock().files.retain(|id, _| keep.contains(id));
        Ok(())
    }

    fn should_prevent_unload(&self, elements: &[SceneElement]) -> bool {
        let inner = self.lock();
        elements.iter().any(|e| {
            !e.is_deleted
                && e.status() == Some("pending")
                && e.file_id().is_some_and(|id| !inner.files.contains_key(id))
        })
    }
}

#[cfg(test)]
mod tests {
    use scene::mutate::new_element;
    use serde_json::json;

    use super::*;

    fn image(id: &str, file_id: &str, status: &str) -> SceneElement {
        let props = json!({"type": "image", "fileId": file_id, "status": status});
        new_element(id, props.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn save_bumps_stamps_and_reports_new_files() {
        let store = MemoryPersistence::new();
        let mut scene = Scene::new(vec![image("a", "f1", "pending")]);
        scene.files.insert("f1".into(), json!({"dataURL": "data:"}));

        let report = store.save(&scene).await.unwrap();
        assert_eq!(report.saved_files, vec!["f1".to_owned()]);
        assert_eq!(store.stamp(StorageKey::DataState), 1);
        assert_eq!(store.stamp(StorageKey::Files), 1);

        let again = store.save(&scene).await.unwrap();
        assert!(again.saved_files.is_empty());
        assert_eq!(store.stamp(StorageKey::DataState), 2);
        assert_eq!(store.stamp(StorageKey::Files), 1);
    }

    #[tokio::test]
    async fn load_files_splits_loaded_and_missing() {
        let mut scene = Scene::default();
        scene.files.insert("f1".into(), json!({}));
        let store = MemoryPersistence::with_scene(scene);

        let files = store.load_files(&["f1".into(), "f2".into()]).await.unwrap();
        assert!(files.loaded.contains_key("f1"));
        assert_eq!(files.errored, vec!["f2".to_owned()]);
    }

    #[tokio::test]
    async fn clear_obsolete_files_keeps_referenced_ones() {
        let mut scene = Scene::default();
        scene.files.insert("f1".into(), json!({}));
        scene.files.insert("f2".into(), json!({}));
        let store = MemoryPersistence::with_scene(scene);

        store.clear_obsolete_files(&["f2".into()]).await.unwrap();
        let files = store.stored_scene().files;
        assert!(!files.contains_key("f1"));
        assert!(files.contains_key("f2"));
    }

    #[test]
    fn pending_unsaved_images_block_unload() {
        let store = MemoryPersistence::new();
        assert!(store.should_prevent_unload(&[image("a", "f1", "pending")]));
        assert!(!store.should_prevent_unload(&[image("a", "f1", "saved")]));
    }

    #[test]
    fn other_tab_writes_bump_data_stamp() {
        let store = MemoryPersistence::new();
        store.write_from_other_tab(&Scene::new(vec![image("a", "f1", "saved")]));
        assert_eq!(store.stamp(StorageKey::DataState), 1);
        assert_eq!(store.stamp(StorageKey::Files), 0);
        assert_eq!(store.stored_scene().elements.len(), 1);
    }
}
