// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem-backed plan store.

use crate::snapshot::{StateSnapshot, StoredDefinition};
use crate::StoreError;
use fm_core::{Node, NodeId, PlanId};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const DEFINITION_FILE: &str = "definition.json";
const STATE_FILE: &str = "state.json";
const SPECS_DIR: &str = "specs";
const LOGS_DIR: &str = "logs";

/// One writer per plan; plans write concurrently.
#[derive(Debug, Clone)]
pub struct PlanStore {
    root: PathBuf,
}

impl PlanStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plan_dir(&self, plan_id: PlanId) -> PathBuf {
        self.root.join(plan_id.as_str())
    }

    pub fn exists(&self, plan_id: PlanId) -> bool {
        self.plan_dir(plan_id).join(DEFINITION_FILE).is_file()
    }

    /// IDs of all persisted plans (directories holding a definition).
    pub fn list_plan_ids(&self) -> Result<Vec<PlanId>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if PlanId::is_id_str(name) && entry.path().join(DEFINITION_FILE).is_file() {
                ids.push(PlanId::from_string(name));
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn save_definition(&self, def: &StoredDefinition) -> Result<(), StoreError> {
        let path = self.plan_dir(def.plan_id).join(DEFINITION_FILE);
        write_json_atomic(&path, def)
    }

    /// Persist the snapshot, bumping its `state_version` first. Returns the
    /// version written.
    pub fn save_state(
        &self,
        plan_id: PlanId,
        snapshot: &mut StateSnapshot,
    ) -> Result<u64, StoreError> {
        snapshot.state_version += 1;
        let path = self.plan_dir(plan_id).join(STATE_FILE);
        write_json_atomic(&path, snapshot)?;
        tracing::debug!(plan = %plan_id, version = snapshot.state_version, "state persisted");
        Ok(snapshot.state_version)
    }

    pub fn load(&self, plan_id: PlanId) -> Result<(StoredDefinition, StateSnapshot), StoreError> {
        Ok((self.load_definition(plan_id)?, self.load_state(plan_id)?))
    }

    pub fn load_definition(&self, plan_id: PlanId) -> Result<StoredDefinition, StoreError> {
        let path = self.plan_dir(plan_id).join(DEFINITION_FILE);
        read_json(&path, plan_id)
    }

    pub fn load_state(&self, plan_id: PlanId) -> Result<StateSnapshot, StoreError> {
        let path = self.plan_dir(plan_id).join(STATE_FILE);
        read_json(&path, plan_id)
    }

    /// Version currently on disk, or None when no state was saved yet.
    pub fn state_version_on_disk(&self, plan_id: PlanId) -> Option<u64> {
        self.load_state(plan_id).ok().map(|s| s.state_version)
    }

    /// Persist one node's materialized spec under `specs/`.
    pub fn save_node_spec(&self, plan_id: PlanId, node: &Node) -> Result<(), StoreError> {
        let path = self
            .plan_dir(plan_id)
            .join(SPECS_DIR)
            .join(format!("{}.json", node.id.as_str()));
        write_json_atomic(&path, node)
    }

    pub fn log_path(&self, plan_id: PlanId, node_id: NodeId, attempt: u32) -> PathBuf {
        self.plan_dir(plan_id)
            .join(LOGS_DIR)
            .join(node_id.as_str())
            .join(format!("attempt-{attempt}.log"))
    }

    pub fn append_log(
        &self,
        plan_id: PlanId,
        node_id: NodeId,
        attempt: u32,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let path = self.log_path(plan_id, node_id, attempt);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(&path, e))
    }

    pub fn read_log(
        &self,
        plan_id: PlanId,
        node_id: NodeId,
        attempt: u32,
    ) -> Result<String, StoreError> {
        let path = self.log_path(plan_id, node_id, attempt);
        fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))
    }

    /// Remove the whole plan directory. Idempotent.
    pub fn delete(&self, plan_id: PlanId) -> Result<(), StoreError> {
        let dir = self.plan_dir(plan_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    plan_id: PlanId,
) -> Result<T, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(plan_id.as_str().to_string()));
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(path, e))
}

/// Write-to-tmp then rename, so readers never observe a torn document.
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::corrupt(path, e))?;
    fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
