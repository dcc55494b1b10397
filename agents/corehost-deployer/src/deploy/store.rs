//! Record Store
//!
//! File-backed persistence for [`DeploymentRecord`]s. Each agent gets a
//! committed record (`<agent>_deployment.json`) once a terminal status is
//! known, and an in-progress journal (`<agent>_deployment.pending.json`)
//! from the moment its identity exists.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::deploy::record::DeploymentRecord;
use crate::error::StoreError;

/// Which file a record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Committed,
    Pending,
}

/// Directory of deployment record files
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the committed record
    pub fn record_path(&self, agent_name: &str) -> PathBuf {
        self.dir.join(format!("{}_deployment.json", agent_name))
    }

    /// Path of the in-progress journal
    pub fn pending_path(&self, agent_name: &str) -> PathBuf {
        self.dir.join(format!("{}_deployment.pending.json", agent_name))
    }

    /// Load the committed record, falling back to the journal
    pub fn load(&self, agent_name: &str) -> Result<Option<(DeploymentRecord, RecordState)>, StoreError> {
        let committed = self.record_path(agent_name);
        if let Some(record) = Self::read(&committed)? {
            return Ok(Some((record, RecordState::Committed)));
        }
        let pending = self.pending_path(agent_name);
        Ok(Self::read(&pending)?.map(|record| (record, RecordState::Pending)))
    }

    /// Load a record or fail with [`StoreError::NotFound`]
    pub fn require(&self, agent_name: &str) -> Result<DeploymentRecord, StoreError> {
        self.load(agent_name)?
            .map(|(record, _)| record)
            .ok_or_else(|| StoreError::NotFound(agent_name.to_string()))
    }

    /// Write the in-progress journal
    pub fn save_pending(&self, record: &DeploymentRecord) -> Result<PathBuf, StoreError> {
        let path = self.pending_path(&record.agent_name);
        Self::write(&path, record)?;
        Ok(path)
    }

    /// Write the committed record and drop the journal of the same deployment
    pub fn commit(&self, record: &DeploymentRecord) -> Result<PathBuf, StoreError> {
        let path = self.record_path(&record.agent_name);
        Self::write(&path, record)?;
        self.remove_if_holds(&self.pending_path(&record.agent_name), record)?;
        Ok(path)
    }

    /// Rewrite a record in whichever file currently holds it
    pub fn update(&self, record: &DeploymentRecord) -> Result<PathBuf, StoreError> {
        if Self::holds(&self.record_path(&record.agent_name), record)? {
            self.commit(record)
        } else {
            self.save_pending(record)
        }
    }

    /// Remove the files holding `record`'s deployment. Files of another
    /// deployment under the same agent name are kept.
    pub fn remove_record(&self, record: &DeploymentRecord) -> Result<(), StoreError> {
        self.remove_if_holds(&self.record_path(&record.agent_name), record)?;
        self.remove_if_holds(&self.pending_path(&record.agent_name), record)
    }

    fn holds(path: &Path, record: &DeploymentRecord) -> Result<bool, StoreError> {
        Ok(Self::read(path)?.is_some_and(|stored| stored.is_same_deployment(record)))
    }

    fn remove_if_holds(&self, path: &Path, record: &DeploymentRecord) -> Result<(), StoreError> {
        if Self::holds(path, record)? {
            Self::remove_file(path)?;
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Option<DeploymentRecord>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Serde {
                path: path.to_path_buf(),
                source,
            })
    }

    // Whole-file replace: write a sibling temp file, then rename over the target.
    fn write(path: &Path, record: &DeploymentRecord) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let content = serde_json::to_string_pretty(record).map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        debug!(path = %path.display(), "Deployment record written");
        Ok(())
    }

    fn remove_file(path: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Deployment record removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
