//! Per-peer staging tree.
//!
//! Every peer gets its own root under the node's data root:
//!   <data_root>/<peer>/incoming/<agent>/<file>   finished incoming files
//!   <data_root>/<peer>/outgoing/<agent>/<file>   files waiting to be sent
//!   <data_root>/<peer>/temp/file/in_<tx>.{meta,file}
//!   <data_root>/<peer>/temp/file/out_<tx>.meta

use std::fs;
use std::path::{Path, PathBuf};

use groundlink_core::wire::{TxId, MAX_AGENT_NAME_LEN, MAX_FILE_NAME_LEN};

use crate::error::{IoContext, Result, TransferError};
use crate::transaction::Direction;

/// A regular file found in a peer's outgoing area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub agent_name: String,
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(data_root: &Path, peer_name: &str) -> Self {
        Self {
            root: data_root.join(peer_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create incoming/, outgoing/ and temp/file/.
    pub fn create_all(&self) -> Result<()> {
        for dir in [self.incoming_dir(), self.outgoing_dir(), self.temp_dir()] {
            fs::create_dir_all(&dir)
                .io_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join("incoming")
    }

    pub fn outgoing_dir(&self) -> PathBuf {
        self.root.join("outgoing")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp").join("file")
    }

    pub fn incoming_path(&self, agent: &str, file: &str) -> PathBuf {
        self.incoming_dir().join(agent).join(file)
    }

    pub fn outgoing_path(&self, agent: &str, file: &str) -> PathBuf {
        self.outgoing_dir().join(agent).join(file)
    }

    /// `temp/file/{in_,out_}<tx>`; `.meta` and `.file` hang off this.
    pub fn staging_base(&self, direction: Direction, tx_id: TxId) -> PathBuf {
        self.temp_dir()
            .join(format!("{}{}", direction.prefix(), tx_id))
    }

    /// Every `.meta` file in temp/file, with the direction its prefix names.
    /// Files with neither prefix are skipped.
    pub fn checkpoint_files(&self) -> Vec<(Direction, PathBuf)> {
        let mut found = Vec::new();
        let Ok(entries) = fs::read_dir(self.temp_dir()) else {
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let direction = if name.starts_with(Direction::Incoming.prefix()) {
                Direction::Incoming
            } else if name.starts_with(Direction::Outgoing.prefix()) {
                Direction::Outgoing
            } else {
                continue;
            };
            found.push((direction, path));
        }
        found.sort_by(|a, b| a.1.cmp(&b.1));
        found
    }

    /// Regular files under outgoing/<agent>/, ascending by size.
    /// Directories nested below an agent directory are skipped.
    pub fn outgoing_files(&self) -> Result<Vec<OutgoingFile>> {
        let dir = self.outgoing_dir();
        let agents =
            fs::read_dir(&dir).io_context(|| format!("failed to list {}", dir.display()))?;

        let mut files = Vec::new();
        for agent in agents.flatten() {
            if !agent.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(agent_name) = agent.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(entries) = fs::read_dir(agent.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                files.push(OutgoingFile {
                    agent_name: agent_name.clone(),
                    file_name,
                    path: entry.path(),
                    size: meta.len(),
                });
            }
        }
        files.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.path.cmp(&b.path)));
        Ok(files)
    }
}

/// A single path component that fits the wire limit.
pub fn validate_file_name(name: &str) -> Result<()> {
    validate_component(name, MAX_FILE_NAME_LEN)
}

pub fn validate_agent_name(name: &str) -> Result<()> {
    validate_component(name, MAX_AGENT_NAME_LEN)
}

fn validate_component(name: &str, max: usize) -> Result<()> {
    if name.is_empty()
        || name.len() > max
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(TransferError::InvalidFilename(name.to_string()));
    }
    Ok(())
}
