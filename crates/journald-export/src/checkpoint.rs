// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable record of the last delivered position.
//!
//! The position is stored as the raw journal cursor in a single file. Saves
//! write a sibling temporary file, flush it to disk and rename it over the
//! previous checkpoint, so a crash at any point leaves either the old or the
//! new position on disk, never a torn one.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::CHECKPOINT_FILE_NAME;
use crate::errors::{CheckpointError, ConfigError};

pub trait CheckpointStore: Send + Sync {
    /// The last saved position, or `None` to start from the beginning.
    fn load(&self) -> Result<Option<String>, CheckpointError>;

    fn save(&self, position: &str) -> Result<(), CheckpointError>;
}

/// Checkpoint kept in `<dir>/after.cursor`, or `<dir>/after.<instance>.cursor`
/// when several exporters share a state directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
    temp_path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>, instance: Option<&str>) -> Result<Self, ConfigError> {
        let file_name = match instance {
            None => CHECKPOINT_FILE_NAME.to_string(),
            Some(instance) => {
                validate_instance(instance)?;
                format!("after.{instance}.cursor")
            }
        };
        let path = dir.as_ref().join(file_name);
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".tmp");
        Ok(Self {
            path,
            temp_path: temp_path.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_temp(&self, position: &str) -> Result<(), CheckpointError> {
        let write_error = |source| CheckpointError::Write {
            path: self.temp_path.clone(),
            source,
        };
        // A leftover from an interrupted save is read-only.
        match fs::remove_file(&self.temp_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(write_error(e)),
            _ => {}
        }
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o400);
        let mut file = options.open(&self.temp_path).map_err(write_error)?;
        file.write_all(position.as_bytes()).map_err(write_error)?;
        file.sync_all().map_err(write_error)
    }

    fn promote_temp(&self) -> Result<(), CheckpointError> {
        fs::rename(&self.temp_path, &self.path).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })?;
        // Persist the rename itself.
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            File::open(dir)
                .and_then(|dir| dir.sync_all())
                .map_err(|source| CheckpointError::Write {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<String>, CheckpointError> {
        match fs::read_to_string(&self.path) {
            Ok(position) if position.is_empty() => Ok(None),
            Ok(position) => Ok(Some(position)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CheckpointError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, position: &str) -> Result<(), CheckpointError> {
        self.write_temp(position)?;
        self.promote_temp()?;
        debug!("Checkpoint saved to {}", self.path.display());
        Ok(())
    }
}

fn validate_instance(instance: &str) -> Result<(), ConfigError> {
    let valid = !instance.is_empty()
        && instance
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && instance != "."
        && instance != "..";
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key: "INSTANCE_ID",
            reason: format!("{instance:?} may only contain letters, digits, '.', '_' and '-'"),
        })
    }
}
