//! Viewer configuration persistence (`viewer.v1.json`).
//!
//! - top level must carry `schemaVersion: 1`
//! - writes go through a temp file + rename
//! - a missing file is not an error (`Ok(None)`)

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::symbols::core::codec::CodecOptions;
use crate::symbols::core::flatten::FlattenOptions;
use crate::symbols::core::plan::BatchOptions;

pub const SCHEMA_VERSION_V1: u32 = 1;
pub const CONFIG_FILE_NAME: &str = "viewer.v1.json";
pub const DEFAULT_DUMP_DIR_NAME: &str = "dumps";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported schemaVersion: {0}")]
    UnsupportedSchemaVersion(u32),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerConfigV1 {
    pub schema_version: u32,
    #[serde(default)]
    pub flatten: FlattenOptions,
    #[serde(default)]
    pub codec: CodecOptions,
    #[serde(default)]
    pub batch: BatchOptions,
    /// Output directory for VariableDump.csv / VariableDump.xml; empty = `<base>/dumps`.
    #[serde(default)]
    pub dump_dir: String,
}

impl Default for ViewerConfigV1 {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1,
            flatten: FlattenOptions::default(),
            codec: CodecOptions::default(),
            batch: BatchOptions::default(),
            dump_dir: String::new(),
        }
    }
}

impl ViewerConfigV1 {
    pub fn resolve_dump_dir(&self, base_dir: &Path) -> PathBuf {
        if self.dump_dir.trim().is_empty() {
            base_dir.join(DEFAULT_DUMP_DIR_NAME)
        } else {
            PathBuf::from(self.dump_dir.trim())
        }
    }
}

pub fn save_config(base_dir: &Path, payload: &ViewerConfigV1) -> Result<(), StorageError> {
    if payload.schema_version != SCHEMA_VERSION_V1 {
        return Err(StorageError::UnsupportedSchemaVersion(
            payload.schema_version,
        ));
    }
    write_json_atomic(base_dir.join(CONFIG_FILE_NAME), payload)
}

pub fn load_config(base_dir: &Path) -> Result<Option<ViewerConfigV1>, StorageError> {
    let loaded = read_json_optional::<ViewerConfigV1>(base_dir.join(CONFIG_FILE_NAME))?;
    if let Some(config) = &loaded {
        if config.schema_version != SCHEMA_VERSION_V1 {
            return Err(StorageError::UnsupportedSchemaVersion(config.schema_version));
        }
    }
    Ok(loaded)
}

/// `load_config`, falling back to defaults when no file exists yet.
pub fn load_config_or_default(base_dir: &Path) -> Result<ViewerConfigV1, StorageError> {
    Ok(load_config(base_dir)?.unwrap_or_default())
}

pub(crate) fn ensure_dir(path: &Path) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(path)
}

pub(crate) fn write_text_atomic(path: &Path, text: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, text)?;
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    std::fs::rename(tmp_path, path)
}

fn write_json_atomic<T: Serialize>(path: PathBuf, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value)?;
    write_text_atomic(&path, &json)?;
    Ok(())
}

fn read_json_optional<T: DeserializeOwned>(path: PathBuf) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }

    let text = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}
