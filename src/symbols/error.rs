//! Structured errors for the UI layer (stable kind + message + optional details).

use serde::{Deserialize, Serialize};

use super::adapters::driver::DriverError;
use super::adapters::storage::StorageError;
use super::core::codec::DecodeError;
use super::core::flatten::{FlattenError, InvalidSymbolError, TraversalError};
use super::core::plan::PlanError;
use super::usecase::engine::{IntegrityError, ReadAllError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SymbolsErrorKind {
    #[serde(rename = "InvalidSymbol")]
    InvalidSymbol,
    #[serde(rename = "TraversalError")]
    TraversalError,
    #[serde(rename = "DecodeError")]
    DecodeError,
    #[serde(rename = "IntegrityError")]
    IntegrityError,
    #[serde(rename = "DriverError")]
    DriverError,
    #[serde(rename = "ConfigError")]
    ConfigError,
    #[serde(rename = "ExportError")]
    ExportError,
    #[serde(rename = "InternalError")]
    InternalError,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SymbolsErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub got: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolsError {
    pub kind: SymbolsErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<SymbolsErrorDetails>,
}

impl SymbolsError {
    fn new(kind: SymbolsErrorKind, message: String, details: Option<SymbolsErrorDetails>) -> Self {
        Self {
            kind,
            message,
            details,
        }
    }
}

impl From<FlattenError> for SymbolsError {
    fn from(err: FlattenError) -> Self {
        let message = err.to_string();
        match err {
            FlattenError::InvalidSymbol(InvalidSymbolError::EmptyAggregate {
                instance_path, ..
            }) => Self::new(
                SymbolsErrorKind::InvalidSymbol,
                message,
                Some(SymbolsErrorDetails {
                    instance_path: Some(instance_path),
                    ..Default::default()
                }),
            ),
            FlattenError::Traversal(
                TraversalError::Cycle { instance_path }
                | TraversalError::DepthExceeded { instance_path, .. },
            ) => Self::new(
                SymbolsErrorKind::TraversalError,
                message,
                Some(SymbolsErrorDetails {
                    instance_path: Some(instance_path),
                    ..Default::default()
                }),
            ),
        }
    }
}

impl From<DecodeError> for SymbolsError {
    fn from(err: DecodeError) -> Self {
        let kind = match &err {
            DecodeError::Read { .. } => SymbolsErrorKind::DriverError,
            _ => SymbolsErrorKind::DecodeError,
        };
        let details = SymbolsErrorDetails {
            type_tag: Some(err.type_tag().to_string()),
            ..Default::default()
        };
        Self::new(kind, err.to_string(), Some(details))
    }
}

impl From<IntegrityError> for SymbolsError {
    fn from(err: IntegrityError) -> Self {
        Self::new(
            SymbolsErrorKind::IntegrityError,
            err.to_string(),
            Some(SymbolsErrorDetails {
                expected: Some(err.expected),
                got: Some(err.got),
                batch_start: err.batch_start,
                ..Default::default()
            }),
        )
    }
}

impl From<DriverError> for SymbolsError {
    fn from(err: DriverError) -> Self {
        Self::new(SymbolsErrorKind::DriverError, err.to_string(), None)
    }
}

impl From<PlanError> for SymbolsError {
    fn from(err: PlanError) -> Self {
        Self::new(SymbolsErrorKind::ConfigError, err.to_string(), None)
    }
}

impl From<ReadAllError> for SymbolsError {
    fn from(err: ReadAllError) -> Self {
        let message = err.to_string();
        match err {
            ReadAllError::Plan(e) => e.into(),
            ReadAllError::Integrity(e) => e.into(),
            ReadAllError::Driver { batch_start, .. } => Self::new(
                SymbolsErrorKind::DriverError,
                message,
                Some(SymbolsErrorDetails {
                    batch_start: Some(batch_start),
                    ..Default::default()
                }),
            ),
            ReadAllError::Task { .. } => Self::new(SymbolsErrorKind::InternalError, message, None),
        }
    }
}

impl From<StorageError> for SymbolsError {
    fn from(err: StorageError) -> Self {
        let details = match &err {
            StorageError::UnsupportedSchemaVersion(v) => Some(SymbolsErrorDetails {
                schema_version: Some(*v),
                ..Default::default()
            }),
            _ => None,
        };
        Self::new(SymbolsErrorKind::ConfigError, err.to_string(), details)
    }
}

impl From<anyhow::Error> for SymbolsError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(SymbolsErrorKind::ExportError, format!("{err:#}"), None)
    }
}
