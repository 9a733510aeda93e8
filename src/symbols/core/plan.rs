//! Batch read plan: split the flat leaf list into bounded bulk requests.
//!
//! - one batch = one round trip to the controller
//! - batches are consecutive slices of the flat order; `start_index` locates each one
//! - request sizes come from the codec strategy of each symbol's tag

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::codec::{request_size, CodecOptions};
use super::model::{LeafSymbol, ReadRequest};

pub const DEFAULT_BATCH_SIZE: usize = 500;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_in_flight() -> usize {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// Max symbols per bulk request; trades round trips against controller request size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches allowed in flight at once (concurrent reader only).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadBatch {
    /// Index of the first request in the flat symbol order.
    pub start_index: usize,
    pub requests: Vec<ReadRequest>,
}

impl ReadBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("batch size must be at least 1, got {0}")]
    InvalidBatchSize(usize),
}

pub fn build_read_batches(
    symbols: &[LeafSymbol],
    batch_size: usize,
    codec_options: &CodecOptions,
) -> Result<Vec<ReadBatch>, PlanError> {
    if batch_size == 0 {
        return Err(PlanError::InvalidBatchSize(batch_size));
    }

    let batches = symbols
        .chunks(batch_size)
        .enumerate()
        .map(|(chunk_index, chunk)| ReadBatch {
            start_index: chunk_index * batch_size,
            requests: chunk
                .iter()
                .map(|symbol| {
                    symbol.read_request(request_size(&symbol.type_tag, symbol.size, codec_options))
                })
                .collect(),
        })
        .collect();

    Ok(batches)
}
