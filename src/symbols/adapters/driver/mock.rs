//! In-memory driver (demo and unit tests without a controller).
//!
//! Behaviour:
//! - values come from a `(group, offset) → bytes` map; unknown addresses read as zeroes
//! - bytes are cut or zero-padded to `expected_size`
//! - failure knobs: disconnected, per-address device errors, short batch results

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;

use super::{BatchReadFuture, DriverError, RawReadResult, ReadFuture, SymbolDriver};
use crate::symbols::core::model::ReadRequest;

#[derive(Debug, Default)]
pub struct MockDriver {
    memory: HashMap<(u64, u64), Vec<u8>>,
    failing: HashSet<(u64, u64)>,
    disconnected: bool,
    drop_last_result: bool,
    batch_delay: Option<Duration>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, group: u64, offset: u64, bytes: impl Into<Vec<u8>>) -> Self {
        self.memory.insert((group, offset), bytes.into());
        self
    }

    pub fn with_failure(mut self, group: u64, offset: u64) -> Self {
        self.failing.insert((group, offset));
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.disconnected = true;
        self
    }

    /// Every bulk response is one item short.
    pub fn dropping_last_result(mut self) -> Self {
        self.drop_last_result = true;
        self
    }

    /// Delay bulk responses; earlier batches wait longer so that they complete last.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    /// Sizes of the bulk requests received so far, in arrival order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    fn read_one(&self, request: &ReadRequest) -> RawReadResult {
        let key = (request.address_group, request.address_offset);
        if self.failing.contains(&key) {
            return Err(DriverError::Device {
                code: 0x710,
                message: "symbol not found".to_string(),
            });
        }

        let mut bytes = self.memory.get(&key).cloned().unwrap_or_default();
        bytes.resize(request.expected_size, 0);
        Ok(bytes)
    }
}

impl SymbolDriver for MockDriver {
    fn read<'a>(&'a self, request: &'a ReadRequest) -> ReadFuture<'a> {
        Box::pin(async move {
            if self.disconnected {
                return Err(DriverError::NotConnected);
            }
            self.read_one(request)
        })
    }

    fn read_batch<'a>(&'a self, requests: &'a [ReadRequest]) -> BatchReadFuture<'a> {
        Box::pin(async move {
            if self.disconnected {
                return Err(DriverError::NotConnected);
            }

            let arrival = {
                let mut sizes = self.batch_sizes.lock();
                sizes.push(requests.len());
                sizes.len()
            };

            if let Some(delay) = self.batch_delay {
                let factor = 4u32.saturating_sub(arrival as u32).max(1);
                tokio::time::sleep(delay * factor).await;
            }

            let mut results: Vec<RawReadResult> =
                requests.iter().map(|request| self.read_one(request)).collect();
            if self.drop_last_result {
                results.pop();
            }
            Ok(results)
        })
    }
}
