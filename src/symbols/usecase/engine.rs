//! Batch read coordinator and dump engine.
//!
//! Constraints:
//! - `read_all` returns exactly one result per symbol, in flat order; a count mismatch is an
//!   `IntegrityError` for the whole cycle (no truncation, no padding, no retry)
//! - per-symbol read/decode failures stay local and end up as a message in the row
//! - `DumpEngine::start_dump` spawns a background task and does not block the caller

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::symbols::adapters::driver::{DriverError, RawReadResult, SymbolDriver};
use crate::symbols::adapters::storage::ViewerConfigV1;
use crate::symbols::core::codec::{
    decode, decode_display, error_display, strategy_for_tag, CodecOptions, DecodeError,
};
use crate::symbols::core::model::LeafSymbol;
use crate::symbols::core::plan::{build_read_batches, BatchOptions, PlanError, ReadBatch};
use crate::symbols::error::SymbolsError;
use crate::symbols::usecase::export::dump::{build_dump_records, DumpRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{}: expected {expected} values got {got}", scope(.batch_start))]
pub struct IntegrityError {
    pub expected: usize,
    pub got: usize,
    /// `Some(start)` for a single batch, `None` for the reassembled cycle.
    pub batch_start: Option<usize>,
}

fn scope(batch_start: &Option<usize>) -> String {
    match batch_start {
        Some(start) => format!("batch at {start} result count mismatch"),
        None => "symbol/value count mismatch".to_string(),
    }
}

pub fn check_integrity(
    expected: usize,
    got: usize,
    batch_start: Option<usize>,
) -> Result<(), IntegrityError> {
    if expected != got {
        return Err(IntegrityError {
            expected,
            got,
            batch_start,
        });
    }
    Ok(())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadAllError {
    #[error("{0}")]
    Plan(#[from] PlanError),

    #[error("bulk read at {batch_start} failed: {source}")]
    Driver {
        batch_start: usize,
        #[source]
        source: DriverError,
    },

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("batch task failed: {message}")]
    Task { message: String },
}

/// Reads every symbol in batches of `options.batch_size`, one batch after the other.
pub async fn read_all(
    driver: &dyn SymbolDriver,
    symbols: &[LeafSymbol],
    options: &BatchOptions,
    codec_options: &CodecOptions,
) -> Result<Vec<RawReadResult>, ReadAllError> {
    let batches = build_read_batches(symbols, options.batch_size, codec_options)?;
    debug!(
        "read_all: symbols={} batches={} batchSize={}",
        symbols.len(),
        batches.len(),
        options.batch_size
    );

    let mut values: Vec<RawReadResult> = Vec::with_capacity(symbols.len());
    for batch in &batches {
        values.extend(read_batch_checked(driver, batch).await?);
    }

    check_integrity(symbols.len(), values.len(), None)?;
    Ok(values)
}

/// Like [`read_all`], with up to `options.max_in_flight` batches outstanding.
/// Results are put back by batch start offset, so the output order is the same.
pub async fn read_all_concurrent(
    driver: Arc<dyn SymbolDriver>,
    symbols: &[LeafSymbol],
    options: &BatchOptions,
    codec_options: &CodecOptions,
) -> Result<Vec<RawReadResult>, ReadAllError> {
    if options.max_in_flight <= 1 {
        return read_all(driver.as_ref(), symbols, options, codec_options).await;
    }

    let batches = build_read_batches(symbols, options.batch_size, codec_options)?;
    let batch_count = batches.len();
    // at most one permit per batch
    let permits = Arc::new(Semaphore::new(options.max_in_flight.min(batch_count.max(1))));
    let mut tasks: JoinSet<Result<(usize, Vec<RawReadResult>), ReadAllError>> = JoinSet::new();

    for batch in batches {
        let driver = Arc::clone(&driver);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| ReadAllError::Task {
                    message: e.to_string(),
                })?;
            let values = read_batch_checked(driver.as_ref(), &batch).await?;
            Ok((batch.start_index, values))
        });
    }

    let mut by_start: HashMap<usize, Vec<RawReadResult>> = HashMap::with_capacity(batch_count);
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| ReadAllError::Task {
            message: e.to_string(),
        })?;
        // first failure cancels the remaining batches when `tasks` is dropped
        let (start, values) = outcome?;
        by_start.insert(start, values);
    }

    let mut starts: Vec<usize> = by_start.keys().copied().collect();
    starts.sort_unstable();

    let mut values: Vec<RawReadResult> = Vec::with_capacity(symbols.len());
    for start in starts {
        if let Some(chunk) = by_start.remove(&start) {
            values.extend(chunk);
        }
    }

    check_integrity(symbols.len(), values.len(), None)?;
    Ok(values)
}

async fn read_batch_checked(
    driver: &dyn SymbolDriver,
    batch: &ReadBatch,
) -> Result<Vec<RawReadResult>, ReadAllError> {
    let values = driver
        .read_batch(&batch.requests)
        .await
        .map_err(|source| {
            warn!("bulk read at {} failed: {source}", batch.start_index);
            ReadAllError::Driver {
                batch_start: batch.start_index,
                source,
            }
        })?;

    check_integrity(batch.len(), values.len(), Some(batch.start_index))?;
    Ok(values)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValueQuality {
    Ok,
    ReadError,
    DecodeError,
    Unsupported,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolValue {
    pub path: String,
    pub type_tag: String,
    pub value_display: String,
    pub quality: ValueQuality,
    pub timestamp: DateTime<Utc>,
}

fn quality_of(err: &DecodeError) -> ValueQuality {
    match err {
        DecodeError::Read { .. } => ValueQuality::ReadError,
        DecodeError::UnsupportedType { .. } => ValueQuality::Unsupported,
        _ => ValueQuality::DecodeError,
    }
}

/// Decodes one raw result into a display row.
pub fn to_symbol_value(
    symbol: &LeafSymbol,
    raw: RawReadResult,
    codec_options: &CodecOptions,
    timestamp: DateTime<Utc>,
) -> SymbolValue {
    let (value_display, quality) = match decode(&symbol.type_tag, symbol.size, codec_options, |_| raw) {
        Ok(value) => (value.to_string(), ValueQuality::Ok),
        Err(err) => (error_display(&err), quality_of(&err)),
    };

    SymbolValue {
        path: symbol.path.clone(),
        type_tag: symbol.type_tag.clone(),
        value_display,
        quality,
        timestamp,
    }
}

/// One refresh cycle: bulk read everything, then decode each value.
pub async fn refresh_values(
    driver: &dyn SymbolDriver,
    symbols: &[LeafSymbol],
    options: &BatchOptions,
    codec_options: &CodecOptions,
) -> Result<Vec<SymbolValue>, ReadAllError> {
    let raw = read_all(driver, symbols, options, codec_options).await?;
    let now = Utc::now();

    Ok(symbols
        .iter()
        .zip(raw)
        .map(|(symbol, raw)| to_symbol_value(symbol, raw, codec_options, now))
        .collect())
}

/// Single-symbol read for one cell; failures come back as text.
pub async fn read_symbol_value(
    driver: &dyn SymbolDriver,
    symbol: &LeafSymbol,
    codec_options: &CodecOptions,
) -> String {
    let strategy = match strategy_for_tag(&symbol.type_tag, codec_options) {
        Ok(strategy) => strategy,
        Err(err) => return error_display(&err),
    };

    let request = symbol.read_request(strategy.read_size(symbol.size));
    let raw = driver.read(&request).await;
    decode_display(&symbol.type_tag, symbol.size, codec_options, |_| raw)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all_fields = "camelCase")]
pub enum DumpState {
    Running,
    Done { records: Vec<DumpRecord> },
    Failed { error: SymbolsError },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DumpSnapshot {
    pub dump_id: Uuid,
    pub symbol_count: usize,
    pub started_at_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_utc: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub state: DumpState,
}

struct DumpHandle {
    join: Option<JoinHandle<()>>,
    latest: Arc<Mutex<DumpSnapshot>>,
}

/// Background dump jobs: start / latest / wait.
///
/// - `start_dump` spawns onto the current tokio runtime and returns immediately
/// - `latest` only reads the cached snapshot
pub struct DumpEngine {
    dumps: Mutex<HashMap<Uuid, DumpHandle>>,
}

impl Default for DumpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpEngine {
    pub fn new() -> Self {
        Self {
            dumps: Mutex::new(HashMap::new()),
        }
    }

    pub fn start_dump(
        &self,
        driver: Arc<dyn SymbolDriver>,
        symbols: Vec<LeafSymbol>,
        config: &ViewerConfigV1,
    ) -> Uuid {
        let dump_id = Uuid::new_v4();
        let latest = Arc::new(Mutex::new(DumpSnapshot {
            dump_id,
            symbol_count: symbols.len(),
            started_at_utc: Utc::now(),
            finished_at_utc: None,
            state: DumpState::Running,
        }));

        let latest_for_task = Arc::clone(&latest);
        let batch_options = config.batch.clone();
        let codec_options = config.codec.clone();

        info!("dump {dump_id}: start symbols={}", symbols.len());
        let join = tokio::spawn(async move {
            let state = match read_all_concurrent(driver, &symbols, &batch_options, &codec_options)
                .await
            {
                Ok(raw) => match build_dump_records(&symbols, &raw, &codec_options) {
                    Ok(records) => DumpState::Done { records },
                    Err(err) => DumpState::Failed {
                        error: SymbolsError::from(ReadAllError::from(err)),
                    },
                },
                Err(err) => DumpState::Failed {
                    error: SymbolsError::from(err),
                },
            };

            match &state {
                DumpState::Failed { error } => warn!("dump {dump_id}: failed: {}", error.message),
                _ => info!("dump {dump_id}: done"),
            }

            let mut guard = latest_for_task.lock();
            guard.state = state;
            guard.finished_at_utc = Some(Utc::now());
        });

        self.dumps.lock().insert(
            dump_id,
            DumpHandle {
                join: Some(join),
                latest,
            },
        );

        dump_id
    }

    pub fn latest(&self, dump_id: Uuid) -> Option<DumpSnapshot> {
        let latest = {
            let guard = self.dumps.lock();
            guard.get(&dump_id).map(|h| Arc::clone(&h.latest))
        }?;

        let snapshot = latest.lock().clone();
        Some(snapshot)
    }

    /// Waits for the dump task to finish (bounded by `timeout`) and returns the final snapshot.
    pub async fn wait(&self, dump_id: Uuid, timeout: Duration) -> Option<DumpSnapshot> {
        let join = {
            let mut guard = self.dumps.lock();
            guard.get_mut(&dump_id)?.join.take()
        };

        if let Some(mut join) = join {
            if tokio::time::timeout(timeout, &mut join).await.is_err() {
                warn!("dump {dump_id}: still running after {timeout:?}");
                if let Some(handle) = self.dumps.lock().get_mut(&dump_id) {
                    handle.join = Some(join);
                }
            }
        }

        self.latest(dump_id)
    }

    pub fn forget(&self, dump_id: Uuid) -> bool {
        self.dumps.lock().remove(&dump_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::symbols::adapters::driver::mock::MockDriver;

    fn dint_symbols(count: usize) -> Vec<LeafSymbol> {
        (0..count)
            .map(|i| LeafSymbol {
                path: format!("GVL.aValues[{i}]"),
                type_tag: "DINT".to_string(),
                size: 4,
                address_group: 0x4020,
                address_offset: (i * 4) as u64,
                is_static: false,
            })
            .collect()
    }

    fn driver_with_index_values(symbols: &[LeafSymbol]) -> MockDriver {
        symbols.iter().enumerate().fold(MockDriver::new(), |driver, (i, s)| {
            driver.with_value(s.address_group, s.address_offset, (i as i32).to_le_bytes())
        })
    }

    fn decoded_indices(values: &[RawReadResult]) -> Vec<i32> {
        values
            .iter()
            .map(|v| {
                let bytes = v.as_ref().unwrap();
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            })
            .collect()
    }

    #[tokio::test]
    async fn read_all_issues_bounded_batches_and_keeps_order() {
        let symbols = dint_symbols(1200);
        let driver = driver_with_index_values(&symbols);

        let values = read_all(
            &driver,
            &symbols,
            &BatchOptions::default(),
            &CodecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(driver.batch_sizes(), vec![500, 500, 200]);
        assert_eq!(values.len(), 1200);
        assert_eq!(decoded_indices(&values), (0..1200).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn short_batch_result_is_an_integrity_error() {
        let symbols = dint_symbols(1200);
        let driver = driver_with_index_values(&symbols).dropping_last_result();

        let err = read_all(
            &driver,
            &symbols,
            &BatchOptions::default(),
            &CodecOptions::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            ReadAllError::Integrity(IntegrityError {
                expected: 500,
                got: 499,
                batch_start: Some(0),
            })
        );
    }

    #[test]
    fn integrity_check_rejects_any_length_difference() {
        assert!(check_integrity(1200, 1200, None).is_ok());
        assert!(check_integrity(1200, 1199, None).is_err());
        let err = check_integrity(1200, 1201, None).unwrap_err();
        assert_eq!(err.to_string(), "symbol/value count mismatch: expected 1200 values got 1201");
    }

    #[tokio::test]
    async fn failed_round_trip_reports_batch_start() {
        let symbols = dint_symbols(3);
        let driver = MockDriver::new().disconnected();

        let err = read_all(
            &driver,
            &symbols,
            &BatchOptions::default(),
            &CodecOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            ReadAllError::Driver {
                batch_start: 0,
                source: DriverError::NotConnected
            }
        );
    }

    #[tokio::test]
    async fn zero_batch_size_fails_before_any_request() {
        let symbols = dint_symbols(3);
        let driver = MockDriver::new();
        let err = read_all(
            &driver,
            &symbols,
            &BatchOptions {
                batch_size: 0,
                ..BatchOptions::default()
            },
            &CodecOptions::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err, ReadAllError::Plan(PlanError::InvalidBatchSize(0)));
        assert!(driver.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn concurrent_read_all_reassembles_in_flat_order() {
        let symbols = dint_symbols(1200);
        let driver = Arc::new(
            driver_with_index_values(&symbols).with_batch_delay(Duration::from_millis(10)),
        );

        let values = read_all_concurrent(
            driver.clone(),
            &symbols,
            &BatchOptions {
                batch_size: 500,
                max_in_flight: 3,
            },
            &CodecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(values.len(), 1200);
        assert_eq!(decoded_indices(&values), (0..1200).collect::<Vec<i32>>());

        let mut sizes = driver.batch_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![200, 500, 500]);
    }

    #[tokio::test]
    async fn oversized_max_in_flight_from_config_is_capped() {
        let symbols = dint_symbols(1200);
        let driver = Arc::new(driver_with_index_values(&symbols));
        let options: BatchOptions =
            serde_json::from_str(r#"{ "maxInFlight": 18446744073709551615 }"#).unwrap();

        let values = read_all_concurrent(driver.clone(), &symbols, &options, &CodecOptions::default())
            .await
            .unwrap();

        assert_eq!(decoded_indices(&values), (0..1200).collect::<Vec<i32>>());
        assert_eq!(driver.batch_sizes().len(), 3);
    }

    #[tokio::test]
    async fn refresh_values_keeps_per_symbol_failures_local() {
        let symbols = vec![
            LeafSymbol {
                path: "MAIN.tRamp".to_string(),
                type_tag: "TIME".to_string(),
                size: 4,
                address_group: 0x4020,
                address_offset: 0,
                is_static: false,
            },
            LeafSymbol {
                path: "MAIN.nBroken".to_string(),
                type_tag: "INT".to_string(),
                size: 2,
                address_group: 0x4020,
                address_offset: 4,
                is_static: false,
            },
            LeafSymbol {
                path: "MAIN.eState".to_string(),
                type_tag: "ENUM".to_string(),
                size: 2,
                address_group: 0x4020,
                address_offset: 6,
                is_static: false,
            },
        ];
        let driver = MockDriver::new()
            .with_value(0x4020, 0, 65_000u32.to_le_bytes())
            .with_failure(0x4020, 4);

        let rows = refresh_values(
            &driver,
            &symbols,
            &BatchOptions::default(),
            &CodecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value_display, "T#1m5s0ms");
        assert_eq!(rows[0].quality, ValueQuality::Ok);
        assert_eq!(rows[1].quality, ValueQuality::ReadError);
        assert!(rows[1].value_display.contains("symbol not found"));
        assert_eq!(rows[2].quality, ValueQuality::Unsupported);
        assert_eq!(rows[2].value_display, "");
        assert_eq!(driver.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn read_symbol_value_never_fails() {
        let symbol = LeafSymbol {
            path: "GVL.sName".to_string(),
            type_tag: "STRING(10)".to_string(),
            size: 11,
            address_group: 0x4020,
            address_offset: 0,
            is_static: false,
        };

        let driver = MockDriver::new().with_value(0x4020, 0, b"pump".to_vec());
        assert_eq!(
            read_symbol_value(&driver, &symbol, &CodecOptions::default()).await,
            "pump"
        );

        let offline = MockDriver::new().disconnected();
        assert_eq!(
            read_symbol_value(&offline, &symbol, &CodecOptions::default()).await,
            "read failed for STRING(10): No connection"
        );
    }

    #[tokio::test]
    async fn dump_engine_runs_in_background_and_caches_result() {
        let engine = DumpEngine::new();
        let symbols = dint_symbols(5);
        let driver: Arc<dyn SymbolDriver> = Arc::new(driver_with_index_values(&symbols));

        let dump_id = engine.start_dump(driver, symbols.clone(), &ViewerConfigV1::default());
        assert!(engine.latest(dump_id).is_some());

        let snapshot = engine
            .wait(dump_id, Duration::from_secs(1))
            .await
            .expect("dump should exist");
        assert!(snapshot.finished_at_utc.is_some());
        match snapshot.state {
            DumpState::Done { records } => {
                assert_eq!(records.len(), 5);
                assert_eq!(records[3].path, "GVL.aValues[3]");
                assert_eq!(records[3].value, "3");
            }
            other => panic!("unexpected state {other:?}"),
        }

        assert!(engine.forget(dump_id));
        assert!(engine.latest(dump_id).is_none());
    }

    #[tokio::test]
    async fn wait_after_timeout_still_sees_completion() {
        let engine = DumpEngine::new();
        let symbols = dint_symbols(3);
        let driver: Arc<dyn SymbolDriver> = Arc::new(
            driver_with_index_values(&symbols).with_batch_delay(Duration::from_millis(50)),
        );

        let dump_id = engine.start_dump(driver, symbols, &ViewerConfigV1::default());
        let early = engine.wait(dump_id, Duration::from_millis(1)).await.unwrap();
        assert_eq!(early.state, DumpState::Running);

        let done = engine.wait(dump_id, Duration::from_secs(2)).await.unwrap();
        assert!(done.finished_at_utc.is_some());
        assert!(matches!(done.state, DumpState::Done { .. }));
    }

    #[tokio::test]
    async fn dump_engine_reports_integrity_failure() {
        let engine = DumpEngine::new();
        let symbols = dint_symbols(2);
        let driver: Arc<dyn SymbolDriver> = Arc::new(MockDriver::new().dropping_last_result());

        let dump_id = engine.start_dump(driver, symbols, &ViewerConfigV1::default());
        let snapshot = engine.wait(dump_id, Duration::from_secs(1)).await.unwrap();

        match snapshot.state {
            DumpState::Failed { error } => {
                assert_eq!(error.kind, crate::symbols::error::SymbolsErrorKind::IntegrityError);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}
