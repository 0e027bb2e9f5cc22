//! Column series writer
//!
//! Splits each series of a `ColumnSeriesMap` into per-interval write
//! commands and queues them on the WAL:
//!
//! ```text
//! ColumnSeries ──encode_rows──► logical rows ──format_record──► stored rows
//!                                                                   │
//!          one WTSet per (year, interval) ◄─────────────────────────┘
//! ```
//!
//! Bucket files are created on first write. The call returns once the
//! queued commands are committed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{
    check_shapes, data_shapes, encode_rows, format_record, index_to_offset, interval_ticks,
    row_len, time_to_index, year_of, BucketInfo, ColumnData, ColumnSeries, ColumnSeriesMap,
    RecordType, TimeBucketKey, NANOSECONDS_COLUMN,
};
use crate::error::{Result, StoreError};
use crate::wal::{Wal, WTSet};

/// Sink for column series writes
pub trait CsmWriter: Send + Sync {
    fn write_csm(&self, csm: &ColumnSeriesMap, is_variable: bool) -> Result<()>;
}

pub struct Writer {
    wal: Arc<Wal>,
}

impl Writer {
    pub fn new(wal: Arc<Wal>) -> Self {
        Self { wal }
    }

    fn write_series(&self, key: &TimeBucketKey, series: &ColumnSeries, record_type: RecordType) -> Result<usize> {
        let tf = key.timeframe()?;
        let shapes = data_shapes(series);
        let rows = encode_rows(series, record_type)?;
        let width = row_len(&shapes, record_type);
        let epochs = series.epoch()?;
        let nanos = match series.column(NANOSECONDS_COLUMN) {
            Some(ColumnData::Int32(v)) => Some(v.as_slice()),
            _ => None,
        };

        let mut buckets: HashMap<i32, BucketInfo> = HashMap::new();
        let mut pending: Option<(i32, i64, WTSet)> = None;
        let mut queued = 0;

        for (row_no, row) in rows.chunks_exact(width).enumerate() {
            let epoch = epochs[row_no];
            let year = year_of(epoch)?;
            if !buckets.contains_key(&year) {
                let info = self.wal.store().ensure_bucket(key, year, &shapes, record_type)?;
                check_shapes(series, &info.shapes).map_err(|reason| StoreError::SchemaMismatch {
                    key: key.to_string(),
                    reason,
                })?;
                buckets.insert(year, info);
            }
            let info = &buckets[&year];

            let index = time_to_index(epoch, &tf)?;
            let ticks = match record_type {
                RecordType::Fixed => 0,
                RecordType::Variable => {
                    let ns = nanos.map(|v| v[row_no]).unwrap_or(0);
                    interval_ticks(epoch, ns, index, &tf, year)?
                }
            };
            let mut stored = Vec::with_capacity(width);
            format_record(row, record_type, ticks, &mut stored)?;

            // Variable rows landing in the same interval share one command
            if let Some((y, i, set)) = pending.as_mut() {
                if record_type == RecordType::Variable && *y == year && *i == index {
                    set.buffer.extend_payload(&stored);
                    continue;
                }
            }
            if let Some((_, _, set)) = pending.take() {
                self.wal.queue(set)?;
                queued += 1;
            }
            let var_rec_len = match record_type {
                RecordType::Fixed => 0,
                RecordType::Variable => info.var_rec_len() as i32,
            };
            pending = Some((
                year,
                index,
                WTSet::new(
                    record_type,
                    key.wal_key(year),
                    var_rec_len,
                    index_to_offset(index, info.record_len),
                    index,
                    &stored,
                    info.shapes.clone(),
                ),
            ));
        }

        if let Some((_, _, set)) = pending {
            self.wal.queue(set)?;
            queued += 1;
        }
        Ok(queued)
    }
}

impl CsmWriter for Writer {
    fn write_csm(&self, csm: &ColumnSeriesMap, is_variable: bool) -> Result<()> {
        let record_type = if is_variable {
            RecordType::Variable
        } else {
            RecordType::Fixed
        };

        for (key, series) in csm {
            if series.is_empty() {
                continue;
            }
            let queued = self.write_series(key, series, record_type)?;
            tracing::debug!(bucket = %key, rows = series.len(), commands = queued, "queued series");
        }
        self.wal.request_flush()?;
        Ok(())
    }
}
