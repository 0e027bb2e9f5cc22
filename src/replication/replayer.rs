//! Transaction group replayer
//!
//! Turns a replicated TG back into column series and writes them through
//! the replica's own writer, so replicated data takes the same WAL and
//! primary-file path as local writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{
    decode_rows, expand_rows, ColumnSeriesMap, DataShape, RecordType, TimeBucketKey,
};
use crate::error::{Result, StoreError};
use crate::wal::TransactionGroup;
use crate::writer::CsmWriter;

pub struct Replayer {
    writer: Arc<dyn CsmWriter>,

    /// Highest TGID applied so far (0 = none)
    last_applied: i64,
}

impl Replayer {
    pub fn new(writer: Arc<dyn CsmWriter>) -> Self {
        Self {
            writer,
            last_applied: 0,
        }
    }

    pub fn last_applied(&self) -> i64 {
        self.last_applied
    }

    /// Apply one serialized TG. Returns false when it was skipped as empty
    /// or already applied.
    pub fn replay(&mut self, bytes: &[u8]) -> Result<bool> {
        let tg = TransactionGroup::parse(bytes).map_err(|e| StoreError::ReplayRejected {
            tgid: crate::wal::peek_tgid(bytes).unwrap_or(-1),
            reason: e.to_string(),
        })?;

        if tg.tgid <= self.last_applied {
            tracing::warn!(tgid = tg.tgid, last_applied = self.last_applied, "dropping duplicate transaction group");
            return Ok(false);
        }
        if tg.sets.is_empty() {
            tracing::debug!(tgid = tg.tgid, "empty transaction group");
            self.last_applied = tg.tgid;
            return Ok(false);
        }

        let reject = |reason: String| StoreError::ReplayRejected { tgid: tg.tgid, reason };

        // Logical rows per bucket key, in set order
        let mut fixed: BTreeMap<TimeBucketKey, (Vec<DataShape>, Vec<u8>)> = BTreeMap::new();
        let mut variable: BTreeMap<TimeBucketKey, (Vec<DataShape>, Vec<u8>)> = BTreeMap::new();

        for set in &tg.sets {
            let (key, year) = TimeBucketKey::from_wal_key(&set.file_path).map_err(|e| reject(e.to_string()))?;
            let tf = key.timeframe().map_err(|e| reject(e.to_string()))?;
            let rows = expand_rows(
                set.buffer.payload(),
                &set.data_shapes,
                set.record_type,
                set.buffer.index(),
                &tf,
                year,
            )
            .map_err(|e| reject(format!("{}: {}", set.file_path, e)))?;

            let target = match set.record_type {
                RecordType::Fixed => &mut fixed,
                RecordType::Variable => &mut variable,
            };
            let (shapes, buf) = target
                .entry(key)
                .or_insert_with(|| (set.data_shapes.clone(), Vec::new()));
            if *shapes != set.data_shapes {
                return Err(reject(format!("{} changes shape within one group", set.file_path)));
            }
            buf.extend_from_slice(&rows);
        }

        for (groups, record_type) in [(fixed, RecordType::Fixed), (variable, RecordType::Variable)] {
            if groups.is_empty() {
                continue;
            }
            let mut csm = ColumnSeriesMap::new();
            for (key, (shapes, rows)) in groups {
                let series = decode_rows(&rows, &shapes, record_type).map_err(|e| reject(e.to_string()))?;
                csm.insert(key, series);
            }
            self.writer.write_csm(&csm, record_type == RecordType::Variable)?;
        }

        self.last_applied = tg.tgid;
        tracing::debug!(tgid = tg.tgid, sets = tg.sets.len(), "replayed transaction group");
        Ok(true)
    }
}
