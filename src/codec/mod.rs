//! Record Codec
//!
//! Everything needed to turn columnar data into bytes on disk and back:
//! element types, timeframes, the time/index/offset mapping, interval
//! ticks, row encoding and the bucket file header.
//!
//! All multi-byte integers are little-endian.

mod column;
mod header;
mod key;
mod record;
mod time_index;
mod timeframe;
mod types;

pub use column::{ColumnData, ColumnSeries, ColumnSeriesMap};
pub use header::{
    BucketInfo, EPOCH_COLUMN, EPOCH_LEN, FILE_VERSION, HEADER_SIZE, INDIRECT_RECORD_LEN,
    MAX_ELEMENTS, NANOSECONDS_COLUMN, TICKS_LEN,
};
pub use key::TimeBucketKey;
pub use record::{check_shapes, data_shapes, decode_rows, encode_rows, expand_rows, format_record, row_len};
pub use time_index::{
    index_to_offset, index_to_time, interval_ticks, offset_to_index, ticks_to_time, time_to_index,
    year_of, year_start,
};
pub use timeframe::Timeframe;
pub use types::{align8, dsv_from_bytes, dsv_to_bytes, shapes_byte_len, DataShape, ElementType, RecordType};
