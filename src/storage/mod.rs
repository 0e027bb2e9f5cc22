//! Storage Module
//!
//! Primary bucket files and the buffered writer used for bursts of
//! positional writes.
//!
//! ## Directory Layout
//! ```text
//! {root}/
//!   └── {Symbol}/{Timeframe}/{Format}/
//!         ├── 2020.bin
//!         └── 2021.bin
//! ```

mod buffile;
mod primary;

pub use buffile::{BufferedFile, DEFAULT_BLOCK_SIZE};
pub use primary::{read_header, PrimaryStore};
