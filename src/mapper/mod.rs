//! Pure mapping from parsed submissions to CSV headers and rows.
//!
//! Nothing in this module touches the filesystem; media cells carry the
//! source path and are resolved by the output stage so that collision
//! suffixes stay deterministic.

pub mod columns;
pub mod row;
pub mod value;

pub use columns::{ColumnSource, ColumnSpec, flatten_columns, main_header, repeat_header};
pub use row::{SubmissionRows, submission_rows};

use std::path::PathBuf;

/// One CSV cell: literal text, or a media reference resolved at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Media { source: PathBuf, name: String },
}
