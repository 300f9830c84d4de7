//! Export configuration and the on-disk layout constants.
//!
//! The constants here are the single source of truth for the submission
//! storage layout and for the pipeline's tuning knobs.

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate};
use rsa::RsaPrivateKey;

/// Directory under a form directory that holds one subdirectory per submission.
pub const INSTANCES_DIR: &str = "instances";

/// Primary document of every instance directory.
pub const SUBMISSION_FILE: &str = "submission.xml";

/// Default name of the encrypted payload inside an instance directory.
pub const ENCRYPTED_SUBMISSION_FILE: &str = "submission.xml.enc";

/// Extension carried by encrypted files; stripped when decrypting.
pub const ENC_EXTENSION: &str = ".enc";

/// Read size for streaming decryption.
///
/// 2 KiB keeps the per-file working set small while amortizing syscall
/// overhead; the decryptor never buffers more than one chunk plus one block.
pub const DECRYPT_CHUNK_SIZE: usize = 2048;

/// Length of the unwrapped per-submission symmetric key (AES-256).
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// AES block and IV length in bytes.
pub const AES_BLOCK_LEN: usize = 16;

/// IV seed length; equals the md5 digest size.
pub const IV_LEN: usize = 16;

/// Upper bound on cached parsed documents from the date-scan phase.
///
/// The cache is an optimization only; once full, further documents are
/// re-parsed in the worker stage instead.
pub const PARSE_CACHE_CAPACITY: usize = 512;

/// A progress event is published every this many processed submissions.
pub const PROGRESS_EVERY: usize = 8;

/// Inclusive date bounds for admitting submissions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// True when no bound is set; an empty range admits everything.
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Inclusive on both bounds. A submission without a date is never
    /// excluded, since no bound can prove it out of range.
    pub fn admits(&self, date: Option<&DateTime<FixedOffset>>) -> bool {
        let Some(date) = date else { return true };
        let day = date.date_naive();

        if let Some(start) = self.start
            && day < start
        {
            return false;
        }
        if let Some(end) = self.end
            && day > end
        {
            return false;
        }

        true
    }
}

/// Options for a single export run.
#[derive(Debug)]
pub struct ExportConfig {
    /// Destination directory for the CSV files (created if needed).
    pub export_dir: PathBuf,

    /// When false, rows are appended to existing CSVs without a header.
    pub overwrite_existing: bool,

    /// Date filter applied during the scan phase.
    pub date_range: DateRange,

    /// RSA private key for encrypted forms.
    pub private_key: Option<RsaPrivateKey>,

    /// Copy referenced media files next to the CSVs.
    pub export_media: bool,

    /// Media destination; defaults to `<export_dir>/media`.
    pub media_dir: Option<PathBuf>,

    /// Declared but unsupported; enabling it aborts the export.
    pub include_geojson: bool,

    /// Declared but unsupported; enabling it aborts the export.
    pub split_select_multiples: bool,

    /// Declared but unsupported; enabling it aborts the export.
    pub remove_group_names: bool,
}

impl ExportConfig {
    /// Creates a configuration with the defaults: overwrite, no date filter,
    /// no decryption, no media export.
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
            overwrite_existing: true,
            date_range: DateRange::default(),
            private_key: None,
            export_media: false,
            media_dir: None,
            include_geojson: false,
            split_select_multiples: false,
            remove_group_names: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;

    use super::*;

    fn stamp(y: i32, m: u32, d: u32) -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap().fixed_offset()
    }

    #[test]
    fn test_empty_range_admits_all() {
        let range = DateRange::default();
        assert!(range.is_empty());
        assert!(range.admits(Some(&stamp(2020, 1, 1))));
        assert!(range.admits(None));
    }

    #[test]
    fn test_range_is_inclusive() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2020, 1, 2),
            end: NaiveDate::from_ymd_opt(2020, 1, 3),
        };

        assert!(!range.admits(Some(&stamp(2020, 1, 1))));
        assert!(range.admits(Some(&stamp(2020, 1, 2))));
        assert!(range.admits(Some(&stamp(2020, 1, 3))));
        assert!(!range.admits(Some(&stamp(2020, 1, 4))));
    }

    #[test]
    fn test_undated_submission_is_admitted() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2020, 1, 2),
            end: None,
        };

        assert!(range.admits(None));
    }
}
