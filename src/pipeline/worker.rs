//! Per-submission processing stage: parse, decrypt, validate, map.
//!
//! Runs inside the worker pool; everything here touches only its own
//! submission, so tasks parallelize freely. Failures are folded into the
//! returned batch instead of propagating, keeping one bad submission from
//! affecting the rest.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::{ExportConfig, SUBMISSION_FILE};
use crate::crypto;
use crate::error::{CryptoError, SubmissionError};
use crate::mapper::{self, SubmissionRows};
use crate::model::FormDefinition;
use crate::submission::{DocumentCache, Submission, SubmissionMeta};
use crate::types::ValidationStatus;
use crate::xml;

/// A unit of work: one instance directory with its date-sort position.
pub struct Task {
    pub seq: u64,
    pub dir: PathBuf,
}

/// Ordered result of processing one submission.
pub struct RowBatch {
    pub seq: u64,
    pub dir: PathBuf,
    pub payload: BatchPayload,
}

pub enum BatchPayload {
    Rows {
        rows: SubmissionRows,
        /// Keeps decrypted artifacts alive until the rows (and any media
        /// copies) are written.
        workdir: Option<TempDir>,
    },
    Skip {
        reason: String,
    },
}

/// Processes one submission end to end; skip conditions become part of the
/// batch so the writer can count them in order.
pub fn process(form: &FormDefinition, config: &ExportConfig, cache: &DocumentCache, task: Task) -> RowBatch {
    match build_rows(form, config, cache, &task.dir) {
        Ok((rows, workdir)) => RowBatch { seq: task.seq, dir: task.dir, payload: BatchPayload::Rows { rows, workdir } },
        Err(err) => RowBatch { seq: task.seq, dir: task.dir, payload: BatchPayload::Skip { reason: err.to_string() } },
    }
}

fn build_rows(
    form: &FormDefinition,
    config: &ExportConfig,
    cache: &DocumentCache,
    dir: &Path,
) -> Result<(SubmissionRows, Option<TempDir>), SubmissionError> {
    // The scan phase usually cached the parsed envelope; re-parse on a miss.
    let envelope = match cache.take(dir) {
        Some(document) => document,
        None => xml::parse_document(&dir.join(SUBMISSION_FILE))?,
    };
    let meta = SubmissionMeta::read(&envelope);

    let submission = if form.encrypted || meta.is_encrypted() {
        let Some(private_key) = &config.private_key else {
            return Err(CryptoError::Key("no private key configured for encrypted submission".to_string()).into());
        };
        let Some(instance_id) = meta.instance_id.clone() else {
            return Err(SubmissionError::Parse {
                path: dir.join(SUBMISSION_FILE),
                reason: "encrypted submission has no instanceID".to_string(),
            });
        };
        let decrypted = crypto::decrypt_submission(form, &meta, dir, &instance_id, private_key)?;
        Submission {
            source_dir: dir.to_path_buf(),
            root: decrypted.root,
            meta,
            status: decrypted.status,
            workdir: Some(decrypted.workdir),
        }
    } else {
        Submission {
            source_dir: dir.to_path_buf(),
            root: envelope,
            meta,
            status: ValidationStatus::NotValidated,
            workdir: None,
        }
    };

    let key = submission.meta.key();
    let rows = mapper::submission_rows(
        form,
        &submission.root,
        submission.working_dir(),
        &key,
        submission.meta.submission_date.as_ref(),
        submission.status,
    );
    Ok((rows, submission.workdir))
}
