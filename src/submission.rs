//! Parsed submissions, their envelope metadata and the bounded parse cache.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset};
use hashbrown::HashMap;
use tempfile::TempDir;
use uuid::Uuid;

use crate::mapper::value;
use crate::types::ValidationStatus;
use crate::xml::Element;

/// Metadata read from `submission.xml` before any decryption.
///
/// For encrypted forms this is the envelope: the actual answers live in the
/// encrypted payload and only become visible after decryption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionMeta {
    pub instance_id: Option<String>,
    pub submission_date: Option<DateTime<FixedOffset>>,
    pub base64_key: Option<String>,
    pub base64_signature: Option<String>,
    /// Declared media file names, in declared order.
    pub media_names: Vec<String>,
    pub encrypted_payload: Option<String>,
}

impl SubmissionMeta {
    pub fn read(root: &Element) -> Self {
        let instance_id = root
            .attribute("instanceID")
            .map(str::to_string)
            .or_else(|| root.text_at(&["meta", "instanceID"]).filter(|t| !t.is_empty()).map(str::to_string));
        let submission_date = root.attribute("submissionDate").and_then(value::parse_timestamp);
        let base64_key = non_empty_child(root, "base64EncryptedKey");
        let base64_signature = non_empty_child(root, "base64EncryptedElementSignature");
        let encrypted_payload = non_empty_child(root, "encryptedXmlFile");

        let mut files = Vec::new();
        root.find_all(&["media", "file"], &mut files);
        let media_names = files
            .into_iter()
            .filter(|file| !file.text.is_empty())
            .map(|file| file.text.clone())
            .collect();

        Self { instance_id, submission_date, base64_key, base64_signature, media_names, encrypted_payload }
    }

    /// True when the envelope carries an encrypted payload.
    pub fn is_encrypted(&self) -> bool {
        self.base64_key.is_some() || self.encrypted_payload.is_some()
    }

    /// The row KEY: the instance id, or a generated `uuid:` fallback.
    pub fn key(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| format!("uuid:{}", Uuid::new_v4()))
    }
}

fn non_empty_child(root: &Element, name: &str) -> Option<String> {
    root.child(name).map(|child| child.text.clone()).filter(|text| !text.is_empty())
}

/// One submission travelling through the pipeline.
pub struct Submission {
    pub source_dir: PathBuf,

    /// Root of the answer document; replaced by decryption for encrypted
    /// submissions.
    pub root: Element,

    pub meta: SubmissionMeta,

    pub status: ValidationStatus,

    /// Owns the temporary directory holding decrypted artifacts. `None` for
    /// unencrypted submissions, whose working directory is the source
    /// directory itself.
    pub workdir: Option<TempDir>,
}

impl Submission {
    /// Directory that referenced media files resolve against.
    pub fn working_dir(&self) -> &Path {
        self.workdir.as_ref().map_or(&self.source_dir, TempDir::path)
    }
}

/// Bounded path → parsed-document cache filled during the date scan.
///
/// Entries are taken at most once. A full cache silently drops inserts; a
/// miss just means the worker re-parses the file.
pub struct DocumentCache {
    entries: Mutex<HashMap<PathBuf, Element>>,
    capacity: usize,
}

impl DocumentCache {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), capacity }
    }

    pub fn insert(&self, path: PathBuf, document: Element) {
        if let Ok(mut entries) = self.entries.lock()
            && entries.len() < self.capacity
        {
            entries.insert(path, document);
        }
    }

    pub fn take(&self, path: &Path) -> Option<Element> {
        self.entries.lock().ok()?.remove(path)
    }
}
