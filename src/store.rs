//! Enumeration of a form's on-disk submission tree.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{INSTANCES_DIR, SUBMISSION_FILE};

/// Lists the instance directories under `form_dir/instances` that hold a
/// `submission.xml`, sorted by path name.
///
/// A missing or unreadable `instances/` directory yields an empty list, not
/// an error.
pub fn list_instances(form_dir: &Path) -> Vec<PathBuf> {
    let instances = form_dir.join(INSTANCES_DIR);
    let entries = match fs::read_dir(&instances) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_instance_dir(path))
        .collect();
    dirs.sort();
    dirs
}

/// True iff `path` is a directory containing a `submission.xml` file.
pub fn is_instance_dir(path: &Path) -> bool {
    path.is_dir() && path.join(SUBMISSION_FILE).is_file()
}
