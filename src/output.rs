//! CSV writers and media copying for one export run.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{Terminator, Writer, WriterBuilder};
use hashbrown::HashSet;
use tracing::warn;

use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::mapper::{self, Cell, SubmissionRows};
use crate::model::{FormDefinition, NodeId};

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

struct OutputFile {
    path: PathBuf,
    writer: Writer<File>,
}

impl OutputFile {
    /// Opens a CSV file per the overwrite policy: truncate and write the
    /// header, or append to an existing file without one.
    fn open(path: PathBuf, header: &[String], overwrite: bool) -> Result<Self, ExportError> {
        let append = !overwrite && path.exists();
        let file = if append {
            OpenOptions::new().append(true).open(&path)
        } else {
            File::create(&path)
        }
        .map_err(|source| ExportError::Io { path: path.clone(), source })?;

        let mut writer = WriterBuilder::new().terminator(Terminator::Any(b'\n')).from_writer(file);
        if !append {
            writer.write_record(header).map_err(|source| ExportError::Csv { path: path.clone(), source })?;
        }
        Ok(Self { path, writer })
    }

    fn write(&mut self, record: &[String]) -> Result<(), ExportError> {
        self.writer.write_record(record).map_err(|source| ExportError::Csv { path: self.path.clone(), source })
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        self.writer.flush().map_err(|source| ExportError::Io { path: self.path.clone(), source })
    }
}

/// All CSV writers of one export: the main file plus one file per repeat.
pub struct CsvSink {
    main: OutputFile,
    repeats: Vec<(NodeId, OutputFile)>,
    media: Option<MediaCopier>,
}

impl CsvSink {
    /// Opens `<safeName>.csv` and one `<safeName>-<repeat>.csv` per repeat
    /// node, writing headers according to the overwrite policy.
    pub fn open(form: &FormDefinition, config: &ExportConfig) -> Result<Self, ExportError> {
        let safe = safe_file_name(&form.name);
        let main = OutputFile::open(
            config.export_dir.join(format!("{safe}.csv")),
            &mapper::main_header(&form.model, form.encrypted),
            config.overwrite_existing,
        )?;

        let mut repeats = Vec::new();
        for repeat in form.model.repeatable_fields() {
            let name = &form.model.node(repeat).name;
            let file = OutputFile::open(
                config.export_dir.join(format!("{safe}-{name}.csv")),
                &mapper::repeat_header(&form.model, repeat),
                config.overwrite_existing,
            )?;
            repeats.push((repeat, file));
        }

        let media = config
            .export_media
            .then(|| MediaCopier::new(config.media_dir.clone().unwrap_or_else(|| config.export_dir.join("media"))));

        Ok(Self { main, repeats, media })
    }

    /// Appends every row of one submission, resolving media cells first so
    /// collision suffixes are assigned in write order.
    pub fn append(&mut self, rows: SubmissionRows) -> Result<(), ExportError> {
        let record = resolve_record(&mut self.media, rows.main);
        self.main.write(&record)?;

        for (repeat, repeat_rows) in rows.repeats {
            let Some((_, file)) = self.repeats.iter_mut().find(|(id, _)| *id == repeat) else {
                continue;
            };
            for row in repeat_rows {
                let record = resolve_record(&mut self.media, row);
                file.write(&record)?;
            }
        }
        Ok(())
    }

    /// Flushes every writer.
    pub fn finish(&mut self) -> Result<(), ExportError> {
        self.main.flush()?;
        for (_, file) in &mut self.repeats {
            file.flush()?;
        }
        Ok(())
    }
}

fn resolve_record(media: &mut Option<MediaCopier>, cells: Vec<Cell>) -> Vec<String> {
    cells
        .into_iter()
        .map(|cell| match cell {
            Cell::Text(text) => text,
            Cell::Media { source, name } => match media {
                Some(copier) => copier.copy(&source, &name),
                None => name,
            },
        })
        .collect()
}

/// Copies referenced media into the media directory, suffixing duplicate
/// names with `-2`, `-3`, ….
pub struct MediaCopier {
    dest: PathBuf,
    written: HashSet<String>,
    ready: bool,
}

impl MediaCopier {
    pub fn new(dest: PathBuf) -> Self {
        Self { dest, written: HashSet::new(), ready: false }
    }

    /// Copies one file and returns the name actually written. Copy failures
    /// keep the export going; the cell falls back to the stored name.
    pub fn copy(&mut self, source: &Path, name: &str) -> String {
        if !source.is_file() {
            warn!(source = %source.display(), "referenced media file is missing");
            return name.to_string();
        }
        if !self.ready {
            if let Err(err) = fs::create_dir_all(&self.dest) {
                warn!("failed to create media directory {}: {err}", self.dest.display());
                return name.to_string();
            }
            self.ready = true;
        }

        let target = self.free_name(name);
        match fs::copy(source, self.dest.join(&target)) {
            Ok(_) => {
                self.written.insert(target.clone());
                target
            }
            Err(err) => {
                warn!("failed to copy media {}: {err}", source.display());
                name.to_string()
            }
        }
    }

    fn free_name(&self, name: &str) -> String {
        if !self.written.contains(name) && !self.dest.join(name).exists() {
            return name.to_string();
        }
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, extension)) => (stem, Some(extension)),
            None => (name, None),
        };
        let mut counter = 2;
        loop {
            let candidate = match extension {
                Some(extension) => format!("{stem}-{counter}.{extension}"),
                None => format!("{stem}-{counter}"),
            };
            if !self.written.contains(&candidate) && !self.dest.join(&candidate).exists() {
                return candidate;
            }
            counter += 1;
        }
    }
}
