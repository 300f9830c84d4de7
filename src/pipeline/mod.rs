//! Export orchestration: enumerate, sort, process in parallel, write in order.
//!
//! The pipeline mirrors a three-stage design: a reader thread feeds instance
//! directories into a bounded channel, a rayon-backed stage parses, decrypts
//! and maps submissions concurrently, and the calling thread drains results
//! through a reordering buffer so every CSV sees rows in ascending
//! submission-date order.

pub mod buffer;
pub mod worker;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, FixedOffset};
use rayon::iter::{ParallelBridge, ParallelIterator};
use tracing::{debug, warn};

use crate::config::{ExportConfig, PARSE_CACHE_CAPACITY, PROGRESS_EVERY, SUBMISSION_FILE};
use crate::error::ExportError;
use crate::model::FormDefinition;
use crate::output::CsvSink;
use crate::pipeline::buffer::ReorderBuffer;
use crate::pipeline::worker::{BatchPayload, RowBatch, Task};
use crate::store;
use crate::submission::{DocumentCache, SubmissionMeta};
use crate::types::{CancelToken, EventSink, ExportEvent, ExportOutcome};
use crate::xml;

struct ScanEntry {
    dir: PathBuf,
    date: Option<DateTime<FixedOffset>>,
}

/// Runs a full export of `form` from `form_dir` according to `config`.
///
/// Returns the aggregate outcome; per-submission failures are logged, counted
/// and skipped, while configuration and write failures abort the export.
pub fn export(
    form: &FormDefinition,
    form_dir: &Path,
    config: &ExportConfig,
    sink: &dyn EventSink,
    cancel: &CancelToken,
) -> Result<ExportOutcome, ExportError> {
    validate_config(form, config)?;
    fs::create_dir_all(&config.export_dir)
        .map_err(|source| ExportError::Io { path: config.export_dir.clone(), source })?;

    let cache = DocumentCache::new(PARSE_CACHE_CAPACITY);
    let entries = scan_instances(form_dir, config, &cache);
    let total = entries.len();
    sink.publish(&ExportEvent::Started { form_id: form.id.clone(), total });

    let mut files = CsvSink::open(form, config)?;

    let concurrency = thread::available_parallelism().map(|p| p.get()).unwrap_or(4);
    let (task_tx, task_rx) = flume::bounded::<Task>(concurrency * 2);
    let (batch_tx, batch_rx) = flume::bounded::<RowBatch>(concurrency * 2);

    let drained = thread::scope(|scope| {
        scope.spawn(move || {
            for (seq, entry) in entries.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                if task_tx.send(Task { seq: seq as u64, dir: entry.dir }).is_err() {
                    break;
                }
            }
        });

        scope.spawn(move || {
            task_rx.iter().par_bridge().for_each(|task| {
                let batch = worker::process(form, config, &cache, task);
                // A send failure means the writer is gone; nothing left to do.
                let _ = batch_tx.send(batch);
            });
        });

        let mut reorder = ReorderBuffer::new();
        let mut exported = 0usize;
        let mut skipped = 0usize;

        for batch in batch_rx.iter() {
            for ready in reorder.push(batch) {
                write_batch(&mut files, ready, &mut exported, &mut skipped, form, total, sink)?;
            }
        }
        for ready in reorder.drain() {
            write_batch(&mut files, ready, &mut exported, &mut skipped, form, total, sink)?;
        }
        files.finish()?;
        Ok::<(usize, usize), ExportError>((exported, skipped))
    });

    let (exported, skipped) = match drained {
        Ok(counts) => counts,
        Err(err) => {
            sink.publish(&ExportEvent::Failed { form_id: form.id.clone(), reason: err.to_string() });
            return Err(err);
        }
    };

    let outcome = compute_outcome(total, exported, skipped);
    match outcome {
        ExportOutcome::AllExported => {
            sink.publish(&ExportEvent::Succeeded { form_id: form.id.clone(), exported });
        }
        ExportOutcome::SomeSkipped => {
            sink.publish(&ExportEvent::PartiallySucceeded { form_id: form.id.clone(), exported, skipped });
        }
        ExportOutcome::AllSkipped => {
            sink.publish(&ExportEvent::Failed {
                form_id: form.id.clone(),
                reason: format!("all {total} submissions were skipped"),
            });
        }
    }
    Ok(outcome)
}

fn validate_config(form: &FormDefinition, config: &ExportConfig) -> Result<(), ExportError> {
    if config.include_geojson {
        return Err(ExportError::Config("includeGeoJson is not supported".to_string()));
    }
    if config.split_select_multiples {
        return Err(ExportError::Config("splitSelectMultiples is not supported".to_string()));
    }
    if config.remove_group_names {
        return Err(ExportError::Config("removeGroupNames is not supported".to_string()));
    }
    if form.encrypted && config.private_key.is_none() {
        return Err(ExportError::Config(format!("form {} is encrypted and requires a private key", form.id)));
    }
    Ok(())
}

/// Enumerates instance directories, reads each submission date, fills the
/// parse cache and applies the date filter; the result is sorted ascending by
/// date with path-name tie-break (absent dates first).
fn scan_instances(form_dir: &Path, config: &ExportConfig, cache: &DocumentCache) -> Vec<ScanEntry> {
    let mut entries = Vec::new();
    for dir in store::list_instances(form_dir) {
        let date = match xml::parse_document(&dir.join(SUBMISSION_FILE)) {
            Ok(document) => {
                let date = SubmissionMeta::read(&document).submission_date;
                cache.insert(dir.clone(), document);
                date
            }
            Err(err) => {
                // The worker stage re-parses and classifies the skip.
                debug!(dir = %dir.display(), "deferring parse failure: {err}");
                None
            }
        };
        if config.date_range.admits(date.as_ref()) {
            entries.push(ScanEntry { dir, date });
        }
    }
    entries.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.dir.cmp(&b.dir)));
    entries
}

fn write_batch(
    files: &mut CsvSink,
    batch: RowBatch,
    exported: &mut usize,
    skipped: &mut usize,
    form: &FormDefinition,
    total: usize,
    sink: &dyn EventSink,
) -> Result<(), ExportError> {
    match batch.payload {
        BatchPayload::Rows { rows, workdir } => {
            files.append(rows)?;
            // Decrypted artifacts are no longer needed once the rows landed.
            drop(workdir);
            *exported += 1;
        }
        BatchPayload::Skip { reason } => {
            warn!(dir = %batch.dir.display(), "skipping submission: {reason}");
            *skipped += 1;
        }
    }

    let processed = *exported + *skipped;
    if processed % PROGRESS_EVERY == 0 {
        sink.publish(&ExportEvent::Progress { form_id: form.id.clone(), exported: *exported, total });
    }
    Ok(())
}

fn compute_outcome(total: usize, exported: usize, skipped: usize) -> ExportOutcome {
    if total == 0 {
        return ExportOutcome::AllExported;
    }
    if exported == 0 {
        return ExportOutcome::AllSkipped;
    }
    if skipped == 0 { ExportOutcome::AllExported } else { ExportOutcome::SomeSkipped }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use aes::Aes256;
    use aes::cipher::KeyIvInit;
    use aes::cipher::generic_array::GenericArray;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use chrono::NaiveDate;
    use md5::{Digest, Md5};
    use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
    use tempfile::tempdir;

    use crate::config::{AES_BLOCK_LEN, DateRange};
    use crate::crypto::signature;
    use crate::model::{DataType, ModelBuilder};
    use crate::types::NullSink;

    use super::*;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<ExportEvent>>);

    impl EventSink for CollectingSink {
        fn publish(&self, event: &ExportEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl CollectingSink {
        fn events(&self) -> Vec<ExportEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    fn simple_form() -> FormDefinition {
        let mut builder = ModelBuilder::new("data");
        let root = builder.root();
        builder.field(root, "name", DataType::Text);
        FormDefinition {
            id: "simple".to_string(),
            name: "simple".to_string(),
            version: None,
            encrypted: false,
            model: builder.finish(),
        }
    }

    fn write_instance(form_dir: &Path, name: &str, xml_text: &str) {
        let dir = form_dir.join("instances").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SUBMISSION_FILE), xml_text).unwrap();
    }

    fn run(form: &FormDefinition, form_dir: &Path, config: &ExportConfig) -> ExportOutcome {
        export(form, form_dir, config, &NullSink, &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_rows_are_sorted_by_submission_date() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(
            &form_dir,
            "uuid-a",
            r#"<data instanceID="uuid:a" submissionDate="2020-01-02T08:00:00.000Z"><name>second</name></data>"#,
        );
        write_instance(
            &form_dir,
            "uuid-b",
            r#"<data instanceID="uuid:b" submissionDate="2020-01-01T08:00:00.000Z"><name>first</name></data>"#,
        );

        let config = ExportConfig::new(dir.path().join("out"));
        let outcome = run(&simple_form(), &form_dir, &config);
        assert_eq!(outcome, ExportOutcome::AllExported);

        let main = fs::read_to_string(dir.path().join("out/simple.csv")).unwrap();
        let lines: Vec<&str> = main.lines().collect();
        assert_eq!(lines[0], "SubmissionDate,name,KEY");
        assert!(lines[1].contains("first"));
        assert!(lines[2].contains("second"));
        assert!(main.ends_with('\n'));
    }

    #[test]
    fn test_geopoint_splits_into_four_cells() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(
            &form_dir,
            "uuid-a",
            r#"<data instanceID="uuid:a"><where>1.5 2.5 3.5 4.5</where></data>"#,
        );

        let mut builder = ModelBuilder::new("data");
        let root = builder.root();
        builder.field(root, "where", DataType::Geopoint);
        let form = FormDefinition {
            id: "geo".to_string(),
            name: "geo".to_string(),
            version: None,
            encrypted: false,
            model: builder.finish(),
        };

        let config = ExportConfig::new(dir.path().join("out"));
        run(&form, &form_dir, &config);

        let main = fs::read_to_string(dir.path().join("out/geo.csv")).unwrap();
        assert!(main.contains("1.5,2.5,3.5,4.5"));
    }

    #[test]
    fn test_repeat_rows_land_in_their_own_file() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(
            &form_dir,
            "uuid-a",
            r#"<data instanceID="uuid:a"><g1><v>one</v></g1><g1><v>two</v></g1></data>"#,
        );

        let mut builder = ModelBuilder::new("data");
        let root = builder.root();
        let g1 = builder.repeat(root, "g1");
        builder.field(g1, "v", DataType::Text);
        let form = FormDefinition {
            id: "rep".to_string(),
            name: "rep".to_string(),
            version: None,
            encrypted: false,
            model: builder.finish(),
        };

        let config = ExportConfig::new(dir.path().join("out"));
        run(&form, &form_dir, &config);

        let main = fs::read_to_string(dir.path().join("out/rep.csv")).unwrap();
        assert_eq!(main.lines().count(), 2);

        let repeat = fs::read_to_string(dir.path().join("out/rep-g1.csv")).unwrap();
        let lines: Vec<&str> = repeat.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("uuid:a,uuid:a/g1[1],uuid:a/g1,one"));
        assert!(lines[2].starts_with("uuid:a,uuid:a/g1[2],uuid:a/g1,two"));
    }

    #[test]
    fn test_nested_repeats_produce_linked_files() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(
            &form_dir,
            "uuid-a",
            r#"<data instanceID="uuid:a"><g1><g2><g3><v>x</v></g3></g2></g1></data>"#,
        );

        let mut builder = ModelBuilder::new("data");
        let root = builder.root();
        let g1 = builder.repeat(root, "g1");
        let g2 = builder.repeat(g1, "g2");
        let g3 = builder.repeat(g2, "g3");
        builder.field(g3, "v", DataType::Text);
        let form = FormDefinition {
            id: "nested".to_string(),
            name: "nested".to_string(),
            version: None,
            encrypted: false,
            model: builder.finish(),
        };

        let config = ExportConfig::new(dir.path().join("out"));
        run(&form, &form_dir, &config);

        for name in ["nested-g1.csv", "nested-g2.csv", "nested-g3.csv"] {
            assert!(dir.path().join("out").join(name).is_file(), "missing {name}");
        }

        let g2_lines = fs::read_to_string(dir.path().join("out/nested-g2.csv")).unwrap();
        let g3_lines = fs::read_to_string(dir.path().join("out/nested-g3.csv")).unwrap();
        // Each row's PARENT_KEY points at the KEY one level up.
        assert!(g2_lines.lines().nth(1).unwrap().starts_with("uuid:a/g1[1],uuid:a/g1[1]/g2[1],"));
        assert!(g3_lines.lines().nth(1).unwrap().starts_with("uuid:a/g1[1]/g2[1],uuid:a/g1[1]/g2[1]/g3[1],"));
    }

    #[test]
    fn test_date_range_filters_submissions() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        for (name, day) in [("uuid-a", 1), ("uuid-b", 2), ("uuid-c", 3)] {
            write_instance(
                &form_dir,
                name,
                &format!(
                    r#"<data instanceID="uuid:{name}" submissionDate="2020-01-0{day}T08:00:00.000Z"><name>day{day}</name></data>"#
                ),
            );
        }

        let mut config = ExportConfig::new(dir.path().join("out"));
        config.date_range = DateRange {
            start: NaiveDate::from_ymd_opt(2020, 1, 2),
            end: NaiveDate::from_ymd_opt(2020, 1, 3),
        };

        let sink = CollectingSink::default();
        let outcome = export(&simple_form(), &form_dir, &config, &sink, &CancelToken::new()).unwrap();
        assert_eq!(outcome, ExportOutcome::AllExported);

        let main = fs::read_to_string(dir.path().join("out/simple.csv")).unwrap();
        assert!(!main.contains("day1"));
        assert!(main.contains("day2"));
        assert!(main.contains("day3"));

        // The tracker only counts admitted submissions.
        assert!(sink.events().contains(&ExportEvent::Started { form_id: "simple".to_string(), total: 2 }));
    }

    #[test]
    fn test_empty_instances_exports_headers_only() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        fs::create_dir_all(form_dir.join("instances")).unwrap();

        let config = ExportConfig::new(dir.path().join("out"));
        let outcome = run(&simple_form(), &form_dir, &config);

        assert_eq!(outcome, ExportOutcome::AllExported);
        let main = fs::read_to_string(dir.path().join("out/simple.csv")).unwrap();
        assert_eq!(main, "SubmissionDate,name,KEY\n");
    }

    #[test]
    fn test_missing_instance_id_synthesizes_key() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(&form_dir, "uuid-a", "<data><name>Ada</name></data>");

        let config = ExportConfig::new(dir.path().join("out"));
        let outcome = run(&simple_form(), &form_dir, &config);
        assert_eq!(outcome, ExportOutcome::AllExported);

        let main = fs::read_to_string(dir.path().join("out/simple.csv")).unwrap();
        let row = main.lines().nth(1).unwrap();
        assert!(row.contains(",uuid:"));
    }

    #[test]
    fn test_malformed_submission_is_skipped_and_counted() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(&form_dir, "uuid-a", r#"<data instanceID="uuid:a"><name>Ada</name></data>"#);
        write_instance(&form_dir, "uuid-b", "<data><broken");

        let config = ExportConfig::new(dir.path().join("out"));
        let sink = CollectingSink::default();
        let outcome = export(&simple_form(), &form_dir, &config, &sink, &CancelToken::new()).unwrap();

        assert_eq!(outcome, ExportOutcome::SomeSkipped);
        assert!(sink.events().contains(&ExportEvent::PartiallySucceeded {
            form_id: "simple".to_string(),
            exported: 1,
            skipped: 1,
        }));
    }

    #[test]
    fn test_two_overwrite_runs_are_byte_identical() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(
            &form_dir,
            "uuid-a",
            r#"<data instanceID="uuid:a" submissionDate="2020-01-01T08:00:00.000Z"><name>Ada</name></data>"#,
        );
        write_instance(
            &form_dir,
            "uuid-b",
            r#"<data instanceID="uuid:b" submissionDate="2020-01-02T08:00:00.000Z"><name>Grace</name></data>"#,
        );

        let config = ExportConfig::new(dir.path().join("out"));
        run(&simple_form(), &form_dir, &config);
        let first = fs::read(dir.path().join("out/simple.csv")).unwrap();

        run(&simple_form(), &form_dir, &config);
        let second = fs::read(dir.path().join("out/simple.csv")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_append_run_adds_rows_without_header() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(&form_dir, "uuid-a", r#"<data instanceID="uuid:a"><name>Ada</name></data>"#);

        let mut config = ExportConfig::new(dir.path().join("out"));
        run(&simple_form(), &form_dir, &config);
        let single = fs::read_to_string(dir.path().join("out/simple.csv")).unwrap();

        config.overwrite_existing = false;
        run(&simple_form(), &form_dir, &config);
        let doubled = fs::read_to_string(dir.path().join("out/simple.csv")).unwrap();

        let data_lines: Vec<&str> = single.lines().skip(1).collect();
        let expected = format!("{single}{}\n", data_lines.join("\n"));
        assert_eq!(doubled, expected);
    }

    #[test]
    fn test_cancelled_before_start_skips_everything() {
        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        write_instance(&form_dir, "uuid-a", r#"<data instanceID="uuid:a"><name>Ada</name></data>"#);

        let cancel = CancelToken::new();
        cancel.cancel();

        let config = ExportConfig::new(dir.path().join("out"));
        let outcome = export(&simple_form(), &form_dir, &config, &NullSink, &cancel).unwrap();

        assert_eq!(outcome, ExportOutcome::AllSkipped);
        // Partial output stays well-formed: the header was already written.
        let main = fs::read_to_string(dir.path().join("out/simple.csv")).unwrap();
        assert_eq!(main, "SubmissionDate,name,KEY\n");
    }

    #[test]
    fn test_unsupported_flags_are_refused() {
        let dir = tempdir().unwrap();
        let mut config = ExportConfig::new(dir.path().join("out"));
        config.split_select_multiples = true;

        let result = export(&simple_form(), &dir.path().join("form"), &config, &NullSink, &CancelToken::new());
        assert!(matches!(result, Err(ExportError::Config(_))));
    }

    #[test]
    fn test_encrypted_form_requires_private_key() {
        let dir = tempdir().unwrap();
        let mut form = simple_form();
        form.encrypted = true;

        let config = ExportConfig::new(dir.path().join("out"));
        let result = export(&form, &dir.path().join("form"), &config, &NullSink, &CancelToken::new());
        assert!(matches!(result, Err(ExportError::Config(_))));
    }

    #[test]
    fn test_encrypted_form_end_to_end() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        let instance_id = "uuid:enc-1";
        let sym_key = [23u8; 32];

        let mut builder = ModelBuilder::new("data");
        let root = builder.root();
        builder.field(root, "name", DataType::Text);
        builder.field(root, "photo", DataType::Binary);
        let form = FormDefinition {
            id: "enc-form".to_string(),
            name: "enc-form".to_string(),
            version: None,
            encrypted: true,
            model: builder.finish(),
        };

        // IV schedule: md5(instanceId || key), one byte bumped per cipher.
        let mut hasher = Md5::new();
        hasher.update(instance_id.as_bytes());
        hasher.update(sym_key);
        let mut seed: [u8; 16] = hasher.finalize().into();
        seed[0] = seed[0].wrapping_add(1);
        let media_iv = seed;
        seed[1] = seed[1].wrapping_add(1);
        let payload_iv = seed;

        let encrypt = |iv: &[u8; 16], plain: &[u8]| -> Vec<u8> {
            let mut data = plain.to_vec();
            let pad = AES_BLOCK_LEN - (data.len() % AES_BLOCK_LEN);
            data.extend(std::iter::repeat_n(pad as u8, pad));
            let mut cipher = cfb_mode::BufEncryptor::<Aes256>::new(
                GenericArray::from_slice(&sym_key),
                GenericArray::from_slice(iv),
            );
            cipher.encrypt(&mut data);
            data
        };

        let media_plain = b"jpeg bytes";
        let payload_plain = format!(
            r#"<data id="enc-form"><name>Ada</name><photo>photo.jpg</photo><meta><instanceID>{instance_id}</instanceID></meta></data>"#
        );

        let digests = vec![
            ("photo.jpg".to_string(), Md5::digest(media_plain).into()),
            ("submission.xml".to_string(), Md5::digest(payload_plain.as_bytes()).into()),
        ];
        let input = signature::signature_input(&form, instance_id, &BASE64.encode(sym_key), &digests);
        let signature_digest: [u8; 16] = Md5::digest(input).into();
        let signature_b64 = BASE64.encode(public_key.encrypt(&mut rng, Pkcs1v15Encrypt, &signature_digest).unwrap());
        let wrapped_key = BASE64.encode(public_key.encrypt(&mut rng, Pkcs1v15Encrypt, &sym_key).unwrap());

        let dir = tempdir().unwrap();
        let form_dir = dir.path().join("form");
        let instance_dir = form_dir.join("instances").join("uuid-enc-1");
        fs::create_dir_all(&instance_dir).unwrap();
        fs::write(instance_dir.join("photo.jpg.enc"), encrypt(&media_iv, media_plain)).unwrap();
        fs::write(instance_dir.join("submission.xml.enc"), encrypt(&payload_iv, payload_plain.as_bytes())).unwrap();
        fs::write(
            instance_dir.join(SUBMISSION_FILE),
            format!(
                r#"<data id="enc-form" encrypted="yes" instanceID="{instance_id}" submissionDate="2020-01-05T08:00:00.000Z">
                     <base64EncryptedKey>{wrapped_key}</base64EncryptedKey>
                     <media><file>photo.jpg.enc</file></media>
                     <encryptedXmlFile>submission.xml.enc</encryptedXmlFile>
                     <base64EncryptedElementSignature>{signature_b64}</base64EncryptedElementSignature>
                   </data>"#
            ),
        )
        .unwrap();

        let mut config = ExportConfig::new(dir.path().join("out"));
        config.private_key = Some(private_key);
        config.export_media = true;

        let outcome = run(&form, &form_dir, &config);
        assert_eq!(outcome, ExportOutcome::AllExported);

        let main = fs::read_to_string(dir.path().join("out/enc-form.csv")).unwrap();
        let lines: Vec<&str> = main.lines().collect();
        assert_eq!(lines[0], "SubmissionDate,name,photo,KEY,isValidated");
        assert!(lines[1].contains("Ada"));
        assert!(lines[1].contains("photo.jpg"));
        assert!(lines[1].ends_with("True"));

        // The decrypted media file was copied out of the working directory.
        assert_eq!(fs::read(dir.path().join("out/media/photo.jpg")).unwrap(), media_plain);
    }
}
