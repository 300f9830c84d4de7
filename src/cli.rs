//! CLI commands and argument parsing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;

use crate::config::{DateRange, ExportConfig};
use crate::form;
use crate::pipeline;
use crate::types::CancelToken;
use crate::ui::progress::ProgressSink;

/// formflat - flatten collected form submissions into CSV files.
#[derive(Parser)]
#[command(
    name = "formflat",
    version,
    about = "Export collected survey-form submissions to flat CSV files, one per repeat group."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export one form directory to CSV.
    Export {
        /// Form storage directory (holds the form file and instances/).
        #[arg(short, long)]
        form_dir: PathBuf,

        /// Form definition file (defaults to the only .xml file in the form directory).
        #[arg(long)]
        form_file: Option<PathBuf>,

        /// Destination directory for the CSV files.
        #[arg(short, long)]
        export_dir: PathBuf,

        /// Inclusive lower bound on the submission date (yyyy-mm-dd).
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Inclusive upper bound on the submission date (yyyy-mm-dd).
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// PEM file holding the RSA private key of an encrypted form.
        #[arg(short, long)]
        private_key: Option<PathBuf>,

        /// Copy referenced media files next to the CSVs.
        #[arg(long)]
        export_media: bool,

        /// Media destination (defaults to <export-dir>/media).
        #[arg(long)]
        media_dir: Option<PathBuf>,

        /// Append to existing CSV files instead of overwriting them.
        #[arg(long)]
        append: bool,
    },
}

impl Cli {
    /// Installs the tracing subscriber and parses arguments.
    pub fn init() -> Result<Self> {
        let subscriber = tracing_subscriber::fmt().with_target(false).finish();
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(Self::parse())
    }

    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Export {
                form_dir,
                form_file,
                export_dir,
                start_date,
                end_date,
                private_key,
                export_media,
                media_dir,
                append,
            } => run_export(RunExport {
                form_dir,
                form_file,
                export_dir,
                start_date,
                end_date,
                private_key,
                export_media,
                media_dir,
                append,
            }),
        }
    }
}

struct RunExport {
    form_dir: PathBuf,
    form_file: Option<PathBuf>,
    export_dir: PathBuf,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    private_key: Option<PathBuf>,
    export_media: bool,
    media_dir: Option<PathBuf>,
    append: bool,
}

fn run_export(args: RunExport) -> Result<()> {
    let form_path = match args.form_file {
        Some(path) => path,
        None => find_form_file(&args.form_dir)?,
    };
    let form = form::load_form(&form_path)?;

    let mut config = ExportConfig::new(args.export_dir);
    config.overwrite_existing = !args.append;
    config.date_range = DateRange { start: args.start_date, end: args.end_date };
    config.export_media = args.export_media;
    config.media_dir = args.media_dir;
    if let Some(path) = args.private_key {
        config.private_key = Some(read_private_key(&path)?);
    }

    let sink = ProgressSink::new();
    let outcome = pipeline::export(&form, &args.form_dir, &config, &sink, &CancelToken::new())
        .with_context(|| format!("export failed for form {}", form.id))?;

    println!("✓ {}: {outcome}", form.name);
    Ok(())
}

/// Picks the form definition: the single top-level .xml file of the form
/// directory.
fn find_form_file(form_dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(form_dir)
        .with_context(|| format!("failed to read form directory {}", form_dir.display()))?;

    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "xml"))
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => bail!("no form definition (.xml) found in {}", form_dir.display()),
        1 => Ok(candidates.remove(0)),
        _ => bail!("multiple .xml files in {}; pass --form-file", form_dir.display()),
    }
}

fn read_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = fs::read_to_string(path)
        .with_context(|| format!("failed to read private key {}", path.display()))?;

    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .with_context(|| format!("unsupported private key format in {}", path.display()))
}
