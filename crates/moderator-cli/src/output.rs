use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use moderator_contracts::{EventWriter, ResultTable, RunEvent};
use moderator_engine::PublicBucket;
use tracing::{info, warn};

use crate::observer::emit_or_warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFiles {
    pub csv: PathBuf,
    pub json: PathBuf,
}

impl ResultFiles {
    pub fn in_dir(out_dir: &Path, stamp: &str) -> Self {
        Self {
            csv: out_dir.join(format!("results_{stamp}.csv")),
            json: out_dir.join(format!("results_{stamp}.json")),
        }
    }

    pub fn names(&self) -> Vec<String> {
        [&self.csv, &self.json]
            .iter()
            .map(|path| file_name(path))
            .collect()
    }
}

/// Write both local copies of the table. Either write failing is fatal.
pub fn write_results(table: &ResultTable, out_dir: &Path, stamp: &str) -> Result<ResultFiles> {
    let files = ResultFiles::in_dir(out_dir, stamp);
    table
        .write_csv(&files.csv)
        .context("failed to save CSV results")?;
    table
        .write_jsonl(&files.json)
        .context("failed to save JSON results")?;
    info!(csv = %files.csv.display(), json = %files.json.display(), "saved results");
    Ok(files)
}

/// Join an object key the way a POSIX path join would: an empty prefix adds
/// nothing, and a separator is inserted only when the prefix lacks one.
pub fn output_key(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() || file_name.starts_with('/') {
        file_name.to_string()
    } else if prefix.ends_with('/') {
        format!("{prefix}{file_name}")
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// Upload the JSON results. Failure is reported but never fails the run;
/// returns the public URL when the upload went through.
pub fn upload_results(
    bucket: &PublicBucket,
    json_path: &Path,
    output_prefix: &str,
    events: &EventWriter,
) -> Option<String> {
    let key = output_key(output_prefix, &file_name(json_path));
    match bucket.upload_public(json_path, &key) {
        Ok(url) => {
            println!("Successfully uploaded to {url}");
            emit_or_warn(
                events,
                &RunEvent::UploadFinished {
                    key,
                    url: url.clone(),
                },
            );
            Some(url)
        }
        Err(err) => {
            warn!(bucket = %bucket.name(), key = %key, error = %err, "upload failed");
            println!("Failed to upload {}: {err}", file_name(json_path));
            emit_or_warn(
                events,
                &RunEvent::UploadFailed {
                    key,
                    message: err.to_string(),
                },
            );
            None
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
