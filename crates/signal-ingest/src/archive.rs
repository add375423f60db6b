//! On-disk archive of uploaded documents.
//!
//! Every upload is written once under `<root>/<YYYY-MM-DD>/`. Existing files
//! are never overwritten: a taken name gets a `_<n>` suffix before its
//! extension, with the first free `n` starting at 1.

use crate::error::{IngestError, Result};
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const FALLBACK_NAME: &str = "upload.csv";

/// Upper bound on suffixes tried for one name.
const MAX_SUFFIX: u32 = 10_000;

/// Dated, collision-free upload archive.
#[derive(Debug, Clone)]
pub struct UploadArchive {
    root: PathBuf,
}

impl UploadArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under the directory for `date` and return the path used.
    pub async fn save(&self, filename: &str, bytes: &[u8], date: NaiveDate) -> Result<PathBuf> {
        let dir = self.root.join(date.format("%Y-%m-%d").to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let name = sanitize_filename(filename);
        let (stem, ext) = split_name(&name);

        for n in 0..=MAX_SUFFIX {
            let candidate = if n == 0 {
                dir.join(&name)
            } else {
                dir.join(format!("{}_{}{}", stem, n, ext))
            };

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            file.write_all(bytes).await?;
            file.flush().await?;
            debug!("archived {} bytes to {}", bytes.len(), candidate.display());
            return Ok(candidate);
        }

        Err(IngestError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free archive name for {} in {}", name, dir.display()),
        )))
    }

    /// Save under today's (UTC) directory.
    pub async fn save_today(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.save(filename, bytes, chrono::Utc::now().date_naive())
            .await
    }
}

/// Keep only the final path component of a client-supplied name.
pub fn sanitize_filename(filename: &str) -> String {
    let last = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    match last {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        name => name.replace('\0', ""),
    }
}

/// Split into stem and extension, the extension keeping its dot.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(i) => name.split_at(i),
    }
}
