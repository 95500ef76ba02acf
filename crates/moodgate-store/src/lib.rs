//! moodgate-store — on-disk persistence for validated faces.
//!
//! Two artefacts per validation:
//! - a record `{ "name": ..., "timestamp": ... }` appended to a JSON array
//!   file that is rewritten on every append;
//! - a JPEG of the face named after the identity and validation time.

use image::RgbImage;
use moodgate_core::{ValidationRecord, ValidationSink};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode records: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write face image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// JSON array of validation records backed by a file.
///
/// A missing file is created holding `[]`. An empty or unparsable file loads
/// as an empty list and is overwritten on the next append.
pub struct RecordFile {
    path: PathBuf,
    records: Vec<ValidationRecord>,
}

impl RecordFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut file = Self {
            path,
            records: Vec::new(),
        };

        if file.path.exists() {
            file.load()?;
        } else {
            if let Some(parent) = file.path.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            file.save()?;
        }

        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }

    /// Append `record` and rewrite the file. On failure the record is
    /// dropped again, so a retry does not duplicate it.
    pub fn append_and_save(&mut self, record: ValidationRecord) -> Result<(), StoreError> {
        self.records.push(record);
        if let Err(e) = self.save() {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let raw = fs::read(&self.path).map_err(io_error(&self.path))?;
        self.records = match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                if !raw.iter().all(u8::is_ascii_whitespace) {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "unreadable record file; starting empty"
                    );
                }
                Vec::new()
            }
        };
        tracing::debug!(path = %self.path.display(), count = self.records.len(), "loaded records");
        Ok(())
    }

    fn save(&self) -> Result<(), StoreError> {
        tracing::info!(path = %self.path.display(), "saving validation records");
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.records.serialize(&mut ser)?;
        fs::write(&self.path, buf).map_err(io_error(&self.path))
    }
}

/// File name for a validated face image, safe for any filesystem.
pub fn image_file_name(name: &str, timestamp: &str) -> String {
    let sanitize = |s: &str| s.replace(['/', ':'], "-");
    format!("{}_{}.jpg", sanitize(name), sanitize(timestamp))
}

/// Record file plus image directory; the tracker's persistence target.
pub struct ValidationStore {
    records: RecordFile,
    image_dir: PathBuf,
}

impl ValidationStore {
    pub fn open(
        records_path: impl Into<PathBuf>,
        image_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let image_dir = image_dir.into();
        fs::create_dir_all(&image_dir).map_err(io_error(&image_dir))?;
        Ok(Self {
            records: RecordFile::open(records_path)?,
            image_dir,
        })
    }

    pub fn records(&self) -> &[ValidationRecord] {
        self.records.records()
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn image_path(&self, record: &ValidationRecord) -> PathBuf {
        self.image_dir
            .join(image_file_name(&record.name, &record.timestamp))
    }
}

impl ValidationSink for ValidationStore {
    type Error = StoreError;

    /// Writes the image first so a record never points at a missing file.
    fn persist(&mut self, record: &ValidationRecord, image: &RgbImage) -> Result<(), StoreError> {
        let path = self.image_path(record);
        image.save(&path).map_err(|source| StoreError::Image {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "face image written");

        self.records.append_and_save(record.clone())
    }
}
