//! Orchestration around an external file-transfer collaborator: resolve the
//! (url, destination) pair for each referenced file, create directories, and
//! skip work that is already done.

use crate::catalog::{is_url, DataSetRecord};
use anyhow::{Context, Result};
use std::path::Path;

/// The seam to whatever actually moves bytes (HTTP client, rsync wrapper,
/// test double). Implementations may assume the destination's parent
/// directory exists.
pub trait FileTransfer {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Fetch one referenced file for a data set. Null fields are skipped, as are
/// destinations that already exist. Without a valid remote store this is a
/// no-op diagnostic, not an error.
pub fn download_file(
    record: &DataSetRecord,
    field: &str,
    transfer: &dyn FileTransfer,
) -> Result<()> {
    let remote = record.remote_data_dir().unwrap_or("");
    if !is_url(remote) {
        log::warn!("\"remote_data_dir\" is not a full URL; skipping download of {field}");
        return Ok(());
    }

    let (Some(url), Some(dest)) = (record.abs_url(field), record.abs_path(field)) else {
        return Ok(());
    };

    if dest.exists() {
        log::info!("skipping {} (already exists)", dest.display());
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    log::info!("downloading {}", dest.display());
    transfer
        .fetch(&url, &dest)
        .with_context(|| format!("fetching {url}"))
}

/// Fetch every non-null `*_file` field for a data set.
pub fn download_all_data_files(record: &DataSetRecord, transfer: &dyn FileTransfer) -> Result<()> {
    let remote = record.remote_data_dir().unwrap_or("");
    if !is_url(remote) {
        log::warn!("\"remote_data_dir\" is not a full URL; skipping downloads");
        return Ok(());
    }
    let fields: Vec<String> = record
        .file_fields()
        .filter(|(_, v)| !v.is_null())
        .map(|(name, _)| name.to_string())
        .collect();
    for field in fields {
        download_file(record, &field, transfer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::{Mapping, Value};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingTransfer {
        calls: RefCell<Vec<(String, PathBuf)>>,
    }

    impl FileTransfer for RecordingTransfer {
        fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
            self.calls.borrow_mut().push((url.into(), dest.into()));
            std::fs::write(dest, b"payload")?;
            Ok(())
        }
    }

    fn record(data_dir: &str, remote: Option<&str>, files: &[(&str, &str)]) -> DataSetRecord {
        let mut fields = Mapping::new();
        fields.insert(Value::from("data_dir"), Value::from(data_dir));
        fields.insert(
            Value::from("remote_data_dir"),
            remote.map(Value::from).unwrap_or(Value::Null),
        );
        for (name, value) in files {
            fields.insert(Value::from(*name), Value::from(*value));
        }
        DataSetRecord::new(fields)
    }

    #[test]
    fn fetches_missing_file_and_creates_directories() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("deep/nested/s1");
        let record = record(
            data_dir.to_str().unwrap(),
            Some("https://host/s1"),
            &[("data_file", "rec.dat")],
        );
        let transfer = RecordingTransfer::default();
        download_file(&record, "data_file", &transfer).unwrap();
        let calls = transfer.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://host/s1/rec.dat");
        assert_eq!(calls[0].1, data_dir.join("rec.dat"));
        assert!(calls[0].1.exists());
    }

    #[test]
    fn skips_existing_destination() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("s1");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("rec.dat"), b"already here").unwrap();
        let record = record(
            data_dir.to_str().unwrap(),
            Some("https://host/s1"),
            &[("data_file", "rec.dat")],
        );
        let transfer = RecordingTransfer::default();
        download_file(&record, "data_file", &transfer).unwrap();
        assert!(transfer.calls.borrow().is_empty());
        assert_eq!(
            std::fs::read(data_dir.join("rec.dat")).unwrap(),
            b"already here"
        );
    }

    #[test]
    fn null_field_is_skipped() {
        let dir = tempdir().unwrap();
        let record = record(
            dir.path().to_str().unwrap(),
            Some("https://host/s1"),
            &[],
        );
        let transfer = RecordingTransfer::default();
        download_file(&record, "video_file", &transfer).unwrap();
        assert!(transfer.calls.borrow().is_empty());
    }

    #[test]
    fn invalid_remote_store_warns_instead_of_failing() {
        let dir = tempdir().unwrap();
        let record = record(
            dir.path().to_str().unwrap(),
            None,
            &[("data_file", "rec.dat")],
        );
        let transfer = RecordingTransfer::default();
        download_all_data_files(&record, &transfer).unwrap();
        assert!(transfer.calls.borrow().is_empty());
    }

    #[test]
    fn downloads_every_referenced_file() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("s1");
        let record = record(
            data_dir.to_str().unwrap(),
            Some("https://host/s1"),
            &[("data_file", "rec.dat"), ("video_file", "rec.mp4")],
        );
        let transfer = RecordingTransfer::default();
        download_all_data_files(&record, &transfer).unwrap();
        let urls: Vec<String> = transfer
            .calls
            .borrow()
            .iter()
            .map(|(url, _)| url.clone())
            .collect();
        assert_eq!(
            urls,
            ["https://host/s1/rec.dat", "https://host/s1/rec.mp4"]
        );
    }
}
