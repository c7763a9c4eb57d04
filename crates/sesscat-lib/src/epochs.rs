//! CSV-backed behavioral epoch stores: the user-editable epoch encoder file
//! and the read-only annotations file, plus merging of both streams into a
//! single timeline.

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Round a time in seconds to the nearest microsecond so rewritten files are
/// deterministic and diffable.
pub fn round_to_microseconds(t: f64) -> f64 {
    (t * 1e6).round() / 1e6
}

/// One labeled interval in the epoch encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    #[serde(rename = "Start (s)")]
    pub start: f64,
    #[serde(rename = "End (s)")]
    pub end: f64,
    #[serde(rename = "Type")]
    pub label: String,
}

/// One row of the merged annotation timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    #[serde(rename = "Start (s)")]
    pub start: f64,
    #[serde(rename = "End (s)")]
    pub end: f64,
    #[serde(rename = "Duration (s)")]
    pub duration: f64,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Label")]
    pub label: String,
}

/// Provenance label attached to epochs that came from the encoder file.
pub const EPOCH_ENCODER_SOURCE: &str = "(from epoch encoder file)";

// An epoch row in either on-disk schema, reduced to (start, end, label).
struct RawEpochRow {
    row_number: usize, // 1-indexed file row, header = row 1
    start: Option<f64>,
    end: Option<f64>,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CanonicalEpochRow {
    #[serde(rename = "Start (s)")]
    start: Option<f64>,
    #[serde(rename = "End (s)")]
    end: Option<f64>,
    #[serde(rename = "Type")]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyEpochRow {
    time: Option<f64>,
    duration: Option<f64>,
    label: Option<String>,
}

/// Read an epoch encoder CSV, accepting both the canonical
/// `Start (s), End (s), Type` header and the legacy `time, duration, label`
/// header (legacy durations become end times).
fn read_epoch_rows(path: &Path) -> Result<Vec<RawEpochRow>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    let canonical = headers.iter().any(|h| h == "Start (s)");
    let legacy = headers.iter().any(|h| h == "time");
    if !canonical && !legacy {
        bail!(
            "unrecognized epoch encoder columns in {}: {:?}",
            path.display(),
            headers
        );
    }

    let mut rows = Vec::new();
    if canonical {
        for (idx, row) in reader.deserialize::<CanonicalEpochRow>().enumerate() {
            let row = row.with_context(|| format!("parsing row {} of {}", idx + 2, path.display()))?;
            rows.push(RawEpochRow {
                row_number: idx + 2,
                start: row.start,
                end: row.end,
                label: row.label,
            });
        }
    } else {
        for (idx, row) in reader.deserialize::<LegacyEpochRow>().enumerate() {
            let row = row.with_context(|| format!("parsing row {} of {}", idx + 2, path.display()))?;
            let end = match (row.time, row.duration) {
                (Some(time), Some(duration)) => Some(time + duration),
                _ => None,
            };
            rows.push(RawEpochRow {
                row_number: idx + 2,
                start: row.time,
                end,
                label: row.label,
            });
        }
    }
    Ok(rows)
}

fn sort_epochs(epochs: &mut [Epoch]) {
    epochs.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then(a.end.total_cmp(&b.end))
            .then(a.label.cmp(&b.label))
    });
}

/// The user-editable epoch encoder file. Loaded on open, rewritten wholesale
/// (sorted, microsecond-rounded, atomic replace) on every save.
#[derive(Debug)]
pub struct EpochEncoder {
    path: PathBuf,
    possible_labels: Vec<String>,
    epochs: Vec<Epoch>,
}

impl EpochEncoder {
    /// Open the store at `path`, loading existing intervals if the file
    /// exists and starting empty otherwise.
    pub fn open(path: impl Into<PathBuf>, possible_labels: Vec<String>) -> Result<Self> {
        let path = path.into();
        let epochs = if path.exists() {
            read_epoch_rows(&path)?
                .into_iter()
                .map(|row| match (row.start, row.end) {
                    (Some(start), Some(end)) => Ok(Epoch {
                        start,
                        end,
                        label: row.label.unwrap_or_default(),
                    }),
                    _ => bail!(
                        "row {} of {} is missing a start or end time",
                        row.row_number,
                        path.display()
                    ),
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            possible_labels,
            epochs,
        })
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn possible_labels(&self) -> &[String] {
        &self.possible_labels
    }

    pub fn push(&mut self, epoch: Epoch) {
        self.epochs.push(epoch);
    }

    /// Rewrite the whole file: times rounded to the nearest microsecond,
    /// rows sorted by (start, end, label), canonical header. The replacement
    /// is atomic; readers never observe a half-written file.
    pub fn save(&mut self) -> Result<()> {
        for epoch in &mut self.epochs {
            epoch.start = round_to_microseconds(epoch.start);
            epoch.end = round_to_microseconds(epoch.end);
        }
        sort_epochs(&mut self.epochs);

        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let temp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))
            .context("creating temporary epoch encoder file")?;
        {
            // write the header unconditionally so an empty store still
            // reloads; serialize would only emit it with the first row
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .from_writer(temp.as_file());
            writer.write_record(["Start (s)", "End (s)", "Type"])?;
            for epoch in &self.epochs {
                writer.serialize(epoch)?;
            }
            writer.flush()?;
        }
        temp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AnnotationRow {
    #[serde(rename = "Start (s)")]
    start: Option<f64>,
    #[serde(rename = "End (s)")]
    end: Option<f64>,
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(rename = "Label")]
    label: Option<String>,
}

fn sort_annotations(annotations: &mut [Annotation]) {
    annotations.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then(a.duration.total_cmp(&b.duration))
    });
}

/// Read the manually curated annotations CSV. Rows with missing or negative
/// start times are discarded with a warning, as are rows whose end precedes
/// their start; a missing end means zero duration. Result is sorted by
/// (start, duration).
pub fn read_annotations(path: &Path) -> Result<Vec<Annotation>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut annotations = Vec::new();
    for (idx, row) in reader.deserialize::<AnnotationRow>().enumerate() {
        let row_number = idx + 2;
        let row =
            row.with_context(|| format!("parsing row {} of {}", row_number, path.display()))?;
        let start = match row.start {
            Some(start) if start >= 0.0 => start,
            _ => {
                log::warn!(
                    "discarding row {} of {}: start time is missing or negative",
                    row_number,
                    path.display()
                );
                continue;
            }
        };
        let end = match row.end {
            Some(end) if end < start => {
                log::warn!(
                    "discarding row {} of {}: end time precedes start time",
                    row_number,
                    path.display()
                );
                continue;
            }
            Some(end) => end,
            None => start,
        };
        annotations.push(Annotation {
            start,
            end,
            duration: end - start,
            kind: row.kind.unwrap_or_else(|| "Other".into()),
            label: row.label.unwrap_or_default(),
        });
    }
    sort_annotations(&mut annotations);
    Ok(annotations)
}

/// Read the epoch encoder file as annotation rows, tagging each with a
/// provenance label so the origin survives merging. Rows with missing or
/// negative times or durations are discarded with a warning.
pub fn read_epoch_encoder_annotations(path: &Path) -> Result<Vec<Annotation>> {
    let mut annotations = Vec::new();
    for row in read_epoch_rows(path)? {
        let start = match row.start {
            Some(start) if start >= 0.0 => start,
            _ => {
                log::warn!(
                    "discarding row {} of {}: time is missing or negative",
                    row.row_number,
                    path.display()
                );
                continue;
            }
        };
        let end = match row.end {
            Some(end) if end >= start => end,
            _ => {
                log::warn!(
                    "discarding row {} of {}: duration is missing or negative",
                    row.row_number,
                    path.display()
                );
                continue;
            }
        };
        annotations.push(Annotation {
            start,
            end,
            duration: end - start,
            kind: row.label.unwrap_or_default(),
            label: EPOCH_ENCODER_SOURCE.into(),
        });
    }
    sort_annotations(&mut annotations);
    Ok(annotations)
}

/// Merge annotation streams into one timeline ordered by (start, duration).
/// The sort is stable, so rows that tie keep their stream order.
pub fn merge_annotations(streams: &[Vec<Annotation>]) -> Vec<Annotation> {
    let mut merged: Vec<Annotation> = streams.iter().flatten().cloned().collect();
    sort_annotations(&mut merged);
    merged
}
