//! Catalog resolution: turn a loosely structured YAML catalog of recording
//! sessions into records with defaulted fields, absolute local directories,
//! and full remote URLs.

use serde_yaml::{Mapping, Value};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Field names ending in this suffix are file references resolved against
/// `data_dir` and `remote_data_dir`.
pub const FILE_FIELD_SUFFIX: &str = "_file";

/// Reserved top-level catalog key carrying the shared remote root URL.
pub const REMOTE_ROOT_KEY: &str = "remote_data_root";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog file not found: {path}")]
    ConfigNotFound { path: PathBuf },
    #[error("failed to read catalog {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("catalog {path} must be a mapping of data set names to field mappings")]
    NotAMapping { path: PathBuf },
    #[error(
        "catalog {path} may be formatted incorrectly, especially beginning with entry \"{key}\""
    )]
    MalformedEntry { path: PathBuf, key: String },
    #[error("\"data_dir\" missing for \"{key}\"")]
    MissingDataDir { key: String },
    #[error("\"{field}\" for \"{key}\" must be a string")]
    FieldType { key: String, field: String },
    #[error("\"remote_data_root\" is not a full URL: \"{value}\"")]
    InvalidRemoteRoot { value: String },
    #[error("could not resolve the working directory")]
    WorkingDir(#[source] std::io::Error),
    #[error("\"{key}\" was not found in the catalog")]
    UnknownKey { key: String },
    #[error("no data set is selected")]
    NoSelection,
}

/// Returns true only if the candidate has the form `<scheme>://<netloc>` with
/// both parts non-empty. Malformed input yields false, never an error.
pub fn is_url(candidate: &str) -> bool {
    let Some((scheme, rest)) = candidate.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    let valid_scheme = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    };
    if !valid_scheme {
        return false;
    }
    let netloc = rest.split(['/', '?', '#']).next().unwrap_or("");
    !netloc.is_empty()
}

/// Lexically normalize a path: drop `.` components and collapse `..` against
/// the preceding component. Does not touch the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut out = if let Some(c @ Component::Prefix(..)) = components.peek().copied() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };
    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
        }
    }
    out
}

/// One data set's resolved field mapping. Field order follows the source
/// document, with defaulted fields appended.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSetRecord {
    fields: Mapping,
}

impl DataSetRecord {
    pub fn new(fields: Mapping) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(Value::from(field), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Insert `value` only if the field is absent, then return the stored
    /// value. A field explicitly set to null is considered present.
    pub fn set_default(&mut self, field: &str, value: Value) -> &Value {
        if !self.fields.contains_key(field) {
            self.fields.insert(Value::from(field), value);
        }
        self.fields.get(field).expect("field was just inserted")
    }

    fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// The local directory holding this data set's files. Always a string on
    /// records produced by `load_catalog`.
    pub fn data_dir(&self) -> Option<&str> {
        self.get_str("data_dir")
    }

    pub fn remote_data_dir(&self) -> Option<&str> {
        self.get_str("remote_data_dir")
    }

    pub fn description(&self) -> Option<&str> {
        self.get_str("description")
    }

    /// File-reference fields, in field order, including those set to null.
    pub fn file_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().filter_map(|(k, v)| {
            let name = k.as_str()?;
            name.ends_with(FILE_FIELD_SUFFIX).then_some((name, v))
        })
    }

    /// Join a file field with `data_dir` and normalize. Null fields resolve
    /// to None. Pure; does not touch the filesystem.
    pub fn abs_path(&self, field: &str) -> Option<PathBuf> {
        let relative = self.get_str(field)?;
        let dir = self.data_dir()?;
        Some(normalize_path(&Path::new(dir).join(relative)))
    }

    /// Join a file field with `remote_data_dir` using URL path segments.
    /// None if the field or `remote_data_dir` is null.
    pub fn abs_url(&self, field: &str) -> Option<String> {
        let relative = self.get_str(field)?;
        let remote = self.remote_data_dir()?;
        let segments = relative
            .replace(std::path::MAIN_SEPARATOR, "/")
            .replace('\\', "/");
        Some(format!("{}/{}", remote, segments))
    }

    pub fn fields(&self) -> &Mapping {
        &self.fields
    }
}

/// A resolved catalog: insertion-ordered data set records, rebuilt wholesale
/// on every load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    datasets: Vec<(String, DataSetRecord)>,
}

impl Catalog {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataSetRecord)> {
        self.datasets.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub fn get(&self, key: &str) -> Option<&DataSetRecord> {
        self.datasets.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut DataSetRecord> {
        self.datasets
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, r)| r)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.datasets.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

fn defaults_for_key(key: &str) -> Vec<(&'static str, Value)> {
    vec![
        ("key", Value::from(key)),
        ("description", Value::Null),
        ("data_dir", Value::Null),
        ("remote_data_dir", Value::Null),
        ("data_file", Value::Null),
        ("filters", Value::Null),
        ("annotations_file", Value::Null),
        ("epoch_encoder_file", Value::Null),
        (
            "epoch_encoder_possible_labels",
            Value::Sequence(vec![
                Value::from("Type 1"),
                Value::from("Type 2"),
                Value::from("Type 3"),
            ]),
        ),
        ("amplitude_discriminators", Value::Null),
        ("tridesclous_file", Value::Null),
        ("tridesclous_channels", Value::Null),
        ("tridesclous_merge", Value::Null),
        ("video_file", Value::Null),
        ("video_offset", Value::Null),
        ("video_jumps", Value::Null),
        ("video_rate_correction", Value::Null),
        ("plots", Value::Null),
        ("t_width", Value::from(40)),
    ]
}

// YAML rendering for error messages about values that have no string form
fn yaml_display(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| "<unrepresentable>".into())
}

fn key_to_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a YAML session catalog, fill in missing fields with defaults, and
/// resolve absolute paths for local data stores and full URLs for remote
/// data stores.
///
/// `local_data_root` defaults to the directory containing `file` and anchors
/// relative `data_dir` values. `remote_data_root` must be a full URL if
/// given; it takes precedence over the reserved `remote_data_root` entry in
/// the catalog itself. A malformed root embedded in the file is ignored with
/// a warning; a malformed root passed by the caller is an error.
///
/// Any failure aborts the whole load; no partial catalog is returned.
pub fn load_catalog(
    file: &Path,
    local_data_root: Option<&Path>,
    remote_data_root: Option<&str>,
) -> Result<Catalog, CatalogError> {
    if !file.exists() {
        return Err(CatalogError::ConfigNotFound {
            path: file.to_path_buf(),
        });
    }

    let text = std::fs::read_to_string(file).map_err(|source| CatalogError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let document: Value = serde_yaml::from_str(&text).map_err(|source| CatalogError::Parse {
        path: file.to_path_buf(),
        source,
    })?;
    let mut raw = match document {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => {
            return Err(CatalogError::NotAMapping {
                path: file.to_path_buf(),
            })
        }
    };

    // local_data_root defaults to the directory containing the catalog file
    let local_root = match local_data_root {
        Some(root) => root.to_path_buf(),
        None => file.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
    };
    let local_root = if local_root.is_absolute() {
        local_root
    } else {
        std::env::current_dir()
            .map_err(CatalogError::WorkingDir)?
            .join(local_root)
    };

    // the reserved remote_data_root entry is not a data set; strip it before
    // per-key processing
    let embedded_root = raw.remove(REMOTE_ROOT_KEY);
    let remote_root = resolve_remote_root(remote_data_root, embedded_root.as_ref())?;

    let mut datasets = Vec::with_capacity(raw.len());
    for (raw_key, raw_value) in raw {
        let key = key_to_string(&raw_key).ok_or_else(|| CatalogError::MalformedEntry {
            path: file.to_path_buf(),
            key: yaml_display(&raw_key),
        })?;

        // a bare key with no fields is a valid (if minimal) entry
        let fields = match raw_value {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m,
            _ => {
                return Err(CatalogError::MalformedEntry {
                    path: file.to_path_buf(),
                    key,
                })
            }
        };

        let mut record = DataSetRecord::new(fields);
        for (name, default) in defaults_for_key(&key) {
            record.set_default(name, default);
        }

        resolve_data_dir(&mut record, &key, &local_root)?;
        resolve_remote_data_dir(&mut record, &key, remote_root.as_deref())?;

        datasets.push((key, record));
    }

    Ok(Catalog { datasets })
}

fn resolve_remote_root(
    from_caller: Option<&str>,
    from_file: Option<&Value>,
) -> Result<Option<String>, CatalogError> {
    if let Some(root) = from_caller {
        if !is_url(root) {
            return Err(CatalogError::InvalidRemoteRoot {
                value: root.to_string(),
            });
        }
        return Ok(Some(root.to_string()));
    }
    match from_file {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_str() {
            Some(root) if is_url(root) => Ok(Some(root.to_string())),
            _ => {
                log::warn!(
                    "ignoring \"remote_data_root\" from catalog; not a full URL: {}",
                    yaml_display(value)
                );
                Ok(None)
            }
        },
    }
}

fn resolve_data_dir(
    record: &mut DataSetRecord,
    key: &str,
    local_root: &Path,
) -> Result<(), CatalogError> {
    let dir = match record.get("data_dir") {
        None | Some(Value::Null) => return Err(CatalogError::MissingDataDir { key: key.into() }),
        Some(Value::String(s)) => PathBuf::from(s),
        Some(_) => {
            return Err(CatalogError::FieldType {
                key: key.into(),
                field: "data_dir".into(),
            })
        }
    };
    let dir = if dir.is_absolute() {
        dir
    } else {
        local_root.join(dir)
    };
    let dir = normalize_path(&dir);
    record.set("data_dir", Value::from(dir.to_string_lossy().into_owned()));
    Ok(())
}

fn resolve_remote_data_dir(
    record: &mut DataSetRecord,
    key: &str,
    remote_root: Option<&str>,
) -> Result<(), CatalogError> {
    let resolved = match record.get("remote_data_dir") {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) => {
            if is_url(s) {
                Value::from(s.clone())
            } else if let Some(root) = remote_root {
                Value::from(format!("{}/{}", root, s))
            } else {
                // relative remote location without a remote root: no remote
                // store for this data set
                Value::Null
            }
        }
        Some(_) => {
            return Err(CatalogError::FieldType {
                key: key.into(),
                field: "remote_data_dir".into(),
            })
        }
    };
    record.set("remote_data_dir", resolved);
    Ok(())
}

/// Display labels for a data set selector: a file-presence marker (all
/// referenced files on disk, some, or none), a `!` when video sync risks
/// being wrong (video_file set without video_offset), then the key padded to
/// a common width and the description. Catalog order.
pub fn selector_labels(catalog: &Catalog) -> Vec<String> {
    let longest_key = catalog.keys().map(str::len).max().unwrap_or(0);
    catalog
        .iter()
        .map(|(key, record)| {
            let existing: Vec<bool> = record
                .file_fields()
                .filter(|(_, v)| !v.is_null())
                .map(|(name, _)| {
                    record
                        .abs_path(name)
                        .map(|p| p.exists())
                        .unwrap_or(false)
                })
                .collect();
            let presence = if existing.iter().all(|e| *e) {
                '\u{25c6}' // ◆
            } else if existing.iter().any(|e| *e) {
                '\u{2b16}' // ⬖
            } else {
                '\u{25c7}' // ◇
            };
            let video_warning = if record.get("video_file").map_or(false, |v| !v.is_null())
                && record.get("video_offset").map_or(true, Value::is_null)
            {
                '!'
            } else {
                ' '
            };
            format!(
                "{}{} {:<width$}{}",
                presence,
                video_warning,
                key,
                record.description().unwrap_or(""),
                width = longest_key + 4
            )
        })
        .collect()
}
