//! Stateful convenience layer over a resolved catalog: remembers the catalog
//! source and roots, reloads wholesale, and forwards field access to the
//! currently selected data set.

use crate::catalog::{load_catalog, Catalog, CatalogError, DataSetRecord};
use crate::download::{download_all_data_files, download_file, FileTransfer};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Holds a catalog and a single selected data set. Presentation layers
/// observe this through plain method calls; it carries no UI state.
#[derive(Debug)]
pub struct MetadataManager {
    file: PathBuf,
    local_data_root: Option<PathBuf>,
    remote_data_root: Option<String>,
    all_metadata: Option<Catalog>,
    selection: Option<String>,
}

impl MetadataManager {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            local_data_root: None,
            remote_data_root: None,
            all_metadata: None,
            selection: None,
        }
    }

    pub fn with_local_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_data_root = Some(root.into());
        self
    }

    pub fn with_remote_data_root(mut self, root: impl Into<String>) -> Self {
        self.remote_data_root = Some(root.into());
        self
    }

    /// Read the catalog file, replacing any previously loaded catalog
    /// wholesale. A selection that no longer exists in the new catalog is
    /// cleared; otherwise it is preserved.
    pub fn load(&mut self) -> Result<(), CatalogError> {
        let catalog = load_catalog(
            &self.file,
            self.local_data_root.as_deref(),
            self.remote_data_root.as_deref(),
        )?;
        if let Some(selection) = &self.selection {
            if !catalog.contains_key(selection) {
                self.selection = None;
            }
        }
        self.all_metadata = Some(catalog);
        Ok(())
    }

    /// Select a data set by key. Fails if no catalog is loaded or the key is
    /// not in it; the loaded catalog is unaffected either way.
    pub fn select(&mut self, key: &str) -> Result<(), CatalogError> {
        let known = self
            .all_metadata
            .as_ref()
            .map_or(false, |catalog| catalog.contains_key(key));
        if !known {
            return Err(CatalogError::UnknownKey { key: key.into() });
        }
        self.selection = Some(key.into());
        Ok(())
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.all_metadata.as_ref()
    }

    /// The currently selected data set's record.
    pub fn selected(&self) -> Result<&DataSetRecord, CatalogError> {
        let key = self.selection.as_deref().ok_or(CatalogError::NoSelection)?;
        self.all_metadata
            .as_ref()
            .and_then(|catalog| catalog.get(key))
            .ok_or(CatalogError::NoSelection)
    }

    fn selected_mut(&mut self) -> Result<&mut DataSetRecord, CatalogError> {
        let key = self.selection.clone().ok_or(CatalogError::NoSelection)?;
        self.all_metadata
            .as_mut()
            .and_then(|catalog| catalog.get_mut(&key))
            .ok_or(CatalogError::NoSelection)
    }

    pub fn get_field(&self, field: &str) -> Result<Option<&Value>, CatalogError> {
        Ok(self.selected()?.get(field))
    }

    pub fn set_field(&mut self, field: &str, value: Value) -> Result<(), CatalogError> {
        self.selected_mut()?.set(field, value);
        Ok(())
    }

    pub fn remove_field(&mut self, field: &str) -> Result<Option<Value>, CatalogError> {
        Ok(self.selected_mut()?.remove(field))
    }

    /// Insert `default` only if the field is absent on the selection, then
    /// return the stored value.
    pub fn with_default(&mut self, field: &str, default: Value) -> Result<Value, CatalogError> {
        Ok(self.selected_mut()?.set_default(field, default).clone())
    }

    pub fn abs_path(&self, field: &str) -> Result<Option<PathBuf>, CatalogError> {
        Ok(self.selected()?.abs_path(field))
    }

    pub fn abs_url(&self, field: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.selected()?.abs_url(field))
    }

    /// Download one file for the selection through the given transfer.
    pub fn download(&self, field: &str, transfer: &dyn FileTransfer) -> anyhow::Result<()> {
        download_file(self.selected()?, field, transfer)
    }

    /// Download every referenced file for the selection.
    pub fn download_all_data_files(&self, transfer: &dyn FileTransfer) -> anyhow::Result<()> {
        download_all_data_files(self.selected()?, transfer)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}
