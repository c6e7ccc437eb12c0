//! Metadata store - raw mapping persistence for the manifest
//!
//! Owns no semantics beyond serialization: reads and writes the YAML mapping
//! at `<app-root>/.webapp.yml`. A missing file is the *absent* condition and
//! is distinct from a parse failure.

use crate::error::ManifestError;
use crate::{Mapping, MANIFEST_FILE};
use serde_yaml_ng::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Detection predicate for the app classifier: an application is classified
/// as ad hoc iff its manifest file is present. Ignores signature validity.
pub fn manifest_file_exists(app_root: &Path) -> bool {
    app_root.join(MANIFEST_FILE).exists()
}

/// Reads and writes the raw metadata mapping for one application root.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(app_root: &Path) -> Self {
        MetadataStore {
            path: app_root.join(MANIFEST_FILE),
        }
    }

    /// Canonical path of the backing file.
    pub fn manifest_path(&self) -> &Path {
        &self.path
    }

    /// Backing file is present.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the mapping, or `None` when the backing file is absent.
    ///
    /// An empty document loads as an empty mapping. A document that is not a
    /// string-keyed mapping is malformed.
    pub fn load(&self) -> Result<Option<Mapping>, ManifestError> {
        if !self.exists() {
            return Ok(None);
        }

        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| ManifestError::ReadFailure {
                path: self.path.clone(),
                source: e,
            })?;

        let value: Value =
            serde_yaml_ng::from_str(&contents).map_err(|e| ManifestError::MalformedManifest {
                path: self.path.clone(),
                source: e,
            })?;

        let mapping = match value {
            Value::Null => Mapping::new(),
            other => {
                serde_yaml_ng::from_value(other).map_err(|e| ManifestError::MalformedManifest {
                    path: self.path.clone(),
                    source: e,
                })?
            }
        };

        debug!("Loaded manifest mapping from {}", self.path.display());
        Ok(Some(mapping))
    }

    /// Serialize and write the mapping, replacing any existing file.
    pub fn persist(&self, meta: &Mapping) -> Result<(), ManifestError> {
        let contents = serde_yaml_ng::to_string(meta).map_err(|e| ManifestError::WriteFailure {
            path: self.path.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
        self.write_raw(&contents)
    }

    /// Write raw document content to the backing path. Used by `create()` to
    /// seed the manifest from the platform template.
    pub fn write_raw(&self, contents: &str) -> Result<(), ManifestError> {
        let write_err = |e: std::io::Error| ManifestError::WriteFailure {
            path: self.path.clone(),
            source: e,
        };

        let dir = self.path.parent().ok_or_else(|| {
            write_err(std::io::Error::other("manifest path has no parent directory"))
        })?;

        // Temp file in the target directory, then rename over the manifest -
        // readers never observe a half-written file.
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!("Wrote manifest to {}", self.path.display());
        Ok(())
    }
}
