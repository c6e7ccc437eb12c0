//! Manifest error types with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// Manifest specific errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest's owning context does not match the active session.
    ///
    /// This is a caller/security bug, not an environmental condition: the
    /// operation must abort rather than degrade.
    #[error("Context mismatch: manifest belongs to '{owner}' but the active session is '{active}'")]
    ContextMismatch { owner: String, active: String },

    /// No per-session security token is available to key the signature
    #[error("Cannot sign or verify manifest without the user logging into the panel directly first")]
    NoCredential,

    /// The backing file exists but is not valid YAML
    #[error("Malformed manifest at {path}")]
    MalformedManifest {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// `create()` refused to overwrite an existing manifest
    #[error("Manifest already exists at {path}")]
    AlreadyExists { path: PathBuf },

    /// Failed to read the backing file
    #[error("Failed to read manifest from {path}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to persist the backing file
    #[error("Failed to write manifest to {path}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A freshly written signature did not verify against its own mapping
    #[error("Manifest failed self-assessment after signing")]
    SelfCheckFailed,

    /// The metadata could not be reduced to the canonical byte form the
    /// signature hash is computed over
    #[error("Failed to canonicalize manifest metadata for hashing")]
    Canonicalize {
        #[source]
        source: serde_json::Error,
    },
}

impl ManifestError {
    /// Log security-critical manifest errors
    pub fn log_if_security_critical(&self) {
        match self {
            ManifestError::ContextMismatch { .. } | ManifestError::SelfCheckFailed => {
                tracing::error!(target: "security", "MANIFEST VIOLATION: {}", self);
            }
            _ => {}
        }
    }
}
