//! Ad hoc web application manifest - tamper-evident metadata with gated access
//!
//! An "ad hoc" application is one the platform's classifier does not recognize;
//! it is identified solely by the presence of a manifest file under its
//! application root. The manifest stores trust-sensitive configuration and is
//! sealed with a keyed integrity hash so that any out-of-band edit is
//! detectable before the stored fields are trusted.
//!
//! Design principles:
//! - The signature is the sole source of integrity - no field is exposed
//!   through gated access until the signature verifies
//! - Lazy, cached verification - checked at most once per manifest instance,
//!   on the first field read
//! - Explicit sealing - mutations never persist themselves; only `sign()`
//!   writes the backing file
//! - Industry standard crypto - PBKDF2-HMAC-SHA512 keyed by a per-session
//!   secret from the authenticated session

pub mod context;
pub mod error;
pub mod manifest;
pub mod signature;
pub mod store;

pub use context::{AdhocApp, AppInstance, AuthContext};
pub use error::ManifestError;
pub use manifest::{Manifest, SignedState};
pub use store::{manifest_file_exists, MetadataStore};

/// Manifest file name, relative to the application root.
pub const MANIFEST_FILE: &str = ".webapp.yml";

/// Manifest format release, written by `sign()` under [`VERSION_KEY`].
pub const MANIFEST_RELEASE: &str = "1.0";

/// Reserved key holding the keyed hash over every other field.
pub const SIGNING_KEY: &str = "signature";

/// Reserved key holding the manifest format release.
pub const VERSION_KEY: &str = "manifest_version";

/// The metadata mapping backing a manifest.
///
/// A `BTreeMap` keeps keys in ascending order, which doubles as the canonical
/// serialization order for the signature hash - insertion order never leaks
/// into the digest.
pub type Mapping = std::collections::BTreeMap<String, serde_yaml_ng::Value>;
