//! Manifest orchestration - lifecycle, sealing, and gated field access
//!
//! A [`Manifest`] is bound to one application root for the lifetime of a
//! request. Field reads are gated: the first `get()` lazily verifies the
//! stored signature and caches the outcome, and an invalid manifest exposes
//! nothing. Mutations are in-memory only; `sign()` is the single path that
//! persists.

use crate::context::{AppInstance, AuthContext};
use crate::error::ManifestError;
use crate::signature;
use crate::store::MetadataStore;
use crate::Mapping;
use serde_yaml_ng::Value;
use std::cell::Cell;
use std::path::Path;
use tracing::{debug, error, info};

/// Bundled default template for `create()`. The hosting platform can
/// substitute its own via [`AppInstance::manifest_template`].
const DEFAULT_TEMPLATE: &str = include_str!("../resources/webapp-adhoc.yml");

/// Signature verification state, cached per manifest instance.
///
/// Transitions `Unchecked -> {Valid, Invalid}` at most once, on the first
/// gated read. Re-signing is the only other way the state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedState {
    /// Not yet checked
    Unchecked,
    /// Stored signature matched the recomputed hash
    Valid,
    /// Stored signature missing or mismatched, or the file was malformed
    Invalid,
}

/// The signed metadata record for one ad hoc application instance.
pub struct Manifest<'ctx> {
    meta: Mapping,
    signed: Cell<SignedState>,
    store: MetadataStore,
    template: Option<String>,
    ctx: &'ctx dyn AuthContext,
}

impl std::fmt::Debug for Manifest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manifest")
            .field("meta", &self.meta)
            .field("signed", &self.signed)
            .field("store", &self.store)
            .field("template", &self.template)
            .field("ctx", &self.ctx.context_id())
            .finish()
    }
}

impl<'ctx> Manifest<'ctx> {
    /// Bind a manifest to an application under the active session.
    ///
    /// Fails with [`ManifestError::ContextMismatch`] when the application's
    /// owning context is not the session context - a precondition violation,
    /// not a recoverable condition. A malformed backing file degrades
    /// instead: the mapping stays empty, the cached state is `Invalid`, and
    /// the parse failure is logged.
    pub fn bind(
        app: &dyn AppInstance,
        ctx: &'ctx dyn AuthContext,
    ) -> Result<Self, ManifestError> {
        if app.owner_context_id() != ctx.context_id() {
            let err = ManifestError::ContextMismatch {
                owner: app.owner_context_id().to_string(),
                active: ctx.context_id().to_string(),
            };
            err.log_if_security_critical();
            return Err(err);
        }

        let store = MetadataStore::new(app.app_root());
        let (meta, signed) = match store.load() {
            Ok(Some(meta)) => (meta, SignedState::Unchecked),
            Ok(None) => (Mapping::new(), SignedState::Unchecked),
            Err(parse @ ManifestError::MalformedManifest { .. }) => {
                error!("{parse}");
                (Mapping::new(), SignedState::Invalid)
            }
            Err(other) => return Err(other),
        };

        Ok(Manifest {
            meta,
            signed: Cell::new(signed),
            store,
            template: app.manifest_template().map(str::to_string),
            ctx,
        })
    }

    /// Backing file is present, irrespective of signature validity.
    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    /// Canonical path of the backing file.
    pub fn manifest_path(&self) -> &Path {
        self.store.manifest_path()
    }

    /// Seal the manifest: stamp the format release, compute the keyed hash,
    /// persist, and self-verify the just-written signature.
    ///
    /// Fails with [`ManifestError::NoCredential`] when the session has no
    /// security token. A failed self-check reports the signing as failed
    /// even though a file was written.
    pub fn sign(&mut self) -> Result<(), ManifestError> {
        let salt = self.salt()?;

        signature::sign(&mut self.meta, &salt)?;
        self.store.persist(&self.meta)?;

        if !signature::verify(&self.meta, &salt, None)? {
            let err = ManifestError::SelfCheckFailed;
            err.log_if_security_critical();
            return Err(err);
        }

        info!("Sealed manifest at {}", self.manifest_path().display());
        self.signed.set(SignedState::Valid);
        Ok(())
    }

    /// Explicitly re-verify the stored signature (or `expected`, when given)
    /// against the current mapping. Does not consult or update the cached
    /// state; the lazy gate stays as it was.
    pub fn verify_signature(&self, expected: Option<&str>) -> Result<bool, ManifestError> {
        let salt = self.salt()?;
        signature::verify(&self.meta, &salt, expected)
    }

    /// Seed a new manifest from the template and seal it.
    ///
    /// Fails with [`ManifestError::AlreadyExists`] when the backing file is
    /// present; the existing file is left untouched. A freshly created
    /// manifest is always signed.
    pub fn create(&mut self) -> Result<(), ManifestError> {
        if self.exists() {
            return Err(ManifestError::AlreadyExists {
                path: self.manifest_path().to_path_buf(),
            });
        }

        let template = self.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        self.store.write_raw(template)?;
        self.meta = self.store.load()?.unwrap_or_default();
        self.signed.set(SignedState::Unchecked);

        info!("Created manifest at {}", self.manifest_path().display());
        self.sign()
    }

    /// Gated field read.
    ///
    /// The first call transitions the cached state via signature
    /// verification; an invalid manifest returns `None` for every key,
    /// including keys present in the raw mapping. A missing credential
    /// during the lazy check degrades to `Invalid`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if self.signed.get() == SignedState::Unchecked {
            let state = match self.verify_signature(None) {
                Ok(true) => SignedState::Valid,
                Ok(false) => SignedState::Invalid,
                Err(e) => {
                    error!("Manifest verification failed: {e}");
                    SignedState::Invalid
                }
            };
            debug!(
                "Lazy signature check for {}: {state:?}",
                self.manifest_path().display()
            );
            self.signed.set(state);
        }

        match self.signed.get() {
            SignedState::Valid => self.meta.get(key),
            _ => None,
        }
    }

    /// Raw membership test. Deliberately not gated by signature validity,
    /// unlike [`get`](Self::get).
    pub fn has(&self, key: &str) -> bool {
        self.meta.contains_key(key)
    }

    /// In-memory field write. Does not persist and does not touch the
    /// cached signature state - a prior `Valid` determination stands until
    /// the manifest is re-signed or re-verified explicitly.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.meta.insert(key.into(), value.into());
    }

    /// In-memory field removal; same non-persistence rule as `set`.
    pub fn unset(&mut self, key: &str) -> Option<Value> {
        self.meta.remove(key)
    }

    /// Mapping carries a `signature` entry (says nothing about validity).
    pub fn has_signature(&self) -> bool {
        self.meta.contains_key(crate::SIGNING_KEY)
    }

    /// Cached verification state.
    pub fn signed_state(&self) -> SignedState {
        self.signed.get()
    }

    /// The full raw mapping, signed or not, bypassing the gate. For
    /// serialization and export, never for trust decisions.
    pub fn to_snapshot(&self) -> Mapping {
        self.meta.clone()
    }

    fn salt(&self) -> Result<String, ManifestError> {
        self.ctx
            .security_token()
            .filter(|token| !token.is_empty())
            .ok_or(ManifestError::NoCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AdhocApp;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Session {
        id: String,
        token: Option<String>,
    }

    impl Session {
        fn with_token(id: &str, token: &str) -> Self {
            Session {
                id: id.into(),
                token: Some(token.into()),
            }
        }

        fn without_token(id: &str) -> Self {
            Session {
                id: id.into(),
                token: None,
            }
        }
    }

    impl AuthContext for Session {
        fn context_id(&self) -> &str {
            &self.id
        }

        fn security_token(&self) -> Option<String> {
            self.token.clone()
        }
    }

    fn app(root: &TempDir) -> AdhocApp {
        AdhocApp::new(root.path(), "site1")
    }

    #[test]
    fn bind_refuses_context_mismatch() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site2", "s1");

        let err = Manifest::bind(&app(&root), &session).unwrap_err();
        assert!(matches!(err, ManifestError::ContextMismatch { .. }));
    }

    #[test]
    fn create_seeds_and_signs() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        assert!(!manifest.exists());
        manifest.create().unwrap();

        assert!(manifest.exists());
        assert!(manifest.has_signature());
        assert!(manifest.verify_signature(None).unwrap());
    }

    #[test]
    fn create_refuses_existing_manifest() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        manifest.create().unwrap();
        let before = std::fs::read_to_string(manifest.manifest_path()).unwrap();

        let err = manifest.create().unwrap_err();
        assert!(matches!(err, ManifestError::AlreadyExists { .. }));

        let after = std::fs::read_to_string(manifest.manifest_path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn sign_without_token_is_no_credential() {
        let root = TempDir::new().unwrap();
        let session = Session::without_token("site1");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        let err = manifest.sign().unwrap_err();
        assert!(matches!(err, ManifestError::NoCredential));
        assert!(!manifest.exists());
    }

    #[test]
    fn empty_token_is_no_credential() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        assert!(matches!(
            manifest.sign().unwrap_err(),
            ManifestError::NoCredential
        ));
    }

    #[test]
    fn unsigned_data_is_gated() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");
        MetadataStore::new(root.path())
            .write_raw("owner: alice\ndocroot: public/\n")
            .unwrap();

        let manifest = Manifest::bind(&app(&root), &session).unwrap();
        assert!(manifest.get("owner").is_none());
        assert!(manifest.get("docroot").is_none());
        assert_eq!(manifest.signed_state(), SignedState::Invalid);
    }

    #[test]
    fn signed_fields_are_readable() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        manifest.set("owner", "alice");
        manifest.sign().unwrap();

        let reloaded = Manifest::bind(&app(&root), &session).unwrap();
        assert_eq!(reloaded.get("owner").and_then(Value::as_str), Some("alice"));
        assert_eq!(reloaded.signed_state(), SignedState::Valid);
    }

    #[test]
    fn tampered_file_exposes_nothing() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        manifest.set("owner", "alice");
        manifest.sign().unwrap();

        // Out-of-band edit after sealing
        let path = root.path().join(crate::MANIFEST_FILE);
        let doctored = std::fs::read_to_string(&path)
            .unwrap()
            .replace("alice", "mallory");
        std::fs::write(&path, doctored).unwrap();

        let reloaded = Manifest::bind(&app(&root), &session).unwrap();
        assert!(reloaded.get("owner").is_none());
        assert_eq!(reloaded.signed_state(), SignedState::Invalid);
    }

    #[test]
    fn wrong_session_salt_fails_verification() {
        let root = TempDir::new().unwrap();
        let signer = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &signer).unwrap();
        manifest.set("owner", "alice");
        manifest.sign().unwrap();

        let other = Session::with_token("site1", "s2");
        let reloaded = Manifest::bind(&app(&root), &other).unwrap();
        assert!(!reloaded.verify_signature(None).unwrap());
        assert!(reloaded.get("owner").is_none());
    }

    #[test]
    fn valid_determination_survives_later_mutation() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        manifest.set("owner", "alice");
        manifest.sign().unwrap();

        let mut reloaded = Manifest::bind(&app(&root), &session).unwrap();
        assert_eq!(
            reloaded.get("owner").and_then(Value::as_str),
            Some("alice")
        );

        // Breaks the signature, but the cached Valid state stands
        reloaded.set("owner", "mallory");
        assert_eq!(
            reloaded.get("owner").and_then(Value::as_str),
            Some("mallory")
        );
        assert_eq!(reloaded.signed_state(), SignedState::Valid);
        assert!(!reloaded.verify_signature(None).unwrap());
    }

    #[test]
    fn has_is_not_gated() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");
        MetadataStore::new(root.path())
            .write_raw("owner: alice\n")
            .unwrap();

        let manifest = Manifest::bind(&app(&root), &session).unwrap();
        assert!(manifest.has("owner"));
        assert!(manifest.get("owner").is_none());
    }

    #[test]
    fn malformed_file_degrades_to_invalid() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");
        MetadataStore::new(root.path())
            .write_raw("owner: [unclosed\n")
            .unwrap();

        let manifest = Manifest::bind(&app(&root), &session).unwrap();
        assert_eq!(manifest.signed_state(), SignedState::Invalid);
        assert!(manifest.get("owner").is_none());
        assert!(manifest.to_snapshot().is_empty());
    }

    #[test]
    fn missing_token_degrades_lazy_check_to_invalid() {
        let root = TempDir::new().unwrap();
        let signer = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &signer).unwrap();
        manifest.set("owner", "alice");
        manifest.sign().unwrap();

        let anonymous = Session::without_token("site1");
        let reloaded = Manifest::bind(&app(&root), &anonymous).unwrap();
        assert!(reloaded.get("owner").is_none());
        assert_eq!(reloaded.signed_state(), SignedState::Invalid);
    }

    #[test]
    fn snapshot_bypasses_the_gate() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");
        MetadataStore::new(root.path())
            .write_raw("owner: alice\n")
            .unwrap();

        let manifest = Manifest::bind(&app(&root), &session).unwrap();
        assert!(manifest.get("owner").is_none());
        assert_eq!(
            manifest.to_snapshot().get("owner").and_then(Value::as_str),
            Some("alice")
        );
    }

    #[test]
    fn unset_removes_in_memory_only() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");

        let mut manifest = Manifest::bind(&app(&root), &session).unwrap();
        manifest.set("owner", "alice");
        manifest.sign().unwrap();

        assert!(manifest.unset("owner").is_some());
        assert!(!manifest.has("owner"));

        // Backing file untouched until the next sign()
        let reloaded = Manifest::bind(&app(&root), &session).unwrap();
        assert!(reloaded.has("owner"));
    }

    #[test]
    fn custom_template_seeds_create() {
        let root = TempDir::new().unwrap();
        let session = Session::with_token("site1", "s1");
        let custom = AdhocApp::new(root.path(), "site1").with_template("stack: php\n");

        let mut manifest = Manifest::bind(&custom, &session).unwrap();
        manifest.create().unwrap();

        assert_eq!(manifest.get("stack").and_then(Value::as_str), Some("php"));
    }
}
