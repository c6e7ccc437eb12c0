//! Session and application context binding
//!
//! The manifest never inspects credentials itself; it consumes two
//! capabilities from the hosting platform. [`AuthContext`] represents the
//! currently authenticated session and supplies the signing salt.
//! [`AppInstance`] represents the detected application the manifest is
//! attached to. Binding a manifest to an application whose owning context
//! differs from the active session is a fatal precondition failure.

use std::path::{Path, PathBuf};

/// The currently authenticated session.
pub trait AuthContext {
    /// Stable identifier for the authenticated principal.
    fn context_id(&self) -> &str;

    /// Per-session signing secret, or `None` when the user has not logged
    /// into the panel directly. Absence makes signing and verification fail;
    /// it is never substituted with a default salt.
    fn security_token(&self) -> Option<String>;
}

/// A detected application instance the manifest attaches to.
pub trait AppInstance {
    /// Filesystem root of the application; the manifest lives directly
    /// under it.
    fn app_root(&self) -> &Path;

    /// Identifier of the context that owns this application. Compared
    /// against [`AuthContext::context_id`] at bind time.
    fn owner_context_id(&self) -> &str;

    /// Platform-supplied template used to seed `create()`. `None` selects
    /// the bundled default.
    fn manifest_template(&self) -> Option<&str> {
        None
    }
}

/// Plain [`AppInstance`] for callers that hold the root and owner directly.
#[derive(Debug, Clone)]
pub struct AdhocApp {
    app_root: PathBuf,
    owner: String,
    template: Option<String>,
}

impl AdhocApp {
    pub fn new(app_root: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        AdhocApp {
            app_root: app_root.into(),
            owner: owner.into(),
            template: None,
        }
    }

    /// Replace the bundled `create()` template with platform-supplied content.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

impl AppInstance for AdhocApp {
    fn app_root(&self) -> &Path {
        &self.app_root
    }

    fn owner_context_id(&self) -> &str {
        &self.owner
    }

    fn manifest_template(&self) -> Option<&str> {
        self.template.as_deref()
    }
}
