//! Source loading: one URL, one attempt.
//!
//! A `SourceLoader` installs a single concrete source into the host and
//! reports success or failure. It carries no retry logic; the sequencer owns
//! ordering and the per-candidate timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

mod http;

pub use http::{HttpSourceLoader, InstalledAsset};

/// What kind of asset a source URL resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Script,
    Stylesheet,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Script => write!(f, "script"),
            AssetKind::Stylesheet => write!(f, "stylesheet"),
        }
    }
}

/// One concrete load handed to a `SourceLoader`.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Asset identifier (the fallback key). A successful later source for the
    /// same asset replaces an earlier failed install, so the host never ends
    /// up with duplicate registrations of one asset.
    pub asset: String,
    pub url: String,
    pub kind: AssetKind,
    /// Optional SRI integrity string (`sha256-<base64 digest>`).
    pub integrity: Option<String>,
}

/// Installs one source into the host environment.
#[async_trait]
pub trait SourceLoader: Send + Sync {
    /// Attempt to load one URL. Never errors: any failure resolves to
    /// `false`. Callers bound the wall clock with their own timeout.
    async fn load(&self, request: &LoadRequest) -> bool;
}
