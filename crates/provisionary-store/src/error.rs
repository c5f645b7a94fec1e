use thiserror::Error;

/// Top-level error type for the `provisionary-store` crate.
///
/// Covers every failure mode a backing store or service can report.
/// `provisionary-core` wraps these with the provisioning stage that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
    // ── Lookups ─────────────────────────────────────────────────────
    /// The addressed entity does not exist.
    #[error("{kind} not found: {identifier}")]
    NotFound { kind: &'static str, identifier: String },

    /// A create collided with an existing entity.
    #[error("{kind} already exists: {identifier}")]
    Conflict { kind: &'static str, identifier: String },

    // ── Policy ──────────────────────────────────────────────────────
    /// Quota for the given scope is exhausted.
    #[error("quota reached for {scope} in org {org_id}")]
    QuotaReached { scope: String, org_id: i64 },

    // ── Secrets ─────────────────────────────────────────────────────
    /// Ciphertext could not be decoded or decrypted.
    #[error("secret decryption failed: {0}")]
    Secret(String),

    // ── Backend ─────────────────────────────────────────────────────
    /// The backend is temporarily unable to serve writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// State file could not be read or written.
    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State file contents could not be (de)serialized.
    #[error("state file is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}
