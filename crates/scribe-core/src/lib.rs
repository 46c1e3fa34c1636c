// Shared domain types for the scribe platform
//
// Key design decisions:
// - Payloads travel as serde_json::Value maps; only the `_workflow` envelope
//   and `envelope_id` passthrough are typed (handlers parse their own keys)
// - Content addressing via sha256 over raw bytes for file inputs and over a
//   canonical JSON rendering for structured inputs
// - Caller identity is opaque: an owner id string plus the verbatim token the
//   outer auth layer handed us; nothing here can decode either

pub mod envelope;
pub mod error;
pub mod hash;
pub mod identity;

pub use envelope::{WorkflowEnvelope, ENVELOPE_ID_KEY, WORKFLOW_KEY};
pub use error::{Error, Result};
pub use hash::{content_hash, value_hash};
pub use identity::Caller;

/// Mint an opaque, time-ordered id for dossiers and workflow runs.
///
/// Never derived from owner identity so ids leak nothing about the caller.
pub fn mint_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}
