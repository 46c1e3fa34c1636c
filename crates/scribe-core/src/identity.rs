// Opaque caller identity

use serde::{Deserialize, Serialize};

/// Identity of the caller as handed over by the external auth layer.
///
/// `owner_id` gates dossiers, uploads, and jobs; `original_token` rides along
/// in job payloads so downstream handlers can call external services on the
/// caller's behalf. Both are opaque strings here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub owner_id: String,

    /// Verbatim token from the transport layer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_token: Option<String>,
}

impl Caller {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            original_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.original_token = Some(token.into());
        self
    }

    /// Owner gate: error unless the caller owns the resource.
    pub fn check_owner(&self, resource_owner: &str) -> crate::Result<()> {
        if self.owner_id == resource_owner {
            Ok(())
        } else {
            Err(crate::Error::authorization("owner mismatch"))
        }
    }
}
