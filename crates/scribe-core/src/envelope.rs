// Workflow envelope embedded in job payloads
//
// The chain is heterogeneous across handlers, so payloads stay free-form
// JSON; only this sub-structure is typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved payload key holding the workflow envelope.
pub const WORKFLOW_KEY: &str = "_workflow";

/// Reserved payload key for the opaque correlation id copied verbatim from
/// parent to child payloads.
pub const ENVELOPE_ID_KEY: &str = "envelope_id";

/// Successor steps and run correlation for one workflow instance.
///
/// `run_id` is immutable once assigned; `chain` shrinks by one each time a
/// handler peels its head to spawn successors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEnvelope {
    /// Ordered successor job types, consumed head-first
    pub chain: Vec<String>,

    /// Opaque id shared by every job in one workflow instance
    pub run_id: String,
}

impl WorkflowEnvelope {
    /// Envelope for a root submission: full chain, freshly minted run id.
    pub fn root(chain: Vec<String>) -> Self {
        Self {
            chain,
            run_id: crate::mint_id(),
        }
    }

    /// Read the envelope out of a payload, if present.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload
            .get(WORKFLOW_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Peel the head of the chain.
    ///
    /// Returns the successor job type and the envelope the successor should
    /// carry (tail of the chain, same run id). `None` when the chain is
    /// empty, in which case the workflow terminates at this branch.
    pub fn peel(&self) -> Option<(String, WorkflowEnvelope)> {
        let (head, tail) = self.chain.split_first()?;
        Some((
            head.clone(),
            WorkflowEnvelope {
                chain: tail.to_vec(),
                run_id: self.run_id.clone(),
            },
        ))
    }

    /// Write the envelope into a payload under the reserved key.
    pub fn embed(&self, payload: &mut Value) {
        if let Value::Object(map) = payload {
            map.insert(
                WORKFLOW_KEY.to_string(),
                serde_json::to_value(self).unwrap_or(Value::Null),
            );
        }
    }
}

/// Copy opaque correlation fields from a parent payload into a child payload.
///
/// Currently only `envelope_id`; the value is carried verbatim.
pub fn carry_over(parent: &Value, child: &mut Value) {
    if let (Some(id), Value::Object(map)) = (parent.get(ENVELOPE_ID_KEY), child) {
        map.insert(ENVELOPE_ID_KEY.to_string(), id.clone());
    }
}
