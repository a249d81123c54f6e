//! Argument-completion message types (`completion/complete`).

use serde::{Deserialize, Serialize};

use super::RequestMeta;

/// `completion/complete` request params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRequest {
    /// What is being completed: a prompt argument or a resource template
    /// variable
    #[serde(rename = "ref")]
    pub reference: CompletionReference,

    /// The argument under completion
    pub argument: CompletionArgument,

    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

/// The target of a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompletionReference {
    /// Completing an argument of a prompt template
    #[serde(rename = "ref/prompt")]
    Prompt {
        /// Name of the prompt
        name: String,
    },

    /// Completing a variable of a resource URI template
    #[serde(rename = "ref/resource")]
    Resource {
        /// The URI template
        uri: String,
    },
}

/// The argument under completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionArgument {
    /// Argument name
    pub name: String,

    /// The partial value typed so far
    pub value: String,
}

/// `completion/complete` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteResult {
    /// The completion values
    pub completion: Completion,
}

/// Completion values and pagination hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// Candidate values, best first
    pub values: Vec<String>,

    /// Total number of candidates, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Whether more candidates exist beyond `values`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}
