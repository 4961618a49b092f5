//! Options controlling how a stream is normalized.

use serde::{Deserialize, Serialize};

use crate::context::MergePolicy;

/// What to do with a complete message whose payload cannot be classified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Abort the stream with the classification error.
    #[default]
    Abort,
    /// Log the error and continue with the next message.
    Skip,
}

/// Per-stream normalization options.
///
/// # Example
/// ```rust
/// use unai_stream::context::MergePolicy;
/// use unai_stream::options::{MalformedPolicy, StreamOptions};
///
/// let options = StreamOptions::new()
///     .with_on_malformed(MalformedPolicy::Skip)
///     .with_merge_policy(MergePolicy::ReplaceSameRole);
/// assert_eq!(options.on_malformed, MalformedPolicy::Skip);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamOptions {
    /// Handling of malformed messages inside complete frames
    #[serde(default)]
    pub on_malformed: MalformedPolicy,

    /// Override of the provider's merge policy for this stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_policy: Option<MergePolicy>,
}

impl StreamOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the malformed message policy.
    pub fn with_on_malformed(mut self, policy: MalformedPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    /// Override the provider's merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = Some(policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StreamOptions::default();
        assert_eq!(options.on_malformed, MalformedPolicy::Abort);
        assert!(options.merge_policy.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let options: StreamOptions = serde_json::from_str(r#"{"on_malformed":"skip"}"#).unwrap();
        assert_eq!(options.on_malformed, MalformedPolicy::Skip);
        assert!(options.merge_policy.is_none());

        let options: StreamOptions =
            serde_json::from_str(r#"{"merge_policy":"replace_same_role"}"#).unwrap();
        assert_eq!(options.merge_policy, Some(MergePolicy::ReplaceSameRole));
    }
}
