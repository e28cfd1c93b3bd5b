//! Request classification.
//!
//! # Responsibilities
//! - Map the requested model identifier to a family and tier
//! - Detect request features the secondary provider cannot serve
//!
//! # Design Decisions
//! - Table-driven substring matching, case-insensitive, first match wins
//! - Unknown identifiers fail open to the primary tier
//! - Pure functions over the parsed body: no shared state, no locking

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Model family derived from the model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Flagship planning model. Always served by the primary provider.
    Opus,
    Sonnet,
    Haiku,
    /// Anything the family table does not recognise.
    Other,
}

impl ModelFamily {
    /// Families that appear in routing tables.
    pub const KNOWN: [ModelFamily; 3] = [ModelFamily::Opus, ModelFamily::Sonnet, ModelFamily::Haiku];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Opus => "opus",
            ModelFamily::Sonnet => "sonnet",
            ModelFamily::Haiku => "haiku",
            ModelFamily::Other => "other",
        }
    }

    /// Whether this family may ever be routed to the secondary provider.
    pub fn can_use_secondary(&self) -> bool {
        matches!(self, ModelFamily::Sonnet | ModelFamily::Haiku)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a family name that is not in the table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown model family '{0}'")]
pub struct UnknownFamily(pub String);

impl FromStr for ModelFamily {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opus" => Ok(ModelFamily::Opus),
            "sonnet" => Ok(ModelFamily::Sonnet),
            "haiku" => Ok(ModelFamily::Haiku),
            _ => Err(UnknownFamily(s.to_string())),
        }
    }
}

enum Pattern {
    Contains(&'static str),
    Prefix(&'static str),
}

impl Pattern {
    fn matches(&self, model: &str) -> bool {
        match self {
            Pattern::Contains(needle) => model.contains(needle),
            Pattern::Prefix(prefix) => model.starts_with(prefix),
        }
    }
}

/// Identifier patterns, checked in order against the lowercased model name.
const FAMILY_TABLE: &[(Pattern, ModelFamily)] = &[
    (Pattern::Contains("opus"), ModelFamily::Opus),
    (Pattern::Contains("sonnet"), ModelFamily::Sonnet),
    (Pattern::Contains("haiku"), ModelFamily::Haiku),
    // Clients configured with the secondary's own model name are worker tier.
    (Pattern::Prefix("glm"), ModelFamily::Sonnet),
];

/// Routing tier of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    Primary,
    SecondaryEligible,
}

/// Request features that force the primary provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub uses_web_search: bool,
    pub uses_vision: bool,
    pub forced_tool_choice: bool,
}

impl FeatureFlags {
    pub fn detect(payload: &Value) -> Self {
        Self {
            uses_web_search: has_web_search(payload),
            uses_vision: has_image_content(payload),
            forced_tool_choice: has_forced_tool_choice(payload),
        }
    }

    pub fn any(&self) -> bool {
        self.uses_web_search || self.uses_vision || self.forced_tool_choice
    }

    /// Name of the first feature present, for logs.
    pub fn first(&self) -> Option<&'static str> {
        if self.uses_web_search {
            Some("web_search")
        } else if self.uses_vision {
            Some("vision")
        } else if self.forced_tool_choice {
            Some("forced_tool_choice")
        } else {
            None
        }
    }
}

/// Classification of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Model identifier as sent by the client.
    pub model: String,
    pub family: ModelFamily,
    pub tier: ModelTier,
    pub features: FeatureFlags,
    /// Whether the client asked for a streamed response.
    pub stream: bool,
}

/// Request body could not be classified.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("request body is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("request body is not a JSON object")]
    NotAnObject,
}

/// Parse a raw request body.
pub fn parse_payload(body: &[u8]) -> Result<Value, ClassificationError> {
    Ok(serde_json::from_slice(body)?)
}

/// Table-driven classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Families routed to the secondary provider when it is available.
    secondary_families: Vec<ModelFamily>,
}

impl Classifier {
    /// Create a classifier. Families that can never use the secondary are dropped.
    pub fn new(secondary_families: impl IntoIterator<Item = ModelFamily>) -> Self {
        let mut families: Vec<ModelFamily> = secondary_families
            .into_iter()
            .filter(ModelFamily::can_use_secondary)
            .collect();
        families.sort();
        families.dedup();
        Self {
            secondary_families: families,
        }
    }

    /// Detect the family from a model identifier.
    pub fn family_of(model: &str) -> ModelFamily {
        let model = model.to_ascii_lowercase();
        FAMILY_TABLE
            .iter()
            .find(|(pattern, _)| pattern.matches(&model))
            .map(|(_, family)| *family)
            .unwrap_or(ModelFamily::Other)
    }

    pub fn tier_of(&self, family: ModelFamily) -> ModelTier {
        if self.secondary_families.contains(&family) {
            ModelTier::SecondaryEligible
        } else {
            ModelTier::Primary
        }
    }

    /// Classify a parsed request body.
    pub fn classify(&self, payload: &Value) -> Result<Classification, ClassificationError> {
        let object = payload.as_object().ok_or(ClassificationError::NotAnObject)?;
        let model = object
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let family = Self::family_of(&model);

        Ok(Classification {
            tier: self.tier_of(family),
            family,
            features: FeatureFlags::detect(payload),
            stream: object.get("stream").and_then(Value::as_bool).unwrap_or(false),
            model,
        })
    }
}

pub(crate) fn is_web_search_tool(tool: &Value) -> bool {
    tool.get("type")
        .and_then(Value::as_str)
        .map(|t| t.starts_with("web_search"))
        .unwrap_or(false)
}

fn has_web_search(payload: &Value) -> bool {
    payload
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| tools.iter().any(is_web_search_tool))
        .unwrap_or(false)
}

fn has_image_content(payload: &Value) -> bool {
    let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
        return false;
    };
    messages
        .iter()
        .filter_map(|msg| msg.get("content").and_then(Value::as_array))
        .flatten()
        .any(|block| {
            let block_type = block.get("type").and_then(Value::as_str).unwrap_or_default();
            if matches!(block_type, "image" | "image_url") {
                return true;
            }
            block
                .get("source")
                .and_then(|s| s.get("type"))
                .and_then(Value::as_str)
                .map(|t| matches!(t, "base64" | "url"))
                .unwrap_or(false)
        })
}

/// Anything other than an absent or `auto` tool choice forces a tool.
fn has_forced_tool_choice(payload: &Value) -> bool {
    let choice = match payload.get("tool_choice") {
        Some(Value::Object(choice)) => choice.get("type").and_then(Value::as_str).unwrap_or_default(),
        Some(Value::String(choice)) => choice.as_str(),
        _ => return false,
    };
    !matches!(choice, "auto" | "")
}
