//! Target entity store shapes: rows, action types, and mutate requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which extension fields travel in a mutate payload.
pub const CUSTOM_DATA_KEY: &str = "customData";

/// Opaque target entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Current persisted state of one target entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub entity_type: String,
    pub entity_id: EntityId,
    /// Optimistic-lock version. Starts at 1, bumped by every update.
    pub version: u64,
    #[serde(default)]
    pub core: Map<String, Value>,
    #[serde(default)]
    pub custom: Map<String, Value>,
}

impl EntityRow {
    /// Split a mutate payload into core fields and `customData` fields.
    ///
    /// A non-object `customData` value is kept as a core field.
    #[must_use]
    pub fn split_payload(mut input: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
        let custom = match input.remove(CUSTOM_DATA_KEY) {
            Some(Value::Object(custom)) => custom,
            Some(other) => {
                input.insert(CUSTOM_DATA_KEY.to_string(), other);
                Map::new()
            }
            None => Map::new(),
        };
        (input, custom)
    }

    /// Look up a field, core first, then extension fields.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.core.get(name).or_else(|| self.custom.get(name))
    }
}

/// Mutation verb in an `<entityType>.<verb>` action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionVerb {
    Create,
    Update,
    Delete,
}

impl ActionVerb {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Fully qualified action, rendered as `<entityType>.<verb>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionType {
    pub entity_type: String,
    pub verb: ActionVerb,
}

impl ActionType {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, verb: ActionVerb) -> Self {
        Self {
            entity_type: entity_type.into(),
            verb,
        }
    }

    /// Parse `customer.update` style action types. The entity type may itself
    /// contain dots; the verb is whatever follows the last one.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (entity_type, verb) = value.rsplit_once('.')?;
        if entity_type.is_empty() {
            return None;
        }
        Some(Self::new(entity_type, ActionVerb::parse(verb)?))
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity_type, self.verb.as_str())
    }
}

impl Serialize for ActionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid action type '{raw}'")))
    }
}

/// Versioned write request against the target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutateRequest {
    pub action_type: ActionType,
    pub entity_type: String,
    /// Required for update and delete. Optional for create, where the store
    /// assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub input: Map<String, Value>,
    /// Version the caller last observed. Required for update and delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

impl MutateRequest {
    #[must_use]
    pub fn create(entity_type: &str, input: Map<String, Value>) -> Self {
        Self {
            action_type: ActionType::new(entity_type, ActionVerb::Create),
            entity_type: entity_type.to_string(),
            entity_id: None,
            input,
            expected_version: None,
        }
    }

    #[must_use]
    pub fn update(
        entity_type: &str,
        entity_id: EntityId,
        input: Map<String, Value>,
        expected_version: u64,
    ) -> Self {
        Self {
            action_type: ActionType::new(entity_type, ActionVerb::Update),
            entity_type: entity_type.to_string(),
            entity_id: Some(entity_id),
            input,
            expected_version: Some(expected_version),
        }
    }

    #[must_use]
    pub fn delete(entity_type: &str, entity_id: EntityId, expected_version: u64) -> Self {
        Self {
            action_type: ActionType::new(entity_type, ActionVerb::Delete),
            entity_type: entity_type.to_string(),
            entity_id: Some(entity_id),
            input: Map::new(),
            expected_version: Some(expected_version),
        }
    }

    #[must_use]
    pub fn verb(&self) -> ActionVerb {
        self.action_type.verb
    }
}
