use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attribute carrying the change operation (`CREATE` / `UPDATE` / `DELETE`).
pub const OPERATION_ATTRIBUTE: &str = "operation";

/// Typed message attribute.
///
/// Attributes travel beside the body so routing and filtering can act on them
/// without deserializing the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttribute {
    pub data_type: String,
    pub value: String,
}

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: "String".to_string(),
            value: value.into(),
        }
    }
}

/// Unit of transport on the bus.
///
/// - `group_id`: messages sharing it keep their relative order
/// - `dedup_id`: the bus drops a second publish carrying the same id
/// - `body`: opaque string payload (JSON by convention)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dedup_id: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, MessageAttribute>,
    body: String,
}

impl BusMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::now_v7().to_string(),
            group_id: None,
            dedup_id: None,
            attributes: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Override the transport-assigned id (used when rehydrating from a stream).
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_ordering(mut self, group_id: impl Into<String>, dedup_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self.dedup_id = Some(dedup_id.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: MessageAttribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn dedup_id(&self) -> Option<&str> {
        self.dedup_id.as_deref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, MessageAttribute> {
        &self.attributes
    }

    /// Value of a named attribute, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|a| a.value.as_str())
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}
