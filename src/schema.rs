//! Structured-output schema nodes for the text-generation service.

use serde::Serialize;
use std::collections::BTreeMap;

/// Node type of a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    /// JSON object with named properties.
    Object,
    /// JSON array of a single item schema.
    Array,
    /// JSON string.
    String,
}

/// A JSON-schema-like description of the expected response shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Node type.
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    /// Guidance for the model about this field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Object properties by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    /// Element schema of an array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    /// Names of properties that must be present.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Schema {
    fn node(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            description: None,
            properties: BTreeMap::new(),
            items: None,
            required: Vec::new(),
        }
    }

    /// A string node.
    pub fn string() -> Self {
        Self::node(SchemaType::String)
    }

    /// An object node with no properties yet.
    pub fn object() -> Self {
        Self::node(SchemaType::Object)
    }

    /// An array node whose elements match `items`.
    pub fn array(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::node(SchemaType::Array)
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a required property.
    pub fn with_required(mut self, name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Adds an optional property.
    pub fn with_property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_serialization() {
        let schema = Schema::object()
            .with_required("english", Schema::string().with_description("English"))
            .with_property("note", Schema::string());
        let value = serde_json::to_value(&schema).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "OBJECT",
                "properties": {
                    "english": {"type": "STRING", "description": "English"},
                    "note": {"type": "STRING"}
                },
                "required": ["english"]
            })
        );
    }

    #[test]
    fn test_array_schema() {
        let schema = Schema::array(Schema::string()).with_description("list");
        let value = serde_json::to_value(&schema).unwrap();

        assert_eq!(value["type"], "ARRAY");
        assert_eq!(value["items"]["type"], "STRING");
        assert!(value.get("properties").is_none());
        assert!(value.get("required").is_none());
    }
}
