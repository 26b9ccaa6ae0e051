//! Schema registry: static descriptions of every output shape the completion
//! service is asked to produce.
//!
//! A descriptor does double duty. It is rendered to JSON Schema and sent with
//! the completion request, and the normalizer walks the same tree to validate
//! and repair whatever comes back.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Which output contract a stage expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaKind {
    IngredientList,
    ActionableSummary,
    FilterConfirmationMap,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::IngredientList => "ingredientList",
            SchemaKind::ActionableSummary => "actionableSummary",
            SchemaKind::FilterConfirmationMap => "filterConfirmationMap",
        }
    }
}

/// One node of a schema tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    String,
    Boolean,
    /// The inner shape or JSON `null`.
    Nullable(Box<Shape>),
    Array(Box<Shape>),
    Object(ObjectShape),
    /// Pattern-keyed object: any key, every value shaped alike.
    Map(Box<Shape>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectShape {
    pub properties: Vec<Property>,
    pub additional_properties: bool,
    /// String property that must be unique across an array of these objects.
    pub identity: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: &'static str,
    pub shape: Shape,
    pub required: bool,
    pub description: &'static str,
}

impl Property {
    fn required(name: &'static str, shape: Shape, description: &'static str) -> Self {
        Self {
            name,
            shape,
            required: true,
            description,
        }
    }

    fn optional(name: &'static str, shape: Shape, description: &'static str) -> Self {
        Self {
            name,
            shape,
            required: false,
            description,
        }
    }
}

impl Shape {
    /// Containers default to empty when a required field is missing; scalars do not.
    pub fn empty_default(&self) -> Option<Value> {
        match self {
            Shape::Array(_) => Some(Value::Array(Vec::new())),
            Shape::Map(_) => Some(Value::Object(Map::new())),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Shape::String => "string",
            Shape::Boolean => "boolean",
            Shape::Nullable(inner) => inner.type_name(),
            Shape::Array(_) => "array",
            Shape::Object(_) | Shape::Map(_) => "object",
        }
    }

    fn to_json_schema(&self) -> Value {
        match self {
            Shape::String => json!({ "type": "string" }),
            Shape::Boolean => json!({ "type": "boolean" }),
            Shape::Nullable(inner) => json!({ "type": [inner.type_name(), "null"] }),
            Shape::Array(items) => json!({ "type": "array", "items": items.to_json_schema() }),
            Shape::Map(values) => json!({
                "type": "object",
                "additionalProperties": values.to_json_schema(),
            }),
            Shape::Object(object) => {
                let mut properties = Map::new();
                for property in &object.properties {
                    let mut schema = property.shape.to_json_schema();
                    if let Value::Object(fields) = &mut schema {
                        fields.insert(
                            "description".to_string(),
                            Value::String(property.description.to_string()),
                        );
                    }
                    properties.insert(property.name.to_string(), schema);
                }
                let required: Vec<&str> = object
                    .properties
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name)
                    .collect();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": object.additional_properties,
                })
            }
        }
    }
}

/// Full description of one expected output.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub kind: SchemaKind,
    pub root: Shape,
}

impl SchemaDescriptor {
    /// Renders the descriptor as a JSON Schema document for `response_format`.
    pub fn to_json_schema(&self) -> Value {
        self.root.to_json_schema()
    }
}

/// Returns the registered descriptor for `kind`.
pub fn describe(kind: SchemaKind) -> &'static SchemaDescriptor {
    static INGREDIENTS: OnceLock<SchemaDescriptor> = OnceLock::new();
    static SUMMARY: OnceLock<SchemaDescriptor> = OnceLock::new();
    static FILTERS: OnceLock<SchemaDescriptor> = OnceLock::new();

    match kind {
        SchemaKind::IngredientList => INGREDIENTS.get_or_init(ingredient_list),
        SchemaKind::ActionableSummary => SUMMARY.get_or_init(actionable_summary),
        SchemaKind::FilterConfirmationMap => FILTERS.get_or_init(filter_confirmation_map),
    }
}

fn ingredient_list() -> SchemaDescriptor {
    let item = ObjectShape {
        properties: vec![
            Property::required(
                "name",
                Shape::String,
                "The common name of the ingredient (e.g., 'Hyaluronic Acid').",
            ),
            Property::required(
                "function",
                Shape::String,
                "The primary function or role (concise, 1-2 sentences).",
            ),
            Property::optional(
                "clinicalStudies",
                Shape::String,
                "Summary of relevant clinical studies (2-3 key findings, or 'N/A' if none are readily available).",
            ),
            Property::optional(
                "marketTrendAnalysis",
                Shape::String,
                "Brief analysis of its current popularity on TikTok, Instagram and YouTube (1-2 sentences).",
            ),
        ],
        additional_properties: false,
        identity: Some("name"),
    };

    SchemaDescriptor {
        kind: SchemaKind::IngredientList,
        root: Shape::Array(Box::new(Shape::Object(item))),
    }
}

fn actionable_summary() -> SchemaDescriptor {
    let strings = || Shape::Array(Box::new(Shape::String));

    SchemaDescriptor {
        kind: SchemaKind::ActionableSummary,
        root: Shape::Object(ObjectShape {
            properties: vec![
                Property::required(
                    "sellingPoints",
                    strings(),
                    "Key selling points/benefits for marketing derived from the ingredients.",
                ),
                Property::required(
                    "cautions",
                    strings(),
                    "Critical cautions or considerations (safety, stability, usage) related to these ingredients.",
                ),
                Property::required(
                    "marketOpportunities",
                    strings(),
                    "Current market trends or application opportunities related to these ingredients.",
                ),
                Property::required(
                    "nextSteps",
                    strings(),
                    "Suggested next steps for product development.",
                ),
            ],
            additional_properties: false,
            identity: None,
        }),
    }
}

fn filter_confirmation_map() -> SchemaDescriptor {
    let verdict = ObjectShape {
        properties: vec![
            Property::required(
                "status",
                Shape::Nullable(Box::new(Shape::Boolean)),
                "true if every suggested ingredient satisfies the filter, false if at least one does not, null if it cannot be determined.",
            ),
            Property::required(
                "explanation",
                Shape::String,
                "One or two sentences justifying the status.",
            ),
        ],
        additional_properties: false,
        identity: None,
    };

    SchemaDescriptor {
        kind: SchemaKind::FilterConfirmationMap,
        root: Shape::Object(ObjectShape {
            properties: vec![Property::required(
                "appliedFilters",
                Shape::Map(Box::new(Shape::Object(verdict))),
                "One entry per requested filter, keyed by the filter name.",
            )],
            additional_properties: false,
            identity: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_returns_matching_kind() {
        for kind in [
            SchemaKind::IngredientList,
            SchemaKind::ActionableSummary,
            SchemaKind::FilterConfirmationMap,
        ] {
            assert_eq!(describe(kind).kind, kind);
        }
    }

    #[test]
    fn test_ingredient_schema_renders_required_and_closed_items() {
        let schema = describe(SchemaKind::IngredientList).to_json_schema();
        assert_eq!(schema["type"], "array");
        assert_eq!(schema["items"]["type"], "object");
        assert_eq!(schema["items"]["required"], json!(["name", "function"]));
        assert_eq!(schema["items"]["additionalProperties"], false);
        assert_eq!(
            schema["items"]["properties"]["clinicalStudies"]["type"],
            "string"
        );
    }

    #[test]
    fn test_summary_schema_lists_all_four_buckets() {
        let schema = describe(SchemaKind::ActionableSummary).to_json_schema();
        assert_eq!(
            schema["required"],
            json!(["sellingPoints", "cautions", "marketOpportunities", "nextSteps"])
        );
        assert_eq!(schema["properties"]["cautions"]["items"]["type"], "string");
    }

    #[test]
    fn test_filter_schema_is_pattern_keyed_with_nullable_status() {
        let schema = describe(SchemaKind::FilterConfirmationMap).to_json_schema();
        let map = &schema["properties"]["appliedFilters"];
        assert_eq!(map["type"], "object");
        assert_eq!(
            map["additionalProperties"]["properties"]["status"]["type"],
            json!(["boolean", "null"])
        );
    }

    #[test]
    fn test_empty_default_only_for_containers() {
        assert_eq!(
            Shape::Array(Box::new(Shape::String)).empty_default(),
            Some(json!([]))
        );
        assert_eq!(
            Shape::Map(Box::new(Shape::String)).empty_default(),
            Some(json!({}))
        );
        assert_eq!(Shape::String.empty_default(), None);
        assert_eq!(Shape::Boolean.empty_default(), None);
    }
}
