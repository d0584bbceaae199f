//! Tool Registry - central registration, lookup and validation for all tools.
//!
//! This module provides:
//! - The [`ToolDescriptor`] describing one remote-callable tool
//! - A registry of all available tools, immutable once the server starts
//! - Schema-driven argument validation producing [`NormalizedArguments`]
//! - Tool metadata for `tools/list`

use std::collections::HashMap;
use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::definitions;
use super::error::ToolError;
use super::schema::{NormalizedArguments, ParamSpec};

// ============================================================================
// Tool Descriptor
// ============================================================================

/// The worker-side operation a tool is executed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOperation(pub String);

impl WorkerOperation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Capability descriptor for a single tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique tool name as exposed to clients.
    pub name: String,

    /// Description shown to clients.
    pub description: String,

    /// Ordered parameter schema.
    pub params: Vec<ParamSpec>,

    /// Operation the worker runs for this tool.
    pub handler: WorkerOperation,
}

impl ToolDescriptor {
    /// Create a descriptor whose worker operation has the same name as the tool.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            handler: WorkerOperation(name.clone()),
            name,
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter to the schema.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Route this tool to a differently named worker operation.
    pub fn handled_by(mut self, operation: impl Into<String>) -> Self {
        self.handler = WorkerOperation(operation.into());
        self
    }

    /// Validate raw arguments against the schema.
    ///
    /// Missing optional parameters receive their defaults; a missing required
    /// parameter, an unknown argument name or a type mismatch is rejected.
    pub fn validate(&self, arguments: &Value) -> Result<NormalizedArguments, ToolError> {
        let empty = serde_json::Map::new();
        let provided = match arguments {
            Value::Null => &empty,
            Value::Object(obj) => obj,
            _ => {
                return Err(ToolError::invalid_arguments(
                    &self.name,
                    "arguments must be a JSON object",
                ));
            }
        };

        if let Some(unknown) = provided
            .keys()
            .find(|key| !self.params.iter().any(|p| &p.name == *key))
        {
            return Err(ToolError::invalid_arguments(
                &self.name,
                format!("unknown argument '{}'", unknown),
            ));
        }

        let mut normalized = NormalizedArguments::default();
        for spec in &self.params {
            match provided.get(&spec.name).filter(|v| !v.is_null()) {
                Some(raw) => {
                    let value = spec.semantic_type.coerce(raw).map_err(|reason| {
                        ToolError::invalid_arguments(
                            &self.name,
                            format!("argument '{}': {}", spec.name, reason),
                        )
                    })?;
                    normalized.push(spec.name.clone(), value);
                }
                None if spec.required => {
                    return Err(ToolError::invalid_arguments(
                        &self.name,
                        format!("missing required argument '{}'", spec.name),
                    ));
                }
                None => {
                    if let Some(default) = &spec.default {
                        normalized.push(spec.name.clone(), default.clone());
                    }
                }
            }
        }

        Ok(normalized)
    }

    /// JSON Schema of the tool input, as advertised in `tools/list`.
    pub fn input_schema(&self) -> JsonObject {
        let properties: serde_json::Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        let mut schema = JsonObject::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), json!(required));
        schema.insert("additionalProperties".into(), json!(false));
        schema
    }

    /// Create a Tool model for this tool (metadata).
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone().into(),
            description: Some(self.description.clone().into()),
            input_schema: Arc::new(self.input_schema()),
            annotations: None,
            output_schema: None,
            icons: None,
            meta: None,
            title: None,
        }
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Tool registry - manages all available tools.
///
/// Populated once at startup and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolDescriptor>>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the full scene tool catalog.
    pub fn with_scene_tools() -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for descriptor in definitions::all() {
            registry.register(descriptor)?;
        }
        debug!("Registered {} scene tools", registry.len());
        Ok(registry)
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(ToolError::duplicate(&descriptor.name));
        }
        self.order.push(descriptor.name.clone());
        self.tools
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Resolve a tool by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<ToolDescriptor>, ToolError> {
        self.tools.get(name).cloned().ok_or_else(|| {
            warn!("Unknown tool requested: {}", name);
            ToolError::not_found(name)
        })
    }

    /// Validate arguments for a resolved tool.
    pub fn validate(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Value,
    ) -> Result<NormalizedArguments, ToolError> {
        descriptor.validate(arguments)
    }

    /// Get all tool names in registration order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Get all tools as Tool models (metadata), in registration order.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|d| d.to_tool())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::super::schema::{ArgValue, SemanticType};
    use super::*;

    fn cube() -> ToolDescriptor {
        ToolDescriptor::new("create_cube", "Create a cube")
            .param(
                ParamSpec::optional("name", SemanticType::String, "Object name")
                    .with_default(ArgValue::String("Cube".into())),
            )
            .param(ParamSpec::required(
                "size",
                SemanticType::Number,
                "Edge length",
            ))
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(cube()).unwrap();
        let err = registry.register(cube()).unwrap_err();
        assert_eq!(err, ToolError::duplicate("create_cube"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.resolve("create_cone"),
            Err(ToolError::NotFound(name)) if name == "create_cone"
        ));
    }

    #[test]
    fn test_validate_applies_defaults() {
        let tool = cube();
        let args = tool.validate(&json!({ "size": "3" })).unwrap();
        assert_eq!(args.get("name"), Some(&ArgValue::String("Cube".into())));
        assert_eq!(args.get("size"), Some(&ArgValue::Number(3.0)));
    }

    #[test]
    fn test_validate_missing_required() {
        let err = cube().validate(&json!({ "name": "Box" })).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'size'"));
    }

    #[test]
    fn test_validate_rejects_unknown_and_non_objects() {
        let tool = cube();
        assert!(tool.validate(&json!({ "size": 1, "colour": "red" })).is_err());
        assert!(tool.validate(&json!([1, 2])).is_err());
        // Null means "no arguments"
        assert!(tool.validate(&Value::Null).is_err());
    }

    #[test]
    fn test_validate_type_mismatch() {
        let err = cube().validate(&json!({ "size": [1, 2] })).unwrap_err();
        assert!(err.to_string().contains("argument 'size'"));
    }

    #[test]
    fn test_input_schema_lists_required() {
        let schema = cube().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["size"]));
        assert_eq!(schema["properties"]["name"]["default"], "Cube");
    }

    #[test]
    fn test_scene_catalog_registers() {
        let registry = ToolRegistry::with_scene_tools().unwrap();
        let names = registry.tool_names();
        assert!(names.contains(&"create_cube"));
        assert!(names.contains(&"assign_material"));
        assert_eq!(registry.list_tools().len(), registry.len());
    }
}
