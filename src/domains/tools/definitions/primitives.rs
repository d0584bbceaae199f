//! Primitive creation tools.
//!
//! Each tool adds one mesh primitive to the scene. Names are suggestions: the
//! engine may suffix them (`Cube.001`) when the name is already taken.

use crate::domains::tools::registry::ToolDescriptor;
use crate::domains::tools::schema::{ArgValue, ParamSpec, SemanticType};

fn name_param(default: &str) -> ParamSpec {
    ParamSpec::optional("name", SemanticType::String, "Name of the new object")
        .with_default(ArgValue::String(default.to_string()))
}

fn location_param() -> ParamSpec {
    ParamSpec::optional("location", SemanticType::Vector3, "World-space position [x, y, z]")
        .with_default(ArgValue::Vector3([0.0, 0.0, 0.0]))
}

/// Create cube tool.
pub struct CreateCubeTool;

impl CreateCubeTool {
    /// Tool name as registered in MCP.
    pub const NAME: &'static str = "create_cube";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str = "Create a cube mesh at the given location.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
            .param(name_param("Cube"))
            .param(location_param())
            .param(
                ParamSpec::optional("size", SemanticType::Number, "Edge length")
                    .with_default(ArgValue::Number(2.0)),
            )
    }
}

/// Create UV sphere tool.
pub struct CreateSphereTool;

impl CreateSphereTool {
    pub const NAME: &'static str = "create_sphere";

    pub const DESCRIPTION: &'static str = "Create a UV sphere mesh at the given location.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
            .param(name_param("Sphere"))
            .param(location_param())
            .param(
                ParamSpec::optional("radius", SemanticType::Number, "Sphere radius")
                    .with_default(ArgValue::Number(1.0)),
            )
            .param(
                ParamSpec::optional("segments", SemanticType::Integer, "Number of segments")
                    .with_default(ArgValue::Integer(32)),
            )
            .param(
                ParamSpec::optional("rings", SemanticType::Integer, "Number of rings")
                    .with_default(ArgValue::Integer(16)),
            )
    }
}

/// Create cylinder tool.
pub struct CreateCylinderTool;

impl CreateCylinderTool {
    pub const NAME: &'static str = "create_cylinder";

    pub const DESCRIPTION: &'static str = "Create a cylinder mesh at the given location.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
            .param(name_param("Cylinder"))
            .param(location_param())
            .param(
                ParamSpec::optional("radius", SemanticType::Number, "Cylinder radius")
                    .with_default(ArgValue::Number(1.0)),
            )
            .param(
                ParamSpec::optional("depth", SemanticType::Number, "Cylinder height")
                    .with_default(ArgValue::Number(2.0)),
            )
            .param(
                ParamSpec::optional("vertices", SemanticType::Integer, "Vertices on each cap")
                    .with_default(ArgValue::Integer(32)),
            )
    }
}

/// Create plane tool.
pub struct CreatePlaneTool;

impl CreatePlaneTool {
    pub const NAME: &'static str = "create_plane";

    pub const DESCRIPTION: &'static str = "Create a flat square plane at the given location.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
            .param(name_param("Plane"))
            .param(location_param())
            .param(
                ParamSpec::optional("size", SemanticType::Number, "Edge length")
                    .with_default(ArgValue::Number(2.0)),
            )
    }
}
