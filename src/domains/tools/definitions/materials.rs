//! Material tools.

use crate::domains::tools::registry::ToolDescriptor;
use crate::domains::tools::schema::{ArgValue, ParamSpec, SemanticType};

/// Create material tool.
pub struct CreateMaterialTool;

impl CreateMaterialTool {
    pub const NAME: &'static str = "create_material";

    pub const DESCRIPTION: &'static str =
        "Create (or update) a principled material with a base color.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
            .param(ParamSpec::required(
                "name",
                SemanticType::String,
                "Material name",
            ))
            .param(
                ParamSpec::optional("color", SemanticType::Color, "Base color, RGBA 0..1 or #hex")
                    .with_default(ArgValue::Color([0.8, 0.8, 0.8, 1.0])),
            )
            .param(
                ParamSpec::optional("metallic", SemanticType::Number, "Metallic factor 0..1")
                    .with_default(ArgValue::Number(0.0)),
            )
            .param(
                ParamSpec::optional("roughness", SemanticType::Number, "Roughness factor 0..1")
                    .with_default(ArgValue::Number(0.5)),
            )
    }
}

/// Assign material tool.
pub struct AssignMaterialTool;

impl AssignMaterialTool {
    pub const NAME: &'static str = "assign_material";

    pub const DESCRIPTION: &'static str = "Assign a material to an object. The material is created \
         with the given color if it does not exist yet.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
            .param(ParamSpec::required(
                "object_name",
                SemanticType::String,
                "Target object",
            ))
            .param(ParamSpec::required(
                "material_name",
                SemanticType::String,
                "Material to assign",
            ))
            .param(ParamSpec::optional(
                "color",
                SemanticType::Color,
                "Base color used when the material has to be created",
            ))
    }
}
