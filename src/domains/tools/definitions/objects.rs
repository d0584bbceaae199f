//! Object management and scene query tools.

use crate::domains::tools::registry::ToolDescriptor;
use crate::domains::tools::schema::{ParamSpec, SemanticType};

fn object_name() -> ParamSpec {
    ParamSpec::required("name", SemanticType::String, "Name of an existing object")
}

pub struct MoveObjectTool;

impl MoveObjectTool {
    pub const NAME: &'static str = "move_object";

    pub const DESCRIPTION: &'static str = "Move an object to a new world-space location.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
            .param(object_name())
            .param(ParamSpec::required(
                "location",
                SemanticType::Vector3,
                "New position [x, y, z]",
            ))
    }
}

pub struct DeleteObjectTool;

impl DeleteObjectTool {
    pub const NAME: &'static str = "delete_object";

    pub const DESCRIPTION: &'static str = "Delete an object from the scene.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION).param(object_name())
    }
}

pub struct ListObjectsTool;

impl ListObjectsTool {
    pub const NAME: &'static str = "list_objects";

    pub const DESCRIPTION: &'static str = "List every object in the scene with its type and location.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
    }
}

pub struct GetObjectInfoTool;

impl GetObjectInfoTool {
    pub const NAME: &'static str = "get_object_info";

    pub const DESCRIPTION: &'static str =
        "Return type, location, dimensions and material of a single object.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION).param(object_name())
    }
}

pub struct ClearSceneTool;

impl ClearSceneTool {
    pub const NAME: &'static str = "clear_scene";

    pub const DESCRIPTION: &'static str = "Remove all objects and materials from the scene.";

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(Self::NAME, Self::DESCRIPTION)
    }
}
