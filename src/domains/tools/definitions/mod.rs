//! Tool definitions module.
//!
//! This module exports all available tool definitions, grouped by concern.
//! Tool bodies live in the worker; a definition only declares the name,
//! description and parameter schema.

pub mod materials;
pub mod objects;
pub mod primitives;

pub use materials::{AssignMaterialTool, CreateMaterialTool};
pub use objects::{ClearSceneTool, DeleteObjectTool, GetObjectInfoTool, ListObjectsTool, MoveObjectTool};
pub use primitives::{CreateCubeTool, CreateCylinderTool, CreatePlaneTool, CreateSphereTool};

use super::registry::ToolDescriptor;

/// Every scene tool, in the order advertised by `tools/list`.
///
/// This is the central place where tools are registered.
/// When adding a new tool, add it here.
pub fn all() -> Vec<ToolDescriptor> {
    vec![
        CreateCubeTool::descriptor(),
        CreateSphereTool::descriptor(),
        CreateCylinderTool::descriptor(),
        CreatePlaneTool::descriptor(),
        CreateMaterialTool::descriptor(),
        AssignMaterialTool::descriptor(),
        MoveObjectTool::descriptor(),
        DeleteObjectTool::descriptor(),
        ListObjectsTool::descriptor(),
        GetObjectInfoTool::descriptor(),
        ClearSceneTool::descriptor(),
    ]
}
