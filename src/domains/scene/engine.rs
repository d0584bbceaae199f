//! In-memory scene used by the mock worker.
//!
//! Mirrors the observable behaviour of the real engine closely enough for the
//! server to run end to end: objects get unique names (`Cube`, `Cube.001`),
//! materials are created on demand, and mutations answer with a short
//! human-readable summary while queries answer with structured JSON.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Errors reported back to the core as `{"failure": code, "message": ...}`.
#[derive(Debug, Error, PartialEq)]
pub enum SceneError {
    #[error("Object '{0}' not found")]
    ObjectNotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
}

impl SceneError {
    /// Stable code sent over the worker wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ObjectNotFound(_) => "ObjectNotFound",
            Self::UnsupportedOperation(_) => "UnsupportedOperation",
            Self::InvalidArgument { .. } => "InvalidArgument",
        }
    }

    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Cube,
    Sphere,
    Cylinder,
    Plane,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PrimitiveKind,
    pub location: [f64; 3],
    pub dimensions: [f64; 3],
    pub material: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Material {
    pub name: String,
    pub color: [f64; 4],
    pub metallic: f64,
    pub roughness: f64,
}

const DEFAULT_COLOR: [f64; 4] = [0.8, 0.8, 0.8, 1.0];

/// The scene state owned by one worker process.
#[derive(Debug, Default)]
pub struct Scene {
    objects: BTreeMap<String, SceneObject>,
    materials: BTreeMap<String, Material>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects.get(name)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Run one operation.
    pub fn execute(&mut self, operation: &str, args: &Map<String, Value>) -> Result<Value, SceneError> {
        match operation {
            "create_cube" => {
                let size = number(args, "size", 2.0)?;
                let obj = self.add(args, PrimitiveKind::Cube, "Cube", [size; 3])?;
                Ok(json!(format!(
                    "Created cube '{}' at {} with size {}",
                    obj.name,
                    fmt_vec(&obj.location),
                    size
                )))
            }
            "create_sphere" => {
                let radius = number(args, "radius", 1.0)?;
                let segments = integer(args, "segments", 32)?;
                let rings = integer(args, "rings", 16)?;
                let obj = self.add(args, PrimitiveKind::Sphere, "Sphere", [radius * 2.0; 3])?;
                Ok(json!(format!(
                    "Created sphere '{}' at {} with radius {} ({} segments, {} rings)",
                    obj.name,
                    fmt_vec(&obj.location),
                    radius,
                    segments,
                    rings
                )))
            }
            "create_cylinder" => {
                let radius = number(args, "radius", 1.0)?;
                let depth = number(args, "depth", 2.0)?;
                let obj = self.add(
                    args,
                    PrimitiveKind::Cylinder,
                    "Cylinder",
                    [radius * 2.0, radius * 2.0, depth],
                )?;
                Ok(json!(format!(
                    "Created cylinder '{}' at {} with radius {} and depth {}",
                    obj.name,
                    fmt_vec(&obj.location),
                    radius,
                    depth
                )))
            }
            "create_plane" => {
                let size = number(args, "size", 2.0)?;
                let obj = self.add(args, PrimitiveKind::Plane, "Plane", [size, size, 0.0])?;
                Ok(json!(format!(
                    "Created plane '{}' at {} with size {}",
                    obj.name,
                    fmt_vec(&obj.location),
                    size
                )))
            }
            "create_material" => {
                let name = string(args, "name", None)?;
                let material = Material {
                    name: name.clone(),
                    color: color(args, "color")?.unwrap_or(DEFAULT_COLOR),
                    metallic: number(args, "metallic", 0.0)?,
                    roughness: number(args, "roughness", 0.5)?,
                };
                let verb = if self.materials.insert(name.clone(), material).is_some() {
                    "Updated"
                } else {
                    "Created"
                };
                Ok(json!(format!("{} material '{}'", verb, name)))
            }
            "assign_material" => {
                let object_name = string(args, "object_name", None)?;
                let material_name = string(args, "material_name", None)?;
                let color = color(args, "color")?;

                let obj = self
                    .objects
                    .get_mut(&object_name)
                    .ok_or_else(|| SceneError::ObjectNotFound(object_name.clone()))?;
                let created = !self.materials.contains_key(&material_name);
                if created {
                    self.materials.insert(
                        material_name.clone(),
                        Material {
                            name: material_name.clone(),
                            color: color.unwrap_or(DEFAULT_COLOR),
                            metallic: 0.0,
                            roughness: 0.5,
                        },
                    );
                }
                obj.material = Some(material_name.clone());
                Ok(json!(format!(
                    "Assigned material '{}' to '{}'{}",
                    material_name,
                    object_name,
                    if created { " (new material)" } else { "" }
                )))
            }
            "move_object" => {
                let name = string(args, "name", None)?;
                let location = vector(args, "location")?
                    .ok_or_else(|| SceneError::invalid("location", "missing"))?;
                let obj = self
                    .objects
                    .get_mut(&name)
                    .ok_or_else(|| SceneError::ObjectNotFound(name.clone()))?;
                obj.location = location;
                Ok(json!(format!("Moved '{}' to {}", name, fmt_vec(&location))))
            }
            "delete_object" => {
                let name = string(args, "name", None)?;
                self.objects
                    .remove(&name)
                    .ok_or_else(|| SceneError::ObjectNotFound(name.clone()))?;
                Ok(json!(format!("Deleted object '{}'", name)))
            }
            "list_objects" => {
                let objects: Vec<Value> = self
                    .objects
                    .values()
                    .map(|o| json!({ "name": o.name, "type": o.kind, "location": o.location }))
                    .collect();
                Ok(json!({ "count": objects.len(), "objects": objects }))
            }
            "get_object_info" => {
                let name = string(args, "name", None)?;
                let obj = self
                    .objects
                    .get(&name)
                    .ok_or_else(|| SceneError::ObjectNotFound(name.clone()))?;
                let material = obj.material.as_ref().and_then(|m| self.materials.get(m));
                Ok(json!({ "object": obj, "material": material }))
            }
            "clear_scene" => {
                let objects = std::mem::take(&mut self.objects).len();
                let materials = std::mem::take(&mut self.materials).len();
                Ok(json!(format!(
                    "Cleared scene ({} objects, {} materials removed)",
                    objects, materials
                )))
            }
            other => Err(SceneError::UnsupportedOperation(other.to_string())),
        }
    }

    fn add(
        &mut self,
        args: &Map<String, Value>,
        kind: PrimitiveKind,
        default_name: &str,
        dimensions: [f64; 3],
    ) -> Result<&SceneObject, SceneError> {
        let requested = string(args, "name", Some(default_name))?;
        let location = vector(args, "location")?.unwrap_or([0.0; 3]);
        let name = self.unique_name(&requested);
        let obj = SceneObject {
            name: name.clone(),
            kind,
            location,
            dimensions,
            material: None,
        };
        Ok(self.objects.entry(name).or_insert(obj))
    }

    fn unique_name(&self, requested: &str) -> String {
        if !self.objects.contains_key(requested) {
            return requested.to_string();
        }
        (1..)
            .map(|n| format!("{}.{:03}", requested, n))
            .find(|candidate| !self.objects.contains_key(candidate))
            .unwrap_or_else(|| requested.to_string())
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn string(args: &Map<String, Value>, name: &str, default: Option<&str>) -> Result<String, SceneError> {
    match (args.get(name), default) {
        (Some(Value::String(s)), _) => Ok(s.clone()),
        (None, Some(d)) => Ok(d.to_string()),
        (None, None) => Err(SceneError::invalid(name, "missing")),
        (Some(_), _) => Err(SceneError::invalid(name, "expected a string")),
    }
}

fn number(args: &Map<String, Value>, name: &str, default: f64) -> Result<f64, SceneError> {
    match args.get(name) {
        None => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| SceneError::invalid(name, "expected a number")),
    }
}

fn integer(args: &Map<String, Value>, name: &str, default: i64) -> Result<i64, SceneError> {
    match args.get(name) {
        None => Ok(default),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| SceneError::invalid(name, "expected an integer")),
    }
}

fn numbers<const N: usize>(value: &Value, name: &str) -> Result<[f64; N], SceneError> {
    let items = value
        .as_array()
        .filter(|items| items.len() == N)
        .ok_or_else(|| SceneError::invalid(name, format!("expected {} numbers", N)))?;
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item
            .as_f64()
            .ok_or_else(|| SceneError::invalid(name, "expected numbers"))?;
    }
    Ok(out)
}

fn vector(args: &Map<String, Value>, name: &str) -> Result<Option<[f64; 3]>, SceneError> {
    args.get(name).map(|v| numbers::<3>(v, name)).transpose()
}

fn color(args: &Map<String, Value>, name: &str) -> Result<Option<[f64; 4]>, SceneError> {
    args.get(name).map(|v| numbers::<4>(v, name)).transpose()
}

fn fmt_vec(v: &[f64; 3]) -> String {
    format!("[{}, {}, {}]", v[0], v[1], v[2])
}
