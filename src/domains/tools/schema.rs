//! Parameter schemas and argument coercion.
//!
//! Tool arguments arrive as loosely-typed JSON. Each parameter declares a
//! [`SemanticType`]; validation coerces the raw value into a typed
//! [`ArgValue`] so that the worker always receives canonical shapes
//! (vectors as three numbers, colors as RGBA in `0..=1`, and so on).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// The semantic type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Integer,
    Number,
    Boolean,
    /// Three numbers, `[x, y, z]` or `{"x", "y", "z"}`.
    Vector3,
    /// RGBA with components in `0..=1`, or a `#RRGGBB[AA]` hex string.
    Color,
}

impl SemanticType {
    /// Name used in error messages and schemas.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Vector3 => "vector3",
            Self::Color => "color",
        }
    }

    /// JSON Schema fragment describing the accepted wire shape.
    pub fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Number => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Vector3 => json!({
                "type": "array",
                "items": { "type": "number" },
                "minItems": 3,
                "maxItems": 3
            }),
            Self::Color => json!({
                "oneOf": [
                    {
                        "type": "array",
                        "items": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                        "minItems": 3,
                        "maxItems": 4
                    },
                    { "type": "string", "pattern": "^#([0-9a-fA-F]{6}|[0-9a-fA-F]{8})$" }
                ]
            }),
        }
    }

    /// Coerce a raw JSON value into this type.
    pub fn coerce(&self, value: &Value) -> Result<ArgValue, String> {
        match self {
            Self::String => match value {
                Value::String(s) => Ok(ArgValue::String(s.clone())),
                other => Err(mismatch(self, other)),
            },
            Self::Integer => coerce_integer(value).map(ArgValue::Integer),
            Self::Number => coerce_number(value).map(ArgValue::Number),
            Self::Boolean => match value {
                Value::Bool(b) => Ok(ArgValue::Boolean(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(ArgValue::Boolean(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(ArgValue::Boolean(false)),
                other => Err(mismatch(self, other)),
            },
            Self::Vector3 => coerce_vector3(value).map(ArgValue::Vector3),
            Self::Color => coerce_color(value).map(ArgValue::Color),
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, strongly-typed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Vector3([f64; 3]),
    Color([f64; 4]),
}

impl ArgValue {
    /// The semantic type this value satisfies.
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Self::String(_) => SemanticType::String,
            Self::Integer(_) => SemanticType::Integer,
            Self::Number(_) => SemanticType::Number,
            Self::Boolean(_) => SemanticType::Boolean,
            Self::Vector3(_) => SemanticType::Vector3,
            Self::Color(_) => SemanticType::Color,
        }
    }

    /// Canonical JSON form sent to the worker.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => json!(s),
            Self::Integer(i) => json!(i),
            Self::Number(n) => json!(n),
            Self::Boolean(b) => json!(b),
            Self::Vector3(v) => json!(v),
            Self::Color(c) => json!(c),
        }
    }
}

/// Declaration of a single tool parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub semantic_type: SemanticType,
    pub required: bool,
    pub default: Option<ArgValue>,
    pub description: String,
}

impl ParamSpec {
    /// A parameter the caller must always supply.
    pub fn required(
        name: impl Into<String>,
        semantic_type: SemanticType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    /// An optional parameter; omitted from the normalized set when absent
    /// unless a default is attached with [`ParamSpec::with_default`].
    pub fn optional(
        name: impl Into<String>,
        semantic_type: SemanticType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, semantic_type, description)
        }
    }

    /// Attach a default value to an optional parameter.
    pub fn with_default(mut self, default: ArgValue) -> Self {
        debug_assert_eq!(default.semantic_type(), self.semantic_type);
        self.required = false;
        self.default = Some(default);
        self
    }

    /// JSON Schema property for this parameter.
    pub fn json_schema(&self) -> Value {
        let mut schema = self.semantic_type.json_schema();
        if let Value::Object(obj) = &mut schema {
            obj.insert("description".into(), json!(self.description));
            if let Some(default) = &self.default {
                obj.insert("default".into(), default.to_json());
            }
        }
        schema
    }
}

/// Arguments after validation, in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedArguments {
    values: Vec<(String, ArgValue)>,
}

impl NormalizedArguments {
    pub(crate) fn push(&mut self, name: impl Into<String>, value: ArgValue) {
        self.values.push((name.into(), value));
    }

    /// Look up a value by parameter name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// The JSON object forwarded to the worker.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect()
    }
}

// ============================================================================
// Coercion helpers
// ============================================================================

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(expected: &SemanticType, got: &Value) -> String {
    format!("expected {}, got {}", expected, describe(got))
}

fn coerce_number(value: &Value) -> Result<f64, String> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() => Ok(n),
        Some(_) => Err("expected a finite number".to_string()),
        None => Err(mismatch(&SemanticType::Number, value)),
    }
}

fn coerce_integer(value: &Value) -> Result<i64, String> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    if let Value::String(s) = value {
        if let Ok(i) = s.trim().parse::<i64>() {
            return Ok(i);
        }
    }
    let n = coerce_number(value).map_err(|_| mismatch(&SemanticType::Integer, value))?;
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Ok(n as i64)
    } else {
        Err(format!("expected integer, got fractional number {}", n))
    }
}

fn coerce_vector3(value: &Value) -> Result<[f64; 3], String> {
    match value {
        Value::Array(items) if items.len() == 3 => {
            let mut out = [0.0; 3];
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = coerce_number(item).map_err(|e| format!("vector3 component: {}", e))?;
            }
            Ok(out)
        }
        Value::Array(items) => Err(format!(
            "expected vector3 with 3 components, got {}",
            items.len()
        )),
        Value::Object(obj) => {
            let mut out = [0.0; 3];
            for (slot, axis) in out.iter_mut().zip(["x", "y", "z"]) {
                let item = obj
                    .get(axis)
                    .ok_or_else(|| format!("vector3 object is missing '{}'", axis))?;
                *slot = coerce_number(item).map_err(|e| format!("vector3 '{}': {}", axis, e))?;
            }
            Ok(out)
        }
        other => Err(mismatch(&SemanticType::Vector3, other)),
    }
}

fn coerce_color(value: &Value) -> Result<[f64; 4], String> {
    match value {
        Value::Array(items) if items.len() == 3 || items.len() == 4 => {
            let mut out = [0.0, 0.0, 0.0, 1.0];
            for (slot, item) in out.iter_mut().zip(items) {
                let c = coerce_number(item).map_err(|e| format!("color component: {}", e))?;
                if !(0.0..=1.0).contains(&c) {
                    return Err(format!("color component {} is outside 0..=1", c));
                }
                *slot = c;
            }
            Ok(out)
        }
        Value::Array(items) => Err(format!(
            "expected color with 3 or 4 components, got {}",
            items.len()
        )),
        Value::String(s) => parse_hex_color(s),
        other => Err(mismatch(&SemanticType::Color, other)),
    }
}

fn parse_hex_color(s: &str) -> Result<[f64; 4], String> {
    let hex = s
        .strip_prefix('#')
        .ok_or_else(|| format!("color string '{}' must start with '#'", s))?;
    if hex.len() != 6 && hex.len() != 8 {
        return Err(format!("color string '{}' must be #RRGGBB or #RRGGBBAA", s));
    }
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("color string '{}' is not valid hex", s));
    }

    let mut out = [0.0, 0.0, 0.0, 1.0];
    for (i, slot) in out.iter_mut().enumerate().take(hex.len() / 2) {
        let byte = hex
            .get(i * 2..i * 2 + 2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            .ok_or_else(|| format!("color string '{}' is not valid hex", s))?;
        *slot = f64::from(byte) / 255.0;
    }
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================
