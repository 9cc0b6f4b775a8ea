//! Tagged variable values and their wire codec.
//!
//! The engine exchanges variables as `{"value": .., "type": .., "valueInfo": ..}`.
//! Object-tagged values always travel as a string holding serialized JSON,
//! with `valueInfo` telling the receiver which type the JSON represents.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::VariableError;

/// JSON serialization format name used in `valueInfo`.
pub const JSON_DATA_FORMAT: &str = "application/json";

/// Type name recorded for Object variables holding a JSON array.
pub const LIST_TYPE_NAME: &str = "java.util.ArrayList";

/// Type name recorded for Object variables holding a JSON object.
pub const MAP_TYPE_NAME: &str = "java.util.LinkedHashMap";

/// Type tag of a variable.
///
/// Tags are matched case-insensitively when read and written in the engine's
/// canonical casing. Tags this crate does not know are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueType {
    String,
    Boolean,
    Short,
    Integer,
    Long,
    Double,
    Date,
    Json,
    Xml,
    Object,
    Bytes,
    File,
    Null,
    Other(String),
}

impl ValueType {
    /// Canonical engine name of the tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Short => "Short",
            Self::Integer => "Integer",
            Self::Long => "Long",
            Self::Double => "Double",
            Self::Date => "Date",
            Self::Json => "Json",
            Self::Xml => "Xml",
            Self::Object => "Object",
            Self::Bytes => "Bytes",
            Self::File => "File",
            Self::Null => "Null",
            Self::Other(name) => name,
        }
    }

    /// Returns true for the integral number tags.
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Short | Self::Integer | Self::Long)
    }
}

impl From<String> for ValueType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "string" => Self::String,
            "boolean" => Self::Boolean,
            "short" => Self::Short,
            "integer" => Self::Integer,
            "long" => Self::Long,
            "double" => Self::Double,
            "date" => Self::Date,
            "json" => Self::Json,
            "xml" => Self::Xml,
            "object" => Self::Object,
            "bytes" => Self::Bytes,
            "file" => Self::File,
            "null" => Self::Null,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ValueType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ValueType> for String {
    fn from(t: ValueType) -> Self {
        match t {
            ValueType::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to Object variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfo {
    /// Type name the serialized value represents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type_name: Option<String>,

    /// Serialization format of the value, e.g. `application/json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization_data_format: Option<String>,
}

impl ValueInfo {
    /// Value info for a JSON array.
    pub fn json_list() -> Self {
        Self {
            object_type_name: Some(LIST_TYPE_NAME.to_string()),
            serialization_data_format: Some(JSON_DATA_FORMAT.to_string()),
        }
    }

    /// Value info for a JSON object.
    pub fn json_map() -> Self {
        Self {
            object_type_name: Some(MAP_TYPE_NAME.to_string()),
            serialization_data_format: Some(JSON_DATA_FORMAT.to_string()),
        }
    }
}

/// A single typed value.
///
/// Deserializing a `Variable` applies the inbound Object decoding: a string
/// holding a JSON object or array becomes the parsed JSON value. Serializing
/// re-encodes such values as strings, so variables received from the engine
/// can be sent back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireVariable", into = "WireVariable")]
pub struct Variable {
    pub value: Value,
    pub value_type: ValueType,
    pub value_info: Option<ValueInfo>,
}

impl Variable {
    /// Create a variable from its parts without any conversion.
    pub fn new(value: Value, value_type: ValueType) -> Self {
        Self {
            value,
            value_type,
            value_info: None,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(Value::String(value.into()), ValueType::String)
    }

    pub fn long(value: i64) -> Self {
        Self::new(Value::from(value), ValueType::Long)
    }

    pub fn double(value: f64) -> Self {
        Self::new(Value::from(value), ValueType::Double)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(Value::Bool(value), ValueType::Boolean)
    }

    pub fn null() -> Self {
        Self::new(Value::Null, ValueType::Null)
    }

    /// Json-tagged variable; the value is sent as a JSON string.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, VariableError> {
        let text =
            serde_json::to_string(value).map_err(|e| VariableError::Encode(e.to_string()))?;
        Ok(Self::new(Value::String(text), ValueType::Json))
    }

    /// Json-tagged variable from already serialized JSON.
    pub fn json_from_bytes(bytes: &[u8]) -> Result<Self, VariableError> {
        let text = std::str::from_utf8(bytes).map_err(|e| VariableError::Encode(e.to_string()))?;
        Ok(Self::new(Value::String(text.to_string()), ValueType::Json))
    }

    /// Object-tagged variable from already serialized JSON, used verbatim.
    pub fn object_from_json_bytes(bytes: &[u8]) -> Result<Self, VariableError> {
        let text = std::str::from_utf8(bytes).map_err(|e| VariableError::Encode(e.to_string()))?;
        let parsed: Value =
            serde_json::from_str(text).map_err(|e| VariableError::Encode(e.to_string()))?;
        let info = if parsed.is_array() {
            ValueInfo::json_list()
        } else {
            ValueInfo::json_map()
        };
        Ok(Self {
            value: Value::String(text.to_string()),
            value_type: ValueType::Object,
            value_info: Some(info),
        })
    }

    /// Encode a native value, picking the tag from its serialized shape.
    ///
    /// Numbers become Long (or Double when not integral), strings String,
    /// booleans Boolean, unit/none Null. Sequences and maps become Object
    /// variables holding a JSON string with list or map value info.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, VariableError> {
        let value = serde_json::to_value(value).map_err(|e| VariableError::Encode(e.to_string()))?;
        Self::from_json_value(value)
    }

    /// Same as [`Variable::encode`] for a value that is already JSON.
    pub fn from_json_value(value: Value) -> Result<Self, VariableError> {
        let variable = match value {
            Value::Null => Self::null(),
            Value::Bool(b) => Self::boolean(b),
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Self::new(Value::Number(n), ValueType::Long)
                } else {
                    Self::new(Value::Number(n), ValueType::Double)
                }
            }
            Value::String(s) => Self::string(s),
            Value::Array(_) => Self::object_json(&value, ValueInfo::json_list())?,
            Value::Object(_) => Self::object_json(&value, ValueInfo::json_map())?,
        };
        Ok(variable)
    }

    fn object_json(value: &Value, info: ValueInfo) -> Result<Self, VariableError> {
        let text =
            serde_json::to_string(value).map_err(|e| VariableError::Encode(e.to_string()))?;
        Ok(Self {
            value: Value::String(text),
            value_type: ValueType::Object,
            value_info: Some(info),
        })
    }

    /// Attach value info.
    pub fn with_value_info(mut self, info: ValueInfo) -> Self {
        self.value_info = Some(info);
        self
    }
}

/// Variable exactly as it appears on the wire.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVariable {
    #[serde(default)]
    value: Value,
    #[serde(rename = "type", default = "null_type")]
    value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value_info: Option<ValueInfo>,
}

fn null_type() -> ValueType {
    ValueType::Null
}

impl From<WireVariable> for Variable {
    fn from(wire: WireVariable) -> Self {
        let mut variable = Variable {
            value: wire.value,
            value_type: wire.value_type,
            value_info: wire.value_info,
        };
        decode_object(&mut variable);
        variable
    }
}

impl From<Variable> for WireVariable {
    fn from(variable: Variable) -> Self {
        let value = match (&variable.value_type, variable.value) {
            (ValueType::Object, value @ (Value::Object(_) | Value::Array(_))) => {
                Value::String(value.to_string())
            }
            (_, value) => value,
        };
        WireVariable {
            value,
            value_type: variable.value_type,
            value_info: variable.value_info,
        }
    }
}

/// Best-effort decoding of Object variables that arrive as JSON strings.
///
/// A JSON object is tried first. If that fails because the root is an array,
/// the string is parsed as an array and the value info marks it as a list.
/// Anything else leaves the raw string in place.
fn decode_object(variable: &mut Variable) {
    if variable.value_type != ValueType::Object {
        return;
    }
    let Value::String(raw) = &variable.value else {
        return;
    };

    match serde_json::from_str::<Map<String, Value>>(raw) {
        Ok(map) => {
            variable.value = Value::Object(map);
        }
        Err(e) if e.is_data() && raw.trim_start().starts_with('[') => {
            if let Ok(list) = serde_json::from_str::<Vec<Value>>(raw) {
                variable.value = Value::Array(list);
                let info = variable.value_info.get_or_insert_with(ValueInfo::default);
                info.object_type_name = Some(LIST_TYPE_NAME.to_string());
                if info.serialization_data_format.is_none() {
                    info.serialization_data_format = Some(JSON_DATA_FORMAT.to_string());
                }
            }
        }
        Err(_) => {}
    }
}
