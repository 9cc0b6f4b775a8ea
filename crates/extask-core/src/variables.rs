//! Named variable collections with typed access.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VariableError;
use crate::variable::{ValueType, Variable};

/// Mapping from variable name to [`Variable`].
///
/// Typed getters fail with [`VariableError::NotFound`] when the name is
/// absent and with [`VariableError::TypeMismatch`] when the stored tag does
/// not match; values are never coerced across tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(HashMap<String, Variable>);

impl Variables {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Build from plain JSON values, choosing each tag from the value shape.
    pub fn from_map(values: HashMap<String, Value>) -> Result<Self, VariableError> {
        let mut vars = Self::new();
        for (name, value) in values {
            vars.insert(name, Variable::from_json_value(value)?);
        }
        Ok(vars)
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, variable: Variable) -> Option<Variable> {
        self.0.insert(name.into(), variable)
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Plain name → value map with tags and value info dropped.
    pub fn to_plain_map(&self) -> HashMap<String, Value> {
        self.0
            .iter()
            .map(|(name, var)| (name.clone(), var.value.clone()))
            .collect()
    }

    fn lookup(&self, name: &str) -> Result<&Variable, VariableError> {
        self.0
            .get(name)
            .ok_or_else(|| VariableError::NotFound(name.to_string()))
    }

    fn lookup_tagged(
        &self,
        name: &str,
        expected: &'static str,
        accepts: impl Fn(&ValueType) -> bool,
    ) -> Result<&Variable, VariableError> {
        let var = self.lookup(name)?;
        if !accepts(&var.value_type) {
            return Err(VariableError::TypeMismatch {
                name: name.to_string(),
                expected,
                actual: var.value_type.clone(),
            });
        }
        Ok(var)
    }

    fn undecodable(name: &str, message: impl Into<String>) -> VariableError {
        VariableError::Decode {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn string(&self, name: &str) -> Result<&str, VariableError> {
        let var = self.lookup_tagged(name, "String", |t| *t == ValueType::String)?;
        var.value
            .as_str()
            .ok_or_else(|| Self::undecodable(name, "value is not a string"))
    }

    /// Integral value of a Short, Integer or Long variable.
    pub fn int(&self, name: &str) -> Result<i64, VariableError> {
        let var = self.lookup_tagged(name, "Long", ValueType::is_integral)?;
        var.value
            .as_i64()
            .ok_or_else(|| Self::undecodable(name, "value is not an integer"))
    }

    pub fn double(&self, name: &str) -> Result<f64, VariableError> {
        let var = self.lookup_tagged(name, "Double", |t| *t == ValueType::Double)?;
        var.value
            .as_f64()
            .ok_or_else(|| Self::undecodable(name, "value is not a number"))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, VariableError> {
        let var = self.lookup_tagged(name, "Boolean", |t| *t == ValueType::Boolean)?;
        var.value
            .as_bool()
            .ok_or_else(|| Self::undecodable(name, "value is not a boolean"))
    }

    /// Parsed JSON of a Json variable.
    ///
    /// The engine transmits Json values as strings; those are parsed, any
    /// other JSON value is returned as is.
    pub fn json(&self, name: &str) -> Result<Value, VariableError> {
        let var = self.lookup_tagged(name, "Json", |t| *t == ValueType::Json)?;
        match &var.value {
            Value::String(text) => {
                serde_json::from_str(text).map_err(|e| Self::undecodable(name, e.to_string()))
            }
            other => Ok(other.clone()),
        }
    }

    /// Deserialize an Object variable into `T`.
    pub fn object<T: DeserializeOwned>(&self, name: &str) -> Result<T, VariableError> {
        let var = self.lookup_tagged(name, "Object", |t| *t == ValueType::Object)?;
        let decoded = match &var.value {
            Value::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        };
        decoded.map_err(|e| Self::undecodable(name, e.to_string()))
    }

    pub fn insert_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.insert(name, Variable::string(value));
    }

    pub fn insert_long(&mut self, name: impl Into<String>, value: i64) {
        self.insert(name, Variable::long(value));
    }

    pub fn insert_double(&mut self, name: impl Into<String>, value: f64) {
        self.insert(name, Variable::double(value));
    }

    pub fn insert_boolean(&mut self, name: impl Into<String>, value: bool) {
        self.insert(name, Variable::boolean(value));
    }

    pub fn insert_null(&mut self, name: impl Into<String>) {
        self.insert(name, Variable::null());
    }

    /// Insert a Json-tagged variable.
    pub fn insert_json<T: Serialize + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), VariableError> {
        self.insert(name, Variable::json(value)?);
        Ok(())
    }

    /// Insert a Json-tagged variable from serialized JSON.
    pub fn insert_json_bytes(
        &mut self,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> Result<(), VariableError> {
        self.insert(name, Variable::json_from_bytes(bytes)?);
        Ok(())
    }

    /// Insert a native value, tagged according to its shape.
    pub fn insert_value<T: Serialize + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), VariableError> {
        self.insert(name, Variable::encode(value)?);
        Ok(())
    }

    /// Insert an Object variable from serialized JSON, used verbatim.
    pub fn insert_object_bytes(
        &mut self,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> Result<(), VariableError> {
        self.insert(name, Variable::object_from_json_bytes(bytes)?);
        Ok(())
    }
}

impl FromIterator<(String, Variable)> for Variables {
    fn from_iter<I: IntoIterator<Item = (String, Variable)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Variables {
    type Item = (String, Variable);
    type IntoIter = std::collections::hash_map::IntoIter<String, Variable>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        items: Vec<String>,
    }

    #[test]
    fn test_string_roundtrip_and_mismatch() {
        let mut vars = Variables::new();
        vars.insert_string("customer", "ACME");

        assert_eq!(vars.string("customer").unwrap(), "ACME");
        assert!(matches!(
            vars.int("customer"),
            Err(VariableError::TypeMismatch { expected: "Long", actual: ValueType::String, .. })
        ));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let vars = Variables::new();
        assert!(matches!(vars.string("nope"), Err(VariableError::NotFound(n)) if n == "nope"));
        assert!(matches!(vars.boolean("nope"), Err(VariableError::NotFound(_))));
    }

    #[test]
    fn test_int_accepts_all_integral_tags() {
        let vars: Variables = serde_json::from_value(json!({
            "a": {"type": "Integer", "value": 1},
            "b": {"type": "Long", "value": 2},
            "c": {"type": "short", "value": 3},
            "d": {"type": "Double", "value": 4.0}
        }))
        .unwrap();

        assert_eq!(vars.int("a").unwrap(), 1);
        assert_eq!(vars.int("b").unwrap(), 2);
        assert_eq!(vars.int("c").unwrap(), 3);
        assert!(matches!(vars.int("d"), Err(VariableError::TypeMismatch { .. })));
        assert_eq!(vars.double("d").unwrap(), 4.0);
    }

    #[test]
    fn test_map_roundtrip_through_object_encoding() {
        let original = json!({"id": 7, "tags": ["x", "y"], "nested": {"ok": true}});
        let mut vars = Variables::new();
        vars.insert_value("payload", &original).unwrap();

        // what the engine would echo back
        let wire = serde_json::to_string(&vars).unwrap();
        let decoded: Variables = serde_json::from_str(&wire).unwrap();

        assert_eq!(decoded.get("payload").unwrap().value, original);
        let back: Value = decoded.object("payload").unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_list_roundtrip_decodes_as_list() {
        let original = vec![json!({"a": 1}), json!({"a": 2})];
        let mut vars = Variables::new();
        vars.insert_value("rows", &original).unwrap();

        let wire = serde_json::to_string(&vars).unwrap();
        let decoded: Variables = serde_json::from_str(&wire).unwrap();

        let var = decoded.get("rows").unwrap();
        assert!(var.value.is_array());
        let back: Vec<Value> = decoded.object("rows").unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_object_into_struct() {
        let mut vars = Variables::new();
        let order = Order {
            id: 9,
            items: vec!["bolt".into()],
        };
        vars.insert_value("order", &order).unwrap();

        let got: Order = vars.object("order").unwrap();
        assert_eq!(got, order);
        assert!(matches!(
            vars.object::<Vec<u8>>("order"),
            Err(VariableError::Decode { .. })
        ));
    }

    #[test]
    fn test_json_variables() {
        let mut vars = Variables::new();
        vars.insert_json("config", &json!({"retries": 3})).unwrap();
        vars.insert_json_bytes("raw", br#"[1,2]"#).unwrap();

        assert_eq!(vars.get("config").unwrap().value, json!("{\"retries\":3}"));
        assert_eq!(vars.json("config").unwrap(), json!({"retries": 3}));
        assert_eq!(vars.json("raw").unwrap(), json!([1, 2]));
        assert!(matches!(vars.string("config"), Err(VariableError::TypeMismatch { .. })));
    }

    #[test]
    fn test_from_map_and_plain_map() {
        let vars = Variables::from_map(HashMap::from([
            ("n".to_string(), json!(5)),
            ("s".to_string(), json!("five")),
        ]))
        .unwrap();

        assert_eq!(vars.get("n").unwrap().value_type, ValueType::Long);
        assert_eq!(vars.string("s").unwrap(), "five");

        let plain = vars.to_plain_map();
        assert_eq!(plain["n"], json!(5));
        assert_eq!(plain["s"], json!("five"));
    }
}
