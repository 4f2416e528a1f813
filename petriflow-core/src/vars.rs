//! Runtime variable storage for workflow instances.

use std::collections::HashMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Declaration of an instance variable.
///
/// Graph builders declare the data objects and data outputs of a process up
/// front; the declaration carries the external id, the variable name used at
/// runtime and free-form type and role tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Identifier of the data element in the source model.
    pub id: String,
    /// Name the variable is stored under.
    pub name: String,
    /// Declared type tag, `"mixed"` when unspecified.
    pub var_type: String,
    /// Declared role tag, `"undefined"` when unspecified.
    pub role: String,
}

impl VariableDefinition {
    /// Declare an untyped variable.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            var_type: "mixed".to_string(),
            role: "undefined".to_string(),
        }
    }

    /// Set the declared type tag.
    pub fn with_type(mut self, var_type: impl Into<String>) -> Self {
        self.var_type = var_type.into();
        self
    }

    /// Set the declared role tag.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// Named-variable bag.
///
/// A workflow owns one instance-wide store shared by every node, and each
/// node owns a scoped store that its activities write to. Values are kept as
/// JSON so that data can be carried between nodes without type registration.
#[derive(Clone, Debug, Default)]
pub struct RuntimeVars {
    values: HashMap<String, Value>,
    definitions: HashMap<String, VariableDefinition>,
}

impl RuntimeVars {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from raw JSON values.
    pub fn from_json(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            definitions: HashMap::new(),
        }
    }

    /// Set a variable, serializing the value to JSON.
    pub fn set(&mut self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.values.insert(name.into(), json_value);
        Ok(())
    }

    /// Set a variable from an already-built JSON value.
    pub fn set_raw(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Get a variable and deserialize it.
    pub fn get_json<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.values
            .get(name)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(FlowError::from)
    }

    /// Get a variable, failing if it is unset.
    pub fn require<T>(&self, name: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.get_json(name)?
            .ok_or_else(|| FlowError::variable(format!("variable '{name}' is not set")))
    }

    /// Get the raw JSON value of a variable.
    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Remove a variable.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Check if a variable is set.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Names of all set variables.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Iterate over all set variables.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Number of set variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no variable is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Declare a variable. Declaring does not set a value.
    ///
    /// Redeclaring a name replaces the previous declaration.
    pub fn define(&mut self, definition: VariableDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    /// Declaration for a variable name, if any.
    pub fn definition(&self, name: &str) -> Option<&VariableDefinition> {
        self.definitions.get(name)
    }

    /// All declarations.
    pub fn definitions(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.definitions.values()
    }

    /// Copy every value of `other` into this store, overriding on conflict.
    pub fn merge(&mut self, other: &RuntimeVars) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Convert the values to a JSON object.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(&self.values).map_err(FlowError::from)
    }
}
