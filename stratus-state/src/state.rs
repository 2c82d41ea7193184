//! State file structures for persisting applied resources

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use stratus_core::interpreter::ResolvedExport;
use stratus_core::{ResourceId, State, Value};

/// The document written by a state backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Identifies one history of writes; a backend refuses to replace a
    /// state file of a different lineage
    pub lineage: String,
    /// Version of Stratus that last wrote this state
    pub stratus_version: String,
    #[serde(default)]
    pub resources: Vec<ResourceState>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: lineage.into(),
            stratus_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Bump the serial ahead of a write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.stratus_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find_resource(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == id.resource_type && r.name == id.name)
    }

    pub fn upsert_resource(&mut self, resource: ResourceState) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == resource.resource_type && r.name == resource.name)
        {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    /// Replace the recorded outputs with `exports`
    pub fn record_outputs(&mut self, exports: &[ResolvedExport]) {
        self.outputs = exports
            .iter()
            .map(|export| {
                (
                    export.name.clone(),
                    OutputState {
                        value: export.value.to_json(),
                        secret: export.secret,
                    },
                )
            })
            .collect();
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// A settled resource as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "ec2.vpc")
    pub resource_type: String,
    pub name: String,
    /// Backend identifier (e.g., vpc-0a1b2c3d)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ResourceState {
    pub fn from_state(state: &State) -> Self {
        Self {
            resource_type: state.id.resource_type.clone(),
            name: state.id.name.clone(),
            identifier: state.identifier.clone(),
            attributes: state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(self.resource_type.clone(), self.name.clone())
    }

    /// Rebuild the settled state.
    ///
    /// Persisted strings are literal; `${` inside them is never read as a reference.
    pub fn to_state(&self) -> Result<State, String> {
        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| literal(v).map(|v| (k.clone(), v)))
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(|e| format!("{}.{}: {}", self.resource_type, self.name, e))?;
        let state = State::existing(self.resource_id(), attributes);
        Ok(match &self.identifier {
            Some(identifier) => state.with_identifier(identifier.clone()),
            None => state,
        })
    }
}

fn literal(json: &serde_json::Value) -> Result<Value, String> {
    match json {
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| format!("non-integer number {}", n)),
        serde_json::Value::Array(items) => items
            .iter()
            .map(literal)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| literal(v).map(|v| (k.clone(), v)))
            .collect::<Result<HashMap<_, _>, _>>()
            .map(Value::Map),
        serde_json::Value::Null => Err("null attribute".to_string()),
    }
}

/// An exported value as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    pub value: serde_json::Value,
    #[serde(default)]
    pub secret: bool,
}
