//! Resource - Desired resources, forward references and settled state

use std::collections::HashMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource type (e.g., "ec2.vpc", "eks.cluster")
    pub resource_type: String,
    /// Resource name, unique per type within a plan
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Reference to an attribute this resource will produce
    pub fn attr(&self, path: impl Into<String>) -> AttrRef {
        AttrRef {
            resource: self.clone(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Reference to an attribute of another resource.
///
/// `path` is a dotted attribute path; numeric segments index into lists
/// (e.g. `identities.0.oidc.0.issuer`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrRef {
    pub resource: ResourceId,
    pub path: String,
}

impl AttrRef {
    /// Parse `service.kind.name.path` (the form used inside `${...}`)
    pub fn parse(s: &str) -> Result<Self, String> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.len() < 4 || segments.iter().any(|seg| seg.is_empty()) {
            return Err(format!(
                "Invalid reference '{}': expected service.kind.name.attribute",
                s
            ));
        }
        Ok(Self {
            resource: ResourceId::new(format!("{}.{}", segments[0], segments[1]), segments[2]),
            path: segments[3..].join("."),
        })
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.path)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Forward reference to an attribute another resource produces
    Ref(AttrRef),
    /// String built from resolved parts (e.g. a tag key embedding a generated name)
    Concat(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::String(s.into())).collect())
    }

    pub fn string_map<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Navigate a dotted path through nested maps and lists
    pub fn at_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |current, segment| match current {
            Value::Map(map) => map.get(segment),
            Value::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Collect every forward reference contained in this value
    pub fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a AttrRef>) {
        match self {
            Value::Ref(r) => refs.push(r),
            Value::List(items) | Value::Concat(items) => {
                for item in items {
                    item.collect_refs(refs);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.collect_refs(refs);
                }
            }
            Value::String(_) | Value::Int(_) | Value::Bool(_) => {}
        }
    }

    /// Returns true if the value contains no forward references
    pub fn is_resolved(&self) -> bool {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs.is_empty()
    }

    /// Replace references with settled values.
    ///
    /// Returns the first reference `lookup` cannot satisfy.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value, AttrRef>
    where
        F: Fn(&AttrRef) -> Option<Value>,
    {
        match self {
            Value::Ref(r) => lookup(r).ok_or_else(|| r.clone()),
            Value::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.resolve(lookup)? {
                        Value::String(s) => out.push_str(&s),
                        Value::Int(n) => out.push_str(&n.to_string()),
                        Value::Bool(b) => out.push_str(&b.to_string()),
                        other => out.push_str(&other.to_json().to_string()),
                    }
                }
                Ok(Value::String(out))
            }
            Value::List(items) => items
                .iter()
                .map(|v| v.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Result<HashMap<_, _>, _>>()
                .map(Value::Map),
            Value::String(_) | Value::Int(_) | Value::Bool(_) => Ok(self.clone()),
        }
    }

    /// Convert to JSON; references render as `${service.kind.name.path}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Ref(r) => serde_json::Value::String(r.to_string()),
            Value::Concat(parts) => {
                let joined: String = parts
                    .iter()
                    .map(|part| match part {
                        Value::String(s) => s.clone(),
                        Value::Ref(r) => r.to_string(),
                        other => other.to_json().to_string(),
                    })
                    .collect();
                serde_json::Value::String(joined)
            }
        }
    }

    /// Convert from JSON, parsing `${...}` references inside strings
    pub fn from_json(json: &serde_json::Value) -> Result<Value, String> {
        match json {
            serde_json::Value::String(s) => parse_interpolated(s),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| format!("Unsupported number {}: only integers are allowed", n)),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                .collect::<Result<HashMap<_, _>, _>>()
                .map(Value::Map),
            serde_json::Value::Null => Err("null is not a valid value".to_string()),
        }
    }
}

fn parse_interpolated(s: &str) -> Result<Value, String> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            parts.push(Value::String(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("Unterminated reference in '{}'", s))?;
        parts.push(Value::Ref(AttrRef::parse(&after[..end])?));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        parts.push(Value::String(rest.to_string()));
    }

    match parts.len() {
        0 => Ok(Value::String(String::new())),
        1 => Ok(parts.remove(0)),
        _ => Ok(Value::Concat(parts)),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<AttrRef> for Value {
    fn from(r: AttrRef) -> Self {
        Value::Ref(r)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(&json).map_err(D::Error::custom)
    }
}

/// Forward reference to a value that becomes known once its producer settles
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Pending(AttrRef),
    Resolved(Value),
}

impl Output {
    pub fn pending(r: AttrRef) -> Self {
        Output::Pending(r)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Output::Resolved(_))
    }

    /// The value to place into another resource's attributes
    pub fn to_value(&self) -> Value {
        match self {
            Output::Pending(r) => Value::Ref(r.clone()),
            Output::Resolved(v) => v.clone(),
        }
    }
}

impl From<Output> for Value {
    fn from(output: Output) -> Self {
        output.to_value()
    }
}

impl From<&Output> for Value {
    fn from(output: &Output) -> Self {
        output.to_value()
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        match value {
            Value::Ref(r) => Output::Pending(r),
            other => Output::Resolved(other),
        }
    }
}

/// Desired resource registered by a builder
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
    /// Ordering edges that carry no data
    pub depends_on: Vec<ResourceId>,
    /// If true, this is a data source (read-only) that is looked up, never created
    pub read_only: bool,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
            depends_on: Vec::new(),
            read_only: false,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set a string attribute only when it is non-empty
    pub fn with_string_if_present(self, key: impl Into<String>, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.with_attribute(key, value)
        }
    }

    /// Set an integer attribute only when it is non-zero
    pub fn with_int_if_present(self, key: impl Into<String>, value: i64) -> Self {
        if value == 0 {
            self
        } else {
            self.with_attribute(key, value)
        }
    }

    /// Set a flag only when it is true
    pub fn with_flag_if_set(self, key: impl Into<String>, value: bool) -> Self {
        if value {
            self.with_attribute(key, true)
        } else {
            self
        }
    }

    /// Set a list attribute only when it has items
    pub fn with_list_if_present(self, key: impl Into<String>, items: Vec<Value>) -> Self {
        if items.is_empty() {
            self
        } else {
            self.with_attribute(key, Value::List(items))
        }
    }

    pub fn with_depends_on<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = ResourceId>,
    {
        for id in ids {
            if !self.depends_on.contains(&id) {
                self.depends_on.push(id);
            }
        }
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Returns true if this resource is a data source (read-only)
    pub fn is_data_source(&self) -> bool {
        self.read_only
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Every forward reference in this resource's attributes
    pub fn references(&self) -> Vec<&AttrRef> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            value.collect_refs(&mut refs);
        }
        refs
    }
}

/// Settled state returned by the provisioning backend
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// AWS internal identifier (e.g., vpc-xxx, subnet-xxx)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up a settled attribute; `id` falls back to the backend identifier
    pub fn attribute(&self, path: &str) -> Option<Value> {
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
        match self.attributes.get(head) {
            Some(value) => value.at_path(rest).cloned(),
            None if path == "id" => self.identifier.clone().map(Value::String),
            None => None,
        }
    }
}
