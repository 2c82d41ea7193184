//! Effect - A single request the Interpreter sends to the Provider

use crate::resource::Resource;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Look up a data source
    Read(Resource),
    /// Create a resource
    Create(Resource),
}

impl Effect {
    pub fn resource(&self) -> &Resource {
        match self {
            Effect::Read(r) | Effect::Create(r) => r,
        }
    }

    /// Returns true if this Effect changes infrastructure
    pub fn is_mutating(&self) -> bool {
        matches!(self, Effect::Create(_))
    }
}
