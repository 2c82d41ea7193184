//! Managed EKS add-ons

use serde::Deserialize;

use crate::kinds;
use crate::resource::{Output, Resource, ResourceId, Value};
use crate::tags::{self, Tags};

/// One managed add-on (e.g. `vpc-cni`, `coredns`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AddonSpec {
    pub name: String,
    pub version: String,
    /// JSON configuration payload passed through verbatim
    pub configuration_values: String,
    pub preserve: bool,
    pub service_account_role_arn: Option<Value>,
    /// `NONE`, `OVERWRITE` or `PRESERVE`
    pub resolve_conflicts: String,
    pub tags: Tags,
}

impl AddonSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Translate an add-on; ordered after every id in `anchors`
pub fn addon_resource(
    spec: &AddonSpec,
    cluster_name: &Output,
    tags: &Tags,
    anchors: Vec<ResourceId>,
) -> Resource {
    let mut resource = Resource::new(kinds::EKS_ADDON, spec.name.as_str())
        .with_attribute("addon_name", spec.name.as_str())
        .with_attribute("cluster_name", cluster_name)
        .with_string_if_present("addon_version", &spec.version)
        .with_string_if_present("configuration_values", &spec.configuration_values)
        .with_flag_if_set("preserve", spec.preserve)
        .with_string_if_present("resolve_conflicts", &spec.resolve_conflicts)
        .with_depends_on(anchors);
    if let Some(arn) = &spec.service_account_role_arn {
        resource = resource.with_attribute("service_account_role_arn", arn.clone());
    }
    if !tags.is_empty() {
        resource = resource.with_attribute("tags", tags::to_value(tags));
    }
    resource
}
