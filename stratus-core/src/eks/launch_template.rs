//! Custom launch templates for managed node groups

use serde::Deserialize;

use crate::kinds;
use crate::resource::{Resource, Value};
use crate::tags::{self, Tags};

/// Launch template settings; empty, zero and false fields are omitted
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LaunchTemplateSpec {
    /// Root volume size in GiB
    pub disk_size: i64,
    pub cpu_cores: i64,
    pub iam_instance_profile_name: String,
    pub elastic_inference_accelerator: String,
    pub disable_api_stop: bool,
    pub disable_api_termination: bool,
    pub ebs_optimized: bool,
    pub image_id: String,
    pub instance_type: String,
    pub kernel_id: String,
    pub key_name: String,
    pub instance_initiated_shutdown_behavior: String,
    pub ram_disk_id: String,
    pub user_data: String,
    pub update_default_version: bool,
    /// Extra security groups; the node group is always included
    pub vpc_security_group_ids: Vec<Value>,
    pub tags: Tags,
}

fn root_volume(disk_size: i64) -> Value {
    let ebs = [
        ("volume_size", Value::Int(disk_size)),
        ("volume_type", Value::string("gp3")),
        ("iops", Value::Int(10000)),
        ("throughput", Value::Int(1000)),
        ("delete_on_termination", Value::Bool(true)),
    ];
    Value::Map(
        [
            ("device_name".to_string(), Value::string("/dev/xvda")),
            (
                "ebs".to_string(),
                Value::Map(ebs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
            ),
        ]
        .into_iter()
        .collect(),
    )
}

fn single(key: &str, value: Value) -> Value {
    Value::Map([(key.to_string(), value)].into_iter().collect())
}

/// Translate a launch template spec into a launch template resource
pub fn launch_template_resource(
    name: &str,
    spec: &LaunchTemplateSpec,
    node_security_group_id: &Value,
) -> Resource {
    let mut security_groups = vec![node_security_group_id.clone()];
    security_groups.extend(spec.vpc_security_group_ids.iter().cloned());

    let mut resource = Resource::new(kinds::LAUNCH_TEMPLATE, name)
        .with_attribute("vpc_security_group_ids", Value::List(security_groups));

    if spec.disk_size > 0 {
        resource = resource.with_attribute(
            "block_device_mappings",
            Value::List(vec![root_volume(spec.disk_size)]),
        );
    }
    if spec.cpu_cores > 0 {
        resource =
            resource.with_attribute("cpu_options", single("core_count", Value::Int(spec.cpu_cores)));
    }
    if !spec.iam_instance_profile_name.is_empty() {
        resource = resource.with_attribute(
            "iam_instance_profile",
            single("name", Value::string(&spec.iam_instance_profile_name)),
        );
    }
    if !spec.elastic_inference_accelerator.is_empty() {
        resource = resource.with_attribute(
            "elastic_inference_accelerator",
            single("type", Value::string(&spec.elastic_inference_accelerator)),
        );
    }
    if !spec.tags.is_empty() {
        resource = resource.with_attribute("tags", tags::to_value(&spec.tags));
    }

    resource
        .with_flag_if_set("disable_api_stop", spec.disable_api_stop)
        .with_flag_if_set("disable_api_termination", spec.disable_api_termination)
        .with_flag_if_set("ebs_optimized", spec.ebs_optimized)
        .with_string_if_present("image_id", &spec.image_id)
        .with_string_if_present("instance_type", &spec.instance_type)
        .with_string_if_present("kernel_id", &spec.kernel_id)
        .with_string_if_present("key_name", &spec.key_name)
        .with_string_if_present(
            "instance_initiated_shutdown_behavior",
            &spec.instance_initiated_shutdown_behavior,
        )
        .with_string_if_present("ram_disk_id", &spec.ram_disk_id)
        .with_string_if_present("user_data", &spec.user_data)
        .with_flag_if_set("update_default_version", spec.update_default_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_sg() -> Value {
        Value::string("sg-node")
    }

    #[test]
    fn empty_spec_only_binds_security_groups() {
        let resource = launch_template_resource("workers", &LaunchTemplateSpec::default(), &node_sg());
        assert_eq!(resource.attributes.len(), 1);
        assert_eq!(
            resource.attribute("vpc_security_group_ids"),
            Some(&Value::List(vec![node_sg()]))
        );
    }

    #[test]
    fn disk_size_becomes_gp3_root_volume() {
        let spec = LaunchTemplateSpec {
            disk_size: 200,
            ..Default::default()
        };
        let resource = launch_template_resource("workers", &spec, &node_sg());
        let mapping = resource.attribute("block_device_mappings").unwrap();

        assert_eq!(mapping.at_path("0.device_name"), Some(&Value::string("/dev/xvda")));
        assert_eq!(mapping.at_path("0.ebs.volume_size"), Some(&Value::Int(200)));
        assert_eq!(mapping.at_path("0.ebs.volume_type"), Some(&Value::string("gp3")));
        assert_eq!(mapping.at_path("0.ebs.iops"), Some(&Value::Int(10000)));
        assert_eq!(mapping.at_path("0.ebs.throughput"), Some(&Value::Int(1000)));
        assert_eq!(
            mapping.at_path("0.ebs.delete_on_termination"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn translation_is_presence_monotonic() {
        let sparse = LaunchTemplateSpec {
            image_id: "ami-123".to_string(),
            ..Default::default()
        };
        let rich = LaunchTemplateSpec {
            cpu_cores: 4,
            ebs_optimized: true,
            user_data: "IyEvYmluL2Jhc2g=".to_string(),
            vpc_security_group_ids: vec![Value::string("sg-extra")],
            ..sparse.clone()
        };
        let sparse = launch_template_resource("workers", &sparse, &node_sg());
        let rich = launch_template_resource("workers", &rich, &node_sg());

        for key in sparse.attributes.keys() {
            assert!(rich.attributes.contains_key(key), "{} dropped", key);
        }
        assert_eq!(rich.attributes.len(), sparse.attributes.len() + 3);
        assert_eq!(
            rich.attribute("cpu_options").and_then(|v| v.at_path("core_count")),
            Some(&Value::Int(4))
        );
        assert_eq!(
            rich.attribute("vpc_security_group_ids").and_then(Value::as_list).map(<[Value]>::len),
            Some(2)
        );
    }
}
