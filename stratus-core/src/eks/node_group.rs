//! Managed node groups: node IAM role, SSH access, launch template and scaling

use serde::Deserialize;

use super::launch_template::{LaunchTemplateSpec, launch_template_resource};
use super::{attach_policies, trust_policy};
use crate::error::{BuildError, BuildResult};
use crate::kinds;
use crate::plan::{Plan, ResourceHandle};
use crate::provider::CallerIdentity;
use crate::resource::{Output, Resource, ResourceId, Value};
use crate::security_group::ProvisionedGroup;
use crate::tags::{self, Tags, merge_tags};

const WORKER_POLICIES: [&str; 3] = [
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
];

/// Where the node group's launch configuration comes from
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchTemplateSource {
    /// A launch template managed outside this plan
    Existing {
        id: Value,
        #[serde(default = "default_template_version")]
        version: String,
    },
    /// A launch template created for this node group
    Custom(LaunchTemplateSpec),
    /// No launch template; the node group carries `disk_size` itself
    #[default]
    None,
}

fn default_template_version() -> String {
    "$Default".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    /// `NO_SCHEDULE`, `NO_EXECUTE` or `PREFER_NO_SCHEDULE`
    pub effect: String,
}

impl Taint {
    fn to_value(&self) -> Value {
        let mut entries = vec![
            ("key".to_string(), Value::string(&self.key)),
            ("effect".to_string(), Value::string(&self.effect)),
        ];
        if let Some(value) = &self.value {
            entries.push(("value".to_string(), Value::string(value)));
        }
        Value::Map(entries.into_iter().collect())
    }
}

fn default_disk_size() -> i64 {
    20
}

/// Desired managed node group
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeGroupSpec {
    pub name: String,
    pub min_size: u32,
    pub desired_size: u32,
    pub max_size: u32,
    /// Subset of the network's private subnets; empty means all of them
    pub subnet_ids: Vec<Value>,
    pub capacity_type: String,
    pub ami_type: String,
    pub release_version: String,
    /// Kubernetes version of the nodes
    pub version: String,
    pub instance_types: Vec<String>,
    pub labels: Tags,
    pub taints: Vec<Taint>,
    pub force_update_version: bool,
    /// Root volume size in GiB when no launch template is used
    #[serde(default = "default_disk_size")]
    pub disk_size: i64,
    /// Reuse a node role instead of creating one
    pub existing_node_role_arn: Option<Value>,
    pub iam_role_additional_policies: Vec<String>,
    /// Generate an SSH key pair and bind it to the nodes
    pub enable_remote_access: bool,
    pub launch_template: LaunchTemplateSource,
    pub tags: Tags,
}

impl Default for NodeGroupSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            min_size: 1,
            desired_size: 1,
            max_size: 1,
            subnet_ids: Vec::new(),
            capacity_type: String::new(),
            ami_type: String::new(),
            release_version: String::new(),
            version: String::new(),
            instance_types: Vec::new(),
            labels: Tags::new(),
            taints: Vec::new(),
            force_update_version: false,
            disk_size: default_disk_size(),
            existing_node_role_arn: None,
            iam_role_additional_policies: Vec::new(),
            enable_remote_access: false,
            launch_template: LaunchTemplateSource::None,
            tags: Tags::new(),
        }
    }
}

impl NodeGroupSpec {
    pub fn validate(&self, private_subnet_ids: &[Value]) -> BuildResult<()> {
        if self.name.is_empty() {
            return Err(BuildError::contract("node group name must not be empty"));
        }
        if !(1 <= self.min_size && self.min_size <= self.desired_size && self.desired_size <= self.max_size) {
            return Err(BuildError::contract(format!(
                "node group '{}' scaling must satisfy 1 <= min ({}) <= desired ({}) <= max ({})",
                self.name, self.min_size, self.desired_size, self.max_size
            )));
        }
        if let Some(outside) = self
            .subnet_ids
            .iter()
            .find(|id| !private_subnet_ids.contains(*id))
        {
            return Err(BuildError::contract(format!(
                "node group '{}' subnet {} is not one of the private subnets",
                self.name,
                outside.to_json()
            )));
        }
        if self.disk_size < 0 {
            return Err(BuildError::contract(format!(
                "node group '{}' disk_size must not be negative",
                self.name
            )));
        }
        Ok(())
    }
}

/// Handles produced for a node group
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGroupState {
    pub node_group: ResourceHandle,
    pub arn: Output,
    pub role_arn: Value,
    pub launch_template: Option<ResourceHandle>,
    /// OpenSSH private key, present when remote access is enabled
    pub ssh_private_key: Option<Output>,
}

/// Inputs the node group takes from the cluster
pub(crate) struct NodeGroupContext<'a> {
    pub cluster: &'a ResourceHandle,
    pub node_security_group: &'a ProvisionedGroup,
    pub private_subnet_ids: &'a [Value],
    pub identity: &'a CallerIdentity,
    pub tags: &'a Tags,
}

pub(crate) fn build_node_group(
    plan: &mut Plan,
    spec: &NodeGroupSpec,
    ctx: &NodeGroupContext<'_>,
) -> BuildResult<NodeGroupState> {
    let name = spec.name.as_str();
    let group_tags = merge_tags(&[ctx.tags, &spec.tags]);
    let mut ordering: Vec<ResourceId> = ctx
        .node_security_group
        .handle
        .iter()
        .map(|h| h.id().clone())
        .collect();

    let role_arn = match &spec.existing_node_role_arn {
        Some(arn) => arn.clone(),
        None => {
            let role = plan.register(
                Resource::new(kinds::IAM_ROLE, format!("{}-node", name))
                    .with_attribute("assume_role_policy", trust_policy("", "ec2.amazonaws.com"))
                    .with_attribute("tags", tags::to_value(&group_tags)),
            )?;
            let arns: Vec<String> = WORKER_POLICIES
                .iter()
                .map(|policy| ctx.identity.managed_policy_arn(policy))
                .chain(spec.iam_role_additional_policies.iter().cloned())
                .collect();
            let attachments = attach_policies(plan, &format!("{}-node", name), &role, &arns)?;
            ordering.extend(attachments.iter().map(|h| h.id().clone()));
            role.output("arn").into()
        }
    };

    let subnet_ids = if spec.subnet_ids.is_empty() {
        ctx.private_subnet_ids.to_vec()
    } else {
        spec.subnet_ids.clone()
    };

    let scaling = Value::Map(
        [
            ("min_size", spec.min_size),
            ("max_size", spec.max_size),
            ("desired_size", spec.desired_size),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::Int(i64::from(v))))
        .collect(),
    );

    let mut resource = Resource::new(kinds::EKS_NODE_GROUP, name)
        .with_attribute("cluster_name", ctx.cluster.output("name"))
        .with_attribute("node_group_name", name)
        .with_attribute("node_role_arn", role_arn.clone())
        .with_attribute("subnet_ids", Value::List(subnet_ids))
        .with_attribute("scaling_config", scaling)
        .with_string_if_present("capacity_type", &spec.capacity_type)
        .with_string_if_present("ami_type", &spec.ami_type)
        .with_string_if_present("release_version", &spec.release_version)
        .with_string_if_present("version", &spec.version)
        .with_list_if_present(
            "instance_types",
            spec.instance_types.iter().map(Value::string).collect(),
        )
        .with_list_if_present("taints", spec.taints.iter().map(Taint::to_value).collect())
        .with_flag_if_set("force_update_version", spec.force_update_version);
    if !spec.labels.is_empty() {
        resource = resource.with_attribute("labels", tags::to_value(&spec.labels));
    }
    if !group_tags.is_empty() {
        resource = resource.with_attribute("tags", tags::to_value(&group_tags));
    }

    let ssh_private_key = if spec.enable_remote_access {
        let key = plan.register(
            Resource::new(kinds::TLS_PRIVATE_KEY, name).with_attribute("algorithm", "ED25519"),
        )?;
        let private_key = key.output("private_key_openssh");
        plan.export_secret("worker_nodes_ssh", &private_key);

        let key_pair = plan.register(
            Resource::new(kinds::KEY_PAIR, name)
                .with_attribute("key_name", name)
                .with_attribute("public_key", key.output("public_key_openssh")),
        )?;
        resource = resource.with_attribute(
            "remote_access",
            Value::Map(
                [("ec2_ssh_key".to_string(), key_pair.output("key_name").to_value())]
                    .into_iter()
                    .collect(),
            ),
        );
        Some(private_key)
    } else {
        None
    };

    let mut launch_template = None;
    resource = match &spec.launch_template {
        LaunchTemplateSource::Existing { id, version } => resource.with_attribute(
            "launch_template",
            template_binding(id.clone(), Value::string(version)),
        ),
        LaunchTemplateSource::Custom(template) => {
            let handle = plan.register(launch_template_resource(
                name,
                template,
                &ctx.node_security_group.id,
            ))?;
            let version = Value::Concat(vec![handle.output("latest_version").into()]);
            let binding = template_binding(handle.identifier().into(), version);
            launch_template = Some(handle);
            resource.with_attribute("launch_template", binding)
        }
        LaunchTemplateSource::None => resource.with_int_if_present("disk_size", spec.disk_size),
    };

    let node_group = plan.register(resource.with_depends_on(ordering))?;
    Ok(NodeGroupState {
        arn: node_group.output("arn"),
        node_group,
        role_arn,
        launch_template,
        ssh_private_key,
    })
}

fn template_binding(id: Value, version: Value) -> Value {
    Value::Map(
        [("id".to_string(), id), ("version".to_string(), version)]
            .into_iter()
            .collect(),
    )
}
