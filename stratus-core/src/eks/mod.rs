//! EKS cluster composition
//!
//! The cluster builder wires security groups, IAM, the cluster itself, IRSA,
//! the managed node group and add-ons on top of an existing network.

pub mod addon;
pub mod launch_template;
pub mod node_group;

use std::collections::HashSet;

use log::{debug, info};
use serde::Deserialize;

use crate::error::{BuildError, BuildResult};
use crate::kinds;
use crate::plan::{Plan, ResourceHandle};
use crate::provider::{CallerIdentity, Provider};
use crate::resource::{Output, Resource, ResourceId, Value};
use crate::security_group::{
    ProvisionedGroup, SecurityGroupRule, SecurityGroupSpec, apply_rules, cluster_default_rules,
    node_default_rules, provision_security_group,
};
use crate::tags::{self, Tags};
use crate::vpc::{NetworkState, validate_ipv4_cidr};

pub use addon::{AddonSpec, addon_resource};
pub use launch_template::{LaunchTemplateSpec, launch_template_resource};
pub use node_group::{LaunchTemplateSource, NodeGroupSpec, NodeGroupState, Taint};

use node_group::{NodeGroupContext, build_node_group};

const CLUSTER_POLICIES: [&str; 2] = ["AmazonEKSClusterPolicy", "AmazonEKSServicePolicy"];
const DEFAULT_AUDIENCE: &str = "sts.amazonaws.com";

fn default_true() -> bool {
    true
}

fn default_retention() -> i64 {
    90
}

/// CloudWatch log group for control plane logs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogGroupSpec {
    pub retention_in_days: i64,
    pub kms_key_id: String,
}

impl Default for LogGroupSpec {
    fn default() -> Self {
        Self {
            retention_in_days: default_retention(),
            kms_key_id: String::new(),
        }
    }
}

/// IAM roles for service accounts
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IrsaSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub custom_thumbprints: Vec<String>,
    /// Client ids of the OIDC provider; defaults to `sts.amazonaws.com`
    pub audiences: Vec<String>,
}

impl Default for IrsaSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_thumbprints: Vec::new(),
            audiences: Vec::new(),
        }
    }
}

/// Desired EKS cluster
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    pub name: String,
    pub version: String,
    pub service_ipv4_cidr: String,
    pub endpoint_private_access: bool,
    #[serde(default = "default_true")]
    pub endpoint_public_access: bool,
    pub endpoint_public_access_cidrs: Vec<String>,
    pub additional_security_group_ids: Vec<Value>,
    pub enabled_log_types: Vec<String>,
    pub cluster_security_group: SecurityGroupSpec,
    pub node_security_group: SecurityGroupSpec,
    pub iam_role_additional_policy_arns: Vec<String>,
    /// Create `/aws/eks/<name>/cluster` when present
    pub cloudwatch_log_group: Option<LogGroupSpec>,
    /// Allow the cluster role to use KMS for secrets encryption
    pub attach_encryption_policy: bool,
    pub irsa: IrsaSpec,
    pub node_group: Option<NodeGroupSpec>,
    pub addons: Vec<AddonSpec>,
    pub tags: Tags,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            service_ipv4_cidr: String::new(),
            endpoint_private_access: false,
            endpoint_public_access: true,
            endpoint_public_access_cidrs: Vec::new(),
            additional_security_group_ids: Vec::new(),
            enabled_log_types: Vec::new(),
            cluster_security_group: SecurityGroupSpec::default(),
            node_security_group: SecurityGroupSpec::default(),
            iam_role_additional_policy_arns: Vec::new(),
            cloudwatch_log_group: None,
            attach_encryption_policy: false,
            irsa: IrsaSpec::default(),
            node_group: None,
            addons: Vec::new(),
            tags: Tags::new(),
        }
    }
}

impl ClusterSpec {
    /// Check the composition contract against the network the cluster joins
    pub fn validate(&self, network: &ClusterNetwork) -> BuildResult<()> {
        if self.name.is_empty() {
            return Err(BuildError::contract("cluster name must not be empty"));
        }
        if network.private_subnet_ids.is_empty() {
            return Err(BuildError::contract(format!(
                "cluster '{}' needs at least one private subnet",
                self.name
            )));
        }
        for cidr in self
            .endpoint_public_access_cidrs
            .iter()
            .chain(Some(&self.service_ipv4_cidr).filter(|c| !c.is_empty()))
        {
            validate_ipv4_cidr(cidr).map_err(BuildError::contract)?;
        }
        self.cluster_security_group.validate("cluster")?;
        self.node_security_group.validate("node")?;

        if let Some(node_group) = &self.node_group {
            node_group.validate(&network.private_subnet_ids)?;
        }
        if let Some(log_group) = &self.cloudwatch_log_group
            && log_group.retention_in_days < 0
        {
            return Err(BuildError::contract("log retention must not be negative"));
        }

        let mut seen = HashSet::new();
        for addon in &self.addons {
            if addon.name.is_empty() {
                return Err(BuildError::contract("add-on name must not be empty"));
            }
            if !seen.insert(addon.name.as_str()) {
                return Err(BuildError::contract(format!(
                    "add-on '{}' is listed twice",
                    addon.name
                )));
            }
        }
        Ok(())
    }
}

/// Network identifiers the cluster consumes
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterNetwork {
    pub vpc_id: Value,
    pub private_subnet_ids: Vec<Value>,
}

impl From<&NetworkState> for ClusterNetwork {
    fn from(state: &NetworkState) -> Self {
        Self {
            vpc_id: state.vpc_id.to_value(),
            private_subnet_ids: state.private_subnet_ids.iter().map(Output::to_value).collect(),
        }
    }
}

/// Handles produced for a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterState {
    pub cluster: ResourceHandle,
    pub name: Output,
    pub arn: Output,
    pub endpoint: Output,
    pub oidc_issuer: Output,
    pub cluster_security_group_id: Value,
    pub node_security_group_id: Value,
    pub oidc_provider_arn: Option<Output>,
    pub node_group: Option<NodeGroupState>,
    pub addons: Vec<ResourceHandle>,
    pub identity: CallerIdentity,
}

/// Assume-role policy for an AWS service principal
pub(crate) fn trust_policy(sid: &str, service: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": sid,
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

fn inline_policy(name: &str, document: serde_json::Value) -> Value {
    Value::Map(
        [
            ("name".to_string(), Value::string(name)),
            ("policy".to_string(), Value::string(document.to_string())),
        ]
        .into_iter()
        .collect(),
    )
}

/// One attachment per ARN, named `<prefix>-<index>`
pub(crate) fn attach_policies(
    plan: &mut Plan,
    prefix: &str,
    role: &ResourceHandle,
    arns: &[String],
) -> BuildResult<Vec<ResourceHandle>> {
    arns.iter()
        .enumerate()
        .map(|(index, arn)| {
            plan.register(
                Resource::new(kinds::IAM_ROLE_POLICY_ATTACHMENT, format!("{}-{}", prefix, index))
                    .with_attribute("role", role.output("name"))
                    .with_attribute("policy_arn", arn.as_str()),
            )
        })
        .collect()
}

/// Registers an EKS cluster, its node group and add-ons
pub struct ClusterBuilder<'a, P: Provider> {
    spec: &'a ClusterSpec,
    provider: &'a P,
}

impl<'a, P: Provider> ClusterBuilder<'a, P> {
    pub fn new(spec: &'a ClusterSpec, provider: &'a P) -> Self {
        Self { spec, provider }
    }

    pub async fn build(&self, plan: &mut Plan, network: &ClusterNetwork) -> BuildResult<ClusterState> {
        let spec = self.spec;
        spec.validate(network)?;

        let identity = self
            .provider
            .caller_identity()
            .await
            .map_err(BuildError::Lookup)?;
        info!(
            "building cluster '{}' in partition {} for account {}",
            spec.name, identity.partition, identity.account_id
        );
        plan.export("partition", identity.partition.as_str());

        let name = spec.name.as_str();
        let cluster_sg = provision_security_group(
            plan,
            &format!("{}-cluster", name),
            &spec.cluster_security_group,
            &network.vpc_id,
            &spec.tags,
        )?;
        let node_sg = provision_security_group(
            plan,
            &format!("{}-node", name),
            &spec.node_security_group,
            &network.vpc_id,
            &spec.tags,
        )?;
        self.security_group_rules(
            plan,
            &cluster_sg,
            &node_sg,
            &spec.cluster_security_group,
            cluster_default_rules(&node_sg.id),
        )?;

        let role = self.cluster_role(plan)?;
        let arns: Vec<String> = CLUSTER_POLICIES
            .iter()
            .map(|policy| identity.managed_policy_arn(policy))
            .chain(spec.iam_role_additional_policy_arns.iter().cloned())
            .collect();
        let attachments = attach_policies(plan, name, &role, &arns)?;

        let cluster = self.cluster(plan, network, &role, &cluster_sg, &attachments)?;
        let cluster_name = cluster.output("name");

        for (index, subnet) in network.private_subnet_ids.iter().enumerate() {
            plan.register(
                Resource::new(kinds::TAG, format!("{}-{}", name, index))
                    .with_attribute("resource_id", subnet.clone())
                    .with_attribute(
                        "key",
                        Value::Concat(vec![
                            Value::string("kubernetes.io/cluster/"),
                            cluster_name.to_value(),
                        ]),
                    )
                    .with_attribute("value", "owned")
                    .with_depends_on([cluster.id().clone()]),
            )?;
        }

        if let Some(log_group) = &spec.cloudwatch_log_group {
            plan.register(
                Resource::new(kinds::LOG_GROUP, name)
                    .with_attribute("name", format!("/aws/eks/{}/cluster", name))
                    .with_attribute("retention_in_days", log_group.retention_in_days)
                    .with_string_if_present("kms_key_id", &log_group.kms_key_id)
                    .with_attribute("tags", tags::to_value(&spec.tags)),
            )?;
        }

        let oidc_issuer = cluster.output("identities.0.oidc.0.issuer");
        let oidc_provider_arn = if spec.irsa.enabled {
            Some(self.oidc_provider(plan, &oidc_issuer)?)
        } else {
            None
        };

        self.security_group_rules(
            plan,
            &node_sg,
            &cluster_sg,
            &spec.node_security_group,
            node_default_rules(&cluster_sg.id),
        )?;

        let node_group = match &spec.node_group {
            Some(node_group) => Some(build_node_group(
                plan,
                node_group,
                &NodeGroupContext {
                    cluster: &cluster,
                    node_security_group: &node_sg,
                    private_subnet_ids: &network.private_subnet_ids,
                    identity: &identity,
                    tags: &spec.tags,
                },
            )?),
            None => None,
        };

        let mut anchors = vec![cluster.id().clone()];
        if let Some(node_group) = &node_group {
            anchors.push(node_group.node_group.id().clone());
        }
        let mut addons = Vec::with_capacity(spec.addons.len());
        for addon in &spec.addons {
            let tags = tags::merge_tags(&[&spec.tags, &addon.tags]);
            addons.push(plan.register(addon_resource(addon, &cluster_name, &tags, anchors.clone()))?);
        }

        plan.export("cluster_name", &cluster_name);
        plan.export("cluster_arn", cluster.output("arn"));
        plan.export("cluster_endpoint", cluster.output("endpoint"));
        if let Some(node_group) = &node_group {
            plan.export("node_group_arn", &node_group.arn);
        }
        if let Some(arn) = &oidc_provider_arn {
            plan.export("oidc_provider_arn", arn);
        }
        debug!(
            "cluster '{}': {} add-ons, node group {}",
            name,
            addons.len(),
            if node_group.is_some() { "registered" } else { "skipped" }
        );

        Ok(ClusterState {
            name: cluster_name,
            arn: cluster.output("arn"),
            endpoint: cluster.output("endpoint"),
            oidc_issuer,
            cluster_security_group_id: cluster_sg.id,
            node_security_group_id: node_sg.id,
            oidc_provider_arn,
            node_group,
            addons,
            identity,
            cluster,
        })
    }

    /// Mandatory rules (unless disabled) followed by the caller's rules
    fn security_group_rules(
        &self,
        plan: &mut Plan,
        group: &ProvisionedGroup,
        peer: &ProvisionedGroup,
        spec: &SecurityGroupSpec,
        defaults: Vec<SecurityGroupRule>,
    ) -> BuildResult<()> {
        let mut rules = if spec.enable_default_rules {
            defaults
        } else {
            Vec::new()
        };
        rules.extend(spec.additional_rules.iter().cloned());
        apply_rules(plan, group, &rules, &[peer])?;
        Ok(())
    }

    fn cluster_role(&self, plan: &mut Plan) -> BuildResult<ResourceHandle> {
        let spec = self.spec;
        let mut inline_policies = Vec::new();
        if spec.cloudwatch_log_group.is_some() {
            inline_policies.push(inline_policy(
                "cloudwatch",
                serde_json::json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Deny",
                        "Resource": "*",
                        "Action": "logs:CreateLogGroup"
                    }]
                }),
            ));
        }
        if spec.attach_encryption_policy {
            inline_policies.push(inline_policy(
                "kms",
                serde_json::json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Resource": "*",
                        "Action": ["kms:Encrypt", "kms:Decrypt", "kms:ListGrants", "kms:DescribeKey"]
                    }]
                }),
            ));
        }

        plan.register(
            Resource::new(kinds::IAM_ROLE, spec.name.as_str())
                .with_attribute(
                    "assume_role_policy",
                    trust_policy("EKSClusterAssumeRole", "eks.amazonaws.com"),
                )
                .with_list_if_present("inline_policies", inline_policies)
                .with_attribute("tags", tags::to_value(&spec.tags)),
        )
    }

    fn cluster(
        &self,
        plan: &mut Plan,
        network: &ClusterNetwork,
        role: &ResourceHandle,
        cluster_sg: &ProvisionedGroup,
        attachments: &[ResourceHandle],
    ) -> BuildResult<ResourceHandle> {
        let spec = self.spec;
        let mut security_group_ids = vec![cluster_sg.id.clone()];
        security_group_ids.extend(spec.additional_security_group_ids.iter().cloned());

        let mut vpc_config = vec![
            (
                "subnet_ids".to_string(),
                Value::List(network.private_subnet_ids.clone()),
            ),
            ("security_group_ids".to_string(), Value::List(security_group_ids)),
            (
                "endpoint_private_access".to_string(),
                Value::Bool(spec.endpoint_private_access),
            ),
            (
                "endpoint_public_access".to_string(),
                Value::Bool(spec.endpoint_public_access),
            ),
        ];
        if !spec.endpoint_public_access_cidrs.is_empty() {
            vpc_config.push((
                "public_access_cidrs".to_string(),
                Value::string_list(spec.endpoint_public_access_cidrs.iter().cloned()),
            ));
        }

        let mut network_config = vec![("ip_family".to_string(), Value::string("ipv4"))];
        if !spec.service_ipv4_cidr.is_empty() {
            network_config.push((
                "service_ipv4_cidr".to_string(),
                Value::string(&spec.service_ipv4_cidr),
            ));
        }

        let ordering: Vec<ResourceId> = attachments.iter().map(|h| h.id().clone()).collect();
        plan.register(
            Resource::new(kinds::EKS_CLUSTER, spec.name.as_str())
                .with_attribute("name", spec.name.as_str())
                .with_attribute("role_arn", role.output("arn"))
                .with_attribute("vpc_config", Value::Map(vpc_config.into_iter().collect()))
                .with_attribute(
                    "kubernetes_network_config",
                    Value::Map(network_config.into_iter().collect()),
                )
                .with_string_if_present("version", &spec.version)
                .with_list_if_present(
                    "enabled_cluster_log_types",
                    spec.enabled_log_types.iter().map(Value::string).collect(),
                )
                .with_attribute("tags", tags::to_value(&spec.tags))
                .with_depends_on(ordering),
        )
    }

    /// Trust the cluster's OIDC issuer, pinned by the issuer's certificate
    fn oidc_provider(&self, plan: &mut Plan, issuer: &Output) -> BuildResult<Output> {
        let spec = self.spec;
        let certificate = plan.lookup(
            Resource::new(kinds::TLS_CERTIFICATE, spec.name.as_str()).with_attribute("url", issuer),
        )?;

        let mut thumbprints: Vec<Value> = vec![certificate.output("certificates.0.sha1_fingerprint").into()];
        thumbprints.extend(spec.irsa.custom_thumbprints.iter().map(Value::string));
        let audiences = if spec.irsa.audiences.is_empty() {
            Value::string_list([DEFAULT_AUDIENCE])
        } else {
            Value::string_list(spec.irsa.audiences.iter().cloned())
        };

        let provider = plan.register(
            Resource::new(kinds::IAM_OIDC_PROVIDER, spec.name.as_str())
                .with_attribute("url", issuer)
                .with_attribute("client_id_list", audiences)
                .with_attribute("thumbprint_list", Value::List(thumbprints))
                .with_attribute("tags", tags::to_value(&spec.tags)),
        )?;
        Ok(provider.output("arn"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_policy_names_service() {
        let policy: serde_json::Value =
            serde_json::from_str(&trust_policy("EKSClusterAssumeRole", "eks.amazonaws.com")).unwrap();
        assert_eq!(
            policy["Statement"][0]["Principal"]["Service"],
            "eks.amazonaws.com"
        );
        assert_eq!(policy["Statement"][0]["Sid"], "EKSClusterAssumeRole");
    }

    #[test]
    fn cluster_spec_defaults_from_json() {
        let spec: ClusterSpec = serde_json::from_value(serde_json::json!({
            "name": "dev",
            "addons": [{"name": "vpc-cni"}, {"name": "coredns", "version": "v1.11.1-eksbuild.4"}]
        }))
        .unwrap();
        assert!(spec.irsa.enabled);
        assert!(spec.endpoint_public_access);
        assert!(spec.cluster_security_group.create);
        assert!(spec.node_group.is_none());
        assert_eq!(spec.addons.len(), 2);
    }

    #[test]
    fn duplicate_addons_violate_contract() {
        let spec = ClusterSpec {
            name: "dev".to_string(),
            addons: vec![AddonSpec::named("vpc-cni"), AddonSpec::named("vpc-cni")],
            ..Default::default()
        };
        let network = ClusterNetwork {
            vpc_id: Value::string("vpc-1"),
            private_subnet_ids: vec![Value::string("subnet-a")],
        };
        assert!(matches!(spec.validate(&network), Err(BuildError::Contract(_))));
    }

    #[test]
    fn empty_private_subnets_violate_contract() {
        let spec = ClusterSpec {
            name: "dev".to_string(),
            ..Default::default()
        };
        let network = ClusterNetwork {
            vpc_id: Value::string("vpc-1"),
            private_subnet_ids: Vec::new(),
        };
        assert!(spec.validate(&network).is_err());
    }
}
