//! Security groups and their rule sets
//!
//! Created and reused groups share one code path: a group resolves to an id
//! (a forward reference for created groups, the configured id otherwise) and
//! rules are materialized against that id.

use serde::Deserialize;

use crate::error::{BuildError, BuildResult};
use crate::kinds;
use crate::plan::{Plan, ResourceHandle};
use crate::resource::{Resource, ResourceId, Value};
use crate::tags::{self, Tags, merge_tags};
use crate::vpc::validate_ipv4_cidr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Ingress,
    Egress,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Ingress => "ingress",
            RuleKind::Egress => "egress",
        }
    }
}

/// Where the traffic of a rule comes from (or goes to)
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSource {
    CidrBlocks { ipv4: Vec<String>, ipv6: Vec<String> },
    /// The group the rule is attached to
    SelfReference,
    /// A peer security group id
    SecurityGroup(Value),
}

impl RuleSource {
    pub fn cidr(block: &str) -> Self {
        RuleSource::CidrBlocks {
            ipv4: vec![block.to_string()],
            ipv6: Vec::new(),
        }
    }
}

/// One ingress or egress rule
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct SecurityGroupRule {
    pub kind: RuleKind,
    pub from_port: u16,
    pub to_port: u16,
    pub protocol: String,
    pub description: String,
    pub source: RuleSource,
}

impl SecurityGroupRule {
    pub fn ingress(
        port: u16,
        protocol: &str,
        description: impl Into<String>,
        source: RuleSource,
    ) -> Self {
        Self {
            kind: RuleKind::Ingress,
            from_port: port,
            to_port: port,
            protocol: protocol.to_string(),
            description: description.into(),
            source,
        }
    }

    pub fn with_port_range(mut self, from_port: u16, to_port: u16) -> Self {
        self.from_port = from_port;
        self.to_port = to_port;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.from_port > self.to_port {
            return Err(format!(
                "rule '{}': from_port {} is greater than to_port {}",
                self.description, self.from_port, self.to_port
            ));
        }
        if let RuleSource::CidrBlocks { ipv4, .. } = &self.source {
            for block in ipv4 {
                validate_ipv4_cidr(block).map_err(|e| format!("rule '{}': {}", self.description, e))?;
            }
        }
        Ok(())
    }
}

/// Rule as written in configuration; exactly one source must be given
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    kind: RuleKind,
    from_port: u16,
    to_port: u16,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    cidr_blocks: Vec<String>,
    #[serde(default)]
    ipv6_cidr_blocks: Vec<String>,
    #[serde(default, rename = "self")]
    self_reference: bool,
    #[serde(default)]
    source_security_group_id: Option<Value>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl TryFrom<RawRule> for SecurityGroupRule {
    type Error = String;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let has_cidrs = !raw.cidr_blocks.is_empty() || !raw.ipv6_cidr_blocks.is_empty();
        let selected = [
            has_cidrs,
            raw.self_reference,
            raw.source_security_group_id.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if selected != 1 {
            return Err(format!(
                "rule '{}' must set exactly one of cidr_blocks/ipv6_cidr_blocks, self or source_security_group_id ({} set)",
                raw.description, selected
            ));
        }

        let source = if has_cidrs {
            RuleSource::CidrBlocks {
                ipv4: raw.cidr_blocks,
                ipv6: raw.ipv6_cidr_blocks,
            }
        } else if raw.self_reference {
            RuleSource::SelfReference
        } else {
            match raw.source_security_group_id {
                Some(id) => RuleSource::SecurityGroup(id),
                None => return Err(format!("rule '{}' has no source", raw.description)),
            }
        };

        Ok(Self {
            kind: raw.kind,
            from_port: raw.from_port,
            to_port: raw.to_port,
            protocol: raw.protocol,
            description: raw.description,
            source,
        })
    }
}

/// Translate a rule into a rule resource bound to `security_group_id`
pub fn rule_resource(name: &str, rule: &SecurityGroupRule, security_group_id: &Value) -> Resource {
    let resource = Resource::new(kinds::SECURITY_GROUP_RULE, name)
        .with_attribute("type", rule.kind.as_str())
        .with_attribute("from_port", i64::from(rule.from_port))
        .with_attribute("to_port", i64::from(rule.to_port))
        .with_attribute("protocol", rule.protocol.as_str())
        .with_attribute("security_group_id", security_group_id.clone())
        .with_string_if_present("description", &rule.description);

    match &rule.source {
        RuleSource::CidrBlocks { ipv4, ipv6 } => resource
            .with_list_if_present("cidr_blocks", ipv4.iter().map(Value::string).collect())
            .with_list_if_present("ipv6_cidr_blocks", ipv6.iter().map(Value::string).collect()),
        RuleSource::SelfReference => resource.with_attribute("self", true),
        RuleSource::SecurityGroup(peer) => {
            resource.with_attribute("source_security_group_id", peer.clone())
        }
    }
}

/// Mandatory rules of the cluster group
pub fn cluster_default_rules(node_security_group_id: &Value) -> Vec<SecurityGroupRule> {
    vec![SecurityGroupRule::ingress(
        443,
        "tcp",
        "Node groups to cluster API",
        RuleSource::SecurityGroup(node_security_group_id.clone()),
    )]
}

/// Mandatory rules of the node group
pub fn node_default_rules(cluster_security_group_id: &Value) -> Vec<SecurityGroupRule> {
    let from_cluster = || RuleSource::SecurityGroup(cluster_security_group_id.clone());

    let mut rules = vec![
        SecurityGroupRule::ingress(443, "tcp", "Cluster API to node groups", from_cluster()),
        SecurityGroupRule::ingress(10250, "tcp", "Cluster API to node kubelets", from_cluster()),
        SecurityGroupRule::ingress(53, "tcp", "Node to node CoreDNS", RuleSource::SelfReference),
        SecurityGroupRule::ingress(53, "udp", "Node to node CoreDNS UDP", RuleSource::SelfReference),
        SecurityGroupRule::ingress(
            1025,
            "tcp",
            "Node to node ingress on ephemeral ports",
            RuleSource::SelfReference,
        )
        .with_port_range(1025, 65535),
    ];
    for port in [4443, 6443, 8443, 9443] {
        rules.push(SecurityGroupRule::ingress(
            port,
            "tcp",
            format!("Cluster API to node {}/tcp webhook", port),
            from_cluster(),
        ));
    }
    rules.push(SecurityGroupRule {
        kind: RuleKind::Egress,
        from_port: 0,
        to_port: 0,
        protocol: "-1".to_string(),
        description: "Allow all egress".to_string(),
        source: RuleSource::cidr("0.0.0.0/0"),
    });
    rules
}

fn default_true() -> bool {
    true
}

/// Desired cluster or node security group
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SecurityGroupSpec {
    /// Create the group; when false `existing_security_group_id` is reused
    #[serde(default = "default_true")]
    pub create: bool,
    pub description: String,
    /// Defaults to the network's VPC
    pub vpc_id: Option<Value>,
    pub existing_security_group_id: Option<Value>,
    /// Apply the mandatory rule set in addition to `additional_rules`
    #[serde(default = "default_true")]
    pub enable_default_rules: bool,
    pub additional_rules: Vec<SecurityGroupRule>,
    pub tags: Tags,
}

impl Default for SecurityGroupSpec {
    fn default() -> Self {
        Self {
            create: true,
            description: String::new(),
            vpc_id: None,
            existing_security_group_id: None,
            enable_default_rules: true,
            additional_rules: Vec::new(),
            tags: Tags::new(),
        }
    }
}

impl SecurityGroupSpec {
    pub fn validate(&self, role: &str) -> Result<(), BuildError> {
        if !self.create && self.existing_security_group_id.is_none() {
            return Err(BuildError::contract(format!(
                "{} security group is not created but no existing_security_group_id is set",
                role
            )));
        }
        for rule in &self.additional_rules {
            rule.validate()
                .map_err(|e| BuildError::contract(format!("{} security group {}", role, e)))?;
        }
        Ok(())
    }
}

/// A security group that is part of the plan, either created or reused
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedGroup {
    pub name: String,
    /// Group id to bind rules and resources to
    pub id: Value,
    /// Present when the group is created by this plan
    pub handle: Option<ResourceHandle>,
}

impl ProvisionedGroup {
    fn resource_id(&self) -> Option<ResourceId> {
        self.handle.as_ref().map(|h| h.id().clone())
    }
}

/// Create the group shell, or resolve the reused id
pub fn provision_security_group(
    plan: &mut Plan,
    name: &str,
    spec: &SecurityGroupSpec,
    default_vpc_id: &Value,
    extra_tags: &Tags,
) -> BuildResult<ProvisionedGroup> {
    if !spec.create {
        let id = spec.existing_security_group_id.clone().ok_or_else(|| {
            BuildError::contract(format!("{}: existing_security_group_id is required", name))
        })?;
        return Ok(ProvisionedGroup {
            name: name.to_string(),
            id,
            handle: None,
        });
    }

    let vpc_id = spec.vpc_id.clone().unwrap_or_else(|| default_vpc_id.clone());
    let tags = merge_tags(&[&tags::tag("Name", name), extra_tags, &spec.tags]);
    let handle = plan.register(
        Resource::new(kinds::SECURITY_GROUP, name)
            .with_attribute("name", name)
            .with_string_if_present("description", &spec.description)
            .with_attribute("vpc_id", vpc_id)
            .with_attribute("tags", tags::to_value(&tags)),
    )?;
    Ok(ProvisionedGroup {
        name: name.to_string(),
        id: handle.identifier().into(),
        handle: Some(handle),
    })
}

/// Register `rules` against `group`, ordered after every group in `peers`
pub fn apply_rules(
    plan: &mut Plan,
    group: &ProvisionedGroup,
    rules: &[SecurityGroupRule],
    peers: &[&ProvisionedGroup],
) -> BuildResult<Vec<ResourceHandle>> {
    let ordering: Vec<ResourceId> = std::iter::once(group)
        .chain(peers.iter().copied())
        .filter_map(ProvisionedGroup::resource_id)
        .collect();

    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            let name = format!("{}-{}", group.name, index);
            plan.register(rule_resource(&name, rule, &group.id).with_depends_on(ordering.clone()))
        })
        .collect()
}
