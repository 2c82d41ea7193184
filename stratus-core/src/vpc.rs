//! Network topology: VPC, gateways, routing and per-AZ subnets

use std::collections::HashSet;

use log::debug;
use serde::Deserialize;

use crate::error::{BuildError, BuildResult};
use crate::kinds;
use crate::plan::{Plan, ResourceHandle};
use crate::resource::{Output, Resource, Value};
use crate::tags::{self, Tags, merge_tags};

/// Validate an IPv4 CIDR block (x.x.x.x/n)
pub fn validate_ipv4_cidr(cidr: &str) -> Result<(), String> {
    let Some((address, prefix)) = cidr.split_once('/') else {
        return Err(format!("CIDR block '{}' must be in format x.x.x.x/n", cidr));
    };
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() != 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return Err(format!("Invalid IP address in CIDR block '{}'", cidr));
    }
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("Invalid prefix length in CIDR block '{}'", cidr))?;
    if prefix > 32 {
        return Err(format!(
            "Prefix length of '{}' must be between 0 and 32",
            cidr
        ));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_destination() -> String {
    "0.0.0.0/0".to_string()
}

/// Per-tier subnet settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SubnetSpec {
    /// One CIDR per availability zone, in AZ order
    pub cidrs: Vec<String>,
    pub map_public_ip_on_launch: bool,
    pub assign_ipv6_address_on_creation: bool,
    pub enable_dns64: bool,
    pub enable_resource_name_dns_a_record_on_launch: bool,
    pub enable_resource_name_dns_aaaa_record_on_launch: bool,
    pub private_dns_hostname_type_on_launch: String,
    pub tags: Tags,
    pub route_table_tags: Tags,
}

/// NAT gateway cardinality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatMode {
    /// One NAT gateway and one private route table shared by every AZ
    Single,
    /// One NAT gateway and private route table per AZ
    #[default]
    PerAz,
}

impl NatMode {
    pub fn gateway_count(&self, az_count: usize) -> usize {
        match self {
            NatMode::Single => 1,
            NatMode::PerAz => az_count,
        }
    }

    /// Index of the private route table serving AZ `az_index`
    pub fn route_table_index(&self, az_index: usize) -> usize {
        match self {
            NatMode::Single => 0,
            NatMode::PerAz => az_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NatGatewaySpec {
    pub mode: NatMode,
    /// Destination of the private default route
    pub destination_cidr_block: String,
    pub nat_gateway_tags: Tags,
    pub eip_tags: Tags,
}

impl Default for NatGatewaySpec {
    fn default() -> Self {
        Self {
            mode: NatMode::default(),
            destination_cidr_block: default_destination(),
            nat_gateway_tags: Tags::new(),
            eip_tags: Tags::new(),
        }
    }
}

/// DHCP option set; only created when present
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DhcpOptionsSpec {
    pub domain_name: String,
    pub domain_name_servers: Vec<String>,
    pub netbios_name_servers: Vec<String>,
    pub netbios_node_type: Option<String>,
    pub ntp_servers: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InternetGatewaySpec {
    pub create_egress_only: bool,
    pub tags: Tags,
}

/// Desired VPC topology
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    pub name: String,
    pub cidr: String,
    pub azs: Vec<String>,
    /// Additional VPC CIDRs, at most one per AZ
    pub secondary_cidrs: Vec<String>,
    pub instance_tenancy: String,
    #[serde(default = "default_true")]
    pub enable_dns_support: bool,
    pub enable_dns_hostnames: bool,
    pub enable_network_address_usage_metrics: bool,
    pub public_subnet: SubnetSpec,
    pub private_subnet: SubnetSpec,
    pub nat_gateway: NatGatewaySpec,
    pub dhcp_options: Option<DhcpOptionsSpec>,
    pub internet_gateway: InternetGatewaySpec,
    pub tags: Tags,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            cidr: String::new(),
            azs: Vec::new(),
            secondary_cidrs: Vec::new(),
            instance_tenancy: String::new(),
            enable_dns_support: true,
            enable_dns_hostnames: false,
            enable_network_address_usage_metrics: false,
            public_subnet: SubnetSpec::default(),
            private_subnet: SubnetSpec::default(),
            nat_gateway: NatGatewaySpec::default(),
            dhcp_options: None,
            internet_gateway: InternetGatewaySpec::default(),
            tags: Tags::new(),
        }
    }
}

impl NetworkSpec {
    /// Check the composition contract; nothing is registered on failure
    pub fn validate(&self) -> BuildResult<()> {
        let contract = |e: String| BuildError::contract(e);

        if self.name.is_empty() {
            return Err(BuildError::contract("network name must not be empty"));
        }
        if self.azs.is_empty() {
            return Err(BuildError::contract("at least one availability zone is required"));
        }
        let mut seen = HashSet::new();
        if let Some(az) = self.azs.iter().find(|az| !seen.insert(az.as_str())) {
            return Err(BuildError::contract(format!(
                "availability zone '{}' is listed more than once",
                az
            )));
        }
        validate_ipv4_cidr(&self.cidr).map_err(contract)?;

        for (tier, subnet) in [("public", &self.public_subnet), ("private", &self.private_subnet)] {
            if subnet.cidrs.len() != self.azs.len() {
                return Err(BuildError::contract(format!(
                    "{} {} subnet CIDRs for {} availability zones",
                    subnet.cidrs.len(),
                    tier,
                    self.azs.len()
                )));
            }
            for cidr in &subnet.cidrs {
                validate_ipv4_cidr(cidr).map_err(contract)?;
            }
        }

        if self.secondary_cidrs.len() > self.azs.len() {
            return Err(BuildError::contract(format!(
                "{} secondary CIDRs exceed {} availability zones",
                self.secondary_cidrs.len(),
                self.azs.len()
            )));
        }
        for cidr in &self.secondary_cidrs {
            validate_ipv4_cidr(cidr).map_err(contract)?;
        }
        validate_ipv4_cidr(&self.nat_gateway.destination_cidr_block).map_err(contract)?;

        if let Some(dhcp) = &self.dhcp_options
            && dhcp.domain_name.is_empty()
        {
            return Err(BuildError::contract("DHCP options require a domain_name"));
        }
        Ok(())
    }
}

/// Identifiers produced by the network; lists are AZ-index-aligned
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkState {
    pub vpc: ResourceHandle,
    pub vpc_id: Output,
    pub internet_gateway_id: Output,
    pub egress_only_internet_gateway_id: Option<Output>,
    pub dhcp_options_id: Option<Output>,
    pub public_route_table_id: Output,
    pub public_subnet_ids: Vec<Output>,
    pub nat_gateway_ids: Vec<Output>,
    pub private_route_table_ids: Vec<Output>,
    pub private_subnet_ids: Vec<Output>,
}

/// Registers the network resources of a `NetworkSpec`
pub struct NetworkBuilder<'a> {
    spec: &'a NetworkSpec,
}

impl<'a> NetworkBuilder<'a> {
    pub fn new(spec: &'a NetworkSpec) -> Self {
        Self { spec }
    }

    pub fn build(&self, plan: &mut Plan) -> BuildResult<NetworkState> {
        let spec = self.spec;
        spec.validate()?;
        let name = spec.name.as_str();

        let vpc = plan.register(
            Resource::new(kinds::VPC, name)
                .with_attribute("cidr_block", spec.cidr.as_str())
                .with_string_if_present("instance_tenancy", &spec.instance_tenancy)
                .with_attribute("enable_dns_support", spec.enable_dns_support)
                .with_flag_if_set("enable_dns_hostnames", spec.enable_dns_hostnames)
                .with_flag_if_set(
                    "enable_network_address_usage_metrics",
                    spec.enable_network_address_usage_metrics,
                )
                .with_attribute("tags", tags::to_value(&merge_tags(&[&tags::tag("Name", name), &spec.tags]))),
        )?;
        let vpc_id = vpc.identifier();

        for (cidr, az) in spec.secondary_cidrs.iter().zip(&spec.azs) {
            plan.register(
                Resource::new(kinds::VPC_CIDR_ASSOCIATION, format!("{}-{}", name, az))
                    .with_attribute("vpc_id", &vpc_id)
                    .with_attribute("cidr_block", cidr.as_str()),
            )?;
        }

        let dhcp_options_id = match &spec.dhcp_options {
            Some(dhcp) => Some(self.dhcp_options(plan, dhcp, &vpc_id)?),
            None => None,
        };

        let igw_tags = merge_tags(&[
            &tags::tag("Name", name),
            &spec.internet_gateway.tags,
            &spec.tags,
        ]);
        let igw = plan.register(
            Resource::new(kinds::INTERNET_GATEWAY, name)
                .with_attribute("vpc_id", &vpc_id)
                .with_attribute("tags", tags::to_value(&igw_tags)),
        )?;
        let egress_only_internet_gateway_id = if spec.internet_gateway.create_egress_only {
            let egress = plan.register(
                Resource::new(kinds::EGRESS_ONLY_INTERNET_GATEWAY, name)
                    .with_attribute("vpc_id", &vpc_id)
                    .with_attribute("tags", tags::to_value(&igw_tags)),
            )?;
            Some(egress.identifier())
        } else {
            None
        };

        let public_route_table = plan.register(
            Resource::new(kinds::ROUTE_TABLE, format!("{}-public", name))
                .with_attribute("vpc_id", &vpc_id)
                .with_attribute(
                    "tags",
                    tags::to_value(&merge_tags(&[
                        &tags::tag("Name", "public"),
                        &spec.public_subnet.tags,
                        &spec.public_subnet.route_table_tags,
                    ])),
                ),
        )?;
        plan.register(
            Resource::new(kinds::ROUTE, format!("{}-internet-route", name))
                .with_attribute("route_table_id", public_route_table.identifier())
                .with_attribute("destination_cidr_block", "0.0.0.0/0")
                .with_attribute("gateway_id", igw.identifier()),
        )?;

        let mut public_subnet_ids = Vec::with_capacity(spec.azs.len());
        for (az, cidr) in spec.azs.iter().zip(&spec.public_subnet.cidrs) {
            let subnet_name = format!("{}-public-{}", name, az);
            let subnet_tags = merge_tags(&[
                &tags::tag("Name", subnet_name.as_str()),
                &tags::tag("kubernetes.io/role/elb", "1"),
                &spec.public_subnet.tags,
                &spec.tags,
            ]);
            let subnet = plan.register(
                subnet_resource(&subnet_name, az, cidr, &spec.public_subnet, &vpc_id, &subnet_tags)
                    .with_flag_if_set(
                        "map_public_ip_on_launch",
                        spec.public_subnet.map_public_ip_on_launch,
                    ),
            )?;
            associate(plan, &subnet_name, subnet.identifier(), public_route_table.identifier())?;
            public_subnet_ids.push(subnet.identifier());
        }

        let nat_count = spec.nat_gateway.mode.gateway_count(spec.azs.len());
        let mut nat_gateway_ids = Vec::with_capacity(nat_count);
        let mut private_route_table_ids = Vec::with_capacity(nat_count);
        for index in 0..nat_count {
            let az = &spec.azs[index];
            let eip = plan.register(
                Resource::new(kinds::EIP, format!("{}{}", name, index))
                    .with_attribute("domain", "vpc")
                    .with_attribute("tags", tags::to_value(&spec.nat_gateway.eip_tags)),
            )?;
            let nat = plan.register(
                Resource::new(kinds::NAT_GATEWAY, format!("{}-natgateway-{}", name, index))
                    .with_attribute("allocation_id", eip.identifier())
                    .with_attribute("subnet_id", &public_subnet_ids[index])
                    .with_attribute(
                        "tags",
                        tags::to_value(&merge_tags(&[&spec.nat_gateway.nat_gateway_tags, &spec.tags])),
                    )
                    .with_depends_on([igw.id().clone()]),
            )?;

            let table_name = format!("private-{}", az);
            let route_table = plan.register(
                Resource::new(kinds::ROUTE_TABLE, format!("{}-{}", name, table_name))
                    .with_attribute("vpc_id", &vpc_id)
                    .with_attribute(
                        "tags",
                        tags::to_value(&merge_tags(&[
                            &tags::tag("Name", table_name.as_str()),
                            &spec.private_subnet.tags,
                            &spec.private_subnet.route_table_tags,
                        ])),
                    ),
            )?;
            plan.register(
                Resource::new(kinds::ROUTE, format!("{}-private-natgateway-{}", name, az))
                    .with_attribute("route_table_id", route_table.identifier())
                    .with_attribute(
                        "destination_cidr_block",
                        spec.nat_gateway.destination_cidr_block.as_str(),
                    )
                    .with_attribute("nat_gateway_id", nat.identifier()),
            )?;

            nat_gateway_ids.push(nat.identifier());
            private_route_table_ids.push(route_table.identifier());
        }

        let mut private_subnet_ids = Vec::with_capacity(spec.azs.len());
        for (index, (az, cidr)) in spec.azs.iter().zip(&spec.private_subnet.cidrs).enumerate() {
            let subnet_name = format!("{}-private-{}", name, az);
            let subnet_tags = merge_tags(&[
                &tags::tag("Name", subnet_name.as_str()),
                &tags::tag("kubernetes.io/role/internal-elb", "1"),
                &spec.private_subnet.tags,
                &spec.tags,
            ]);
            let subnet = plan.register(subnet_resource(
                &subnet_name,
                az,
                cidr,
                &spec.private_subnet,
                &vpc_id,
                &subnet_tags,
            ))?;
            let table = &private_route_table_ids[spec.nat_gateway.mode.route_table_index(index)];
            associate(plan, &subnet_name, subnet.identifier(), table.clone())?;
            private_subnet_ids.push(subnet.identifier());
        }

        debug!(
            "network '{}': {} AZs, {} NAT gateways",
            name,
            spec.azs.len(),
            nat_count
        );

        plan.export("vpc_id", &vpc_id);
        plan.export("public_subnet_ids", outputs_value(&public_subnet_ids));
        plan.export("private_subnet_ids", outputs_value(&private_subnet_ids));

        Ok(NetworkState {
            vpc,
            vpc_id,
            internet_gateway_id: igw.identifier(),
            egress_only_internet_gateway_id,
            dhcp_options_id,
            public_route_table_id: public_route_table.identifier(),
            public_subnet_ids,
            nat_gateway_ids,
            private_route_table_ids,
            private_subnet_ids,
        })
    }

    fn dhcp_options(
        &self,
        plan: &mut Plan,
        dhcp: &DhcpOptionsSpec,
        vpc_id: &Output,
    ) -> BuildResult<Output> {
        let string_list =
            |items: &[String]| items.iter().map(Value::string).collect::<Vec<_>>();
        let options = plan.register(
            Resource::new(kinds::DHCP_OPTIONS, dhcp.domain_name.as_str())
                .with_attribute("domain_name", dhcp.domain_name.as_str())
                .with_list_if_present("domain_name_servers", string_list(&dhcp.domain_name_servers))
                .with_list_if_present("netbios_name_servers", string_list(&dhcp.netbios_name_servers))
                .with_string_if_present(
                    "netbios_node_type",
                    dhcp.netbios_node_type.as_deref().unwrap_or_default(),
                )
                .with_list_if_present("ntp_servers", string_list(&dhcp.ntp_servers))
                .with_attribute(
                    "tags",
                    tags::to_value(&merge_tags(&[
                        &tags::tag("Name", dhcp.domain_name.as_str()),
                        &dhcp.tags,
                        &self.spec.tags,
                    ])),
                ),
        )?;
        plan.register(
            Resource::new(kinds::DHCP_OPTIONS_ASSOCIATION, self.spec.name.as_str())
                .with_attribute("vpc_id", vpc_id)
                .with_attribute("dhcp_options_id", options.identifier()),
        )?;
        Ok(options.identifier())
    }
}

fn subnet_resource(
    name: &str,
    az: &str,
    cidr: &str,
    spec: &SubnetSpec,
    vpc_id: &Output,
    subnet_tags: &Tags,
) -> Resource {
    Resource::new(kinds::SUBNET, name)
        .with_attribute("vpc_id", vpc_id)
        .with_attribute("cidr_block", cidr)
        .with_attribute("availability_zone", az)
        .with_flag_if_set(
            "assign_ipv6_address_on_creation",
            spec.assign_ipv6_address_on_creation,
        )
        .with_flag_if_set("enable_dns64", spec.enable_dns64)
        .with_flag_if_set(
            "enable_resource_name_dns_a_record_on_launch",
            spec.enable_resource_name_dns_a_record_on_launch,
        )
        .with_flag_if_set(
            "enable_resource_name_dns_aaaa_record_on_launch",
            spec.enable_resource_name_dns_aaaa_record_on_launch,
        )
        .with_string_if_present(
            "private_dns_hostname_type_on_launch",
            &spec.private_dns_hostname_type_on_launch,
        )
        .with_attribute("tags", tags::to_value(subnet_tags))
}

fn associate(
    plan: &mut Plan,
    name: &str,
    subnet_id: Output,
    route_table_id: Output,
) -> BuildResult<ResourceHandle> {
    plan.register(
        Resource::new(kinds::ROUTE_TABLE_ASSOCIATION, name)
            .with_attribute("subnet_id", subnet_id)
            .with_attribute("route_table_id", route_table_id),
    )
}

pub(crate) fn outputs_value(outputs: &[Output]) -> Value {
    Value::List(outputs.iter().map(Output::to_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: NatMode) -> NetworkSpec {
        NetworkSpec {
            name: "dev".to_string(),
            cidr: "10.0.0.0/16".to_string(),
            azs: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            public_subnet: SubnetSpec {
                cidrs: vec!["10.0.0.0/24".into(), "10.0.1.0/24".into(), "10.0.2.0/24".into()],
                ..Default::default()
            },
            private_subnet: SubnetSpec {
                cidrs: vec!["10.0.10.0/24".into(), "10.0.11.0/24".into(), "10.0.12.0/24".into()],
                ..Default::default()
            },
            nat_gateway: NatGatewaySpec {
                mode,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn association_table(plan: &Plan, subnet_name: &str) -> Value {
        plan.resources_of_type(kinds::ROUTE_TABLE_ASSOCIATION)
            .find(|r| r.id.name == subnet_name)
            .and_then(|r| r.attribute("route_table_id").cloned())
            .unwrap()
    }

    #[test]
    fn validate_cidr() {
        assert!(validate_ipv4_cidr("10.0.0.0/16").is_ok());
        assert!(validate_ipv4_cidr("0.0.0.0/0").is_ok());
        assert!(validate_ipv4_cidr("10.0.0.0").is_err());
        assert!(validate_ipv4_cidr("10.0.0/16").is_err());
        assert!(validate_ipv4_cidr("10.0.0.256/16").is_err());
        assert!(validate_ipv4_cidr("10.0.0.0/33").is_err());
    }

    #[test]
    fn subnet_cidr_count_must_match_azs() {
        let mut spec = spec(NatMode::Single);
        spec.public_subnet.cidrs.pop();
        let mut plan = Plan::new("dev");
        let err = NetworkBuilder::new(&spec).build(&mut plan).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: 2 public subnet CIDRs for 3 availability zones"
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn duplicate_availability_zones_are_rejected() {
        let mut spec = spec(NatMode::PerAz);
        spec.azs = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let mut plan = Plan::new("dev");
        let err = NetworkBuilder::new(&spec).build(&mut plan).unwrap_err();
        assert!(matches!(err, BuildError::Contract(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: availability zone 'a' is listed more than once"
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn contract_violations() {
        let mut empty_azs = spec(NatMode::Single);
        empty_azs.azs.clear();
        assert!(empty_azs.validate().is_err());

        let mut too_many_secondary = spec(NatMode::Single);
        too_many_secondary.secondary_cidrs = vec!["100.64.0.0/16".into(); 4];
        assert!(too_many_secondary.validate().is_err());

        let mut malformed = spec(NatMode::Single);
        malformed.private_subnet.cidrs[1] = "10.0.11.0".into();
        assert!(malformed.validate().is_err());
    }

    #[test]
    fn single_nat_routes_every_private_subnet_to_table_zero() {
        let mut plan = Plan::new("dev");
        let state = NetworkBuilder::new(&spec(NatMode::Single)).build(&mut plan).unwrap();

        assert_eq!(state.public_subnet_ids.len(), 3);
        assert_eq!(state.private_subnet_ids.len(), 3);
        assert_eq!(state.nat_gateway_ids.len(), 1);
        assert_eq!(state.private_route_table_ids.len(), 1);
        for az in ["a", "b", "c"] {
            assert_eq!(
                association_table(&plan, &format!("dev-private-{}", az)),
                state.private_route_table_ids[0].to_value()
            );
        }
    }

    #[test]
    fn per_az_nat_routes_subnet_to_matching_table() {
        let mut plan = Plan::new("dev");
        let state = NetworkBuilder::new(&spec(NatMode::PerAz)).build(&mut plan).unwrap();

        assert_eq!(state.nat_gateway_ids.len(), 3);
        assert_eq!(state.private_route_table_ids.len(), 3);
        for (index, az) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(
                association_table(&plan, &format!("dev-private-{}", az)),
                state.private_route_table_ids[index].to_value()
            );
        }
    }

    #[test]
    fn nat_gateway_ordered_after_internet_gateway() {
        let mut plan = Plan::new("dev");
        NetworkBuilder::new(&spec(NatMode::Single)).build(&mut plan).unwrap();
        let nat = plan.resources_of_type(kinds::NAT_GATEWAY).next().unwrap();
        assert_eq!(nat.depends_on[0].resource_type, kinds::INTERNET_GATEWAY);
        assert_eq!(
            nat.attribute("subnet_id"),
            Some(&Value::Ref(
                crate::resource::ResourceId::new(kinds::SUBNET, "dev-public-a").attr("id")
            ))
        );
    }

    #[test]
    fn optional_features_are_spliced_only_when_requested() {
        let mut plan = Plan::new("dev");
        let state = NetworkBuilder::new(&spec(NatMode::Single)).build(&mut plan).unwrap();
        assert!(state.dhcp_options_id.is_none());
        assert!(state.egress_only_internet_gateway_id.is_none());
        assert_eq!(plan.resources_of_type(kinds::DHCP_OPTIONS).count(), 0);
        assert_eq!(plan.resources_of_type(kinds::VPC_CIDR_ASSOCIATION).count(), 0);

        let mut full = spec(NatMode::Single);
        full.secondary_cidrs = vec!["100.64.0.0/16".into()];
        full.internet_gateway.create_egress_only = true;
        full.dhcp_options = Some(DhcpOptionsSpec {
            domain_name: "corp.internal".into(),
            domain_name_servers: vec!["AmazonProvidedDNS".into()],
            ..Default::default()
        });
        let mut plan = Plan::new("dev");
        let state = NetworkBuilder::new(&full).build(&mut plan).unwrap();
        assert!(state.dhcp_options_id.is_some());
        assert!(state.egress_only_internet_gateway_id.is_some());
        assert_eq!(plan.resources_of_type(kinds::DHCP_OPTIONS_ASSOCIATION).count(), 1);
        let association = plan.resources_of_type(kinds::VPC_CIDR_ASSOCIATION).next().unwrap();
        assert_eq!(association.id.name, "dev-a");
    }

    #[test]
    fn subnet_tags_merge_in_order() {
        let mut spec = spec(NatMode::Single);
        spec.tags = tags::tag("team", "platform");
        spec.public_subnet.tags = tags::tag("tier", "public");
        let mut plan = Plan::new("dev");
        NetworkBuilder::new(&spec).build(&mut plan).unwrap();

        let subnet = plan
            .resources_of_type(kinds::SUBNET)
            .find(|r| r.id.name == "dev-public-b")
            .unwrap();
        let tags = subnet.attribute("tags").and_then(Value::as_map).unwrap();
        assert_eq!(tags.get("Name"), Some(&Value::string("dev-public-b")));
        assert_eq!(tags.get("kubernetes.io/role/elb"), Some(&Value::string("1")));
        assert_eq!(tags.get("tier"), Some(&Value::string("public")));
        assert_eq!(tags.get("team"), Some(&Value::string("platform")));
    }

    #[test]
    fn exports_network_ids() {
        let mut plan = Plan::new("dev");
        NetworkBuilder::new(&spec(NatMode::PerAz)).build(&mut plan).unwrap();
        let names: Vec<&str> = plan.exports().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["vpc_id", "public_subnet_ids", "private_subnet_ids"]);
    }

    #[test]
    fn nat_mode_from_json() {
        let spec: NatGatewaySpec = serde_json::from_value(serde_json::json!({"mode": "single"})).unwrap();
        assert_eq!(spec.mode, NatMode::Single);
        assert_eq!(spec.destination_cidr_block, "0.0.0.0/0");
        assert_eq!(NatGatewaySpec::default().mode, NatMode::PerAz);
    }
}
