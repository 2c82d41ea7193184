//! Resource type names shared by builders and providers

pub const VPC: &str = "ec2.vpc";
pub const VPC_CIDR_ASSOCIATION: &str = "ec2.vpc_ipv4_cidr_block_association";
pub const DHCP_OPTIONS: &str = "ec2.vpc_dhcp_options";
pub const DHCP_OPTIONS_ASSOCIATION: &str = "ec2.vpc_dhcp_options_association";
pub const INTERNET_GATEWAY: &str = "ec2.internet_gateway";
pub const EGRESS_ONLY_INTERNET_GATEWAY: &str = "ec2.egress_only_internet_gateway";
pub const ROUTE_TABLE: &str = "ec2.route_table";
pub const ROUTE: &str = "ec2.route";
pub const ROUTE_TABLE_ASSOCIATION: &str = "ec2.route_table_association";
pub const SUBNET: &str = "ec2.subnet";
pub const EIP: &str = "ec2.eip";
pub const NAT_GATEWAY: &str = "ec2.nat_gateway";
pub const SECURITY_GROUP: &str = "ec2.security_group";
pub const SECURITY_GROUP_RULE: &str = "ec2.security_group_rule";
pub const TAG: &str = "ec2.tag";
pub const KEY_PAIR: &str = "ec2.key_pair";
pub const LAUNCH_TEMPLATE: &str = "ec2.launch_template";

pub const IAM_ROLE: &str = "iam.role";
pub const IAM_ROLE_POLICY_ATTACHMENT: &str = "iam.role_policy_attachment";
pub const IAM_OIDC_PROVIDER: &str = "iam.openid_connect_provider";

pub const EKS_CLUSTER: &str = "eks.cluster";
pub const EKS_NODE_GROUP: &str = "eks.node_group";
pub const EKS_ADDON: &str = "eks.addon";

pub const LOG_GROUP: &str = "cloudwatch.log_group";

pub const TLS_PRIVATE_KEY: &str = "tls.private_key";
/// Data source served by `Provider::fetch_certificate_chain`
pub const TLS_CERTIFICATE: &str = "tls.certificate";
