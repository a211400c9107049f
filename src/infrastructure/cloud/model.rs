// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shapes of the remote resources exchanged with the load-balancer and EC2 APIs.
//!
//! Fields that the API may omit are `Option`s; an absent value and an empty one
//! are not interchangeable (an absent certificate ARN is not the same listener as
//! one with an empty ARN).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::shared::error::LbError;

/// Listener and target protocols understood by both load-balancer generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    TcpUdp,
    Tls,
    Ssl,
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::TcpUdp => "TCP_UDP",
            Protocol::Tls => "TLS",
            Protocol::Ssl => "SSL",
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
        }
    }

    /// Lowercase spelling used by classic ELB listeners.
    pub fn classic_name(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = LbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "TCP_UDP" => Ok(Protocol::TcpUdp),
            "TLS" => Ok(Protocol::Tls),
            "SSL" => Ok(Protocol::Ssl),
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            _ => Err(LbError::validation(format!("Unsupported protocol '{}'", s))),
        }
    }
}

// ---------------------------------------------------------------------------
// EC2
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub cidr_ip: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdGroupPair {
    pub group_id: String,
    pub user_id: Option<String>,
    pub description: Option<String>,
}

/// One inbound rule entry of a security group.
///
/// EC2 groups entries that share protocol and ports, so a described permission
/// may carry several ranges or peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPermission {
    pub ip_protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    #[serde(default)]
    pub ip_ranges: Vec<IpRange>,
    #[serde(default)]
    pub user_id_group_pairs: Vec<UserIdGroupPair>,
}

impl IpPermission {
    pub fn cidr(
        protocol: impl Into<String>,
        from_port: i32,
        to_port: i32,
        cidr: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            ip_protocol: protocol.into(),
            from_port: Some(from_port),
            to_port: Some(to_port),
            ip_ranges: vec![IpRange {
                cidr_ip: cidr.into(),
                description,
            }],
            user_id_group_pairs: Vec::new(),
        }
    }

    /// All traffic from members of `group_id`.
    pub fn from_group(group_id: impl Into<String>) -> Self {
        Self {
            ip_protocol: "-1".to_string(),
            from_port: None,
            to_port: None,
            ip_ranges: Vec::new(),
            user_id_group_pairs: vec![UserIdGroupPair {
                group_id: group_id.into(),
                user_id: None,
                description: None,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub ip_permissions: Vec<IpPermission>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityGroupFilter {
    All,
    Ids(Vec<String>),
    NameInVpc { name: String, vpc_id: String },
    /// Groups holding a rule whose source is the given group.
    IngressFromGroup(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSecurityGroupRequest {
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupIdentifier {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub availability_zone: String,
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<GroupIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub cidr_block: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Subnet {
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubnetFilter {
    Ids(Vec<String>),
    Vpc(String),
}

// ---------------------------------------------------------------------------
// Classic ELB
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicListener {
    pub protocol: String,
    pub load_balancer_port: i32,
    pub instance_protocol: Option<String>,
    pub instance_port: i32,
    pub ssl_certificate_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicListenerDescription {
    pub listener: ClassicListener,
    #[serde(default)]
    pub policy_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendServerDescription {
    pub instance_port: i32,
    pub policy_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicHealthCheck {
    pub target: String,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
    pub interval: i32,
    pub timeout: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicLoadBalancer {
    pub name: String,
    pub dns_name: String,
    pub scheme: String,
    pub vpc_id: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub listener_descriptions: Vec<ClassicListenerDescription>,
    pub backend_server_descriptions: Vec<BackendServerDescription>,
    pub instances: Vec<String>,
    pub health_check: Option<ClassicHealthCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateClassicLoadBalancerRequest {
    pub name: String,
    pub listeners: Vec<ClassicListener>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub internal: bool,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLog {
    pub enabled: bool,
    pub emit_interval: Option<i64>,
    pub s3_bucket_name: Option<String>,
    pub s3_bucket_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDraining {
    pub enabled: bool,
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicAttributes {
    pub access_log: AccessLog,
    pub connection_draining: ConnectionDraining,
    pub idle_timeout: i64,
    pub cross_zone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDescription {
    pub name: String,
    pub type_name: String,
    pub attributes: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Network load balancer (ELBv2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalancerState {
    Provisioning,
    Active,
    ActiveImpaired,
    Failed,
}

impl LoadBalancerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerState::Provisioning => "provisioning",
            LoadBalancerState::Active => "active",
            LoadBalancerState::ActiveImpaired => "active_impaired",
            LoadBalancerState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub zone_name: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLoadBalancer {
    pub arn: String,
    pub name: String,
    pub dns_name: String,
    pub scheme: String,
    pub vpc_id: String,
    pub state: LoadBalancerState,
    pub availability_zones: Vec<AvailabilityZone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetMapping {
    pub subnet_id: String,
    pub allocation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNetworkLoadBalancerRequest {
    pub name: String,
    pub internal: bool,
    pub subnet_mappings: Vec<SubnetMapping>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkListener {
    pub arn: String,
    pub load_balancer_arn: String,
    pub port: i32,
    pub protocol: Protocol,
    pub ssl_policy: Option<String>,
    pub certificate_arn: Option<String>,
    pub target_group_arn: Option<String>,
}

/// Listener settings shared by create and modify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub port: i32,
    pub protocol: Protocol,
    pub ssl_policy: Option<String>,
    pub certificate_arn: Option<String>,
    pub target_group_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupHealthCheck {
    pub protocol: Protocol,
    pub port: String,
    pub path: Option<String>,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub arn: String,
    pub name: String,
    pub vpc_id: String,
    pub port: i32,
    pub protocol: Protocol,
    pub target_type: String,
    pub health_check: TargetGroupHealthCheck,
    pub load_balancer_arns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTargetGroupRequest {
    pub name: String,
    pub vpc_id: String,
    pub port: i32,
    pub protocol: Protocol,
    pub target_type: String,
    pub health_check: TargetGroupHealthCheck,
    pub tags: BTreeMap<String, String>,
}

/// Health-check fields that may change on a live target group. `None` leaves
/// the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyTargetGroupRequest {
    pub arn: String,
    pub health_check_port: Option<String>,
    pub health_check_path: Option<String>,
    pub healthy_threshold: Option<i32>,
    pub unhealthy_threshold: Option<i32>,
}

impl ModifyTargetGroupRequest {
    pub fn is_empty(&self) -> bool {
        self.health_check_port.is_none()
            && self.health_check_path.is_none()
            && self.healthy_threshold.is_none()
            && self.unhealthy_threshold.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescription {
    pub id: String,
    pub port: i32,
}

pub const TARGET_HEALTH_REASON_DEREGISTRATION_IN_PROGRESS: &str =
    "Target.DeregistrationInProgress";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealthDescription {
    pub target: TargetDescription,
    pub state: String,
    pub reason: Option<String>,
}

impl TargetHealthDescription {
    pub fn is_deregistering(&self) -> bool {
        self.reason.as_deref() == Some(TARGET_HEALTH_REASON_DEREGISTRATION_IN_PROGRESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str_is_case_insensitive() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("Https".parse::<Protocol>().unwrap(), Protocol::Https);
        assert_eq!("tcp_udp".parse::<Protocol>().unwrap(), Protocol::TcpUdp);
        assert!("SCTP".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_classic_name_is_lowercase() {
        assert_eq!(Protocol::Ssl.classic_name(), "ssl");
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
    }

    #[test]
    fn test_from_group_permission() {
        let perm = IpPermission::from_group("sg-elb");
        assert_eq!(perm.ip_protocol, "-1");
        assert_eq!(perm.from_port, None);
        assert_eq!(perm.user_id_group_pairs[0].group_id, "sg-elb");
    }
}
