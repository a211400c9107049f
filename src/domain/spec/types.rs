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

//! The protocol-agnostic description of a load balancer that one
//! reconciliation pass converges the cloud towards.

use crate::infrastructure::cloud::model::{
    AccessLog, ClassicAttributes, ClassicListener, ConnectionDraining, Protocol,
    TargetGroupHealthCheck,
};
use crate::infrastructure::constants::{
    NLB_ATTR_ACCESS_LOG_BUCKET, NLB_ATTR_ACCESS_LOG_ENABLED, NLB_ATTR_ACCESS_LOG_PREFIX,
    NLB_ATTR_CROSS_ZONE, NLB_HC_PORT_TRAFFIC, TAG_SERVICE_NAME,
};
use crate::shared::error::{LbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancerKind {
    Classic,
    Network,
}

impl LoadBalancerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerKind::Classic => "classic",
            LoadBalancerKind::Network => "nlb",
        }
    }
}

impl fmt::Display for LoadBalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    Internal,
    InternetFacing,
}

impl Scheme {
    pub fn is_internal(&self) -> bool {
        matches!(self, Scheme::Internal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Internal => "internal",
            Scheme::InternetFacing => "internet-facing",
        }
    }
}

/// Where a health check probes: the port traffic is forwarded to, or a
/// fixed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthCheckPort {
    TrafficPort,
    Port(i32),
}

impl HealthCheckPort {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == NLB_HC_PORT_TRAFFIC {
            return Ok(HealthCheckPort::TrafficPort);
        }
        raw.parse::<i32>()
            .map(HealthCheckPort::Port)
            .map_err(|_| LbError::validation(format!("Invalid health check port '{}'", raw)))
    }

    /// The concrete port probed when traffic arrives on `traffic_port`.
    pub fn resolve(&self, traffic_port: i32) -> i32 {
        match self {
            HealthCheckPort::TrafficPort => traffic_port,
            HealthCheckPort::Port(port) => *port,
        }
    }
}

impl fmt::Display for HealthCheckPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckPort::TrafficPort => f.write_str(NLB_HC_PORT_TRAFFIC),
            HealthCheckPort::Port(port) => write!(f, "{}", port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub protocol: Protocol,
    pub port: HealthCheckPort,
    pub path: Option<String>,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
}

impl HealthCheckConfig {
    /// Classic ELB target string, `PROTOCOL:PORT[PATH]`.
    pub fn classic_target(&self) -> String {
        format!(
            "{}:{}{}",
            self.protocol,
            self.port,
            self.path.as_deref().unwrap_or_default()
        )
    }

    /// Target-group health check; TCP checks carry no path.
    pub fn to_target_group_health_check(&self) -> TargetGroupHealthCheck {
        TargetGroupHealthCheck {
            protocol: self.protocol,
            port: self.port.to_string(),
            path: match self.protocol {
                Protocol::Tcp => None,
                _ => self.path.clone(),
            },
            interval_seconds: self.interval_seconds,
            timeout_seconds: self.timeout_seconds,
            healthy_threshold: self.healthy_threshold,
            unhealthy_threshold: self.unhealthy_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePortRef {
    pub name: Option<String>,
    pub port: i32,
    pub node_port: i32,
    pub protocol: Protocol,
}

/// One frontend port of the load balancer and where its traffic goes.
///
/// For a classic load balancer the frontend protocol is the listener protocol
/// and the traffic protocol is the instance protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub frontend_port: i32,
    pub frontend_protocol: Protocol,
    pub traffic_port: i32,
    pub traffic_protocol: Protocol,
    pub tls_cert_arn: Option<String>,
    pub tls_policy: Option<String>,
    pub health_check: HealthCheckConfig,
}

impl PortMapping {
    pub fn to_classic_listener(&self) -> ClassicListener {
        ClassicListener {
            protocol: self.frontend_protocol.classic_name(),
            load_balancer_port: self.frontend_port,
            instance_protocol: Some(self.traffic_protocol.classic_name()),
            instance_port: self.traffic_port,
            ssl_certificate_id: self.tls_cert_arn.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerAttributes {
    pub idle_timeout: i64,
    pub cross_zone: bool,
    pub access_log: AccessLog,
    pub connection_draining: ConnectionDraining,
    pub proxy_protocol: bool,
}

impl LoadBalancerAttributes {
    pub fn to_classic(&self) -> ClassicAttributes {
        ClassicAttributes {
            access_log: self.access_log.clone(),
            connection_draining: self.connection_draining.clone(),
            idle_timeout: self.idle_timeout,
            cross_zone: self.cross_zone,
        }
    }

    /// NLB attribute map. Bucket and prefix are only part of the desired
    /// state while access logs are enabled.
    pub fn to_network(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::from([
            (NLB_ATTR_CROSS_ZONE.to_string(), self.cross_zone.to_string()),
            (
                NLB_ATTR_ACCESS_LOG_ENABLED.to_string(),
                self.access_log.enabled.to_string(),
            ),
        ]);
        if self.access_log.enabled {
            attributes.insert(
                NLB_ATTR_ACCESS_LOG_BUCKET.to_string(),
                self.access_log.s3_bucket_name.clone().unwrap_or_default(),
            );
            attributes.insert(
                NLB_ATTR_ACCESS_LOG_PREFIX.to_string(),
                self.access_log.s3_bucket_prefix.clone().unwrap_or_default(),
            );
        }
        attributes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupPreferences {
    /// Groups that replace the managed `k8s-elb-*` group entirely.
    pub replace: Vec<String>,
    /// Groups attached in addition to the managed or replacing groups.
    pub extra: Vec<String>,
}

impl SecurityGroupPreferences {
    pub fn is_annotated(&self, group_id: &str) -> bool {
        self.replace.iter().chain(self.extra.iter()).any(|g| g == group_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubnetSelection {
    /// Subnet IDs (`subnet-` prefix) or `Name` tags.
    Explicit(Vec<String>),
    Discover,
}

/// Enough of a spec to find, report on and delete a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerIdentity {
    pub name: String,
    pub service: ServiceRef,
    pub kind: LoadBalancerKind,
    pub security_groups: SecurityGroupPreferences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub service: ServiceRef,
    pub scheme: Scheme,
    pub kind: LoadBalancerKind,
    pub subnets: SubnetSelection,
    pub security_groups: SecurityGroupPreferences,
    pub service_ports: Vec<ServicePortRef>,
    pub port_mappings: Vec<PortMapping>,
    pub health_check: HealthCheckConfig,
    pub attributes: LoadBalancerAttributes,
    pub additional_tags: BTreeMap<String, String>,
    pub source_ranges: Vec<String>,
    pub ssl_negotiation_policy: Option<String>,
    pub eip_allocations: Option<Vec<String>>,
    pub instance_ids: Vec<String>,
}

impl LoadBalancerSpec {
    /// Tags put on resources created for this service (before the cluster
    /// ownership tag is added).
    pub fn resource_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.additional_tags.clone();
        tags.insert(TAG_SERVICE_NAME.to_string(), self.service.to_string());
        tags
    }

    pub fn classic_listeners(&self) -> Vec<ClassicListener> {
        self.port_mappings
            .iter()
            .map(PortMapping::to_classic_listener)
            .collect()
    }

    pub fn identity(&self) -> LoadBalancerIdentity {
        LoadBalancerIdentity {
            name: self.name.clone(),
            service: self.service.clone(),
            kind: self.kind,
            security_groups: self.security_groups.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health_check(protocol: Protocol, path: Option<&str>) -> HealthCheckConfig {
        HealthCheckConfig {
            protocol,
            port: HealthCheckPort::Port(30080),
            path: path.map(str::to_string),
            interval_seconds: 10,
            timeout_seconds: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 6,
        }
    }

    #[test]
    fn test_classic_target() {
        assert_eq!(health_check(Protocol::Tcp, None).classic_target(), "TCP:30080");
        assert_eq!(
            health_check(Protocol::Http, Some("/healthz")).classic_target(),
            "HTTP:30080/healthz"
        );
    }

    #[test]
    fn test_tcp_target_group_check_drops_path() {
        let tcp = health_check(Protocol::Tcp, Some("/")).to_target_group_health_check();
        assert_eq!(tcp.path, None);
        assert_eq!(tcp.port, "30080");

        let http = health_check(Protocol::Http, Some("/ready")).to_target_group_health_check();
        assert_eq!(http.path.as_deref(), Some("/ready"));
    }

    #[test]
    fn test_health_check_port_parse() {
        assert_eq!(
            HealthCheckPort::parse("traffic-port").unwrap(),
            HealthCheckPort::TrafficPort
        );
        assert_eq!(HealthCheckPort::parse("8080").unwrap(), HealthCheckPort::Port(8080));
        assert!(HealthCheckPort::parse("http").is_err());
        assert_eq!(HealthCheckPort::TrafficPort.resolve(30080), 30080);
    }

    #[test]
    fn test_network_attributes_hide_bucket_when_disabled() {
        let mut attributes = LoadBalancerAttributes {
            idle_timeout: 60,
            cross_zone: true,
            access_log: AccessLog {
                enabled: false,
                emit_interval: None,
                s3_bucket_name: Some("logs".to_string()),
                s3_bucket_prefix: None,
            },
            connection_draining: ConnectionDraining::default(),
            proxy_protocol: false,
        };
        let map = attributes.to_network();
        assert_eq!(map.get(NLB_ATTR_CROSS_ZONE).map(String::as_str), Some("true"));
        assert!(!map.contains_key(NLB_ATTR_ACCESS_LOG_BUCKET));

        attributes.access_log.enabled = true;
        let map = attributes.to_network();
        assert_eq!(map.get(NLB_ATTR_ACCESS_LOG_BUCKET).map(String::as_str), Some("logs"));
        assert_eq!(map.get(NLB_ATTR_ACCESS_LOG_PREFIX).map(String::as_str), Some(""));
    }
}
