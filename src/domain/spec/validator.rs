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

//! Checks that fail a reconciliation before any cloud call is made.

use crate::domain::spec::types::{HealthCheckConfig, LoadBalancerKind, PortMapping};
use crate::infrastructure::cloud::model::Protocol;
use crate::infrastructure::constants::{
    CLASSIC_HC_MIN_INTERVAL, CLASSIC_HC_MIN_THRESHOLD, CLASSIC_HC_MIN_TIMEOUT,
};
use crate::shared::error::{LbError, Result};
use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
use std::collections::HashSet;
use std::net::IpAddr;

/// Protocol of a service port; Kubernetes defaults an unset protocol to TCP.
pub fn port_protocol(port: &ServicePort) -> Result<Protocol> {
    port.protocol.as_deref().unwrap_or("TCP").parse()
}

pub fn validate_service_spec(spec: &ServiceSpec) -> Result<()> {
    if let Some(affinity) = spec.session_affinity.as_deref() {
        if !affinity.is_empty() && affinity != "None" {
            return Err(LbError::validation(format!(
                "Unsupported load balancer affinity: {}",
                affinity
            )));
        }
    }

    let ports = spec.ports.as_deref().unwrap_or_default();
    if ports.is_empty() {
        return Err(LbError::validation(
            "Requested load balancer with no ports",
        ));
    }
    check_mixed_protocol(ports)?;

    if spec
        .load_balancer_ip
        .as_deref()
        .is_some_and(|ip| !ip.is_empty())
    {
        return Err(LbError::validation(
            "LoadBalancerIP cannot be specified for AWS ELB",
        ));
    }
    Ok(())
}

pub fn check_mixed_protocol(ports: &[ServicePort]) -> Result<()> {
    let mut protocols = HashSet::new();
    for port in ports {
        protocols.insert(port_protocol(port)?);
    }
    if protocols.len() > 1 {
        return Err(LbError::validation(
            "Mixed protocol is not supported for LoadBalancer",
        ));
    }
    Ok(())
}

/// NLBs carry TCP and UDP, classic load balancers TCP only.
pub fn check_protocol(protocol: Protocol, kind: LoadBalancerKind) -> Result<()> {
    let supported = match kind {
        LoadBalancerKind::Network => matches!(protocol, Protocol::Tcp | Protocol::Udp),
        LoadBalancerKind::Classic => protocol == Protocol::Tcp,
    };
    if supported {
        Ok(())
    } else {
        Err(LbError::validation(format!(
            "Protocol {} not supported by {} load balancer",
            protocol, kind
        )))
    }
}

/// At most one mapping per frontend port and protocol.
pub fn validate_port_mappings(mappings: &[PortMapping]) -> Result<()> {
    if mappings.is_empty() {
        return Err(LbError::validation(
            "Requested load balancer has no ports with a node port",
        ));
    }
    let mut seen = HashSet::new();
    for mapping in mappings {
        if !seen.insert((mapping.frontend_port, mapping.frontend_protocol)) {
            return Err(LbError::validation(format!(
                "Duplicate listener for port {}/{}",
                mapping.frontend_port, mapping.frontend_protocol
            )));
        }
    }
    Ok(())
}

/// Classic ELB limits; all violations are reported together.
pub fn validate_classic_health_check(check: &HealthCheckConfig) -> Result<()> {
    let mut errors = Vec::new();
    if check.healthy_threshold < CLASSIC_HC_MIN_THRESHOLD {
        errors.push(format!(
            "HealthyThreshold must be at least {}",
            CLASSIC_HC_MIN_THRESHOLD
        ));
    }
    if check.interval_seconds < CLASSIC_HC_MIN_INTERVAL {
        errors.push(format!("Interval must be at least {}", CLASSIC_HC_MIN_INTERVAL));
    }
    if check.timeout_seconds < CLASSIC_HC_MIN_TIMEOUT {
        errors.push(format!("Timeout must be at least {}", CLASSIC_HC_MIN_TIMEOUT));
    }
    if check.unhealthy_threshold < CLASSIC_HC_MIN_THRESHOLD {
        errors.push(format!(
            "UnhealthyThreshold must be at least {}",
            CLASSIC_HC_MIN_THRESHOLD
        ));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(LbError::validation(format!(
            "HealthCheck validation errors: {}",
            errors.join("; ")
        )))
    }
}

pub fn validate_cidr(cidr: &str) -> Result<()> {
    let invalid = || LbError::validation(format!("Invalid source range '{}'", cidr));
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::spec::types::HealthCheckPort;

    fn port(number: i32, protocol: &str) -> ServicePort {
        ServicePort {
            port: number,
            node_port: Some(30000 + number),
            protocol: Some(protocol.to_string()),
            ..Default::default()
        }
    }

    fn check(healthy: i32, interval: i32, timeout: i32) -> HealthCheckConfig {
        HealthCheckConfig {
            protocol: Protocol::Tcp,
            port: HealthCheckPort::Port(30080),
            path: None,
            interval_seconds: interval,
            timeout_seconds: timeout,
            healthy_threshold: healthy,
            unhealthy_threshold: 6,
        }
    }

    #[test]
    fn test_service_spec_rules() {
        let mut spec = ServiceSpec {
            ports: Some(vec![port(80, "TCP")]),
            ..Default::default()
        };
        assert!(validate_service_spec(&spec).is_ok());

        spec.session_affinity = Some("ClientIP".to_string());
        assert!(validate_service_spec(&spec).is_err());
        spec.session_affinity = Some("None".to_string());

        spec.load_balancer_ip = Some("1.2.3.4".to_string());
        assert!(validate_service_spec(&spec).is_err());
        spec.load_balancer_ip = None;

        spec.ports = Some(vec![port(80, "TCP"), port(53, "UDP")]);
        let err = validate_service_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("Mixed protocol"));

        spec.ports = Some(Vec::new());
        assert!(validate_service_spec(&spec).is_err());
    }

    #[test]
    fn test_check_protocol_per_kind() {
        assert!(check_protocol(Protocol::Udp, LoadBalancerKind::Network).is_ok());
        assert!(check_protocol(Protocol::Udp, LoadBalancerKind::Classic).is_err());
        assert!(check_protocol(Protocol::Tcp, LoadBalancerKind::Classic).is_ok());
    }

    #[test]
    fn test_classic_health_check_limits() {
        assert!(validate_classic_health_check(&check(2, 10, 5)).is_ok());
        let err = validate_classic_health_check(&check(1, 4, 1)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HealthyThreshold"));
        assert!(message.contains("Interval"));
        assert!(message.contains("Timeout"));
    }

    #[test]
    fn test_validate_cidr() {
        assert!(validate_cidr("10.0.0.0/16").is_ok());
        assert!(validate_cidr("::/0").is_ok());
        assert!(validate_cidr("10.0.0.0").is_err());
        assert!(validate_cidr("10.0.0.0/33").is_err());
    }
}
