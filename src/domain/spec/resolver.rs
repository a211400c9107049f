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

//! Turns a Service, its annotations and the node list into a
//! [`LoadBalancerSpec`].

use crate::domain::config::{CloudConfig, HealthProbeMode, ServiceAnnotations};
use crate::domain::spec::types::*;
use crate::domain::spec::validator;
use crate::infrastructure::cloud::model::{AccessLog, ConnectionDraining, Protocol};
use crate::infrastructure::constants::*;
use crate::shared::error::{LbError, Result};
use k8s_openapi::api::core::v1::{Node, Service, ServicePort, ServiceSpec};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, warn};

/// Ports selected by the `ssl-ports` annotation, by number or by name.
#[derive(Debug, Default)]
struct PortSets {
    numbers: HashSet<i32>,
    names: HashSet<String>,
}

impl PortSets {
    /// `None` selects every port.
    fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if raw.is_empty() || raw == "*" {
            return None;
        }
        let mut sets = PortSets::default();
        for item in raw.split(',').map(str::trim) {
            match item.parse::<i32>() {
                Ok(number) => {
                    sets.numbers.insert(number);
                }
                Err(_) => {
                    sets.names.insert(item.to_string());
                }
            }
        }
        Some(sets)
    }

    fn selects(sets: &Option<Self>, port: &ServicePort) -> bool {
        match sets {
            None => true,
            Some(sets) => {
                sets.numbers.contains(&port.port)
                    || port
                        .name
                        .as_ref()
                        .is_some_and(|name| sets.names.contains(name))
            }
        }
    }
}

pub struct SpecResolver {
    config: CloudConfig,
}

impl SpecResolver {
    pub fn new(config: CloudConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// `None` when the service asks for a load balancer managed by another
    /// controller.
    pub fn kind_of(annotations: &ServiceAnnotations<'_>) -> Option<LoadBalancerKind> {
        match annotations.get(ANNOTATION_TYPE) {
            Some(LB_TYPE_NLB) => Some(LoadBalancerKind::Network),
            Some(LB_TYPE_NLB_IP) | Some(LB_TYPE_EXTERNAL) => None,
            _ => Some(LoadBalancerKind::Classic),
        }
    }

    pub fn identify(&self, service: &Service) -> Result<Option<LoadBalancerIdentity>> {
        let empty = BTreeMap::new();
        let annotations =
            ServiceAnnotations::new(service.metadata.annotations.as_ref().unwrap_or(&empty));
        let Some(kind) = Self::kind_of(&annotations) else {
            return Ok(None);
        };
        let service_ref = service_ref(service)?;
        Ok(Some(LoadBalancerIdentity {
            name: load_balancer_name(&service_ref.uid),
            service: service_ref,
            kind,
            security_groups: security_group_preferences(&annotations),
        }))
    }

    pub fn resolve(&self, service: &Service, nodes: &[Node]) -> Result<LoadBalancerSpec> {
        let empty = BTreeMap::new();
        let annotation_map = service.metadata.annotations.as_ref().unwrap_or(&empty);
        let annotations = ServiceAnnotations::new(annotation_map);
        let service_ref = service_ref(service)?;

        let kind = Self::kind_of(&annotations)
            .ok_or_else(|| LbError::ImplementedElsewhere(service_ref.to_string()))?;

        let default_spec = ServiceSpec::default();
        let spec = service.spec.as_ref().unwrap_or(&default_spec);
        validator::validate_service_spec(spec)?;

        let ports = spec.ports.as_deref().unwrap_or_default();
        let mut service_ports = Vec::with_capacity(ports.len());
        for port in ports {
            let protocol = validator::port_protocol(port)?;
            validator::check_protocol(protocol, kind)?;
            service_ports.push(ServicePortRef {
                name: port.name.clone(),
                port: port.port,
                node_port: port.node_port.unwrap_or(0),
                protocol,
            });
        }

        let local_probe = local_health_check_port(spec);
        let port_mappings = match kind {
            LoadBalancerKind::Network => {
                let health_check = self.network_health_check(&annotations, local_probe)?;
                network_port_mappings(&service_ref, ports, &annotations, &health_check)?
            }
            LoadBalancerKind::Classic => classic_port_mappings(&service_ref, ports, &annotations)?,
        };
        validator::validate_port_mappings(&port_mappings)?;

        let health_check = match kind {
            LoadBalancerKind::Network => port_mappings[0].health_check.clone(),
            LoadBalancerKind::Classic => {
                let check =
                    self.classic_health_check(&annotations, local_probe, &port_mappings)?;
                validator::validate_classic_health_check(&check)?;
                check
            }
        };
        let port_mappings = match kind {
            LoadBalancerKind::Classic => port_mappings
                .into_iter()
                .map(|mapping| PortMapping {
                    health_check: health_check.clone(),
                    ..mapping
                })
                .collect(),
            LoadBalancerKind::Network => port_mappings,
        };

        let source_ranges = source_ranges(spec, &annotations)?;
        let scheme = match annotations.get(ANNOTATION_INTERNAL) {
            Some("false") | Some("") | None => Scheme::InternetFacing,
            Some(_) => Scheme::Internal,
        };

        let attributes = load_balancer_attributes(&annotations, kind)?;
        let subnets = if annotations.contains(ANNOTATION_SUBNETS) {
            let names = annotations.list(ANNOTATION_SUBNETS);
            if names.is_empty() {
                return Err(LbError::validation("Unable to resolve empty subnet slice"));
            }
            SubnetSelection::Explicit(names)
        } else {
            SubnetSelection::Discover
        };

        let eip_allocations = match kind {
            LoadBalancerKind::Network if annotations.contains(ANNOTATION_EIP_ALLOCATIONS) => {
                Some(annotations.list(ANNOTATION_EIP_ALLOCATIONS))
            }
            _ => None,
        };

        let ssl_negotiation_policy = match kind {
            LoadBalancerKind::Classic if annotations.contains(ANNOTATION_SSL_NEGOTIATION_POLICY) => {
                annotations
                    .get(ANNOTATION_SSL_NEGOTIATION_POLICY)
                    .map(str::to_string)
            }
            _ => None,
        };

        let instance_ids = instance_ids(&target_nodes(nodes, &annotations));

        let resolved = LoadBalancerSpec {
            name: load_balancer_name(&service_ref.uid),
            service: service_ref,
            scheme,
            kind,
            subnets,
            security_groups: security_group_preferences(&annotations),
            service_ports,
            port_mappings,
            health_check,
            attributes,
            additional_tags: annotations.key_values(ANNOTATION_ADDITIONAL_TAGS),
            source_ranges,
            ssl_negotiation_policy,
            eip_allocations,
            instance_ids,
        };
        debug!(
            "Resolved {} load balancer {} for service {} with {} port mappings",
            resolved.kind,
            resolved.name,
            resolved.service,
            resolved.port_mappings.len()
        );
        Ok(resolved)
    }

    fn network_health_check(
        &self,
        annotations: &ServiceAnnotations<'_>,
        local_probe: Option<i32>,
    ) -> Result<HealthCheckConfig> {
        let mut check = match local_probe {
            Some(port) => HealthCheckConfig {
                protocol: Protocol::Http,
                port: HealthCheckPort::Port(port),
                path: Some(NLB_HC_LOCAL_PATH.to_string()),
                interval_seconds: NLB_HC_LOCAL_INTERVAL,
                timeout_seconds: NLB_HC_LOCAL_TIMEOUT,
                healthy_threshold: NLB_HC_LOCAL_THRESHOLD,
                unhealthy_threshold: NLB_HC_LOCAL_THRESHOLD,
            },
            None => HealthCheckConfig {
                protocol: Protocol::Tcp,
                port: HealthCheckPort::TrafficPort,
                path: Some(NLB_HC_PATH.to_string()),
                interval_seconds: NLB_HC_INTERVAL,
                timeout_seconds: NLB_HC_TIMEOUT,
                healthy_threshold: NLB_HC_THRESHOLD,
                unhealthy_threshold: NLB_HC_THRESHOLD,
            },
        };

        if let Some(raw) = annotations.get(ANNOTATION_HC_PROTOCOL) {
            check.protocol = raw.parse()?;
        }
        match check.protocol {
            Protocol::Http | Protocol::Https => {
                if let Some(path) = annotations.get(ANNOTATION_HC_PATH) {
                    check.path = Some(path.to_string());
                }
            }
            Protocol::Tcp => check.path = None,
            other => {
                return Err(LbError::validation(format!(
                    "Unsupported health check protocol {}",
                    other
                )))
            }
        }
        if let Some(raw) = annotations.get(ANNOTATION_HC_PORT) {
            check.port = HealthCheckPort::parse(raw)?;
        }

        if self.config.health_probe_mode == HealthProbeMode::Shared && local_probe.is_none() {
            check.protocol = Protocol::Http;
            check.path = Some(self.config.shared_health_probe_path.clone());
            check.port = HealthCheckPort::Port(self.config.shared_health_probe_port);
        }

        if let Some(interval) = annotations.i32(ANNOTATION_HC_INTERVAL)? {
            check.interval_seconds = interval;
        }
        if let Some(timeout) = annotations.i32(ANNOTATION_HC_TIMEOUT)? {
            check.timeout_seconds = timeout;
        }
        if let Some(healthy) = annotations.i32(ANNOTATION_HC_HEALTHY_THRESHOLD)? {
            check.healthy_threshold = healthy;
        }
        if let Some(unhealthy) = annotations.i32(ANNOTATION_HC_UNHEALTHY_THRESHOLD)? {
            check.unhealthy_threshold = unhealthy;
        }
        Ok(check)
    }

    fn classic_health_check(
        &self,
        annotations: &ServiceAnnotations<'_>,
        local_probe: Option<i32>,
        mappings: &[PortMapping],
    ) -> Result<HealthCheckConfig> {
        let tcp_port = mappings[0].traffic_port;

        let (mut protocol, mut port, mut path) = match local_probe {
            Some(node_port) => {
                let port = match annotations.get(ANNOTATION_HC_PORT) {
                    Some(NLB_HC_PORT_TRAFFIC) => tcp_port,
                    _ => node_port,
                };
                (Protocol::Http, port, Some(NLB_HC_LOCAL_PATH.to_string()))
            }
            None => {
                let backend = annotations
                    .get(ANNOTATION_BACKEND_PROTOCOL)
                    .unwrap_or_default()
                    .to_lowercase();
                let protocol = if backend == "https" || backend == "ssl" {
                    Protocol::Ssl
                } else {
                    Protocol::Tcp
                };
                if self.config.health_probe_mode == HealthProbeMode::Shared {
                    (
                        Protocol::Http,
                        self.config.shared_health_probe_port,
                        Some(self.config.shared_health_probe_path.clone()),
                    )
                } else {
                    (protocol, tcp_port, None)
                }
            }
        };

        if let Some(raw) = annotations.non_empty(ANNOTATION_HC_PROTOCOL) {
            protocol = raw.parse()?;
        }
        if let Some(raw) = annotations.non_empty(ANNOTATION_HC_PORT) {
            if raw != NLB_HC_PORT_TRAFFIC {
                port = raw.parse().map_err(|_| {
                    LbError::validation(format!("Invalid health check port '{}'", raw))
                })?;
            }
        }
        match protocol {
            Protocol::Http | Protocol::Https => {
                if path.is_none() {
                    path = Some(NLB_HC_PATH.to_string());
                }
                if let Some(custom) = annotations.non_empty(ANNOTATION_HC_PATH) {
                    path = Some(custom.to_string());
                }
            }
            _ => path = None,
        }

        Ok(HealthCheckConfig {
            protocol,
            port: HealthCheckPort::Port(port),
            path,
            interval_seconds: annotations
                .i32(ANNOTATION_HC_INTERVAL)?
                .unwrap_or(CLASSIC_HC_INTERVAL),
            timeout_seconds: annotations
                .i32(ANNOTATION_HC_TIMEOUT)?
                .unwrap_or(CLASSIC_HC_TIMEOUT),
            healthy_threshold: annotations
                .i32(ANNOTATION_HC_HEALTHY_THRESHOLD)?
                .unwrap_or(CLASSIC_HC_HEALTHY_THRESHOLD),
            unhealthy_threshold: annotations
                .i32(ANNOTATION_HC_UNHEALTHY_THRESHOLD)?
                .unwrap_or(CLASSIC_HC_UNHEALTHY_THRESHOLD),
        })
    }
}

fn service_ref(service: &Service) -> Result<ServiceRef> {
    let name = service
        .metadata
        .name
        .clone()
        .ok_or_else(|| LbError::validation("Service has no name"))?;
    let namespace = service
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let uid = service
        .metadata
        .uid
        .clone()
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| LbError::validation(format!("Service {}/{} has no uid", namespace, name)))?;
    Ok(ServiceRef {
        namespace,
        name,
        uid,
    })
}

/// `a` followed by the service UID without dashes, cut to the ELB name limit.
pub fn load_balancer_name(uid: &str) -> String {
    let mut name = format!("a{}", uid.replace('-', ""));
    name.truncate(LB_NAME_MAX_LEN);
    name
}

fn security_group_preferences(annotations: &ServiceAnnotations<'_>) -> SecurityGroupPreferences {
    SecurityGroupPreferences {
        replace: annotations.list(ANNOTATION_SECURITY_GROUPS),
        extra: annotations.list(ANNOTATION_EXTRA_SECURITY_GROUPS),
    }
}

/// Health-check node port when traffic is only served by local endpoints.
fn local_health_check_port(spec: &ServiceSpec) -> Option<i32> {
    if spec.external_traffic_policy.as_deref() != Some("Local") {
        return None;
    }
    spec.health_check_node_port.filter(|port| *port > 0)
}

fn network_port_mappings(
    service: &ServiceRef,
    ports: &[ServicePort],
    annotations: &ServiceAnnotations<'_>,
    health_check: &HealthCheckConfig,
) -> Result<Vec<PortMapping>> {
    let ssl_ports = PortSets::parse(annotations.get(ANNOTATION_SSL_PORTS));
    let certificate = annotations.non_empty(ANNOTATION_SSL_CERT);

    let mut mappings = Vec::new();
    for port in ports {
        let Some(node_port) = port.node_port.filter(|p| *p != 0) else {
            error!(
                "Ignoring port {} of service {} without a node port",
                port.port, service
            );
            continue;
        };
        let protocol = validator::port_protocol(port)?;
        let mut mapping = PortMapping {
            frontend_port: port.port,
            frontend_protocol: protocol,
            traffic_port: node_port,
            traffic_protocol: protocol,
            tls_cert_arn: None,
            tls_policy: None,
            health_check: health_check.clone(),
        };
        if let Some(certificate) = certificate {
            if protocol != Protocol::Udp && PortSets::selects(&ssl_ports, port) {
                mapping.frontend_protocol = Protocol::Tls;
                mapping.tls_cert_arn = Some(certificate.to_string());
                mapping.tls_policy = annotations
                    .non_empty(ANNOTATION_SSL_NEGOTIATION_POLICY)
                    .map(str::to_string);
                if annotations.get(ANNOTATION_BACKEND_PROTOCOL) == Some("ssl") {
                    mapping.traffic_protocol = Protocol::Tls;
                }
            }
        }
        mappings.push(mapping);
    }
    Ok(mappings)
}

/// Listener protocol required in front of each backend protocol when a
/// certificate terminates TLS on the load balancer.
fn secure_frontend_protocol(backend: &str) -> Option<Protocol> {
    match backend {
        "https" | "http" => Some(Protocol::Https),
        "ssl" | "tcp" => Some(Protocol::Ssl),
        _ => None,
    }
}

fn classic_port_mappings(
    service: &ServiceRef,
    ports: &[ServicePort],
    annotations: &ServiceAnnotations<'_>,
) -> Result<Vec<PortMapping>> {
    let ssl_ports = PortSets::parse(annotations.get(ANNOTATION_SSL_PORTS));
    let certificate = annotations.non_empty(ANNOTATION_SSL_CERT);
    let backend = annotations
        .get(ANNOTATION_BACKEND_PROTOCOL)
        .unwrap_or_default()
        .to_lowercase();

    let mut mappings = Vec::new();
    for port in ports {
        let Some(node_port) = port.node_port.filter(|p| *p != 0) else {
            error!(
                "Ignoring port {} of service {} without a node port",
                port.port, service
            );
            continue;
        };
        let port_protocol = validator::port_protocol(port)?;
        let mut frontend = port_protocol;
        let mut instance = port_protocol;
        let mut tls_cert_arn = None;

        match certificate {
            Some(certificate) if PortSets::selects(&ssl_ports, port) => {
                if backend.is_empty() {
                    frontend = Protocol::Ssl;
                    instance = Protocol::Tcp;
                } else {
                    frontend = secure_frontend_protocol(&backend).ok_or_else(|| {
                        LbError::validation(format!(
                            "Invalid backend protocol {} for {} in {}",
                            backend, certificate, ANNOTATION_BACKEND_PROTOCOL
                        ))
                    })?;
                    instance = backend.parse()?;
                }
                tls_cert_arn = Some(certificate.to_string());
            }
            _ if backend == "http" => {
                frontend = Protocol::Http;
                instance = Protocol::Http;
            }
            _ => {}
        }

        mappings.push(PortMapping {
            frontend_port: port.port,
            frontend_protocol: frontend,
            traffic_port: node_port,
            traffic_protocol: instance,
            tls_cert_arn,
            tls_policy: None,
            // replaced once the listener set is known
            health_check: HealthCheckConfig {
                protocol: instance,
                port: HealthCheckPort::Port(node_port),
                path: None,
                interval_seconds: CLASSIC_HC_INTERVAL,
                timeout_seconds: CLASSIC_HC_TIMEOUT,
                healthy_threshold: CLASSIC_HC_HEALTHY_THRESHOLD,
                unhealthy_threshold: CLASSIC_HC_UNHEALTHY_THRESHOLD,
            },
        });
    }
    Ok(mappings)
}

fn source_ranges(spec: &ServiceSpec, annotations: &ServiceAnnotations<'_>) -> Result<Vec<String>> {
    let mut ranges: Vec<String> = spec
        .load_balancer_source_ranges
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if ranges.is_empty() {
        ranges = annotations.list(ANNOTATION_SOURCE_RANGES);
    }
    for range in &ranges {
        validator::validate_cidr(range)?;
    }
    if ranges.is_empty() {
        ranges.push(CIDR_ANY_IPV4.to_string());
    }
    Ok(ranges)
}

fn load_balancer_attributes(
    annotations: &ServiceAnnotations<'_>,
    kind: LoadBalancerKind,
) -> Result<LoadBalancerAttributes> {
    let mut attributes = LoadBalancerAttributes {
        idle_timeout: CLASSIC_IDLE_TIMEOUT,
        cross_zone: false,
        access_log: AccessLog::default(),
        connection_draining: ConnectionDraining::default(),
        proxy_protocol: false,
    };

    if let Some(enabled) = annotations.bool(ANNOTATION_CROSS_ZONE)? {
        attributes.cross_zone = enabled;
    }
    if let Some(enabled) = annotations.bool(ANNOTATION_ACCESS_LOG_ENABLED)? {
        attributes.access_log.enabled = enabled;
    }
    attributes.access_log.s3_bucket_name = annotations
        .non_empty(ANNOTATION_ACCESS_LOG_BUCKET_NAME)
        .map(str::to_string);
    attributes.access_log.s3_bucket_prefix = annotations
        .non_empty(ANNOTATION_ACCESS_LOG_BUCKET_PREFIX)
        .map(str::to_string);

    if kind == LoadBalancerKind::Network {
        return Ok(attributes);
    }

    attributes.proxy_protocol = match annotations.get(ANNOTATION_PROXY_PROTOCOL) {
        None | Some("") => false,
        Some("*") => true,
        Some(other) => {
            return Err(LbError::validation(format!(
                "Annotation {}={} is not supported, only '*'",
                ANNOTATION_PROXY_PROTOCOL, other
            )))
        }
    };
    attributes.access_log.emit_interval = annotations.i64(ANNOTATION_ACCESS_LOG_EMIT_INTERVAL)?;
    if let Some(enabled) = annotations.bool(ANNOTATION_CONNECTION_DRAINING_ENABLED)? {
        attributes.connection_draining.enabled = enabled;
    }
    attributes.connection_draining.timeout =
        annotations.i64(ANNOTATION_CONNECTION_DRAINING_TIMEOUT)?;
    if let Some(idle) = annotations.i64(ANNOTATION_CONNECTION_IDLE_TIMEOUT)? {
        attributes.idle_timeout = idle;
    }
    Ok(attributes)
}

/// Nodes carrying every label of the `target-node-labels` annotation; a label
/// given without a value only has to exist.
fn target_nodes<'a>(nodes: &'a [Node], annotations: &ServiceAnnotations<'_>) -> Vec<&'a Node> {
    let wanted = annotations.key_values(ANNOTATION_TARGET_NODE_LABELS);
    if wanted.is_empty() {
        return nodes.iter().collect();
    }
    nodes
        .iter()
        .filter(|node| {
            let labels = node.metadata.labels.as_ref();
            wanted.iter().all(|(key, value)| {
                labels
                    .and_then(|l| l.get(key))
                    .is_some_and(|actual| value.is_empty() || actual == value)
            })
        })
        .collect()
}

/// Instance ID from a provider ID of the form `aws:///<zone>/<id>` (or a bare
/// `i-` ID).
pub fn instance_id_from_provider_id(provider_id: &str) -> Option<String> {
    let id = match provider_id.strip_prefix(PROVIDER_ID_PREFIX) {
        Some(rest) => rest.rsplit('/').next()?,
        None if !provider_id.contains('/') => provider_id,
        None => return None,
    };
    if id.starts_with("i-") {
        Some(id.to_string())
    } else {
        None
    }
}

fn instance_ids(nodes: &[&Node]) -> Vec<String> {
    let mut ids = Vec::new();
    for node in nodes {
        let node_name = node.metadata.name.as_deref().unwrap_or_default();
        let provider_id = node
            .spec
            .as_ref()
            .and_then(|spec| spec.provider_id.as_deref())
            .unwrap_or_default();
        match instance_id_from_provider_id(provider_id) {
            Some(id) => ids.push(id),
            None => warn!(
                "Skipping node {} with unusable provider ID '{}'",
                node_name, provider_id
            ),
        }
    }
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::NodeSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(annotations: &[(&str, &str)], ports: Vec<ServicePort>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("shop".to_string()),
                uid: Some("1234-5678-90ab".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn tcp_port(name: &str, port: i32, node_port: i32) -> ServicePort {
        ServicePort {
            name: Some(name.to_string()),
            port,
            node_port: Some(node_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }
    }

    fn node(name: &str, provider_id: &str, labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some(provider_id.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn resolver() -> SpecResolver {
        SpecResolver::new(CloudConfig::default())
    }

    #[test]
    fn test_load_balancer_name() {
        assert_eq!(load_balancer_name("1234-5678-90ab"), "a1234567890ab");
        let long = load_balancer_name("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
        assert_eq!(long.len(), LB_NAME_MAX_LEN);
        assert!(long.starts_with("aaaaaaaaa"));
    }

    #[test]
    fn test_classic_defaults() {
        let svc = service(&[], vec![tcp_port("http", 80, 30080)]);
        let spec = resolver().resolve(&svc, &[]).unwrap();

        assert_eq!(spec.kind, LoadBalancerKind::Classic);
        assert_eq!(spec.scheme, Scheme::InternetFacing);
        assert_eq!(spec.source_ranges, vec!["0.0.0.0/0"]);
        assert_eq!(spec.health_check.classic_target(), "TCP:30080");
        assert_eq!(spec.health_check.interval_seconds, 10);

        let listeners = spec.classic_listeners();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].protocol, "tcp");
        assert_eq!(listeners[0].instance_port, 30080);
    }

    #[test]
    fn test_classic_ssl_listener_mapping() {
        let svc = service(
            &[
                (ANNOTATION_SSL_CERT, "arn:aws:acm:cert"),
                (ANNOTATION_SSL_PORTS, "https"),
                (ANNOTATION_BACKEND_PROTOCOL, "http"),
            ],
            vec![tcp_port("http", 80, 30080), tcp_port("https", 443, 30443)],
        );
        let spec = resolver().resolve(&svc, &[]).unwrap();
        let listeners = spec.classic_listeners();

        assert_eq!(listeners[0].protocol, "http");
        assert_eq!(listeners[0].ssl_certificate_id, None);
        assert_eq!(listeners[1].protocol, "https");
        assert_eq!(listeners[1].instance_protocol.as_deref(), Some("http"));
        assert_eq!(listeners[1].ssl_certificate_id.as_deref(), Some("arn:aws:acm:cert"));
    }

    #[test]
    fn test_classic_ssl_without_backend_protocol() {
        let svc = service(
            &[(ANNOTATION_SSL_CERT, "arn:cert")],
            vec![tcp_port("tls", 443, 30443)],
        );
        let spec = resolver().resolve(&svc, &[]).unwrap();
        let listener = &spec.classic_listeners()[0];
        assert_eq!(listener.protocol, "ssl");
        assert_eq!(listener.instance_protocol.as_deref(), Some("tcp"));

        let bad = service(
            &[(ANNOTATION_SSL_CERT, "arn:cert"), (ANNOTATION_BACKEND_PROTOCOL, "grpc")],
            vec![tcp_port("tls", 443, 30443)],
        );
        assert!(resolver().resolve(&bad, &[]).is_err());
    }

    #[test]
    fn test_network_tls_and_health_check() {
        let svc = service(
            &[
                (ANNOTATION_TYPE, "nlb"),
                (ANNOTATION_SSL_CERT, "arn:cert"),
                (ANNOTATION_SSL_PORTS, "443"),
                (ANNOTATION_SSL_NEGOTIATION_POLICY, "ELBSecurityPolicy-2016-08"),
                (ANNOTATION_BACKEND_PROTOCOL, "ssl"),
                (ANNOTATION_HC_INTERVAL, "10"),
            ],
            vec![tcp_port("http", 80, 30080), tcp_port("https", 443, 30443)],
        );
        let spec = resolver().resolve(&svc, &[]).unwrap();

        assert_eq!(spec.kind, LoadBalancerKind::Network);
        assert_eq!(spec.port_mappings[0].frontend_protocol, Protocol::Tcp);
        let tls = &spec.port_mappings[1];
        assert_eq!(tls.frontend_protocol, Protocol::Tls);
        assert_eq!(tls.traffic_protocol, Protocol::Tls);
        assert_eq!(tls.tls_policy.as_deref(), Some("ELBSecurityPolicy-2016-08"));
        assert_eq!(tls.health_check.interval_seconds, 10);
        assert_eq!(tls.health_check.port, HealthCheckPort::TrafficPort);
        assert_eq!(tls.health_check.protocol, Protocol::Tcp);
        assert_eq!(spec.ssl_negotiation_policy, None);
    }

    #[test]
    fn test_network_local_traffic_health_check() {
        let mut svc = service(&[(ANNOTATION_TYPE, "nlb")], vec![tcp_port("http", 80, 30080)]);
        if let Some(spec) = svc.spec.as_mut() {
            spec.external_traffic_policy = Some("Local".to_string());
            spec.health_check_node_port = Some(32000);
        }
        let spec = resolver().resolve(&svc, &[]).unwrap();
        let check = &spec.port_mappings[0].health_check;
        assert_eq!(check.protocol, Protocol::Http);
        assert_eq!(check.port, HealthCheckPort::Port(32000));
        assert_eq!(check.path.as_deref(), Some("/healthz"));
        assert_eq!(check.healthy_threshold, 2);
    }

    #[test]
    fn test_shared_probe_mode() {
        let mut config = CloudConfig::default();
        config.health_probe_mode = HealthProbeMode::Shared;
        let resolver = SpecResolver::new(config);

        let classic = service(&[], vec![tcp_port("http", 80, 30080)]);
        let spec = resolver.resolve(&classic, &[]).unwrap();
        assert_eq!(spec.health_check.classic_target(), "HTTP:10256/healthz");

        let nlb = service(&[(ANNOTATION_TYPE, "nlb")], vec![tcp_port("http", 80, 30080)]);
        let spec = resolver.resolve(&nlb, &[]).unwrap();
        assert_eq!(spec.health_check.port, HealthCheckPort::Port(10256));
    }

    #[test]
    fn test_unsupported_health_check_protocol() {
        let svc = service(
            &[(ANNOTATION_TYPE, "nlb"), (ANNOTATION_HC_PROTOCOL, "udp")],
            vec![tcp_port("http", 80, 30080)],
        );
        assert!(resolver().resolve(&svc, &[]).is_err());
    }

    #[test]
    fn test_implemented_elsewhere() {
        let svc = service(&[(ANNOTATION_TYPE, "external")], vec![tcp_port("http", 80, 30080)]);
        let err = resolver().resolve(&svc, &[]).unwrap_err();
        assert!(matches!(err, LbError::ImplementedElsewhere(_)));
        assert!(resolver().identify(&svc).unwrap().is_none());
    }

    #[test]
    fn test_annotations_shape_spec() {
        let svc = service(
            &[
                (ANNOTATION_INTERNAL, "true"),
                (ANNOTATION_PROXY_PROTOCOL, "*"),
                (ANNOTATION_CONNECTION_IDLE_TIMEOUT, "120"),
                (ANNOTATION_SECURITY_GROUPS, "sg-b"),
                (ANNOTATION_EXTRA_SECURITY_GROUPS, "sg-c, sg-d"),
                (ANNOTATION_ADDITIONAL_TAGS, "team=web,env"),
                (ANNOTATION_SUBNETS, "subnet-1,public-b"),
            ],
            vec![tcp_port("http", 80, 30080)],
        );
        let spec = resolver().resolve(&svc, &[]).unwrap();

        assert_eq!(spec.scheme, Scheme::Internal);
        assert!(spec.attributes.proxy_protocol);
        assert_eq!(spec.attributes.idle_timeout, 120);
        assert_eq!(spec.security_groups.replace, vec!["sg-b"]);
        assert_eq!(spec.security_groups.extra, vec!["sg-c", "sg-d"]);
        assert_eq!(spec.additional_tags.get("env").map(String::as_str), Some(""));
        assert_eq!(
            spec.subnets,
            SubnetSelection::Explicit(vec!["subnet-1".to_string(), "public-b".to_string()])
        );
        assert_eq!(
            spec.resource_tags().get(TAG_SERVICE_NAME).map(String::as_str),
            Some("shop/web")
        );
    }

    #[test]
    fn test_invalid_annotations_fail() {
        let proxy = service(
            &[(ANNOTATION_PROXY_PROTOCOL, "80")],
            vec![tcp_port("http", 80, 30080)],
        );
        assert!(resolver().resolve(&proxy, &[]).is_err());

        let idle = service(
            &[(ANNOTATION_CONNECTION_IDLE_TIMEOUT, "soon")],
            vec![tcp_port("http", 80, 30080)],
        );
        assert!(resolver().resolve(&idle, &[]).is_err());

        let check = service(
            &[(ANNOTATION_HC_INTERVAL, "3")],
            vec![tcp_port("http", 80, 30080)],
        );
        assert!(resolver().resolve(&check, &[]).is_err());
    }

    #[test]
    fn test_ports_without_node_port_are_skipped() {
        let mut pending = tcp_port("pending", 8080, 0);
        pending.node_port = None;
        let svc = service(&[], vec![tcp_port("http", 80, 30080), pending]);
        let spec = resolver().resolve(&svc, &[]).unwrap();
        assert_eq!(spec.port_mappings.len(), 1);
        assert_eq!(spec.service_ports.len(), 2);
    }

    #[test]
    fn test_target_node_labels_and_provider_ids() {
        let nodes = vec![
            node("a", "aws:///us-east-1a/i-aaa", &[("role", "edge")]),
            node("b", "aws:///us-east-1b/i-bbb", &[("role", "worker")]),
            node("c", "gce://project/zone/c", &[("role", "edge")]),
        ];
        let svc = service(
            &[(ANNOTATION_TARGET_NODE_LABELS, "role=edge")],
            vec![tcp_port("http", 80, 30080)],
        );
        let spec = resolver().resolve(&svc, &nodes).unwrap();
        assert_eq!(spec.instance_ids, vec!["i-aaa"]);

        assert_eq!(instance_id_from_provider_id("i-123").as_deref(), Some("i-123"));
        assert_eq!(instance_id_from_provider_id("aws:////i-456").as_deref(), Some("i-456"));
        assert_eq!(instance_id_from_provider_id("aws:///zone/node-1"), None);
    }
}
