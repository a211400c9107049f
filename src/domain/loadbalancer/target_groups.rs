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

//! Target groups, target membership and NLB listeners.
//!
//! A target group's protocol, port and health-check protocol/interval cannot be
//! changed in place. A mapping whose group disagrees on any of them gets a new
//! group: the group is created, the listener is pointed at it, and only then is
//! the old group deleted.

use crate::domain::config::CloudConfig;
use crate::domain::spec::{PortMapping, ServiceRef};
use crate::infrastructure::cloud::api::NetworkElbApi;
use crate::infrastructure::cloud::model::{
    CreateTargetGroupRequest, ListenerSettings, ModifyTargetGroupRequest, NetworkListener,
    NetworkLoadBalancer, Protocol, TargetDescription, TargetGroup,
};
use crate::infrastructure::constants::{
    NLB_TARGET_TYPE_INSTANCE, TARGET_GROUP_HASH_LEN, TARGET_GROUP_NAME_SEGMENT_LEN,
};
use crate::shared::error::Result;
use crate::shared::set::KeyedSet;
use regex::Regex;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

fn truncated(value: &str, len: usize) -> &str {
    match value.char_indices().nth(len) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

/// Deterministic name of the target group serving `mapping`.
///
/// Everything that forces a recreation is hashed, so a replacement group
/// never collides with the group it replaces.
pub fn target_group_name(
    cluster_id: &str,
    service: &ServiceRef,
    mapping: &PortMapping,
) -> Result<String> {
    let mut hasher = Sha1::new();
    hasher.update(cluster_id.as_bytes());
    hasher.update(service.namespace.as_bytes());
    hasher.update(service.name.as_bytes());
    hasher.update(mapping.frontend_port.to_string().as_bytes());
    hasher.update(mapping.traffic_port.to_string().as_bytes());
    hasher.update(mapping.traffic_protocol.as_str().as_bytes());
    hasher.update(NLB_TARGET_TYPE_INSTANCE.as_bytes());
    hasher.update(mapping.health_check.protocol.as_str().as_bytes());
    hasher.update(mapping.health_check.interval_seconds.to_string().as_bytes());
    let hash = hex::encode(hasher.finalize());

    let invalid = Regex::new("[^[:alnum:]]")?;
    let namespace = invalid.replace_all(&service.namespace, "");
    let name = invalid.replace_all(&service.name, "");
    Ok(format!(
        "k8s-{}-{}-{}",
        truncated(&namespace, TARGET_GROUP_NAME_SEGMENT_LEN),
        truncated(&name, TARGET_GROUP_NAME_SEGMENT_LEN),
        truncated(&hash, TARGET_GROUP_HASH_LEN)
    ))
}

fn target_key(target: &TargetDescription) -> String {
    format!("{}:{}", target.id, target.port)
}

pub fn expected_targets(instance_ids: &[String], traffic_port: i32) -> Vec<TargetDescription> {
    instance_ids
        .iter()
        .map(|id| TargetDescription {
            id: id.clone(),
            port: traffic_port,
        })
        .collect()
}

/// `(register, deregister)`, each sorted by `id:port`.
pub fn diff_targets(
    expected: &[TargetDescription],
    actual: &[TargetDescription],
) -> (Vec<TargetDescription>, Vec<TargetDescription>) {
    let expected = KeyedSet::from_items(target_key, expected.iter().cloned());
    let actual = KeyedSet::from_items(target_key, actual.iter().cloned());
    (
        expected.difference(&actual).to_vec(),
        actual.difference(&expected).to_vec(),
    )
}

/// Whether `group` can no longer serve `mapping` and must be replaced.
pub fn needs_recreate(group: &TargetGroup, mapping: &PortMapping) -> bool {
    group.protocol != mapping.traffic_protocol
        || group.port != mapping.traffic_port
        || group.health_check.protocol != mapping.health_check.protocol
        || group.health_check.interval_seconds != mapping.health_check.interval_seconds
}

pub fn listener_needs_modification(listener: &NetworkListener, mapping: &PortMapping) -> bool {
    if listener.protocol != mapping.frontend_protocol {
        return true;
    }
    match mapping.frontend_protocol {
        Protocol::Tls => {
            let policy_differs = mapping.tls_policy.is_some() && listener.ssl_policy != mapping.tls_policy;
            policy_differs
                || listener.certificate_arn.is_none()
                || listener.certificate_arn != mapping.tls_cert_arn
        }
        _ => listener.ssl_policy.is_some() || listener.certificate_arn.is_some(),
    }
}

fn listener_settings(mapping: &PortMapping, target_group_arn: &str) -> ListenerSettings {
    let tls = mapping.frontend_protocol == Protocol::Tls;
    ListenerSettings {
        port: mapping.frontend_port,
        protocol: mapping.frontend_protocol,
        ssl_policy: if tls { mapping.tls_policy.clone() } else { None },
        certificate_arn: if tls { mapping.tls_cert_arn.clone() } else { None },
        target_group_arn: target_group_arn.to_string(),
    }
}

pub struct TargetGroupReconciler<'a> {
    api: &'a dyn NetworkElbApi,
    cluster_id: &'a str,
    register_chunk: usize,
    deregister_chunk: usize,
}

impl<'a> TargetGroupReconciler<'a> {
    pub fn new(api: &'a dyn NetworkElbApi, config: &'a CloudConfig) -> Self {
        Self {
            api,
            cluster_id: &config.cluster_id,
            register_chunk: config.register_targets_chunk_size.max(1),
            deregister_chunk: config.deregister_targets_chunk_size.max(1),
        }
    }

    /// Creates the group for `mapping` and registers every instance.
    pub async fn create(
        &self,
        service: &ServiceRef,
        vpc_id: &str,
        mapping: &PortMapping,
        instance_ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<TargetGroup> {
        let name = target_group_name(self.cluster_id, service, mapping)?;
        info!("Creating target group {} for service {}", name, service);
        let group = self
            .api
            .create_target_group(&CreateTargetGroupRequest {
                name,
                vpc_id: vpc_id.to_string(),
                port: mapping.traffic_port,
                protocol: mapping.traffic_protocol,
                target_type: NLB_TARGET_TYPE_INSTANCE.to_string(),
                health_check: mapping.health_check.to_target_group_health_check(),
                tags: tags.clone(),
            })
            .await?;
        let expected = expected_targets(instance_ids, mapping.traffic_port);
        self.apply_targets(&group.arn, &expected, &[]).await?;
        Ok(group)
    }

    /// Brings a compatible group's targets and mutable health-check settings
    /// in line with `mapping`.
    pub async fn ensure(
        &self,
        group: &TargetGroup,
        mapping: &PortMapping,
        instance_ids: &[String],
    ) -> Result<bool> {
        let expected = expected_targets(instance_ids, mapping.traffic_port);
        let mut changed = self.sync_targets(&group.arn, &expected).await?;

        let desired = mapping.health_check.to_target_group_health_check();
        let mut request = ModifyTargetGroupRequest {
            arn: group.arn.clone(),
            ..Default::default()
        };
        if desired.port != group.health_check.port {
            request.health_check_port = Some(desired.port.clone());
        }
        if desired.healthy_threshold != group.health_check.healthy_threshold {
            request.healthy_threshold = Some(desired.healthy_threshold);
        }
        if desired.unhealthy_threshold != group.health_check.unhealthy_threshold {
            request.unhealthy_threshold = Some(desired.unhealthy_threshold);
        }
        if desired.protocol != Protocol::Tcp && desired.path != group.health_check.path {
            request.health_check_path = desired.path.clone();
        }
        if !request.is_empty() {
            info!("Updating health check of target group {}", group.name);
            self.api.modify_target_group(&request).await?;
            changed = true;
        }
        Ok(changed)
    }

    /// Registers missing targets and deregisters stale ones. Targets that
    /// are already draining are not counted as registered.
    pub async fn sync_targets(&self, arn: &str, expected: &[TargetDescription]) -> Result<bool> {
        let actual: Vec<TargetDescription> = self
            .api
            .describe_target_health(arn)
            .await?
            .into_iter()
            .filter(|health| !health.is_deregistering())
            .map(|health| health.target)
            .collect();
        self.apply_targets(arn, expected, &actual).await
    }

    async fn apply_targets(
        &self,
        arn: &str,
        expected: &[TargetDescription],
        actual: &[TargetDescription],
    ) -> Result<bool> {
        let (register, deregister) = diff_targets(expected, actual);
        debug!(
            "Target diff for {}: {} to register, {} to deregister",
            arn,
            register.len(),
            deregister.len()
        );
        for chunk in register.chunks(self.register_chunk) {
            self.api.register_targets(arn, chunk).await?;
        }
        for chunk in deregister.chunks(self.deregister_chunk) {
            self.api.deregister_targets(arn, chunk).await?;
        }
        Ok(!register.is_empty() || !deregister.is_empty())
    }

    pub async fn create_listener(
        &self,
        load_balancer: &NetworkLoadBalancer,
        service: &ServiceRef,
        mapping: &PortMapping,
        instance_ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<NetworkListener> {
        let group = self
            .create(service, &load_balancer.vpc_id, mapping, instance_ids, tags)
            .await?;
        info!(
            "Creating listener {}/{} on load balancer {}",
            mapping.frontend_port, mapping.frontend_protocol, load_balancer.name
        );
        self.api
            .create_listener(&load_balancer.arn, &listener_settings(mapping, &group.arn), tags)
            .await
    }

    /// Deletes the listener, then the group it forwarded to.
    pub async fn delete_listener(&self, listener: &NetworkListener) -> Result<()> {
        info!(
            "Deleting listener {}/{} ({})",
            listener.port, listener.protocol, listener.arn
        );
        self.api.delete_listener(&listener.arn).await?;
        if let Some(arn) = &listener.target_group_arn {
            self.api.delete_target_group(arn).await?;
        }
        Ok(())
    }

    /// Converges the listeners of an existing load balancer on `mappings`.
    ///
    /// Listeners are matched on (port, protocol). A listener on a wanted port
    /// whose protocol no mapping asks for is taken over and modified in place.
    pub async fn reconcile_listeners(
        &self,
        load_balancer: &NetworkLoadBalancer,
        service: &ServiceRef,
        mappings: &[PortMapping],
        instance_ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let listeners = self.api.describe_listeners(&load_balancer.arn).await?;
        let groups = self.api.describe_target_groups(&load_balancer.arn).await?;
        let wanted: HashSet<(i32, Protocol)> = mappings
            .iter()
            .map(|m| (m.frontend_port, m.frontend_protocol))
            .collect();

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut changed = false;

        for mapping in mappings {
            let exact = listeners.iter().find(|l| {
                !claimed.contains(l.arn.as_str())
                    && l.port == mapping.frontend_port
                    && l.protocol == mapping.frontend_protocol
            });
            let existing = exact.or_else(|| {
                listeners.iter().find(|l| {
                    !claimed.contains(l.arn.as_str())
                        && l.port == mapping.frontend_port
                        && !wanted.contains(&(l.port, l.protocol))
                })
            });

            let Some(listener) = existing else {
                self.create_listener(load_balancer, service, mapping, instance_ids, tags)
                    .await?;
                changed = true;
                continue;
            };
            claimed.insert(listener.arn.as_str());

            let current = listener
                .target_group_arn
                .as_ref()
                .and_then(|arn| groups.iter().find(|g| &g.arn == arn));
            let recreate = current.map_or(true, |group| needs_recreate(group, mapping));
            let mut modify = listener_needs_modification(listener, mapping);

            let target_arn = match current {
                Some(group) if !recreate => group.arn.clone(),
                _ => {
                    info!(
                        "Replacing target group of listener {}/{} on {}",
                        listener.port, listener.protocol, load_balancer.name
                    );
                    modify = true;
                    self.create(service, &load_balancer.vpc_id, mapping, instance_ids, tags)
                        .await?
                        .arn
                }
            };

            if modify {
                info!(
                    "Modifying listener {}/{} on {}",
                    mapping.frontend_port, mapping.frontend_protocol, load_balancer.name
                );
                self.api
                    .modify_listener(&listener.arn, &listener_settings(mapping, &target_arn))
                    .await?;
                changed = true;
            }

            match current {
                Some(group) if !recreate => {
                    changed |= self.ensure(group, mapping, instance_ids).await?;
                }
                _ => {
                    if let Some(old) = listener.target_group_arn.as_ref().filter(|old| **old != target_arn) {
                        info!("Deleting replaced target group {}", old);
                        self.api.delete_target_group(old).await?;
                    }
                }
            }
        }

        for listener in &listeners {
            if !claimed.contains(listener.arn.as_str()) {
                self.delete_listener(listener).await?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Target membership of every listener's group, without touching the
    /// listeners themselves.
    pub async fn sync_membership(
        &self,
        load_balancer: &NetworkLoadBalancer,
        instance_ids: &[String],
    ) -> Result<bool> {
        let listeners = self.api.describe_listeners(&load_balancer.arn).await?;
        let groups = self.api.describe_target_groups(&load_balancer.arn).await?;
        let mut changed = false;
        for listener in &listeners {
            let Some(group) = listener
                .target_group_arn
                .as_ref()
                .and_then(|arn| groups.iter().find(|g| &g.arn == arn))
            else {
                continue;
            };
            let expected = expected_targets(instance_ids, group.port);
            changed |= self.sync_targets(&group.arn, &expected).await?;
        }
        Ok(changed)
    }
}
