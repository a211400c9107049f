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

//! Load-balancer settings that live beside the listeners: attributes,
//! backend and listener policies, the classic health check and tags.
//!
//! Every function here reads the current value first and only issues a
//! mutating call when something differs.

use crate::domain::spec::HealthCheckConfig;
use crate::infrastructure::cloud::api::{ClassicElbApi, NetworkElbApi};
use crate::infrastructure::cloud::model::{
    ClassicAttributes, ClassicHealthCheck, ClassicLoadBalancer, ClassicListener,
    PolicyDescription,
};
use crate::infrastructure::constants::{
    PROXY_PROTOCOL_POLICY_NAME, PROXY_PROTOCOL_POLICY_TYPE, SSL_NEGOTIATION_POLICY_ATTRIBUTE,
    SSL_NEGOTIATION_POLICY_PREFIX, SSL_NEGOTIATION_POLICY_TYPE,
};
use crate::shared::error::{OptionalExt, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Whether the current attributes already satisfy `desired`. Optional fields
/// left unset in `desired` are not compared.
pub fn classic_attributes_satisfied(current: &ClassicAttributes, desired: &ClassicAttributes) -> bool {
    fn optional_matches<T: PartialEq>(current: &Option<T>, desired: &Option<T>) -> bool {
        desired.is_none() || current == desired
    }

    current.access_log.enabled == desired.access_log.enabled
        && optional_matches(&current.access_log.emit_interval, &desired.access_log.emit_interval)
        && optional_matches(&current.access_log.s3_bucket_name, &desired.access_log.s3_bucket_name)
        && optional_matches(
            &current.access_log.s3_bucket_prefix,
            &desired.access_log.s3_bucket_prefix,
        )
        && current.connection_draining.enabled == desired.connection_draining.enabled
        && optional_matches(
            &current.connection_draining.timeout,
            &desired.connection_draining.timeout,
        )
        && current.idle_timeout == desired.idle_timeout
        && current.cross_zone == desired.cross_zone
}

pub async fn sync_classic_attributes(
    elb: &dyn ClassicElbApi,
    load_balancer: &str,
    desired: &ClassicAttributes,
) -> Result<bool> {
    let current = elb.describe_attributes(load_balancer).await?;
    if classic_attributes_satisfied(&current, desired) {
        return Ok(false);
    }
    info!("Updating load-balancer attributes for {}", load_balancer);
    debug!("Attributes {:?} -> {:?}", current, desired);
    elb.modify_attributes(load_balancer, desired).await?;
    Ok(true)
}

/// Only the keys whose value differs are sent.
pub async fn sync_network_attributes(
    elbv2: &dyn NetworkElbApi,
    load_balancer_arn: &str,
    desired: &BTreeMap<String, String>,
) -> Result<bool> {
    let current = elbv2.describe_attributes(load_balancer_arn).await?;
    let changed: BTreeMap<String, String> = desired
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if changed.is_empty() {
        return Ok(false);
    }
    info!(
        "Updating load-balancer attributes for {}: {:?}",
        load_balancer_arn, changed
    );
    elbv2.modify_attributes(load_balancer_arn, &changed).await?;
    Ok(true)
}

fn proxy_protocol_policy() -> PolicyDescription {
    PolicyDescription {
        name: PROXY_PROTOCOL_POLICY_NAME.to_string(),
        type_name: PROXY_PROTOCOL_POLICY_TYPE.to_string(),
        attributes: vec![("ProxyProtocol".to_string(), "true".to_string())],
    }
}

async fn ensure_policy(
    elb: &dyn ClassicElbApi,
    load_balancer: &str,
    policy: &PolicyDescription,
) -> Result<bool> {
    let existing = elb
        .describe_policies(load_balancer, &[policy.name.clone()])
        .await
        .optional()?;
    if existing.is_some_and(|found| !found.is_empty()) {
        return Ok(false);
    }
    info!("Creating policy {} on {}", policy.name, load_balancer);
    elb.create_policy(load_balancer, policy).await?;
    Ok(true)
}

/// Puts the proxy-protocol policy on every listener's backend port when
/// `enabled`, and takes it off otherwise. Backend ports no listener uses
/// any more lose their policies.
pub async fn sync_proxy_protocol(
    elb: &dyn ClassicElbApi,
    load_balancer: &ClassicLoadBalancer,
    listeners: &[ClassicListener],
    enabled: bool,
) -> Result<bool> {
    let name = &load_balancer.name;
    let mut changed = false;
    let policies = if enabled {
        changed |= ensure_policy(elb, name, &proxy_protocol_policy()).await?;
        vec![PROXY_PROTOCOL_POLICY_NAME.to_string()]
    } else {
        Vec::new()
    };

    // instance port -> (has proxy policy, still used)
    let mut backends: BTreeMap<i32, (bool, bool)> = load_balancer
        .backend_server_descriptions
        .iter()
        .map(|b| {
            let has_policy = b.policy_names.iter().any(|p| p == PROXY_PROTOCOL_POLICY_NAME);
            (b.instance_port, (has_policy, false))
        })
        .collect();

    let mut ports: Vec<i32> = listeners.iter().map(|l| l.instance_port).collect();
    ports.sort_unstable();
    ports.dedup();
    for port in ports {
        let set_policy = match backends.get_mut(&port) {
            Some((has_policy, used)) => {
                *used = true;
                *has_policy != enabled
            }
            None => enabled,
        };
        if set_policy {
            info!(
                "Setting backend policies {:?} for port {} of {}",
                policies, port, name
            );
            elb.set_backend_policies(name, port, &policies).await?;
            changed = true;
        }
    }

    for (port, (_, used)) in backends {
        if !used {
            info!("Clearing backend policies for unused port {} of {}", port, name);
            elb.set_backend_policies(name, port, &[]).await?;
            changed = true;
        }
    }
    Ok(changed)
}

pub fn ssl_negotiation_policy_name(policy: &str) -> String {
    format!("{}{}", SSL_NEGOTIATION_POLICY_PREFIX, policy)
}

/// Creates the named predefined negotiation policy on the load balancer and
/// attaches it to every listener that terminates TLS.
pub async fn sync_ssl_negotiation_policy(
    elb: &dyn ClassicElbApi,
    load_balancer: &ClassicLoadBalancer,
    listeners: &[ClassicListener],
    policy: &str,
) -> Result<bool> {
    let name = &load_balancer.name;
    let policy_name = ssl_negotiation_policy_name(policy);
    let description = PolicyDescription {
        name: policy_name.clone(),
        type_name: SSL_NEGOTIATION_POLICY_TYPE.to_string(),
        attributes: vec![(SSL_NEGOTIATION_POLICY_ATTRIBUTE.to_string(), policy.to_string())],
    };
    let mut changed = ensure_policy(elb, name, &description).await?;

    for listener in listeners.iter().filter(|l| l.ssl_certificate_id.is_some()) {
        let current = load_balancer
            .listener_descriptions
            .iter()
            .find(|d| d.listener.load_balancer_port == listener.load_balancer_port);
        let attached = current.is_some_and(|d| d.policy_names == [policy_name.clone()]);
        if attached {
            continue;
        }
        info!(
            "Setting SSL negotiation policy {} on port {} of {}",
            policy_name, listener.load_balancer_port, name
        );
        elb.set_listener_policies(name, listener.load_balancer_port, &[policy_name.clone()])
            .await?;
        changed = true;
    }
    Ok(changed)
}

pub fn classic_health_check(config: &HealthCheckConfig) -> ClassicHealthCheck {
    ClassicHealthCheck {
        target: config.classic_target(),
        healthy_threshold: config.healthy_threshold,
        unhealthy_threshold: config.unhealthy_threshold,
        interval: config.interval_seconds,
        timeout: config.timeout_seconds,
    }
}

pub async fn sync_classic_health_check(
    elb: &dyn ClassicElbApi,
    load_balancer: &ClassicLoadBalancer,
    config: &HealthCheckConfig,
) -> Result<bool> {
    let desired = classic_health_check(config);
    if load_balancer.health_check.as_ref() == Some(&desired) {
        return Ok(false);
    }
    info!(
        "Configuring health check {} on {}",
        desired.target, load_balancer.name
    );
    elb.configure_health_check(&load_balancer.name, &desired)
        .await?;
    Ok(true)
}

/// Adds tags that are missing or carry a different value. Tags are never
/// removed.
pub async fn sync_classic_tags(
    elb: &dyn ClassicElbApi,
    load_balancer: &str,
    desired: &BTreeMap<String, String>,
) -> Result<bool> {
    let current = elb.describe_tags(load_balancer).await?;
    let missing: BTreeMap<String, String> = desired
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }
    info!("Adding tags {:?} to {}", missing.keys(), load_balancer);
    elb.add_tags(load_balancer, &missing).await?;
    Ok(true)
}
