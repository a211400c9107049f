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

//! In-memory stand-in for the load-balancer and EC2 APIs.
//!
//! `FakeCloud` keeps just enough server-side behavior to exercise the
//! reconcilers honestly: EC2 merges ingress entries that share protocol and
//! ports, rejects duplicate rules, refuses to delete target groups that are still
//! attached, and treats `CreateTargetGroup` with identical settings as
//! idempotent. Every call is recorded so callers can assert on the exact
//! sequence of mutating operations.

use crate::infrastructure::cloud::api::{ClassicElbApi, CloudServices, Ec2Api, NetworkElbApi};
use crate::infrastructure::cloud::model::*;
use crate::shared::error::LbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const ACCOUNT_ID: &str = "000000000000";

/// One recorded API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub service: &'static str,
    pub operation: &'static str,
    pub target: String,
    pub mutating: bool,
    pub at: DateTime<Utc>,
}

/// Seed data for a fake account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FakeInventory {
    pub region: String,
    pub subnets: Vec<Subnet>,
    pub instances: Vec<Instance>,
    pub security_groups: Vec<SecurityGroup>,
}

impl FakeInventory {
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, LbError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// A two-zone VPC with one cluster-tagged node security group shared by
    /// every instance.
    pub fn bootstrap(cluster_id: &str, vpc_id: &str, instance_ids: &[String]) -> Self {
        let cluster_tag = format!("kubernetes.io/cluster/{}", cluster_id);
        let zones = ["us-east-1a", "us-east-1b"];

        let subnets = zones
            .iter()
            .enumerate()
            .map(|(i, zone)| Subnet {
                id: format!("subnet-{:08x}", i + 1),
                vpc_id: vpc_id.to_string(),
                availability_zone: zone.to_string(),
                cidr_block: format!("10.0.{}.0/24", i),
                tags: BTreeMap::from([
                    (cluster_tag.clone(), "shared".to_string()),
                    ("kubernetes.io/role/elb".to_string(), "1".to_string()),
                ]),
            })
            .collect::<Vec<_>>();

        let node_group = SecurityGroup {
            id: "sg-nodes".to_string(),
            name: format!("nodes.{}", cluster_id),
            description: "Kubernetes nodes".to_string(),
            vpc_id: vpc_id.to_string(),
            tags: BTreeMap::from([(cluster_tag, "owned".to_string())]),
            ip_permissions: Vec::new(),
        };

        let instances = instance_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let subnet = &subnets[i % subnets.len()];
                Instance {
                    id: id.clone(),
                    availability_zone: subnet.availability_zone.clone(),
                    subnet_id: Some(subnet.id.clone()),
                    security_groups: vec![GroupIdentifier {
                        id: node_group.id.clone(),
                        name: node_group.name.clone(),
                    }],
                }
            })
            .collect();

        Self {
            region: "us-east-1".to_string(),
            subnets,
            instances,
            security_groups: vec![node_group],
        }
    }
}

struct ClassicEntry {
    lb: ClassicLoadBalancer,
    attributes: ClassicAttributes,
    policies: Vec<PolicyDescription>,
    tags: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    region: String,
    next_id: u64,
    classic: BTreeMap<String, ClassicEntry>,
    network: BTreeMap<String, NetworkLoadBalancer>,
    network_attributes: BTreeMap<String, BTreeMap<String, String>>,
    listeners: BTreeMap<String, NetworkListener>,
    target_groups: BTreeMap<String, TargetGroup>,
    targets: BTreeMap<String, Vec<TargetHealthDescription>>,
    security_groups: BTreeMap<String, SecurityGroup>,
    instances: BTreeMap<String, Instance>,
    subnets: BTreeMap<String, Subnet>,
    dependency_violations: BTreeMap<String, usize>,
    failures: BTreeMap<String, String>,
    calls: Vec<ApiCall>,
}

impl FakeState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:017x}", self.next_id)
    }

    fn record(
        &mut self,
        service: &'static str,
        operation: &'static str,
        target: impl Into<String>,
        mutating: bool,
    ) -> Result<(), LbError> {
        self.calls.push(ApiCall {
            service,
            operation,
            target: target.into(),
            mutating,
            at: Utc::now(),
        });
        match self.failures.remove(operation) {
            Some(code) => Err(LbError::cloud(
                code,
                format!("{} failed by injected fault", operation),
            )),
            None => Ok(()),
        }
    }

    fn classic_entry(&mut self, name: &str) -> Result<&mut ClassicEntry, LbError> {
        self.classic
            .get_mut(name)
            .ok_or_else(|| LbError::not_found("LoadBalancer", name))
    }

    fn security_group_mut(&mut self, group_id: &str) -> Result<&mut SecurityGroup, LbError> {
        self.security_groups
            .get_mut(group_id)
            .ok_or_else(|| LbError::not_found("SecurityGroup", group_id))
    }

    fn detach_target_group(&mut self, target_group_arn: &str, load_balancer_arn: &str) {
        let still_used = self.listeners.values().any(|l| {
            l.load_balancer_arn == load_balancer_arn
                && l.target_group_arn.as_deref() == Some(target_group_arn)
        });
        if still_used {
            return;
        }
        if let Some(tg) = self.target_groups.get_mut(target_group_arn) {
            tg.load_balancer_arns.retain(|arn| arn != load_balancer_arn);
        }
    }

    fn attach_target_group(
        &mut self,
        target_group_arn: &str,
        load_balancer_arn: &str,
    ) -> Result<(), LbError> {
        let tg = self
            .target_groups
            .get_mut(target_group_arn)
            .ok_or_else(|| LbError::not_found("TargetGroup", target_group_arn))?;
        if !tg.load_balancer_arns.iter().any(|a| a == load_balancer_arn) {
            tg.load_balancer_arns.push(load_balancer_arn.to_string());
        }
        Ok(())
    }
}

/// Splits a permission into entries carrying exactly one range or peer.
fn atoms(permission: &IpPermission) -> Vec<IpPermission> {
    let mut out = Vec::new();
    for range in &permission.ip_ranges {
        out.push(IpPermission {
            ip_ranges: vec![range.clone()],
            user_id_group_pairs: Vec::new(),
            ..permission.clone()
        });
    }
    for pair in &permission.user_id_group_pairs {
        out.push(IpPermission {
            ip_ranges: Vec::new(),
            user_id_group_pairs: vec![pair.clone()],
            ..permission.clone()
        });
    }
    out
}

fn same_rule(a: &IpPermission, b: &IpPermission) -> bool {
    a.ip_protocol == b.ip_protocol && a.from_port == b.from_port && a.to_port == b.to_port
}

/// Whether `existing` already grants the single-peer `atom`. Descriptions do
/// not take part, matching EC2's duplicate detection.
fn grants(existing: &IpPermission, atom: &IpPermission) -> bool {
    if !same_rule(existing, atom) {
        return false;
    }
    let range_hit = atom.ip_ranges.iter().all(|r| {
        existing
            .ip_ranges
            .iter()
            .any(|e| e.cidr_ip == r.cidr_ip)
    });
    let pair_hit = atom.user_id_group_pairs.iter().all(|p| {
        existing
            .user_id_group_pairs
            .iter()
            .any(|e| e.group_id == p.group_id)
    });
    range_hit && pair_hit
}

/// In-memory cloud account.
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new("us-east-1")
    }
}

impl FakeCloud {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                region: region.into(),
                ..Default::default()
            }),
        }
    }

    pub async fn from_inventory(inventory: FakeInventory) -> Self {
        let region = if inventory.region.is_empty() {
            "us-east-1".to_string()
        } else {
            inventory.region.clone()
        };
        let cloud = Self::new(region);
        for subnet in inventory.subnets {
            cloud.add_subnet(subnet).await;
        }
        for instance in inventory.instances {
            cloud.add_instance(instance).await;
        }
        for group in inventory.security_groups {
            cloud.add_security_group(group).await;
        }
        cloud
    }

    pub fn services(self: &Arc<Self>) -> CloudServices {
        CloudServices::new(self.clone(), self.clone(), self.clone())
    }

    pub async fn add_subnet(&self, subnet: Subnet) {
        let mut state = self.state.lock().await;
        state.subnets.insert(subnet.id.clone(), subnet);
    }

    pub async fn add_instance(&self, instance: Instance) {
        let mut state = self.state.lock().await;
        state.instances.insert(instance.id.clone(), instance);
    }

    pub async fn remove_instance(&self, instance_id: &str) {
        let mut state = self.state.lock().await;
        state.instances.remove(instance_id);
    }

    pub async fn add_security_group(&self, group: SecurityGroup) {
        let mut state = self.state.lock().await;
        state.security_groups.insert(group.id.clone(), group);
    }

    /// Makes the next `times` deletions of `group_id` fail with
    /// `DependencyViolation`. `usize::MAX` never lets it go.
    pub async fn inject_dependency_violations(&self, group_id: &str, times: usize) {
        let mut state = self.state.lock().await;
        state
            .dependency_violations
            .insert(group_id.to_string(), times);
    }

    /// Makes the next call of `operation` fail with the given error code.
    pub async fn fail_next(&self, operation: &str, code: &str) {
        let mut state = self.state.lock().await;
        state
            .failures
            .insert(operation.to_string(), code.to_string());
    }

    pub async fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn mutating_calls(&self) -> Vec<ApiCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.mutating)
            .cloned()
            .collect()
    }

    /// Names of the mutating operations in call order.
    pub async fn mutating_operations(&self) -> Vec<&'static str> {
        self.mutating_calls()
            .await
            .iter()
            .map(|c| c.operation)
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    pub async fn security_group(&self, group_id: &str) -> Option<SecurityGroup> {
        self.state
            .lock()
            .await
            .security_groups
            .get(group_id)
            .cloned()
    }

    pub async fn security_group_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .security_groups
            .keys()
            .cloned()
            .collect()
    }

    pub async fn target_group_arns(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .target_groups
            .keys()
            .cloned()
            .collect()
    }

    pub async fn classic_load_balancer(&self, name: &str) -> Option<ClassicLoadBalancer> {
        self.state
            .lock()
            .await
            .classic
            .get(name)
            .map(|entry| entry.lb.clone())
    }

    pub async fn network_load_balancer(&self, name: &str) -> Option<NetworkLoadBalancer> {
        self.state.lock().await.network.get(name).cloned()
    }
}

#[async_trait::async_trait]
impl ClassicElbApi for FakeCloud {
    async fn describe_load_balancer(&self, name: &str) -> Result<ClassicLoadBalancer, LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DescribeLoadBalancers", name, false)?;
        state
            .classic
            .get(name)
            .map(|entry| entry.lb.clone())
            .ok_or_else(|| LbError::not_found("LoadBalancer", name))
    }

    async fn create_load_balancer(
        &self,
        request: &CreateClassicLoadBalancerRequest,
    ) -> Result<String, LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "CreateLoadBalancer", &request.name, true)?;
        if state.classic.contains_key(&request.name) {
            return Err(LbError::duplicate("LoadBalancer", &request.name));
        }
        let id = state.next_id();
        let dns_name = format!(
            "{}-{}.{}.elb.amazonaws.com",
            request.name,
            &id[id.len() - 8..],
            state.region
        );
        let vpc_id = request
            .subnets
            .first()
            .and_then(|s| state.subnets.get(s))
            .map(|s| s.vpc_id.clone())
            .unwrap_or_default();
        let health_check = request.listeners.first().map(|l| ClassicHealthCheck {
            target: format!("TCP:{}", l.instance_port),
            healthy_threshold: 10,
            unhealthy_threshold: 2,
            interval: 30,
            timeout: 5,
        });
        let lb = ClassicLoadBalancer {
            name: request.name.clone(),
            dns_name: dns_name.clone(),
            scheme: if request.internal {
                "internal".to_string()
            } else {
                "internet-facing".to_string()
            },
            vpc_id,
            subnets: request.subnets.clone(),
            security_groups: request.security_groups.clone(),
            listener_descriptions: request
                .listeners
                .iter()
                .map(|l| ClassicListenerDescription {
                    listener: l.clone(),
                    policy_names: Vec::new(),
                })
                .collect(),
            backend_server_descriptions: Vec::new(),
            instances: Vec::new(),
            health_check,
        };
        let attributes = ClassicAttributes {
            access_log: AccessLog::default(),
            connection_draining: ConnectionDraining {
                enabled: false,
                timeout: Some(300),
            },
            idle_timeout: 60,
            cross_zone: false,
        };
        state.classic.insert(
            request.name.clone(),
            ClassicEntry {
                lb,
                attributes,
                policies: Vec::new(),
                tags: request.tags.clone(),
            },
        );
        Ok(dns_name)
    }

    async fn delete_load_balancer(&self, name: &str) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DeleteLoadBalancer", name, true)?;
        state.classic.remove(name);
        Ok(())
    }

    async fn attach_subnets(&self, name: &str, subnets: &[String]) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "AttachLoadBalancerToSubnets", name, true)?;
        let entry = state.classic_entry(name)?;
        for subnet in subnets {
            if !entry.lb.subnets.contains(subnet) {
                entry.lb.subnets.push(subnet.clone());
            }
        }
        Ok(())
    }

    async fn detach_subnets(&self, name: &str, subnets: &[String]) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DetachLoadBalancerFromSubnets", name, true)?;
        let entry = state.classic_entry(name)?;
        entry.lb.subnets.retain(|s| !subnets.contains(s));
        Ok(())
    }

    async fn apply_security_groups(&self, name: &str, groups: &[String]) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "ApplySecurityGroupsToLoadBalancer", name, true)?;
        let entry = state.classic_entry(name)?;
        entry.lb.security_groups = groups.to_vec();
        Ok(())
    }

    async fn create_listeners(
        &self,
        name: &str,
        listeners: &[ClassicListener],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "CreateLoadBalancerListeners", name, true)?;
        let entry = state.classic_entry(name)?;
        for listener in listeners {
            let clash = entry
                .lb
                .listener_descriptions
                .iter()
                .any(|d| d.listener.load_balancer_port == listener.load_balancer_port);
            if clash {
                return Err(LbError::duplicate(
                    "Listener",
                    format!("{}:{}", name, listener.load_balancer_port),
                ));
            }
            entry.lb.listener_descriptions.push(ClassicListenerDescription {
                listener: listener.clone(),
                policy_names: Vec::new(),
            });
        }
        Ok(())
    }

    async fn delete_listeners(&self, name: &str, ports: &[i32]) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DeleteLoadBalancerListeners", name, true)?;
        let entry = state.classic_entry(name)?;
        entry
            .lb
            .listener_descriptions
            .retain(|d| !ports.contains(&d.listener.load_balancer_port));
        Ok(())
    }

    async fn describe_policies(
        &self,
        name: &str,
        policy_names: &[String],
    ) -> Result<Vec<PolicyDescription>, LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DescribeLoadBalancerPolicies", name, false)?;
        let entry = state.classic_entry(name)?;
        let mut found = Vec::new();
        for policy_name in policy_names {
            match entry.policies.iter().find(|p| &p.name == policy_name) {
                Some(policy) => found.push(policy.clone()),
                None => return Err(LbError::not_found("Policy", policy_name)),
            }
        }
        Ok(found)
    }

    async fn create_policy(&self, name: &str, policy: &PolicyDescription) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "CreateLoadBalancerPolicy", name, true)?;
        let entry = state.classic_entry(name)?;
        if entry.policies.iter().any(|p| p.name == policy.name) {
            return Err(LbError::duplicate("Policy", &policy.name));
        }
        entry.policies.push(policy.clone());
        Ok(())
    }

    async fn set_backend_policies(
        &self,
        name: &str,
        instance_port: i32,
        policy_names: &[String],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "SetLoadBalancerPoliciesForBackendServer", name, true)?;
        let entry = state.classic_entry(name)?;
        entry
            .lb
            .backend_server_descriptions
            .retain(|b| b.instance_port != instance_port);
        if !policy_names.is_empty() {
            entry
                .lb
                .backend_server_descriptions
                .push(BackendServerDescription {
                    instance_port,
                    policy_names: policy_names.to_vec(),
                });
        }
        Ok(())
    }

    async fn set_listener_policies(
        &self,
        name: &str,
        load_balancer_port: i32,
        policy_names: &[String],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "SetLoadBalancerPoliciesOfListener", name, true)?;
        let entry = state.classic_entry(name)?;
        let description = entry
            .lb
            .listener_descriptions
            .iter_mut()
            .find(|d| d.listener.load_balancer_port == load_balancer_port)
            .ok_or_else(|| {
                LbError::not_found("Listener", format!("{}:{}", name, load_balancer_port))
            })?;
        description.policy_names = policy_names.to_vec();
        Ok(())
    }

    async fn describe_attributes(&self, name: &str) -> Result<ClassicAttributes, LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DescribeLoadBalancerAttributes", name, false)?;
        Ok(state.classic_entry(name)?.attributes.clone())
    }

    async fn modify_attributes(
        &self,
        name: &str,
        attributes: &ClassicAttributes,
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "ModifyLoadBalancerAttributes", name, true)?;
        let entry = state.classic_entry(name)?;
        let current = &mut entry.attributes;
        current.access_log.enabled = attributes.access_log.enabled;
        if attributes.access_log.emit_interval.is_some() {
            current.access_log.emit_interval = attributes.access_log.emit_interval;
        }
        if attributes.access_log.s3_bucket_name.is_some() {
            current.access_log.s3_bucket_name = attributes.access_log.s3_bucket_name.clone();
        }
        if attributes.access_log.s3_bucket_prefix.is_some() {
            current.access_log.s3_bucket_prefix = attributes.access_log.s3_bucket_prefix.clone();
        }
        current.connection_draining.enabled = attributes.connection_draining.enabled;
        if attributes.connection_draining.timeout.is_some() {
            current.connection_draining.timeout = attributes.connection_draining.timeout;
        }
        current.idle_timeout = attributes.idle_timeout;
        current.cross_zone = attributes.cross_zone;
        Ok(())
    }

    async fn configure_health_check(
        &self,
        name: &str,
        health_check: &ClassicHealthCheck,
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "ConfigureHealthCheck", name, true)?;
        state.classic_entry(name)?.lb.health_check = Some(health_check.clone());
        Ok(())
    }

    async fn register_instances(&self, name: &str, instance_ids: &[String]) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "RegisterInstancesWithLoadBalancer", name, true)?;
        let entry = state.classic_entry(name)?;
        for id in instance_ids {
            if !entry.lb.instances.contains(id) {
                entry.lb.instances.push(id.clone());
            }
        }
        Ok(())
    }

    async fn deregister_instances(
        &self,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DeregisterInstancesFromLoadBalancer", name, true)?;
        let entry = state.classic_entry(name)?;
        entry.lb.instances.retain(|i| !instance_ids.contains(i));
        Ok(())
    }

    async fn describe_tags(&self, name: &str) -> Result<BTreeMap<String, String>, LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "DescribeTags", name, false)?;
        Ok(state.classic_entry(name)?.tags.clone())
    }

    async fn add_tags(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elb", "AddTags", name, true)?;
        let entry = state.classic_entry(name)?;
        entry
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[async_trait::async_trait]
impl NetworkElbApi for FakeCloud {
    async fn describe_load_balancer(&self, name: &str) -> Result<NetworkLoadBalancer, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DescribeLoadBalancers", name, false)?;
        state
            .network
            .get(name)
            .cloned()
            .ok_or_else(|| LbError::not_found("LoadBalancer", name))
    }

    async fn create_load_balancer(
        &self,
        request: &CreateNetworkLoadBalancerRequest,
    ) -> Result<NetworkLoadBalancer, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "CreateLoadBalancer", &request.name, true)?;
        if state.network.contains_key(&request.name) {
            return Err(LbError::duplicate("LoadBalancer", &request.name));
        }
        let mut availability_zones = Vec::new();
        let mut vpc_id = String::new();
        for mapping in &request.subnet_mappings {
            let subnet = state
                .subnets
                .get(&mapping.subnet_id)
                .ok_or_else(|| LbError::not_found("Subnet", &mapping.subnet_id))?;
            vpc_id = subnet.vpc_id.clone();
            availability_zones.push(AvailabilityZone {
                zone_name: subnet.availability_zone.clone(),
                subnet_id: subnet.id.clone(),
            });
        }
        let id = state.next_id();
        let lb = NetworkLoadBalancer {
            arn: format!(
                "arn:aws:elasticloadbalancing:{}:{}:loadbalancer/net/{}/{}",
                state.region, ACCOUNT_ID, request.name, id
            ),
            name: request.name.clone(),
            dns_name: format!(
                "{}-{}.elb.{}.amazonaws.com",
                request.name,
                &id[id.len() - 8..],
                state.region
            ),
            scheme: if request.internal {
                "internal".to_string()
            } else {
                "internet-facing".to_string()
            },
            vpc_id,
            state: LoadBalancerState::Active,
            availability_zones,
        };
        state.network_attributes.insert(
            lb.arn.clone(),
            BTreeMap::from([
                ("access_logs.s3.bucket".to_string(), String::new()),
                ("access_logs.s3.enabled".to_string(), "false".to_string()),
                ("access_logs.s3.prefix".to_string(), String::new()),
                ("deletion_protection.enabled".to_string(), "false".to_string()),
                (
                    "load_balancing.cross_zone.enabled".to_string(),
                    "false".to_string(),
                ),
            ]),
        );
        state.network.insert(request.name.clone(), lb.clone());
        Ok(lb)
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DeleteLoadBalancer", arn, true)?;
        state.network.retain(|_, lb| lb.arn != arn);
        state.network_attributes.remove(arn);
        state.listeners.retain(|_, l| l.load_balancer_arn != arn);
        for tg in state.target_groups.values_mut() {
            tg.load_balancer_arns.retain(|a| a != arn);
        }
        Ok(())
    }

    async fn describe_listeners(
        &self,
        load_balancer_arn: &str,
    ) -> Result<Vec<NetworkListener>, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DescribeListeners", load_balancer_arn, false)?;
        Ok(state
            .listeners
            .values()
            .filter(|l| l.load_balancer_arn == load_balancer_arn)
            .cloned()
            .collect())
    }

    async fn create_listener(
        &self,
        load_balancer_arn: &str,
        settings: &ListenerSettings,
        _tags: &BTreeMap<String, String>,
    ) -> Result<NetworkListener, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "CreateListener", load_balancer_arn, true)?;
        let clash = state
            .listeners
            .values()
            .any(|l| l.load_balancer_arn == load_balancer_arn && l.port == settings.port);
        if clash {
            return Err(LbError::duplicate(
                "Listener",
                format!("{}:{}", load_balancer_arn, settings.port),
            ));
        }
        state.attach_target_group(&settings.target_group_arn, load_balancer_arn)?;
        let id = state.next_id();
        let listener = NetworkListener {
            arn: format!(
                "{}/{}",
                load_balancer_arn.replace(":loadbalancer/", ":listener/"),
                id
            ),
            load_balancer_arn: load_balancer_arn.to_string(),
            port: settings.port,
            protocol: settings.protocol,
            ssl_policy: settings.ssl_policy.clone(),
            certificate_arn: settings.certificate_arn.clone(),
            target_group_arn: Some(settings.target_group_arn.clone()),
        };
        state.listeners.insert(listener.arn.clone(), listener.clone());
        Ok(listener)
    }

    async fn modify_listener(
        &self,
        listener_arn: &str,
        settings: &ListenerSettings,
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "ModifyListener", listener_arn, true)?;
        let current = state
            .listeners
            .get(listener_arn)
            .cloned()
            .ok_or_else(|| LbError::not_found("Listener", listener_arn))?;
        state.attach_target_group(&settings.target_group_arn, &current.load_balancer_arn)?;
        if let Some(listener) = state.listeners.get_mut(listener_arn) {
            listener.port = settings.port;
            listener.protocol = settings.protocol;
            listener.ssl_policy = settings.ssl_policy.clone();
            listener.certificate_arn = settings.certificate_arn.clone();
            listener.target_group_arn = Some(settings.target_group_arn.clone());
        }
        if let Some(old) = current.target_group_arn {
            if old != settings.target_group_arn {
                state.detach_target_group(&old, &current.load_balancer_arn);
            }
        }
        Ok(())
    }

    async fn delete_listener(&self, listener_arn: &str) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DeleteListener", listener_arn, true)?;
        let removed = state
            .listeners
            .remove(listener_arn)
            .ok_or_else(|| LbError::not_found("Listener", listener_arn))?;
        if let Some(tg) = removed.target_group_arn {
            state.detach_target_group(&tg, &removed.load_balancer_arn);
        }
        Ok(())
    }

    async fn describe_target_groups(
        &self,
        load_balancer_arn: &str,
    ) -> Result<Vec<TargetGroup>, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DescribeTargetGroups", load_balancer_arn, false)?;
        Ok(state
            .target_groups
            .values()
            .filter(|tg| tg.load_balancer_arns.iter().any(|a| a == load_balancer_arn))
            .cloned()
            .collect())
    }

    async fn create_target_group(
        &self,
        request: &CreateTargetGroupRequest,
    ) -> Result<TargetGroup, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "CreateTargetGroup", &request.name, true)?;
        if let Some(existing) = state.target_groups.values().find(|tg| tg.name == request.name) {
            let identical = existing.port == request.port
                && existing.protocol == request.protocol
                && existing.vpc_id == request.vpc_id
                && existing.health_check == request.health_check;
            return if identical {
                Ok(existing.clone())
            } else {
                Err(LbError::duplicate("TargetGroup", &request.name))
            };
        }
        let id = state.next_id();
        let tg = TargetGroup {
            arn: format!(
                "arn:aws:elasticloadbalancing:{}:{}:targetgroup/{}/{}",
                state.region, ACCOUNT_ID, request.name, id
            ),
            name: request.name.clone(),
            vpc_id: request.vpc_id.clone(),
            port: request.port,
            protocol: request.protocol,
            target_type: request.target_type.clone(),
            health_check: request.health_check.clone(),
            load_balancer_arns: Vec::new(),
        };
        state.target_groups.insert(tg.arn.clone(), tg.clone());
        Ok(tg)
    }

    async fn modify_target_group(&self, request: &ModifyTargetGroupRequest) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "ModifyTargetGroup", &request.arn, true)?;
        let tg = state
            .target_groups
            .get_mut(&request.arn)
            .ok_or_else(|| LbError::not_found("TargetGroup", &request.arn))?;
        if let Some(port) = &request.health_check_port {
            tg.health_check.port = port.clone();
        }
        if let Some(path) = &request.health_check_path {
            tg.health_check.path = Some(path.clone());
        }
        if let Some(healthy) = request.healthy_threshold {
            tg.health_check.healthy_threshold = healthy;
        }
        if let Some(unhealthy) = request.unhealthy_threshold {
            tg.health_check.unhealthy_threshold = unhealthy;
        }
        Ok(())
    }

    async fn delete_target_group(&self, arn: &str) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DeleteTargetGroup", arn, true)?;
        let in_use = state
            .target_groups
            .get(arn)
            .map(|tg| !tg.load_balancer_arns.is_empty())
            .unwrap_or(false);
        if in_use {
            return Err(LbError::cloud(
                "ResourceInUse",
                format!("Target group '{}' is currently in use by a listener", arn),
            ));
        }
        state.target_groups.remove(arn);
        state.targets.remove(arn);
        Ok(())
    }

    async fn register_targets(
        &self,
        target_group_arn: &str,
        targets: &[TargetDescription],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "RegisterTargets", target_group_arn, true)?;
        if !state.target_groups.contains_key(target_group_arn) {
            return Err(LbError::not_found("TargetGroup", target_group_arn));
        }
        let registered = state.targets.entry(target_group_arn.to_string()).or_default();
        for target in targets {
            if !registered.iter().any(|t| &t.target == target) {
                registered.push(TargetHealthDescription {
                    target: target.clone(),
                    state: "initial".to_string(),
                    reason: Some("Elb.RegistrationInProgress".to_string()),
                });
            }
        }
        Ok(())
    }

    async fn deregister_targets(
        &self,
        target_group_arn: &str,
        targets: &[TargetDescription],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DeregisterTargets", target_group_arn, true)?;
        if let Some(registered) = state.targets.get_mut(target_group_arn) {
            registered.retain(|t| !targets.contains(&t.target));
        }
        Ok(())
    }

    async fn describe_target_health(
        &self,
        target_group_arn: &str,
    ) -> Result<Vec<TargetHealthDescription>, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DescribeTargetHealth", target_group_arn, false)?;
        if !state.target_groups.contains_key(target_group_arn) {
            return Err(LbError::not_found("TargetGroup", target_group_arn));
        }
        Ok(state
            .targets
            .get(target_group_arn)
            .cloned()
            .unwrap_or_default())
    }

    async fn describe_attributes(
        &self,
        load_balancer_arn: &str,
    ) -> Result<BTreeMap<String, String>, LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "DescribeLoadBalancerAttributes", load_balancer_arn, false)?;
        state
            .network_attributes
            .get(load_balancer_arn)
            .cloned()
            .ok_or_else(|| LbError::not_found("LoadBalancer", load_balancer_arn))
    }

    async fn modify_attributes(
        &self,
        load_balancer_arn: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("elbv2", "ModifyLoadBalancerAttributes", load_balancer_arn, true)?;
        let current = state
            .network_attributes
            .get_mut(load_balancer_arn)
            .ok_or_else(|| LbError::not_found("LoadBalancer", load_balancer_arn))?;
        current.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[async_trait::async_trait]
impl Ec2Api for FakeCloud {
    async fn describe_security_groups(
        &self,
        filter: &SecurityGroupFilter,
    ) -> Result<Vec<SecurityGroup>, LbError> {
        let mut state = self.state.lock().await;
        let target = match filter {
            SecurityGroupFilter::All => "*".to_string(),
            SecurityGroupFilter::Ids(ids) => ids.join(","),
            SecurityGroupFilter::NameInVpc { name, .. } => name.clone(),
            SecurityGroupFilter::IngressFromGroup(id) => format!("ingress-from={}", id),
        };
        state.record("ec2", "DescribeSecurityGroups", target, false)?;
        let groups = state.security_groups.values().filter(|sg| match filter {
            SecurityGroupFilter::All => true,
            SecurityGroupFilter::Ids(ids) => ids.contains(&sg.id),
            SecurityGroupFilter::NameInVpc { name, vpc_id } => {
                &sg.name == name && &sg.vpc_id == vpc_id
            }
            SecurityGroupFilter::IngressFromGroup(source) => sg.ip_permissions.iter().any(|p| {
                p.user_id_group_pairs
                    .iter()
                    .any(|pair| &pair.group_id == source)
            }),
        });
        Ok(groups.cloned().collect())
    }

    async fn create_security_group(
        &self,
        request: &CreateSecurityGroupRequest,
    ) -> Result<String, LbError> {
        let mut state = self.state.lock().await;
        state.record("ec2", "CreateSecurityGroup", &request.name, true)?;
        let exists = state
            .security_groups
            .values()
            .any(|sg| sg.name == request.name && sg.vpc_id == request.vpc_id);
        if exists {
            return Err(LbError::duplicate("SecurityGroup", &request.name));
        }
        let id = format!("sg-{}", state.next_id());
        state.security_groups.insert(
            id.clone(),
            SecurityGroup {
                id: id.clone(),
                name: request.name.clone(),
                description: request.description.clone(),
                vpc_id: request.vpc_id.clone(),
                tags: request.tags.clone(),
                ip_permissions: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("ec2", "DeleteSecurityGroup", group_id, true)?;
        if let Some(remaining) = state.dependency_violations.get_mut(group_id) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(LbError::dependency_violation(
                    "SecurityGroup",
                    group_id,
                    "resource has a dependent object",
                ));
            }
        }
        let attached = state
            .classic
            .values()
            .any(|entry| entry.lb.security_groups.iter().any(|g| g == group_id));
        let referenced = state.security_groups.values().any(|sg| {
            sg.ip_permissions.iter().any(|p| {
                p.user_id_group_pairs
                    .iter()
                    .any(|pair| pair.group_id == group_id)
            })
        });
        if attached || referenced {
            return Err(LbError::dependency_violation(
                "SecurityGroup",
                group_id,
                "resource has a dependent object",
            ));
        }
        state
            .security_groups
            .remove(group_id)
            .map(|_| ())
            .ok_or_else(|| LbError::not_found("SecurityGroup", group_id))
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("ec2", "AuthorizeSecurityGroupIngress", group_id, true)?;
        let group = state.security_group_mut(group_id)?;
        let requested: Vec<IpPermission> = permissions.iter().flat_map(atoms).collect();
        for atom in &requested {
            if group.ip_permissions.iter().any(|p| grants(p, atom)) {
                return Err(LbError::duplicate(
                    "SecurityGroupRule",
                    format!("{}:{:?}", group_id, atom),
                ));
            }
        }
        for atom in requested {
            match group.ip_permissions.iter_mut().find(|p| same_rule(p, &atom)) {
                Some(existing) => {
                    existing.ip_ranges.extend(atom.ip_ranges);
                    existing.user_id_group_pairs.extend(atom.user_id_group_pairs);
                }
                None => group.ip_permissions.push(atom),
            }
        }
        Ok(())
    }

    async fn revoke_ingress(
        &self,
        group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("ec2", "RevokeSecurityGroupIngress", group_id, true)?;
        let group = state.security_group_mut(group_id)?;
        for atom in permissions.iter().flat_map(atoms) {
            let existing = group
                .ip_permissions
                .iter_mut()
                .find(|p| grants(p, &atom))
                .ok_or_else(|| {
                    LbError::not_found("SecurityGroupRule", format!("{}:{:?}", group_id, atom))
                })?;
            for range in &atom.ip_ranges {
                existing.ip_ranges.retain(|r| r.cidr_ip != range.cidr_ip);
            }
            for pair in &atom.user_id_group_pairs {
                existing
                    .user_id_group_pairs
                    .retain(|p| p.group_id != pair.group_id);
            }
        }
        group
            .ip_permissions
            .retain(|p| !p.ip_ranges.is_empty() || !p.user_id_group_pairs.is_empty());
        Ok(())
    }

    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), LbError> {
        let mut state = self.state.lock().await;
        state.record("ec2", "CreateTags", resource_id, true)?;
        let group = state.security_group_mut(resource_id)?;
        group
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>, LbError> {
        let mut state = self.state.lock().await;
        state.record("ec2", "DescribeInstances", instance_ids.join(","), false)?;
        Ok(instance_ids
            .iter()
            .filter_map(|id| state.instances.get(id).cloned())
            .collect())
    }

    async fn describe_subnets(&self, filter: &SubnetFilter) -> Result<Vec<Subnet>, LbError> {
        let mut state = self.state.lock().await;
        let target = match filter {
            SubnetFilter::Ids(ids) => ids.join(","),
            SubnetFilter::Vpc(vpc) => format!("vpc-id={}", vpc),
        };
        state.record("ec2", "DescribeSubnets", target, false)?;
        Ok(state
            .subnets
            .values()
            .filter(|s| match filter {
                SubnetFilter::Ids(ids) => ids.contains(&s.id),
                SubnetFilter::Vpc(vpc) => &s.vpc_id == vpc,
            })
            .cloned()
            .collect())
    }
}
