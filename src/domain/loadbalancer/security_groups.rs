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

//! Security-group reconciliation.
//!
//! Classic load balancers reach instances through a single all-traffic rule
//! whose source is the load balancer's own group. NLBs preserve client IPs, so
//! instance groups instead carry CIDR rules for client traffic, health checks
//! and ICMP fragmentation-needed, each set told apart by its rule description.

use crate::domain::config::CloudConfig;
use crate::domain::loadbalancer::permissions::{permission_exists, IpPermissionSet};
use crate::domain::spec::{PortMapping, SecurityGroupPreferences, ServicePortRef};
use crate::domain::tagging::ClusterTagging;
use crate::infrastructure::cloud::api::Ec2Api;
use crate::infrastructure::cloud::model::{
    CreateSecurityGroupRequest, GroupIdentifier, Instance, IpPermission, Protocol, SecurityGroup,
    SecurityGroupFilter,
};
use crate::infrastructure::constants::{
    CIDR_ANY_IPV4, ICMP_FRAGMENTATION_NEEDED_CODE, ICMP_FRAGMENTATION_NEEDED_TYPE,
    NLB_CLIENT_RULE_DESCRIPTION, NLB_HEALTH_CHECK_RULE_DESCRIPTION,
    NLB_MTU_DISCOVERY_RULE_DESCRIPTION, TAG_CLUSTER_OWNED,
};
use crate::shared::error::{LbError, Result};
use backon::{BackoffBuilder, ConstantBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Orders a load balancer's groups so the first one is authoritative:
/// groups from the replace annotation, then the extra annotation (both in
/// annotation order), then cluster-tagged groups, then the rest. The sort is
/// stable within the last two ranks.
pub fn sort_by_precedence(
    group_ids: &mut [String],
    preferences: &SecurityGroupPreferences,
    is_tagged: impl Fn(&str) -> bool,
) {
    let rank = |id: &String| -> (u8, usize) {
        if let Some(index) = preferences.replace.iter().position(|g| g == id) {
            (0, index)
        } else if let Some(index) = preferences.extra.iter().position(|g| g == id) {
            (1, index)
        } else if is_tagged(id) {
            (2, 0)
        } else {
            (3, 0)
        }
    };
    group_ids.sort_by_key(rank);
}

/// The group of `instance` that load-balancer rules are opened on: the only
/// cluster-tagged group, or failing that the only group at all.
pub fn find_security_group_for_instance(
    instance: &Instance,
    tagged: &BTreeMap<String, SecurityGroup>,
) -> Result<Option<GroupIdentifier>> {
    let mut tagged_groups = Vec::new();
    let mut untagged_groups = Vec::new();
    for group in &instance.security_groups {
        if group.id.is_empty() {
            warn!("Ignoring security group without id for instance {}", instance.id);
            continue;
        }
        if tagged.contains_key(&group.id) {
            tagged_groups.push(group);
        } else {
            untagged_groups.push(group);
        }
    }

    if !tagged_groups.is_empty() {
        if tagged_groups.len() != 1 {
            let names: Vec<String> = tagged_groups
                .iter()
                .map(|g| format!("{}({})", g.id, g.name))
                .collect();
            return Err(LbError::validation(format!(
                "Multiple tagged security groups found for instance {}; ensure only the k8s security group is tagged; the tagged groups were {}",
                instance.id,
                names.join(" ")
            )));
        }
        return Ok(Some(tagged_groups[0].clone()));
    }
    if !untagged_groups.is_empty() {
        if untagged_groups.len() != 1 {
            return Err(LbError::validation(format!(
                "Multiple untagged security groups found for instance {}; ensure the k8s security group is tagged",
                instance.id
            )));
        }
        return Ok(Some(untagged_groups[0].clone()));
    }
    warn!("No security group found for instance {}", instance.id);
    Ok(None)
}

/// Ingress of a managed classic load-balancer group: every service port from
/// every source range, plus ICMP fragmentation-needed for path MTU discovery.
pub fn classic_ingress_permissions(
    ports: &[ServicePortRef],
    source_ranges: &[String],
) -> IpPermissionSet {
    let mut permissions = IpPermissionSet::new();
    for port in ports {
        for cidr in source_ranges {
            permissions.insert(IpPermission::cidr(
                port.protocol.classic_name(),
                port.port,
                port.port,
                cidr.clone(),
                None,
            ));
        }
    }
    for cidr in source_ranges {
        permissions.insert(IpPermission::cidr(
            "icmp",
            ICMP_FRAGMENTATION_NEEDED_TYPE,
            ICMP_FRAGMENTATION_NEEDED_CODE,
            cidr.clone(),
            None,
        ));
    }
    permissions
}

pub struct SecurityGroupReconciler<'a> {
    ec2: &'a dyn Ec2Api,
    config: &'a CloudConfig,
    tagging: &'a ClusterTagging,
}

impl<'a> SecurityGroupReconciler<'a> {
    pub fn new(ec2: &'a dyn Ec2Api, config: &'a CloudConfig, tagging: &'a ClusterTagging) -> Self {
        Self {
            ec2,
            config,
            tagging,
        }
    }

    pub async fn find_security_group(&self, group_id: &str) -> Result<Option<SecurityGroup>> {
        let groups = self
            .ec2
            .describe_security_groups(&SecurityGroupFilter::Ids(vec![group_id.to_string()]))
            .await?;
        Ok(groups.into_iter().next())
    }

    pub async fn tagged_security_groups(&self) -> Result<BTreeMap<String, SecurityGroup>> {
        let groups = self
            .ec2
            .describe_security_groups(&SecurityGroupFilter::All)
            .await?;
        Ok(groups
            .into_iter()
            .filter(|g| self.tagging.has_cluster_tag(&g.tags))
            .map(|g| (g.id.clone(), g))
            .collect())
    }

    /// Returns the id of the group called `name` in the cluster VPC, creating
    /// it if needed. A concurrent creator surfaces as `Duplicate`, which is
    /// retried by reading again.
    pub async fn ensure_security_group(
        &self,
        name: &str,
        description: &str,
        additional_tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut backoff = ConstantBuilder::default()
            .with_delay(self.config.security_group_create_retry_delay())
            .with_max_times(self.config.security_group_create_retries.saturating_sub(1))
            .build();

        loop {
            let existing = self
                .ec2
                .describe_security_groups(&SecurityGroupFilter::NameInVpc {
                    name: name.to_string(),
                    vpc_id: self.config.vpc_id.clone(),
                })
                .await?;
            if let Some(group) = existing.first() {
                if existing.len() > 1 {
                    warn!("Found multiple security groups with name {}", name);
                }
                if !self.tagging.has_cluster_tag(&group.tags) {
                    let tags = BTreeMap::from([(
                        self.tagging.tag_key(),
                        TAG_CLUSTER_OWNED.to_string(),
                    )]);
                    self.ec2.create_tags(&group.id, &tags).await?;
                }
                return Ok(group.id.clone());
            }

            let request = CreateSecurityGroupRequest {
                name: name.to_string(),
                description: description.to_string(),
                vpc_id: self.config.vpc_id.clone(),
                tags: self.tagging.build_tags(additional_tags),
            };
            match self.ec2.create_security_group(&request).await {
                Ok(id) => {
                    info!("Created security group {} ({})", name, id);
                    return Ok(id);
                }
                Err(e) if e.is_duplicate() => match backoff.next() {
                    Some(delay) => {
                        debug!("Security group {} created concurrently, reading again", name);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Makes the ingress of `group_id` exactly `permissions`.
    pub async fn set_ingress(&self, group_id: &str, permissions: &IpPermissionSet) -> Result<bool> {
        let group = self
            .find_security_group(group_id)
            .await?
            .ok_or_else(|| LbError::not_found("SecurityGroup", group_id))?;

        let actual = IpPermissionSet::from_permissions(group.ip_permissions).ungroup();
        let desired = permissions.ungroup();
        let add = desired.difference(&actual);
        let remove = actual.difference(&desired);
        if add.is_empty() && remove.is_empty() {
            return Ok(false);
        }
        if !add.is_empty() {
            debug!("Adding security group ingress {}: {:?}", group_id, add);
            self.ec2.authorize_ingress(group_id, &add.to_vec()).await?;
        }
        if !remove.is_empty() {
            debug!("Removing security group ingress {}: {:?}", group_id, remove);
            self.ec2.revoke_ingress(group_id, &remove.to_vec()).await?;
        }
        Ok(true)
    }

    /// Authorizes the permissions the group does not already grant. The
    /// globally configured ELB group is never modified.
    pub async fn add_ingress(&self, group_id: &str, permissions: &[IpPermission]) -> Result<bool> {
        if self.is_global_group(group_id) {
            return Ok(false);
        }
        let group = self
            .find_security_group(group_id)
            .await?
            .ok_or_else(|| LbError::not_found("SecurityGroup", group_id))?;

        let changes: Vec<IpPermission> = permissions
            .iter()
            .filter(|wanted| !granted(wanted, &group))
            .cloned()
            .collect();
        if changes.is_empty() {
            return Ok(false);
        }
        info!("Adding {} ingress permissions to {}", changes.len(), group_id);
        self.ec2.authorize_ingress(group_id, &changes).await?;
        Ok(true)
    }

    /// Revokes the permissions the group currently grants.
    pub async fn remove_ingress(&self, group_id: &str, permissions: &[IpPermission]) -> Result<bool> {
        if self.is_global_group(group_id) {
            return Ok(false);
        }
        let Some(group) = self.find_security_group(group_id).await? else {
            warn!("Security group {} not found while removing ingress", group_id);
            return Ok(false);
        };

        let changes: Vec<IpPermission> = permissions
            .iter()
            .filter(|unwanted| granted(unwanted, &group))
            .cloned()
            .collect();
        if changes.is_empty() {
            return Ok(false);
        }
        info!("Removing {} ingress permissions from {}", changes.len(), group_id);
        self.ec2.revoke_ingress(group_id, &changes).await?;
        Ok(true)
    }

    fn is_global_group(&self, group_id: &str) -> bool {
        self.config.elb_security_group.as_deref() == Some(group_id)
    }

    /// Opens (or, when deleting, closes) the all-traffic rule from the load
    /// balancer's authoritative group on the instances' groups.
    ///
    /// Groups granting the rule that no instance needs any more are only
    /// revoked when cluster-tagged, or unconditionally while deleting.
    pub async fn update_classic_instance_rules(
        &self,
        load_balancer: &str,
        load_balancer_groups: &[String],
        preferences: &SecurityGroupPreferences,
        instances: &[Instance],
        is_deleting: bool,
    ) -> Result<()> {
        if self.config.disable_security_group_ingress {
            return Ok(());
        }
        if load_balancer_groups.is_empty() {
            return Err(LbError::not_found(
                "SecurityGroup",
                format!("of load balancer {}", load_balancer),
            ));
        }

        let tagged = self.tagged_security_groups().await?;
        let mut ordered = load_balancer_groups.to_vec();
        sort_by_precedence(&mut ordered, preferences, |id| tagged.contains_key(id));
        let source_group = ordered[0].clone();

        let actual = self
            .ec2
            .describe_security_groups(&SecurityGroupFilter::IngressFromGroup(
                source_group.clone(),
            ))
            .await?;

        // true opens the rule, false revokes it
        let mut changes: BTreeMap<String, bool> = BTreeMap::new();
        for instance in instances {
            match find_security_group_for_instance(instance, &tagged)? {
                Some(group) => {
                    changes.insert(group.id, true);
                }
                None => warn!("Ignoring instance without security group: {}", instance.id),
            }
        }
        for group in &actual {
            if changes.get(&group.id) == Some(&true) {
                changes.remove(&group.id);
            } else if self.tagging.has_cluster_tag(&group.tags) || is_deleting {
                changes.insert(group.id.clone(), false);
            }
        }

        let permission = [IpPermission::from_group(source_group.clone())];
        for (group_id, add) in changes {
            if add {
                info!(
                    "Adding rule for traffic from load balancer group {} to instance group {}",
                    source_group, group_id
                );
                if !self.add_ingress(&group_id, &permission).await? {
                    warn!("Allowing ingress was not needed; concurrent change? groupId={}", group_id);
                }
            } else {
                info!(
                    "Removing rule for traffic from load balancer group {} to instance group {}",
                    source_group, group_id
                );
                if !self.remove_ingress(&group_id, &permission).await? {
                    warn!("Revoking ingress was not needed; concurrent change? groupId={}", group_id);
                }
            }
        }
        Ok(())
    }

    /// Client, health-check and MTU rules for an NLB on every cluster group.
    ///
    /// With no instances every group has this load balancer's client and
    /// health-check rules cleared.
    pub async fn update_network_instance_rules(
        &self,
        load_balancer: &str,
        instances: &[Instance],
        subnet_cidrs: &[String],
        client_cidrs: &[String],
        mappings: &[PortMapping],
    ) -> Result<()> {
        if self.config.disable_security_group_ingress {
            return Ok(());
        }

        let mut groups = self.tagged_security_groups().await?;
        let mut desired = BTreeSet::new();
        for instance in instances {
            match find_security_group_for_instance(instance, &groups)? {
                Some(group) => {
                    desired.insert(group.id);
                }
                None => warn!("Ignoring instance without security group: {}", instance.id),
            }
        }
        for group_id in &desired {
            if !groups.contains_key(group_id) {
                let group = self
                    .find_security_group(group_id)
                    .await?
                    .ok_or_else(|| LbError::not_found("SecurityGroup", group_id))?;
                groups.insert(group_id.clone(), group);
            }
        }

        let mut client_ports = BTreeSet::new();
        let mut health_ports = BTreeSet::new();
        let mut client_protocol = "tcp";
        for mapping in mappings {
            client_ports.insert(mapping.traffic_port);
            health_ports.insert(mapping.health_check.port.resolve(mapping.traffic_port));
            if mapping.traffic_protocol == Protocol::Udp {
                client_protocol = "udp";
            }
        }
        let client_rule = format!("{}={}", NLB_CLIENT_RULE_DESCRIPTION, load_balancer);
        let health_rule = format!("{}={}", NLB_HEALTH_CHECK_RULE_DESCRIPTION, load_balancer);
        let health_covered_by_client = client_cidrs.len() == 1
            && client_cidrs[0] == CIDR_ANY_IPV4
            && client_protocol == "tcp"
            && health_ports == client_ports;

        let no_ports = BTreeSet::new();
        for (group_id, group) in &groups {
            let mut current = IpPermissionSet::from_permissions(group.ip_permissions.clone()).ungroup();
            if desired.contains(group_id) {
                if !health_covered_by_client {
                    self.sync_rule(group_id, &mut current, &health_rule, "tcp", &health_ports, subnet_cidrs)
                        .await?;
                }
                self.sync_rule(group_id, &mut current, &client_rule, client_protocol, &client_ports, client_cidrs)
                    .await?;
            } else {
                self.sync_rule(group_id, &mut current, &health_rule, "tcp", &no_ports, &[])
                    .await?;
                self.sync_rule(group_id, &mut current, &client_rule, client_protocol, &no_ports, &[])
                    .await?;
            }
            self.sync_mtu_rule(group_id, &mut current).await?;
        }
        Ok(())
    }

    async fn sync_rule(
        &self,
        group_id: &str,
        current: &mut IpPermissionSet,
        description: &str,
        protocol: &str,
        ports: &BTreeSet<i32>,
        cidrs: &[String],
    ) -> Result<()> {
        let mut desired = IpPermissionSet::new();
        for port in ports {
            for cidr in cidrs {
                desired.insert(IpPermission::cidr(
                    protocol,
                    *port,
                    *port,
                    cidr.clone(),
                    Some(description.to_string()),
                ));
            }
        }
        self.apply_described(group_id, current, &desired, description)
            .await
    }

    /// ICMP fragmentation-needed from every client range of any NLB.
    async fn sync_mtu_rule(&self, group_id: &str, current: &mut IpPermissionSet) -> Result<()> {
        let mut desired = IpPermissionSet::new();
        for range in current.cidrs() {
            let is_client = range
                .description
                .as_deref()
                .is_some_and(|d| d.contains(NLB_CLIENT_RULE_DESCRIPTION));
            if is_client {
                desired.insert(IpPermission::cidr(
                    "icmp",
                    ICMP_FRAGMENTATION_NEEDED_TYPE,
                    ICMP_FRAGMENTATION_NEEDED_CODE,
                    range.cidr_ip.clone(),
                    Some(NLB_MTU_DISCOVERY_RULE_DESCRIPTION.to_string()),
                ));
            }
        }
        self.apply_described(group_id, current, &desired, NLB_MTU_DISCOVERY_RULE_DESCRIPTION)
            .await
    }

    /// Grants `desired − current` and revokes `current − desired`, touching
    /// only permissions that carry `description`. `current` tracks the result.
    async fn apply_described(
        &self,
        group_id: &str,
        current: &mut IpPermissionSet,
        desired: &IpPermissionSet,
        description: &str,
    ) -> Result<()> {
        let grant = desired.difference(current);
        let mut revoke = current.difference(desired);
        revoke.retain_described(description);

        if !revoke.is_empty() {
            let permissions = revoke.to_vec();
            if !self.remove_ingress(group_id, &permissions).await? {
                warn!("Revoking ingress was not needed; concurrent change? groupId={}", group_id);
            }
            current.delete_all(permissions.iter());
        }
        if !grant.is_empty() {
            let permissions = grant.to_vec();
            if !self.add_ingress(group_id, &permissions).await? {
                warn!("Allowing ingress was not needed; concurrent change? groupId={}", group_id);
            }
            current.extend(permissions);
        }
        Ok(())
    }

    /// Splits the groups of a classic load balancer being deleted into the
    /// ones this cluster may delete and the ones carrying the cluster tag.
    /// Untagged groups, annotated groups and the global ELB group are kept.
    pub async fn deletable_groups(
        &self,
        load_balancer_groups: &[String],
        preferences: &SecurityGroupPreferences,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let mut deletable = BTreeSet::new();
        let mut tagged = BTreeSet::new();
        if load_balancer_groups.is_empty() {
            return Ok((deletable, tagged));
        }
        let groups = self
            .ec2
            .describe_security_groups(&SecurityGroupFilter::Ids(load_balancer_groups.to_vec()))
            .await?;
        for group in groups {
            if self.is_global_group(&group.id) {
                continue;
            }
            if !self.tagging.has_cluster_tag(&group.tags) {
                warn!("Ignoring security group with no cluster tag in {}", group.id);
                continue;
            }
            tagged.insert(group.id.clone());
            if preferences.is_annotated(&group.id) {
                continue;
            }
            deletable.insert(group.id);
        }
        Ok((deletable, tagged))
    }

    /// Deletes `group_ids`, retrying groups that are still referenced (the
    /// load balancer's network interfaces take a while to go away) until the
    /// configured timeout.
    pub async fn delete_security_groups(
        &self,
        service: &str,
        group_ids: BTreeSet<String>,
    ) -> Result<()> {
        let mut remaining = group_ids;
        let deadline = Instant::now() + self.config.security_group_delete_timeout();

        loop {
            let mut still_used = BTreeSet::new();
            for group_id in &remaining {
                match self.ec2.delete_security_group(group_id).await {
                    Ok(()) => info!("Deleted security group {}", group_id),
                    Err(e) if e.is_dependency_violation() => {
                        debug!(
                            "Ignoring DependencyViolation while deleting security group {}, load balancer is still going away",
                            group_id
                        );
                        still_used.insert(group_id.clone());
                    }
                    Err(e) => return Err(e),
                }
            }
            remaining = still_used;

            if remaining.is_empty() {
                debug!("Deleted all security groups for load balancer of {}", service);
                return Ok(());
            }
            if Instant::now() >= deadline {
                let ids: Vec<String> = remaining.into_iter().collect();
                return Err(LbError::Timeout(format!(
                    "Timed out deleting load balancer of {}. Could not delete security groups {}",
                    service,
                    ids.join(",")
                )));
            }
            debug!("Waiting for load balancer of {} to go away before deleting security groups", service);
            tokio::time::sleep(self.config.security_group_delete_poll()).await;
        }
    }
}

/// Whether `group` already grants `permission`; user ids are compared when
/// the permission names any.
fn granted(permission: &IpPermission, group: &SecurityGroup) -> bool {
    let compare_user_ids = permission
        .user_id_group_pairs
        .iter()
        .any(|pair| pair.user_id.is_some());
    group
        .ip_permissions
        .iter()
        .any(|existing| permission_exists(permission, existing, compare_user_ids))
}
