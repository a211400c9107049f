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

//! The load-balancer lifecycle: ensure, update, delete and status.
//!
//! Every call describes the remote state first and converges it on the spec
//! resolved from the Service. Nothing is cached between calls.

use crate::domain::config::CloudConfig;
use crate::domain::loadbalancer::attributes::{
    sync_classic_attributes, sync_classic_health_check, sync_classic_tags,
    sync_network_attributes, sync_proxy_protocol, sync_ssl_negotiation_policy,
};
use crate::domain::loadbalancer::listeners::sync_listeners;
use crate::domain::loadbalancer::security_groups::{
    classic_ingress_permissions, sort_by_precedence, SecurityGroupReconciler,
};
use crate::domain::loadbalancer::subnets::resolve_subnets;
use crate::domain::loadbalancer::target_groups::TargetGroupReconciler;
use crate::domain::spec::{LoadBalancerIdentity, LoadBalancerKind, LoadBalancerSpec, SpecResolver};
use crate::domain::tagging::ClusterTagging;
use crate::infrastructure::cloud::api::CloudServices;
use crate::infrastructure::cloud::model::{
    ClassicLoadBalancer, CreateClassicLoadBalancerRequest, CreateNetworkLoadBalancerRequest,
    Instance, LoadBalancerState, NetworkLoadBalancer, SubnetFilter, SubnetMapping,
};
use crate::infrastructure::constants::ELB_SECURITY_GROUP_PREFIX;
use crate::shared::error::{LbError, OptionalExt, Result};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node, Service};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Status with a single hostname ingress.
fn hostname_status(dns_name: &str) -> LoadBalancerStatus {
    if dns_name.is_empty() {
        return LoadBalancerStatus::default();
    }
    LoadBalancerStatus {
        ingress: Some(vec![LoadBalancerIngress {
            hostname: Some(dns_name.to_string()),
            ..Default::default()
        }]),
    }
}

fn classic_status(load_balancer: &ClassicLoadBalancer) -> Option<LoadBalancerStatus> {
    (!load_balancer.dns_name.is_empty()).then(|| hostname_status(&load_balancer.dns_name))
}

fn network_status(load_balancer: &NetworkLoadBalancer) -> Option<LoadBalancerStatus> {
    let ready = matches!(
        load_balancer.state,
        LoadBalancerState::Active | LoadBalancerState::Provisioning
    );
    (ready && !load_balancer.dns_name.is_empty())
        .then(|| hostname_status(&load_balancer.dns_name))
}

pub struct LoadBalancerReconciler {
    services: CloudServices,
    resolver: SpecResolver,
    tagging: ClusterTagging,
}

impl LoadBalancerReconciler {
    pub fn new(services: CloudServices, config: CloudConfig) -> Self {
        let tagging = ClusterTagging::new(config.cluster_id.clone());
        Self {
            services,
            resolver: SpecResolver::new(config),
            tagging,
        }
    }

    pub fn config(&self) -> &CloudConfig {
        self.resolver.config()
    }

    pub fn resolver(&self) -> &SpecResolver {
        &self.resolver
    }

    fn security_groups(&self) -> SecurityGroupReconciler<'_> {
        SecurityGroupReconciler::new(self.services.ec2.as_ref(), self.config(), &self.tagging)
    }

    fn target_groups(&self) -> TargetGroupReconciler<'_> {
        TargetGroupReconciler::new(self.services.elbv2.as_ref(), self.config())
    }

    async fn instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let instances = self.services.ec2.describe_instances(instance_ids).await?;
        if instances.len() != instance_ids.len() {
            warn!(
                "Found {} of {} instances; missing instances are ignored",
                instances.len(),
                instance_ids.len()
            );
        }
        Ok(instances)
    }

    /// Creates or converges the load balancer of `service` on `nodes`.
    pub async fn ensure_load_balancer(
        &self,
        service: &Service,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus> {
        let spec = self.resolver.resolve(service, nodes)?;
        info!(
            "Ensuring {} load balancer {} for service {}",
            spec.kind, spec.name, spec.service
        );
        match spec.kind {
            LoadBalancerKind::Classic => self.ensure_classic(&spec).await,
            LoadBalancerKind::Network => self.ensure_network(&spec).await,
        }
    }

    /// Refreshes backends and security-group rules of an existing load
    /// balancer after node changes.
    pub async fn update_load_balancer(&self, service: &Service, nodes: &[Node]) -> Result<()> {
        let spec = self.resolver.resolve(service, nodes)?;
        info!("Updating load balancer {} for service {}", spec.name, spec.service);
        match spec.kind {
            LoadBalancerKind::Classic => self.update_classic(&spec).await,
            LoadBalancerKind::Network => self.update_network(&spec).await,
        }
    }

    /// Deletes the load balancer of `service` and what was created with it.
    /// An absent load balancer is not an error.
    pub async fn ensure_load_balancer_deleted(&self, service: &Service) -> Result<()> {
        let Some(identity) = self.resolver.identify(service)? else {
            debug!("Load balancer of service is managed elsewhere, nothing to delete");
            return Ok(());
        };
        match identity.kind {
            LoadBalancerKind::Classic => self.delete_classic(&identity).await,
            LoadBalancerKind::Network => self.delete_network(&identity).await,
        }
    }

    /// Current status and whether the load balancer exists.
    pub async fn get_load_balancer(
        &self,
        service: &Service,
    ) -> Result<(Option<LoadBalancerStatus>, bool)> {
        let Some(identity) = self.resolver.identify(service)? else {
            return Ok((None, false));
        };
        match identity.kind {
            LoadBalancerKind::Classic => {
                let found = self
                    .services
                    .elb
                    .describe_load_balancer(&identity.name)
                    .await
                    .optional()?;
                Ok(match found {
                    Some(lb) => (classic_status(&lb), true),
                    None => (None, false),
                })
            }
            LoadBalancerKind::Network => {
                let found = self
                    .services
                    .elbv2
                    .describe_load_balancer(&identity.name)
                    .await
                    .optional()?;
                Ok(match found {
                    Some(lb) => (network_status(&lb), true),
                    None => (None, false),
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Classic
    // ------------------------------------------------------------------

    /// The groups attached to a classic load balancer: the replace list, or
    /// the global ELB group, or a managed `k8s-elb-<name>` group whose ingress
    /// is exactly the service ports from the source ranges. Extra groups are
    /// appended.
    async fn classic_security_groups(&self, spec: &LoadBalancerSpec) -> Result<Vec<String>> {
        let preferences = &spec.security_groups;
        let mut groups = if !preferences.replace.is_empty() {
            preferences.replace.clone()
        } else if let Some(global) = &self.config().elb_security_group {
            vec![global.clone()]
        } else {
            let security_groups = self.security_groups();
            let name = format!("{}{}", ELB_SECURITY_GROUP_PREFIX, spec.name);
            let description = format!(
                "Security group for Kubernetes ELB {} ({})",
                spec.name, spec.service
            );
            let id = security_groups
                .ensure_security_group(&name, &description, &spec.additional_tags)
                .await?;
            let permissions = classic_ingress_permissions(&spec.service_ports, &spec.source_ranges);
            security_groups.set_ingress(&id, &permissions).await?;
            vec![id]
        };
        for extra in &preferences.extra {
            if !groups.contains(extra) {
                groups.push(extra.clone());
            }
        }
        Ok(groups)
    }

    async fn ensure_classic(&self, spec: &LoadBalancerSpec) -> Result<LoadBalancerStatus> {
        let elb = self.services.elb.as_ref();
        let instances = self.instances(&spec.instance_ids).await?;
        let subnets = resolve_subnets(
            self.services.ec2.as_ref(),
            &self.config().vpc_id,
            &self.tagging,
            &spec.subnets,
            spec.scheme,
        )
        .await?;
        let security_groups = self.classic_security_groups(spec).await?;
        let listeners = spec.classic_listeners();
        let tags = self.tagging.build_tags(&spec.resource_tags());

        match elb.describe_load_balancer(&spec.name).await.optional()? {
            None => {
                info!("Creating load balancer {} for {}", spec.name, spec.service);
                elb.create_load_balancer(&CreateClassicLoadBalancerRequest {
                    name: spec.name.clone(),
                    listeners: listeners.clone(),
                    subnets,
                    security_groups,
                    internal: spec.scheme.is_internal(),
                    tags,
                })
                .await?;
            }
            Some(current) => {
                let expected: BTreeSet<&String> = subnets.iter().collect();
                let actual: BTreeSet<&String> = current.subnets.iter().collect();
                let removals: Vec<String> =
                    actual.difference(&expected).map(|s| s.to_string()).collect();
                let additions: Vec<String> =
                    expected.difference(&actual).map(|s| s.to_string()).collect();
                if !removals.is_empty() {
                    info!("Detaching load balancer {} from subnets {:?}", spec.name, removals);
                    elb.detach_subnets(&spec.name, &removals).await?;
                }
                if !additions.is_empty() {
                    info!("Attaching load balancer {} to subnets {:?}", spec.name, additions);
                    elb.attach_subnets(&spec.name, &additions).await?;
                }

                let expected: BTreeSet<&String> = security_groups.iter().collect();
                let actual: BTreeSet<&String> = current.security_groups.iter().collect();
                if expected != actual {
                    info!(
                        "Applying security groups {:?} to load balancer {}",
                        security_groups, spec.name
                    );
                    elb.apply_security_groups(&spec.name, &security_groups)
                        .await?;
                }

                sync_listeners(elb, &spec.name, &listeners, &current.listener_descriptions)
                    .await?;
                sync_classic_tags(elb, &spec.name, &tags).await?;
            }
        }

        let load_balancer = elb.describe_load_balancer(&spec.name).await?;
        sync_proxy_protocol(elb, &load_balancer, &listeners, spec.attributes.proxy_protocol)
            .await?;
        sync_classic_attributes(elb, &spec.name, &spec.attributes.to_classic()).await?;
        if let Some(policy) = &spec.ssl_negotiation_policy {
            sync_ssl_negotiation_policy(elb, &load_balancer, &listeners, policy).await?;
        }
        sync_classic_health_check(elb, &load_balancer, &spec.health_check).await?;

        self.security_groups()
            .update_classic_instance_rules(
                &spec.name,
                &load_balancer.security_groups,
                &spec.security_groups,
                &instances,
                false,
            )
            .await?;
        self.sync_classic_instances(&load_balancer, &spec.instance_ids)
            .await?;

        debug!("Load balancer {} is {}", spec.name, load_balancer.dns_name);
        Ok(hostname_status(&load_balancer.dns_name))
    }

    async fn sync_classic_instances(
        &self,
        load_balancer: &ClassicLoadBalancer,
        instance_ids: &[String],
    ) -> Result<bool> {
        let expected: BTreeSet<&String> = instance_ids.iter().collect();
        let actual: BTreeSet<&String> = load_balancer.instances.iter().collect();
        let additions: Vec<String> = expected.difference(&actual).map(|s| s.to_string()).collect();
        let removals: Vec<String> = actual.difference(&expected).map(|s| s.to_string()).collect();

        if !additions.is_empty() {
            info!(
                "Registering instances {:?} with load balancer {}",
                additions, load_balancer.name
            );
            self.services
                .elb
                .register_instances(&load_balancer.name, &additions)
                .await?;
        }
        if !removals.is_empty() {
            info!(
                "Deregistering instances {:?} from load balancer {}",
                removals, load_balancer.name
            );
            self.services
                .elb
                .deregister_instances(&load_balancer.name, &removals)
                .await?;
        }
        Ok(!additions.is_empty() || !removals.is_empty())
    }

    async fn update_classic(&self, spec: &LoadBalancerSpec) -> Result<()> {
        let elb = self.services.elb.as_ref();
        let load_balancer = elb
            .describe_load_balancer(&spec.name)
            .await
            .optional()?
            .ok_or_else(|| LbError::not_found("LoadBalancer", &spec.name))?;

        if let Some(policy) = &spec.ssl_negotiation_policy {
            sync_ssl_negotiation_policy(elb, &load_balancer, &spec.classic_listeners(), policy)
                .await?;
        }
        let instances = self.instances(&spec.instance_ids).await?;
        self.sync_classic_instances(&load_balancer, &spec.instance_ids)
            .await?;
        self.security_groups()
            .update_classic_instance_rules(
                &spec.name,
                &load_balancer.security_groups,
                &spec.security_groups,
                &instances,
                false,
            )
            .await
    }

    async fn delete_classic(&self, identity: &LoadBalancerIdentity) -> Result<()> {
        let elb = self.services.elb.as_ref();
        let Some(load_balancer) = elb
            .describe_load_balancer(&identity.name)
            .await
            .optional()?
        else {
            info!("Load balancer {} already deleted", identity.name);
            return Ok(());
        };

        let security_groups = self.security_groups();
        let (deletable, tagged) = security_groups
            .deletable_groups(&load_balancer.security_groups, &identity.security_groups)
            .await?;

        let mut ordered = load_balancer.security_groups.clone();
        sort_by_precedence(&mut ordered, &identity.security_groups, |id| tagged.contains(id));
        let is_deleting = ordered.first().is_some_and(|id| deletable.contains(id));

        security_groups
            .update_classic_instance_rules(
                &identity.name,
                &load_balancer.security_groups,
                &identity.security_groups,
                &[],
                is_deleting,
            )
            .await?;

        info!("Deleting load balancer {} of {}", identity.name, identity.service);
        elb.delete_load_balancer(&identity.name).await?;

        if !deletable.is_empty() {
            security_groups
                .delete_security_groups(&identity.service.to_string(), deletable)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    async fn subnet_cidrs(&self, load_balancer: &NetworkLoadBalancer) -> Result<Vec<String>> {
        let ids: Vec<String> = load_balancer
            .availability_zones
            .iter()
            .map(|zone| zone.subnet_id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cidrs: Vec<String> = self
            .services
            .ec2
            .describe_subnets(&SubnetFilter::Ids(ids))
            .await?
            .into_iter()
            .map(|subnet| subnet.cidr_block)
            .collect();
        cidrs.sort();
        cidrs.dedup();
        Ok(cidrs)
    }

    async fn ensure_network(&self, spec: &LoadBalancerSpec) -> Result<LoadBalancerStatus> {
        let elbv2 = self.services.elbv2.as_ref();
        let target_groups = self.target_groups();
        let instances = self.instances(&spec.instance_ids).await?;
        let tags = self.tagging.build_tags(&spec.resource_tags());

        let load_balancer = match elbv2.describe_load_balancer(&spec.name).await.optional()? {
            None => {
                let subnets = resolve_subnets(
                    self.services.ec2.as_ref(),
                    &self.config().vpc_id,
                    &self.tagging,
                    &spec.subnets,
                    spec.scheme,
                )
                .await?;
                let subnet_mappings = match &spec.eip_allocations {
                    Some(allocations) => {
                        if allocations.len() != subnets.len() {
                            return Err(LbError::validation(format!(
                                "must have the same number of EIP allocations ({}) and subnets ({})",
                                allocations.len(),
                                subnets.len()
                            )));
                        }
                        subnets
                            .into_iter()
                            .zip(allocations.iter())
                            .map(|(subnet_id, allocation)| SubnetMapping {
                                subnet_id,
                                allocation_id: Some(allocation.clone()),
                            })
                            .collect()
                    }
                    None => subnets
                        .into_iter()
                        .map(|subnet_id| SubnetMapping {
                            subnet_id,
                            allocation_id: None,
                        })
                        .collect(),
                };

                info!("Creating network load balancer {} for {}", spec.name, spec.service);
                let load_balancer = elbv2
                    .create_load_balancer(&CreateNetworkLoadBalancerRequest {
                        name: spec.name.clone(),
                        internal: spec.scheme.is_internal(),
                        subnet_mappings,
                        tags: tags.clone(),
                    })
                    .await?;
                for mapping in &spec.port_mappings {
                    target_groups
                        .create_listener(
                            &load_balancer,
                            &spec.service,
                            mapping,
                            &spec.instance_ids,
                            &tags,
                        )
                        .await?;
                }
                load_balancer
            }
            Some(load_balancer) => {
                target_groups
                    .reconcile_listeners(
                        &load_balancer,
                        &spec.service,
                        &spec.port_mappings,
                        &spec.instance_ids,
                        &tags,
                    )
                    .await?;
                load_balancer
            }
        };

        sync_network_attributes(elbv2, &load_balancer.arn, &spec.attributes.to_network())
            .await?;

        let subnet_cidrs = self.subnet_cidrs(&load_balancer).await?;
        self.security_groups()
            .update_network_instance_rules(
                &spec.name,
                &instances,
                &subnet_cidrs,
                &spec.source_ranges,
                &spec.port_mappings,
            )
            .await?;

        Ok(network_status(&load_balancer).unwrap_or_default())
    }

    async fn update_network(&self, spec: &LoadBalancerSpec) -> Result<()> {
        let load_balancer = self
            .services
            .elbv2
            .describe_load_balancer(&spec.name)
            .await
            .optional()?
            .ok_or_else(|| LbError::not_found("LoadBalancer", &spec.name))?;

        self.target_groups()
            .sync_membership(&load_balancer, &spec.instance_ids)
            .await?;

        let instances = self.instances(&spec.instance_ids).await?;
        let subnet_cidrs = self.subnet_cidrs(&load_balancer).await?;
        self.security_groups()
            .update_network_instance_rules(
                &spec.name,
                &instances,
                &subnet_cidrs,
                &spec.source_ranges,
                &spec.port_mappings,
            )
            .await
    }

    /// Target groups go after the load balancer, which still references them
    /// until it is gone.
    async fn delete_network(&self, identity: &LoadBalancerIdentity) -> Result<()> {
        let elbv2 = self.services.elbv2.as_ref();
        let Some(load_balancer) = elbv2
            .describe_load_balancer(&identity.name)
            .await
            .optional()?
        else {
            info!("Load balancer {} already deleted", identity.name);
            return Ok(());
        };

        let target_groups = elbv2.describe_target_groups(&load_balancer.arn).await?;

        info!("Deleting network load balancer {} of {}", identity.name, identity.service);
        elbv2.delete_load_balancer(&load_balancer.arn).await?;
        for group in &target_groups {
            info!("Deleting target group {}", group.name);
            elbv2.delete_target_group(&group.arn).await?;
        }

        self.security_groups()
            .update_network_instance_rules(&identity.name, &[], &[], &[], &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_status_requires_usable_state() {
        let mut lb = NetworkLoadBalancer {
            arn: "arn".to_string(),
            name: "a1".to_string(),
            dns_name: "a1.elb.amazonaws.com".to_string(),
            scheme: "internet-facing".to_string(),
            vpc_id: "vpc-1".to_string(),
            state: LoadBalancerState::Provisioning,
            availability_zones: Vec::new(),
        };
        let status = network_status(&lb).unwrap();
        assert_eq!(
            status.ingress.unwrap()[0].hostname.as_deref(),
            Some("a1.elb.amazonaws.com")
        );

        lb.state = LoadBalancerState::Failed;
        assert!(network_status(&lb).is_none());
    }

    #[test]
    fn test_classic_status_needs_dns_name() {
        let lb = ClassicLoadBalancer {
            name: "a1".to_string(),
            dns_name: String::new(),
            scheme: "internal".to_string(),
            vpc_id: "vpc-1".to_string(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            listener_descriptions: Vec::new(),
            backend_server_descriptions: Vec::new(),
            instances: Vec::new(),
            health_check: None,
        };
        assert!(classic_status(&lb).is_none());
        assert_eq!(hostname_status(""), LoadBalancerStatus::default());
    }
}
