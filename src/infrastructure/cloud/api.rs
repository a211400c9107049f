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

use crate::infrastructure::cloud::model::*;
use crate::shared::error::LbError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Classic Elastic Load Balancing operations.
///
/// Describe calls on a missing load balancer return `LbError::NotFound`.
#[async_trait::async_trait]
pub trait ClassicElbApi: Send + Sync {
    async fn describe_load_balancer(&self, name: &str) -> Result<ClassicLoadBalancer, LbError>;

    async fn create_load_balancer(
        &self,
        request: &CreateClassicLoadBalancerRequest,
    ) -> Result<String, LbError>;

    async fn delete_load_balancer(&self, name: &str) -> Result<(), LbError>;

    async fn attach_subnets(&self, name: &str, subnets: &[String]) -> Result<(), LbError>;

    async fn detach_subnets(&self, name: &str, subnets: &[String]) -> Result<(), LbError>;

    async fn apply_security_groups(&self, name: &str, groups: &[String]) -> Result<(), LbError>;

    async fn create_listeners(
        &self,
        name: &str,
        listeners: &[ClassicListener],
    ) -> Result<(), LbError>;

    async fn delete_listeners(&self, name: &str, ports: &[i32]) -> Result<(), LbError>;

    async fn describe_policies(
        &self,
        name: &str,
        policy_names: &[String],
    ) -> Result<Vec<PolicyDescription>, LbError>;

    async fn create_policy(&self, name: &str, policy: &PolicyDescription) -> Result<(), LbError>;

    async fn set_backend_policies(
        &self,
        name: &str,
        instance_port: i32,
        policy_names: &[String],
    ) -> Result<(), LbError>;

    async fn set_listener_policies(
        &self,
        name: &str,
        load_balancer_port: i32,
        policy_names: &[String],
    ) -> Result<(), LbError>;

    async fn describe_attributes(&self, name: &str) -> Result<ClassicAttributes, LbError>;

    async fn modify_attributes(
        &self,
        name: &str,
        attributes: &ClassicAttributes,
    ) -> Result<(), LbError>;

    async fn configure_health_check(
        &self,
        name: &str,
        health_check: &ClassicHealthCheck,
    ) -> Result<(), LbError>;

    async fn register_instances(&self, name: &str, instance_ids: &[String]) -> Result<(), LbError>;

    async fn deregister_instances(
        &self,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), LbError>;

    async fn describe_tags(&self, name: &str) -> Result<BTreeMap<String, String>, LbError>;

    async fn add_tags(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<(), LbError>;
}

/// Network load balancer (ELBv2) operations.
#[async_trait::async_trait]
pub trait NetworkElbApi: Send + Sync {
    async fn describe_load_balancer(&self, name: &str) -> Result<NetworkLoadBalancer, LbError>;

    async fn create_load_balancer(
        &self,
        request: &CreateNetworkLoadBalancerRequest,
    ) -> Result<NetworkLoadBalancer, LbError>;

    async fn delete_load_balancer(&self, arn: &str) -> Result<(), LbError>;

    async fn describe_listeners(
        &self,
        load_balancer_arn: &str,
    ) -> Result<Vec<NetworkListener>, LbError>;

    async fn create_listener(
        &self,
        load_balancer_arn: &str,
        settings: &ListenerSettings,
        tags: &BTreeMap<String, String>,
    ) -> Result<NetworkListener, LbError>;

    async fn modify_listener(
        &self,
        listener_arn: &str,
        settings: &ListenerSettings,
    ) -> Result<(), LbError>;

    async fn delete_listener(&self, listener_arn: &str) -> Result<(), LbError>;

    async fn describe_target_groups(
        &self,
        load_balancer_arn: &str,
    ) -> Result<Vec<TargetGroup>, LbError>;

    async fn create_target_group(
        &self,
        request: &CreateTargetGroupRequest,
    ) -> Result<TargetGroup, LbError>;

    async fn modify_target_group(&self, request: &ModifyTargetGroupRequest) -> Result<(), LbError>;

    async fn delete_target_group(&self, arn: &str) -> Result<(), LbError>;

    async fn register_targets(
        &self,
        target_group_arn: &str,
        targets: &[TargetDescription],
    ) -> Result<(), LbError>;

    async fn deregister_targets(
        &self,
        target_group_arn: &str,
        targets: &[TargetDescription],
    ) -> Result<(), LbError>;

    async fn describe_target_health(
        &self,
        target_group_arn: &str,
    ) -> Result<Vec<TargetHealthDescription>, LbError>;

    async fn describe_attributes(
        &self,
        load_balancer_arn: &str,
    ) -> Result<BTreeMap<String, String>, LbError>;

    async fn modify_attributes(
        &self,
        load_balancer_arn: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), LbError>;
}

/// EC2 operations on security groups, instances and subnets.
#[async_trait::async_trait]
pub trait Ec2Api: Send + Sync {
    async fn describe_security_groups(
        &self,
        filter: &SecurityGroupFilter,
    ) -> Result<Vec<SecurityGroup>, LbError>;

    async fn create_security_group(
        &self,
        request: &CreateSecurityGroupRequest,
    ) -> Result<String, LbError>;

    async fn delete_security_group(&self, group_id: &str) -> Result<(), LbError>;

    async fn authorize_ingress(
        &self,
        group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), LbError>;

    async fn revoke_ingress(
        &self,
        group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), LbError>;

    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), LbError>;

    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>, LbError>;

    async fn describe_subnets(&self, filter: &SubnetFilter) -> Result<Vec<Subnet>, LbError>;
}

/// The cloud collaborators a reconciler works against.
#[derive(Clone)]
pub struct CloudServices {
    pub elb: Arc<dyn ClassicElbApi>,
    pub elbv2: Arc<dyn NetworkElbApi>,
    pub ec2: Arc<dyn Ec2Api>,
}

impl CloudServices {
    pub fn new(
        elb: Arc<dyn ClassicElbApi>,
        elbv2: Arc<dyn NetworkElbApi>,
        ec2: Arc<dyn Ec2Api>,
    ) -> Self {
        Self { elb, elbv2, ec2 }
    }
}
