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

use kube_elb::domain::spec::resolver::load_balancer_name;
use kube_elb::infrastructure::cloud::model::IpPermission;
use kube_elb::infrastructure::cloud::NetworkElbApi;
use kube_elb::*;

mod test_utils {
    use k8s_openapi::api::core::v1::{Node, NodeSpec, Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_elb::{CloudConfig, FakeCloud, FakeInventory, LoadBalancerReconciler};
    use std::sync::Arc;

    pub const UID: &str = "3f2a9c1e-7b4d-4e8a-9c0f-1d2e3f4a5b6c";

    pub fn config() -> CloudConfig {
        CloudConfig {
            cluster_id: "test-cluster".to_string(),
            vpc_id: "vpc-test".to_string(),
            security_group_delete_timeout_secs: 5,
            security_group_delete_poll_millis: 10,
            security_group_create_retry_delay_ms: 1,
            ..Default::default()
        }
    }

    pub fn port(port: i32, node_port: i32) -> ServicePort {
        ServicePort {
            name: Some(format!("p{}", port)),
            port,
            node_port: Some(node_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }
    }

    pub fn service(annotations: &[(&str, &str)], ports: Vec<ServicePort>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("shop".to_string()),
                uid: Some(UID.to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn node(name: &str, zone: &str, instance_id: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some(format!("aws:///{}/{}", zone, instance_id)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn nodes() -> Vec<Node> {
        vec![
            node("node-a", "us-east-1a", "i-0000000000000000a"),
            node("node-b", "us-east-1b", "i-0000000000000000b"),
        ]
    }

    pub async fn setup_with(config: CloudConfig) -> (Arc<FakeCloud>, LoadBalancerReconciler) {
        let instance_ids = vec![
            "i-0000000000000000a".to_string(),
            "i-0000000000000000b".to_string(),
            "i-0000000000000000c".to_string(),
        ];
        let inventory = FakeInventory::bootstrap(&config.cluster_id, &config.vpc_id, &instance_ids);
        let cloud = Arc::new(FakeCloud::from_inventory(inventory).await);
        let reconciler = LoadBalancerReconciler::new(cloud.services(), config);
        (cloud, reconciler)
    }

    pub async fn setup() -> (Arc<FakeCloud>, LoadBalancerReconciler) {
        setup_with(config()).await
    }
}

use test_utils::*;

const NLB: (&str, &str) = ("service.beta.kubernetes.io/aws-load-balancer-type", "nlb");

fn references(permission: &IpPermission, group_id: &str) -> bool {
    permission
        .user_id_group_pairs
        .iter()
        .any(|pair| pair.group_id == group_id)
}

fn position(operations: &[&str], operation: &str) -> usize {
    operations
        .iter()
        .position(|op| *op == operation)
        .unwrap_or_else(|| panic!("{} not called in {:?}", operation, operations))
}

// ============================================================================
// Classic load balancers
// ============================================================================

#[tokio::test]
async fn test_classic_ensure_creates_load_balancer() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[], vec![port(80, 30080)]);
    let name = load_balancer_name(UID);

    let status = reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    let hostname = status.ingress.unwrap()[0].hostname.clone().unwrap();
    assert!(hostname.starts_with(&name));
    let creates = cloud
        .mutating_operations()
        .await
        .into_iter()
        .filter(|op| *op == "CreateLoadBalancer")
        .count();
    assert_eq!(creates, 1);

    let lb = cloud.classic_load_balancer(&name).await.unwrap();
    let listener = &lb.listener_descriptions[0].listener;
    assert_eq!(listener.protocol, "tcp");
    assert_eq!(listener.load_balancer_port, 80);
    assert_eq!(listener.instance_port, 30080);

    let health_check = lb.health_check.unwrap();
    assert_eq!(health_check.target, "TCP:30080");
    assert_eq!(health_check.healthy_threshold, 2);
    assert_eq!(health_check.unhealthy_threshold, 6);
    assert_eq!(health_check.interval, 10);
    assert_eq!(health_check.timeout, 5);

    assert_eq!(
        lb.instances,
        vec!["i-0000000000000000a".to_string(), "i-0000000000000000b".to_string()]
    );
    assert_eq!(
        lb.subnets,
        vec!["subnet-00000001".to_string(), "subnet-00000002".to_string()]
    );

    // One managed group, open on the service port from anywhere
    assert_eq!(lb.security_groups.len(), 1);
    let elb_group = cloud.security_group(&lb.security_groups[0]).await.unwrap();
    assert_eq!(elb_group.name, format!("k8s-elb-{}", name));
    assert_eq!(
        elb_group.tags.get("kubernetes.io/cluster/test-cluster").map(String::as_str),
        Some("owned")
    );
    assert!(elb_group.ip_permissions.iter().any(|p| {
        p.ip_protocol == "tcp"
            && p.from_port == Some(80)
            && p.ip_ranges.iter().any(|r| r.cidr_ip == "0.0.0.0/0")
    }));

    // Nodes accept all traffic from the load balancer group
    let nodes_group = cloud.security_group("sg-nodes").await.unwrap();
    assert!(nodes_group
        .ip_permissions
        .iter()
        .any(|p| p.ip_protocol == "-1" && references(p, &elb_group.id)));
}

#[tokio::test]
async fn test_classic_second_ensure_issues_no_mutations() {
    let (cloud, reconciler) = setup().await;
    let service = service(
        &[
            ("service.beta.kubernetes.io/aws-load-balancer-proxy-protocol", "*"),
            ("service.beta.kubernetes.io/aws-load-balancer-connection-idle-timeout", "120"),
            ("service.beta.kubernetes.io/aws-load-balancer-additional-resource-tags", "team=web,env=prod"),
        ],
        vec![port(80, 30080), port(443, 30443)],
    );

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    cloud.clear_calls().await;

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    assert!(
        cloud.mutating_operations().await.is_empty(),
        "unexpected mutations: {:?}",
        cloud.mutating_operations().await
    );
}

#[tokio::test]
async fn test_classic_listener_change_replaces_listener() {
    let (cloud, reconciler) = setup().await;
    let name = load_balancer_name(UID);

    reconciler
        .ensure_load_balancer(&service(&[], vec![port(80, 30080)]), &nodes())
        .await
        .unwrap();
    cloud.clear_calls().await;

    reconciler
        .ensure_load_balancer(&service(&[], vec![port(80, 30081)]), &nodes())
        .await
        .unwrap();
    let operations = cloud.mutating_operations().await;
    assert!(
        position(&operations, "DeleteLoadBalancerListeners")
            < position(&operations, "CreateLoadBalancerListeners")
    );

    let lb = cloud.classic_load_balancer(&name).await.unwrap();
    assert_eq!(lb.listener_descriptions.len(), 1);
    assert_eq!(lb.listener_descriptions[0].listener.instance_port, 30081);
    assert_eq!(lb.health_check.unwrap().target, "TCP:30081");
}

#[tokio::test]
async fn test_classic_update_syncs_instances() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[], vec![port(80, 30080)]);
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    cloud.clear_calls().await;

    let nodes = vec![
        node("node-a", "us-east-1a", "i-0000000000000000a"),
        node("node-c", "us-east-1a", "i-0000000000000000c"),
    ];
    reconciler.update_load_balancer(&service, &nodes).await.unwrap();

    let operations = cloud.mutating_operations().await;
    assert!(operations.contains(&"RegisterInstancesWithLoadBalancer"));
    assert!(operations.contains(&"DeregisterInstancesFromLoadBalancer"));
    let lb = cloud.classic_load_balancer(&name).await.unwrap();
    assert_eq!(
        lb.instances,
        vec!["i-0000000000000000a".to_string(), "i-0000000000000000c".to_string()]
    );
}

#[tokio::test]
async fn test_update_of_missing_load_balancer_is_not_found() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[], vec![port(80, 30080)]);

    let err = reconciler.update_load_balancer(&service, &nodes()).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(cloud.mutating_calls().await.is_empty());
}

#[tokio::test]
async fn test_classic_replace_security_groups_are_kept_on_delete() {
    let (cloud, reconciler) = setup().await;
    let custom = kube_elb::infrastructure::cloud::model::SecurityGroup {
        id: "sg-custom".to_string(),
        name: "custom".to_string(),
        description: "Managed outside the cluster".to_string(),
        vpc_id: "vpc-test".to_string(),
        tags: Default::default(),
        ip_permissions: Vec::new(),
    };
    cloud.add_security_group(custom).await;
    let service = service(
        &[("service.beta.kubernetes.io/aws-load-balancer-security-groups", "sg-custom")],
        vec![port(80, 30080)],
    );
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    let lb = cloud.classic_load_balancer(&name).await.unwrap();
    assert_eq!(lb.security_groups, vec!["sg-custom".to_string()]);
    assert!(!cloud
        .mutating_operations()
        .await
        .contains(&"CreateSecurityGroup"));

    let nodes_group = cloud.security_group("sg-nodes").await.unwrap();
    assert!(nodes_group
        .ip_permissions
        .iter()
        .any(|p| references(p, "sg-custom")));

    reconciler.ensure_load_balancer_deleted(&service).await.unwrap();
    assert!(cloud.classic_load_balancer(&name).await.is_none());
    assert!(cloud.security_group("sg-custom").await.is_some());
}

#[tokio::test]
async fn test_classic_delete_removes_managed_security_group() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[], vec![port(80, 30080)]);
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    let group_id = cloud.classic_load_balancer(&name).await.unwrap().security_groups[0].clone();
    cloud.clear_calls().await;

    reconciler.ensure_load_balancer_deleted(&service).await.unwrap();

    let operations = cloud.mutating_operations().await;
    assert!(
        position(&operations, "RevokeSecurityGroupIngress")
            < position(&operations, "DeleteLoadBalancer")
    );
    assert!(position(&operations, "DeleteLoadBalancer") < position(&operations, "DeleteSecurityGroup"));
    assert!(cloud.classic_load_balancer(&name).await.is_none());
    assert!(cloud.security_group(&group_id).await.is_none());

    let nodes_group = cloud.security_group("sg-nodes").await.unwrap();
    assert!(!nodes_group.ip_permissions.iter().any(|p| references(p, &group_id)));

    // A second delete finds nothing and changes nothing
    cloud.clear_calls().await;
    reconciler.ensure_load_balancer_deleted(&service).await.unwrap();
    assert!(cloud.mutating_calls().await.is_empty());
}

#[tokio::test]
async fn test_classic_delete_retries_dependency_violations() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[], vec![port(80, 30080)]);
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    let group_id = cloud.classic_load_balancer(&name).await.unwrap().security_groups[0].clone();
    cloud.inject_dependency_violations(&group_id, 2).await;
    cloud.clear_calls().await;

    reconciler.ensure_load_balancer_deleted(&service).await.unwrap();

    let attempts = cloud
        .mutating_operations()
        .await
        .into_iter()
        .filter(|op| *op == "DeleteSecurityGroup")
        .count();
    assert_eq!(attempts, 3);
    assert!(cloud.security_group(&group_id).await.is_none());
}

#[tokio::test]
async fn test_classic_delete_times_out_on_permanent_dependency() {
    let mut config = config();
    config.security_group_delete_timeout_secs = 0;
    let (cloud, reconciler) = setup_with(config).await;
    let service = service(&[], vec![port(80, 30080)]);
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    let group_id = cloud.classic_load_balancer(&name).await.unwrap().security_groups[0].clone();
    cloud.inject_dependency_violations(&group_id, usize::MAX).await;

    let err = reconciler.ensure_load_balancer_deleted(&service).await.unwrap_err();
    match err {
        LbError::Timeout(message) => {
            assert!(message.contains("Timed out deleting load balancer of shop/web"));
            assert!(message.contains(&group_id));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(cloud.classic_load_balancer(&name).await.is_none());
    assert!(cloud.security_group(&group_id).await.is_some());
}

// ============================================================================
// Network load balancers
// ============================================================================

#[tokio::test]
async fn test_network_ensure_creates_listeners_and_rules() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[NLB], vec![port(80, 30080), port(443, 30443)]);
    let name = load_balancer_name(UID);

    let status = reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    assert!(status.ingress.is_some());

    let lb = cloud.network_load_balancer(&name).await.unwrap();
    assert_eq!(lb.availability_zones.len(), 2);
    assert_eq!(cloud.target_group_arns().await.len(), 2);

    // Client traffic from anywhere covers the traffic-port health checks
    let client = format!("kubernetes.io/rule/nlb/client={}", name);
    let nodes_group = cloud.security_group("sg-nodes").await.unwrap();
    let client_ports: Vec<i32> = nodes_group
        .ip_permissions
        .iter()
        .filter(|p| {
            p.ip_ranges
                .iter()
                .any(|r| r.description.as_deref() == Some(client.as_str()))
        })
        .filter_map(|p| p.from_port)
        .collect();
    assert!(client_ports.contains(&30080));
    assert!(client_ports.contains(&30443));
    assert!(!nodes_group.ip_permissions.iter().any(|p| {
        p.ip_ranges.iter().any(|r| {
            r.description
                .as_deref()
                .is_some_and(|d| d.starts_with("kubernetes.io/rule/nlb/health"))
        })
    }));
    assert!(nodes_group
        .ip_permissions
        .iter()
        .any(|p| p.ip_protocol == "icmp" && p.from_port == Some(3) && p.to_port == Some(4)));
}

#[tokio::test]
async fn test_network_second_ensure_issues_no_mutations() {
    let (cloud, reconciler) = setup().await;
    let service = service(
        &[
            NLB,
            ("service.beta.kubernetes.io/aws-load-balancer-cross-zone-load-balancing-enabled", "true"),
        ],
        vec![port(80, 30080)],
    );

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    cloud.clear_calls().await;

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    assert!(
        cloud.mutating_operations().await.is_empty(),
        "unexpected mutations: {:?}",
        cloud.mutating_operations().await
    );
}

#[tokio::test]
async fn test_network_interval_change_recreates_target_group() {
    let (cloud, reconciler) = setup().await;
    let interval = "service.beta.kubernetes.io/aws-load-balancer-healthcheck-interval";

    reconciler
        .ensure_load_balancer(&service(&[NLB, (interval, "10")], vec![port(80, 30080)]), &nodes())
        .await
        .unwrap();
    let before = cloud.target_group_arns().await;
    cloud.clear_calls().await;

    reconciler
        .ensure_load_balancer(&service(&[NLB, (interval, "30")], vec![port(80, 30080)]), &nodes())
        .await
        .unwrap();

    let operations: Vec<&str> = cloud
        .mutating_operations()
        .await
        .into_iter()
        .filter(|op| matches!(*op, "CreateTargetGroup" | "ModifyListener" | "DeleteTargetGroup"))
        .collect();
    assert_eq!(operations, vec!["CreateTargetGroup", "ModifyListener", "DeleteTargetGroup"]);

    let after = cloud.target_group_arns().await;
    assert_eq!(after.len(), 1);
    assert_ne!(before, after);
}

#[tokio::test]
async fn test_network_health_check_edits_keep_target_group() {
    let (cloud, reconciler) = setup().await;
    let hc_port = "service.beta.kubernetes.io/aws-load-balancer-healthcheck-port";
    let healthy = "service.beta.kubernetes.io/aws-load-balancer-healthcheck-healthy-threshold";
    let unhealthy = "service.beta.kubernetes.io/aws-load-balancer-healthcheck-unhealthy-threshold";
    let name = load_balancer_name(UID);

    reconciler
        .ensure_load_balancer(
            &service(&[NLB, (healthy, "3"), (unhealthy, "3")], vec![port(80, 30080)]),
            &nodes(),
        )
        .await
        .unwrap();
    let before = cloud.target_group_arns().await;
    cloud.clear_calls().await;

    reconciler
        .ensure_load_balancer(
            &service(
                &[NLB, (hc_port, "32100"), (healthy, "4"), (unhealthy, "5")],
                vec![port(80, 30080)],
            ),
            &nodes(),
        )
        .await
        .unwrap();

    let operations = cloud.mutating_operations().await;
    let count = |name: &str| operations.iter().filter(|op| **op == name).count();
    assert_eq!(count("ModifyTargetGroup"), 1);
    assert_eq!(count("CreateTargetGroup"), 0);
    assert_eq!(count("DeleteTargetGroup"), 0);
    assert_eq!(cloud.target_group_arns().await, before);

    let lb = cloud.network_load_balancer(&name).await.unwrap();
    let groups = NetworkElbApi::describe_target_groups(cloud.as_ref(), &lb.arn)
        .await
        .unwrap();
    assert_eq!(groups[0].health_check.port, "32100");
    assert_eq!(groups[0].health_check.healthy_threshold, 4);
    assert_eq!(groups[0].health_check.unhealthy_threshold, 5);
}

#[tokio::test]
async fn test_network_unhealthy_threshold_alone_converges() {
    let (cloud, reconciler) = setup().await;
    let unhealthy = "service.beta.kubernetes.io/aws-load-balancer-healthcheck-unhealthy-threshold";
    let name = load_balancer_name(UID);

    reconciler
        .ensure_load_balancer(&service(&[NLB, (unhealthy, "3")], vec![port(80, 30080)]), &nodes())
        .await
        .unwrap();
    cloud.clear_calls().await;

    let changed = service(&[NLB, (unhealthy, "5")], vec![port(80, 30080)]);
    reconciler.ensure_load_balancer(&changed, &nodes()).await.unwrap();
    assert!(cloud.mutating_operations().await.contains(&"ModifyTargetGroup"));

    let lb = cloud.network_load_balancer(&name).await.unwrap();
    let groups = NetworkElbApi::describe_target_groups(cloud.as_ref(), &lb.arn)
        .await
        .unwrap();
    assert_eq!(groups[0].health_check.unhealthy_threshold, 5);

    cloud.clear_calls().await;
    reconciler.ensure_load_balancer(&changed, &nodes()).await.unwrap();
    assert!(cloud.mutating_operations().await.is_empty());
}

#[tokio::test]
async fn test_network_local_traffic_opens_health_check_port_to_subnets() {
    let (cloud, reconciler) = setup().await;
    let mut service = service(&[NLB], vec![port(80, 30080)]);
    if let Some(spec) = service.spec.as_mut() {
        spec.external_traffic_policy = Some("Local".to_string());
        spec.health_check_node_port = Some(32000);
    }
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();

    let health = format!("kubernetes.io/rule/nlb/health={}", name);
    let nodes_group = cloud.security_group("sg-nodes").await.unwrap();
    let mut cidrs: Vec<String> = nodes_group
        .ip_permissions
        .iter()
        .filter(|p| p.from_port == Some(32000))
        .flat_map(|p| p.ip_ranges.iter())
        .filter(|r| r.description.as_deref() == Some(health.as_str()))
        .map(|r| r.cidr_ip.clone())
        .collect();
    cidrs.sort();
    assert_eq!(cidrs, vec!["10.0.0.0/24".to_string(), "10.0.1.0/24".to_string()]);
}

#[tokio::test]
async fn test_network_delete_order() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[NLB], vec![port(80, 30080)]);
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    cloud.clear_calls().await;

    reconciler.ensure_load_balancer_deleted(&service).await.unwrap();

    let operations = cloud.mutating_operations().await;
    assert!(position(&operations, "DeleteLoadBalancer") < position(&operations, "DeleteTargetGroup"));
    assert!(position(&operations, "DeleteTargetGroup") < position(&operations, "RevokeSecurityGroupIngress"));
    assert!(cloud.network_load_balancer(&name).await.is_none());
    assert!(cloud.target_group_arns().await.is_empty());

    let nodes_group = cloud.security_group("sg-nodes").await.unwrap();
    assert!(nodes_group.ip_permissions.is_empty());
}

#[tokio::test]
async fn test_network_eip_count_must_match_subnets() {
    let (cloud, reconciler) = setup().await;
    let service = service(
        &[NLB, ("service.beta.kubernetes.io/aws-load-balancer-eip-allocations", "eipalloc-1")],
        vec![port(80, 30080)],
    );

    let err = reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap_err();
    assert!(err
        .to_string()
        .contains("must have the same number of EIP allocations (1) and subnets (2)"));
    assert!(cloud.mutating_calls().await.is_empty());
}

#[tokio::test]
async fn test_network_explicit_subnets() {
    let (cloud, reconciler) = setup().await;
    let service = service(
        &[NLB, ("service.beta.kubernetes.io/aws-load-balancer-subnets", "subnet-00000002")],
        vec![port(80, 30080)],
    );
    let name = load_balancer_name(UID);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    let lb = cloud.network_load_balancer(&name).await.unwrap();
    assert_eq!(lb.availability_zones.len(), 1);
    assert_eq!(lb.availability_zones[0].subnet_id, "subnet-00000002");
}

// ============================================================================
// Status and guards
// ============================================================================

#[tokio::test]
async fn test_get_load_balancer_reports_existence() {
    let (_cloud, reconciler) = setup().await;
    let service = service(&[NLB], vec![port(80, 30080)]);

    let (status, exists) = reconciler.get_load_balancer(&service).await.unwrap();
    assert!(status.is_none());
    assert!(!exists);

    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    let (status, exists) = reconciler.get_load_balancer(&service).await.unwrap();
    assert!(exists);
    let hostname = status.unwrap().ingress.unwrap()[0].hostname.clone().unwrap();
    assert!(hostname.starts_with(&load_balancer_name(UID)));
}

#[tokio::test]
async fn test_externally_managed_service_is_left_alone() {
    let (cloud, reconciler) = setup().await;
    let service = service(
        &[("service.beta.kubernetes.io/aws-load-balancer-type", "external")],
        vec![port(80, 30080)],
    );

    let err = reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap_err();
    assert!(matches!(err, LbError::ImplementedElsewhere(_)));

    reconciler.ensure_load_balancer_deleted(&service).await.unwrap();
    let (status, exists) = reconciler.get_load_balancer(&service).await.unwrap();
    assert!(status.is_none());
    assert!(!exists);
    assert!(cloud.calls().await.is_empty());
}

#[tokio::test]
async fn test_invalid_service_makes_no_cloud_calls() {
    let (cloud, reconciler) = setup().await;

    let mut bad_range = service(&[], vec![port(80, 30080)]);
    if let Some(spec) = bad_range.spec.as_mut() {
        spec.load_balancer_source_ranges = Some(vec!["10.0.0.0/33".to_string()]);
    }
    let err = reconciler.ensure_load_balancer(&bad_range, &nodes()).await.unwrap_err();
    assert!(matches!(err, LbError::ValidationError(_)));

    let mut pinned_ip = service(&[], vec![port(80, 30080)]);
    if let Some(spec) = pinned_ip.spec.as_mut() {
        spec.load_balancer_ip = Some("1.2.3.4".to_string());
    }
    let err = reconciler.ensure_load_balancer(&pinned_ip, &nodes()).await.unwrap_err();
    assert!(err.to_string().contains("LoadBalancerIP cannot be specified for AWS ELB"));

    let no_ports = service(&[], Vec::new());
    assert!(reconciler.ensure_load_balancer(&no_ports, &nodes()).await.is_err());

    assert!(cloud.calls().await.is_empty());
}

#[tokio::test]
async fn test_injected_failure_surfaces_as_cloud_error() {
    let (cloud, reconciler) = setup().await;
    let service = service(&[], vec![port(80, 30080)]);
    cloud.fail_next("CreateLoadBalancer", "Throttling").await;

    let err = reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap_err();
    assert!(err.to_string().contains("CreateLoadBalancer"));

    // The next attempt converges
    reconciler.ensure_load_balancer(&service, &nodes()).await.unwrap();
    assert!(cloud.classic_load_balancer(&load_balancer_name(UID)).await.is_some());
}
