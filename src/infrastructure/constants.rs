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

/// Service annotations
pub const ANNOTATION_PREFIX: &str = "service.beta.kubernetes.io/aws-load-balancer-";
pub const ANNOTATION_TYPE: &str = "service.beta.kubernetes.io/aws-load-balancer-type";
pub const ANNOTATION_INTERNAL: &str = "service.beta.kubernetes.io/aws-load-balancer-internal";
pub const ANNOTATION_PROXY_PROTOCOL: &str =
    "service.beta.kubernetes.io/aws-load-balancer-proxy-protocol";
pub const ANNOTATION_ACCESS_LOG_EMIT_INTERVAL: &str =
    "service.beta.kubernetes.io/aws-load-balancer-access-log-emit-interval";
pub const ANNOTATION_ACCESS_LOG_ENABLED: &str =
    "service.beta.kubernetes.io/aws-load-balancer-access-log-enabled";
pub const ANNOTATION_ACCESS_LOG_BUCKET_NAME: &str =
    "service.beta.kubernetes.io/aws-load-balancer-access-log-s3-bucket-name";
pub const ANNOTATION_ACCESS_LOG_BUCKET_PREFIX: &str =
    "service.beta.kubernetes.io/aws-load-balancer-access-log-s3-bucket-prefix";
pub const ANNOTATION_CONNECTION_DRAINING_ENABLED: &str =
    "service.beta.kubernetes.io/aws-load-balancer-connection-draining-enabled";
pub const ANNOTATION_CONNECTION_DRAINING_TIMEOUT: &str =
    "service.beta.kubernetes.io/aws-load-balancer-connection-draining-timeout";
pub const ANNOTATION_CONNECTION_IDLE_TIMEOUT: &str =
    "service.beta.kubernetes.io/aws-load-balancer-connection-idle-timeout";
pub const ANNOTATION_CROSS_ZONE: &str =
    "service.beta.kubernetes.io/aws-load-balancer-cross-zone-load-balancing-enabled";
pub const ANNOTATION_SECURITY_GROUPS: &str =
    "service.beta.kubernetes.io/aws-load-balancer-security-groups";
pub const ANNOTATION_EXTRA_SECURITY_GROUPS: &str =
    "service.beta.kubernetes.io/aws-load-balancer-extra-security-groups";
pub const ANNOTATION_ADDITIONAL_TAGS: &str =
    "service.beta.kubernetes.io/aws-load-balancer-additional-resource-tags";
pub const ANNOTATION_HC_PROTOCOL: &str =
    "service.beta.kubernetes.io/aws-load-balancer-healthcheck-protocol";
pub const ANNOTATION_HC_PORT: &str = "service.beta.kubernetes.io/aws-load-balancer-healthcheck-port";
pub const ANNOTATION_HC_PATH: &str = "service.beta.kubernetes.io/aws-load-balancer-healthcheck-path";
pub const ANNOTATION_HC_HEALTHY_THRESHOLD: &str =
    "service.beta.kubernetes.io/aws-load-balancer-healthcheck-healthy-threshold";
pub const ANNOTATION_HC_UNHEALTHY_THRESHOLD: &str =
    "service.beta.kubernetes.io/aws-load-balancer-healthcheck-unhealthy-threshold";
pub const ANNOTATION_HC_TIMEOUT: &str =
    "service.beta.kubernetes.io/aws-load-balancer-healthcheck-timeout";
pub const ANNOTATION_HC_INTERVAL: &str =
    "service.beta.kubernetes.io/aws-load-balancer-healthcheck-interval";
pub const ANNOTATION_SSL_CERT: &str = "service.beta.kubernetes.io/aws-load-balancer-ssl-cert";
pub const ANNOTATION_SSL_PORTS: &str = "service.beta.kubernetes.io/aws-load-balancer-ssl-ports";
pub const ANNOTATION_SSL_NEGOTIATION_POLICY: &str =
    "service.beta.kubernetes.io/aws-load-balancer-ssl-negotiation-policy";
pub const ANNOTATION_BACKEND_PROTOCOL: &str =
    "service.beta.kubernetes.io/aws-load-balancer-backend-protocol";
pub const ANNOTATION_EIP_ALLOCATIONS: &str =
    "service.beta.kubernetes.io/aws-load-balancer-eip-allocations";
pub const ANNOTATION_SUBNETS: &str = "service.beta.kubernetes.io/aws-load-balancer-subnets";
pub const ANNOTATION_TARGET_NODE_LABELS: &str =
    "service.beta.kubernetes.io/aws-load-balancer-target-node-labels";
pub const ANNOTATION_SOURCE_RANGES: &str = "service.beta.kubernetes.io/load-balancer-source-ranges";

/// Load balancer types
pub const LB_TYPE_NLB: &str = "nlb";
pub const LB_TYPE_NLB_IP: &str = "nlb-ip";
pub const LB_TYPE_EXTERNAL: &str = "external";

/// Resource tags
pub const TAG_CLUSTER_PREFIX: &str = "kubernetes.io/cluster/";
pub const TAG_LEGACY_CLUSTER: &str = "KubernetesCluster";
pub const TAG_CLUSTER_OWNED: &str = "owned";
pub const TAG_SERVICE_NAME: &str = "kubernetes.io/service-name";
pub const TAG_ROLE_ELB: &str = "kubernetes.io/role/elb";
pub const TAG_ROLE_INTERNAL_ELB: &str = "kubernetes.io/role/internal-elb";
pub const TAG_NAME: &str = "Name";

/// Security group rule descriptions
pub const NLB_CLIENT_RULE_DESCRIPTION: &str = "kubernetes.io/rule/nlb/client";
pub const NLB_HEALTH_CHECK_RULE_DESCRIPTION: &str = "kubernetes.io/rule/nlb/health";
pub const NLB_MTU_DISCOVERY_RULE_DESCRIPTION: &str = "kubernetes.io/rule/nlb/mtu";
pub const ICMP_FRAGMENTATION_NEEDED_TYPE: i32 = 3;
pub const ICMP_FRAGMENTATION_NEEDED_CODE: i32 = 4;
pub const CIDR_ANY_IPV4: &str = "0.0.0.0/0";
pub const ELB_SECURITY_GROUP_PREFIX: &str = "k8s-elb-";

/// Classic policies
pub const PROXY_PROTOCOL_POLICY_NAME: &str = "k8s-proxyprotocol-enabled";
pub const PROXY_PROTOCOL_POLICY_TYPE: &str = "ProxyProtocolPolicyType";
pub const SSL_NEGOTIATION_POLICY_PREFIX: &str = "k8s-SSLNegotiationPolicy-";
pub const SSL_NEGOTIATION_POLICY_TYPE: &str = "SSLNegotiationPolicyType";
pub const SSL_NEGOTIATION_POLICY_ATTRIBUTE: &str = "Reference-Security-Policy";

/// Classic health check defaults
pub const CLASSIC_HC_HEALTHY_THRESHOLD: i32 = 2;
pub const CLASSIC_HC_UNHEALTHY_THRESHOLD: i32 = 6;
pub const CLASSIC_HC_TIMEOUT: i32 = 5;
pub const CLASSIC_HC_INTERVAL: i32 = 10;
pub const CLASSIC_HC_MIN_THRESHOLD: i32 = 2;
pub const CLASSIC_HC_MIN_INTERVAL: i32 = 5;
pub const CLASSIC_HC_MIN_TIMEOUT: i32 = 2;

/// Network load balancer health check defaults
pub const NLB_HC_PROTOCOL: &str = "TCP";
pub const NLB_HC_PORT_TRAFFIC: &str = "traffic-port";
pub const NLB_HC_PATH: &str = "/";
pub const NLB_HC_INTERVAL: i32 = 30;
pub const NLB_HC_TIMEOUT: i32 = 10;
pub const NLB_HC_THRESHOLD: i32 = 3;
pub const NLB_HC_LOCAL_PATH: &str = "/healthz";
pub const NLB_HC_LOCAL_INTERVAL: i32 = 10;
pub const NLB_HC_LOCAL_TIMEOUT: i32 = 10;
pub const NLB_HC_LOCAL_THRESHOLD: i32 = 2;
pub const NLB_TARGET_TYPE_INSTANCE: &str = "instance";

/// Shared kube-proxy health probe
pub const SHARED_HEALTH_PROBE_PORT: i32 = 10256;
pub const SHARED_HEALTH_PROBE_PATH: &str = "/healthz";

/// Network load balancer attributes
pub const NLB_ATTR_CROSS_ZONE: &str = "load_balancing.cross_zone.enabled";
pub const NLB_ATTR_ACCESS_LOG_ENABLED: &str = "access_logs.s3.enabled";
pub const NLB_ATTR_ACCESS_LOG_BUCKET: &str = "access_logs.s3.bucket";
pub const NLB_ATTR_ACCESS_LOG_PREFIX: &str = "access_logs.s3.prefix";

/// Classic attribute defaults
pub const CLASSIC_IDLE_TIMEOUT: i64 = 60;

/// Batching and retries
pub const DEFAULT_REGISTER_TARGETS_CHUNK: usize = 100;
pub const DEFAULT_DEREGISTER_TARGETS_CHUNK: usize = 100;
pub const SG_DELETE_TIMEOUT_SECS: u64 = 600;
pub const SG_DELETE_POLL_MILLIS: u64 = 10_000;
pub const SG_CREATE_RETRIES: usize = 30;
pub const SG_CREATE_RETRY_DELAY_MS: u64 = 1_000;

/// Names
pub const LB_NAME_MAX_LEN: usize = 32;
pub const TARGET_GROUP_NAME_SEGMENT_LEN: usize = 8;
pub const TARGET_GROUP_HASH_LEN: usize = 10;
pub const PROVIDER_ID_PREFIX: &str = "aws://";
