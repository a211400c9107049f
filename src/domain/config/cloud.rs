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

//! Controller-wide settings shared by every reconciliation.

use crate::infrastructure::constants::*;
use crate::shared::error::{LbError, Result};
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

/// Where target health checks are sent when traffic policy is not `Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthProbeMode {
    /// Probe the service's own node port.
    #[default]
    ServiceNodePort,
    /// Probe the node-wide kube-proxy health endpoint.
    Shared,
}

impl HealthProbeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthProbeMode::ServiceNodePort => "service-node-port",
            HealthProbeMode::Shared => "shared",
        }
    }
}

impl std::str::FromStr for HealthProbeMode {
    type Err = LbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service-node-port" | "ServiceNodePort" => Ok(HealthProbeMode::ServiceNodePort),
            "shared" | "Shared" => Ok(HealthProbeMode::Shared),
            _ => Err(LbError::config_error(format!(
                "Invalid health probe mode: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub cluster_id: String,
    pub vpc_id: String,
    pub region: String,
    /// Security group attached to every classic load balancer instead of a
    /// per-service `k8s-elb-*` group. Never modified or deleted.
    pub elb_security_group: Option<String>,
    pub disable_security_group_ingress: bool,
    pub health_probe_mode: HealthProbeMode,
    pub shared_health_probe_path: String,
    pub shared_health_probe_port: i32,
    pub register_targets_chunk_size: usize,
    pub deregister_targets_chunk_size: usize,
    pub security_group_delete_timeout_secs: u64,
    pub security_group_delete_poll_millis: u64,
    pub security_group_create_retries: usize,
    pub security_group_create_retry_delay_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            cluster_id: "kubernetes".to_string(),
            vpc_id: String::new(),
            region: "us-east-1".to_string(),
            elb_security_group: None,
            disable_security_group_ingress: false,
            health_probe_mode: HealthProbeMode::ServiceNodePort,
            shared_health_probe_path: SHARED_HEALTH_PROBE_PATH.to_string(),
            shared_health_probe_port: SHARED_HEALTH_PROBE_PORT,
            register_targets_chunk_size: DEFAULT_REGISTER_TARGETS_CHUNK,
            deregister_targets_chunk_size: DEFAULT_DEREGISTER_TARGETS_CHUNK,
            security_group_delete_timeout_secs: SG_DELETE_TIMEOUT_SECS,
            security_group_delete_poll_millis: SG_DELETE_POLL_MILLIS,
            security_group_create_retries: SG_CREATE_RETRIES,
            security_group_create_retry_delay_ms: SG_CREATE_RETRY_DELAY_MS,
        }
    }
}

impl CloudConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = read_to_string(path).map_err(|e| {
            LbError::config_error(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let conf: Self = toml::from_str(&content)?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(LbError::config_error("cluster_id must not be empty"));
        }
        if self.vpc_id.trim().is_empty() {
            return Err(LbError::config_error("vpc_id must not be empty"));
        }
        if self.register_targets_chunk_size == 0 || self.deregister_targets_chunk_size == 0 {
            return Err(LbError::config_error(
                "target registration chunk sizes must be positive",
            ));
        }
        if !(1..=65535).contains(&self.shared_health_probe_port) {
            return Err(LbError::config_error(format!(
                "shared_health_probe_port {} is out of range",
                self.shared_health_probe_port
            )));
        }
        if !self.shared_health_probe_path.starts_with('/') {
            return Err(LbError::config_error(format!(
                "shared_health_probe_path '{}' must start with '/'",
                self.shared_health_probe_path
            )));
        }
        if self.security_group_delete_poll_millis == 0 {
            return Err(LbError::config_error(
                "security_group_delete_poll_millis must be positive",
            ));
        }
        Ok(())
    }

    pub fn cluster_tag_key(&self) -> String {
        format!("{}{}", TAG_CLUSTER_PREFIX, self.cluster_id)
    }

    pub fn security_group_delete_timeout(&self) -> Duration {
        Duration::from_secs(self.security_group_delete_timeout_secs)
    }

    pub fn security_group_delete_poll(&self) -> Duration {
        Duration::from_millis(self.security_group_delete_poll_millis)
    }

    pub fn security_group_create_retry_delay(&self) -> Duration {
        Duration::from_millis(self.security_group_create_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CloudConfig::default();
        assert_eq!(config.register_targets_chunk_size, 100);
        assert_eq!(config.security_group_delete_timeout(), Duration::from_secs(600));
        assert_eq!(config.security_group_delete_poll(), Duration::from_secs(10));
        assert_eq!(config.security_group_create_retries, 30);
        assert_eq!(config.shared_health_probe_port, 10256);
        assert_eq!(config.cluster_tag_key(), "kubernetes.io/cluster/kubernetes");
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
cluster_id = "prod"
vpc_id = "vpc-0abc"
elb_security_group = "sg-global"
health_probe_mode = "shared"
"#
        )
        .unwrap();

        let config = CloudConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cluster_id, "prod");
        assert_eq!(config.elb_security_group.as_deref(), Some("sg-global"));
        assert_eq!(config.health_probe_mode, HealthProbeMode::Shared);
        assert_eq!(config.deregister_targets_chunk_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_vpc() {
        let config = CloudConfig::default();
        assert!(matches!(
            config.validate(),
            Err(LbError::ConfigError(msg)) if msg.contains("vpc_id")
        ));
    }

    #[test]
    fn test_health_probe_mode_from_str() {
        assert_eq!(
            "shared".parse::<HealthProbeMode>().unwrap(),
            HealthProbeMode::Shared
        );
        assert!("bogus".parse::<HealthProbeMode>().is_err());
    }
}
