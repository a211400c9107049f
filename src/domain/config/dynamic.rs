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

use crate::domain::config::{CloudConfig, HealthProbeMode};
use crate::shared::error::{LbError, Result};
use std::collections::HashMap;
use std::str::FromStr;

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        LbError::config_error(format!("Invalid value '{}' for {}", value, key))
    })
}

/// Applies `-D key=value` overrides on top of a loaded configuration.
pub fn apply_to_cloud_config(
    configs: &HashMap<String, String>,
    cloud_config: &mut CloudConfig,
) -> Result<()> {
    if let Some(cluster_id) = configs.get("cloud.cluster-id") {
        cloud_config.cluster_id = cluster_id.clone();
    }

    if let Some(vpc_id) = configs.get("cloud.vpc-id") {
        cloud_config.vpc_id = vpc_id.clone();
    }

    if let Some(region) = configs.get("cloud.region") {
        cloud_config.region = region.clone();
    }

    if let Some(group) = configs.get("elb.security-group") {
        cloud_config.elb_security_group = if group.trim().is_empty() {
            None
        } else {
            Some(group.trim().to_string())
        };
    }

    if let Some(value) = configs.get("elb.disable-security-group-ingress") {
        cloud_config.disable_security_group_ingress =
            parse_value("elb.disable-security-group-ingress", value)?;
    }

    if let Some(mode) = configs.get("health-probe.mode") {
        cloud_config.health_probe_mode = mode.parse::<HealthProbeMode>()?;
    }

    if let Some(path) = configs.get("health-probe.path") {
        cloud_config.shared_health_probe_path = path.clone();
    }

    if let Some(port) = configs.get("health-probe.port") {
        cloud_config.shared_health_probe_port = parse_value("health-probe.port", port)?;
    }

    if let Some(size) = configs.get("targets.register-chunk-size") {
        cloud_config.register_targets_chunk_size =
            parse_value("targets.register-chunk-size", size)?;
    }

    if let Some(size) = configs.get("targets.deregister-chunk-size") {
        cloud_config.deregister_targets_chunk_size =
            parse_value("targets.deregister-chunk-size", size)?;
    }

    if let Some(secs) = configs.get("security-group.delete-timeout-secs") {
        cloud_config.security_group_delete_timeout_secs =
            parse_value("security-group.delete-timeout-secs", secs)?;
    }

    if let Some(millis) = configs.get("security-group.delete-poll-millis") {
        cloud_config.security_group_delete_poll_millis =
            parse_value("security-group.delete-poll-millis", millis)?;
    }

    if let Some(retries) = configs.get("security-group.create-retries") {
        cloud_config.security_group_create_retries =
            parse_value("security-group.create-retries", retries)?;
    }

    if let Some(delay) = configs.get("security-group.create-retry-delay-ms") {
        cloud_config.security_group_create_retry_delay_ms =
            parse_value("security-group.create-retry-delay-ms", delay)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides() {
        let mut config = CloudConfig::default();
        let overrides = HashMap::from([
            ("cloud.vpc-id".to_string(), "vpc-9".to_string()),
            ("elb.security-group".to_string(), "sg-shared".to_string()),
            ("health-probe.mode".to_string(), "shared".to_string()),
            ("targets.register-chunk-size".to_string(), "25".to_string()),
        ]);

        apply_to_cloud_config(&overrides, &mut config).unwrap();

        assert_eq!(config.vpc_id, "vpc-9");
        assert_eq!(config.elb_security_group.as_deref(), Some("sg-shared"));
        assert_eq!(config.health_probe_mode, HealthProbeMode::Shared);
        assert_eq!(config.register_targets_chunk_size, 25);
    }

    #[test]
    fn test_apply_rejects_bad_number() {
        let mut config = CloudConfig::default();
        let overrides = HashMap::from([(
            "security-group.delete-timeout-secs".to_string(),
            "ten".to_string(),
        )]);
        assert!(apply_to_cloud_config(&overrides, &mut config).is_err());
    }
}
