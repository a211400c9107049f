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

//! Load balancer commands

use crate::cli::display::TableRenderer;
use crate::domain::config::{apply_to_cloud_config, CloudConfig};
use crate::domain::loadbalancer::LoadBalancerReconciler;
use crate::domain::spec::resolver::instance_id_from_provider_id;
use crate::domain::spec::SpecResolver;
use crate::infrastructure::cloud::{FakeCloud, FakeInventory};
use crate::infrastructure::kubernetes::{ClusterSource, KubeClusterSource, ManifestClusterSource};
use clap::{Args, Parser, ValueEnum};
use colored::Colorize;
use k8s_openapi::api::core::v1::{Node, Service};
use std::collections::HashMap;
use std::sync::Arc;

const CONF_FILE_ENV: &str = "KUBE_ELB_CONF_FILE";
const FAKE_VPC_ID: &str = "vpc-0000000000000001";

/// Where the Service and Nodes come from, and how the cloud is configured.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// YAML manifest with the Service and the cluster's Nodes
    /// If not specified, both are read from the cluster
    #[arg(long, short = 'f', value_name = "PATH")]
    pub manifest: Option<String>,

    /// Service name (required when reading from the cluster)
    #[arg(long, short = 's')]
    pub service: Option<String>,

    /// Kubernetes namespace
    #[arg(long, short = 'n', default_value = "default")]
    pub namespace: String,

    /// Path to kubeconfig file
    /// If not specified, uses default kubeconfig resolution (KUBECONFIG env or ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Kubernetes context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Path to cloud configuration file (TOML)
    /// If not provided, KUBE_ELB_CONF_FILE is used, then built-in defaults
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<String>,

    /// Dynamic configuration properties to override any settings (-D key=value)
    ///
    /// Cloud: cloud.cluster-id, cloud.vpc-id, cloud.region
    /// ELB: elb.security-group, elb.disable-security-group-ingress
    /// Health probes: health-probe.mode (service-node-port|shared), health-probe.path, health-probe.port
    /// Targets: targets.register-chunk-size, targets.deregister-chunk-size
    /// Security groups: security-group.delete-timeout-secs, security-group.delete-poll-millis,
    ///   security-group.create-retries, security-group.create-retry-delay-ms
    ///
    /// Example: -Dcloud.cluster-id=prod -Delb.disable-security-group-ingress=true
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    pub properties: Vec<String>,
}

impl SourceArgs {
    async fn load_objects(&self) -> anyhow::Result<(Service, Vec<Node>)> {
        if let Some(ref path) = self.manifest {
            let source = ManifestClusterSource::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load manifest {}: {}", path, e))?;
            let service = source.service(self.service.as_deref())?;
            return Ok((service, source.nodes));
        }

        let name = self.service.as_ref().ok_or_else(|| {
            anyhow::anyhow!("service name is required (use -s/--service) when no manifest is given")
        })?;
        let source =
            KubeClusterSource::new_with_config(self.kubeconfig.clone(), self.context.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to cluster: {}", e))?;
        let service = source
            .get_service(&self.namespace, name)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get service: {}", e))?;
        let nodes = source
            .list_nodes()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list nodes: {}", e))?;
        Ok((service, nodes))
    }

    fn load_config(&self) -> anyhow::Result<CloudConfig> {
        let mut config = if let Some(ref path) = self.config_file {
            CloudConfig::from_file(path)?
        } else if let Ok(env_path) = std::env::var(CONF_FILE_ENV) {
            CloudConfig::from_file(&env_path)?
        } else {
            println!("ℹ️  No configuration file specified, using default settings");
            CloudConfig::default()
        };

        if !self.properties.is_empty() {
            let configs = parse_dynamic_configs(&self.properties)
                .map_err(|e| anyhow::anyhow!("Failed to parse dynamic configs: {}", e))?;
            apply_to_cloud_config(&configs, &mut config)?;
        }
        Ok(config)
    }
}

/// Seeds an in-memory account: the inventory file if given, else one VPC with
/// an instance for every node that has an AWS provider id.
async fn fake_cloud(
    config: &mut CloudConfig,
    inventory: Option<&str>,
    nodes: &[Node],
) -> anyhow::Result<Arc<FakeCloud>> {
    if config.vpc_id.is_empty() {
        config.vpc_id = FAKE_VPC_ID.to_string();
    }
    config.validate()?;

    let inventory = match inventory {
        Some(path) => FakeInventory::from_yaml_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load inventory {}: {}", path, e))?,
        None => {
            let instance_ids: Vec<String> = nodes
                .iter()
                .filter_map(|node| node.spec.as_ref()?.provider_id.as_deref())
                .filter_map(instance_id_from_provider_id)
                .collect();
            FakeInventory::bootstrap(&config.cluster_id, &config.vpc_id, &instance_ids)
        }
    };
    Ok(Arc::new(FakeCloud::from_inventory(inventory).await))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Yaml,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    Ensure,
    Update,
    Delete,
}

#[derive(Parser, Debug, Clone)]
pub struct ResolveCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output format
    #[arg(long, short = 'o', value_enum, default_value = "table")]
    pub output: OutputFormat,
}

impl ResolveCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = self.source.load_config()?;
        let (service, nodes) = self.source.load_objects().await?;

        let resolver = SpecResolver::new(config);
        let spec = resolver
            .resolve(&service, &nodes)
            .map_err(|e| anyhow::anyhow!("Failed to resolve load balancer spec: {}", e))?;

        let output = match self.output {
            OutputFormat::Table => TableRenderer::new().render_spec(&spec),
            OutputFormat::Yaml => serde_yaml::to_string(&spec)?,
            OutputFormat::Json => serde_json::to_string_pretty(&spec)?,
        };
        println!("{}", output);
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PlanCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Seed inventory for the in-memory cloud (YAML: subnets, instances, security groups)
    #[arg(long, value_name = "PATH")]
    pub inventory: Option<String>,

    /// Lifecycle operation to run; update and delete run against a freshly ensured load balancer
    #[arg(long, short = 'a', value_enum, default_value = "ensure")]
    pub action: Action,

    /// Run the operation a second time and show that it converged
    #[arg(long)]
    pub twice: bool,
}

impl PlanCommand {
    async fn run(
        &self,
        reconciler: &LoadBalancerReconciler,
        service: &Service,
        nodes: &[Node],
    ) -> anyhow::Result<()> {
        match self.action {
            Action::Ensure => {
                reconciler.ensure_load_balancer(service, nodes).await?;
            }
            Action::Update => reconciler.update_load_balancer(service, nodes).await?,
            Action::Delete => reconciler.ensure_load_balancer_deleted(service).await?,
        }
        Ok(())
    }

    pub async fn execute(&self) -> anyhow::Result<()> {
        let mut config = self.source.load_config()?;
        let (service, nodes) = self.source.load_objects().await?;
        let cloud = fake_cloud(&mut config, self.inventory.as_deref(), &nodes).await?;
        let reconciler = LoadBalancerReconciler::new(cloud.services(), config);
        let renderer = TableRenderer::new();

        if self.action != Action::Ensure {
            reconciler
                .ensure_load_balancer(&service, &nodes)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to prepare load balancer: {}", e))?;
            cloud.clear_calls().await;
        }

        let result = self.run(&reconciler, &service, &nodes).await;
        println!("{}", renderer.render_api_calls("First pass", &cloud.calls().await));
        result?;

        if self.twice {
            cloud.clear_calls().await;
            self.run(&reconciler, &service, &nodes).await?;
            let calls = cloud.calls().await;
            println!("{}", renderer.render_api_calls("Second pass", &calls));
            if calls.iter().any(|c| c.mutating) {
                println!("{} Second pass still changed resources", "⚠".yellow());
            } else {
                println!("{} Second pass issued no mutating calls", "✓".green());
            }
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct StatusCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Seed inventory for the in-memory cloud
    #[arg(long, value_name = "PATH")]
    pub inventory: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let mut config = self.source.load_config()?;
        let (service, nodes) = self.source.load_objects().await?;
        let cloud = fake_cloud(&mut config, self.inventory.as_deref(), &nodes).await?;
        let reconciler = LoadBalancerReconciler::new(cloud.services(), config);

        let Some(identity) = reconciler.resolver().identify(&service)? else {
            println!("Load balancer of this service is managed by another controller");
            return Ok(());
        };

        reconciler
            .ensure_load_balancer(&service, &nodes)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to ensure load balancer: {}", e))?;
        let (status, exists) = reconciler
            .get_load_balancer(&service)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get load balancer status: {}", e))?;

        let renderer = TableRenderer::new();
        let output = renderer.render_status(
            &identity.name,
            &identity.service.to_string(),
            status.as_ref(),
            exists,
        );
        println!("{}", output);
        Ok(())
    }
}

/// Parse dynamic configuration properties from -D key=value format
fn parse_dynamic_configs(configs: &[String]) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();

    for config in configs {
        let parts: Vec<&str> = config.splitn(2, '=').collect();
        if parts.len() != 2 {
            return Err(format!(
                "Invalid config format: '{}'. Expected 'key=value'",
                config
            ));
        }

        let key = parts[0].trim();
        let value = parts[1].trim();

        if key.is_empty() {
            return Err(format!("Empty key in config: '{}'", config));
        }

        map.insert(key.to_string(), value.to_string());
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dynamic_configs() {
        let configs = vec![
            "cloud.cluster-id=prod".to_string(),
            "health-probe.path = /ready".to_string(),
        ];
        let map = parse_dynamic_configs(&configs).unwrap();
        assert_eq!(map.get("cloud.cluster-id").map(String::as_str), Some("prod"));
        assert_eq!(map.get("health-probe.path").map(String::as_str), Some("/ready"));

        assert!(parse_dynamic_configs(&["novalue".to_string()]).is_err());
        assert!(parse_dynamic_configs(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_plan() {
        use crate::cli::{CliArgs, Commands};

        let args = CliArgs::parse_from([
            "kube-elb",
            "plan",
            "-f",
            "svc.yaml",
            "--action",
            "delete",
            "--twice",
            "-Dcloud.vpc-id=vpc-1",
        ]);
        match args.command {
            Commands::Plan(cmd) => {
                assert_eq!(cmd.action, Action::Delete);
                assert!(cmd.twice);
                assert_eq!(cmd.source.manifest.as_deref(), Some("svc.yaml"));
                assert_eq!(cmd.source.properties, vec!["cloud.vpc-id=vpc-1"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
