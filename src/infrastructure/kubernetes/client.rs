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

use crate::shared::error::{LbError, Result};
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::ListParams;
use kube::{Api, Client};
use serde::Deserialize;
use std::path::Path;

/// Read-only view of the cluster objects a reconciliation needs.
#[async_trait::async_trait]
pub trait ClusterSource: Send + Sync {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

pub struct KubeClusterSource {
    client: Client,
}

impl KubeClusterSource {
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            LbError::KubeError(format!("Failed to create Kubernetes client: {}", e))
        })?;
        Ok(Self { client })
    }

    pub async fn new_with_config(
        kubeconfig_path: Option<String>,
        context: Option<String>,
    ) -> Result<Self> {
        use kube::config::{KubeConfigOptions, Kubeconfig};

        let kubeconfig = if let Some(path) = kubeconfig_path {
            Kubeconfig::read_from(path)
                .map_err(|e| LbError::KubeError(format!("Failed to load kubeconfig: {}", e)))?
        } else {
            Kubeconfig::read()
                .map_err(|e| LbError::KubeError(format!("Failed to load kubeconfig: {}", e)))?
        };

        let config_options = KubeConfigOptions {
            context,
            cluster: None,
            user: None,
        };

        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &config_options)
            .await
            .map_err(|e| {
                LbError::KubeError(format!("Failed to create Kubernetes config: {}", e))
            })?;

        let client = Client::try_from(config).map_err(|e| {
            LbError::KubeError(format!("Failed to create Kubernetes client: {}", e))
        })?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ClusterSource for KubeClusterSource {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(service) => Ok(service),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(LbError::not_found("Service", format!("{}/{}", namespace, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes.items)
    }
}

/// Services and nodes read from a multi-document YAML manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestClusterSource {
    pub services: Vec<Service>,
    pub nodes: Vec<Node>,
}

#[derive(Deserialize)]
struct KindProbe {
    #[serde(default)]
    kind: String,
}

impl ManifestClusterSource {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut source = Self::default();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let probe: KindProbe = serde_yaml::from_value(value.clone())?;
            match probe.kind.as_str() {
                "Service" => source.services.push(serde_yaml::from_value(value)?),
                "Node" => source.nodes.push(serde_yaml::from_value(value)?),
                "List" | "NodeList" | "ServiceList" => {
                    let items = value
                        .get("items")
                        .and_then(|items| items.as_sequence())
                        .cloned()
                        .unwrap_or_default();
                    for item in items {
                        let probe: KindProbe = serde_yaml::from_value(item.clone())?;
                        match probe.kind.as_str() {
                            "Service" => source.services.push(serde_yaml::from_value(item)?),
                            "Node" => source.nodes.push(serde_yaml::from_value(item)?),
                            other => tracing::debug!("Skipping list item of kind '{}'", other),
                        }
                    }
                }
                other => tracing::debug!("Skipping manifest document of kind '{}'", other),
            }
        }
        Ok(source)
    }

    /// The only Service in the manifest, or the one named `name`.
    pub fn service(&self, name: Option<&str>) -> Result<Service> {
        match name {
            Some(name) => self
                .services
                .iter()
                .find(|s| s.metadata.name.as_deref() == Some(name))
                .cloned()
                .ok_or_else(|| LbError::not_found("Service", name)),
            None => match self.services.as_slice() {
                [only] => Ok(only.clone()),
                [] => Err(LbError::not_found("Service", "<manifest>")),
                _ => Err(LbError::validation(
                    "Manifest contains several Services; pass --service to pick one",
                )),
            },
        }
    }
}

#[async_trait::async_trait]
impl ClusterSource for ManifestClusterSource {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.services
            .iter()
            .find(|s| {
                s.metadata.name.as_deref() == Some(name)
                    && s.metadata.namespace.as_deref().unwrap_or("default") == namespace
            })
            .cloned()
            .ok_or_else(|| LbError::not_found("Service", format!("{}/{}", namespace, name)))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }
}
