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

use crate::infrastructure::constants::{TAG_CLUSTER_OWNED, TAG_CLUSTER_PREFIX, TAG_LEGACY_CLUSTER};
use std::collections::BTreeMap;

/// Cluster ownership tags on cloud resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTagging {
    cluster_id: String,
}

impl ClusterTagging {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn tag_key(&self) -> String {
        format!("{}{}", TAG_CLUSTER_PREFIX, self.cluster_id)
    }

    /// True for the current `kubernetes.io/cluster/<id>` tag with any value, or
    /// the legacy `KubernetesCluster=<id>` tag.
    pub fn has_cluster_tag(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.contains_key(&self.tag_key())
            || tags.get(TAG_LEGACY_CLUSTER).map(String::as_str) == Some(self.cluster_id.as_str())
    }

    /// `extra` plus the ownership tag, which always wins.
    pub fn build_tags(&self, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut tags = extra.clone();
        tags.insert(self.tag_key(), TAG_CLUSTER_OWNED.to_string());
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_cluster_tag() {
        let tagging = ClusterTagging::new("prod");
        let current = BTreeMap::from([("kubernetes.io/cluster/prod".to_string(), "shared".to_string())]);
        let legacy = BTreeMap::from([("KubernetesCluster".to_string(), "prod".to_string())]);
        let other = BTreeMap::from([("kubernetes.io/cluster/dev".to_string(), "owned".to_string())]);

        assert!(tagging.has_cluster_tag(&current));
        assert!(tagging.has_cluster_tag(&legacy));
        assert!(!tagging.has_cluster_tag(&other));
    }

    #[test]
    fn test_build_tags_overrides_ownership() {
        let tagging = ClusterTagging::new("prod");
        let extra = BTreeMap::from([
            ("team".to_string(), "web".to_string()),
            ("kubernetes.io/cluster/prod".to_string(), "shared".to_string()),
        ]);
        let tags = tagging.build_tags(&extra);
        assert_eq!(tags.get("team").map(String::as_str), Some("web"));
        assert_eq!(
            tags.get("kubernetes.io/cluster/prod").map(String::as_str),
            Some("owned")
        );
    }
}
