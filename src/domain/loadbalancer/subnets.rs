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

//! Subnet selection for new load balancers.

use crate::domain::spec::{Scheme, SubnetSelection};
use crate::domain::tagging::ClusterTagging;
use crate::infrastructure::cloud::api::Ec2Api;
use crate::infrastructure::cloud::model::{Subnet, SubnetFilter};
use crate::infrastructure::constants::{TAG_CLUSTER_PREFIX, TAG_ROLE_ELB, TAG_ROLE_INTERNAL_ELB};
use crate::shared::error::{LbError, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Subnet ids for the load balancer, ordered by availability zone for
/// discovered subnets and in annotation order for explicit ones.
pub async fn resolve_subnets(
    ec2: &dyn Ec2Api,
    vpc_id: &str,
    tagging: &ClusterTagging,
    selection: &SubnetSelection,
    scheme: Scheme,
) -> Result<Vec<String>> {
    let subnets = match selection {
        SubnetSelection::Explicit(names) => resolve_explicit(ec2, vpc_id, names).await?,
        SubnetSelection::Discover => {
            let candidates = ec2
                .describe_subnets(&SubnetFilter::Vpc(vpc_id.to_string()))
                .await?;
            discover(candidates, tagging, scheme)
        }
    };
    if subnets.is_empty() {
        return Err(LbError::validation(
            "could not find any suitable subnets for creating the load balancer",
        ));
    }
    debug!("Using subnets {:?}", subnets);
    Ok(subnets)
}

/// `subnet-` prefixed entries are ids, anything else is matched against the
/// `Name` tag of the VPC's subnets. Every entry must resolve.
async fn resolve_explicit(ec2: &dyn Ec2Api, vpc_id: &str, names: &[String]) -> Result<Vec<String>> {
    let (ids, tag_names): (Vec<&String>, Vec<&String>) =
        names.iter().partition(|n| n.starts_with("subnet-"));

    let mut resolved: BTreeMap<String, String> = BTreeMap::new();
    if !ids.is_empty() {
        let found = ec2
            .describe_subnets(&SubnetFilter::Ids(ids.iter().map(|s| s.to_string()).collect()))
            .await?;
        for subnet in found {
            if ids.iter().any(|id| **id == subnet.id) {
                resolved.insert(subnet.id.clone(), subnet.id);
            }
        }
    }
    if !tag_names.is_empty() {
        let found = ec2
            .describe_subnets(&SubnetFilter::Vpc(vpc_id.to_string()))
            .await?;
        for name in &tag_names {
            if let Some(subnet) = found.iter().find(|s| s.name() == Some(name.as_str())) {
                resolved.insert(name.to_string(), subnet.id.clone());
            }
        }
    }

    if resolved.len() != names.len() {
        return Err(LbError::validation(format!(
            "expected to find {} subnets, but found {}",
            names.len(),
            resolved.len()
        )));
    }
    Ok(names
        .iter()
        .filter_map(|n| resolved.get(n).cloned())
        .collect())
}

/// One subnet per availability zone among the subnets this cluster may use:
/// those tagged for it and those tagged for no cluster at all. Ties go to the
/// role tag, then the cluster tag, then the lowest id.
pub fn discover(subnets: Vec<Subnet>, tagging: &ClusterTagging, scheme: Scheme) -> Vec<String> {
    let role_tag = if scheme.is_internal() {
        TAG_ROLE_INTERNAL_ELB
    } else {
        TAG_ROLE_ELB
    };
    let usable = |subnet: &Subnet| {
        tagging.has_cluster_tag(&subnet.tags)
            || !subnet.tags.keys().any(|k| k.starts_with(TAG_CLUSTER_PREFIX))
    };

    let mut by_zone: BTreeMap<String, Subnet> = BTreeMap::new();
    for subnet in subnets.into_iter().filter(usable) {
        if subnet.availability_zone.is_empty() || subnet.id.is_empty() {
            warn!("Ignoring subnet with empty az/id: {}", subnet.id);
            continue;
        }
        let Some(existing) = by_zone.get(&subnet.availability_zone) else {
            by_zone.insert(subnet.availability_zone.clone(), subnet);
            continue;
        };

        let rank = |s: &Subnet| {
            (
                !s.tags.contains_key(role_tag),
                !tagging.has_cluster_tag(&s.tags),
                s.id.clone(),
            )
        };
        if rank(&subnet) < rank(existing) {
            warn!(
                "Found multiple subnets in AZ {}; choosing {} over {}",
                subnet.availability_zone, subnet.id, existing.id
            );
            by_zone.insert(subnet.availability_zone.clone(), subnet);
        }
    }
    by_zone.into_values().map(|s| s.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(id: &str, zone: &str, tags: &[(&str, &str)]) -> Subnet {
        Subnet {
            id: id.to_string(),
            vpc_id: "vpc-1".to_string(),
            availability_zone: zone.to_string(),
            cidr_block: "10.0.0.0/24".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_discover_one_subnet_per_zone() {
        let tagging = ClusterTagging::new("prod");
        let subnets = vec![
            subnet("subnet-b", "us-east-1b", &[]),
            subnet("subnet-c", "us-east-1a", &[]),
            subnet("subnet-a", "us-east-1a", &[]),
        ];
        assert_eq!(
            discover(subnets, &tagging, Scheme::InternetFacing),
            vec!["subnet-a", "subnet-b"]
        );
    }

    #[test]
    fn test_discover_tie_breaks() {
        let tagging = ClusterTagging::new("prod");
        let subnets = vec![
            subnet("subnet-1", "us-east-1a", &[("kubernetes.io/cluster/prod", "owned")]),
            subnet("subnet-2", "us-east-1a", &[("kubernetes.io/role/internal-elb", "1")]),
            subnet("subnet-3", "us-east-1a", &[]),
        ];
        assert_eq!(
            discover(subnets.clone(), &tagging, Scheme::Internal),
            vec!["subnet-2"]
        );
        assert_eq!(
            discover(subnets, &tagging, Scheme::InternetFacing),
            vec!["subnet-1"]
        );
    }

    #[test]
    fn test_discover_skips_other_clusters() {
        let tagging = ClusterTagging::new("prod");
        let subnets = vec![subnet(
            "subnet-1",
            "us-east-1a",
            &[("kubernetes.io/cluster/staging", "shared")],
        )];
        assert!(discover(subnets, &tagging, Scheme::InternetFacing).is_empty());
    }
}
