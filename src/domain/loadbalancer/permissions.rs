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

//! Set algebra over security-group ingress permissions.
//!
//! EC2 groups every range and peer that shares protocol and port range into a
//! single permission, and splits them again as rules are revoked. Diffing is
//! therefore done on the ungrouped form, where each member carries exactly one
//! CIDR range or one source group together with its description.

use crate::infrastructure::cloud::model::{IpPermission, IpRange, UserIdGroupPair};
use crate::shared::set::KeyedSet;
use std::fmt;

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn port(value: Option<i32>) -> String {
    value.map(|p| p.to_string()).unwrap_or_default()
}

/// Canonical identity of a permission. Descriptions are part of it, so the
/// same CIDR opened for two different purposes stays two members.
pub fn permission_key(permission: &IpPermission) -> String {
    let mut ranges: Vec<String> = permission
        .ip_ranges
        .iter()
        .map(|r| format!("{}#{}", r.cidr_ip, opt(&r.description)))
        .collect();
    ranges.sort();

    let mut pairs: Vec<String> = permission
        .user_id_group_pairs
        .iter()
        .map(|p| format!("{}#{}#{}", p.group_id, opt(&p.user_id), opt(&p.description)))
        .collect();
    pairs.sort();

    format!(
        "{}|{}|{}|{}|{}",
        permission.ip_protocol.to_lowercase(),
        port(permission.from_port),
        port(permission.to_port),
        ranges.join(","),
        pairs.join(",")
    )
}

#[derive(Clone, PartialEq, Eq)]
pub struct IpPermissionSet {
    inner: KeyedSet<IpPermission>,
}

impl Default for IpPermissionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl IpPermissionSet {
    pub fn new() -> Self {
        Self {
            inner: KeyedSet::new(permission_key),
        }
    }

    pub fn from_permissions(permissions: impl IntoIterator<Item = IpPermission>) -> Self {
        Self {
            inner: KeyedSet::from_items(permission_key, permissions),
        }
    }

    pub fn insert(&mut self, permission: IpPermission) {
        self.inner.insert(permission);
    }

    pub fn extend(&mut self, permissions: impl IntoIterator<Item = IpPermission>) {
        self.inner.extend(permissions);
    }

    pub fn delete(&mut self, permission: &IpPermission) -> bool {
        self.inner.remove(permission)
    }

    pub fn delete_all<'a>(&mut self, permissions: impl IntoIterator<Item = &'a IpPermission>) {
        for permission in permissions {
            self.inner.remove(permission);
        }
    }

    pub fn contains(&self, permission: &IpPermission) -> bool {
        self.inner.contains(permission)
    }

    /// One member per CIDR range and per source group.
    pub fn ungroup(&self) -> Self {
        let mut out = Self::new();
        for permission in self.inner.iter() {
            for range in &permission.ip_ranges {
                out.insert(IpPermission {
                    ip_ranges: vec![range.clone()],
                    user_id_group_pairs: Vec::new(),
                    ..permission.clone()
                });
            }
            for pair in &permission.user_id_group_pairs {
                out.insert(IpPermission {
                    ip_ranges: Vec::new(),
                    user_id_group_pairs: vec![pair.clone()],
                    ..permission.clone()
                });
            }
        }
        out
    }

    pub fn difference(&self, other: &Self) -> Self {
        Self {
            inner: self.inner.difference(&other.inner),
        }
    }

    /// Keeps only permissions whose every range and peer carries exactly
    /// `description`.
    pub fn retain_described(&mut self, description: &str) {
        self.inner
            .retain(|permission| has_description(permission, description));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpPermission> {
        self.inner.iter()
    }

    pub fn to_vec(&self) -> Vec<IpPermission> {
        self.inner.to_vec()
    }

    /// CIDRs of every range, in member order.
    pub fn cidrs(&self) -> Vec<&IpRange> {
        self.inner.iter().flat_map(|p| p.ip_ranges.iter()).collect()
    }
}

impl fmt::Debug for IpPermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

fn has_description(permission: &IpPermission, description: &str) -> bool {
    permission
        .ip_ranges
        .iter()
        .all(|r| r.description.as_deref() == Some(description))
        && permission
            .user_id_group_pairs
            .iter()
            .all(|p| p.description.as_deref() == Some(description))
}

fn pairs_equal(new: &UserIdGroupPair, existing: &UserIdGroupPair, compare_user_ids: bool) -> bool {
    new.group_id == existing.group_id && (!compare_user_ids || new.user_id == existing.user_id)
}

/// Whether `existing` already grants everything in `new`.
///
/// Protocol and port range must match exactly; `new`'s ranges must be a subset
/// of `existing`'s by CIDR and its peers a subset by group id (and user id when
/// `compare_user_ids`). Descriptions are ignored.
pub fn permission_exists(new: &IpPermission, existing: &IpPermission, compare_user_ids: bool) -> bool {
    if new.from_port != existing.from_port
        || new.to_port != existing.to_port
        || new.ip_protocol != existing.ip_protocol
    {
        return false;
    }
    if new.ip_ranges.len() > existing.ip_ranges.len() {
        return false;
    }
    let ranges_covered = new
        .ip_ranges
        .iter()
        .all(|r| existing.ip_ranges.iter().any(|e| e.cidr_ip == r.cidr_ip));
    let pairs_covered = new.user_id_group_pairs.iter().all(|p| {
        existing
            .user_id_group_pairs
            .iter()
            .any(|e| pairs_equal(p, e, compare_user_ids))
    });
    ranges_covered && pairs_covered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn described(cidr: &str, port: i32, description: &str) -> IpPermission {
        IpPermission::cidr("tcp", port, port, cidr, Some(description.to_string()))
    }

    fn grouped() -> IpPermission {
        IpPermission {
            ip_protocol: "tcp".to_string(),
            from_port: Some(80),
            to_port: Some(80),
            ip_ranges: vec![
                IpRange {
                    cidr_ip: "10.0.0.0/24".to_string(),
                    description: Some("client".to_string()),
                },
                IpRange {
                    cidr_ip: "10.0.1.0/24".to_string(),
                    description: Some("client".to_string()),
                },
            ],
            user_id_group_pairs: vec![UserIdGroupPair {
                group_id: "sg-lb".to_string(),
                user_id: None,
                description: None,
            }],
        }
    }

    #[test]
    fn test_ungroup_preserves_coverage() {
        let set = IpPermissionSet::from_permissions(vec![grouped()]);
        let ungrouped = set.ungroup();

        assert_eq!(ungrouped.len(), 3);
        for member in ungrouped.iter() {
            assert_eq!(member.ip_ranges.len() + member.user_id_group_pairs.len(), 1);
        }
        let mut cidrs: Vec<&str> = ungrouped.cidrs().iter().map(|r| r.cidr_ip.as_str()).collect();
        cidrs.sort();
        assert_eq!(cidrs, vec!["10.0.0.0/24", "10.0.1.0/24"]);
    }

    #[test]
    fn test_difference_identities() {
        let set = IpPermissionSet::from_permissions(vec![
            described("10.0.0.0/24", 80, "a"),
            described("10.0.1.0/24", 80, "a"),
        ]);
        assert!(set.difference(&set).is_empty());
        assert_eq!(set.difference(&IpPermissionSet::new()), set);
    }

    #[test]
    fn test_description_is_part_of_identity() {
        let mut set = IpPermissionSet::new();
        set.insert(described("10.0.0.0/24", 80, "client"));
        set.insert(described("10.0.0.0/24", 80, "health"));
        assert_eq!(set.len(), 2);
        assert!(set.delete(&described("10.0.0.0/24", 80, "health")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_grouped_and_ungrouped_forms_compare_equal_after_ungroup() {
        let single = IpPermissionSet::from_permissions(vec![
            described("10.0.0.0/24", 80, "client"),
            described("10.0.1.0/24", 80, "client"),
        ]);
        let mut merged = described("10.0.0.0/24", 80, "client");
        merged.ip_ranges.push(IpRange {
            cidr_ip: "10.0.1.0/24".to_string(),
            description: Some("client".to_string()),
        });
        let grouped = IpPermissionSet::from_permissions(vec![merged]);

        assert_ne!(single, grouped);
        assert_eq!(single.ungroup(), grouped.ungroup());
    }

    #[test]
    fn test_retain_described() {
        let mut set = IpPermissionSet::from_permissions(vec![
            described("10.0.0.0/24", 80, "client"),
            described("10.0.0.0/24", 443, "other"),
            IpPermission::cidr("tcp", 22, 22, "0.0.0.0/0", None),
        ]);
        set.retain_described("client");
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().from_port, Some(80));
    }

    #[test]
    fn test_permission_exists_subset_rules() {
        let existing = grouped();
        let mut probe = described("10.0.1.0/24", 80, "ignored");
        assert!(permission_exists(&probe, &existing, false));

        probe.ip_protocol = "udp".to_string();
        assert!(!permission_exists(&probe, &existing, false));

        let from_lb = IpPermission {
            ip_protocol: "tcp".to_string(),
            from_port: Some(80),
            to_port: Some(80),
            ip_ranges: Vec::new(),
            user_id_group_pairs: vec![UserIdGroupPair {
                group_id: "sg-lb".to_string(),
                user_id: Some("123".to_string()),
                description: None,
            }],
        };
        assert!(permission_exists(&from_lb, &existing, false));
        assert!(!permission_exists(&from_lb, &existing, true));
    }
}
