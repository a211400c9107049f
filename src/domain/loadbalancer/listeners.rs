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

//! Classic ELB listener diffing.

use crate::infrastructure::cloud::api::ClassicElbApi;
use crate::infrastructure::cloud::model::{ClassicListener, ClassicListenerDescription};
use crate::shared::error::Result;
use tracing::{debug, info};

/// Listeners to create and load-balancer ports whose listener must go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerChanges {
    pub additions: Vec<ClassicListener>,
    pub removals: Vec<i32>,
}

impl ListenerChanges {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

fn equal_ignore_case(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (Some(l), Some(r)) => l.eq_ignore_ascii_case(r),
        (None, None) => true,
        _ => false,
    }
}

pub fn listeners_equal(actual: &ClassicListener, expected: &ClassicListener) -> bool {
    actual.protocol.eq_ignore_ascii_case(&expected.protocol)
        && equal_ignore_case(
            actual.instance_protocol.as_deref(),
            expected.instance_protocol.as_deref(),
        )
        && actual.instance_port == expected.instance_port
        && actual.load_balancer_port == expected.load_balancer_port
        && equal_ignore_case(
            actual.ssl_certificate_id.as_deref(),
            expected.ssl_certificate_id.as_deref(),
        )
}

pub fn diff_listeners(
    desired: &[ClassicListener],
    observed: &[ClassicListenerDescription],
) -> ListenerChanges {
    let mut matched = vec![false; desired.len()];
    let mut changes = ListenerChanges::default();

    for description in observed {
        let actual = &description.listener;
        match desired.iter().position(|expected| listeners_equal(actual, expected)) {
            Some(index) => matched[index] = true,
            None => changes.removals.push(actual.load_balancer_port),
        }
    }
    changes.additions = desired
        .iter()
        .zip(matched)
        .filter(|(_, found)| !found)
        .map(|(listener, _)| listener.clone())
        .collect();
    changes
}

/// Deletes stale listeners, then creates missing ones.
pub async fn sync_listeners(
    elb: &dyn ClassicElbApi,
    load_balancer: &str,
    desired: &[ClassicListener],
    observed: &[ClassicListenerDescription],
) -> Result<bool> {
    let changes = diff_listeners(desired, observed);
    debug!(
        "Listener diff for {}: {} to add, {} to remove",
        load_balancer,
        changes.additions.len(),
        changes.removals.len()
    );
    if changes.is_empty() {
        return Ok(false);
    }
    if !changes.removals.is_empty() {
        info!(
            "Deleting listeners on ports {:?} of load balancer {}",
            changes.removals, load_balancer
        );
        elb.delete_listeners(load_balancer, &changes.removals).await?;
    }
    if !changes.additions.is_empty() {
        info!(
            "Creating {} listeners on load balancer {}",
            changes.additions.len(),
            load_balancer
        );
        elb.create_listeners(load_balancer, &changes.additions).await?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(protocol: &str, port: i32, instance_port: i32, cert: Option<&str>) -> ClassicListener {
        ClassicListener {
            protocol: protocol.to_string(),
            load_balancer_port: port,
            instance_protocol: Some(protocol.to_string()),
            instance_port,
            ssl_certificate_id: cert.map(str::to_string),
        }
    }

    fn described(listener: ClassicListener) -> ClassicListenerDescription {
        ClassicListenerDescription {
            listener,
            policy_names: Vec::new(),
        }
    }

    #[test]
    fn test_equality_is_case_insensitive() {
        let actual = listener("TCP", 80, 30080, Some("ARN:AWS:CERT"));
        let expected = listener("tcp", 80, 30080, Some("arn:aws:cert"));
        assert!(listeners_equal(&actual, &expected));

        let no_cert = listener("tcp", 80, 30080, None);
        assert!(!listeners_equal(&actual, &no_cert));

        let mut no_instance_protocol = listener("tcp", 80, 30080, Some("arn:aws:cert"));
        no_instance_protocol.instance_protocol = None;
        assert!(!listeners_equal(&actual, &no_instance_protocol));
    }

    #[test]
    fn test_diff_is_symmetric_difference() {
        let desired = vec![listener("tcp", 80, 30080, None), listener("tcp", 443, 30443, None)];
        let observed = vec![
            described(listener("TCP", 80, 30080, None)),
            described(listener("tcp", 8080, 30880, None)),
            described(listener("tcp", 443, 31000, None)),
        ];
        let changes = diff_listeners(&desired, &observed);
        assert_eq!(changes.removals, vec![8080, 443]);
        assert_eq!(changes.additions, vec![listener("tcp", 443, 30443, None)]);
    }

    #[test]
    fn test_applied_diff_converges() {
        let desired = vec![listener("tcp", 80, 30081, None)];
        let observed = vec![described(listener("tcp", 80, 30080, None))];
        let changes = diff_listeners(&desired, &observed);

        let mut after: Vec<ClassicListenerDescription> = observed
            .into_iter()
            .filter(|d| !changes.removals.contains(&d.listener.load_balancer_port))
            .collect();
        after.extend(changes.additions.into_iter().map(described));
        assert!(diff_listeners(&desired, &after).is_empty());
    }
}
