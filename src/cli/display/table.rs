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

//! Table rendering for CLI output

use super::{ColorTheme, StatusIcon};
use crate::domain::spec::LoadBalancerSpec;
use crate::infrastructure::cloud::ApiCall;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Color, ContentArrangement, Table};
use k8s_openapi::api::core::v1::LoadBalancerStatus;

/// Table renderer for formatted output
pub struct TableRenderer {
    theme: ColorTheme,
}

impl Default for TableRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn hostname(status: Option<&LoadBalancerStatus>) -> Option<&str> {
    status
        .and_then(|s| s.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|i| i.hostname.as_deref())
}

impl TableRenderer {
    /// Create a new table renderer with default theme
    pub fn new() -> Self {
        Self {
            theme: ColorTheme::default(),
        }
    }

    /// Render the resolved spec: a summary followed by one row per port mapping
    pub fn render_spec(&self, spec: &LoadBalancerSpec) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "╭─ {} {} ─╮\n",
            spec.name.bold(),
            format!("[{} / {}]", spec.kind, spec.scheme.as_str()).bright_black()
        ));
        output.push_str(&format!("Service:   {}\n", spec.service));
        output.push_str(&format!("Instances: {}\n", spec.instance_ids.join(", ")));
        output.push_str(&format!("Sources:   {}\n", spec.source_ranges.join(", ")));
        if !spec.security_groups.replace.is_empty() || !spec.security_groups.extra.is_empty() {
            output.push_str(&format!(
                "Groups:    replace=[{}] extra=[{}]\n",
                spec.security_groups.replace.join(","),
                spec.security_groups.extra.join(",")
            ));
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("FRONTEND").set_alignment(CellAlignment::Left),
                Cell::new("TRAFFIC").set_alignment(CellAlignment::Left),
                Cell::new("TLS").set_alignment(CellAlignment::Center),
                Cell::new("HEALTH CHECK").set_alignment(CellAlignment::Left),
            ]);

        for mapping in &spec.port_mappings {
            let check = &mapping.health_check;
            let tls = match &mapping.tls_cert_arn {
                Some(_) => Cell::new(StatusIcon::SUCCESS).fg(self.theme.success),
                None => Cell::new("-").fg(self.theme.muted),
            };
            table.add_row(vec![
                Cell::new(format!("{}/{}", mapping.frontend_port, mapping.frontend_protocol)),
                Cell::new(format!("{}/{}", mapping.traffic_port, mapping.traffic_protocol)),
                tls,
                Cell::new(format!(
                    "{} every {}s ({}/{})",
                    check.classic_target(),
                    check.interval_seconds,
                    check.healthy_threshold,
                    check.unhealthy_threshold
                ))
                .fg(self.theme.info),
            ]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    /// Render recorded cloud API calls in order
    pub fn render_api_calls(&self, title: &str, calls: &[ApiCall]) -> String {
        let mutating = calls.iter().filter(|c| c.mutating).count();
        let mut output = format!(
            "╭─ {} {} ─╮\n",
            title,
            format!("[{} calls, {} mutating]", calls.len(), mutating).bright_black()
        );
        if calls.is_empty() {
            output.push_str("No API calls recorded\n");
            return output;
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("#").set_alignment(CellAlignment::Right),
                Cell::new("").set_alignment(CellAlignment::Center),
                Cell::new("SERVICE").set_alignment(CellAlignment::Left),
                Cell::new("OPERATION").set_alignment(CellAlignment::Left),
                Cell::new("TARGET").set_alignment(CellAlignment::Left),
            ]);

        for (index, call) in calls.iter().enumerate() {
            let color = self.theme.get_call_color(call.mutating);
            table.add_row(vec![
                Cell::new(index + 1).set_alignment(CellAlignment::Right),
                Cell::new(StatusIcon::get_call_icon(call.mutating)).fg(color),
                Cell::new(call.service),
                Cell::new(call.operation).fg(color),
                Cell::new(&call.target),
            ]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output.push_str(&format!(
            "Legend: {} mutating  {} read-only\n",
            StatusIcon::WRITE.yellow(),
            StatusIcon::READ.bright_black()
        ));
        output
    }

    /// Render load balancer status
    pub fn render_status(
        &self,
        name: &str,
        service: &str,
        status: Option<&LoadBalancerStatus>,
        exists: bool,
    ) -> String {
        let host = hostname(status);
        let ready = host.is_some();
        let color = self.theme.get_state_color(exists, ready);

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.add_row(vec![
            Cell::new("📊 Load Balancer Status").set_alignment(CellAlignment::Center)
        ]);
        table.add_row(vec![Cell::new(format!(
            "Load balancer: {} | Service: {}",
            name, service
        ))]);
        table.add_row(vec![Cell::new(format!(
            "Status: {} {}",
            StatusIcon::get_state_icon(exists, ready),
            StatusIcon::get_status_text(exists, ready)
        ))
        .fg(color)]);
        table.add_row(vec![
            Cell::new(format!("🌐 Hostname: {}", host.unwrap_or("-"))).fg(Color::Cyan)
        ]);

        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::LoadBalancerIngress;

    #[test]
    fn test_render_empty_calls() {
        let renderer = TableRenderer::new();
        let output = renderer.render_api_calls("Second pass", &[]);
        assert!(output.contains("No API calls recorded"));
    }

    #[test]
    fn test_render_status_with_hostname() {
        let renderer = TableRenderer::new();
        let status = LoadBalancerStatus {
            ingress: Some(vec![LoadBalancerIngress {
                hostname: Some("a1.elb.amazonaws.com".to_string()),
                ..Default::default()
            }]),
        };
        let output = renderer.render_status("a1", "shop/web", Some(&status), true);
        assert!(output.contains("a1.elb.amazonaws.com"));
        assert!(output.contains("Ready"));

        let missing = renderer.render_status("a1", "shop/web", None, false);
        assert!(missing.contains("Absent"));
    }
}
