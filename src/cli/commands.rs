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

// CLI command definitions

use super::lb::{PlanCommand, ResolveCommand, StatusCommand};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "kube-elb",
    version,
    about = "AWS load-balancer reconciliation for Kubernetes Services",
    long_about = "Resolves LoadBalancer Services into classic ELB or NLB specs and reconciles them against an in-memory cloud account"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Print the load balancer spec resolved from a Service
    Resolve(ResolveCommand),

    /// Reconcile a Service against an in-memory cloud and show the API calls
    Plan(PlanCommand),

    /// Ensure a Service's load balancer in an in-memory cloud and show its status
    Status(StatusCommand),
}
