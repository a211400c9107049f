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

//! Status icons for CLI output

/// Status icons for different states
pub struct StatusIcon;

impl StatusIcon {
    /// Success icon (load balancer ready)
    pub const SUCCESS: &'static str = "✓";

    /// Warning icon (exists, no hostname yet)
    pub const WARNING: &'static str = "⚠";

    /// Error icon (missing)
    pub const ERROR: &'static str = "✗";

    /// Mutating API call
    pub const WRITE: &'static str = "✎";

    /// Read-only API call
    pub const READ: &'static str = "·";

    pub fn get_call_icon(mutating: bool) -> &'static str {
        if mutating {
            Self::WRITE
        } else {
            Self::READ
        }
    }

    /// Get status icon based on existence and readiness
    pub fn get_state_icon(exists: bool, ready: bool) -> &'static str {
        match (exists, ready) {
            (true, true) => Self::SUCCESS,
            (true, false) => Self::WARNING,
            (false, _) => Self::ERROR,
        }
    }

    /// Get status text based on existence and readiness
    pub fn get_status_text(exists: bool, ready: bool) -> &'static str {
        match (exists, ready) {
            (true, true) => "Ready",
            (true, false) => "Pending",
            (false, _) => "Absent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_state_icon() {
        assert_eq!(StatusIcon::get_state_icon(true, true), StatusIcon::SUCCESS);
        assert_eq!(StatusIcon::get_state_icon(true, false), StatusIcon::WARNING);
        assert_eq!(StatusIcon::get_state_icon(false, true), StatusIcon::ERROR);
    }

    #[test]
    fn test_get_status_text() {
        assert_eq!(StatusIcon::get_status_text(true, true), "Ready");
        assert_eq!(StatusIcon::get_status_text(true, false), "Pending");
        assert_eq!(StatusIcon::get_status_text(false, false), "Absent");
    }
}
