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

//! Color theme for CLI output

use comfy_table::Color as TableColor;

/// Color theme for terminal output
#[derive(Debug, Clone)]
pub struct ColorTheme {
    pub success: TableColor,
    pub warning: TableColor,
    pub error: TableColor,
    pub info: TableColor,
    pub muted: TableColor,
}

impl Default for ColorTheme {
    fn default() -> Self {
        Self {
            success: TableColor::Green,
            warning: TableColor::Yellow,
            error: TableColor::Red,
            info: TableColor::Cyan,
            muted: TableColor::DarkGrey,
        }
    }
}

impl ColorTheme {
    /// Mutating calls stand out, reads are muted
    pub fn get_call_color(&self, mutating: bool) -> TableColor {
        if mutating {
            self.warning
        } else {
            self.muted
        }
    }

    /// Get color based on load balancer existence and readiness
    pub fn get_state_color(&self, exists: bool, ready: bool) -> TableColor {
        match (exists, ready) {
            (true, true) => self.success,
            (true, false) => self.warning,
            (false, _) => self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_theme() {
        let theme = ColorTheme::default();
        assert_eq!(theme.success, TableColor::Green);
        assert_eq!(theme.warning, TableColor::Yellow);
        assert_eq!(theme.error, TableColor::Red);
    }

    #[test]
    fn test_get_state_color() {
        let theme = ColorTheme::default();
        assert_eq!(theme.get_state_color(true, true), TableColor::Green);
        assert_eq!(theme.get_state_color(true, false), TableColor::Yellow);
        assert_eq!(theme.get_state_color(false, false), TableColor::Red);
        assert_eq!(theme.get_call_color(false), TableColor::DarkGrey);
    }
}
