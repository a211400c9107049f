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

//! Typed access to a Service's annotation map.
//!
//! An annotation that is present but empty is not the same as one that is
//! absent: `internal: ""` keeps the load balancer external while a missing
//! `healthcheck-port` falls back to the default.

use crate::shared::error::{LbError, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct ServiceAnnotations<'a> {
    map: &'a BTreeMap<String, String>,
}

impl<'a> ServiceAnnotations<'a> {
    pub fn new(map: &'a BTreeMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Value with surrounding whitespace removed, `None` when absent or blank.
    pub fn non_empty(&self, key: &str) -> Option<&'a str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Blank values count as absent for every typed getter.
    pub fn bool(&self, key: &str) -> Result<Option<bool>> {
        match self.non_empty(key) {
            None => Ok(None),
            Some(raw) => parse_bool(raw)
                .map(Some)
                .ok_or_else(|| invalid(key, raw, "a boolean")),
        }
    }

    pub fn i64(&self, key: &str) -> Result<Option<i64>> {
        match self.non_empty(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| invalid(key, raw, "an integer")),
        }
    }

    pub fn i32(&self, key: &str) -> Result<Option<i32>> {
        match self.non_empty(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i32>()
                .map(Some)
                .map_err(|_| invalid(key, raw, "an integer")),
        }
    }

    /// Comma-separated list, blanks dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    /// `K1=V1,K2=,K3` properties. A bare key maps to an empty value.
    pub fn key_values(&self, key: &str) -> BTreeMap<String, String> {
        self.get(key).map(parse_key_values).unwrap_or_default()
    }
}

fn invalid(key: &str, raw: &str, expected: &str) -> LbError {
    LbError::validation(format!(
        "Annotation {}='{}' is not {}",
        key, raw, expected
    ))
}

/// Accepts the spellings `1 t T TRUE true True 0 f F FALSE false False`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_key_values(raw: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for entry in raw.trim().split(',') {
        let mut parts = entry.trim().split('=');
        let key = parts.next().unwrap_or_default();
        if key.is_empty() {
            continue;
        }
        let value = parts.next().unwrap_or_default();
        properties.insert(key.to_string(), value.to_string());
    }
    properties
}
