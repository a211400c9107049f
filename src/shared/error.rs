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

use thiserror::Error;
pub type Result<T> = std::result::Result<T, LbError>;

#[derive(Error, Debug)]
pub enum LbError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Resource not found: {resource_type} '{name}'")]
    NotFound { resource_type: String, name: String },

    #[error("Resource already exists: {resource_type} '{name}'")]
    Duplicate { resource_type: String, name: String },

    #[error("Dependency violation on {resource_type} '{name}': {message}")]
    DependencyViolation {
        resource_type: String,
        name: String,
        message: String,
    },

    #[error("Request throttled: {0}")]
    Throttling(String),

    #[error("Cloud API error ({code}): {message}")]
    CloudApi { code: String, message: String },

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Load balancer for service {0} is managed by another controller")]
    ImplementedElsewhere(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<kube::Error> for LbError {
    fn from(err: kube::Error) -> Self {
        LbError::KubeError(err.to_string())
    }
}

impl LbError {
    pub fn validation(context: impl Into<String>) -> Self {
        Self::ValidationError(context.into())
    }

    pub fn config_error(context: impl Into<String>) -> Self {
        Self::ConfigError(context.into())
    }

    pub fn not_found(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    pub fn duplicate(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    pub fn dependency_violation(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DependencyViolation {
            resource_type: resource_type.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn cloud(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CloudApi {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn is_dependency_violation(&self) -> bool {
        matches!(self, Self::DependencyViolation { .. })
    }
}

/// Turns a `NotFound` error into `Ok(None)`.
///
/// Describe calls report an absent resource as `LbError::NotFound`; callers that
/// treat absence as a legitimate state (the create branch of a reconcile) use this
/// to tell "doesn't exist" apart from "failed to query".
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
