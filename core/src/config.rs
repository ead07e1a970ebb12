//! Process-level configuration.
//!
//! Read once from the environment at startup into an immutable struct.
//! The default tenant id is the only process-wide fallback in the core;
//! it is read-only after startup.

use crate::error::{ProcResult, ProcessorError};
use crate::types::TenantId;
use std::env;

pub const ENV_API_ID: &str = "PLAYER_PROCESSOR_API_ID";
pub const ENV_ENVIRONMENT: &str = "PLAYER_PROCESSOR_ENV";
pub const ENV_DEFAULT_TENANT: &str = "PLAYER_PROCESSOR_DEFAULT_TENANT";

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Deployment discriminator; component of physical group names.
    pub api_id: String,
    /// Environment name; component of physical group names.
    pub environment: String,
    /// Fallback tenant when a message carries none.
    pub default_tenant_id: Option<TenantId>,
}

impl ProcessorConfig {
    pub fn new(
        api_id: impl Into<String>,
        environment: impl Into<String>,
        default_tenant_id: Option<String>,
    ) -> Self {
        Self {
            api_id: api_id.into(),
            environment: environment.into(),
            default_tenant_id,
        }
    }

    /// Load from the environment. Missing required variables fail fast.
    pub fn from_env() -> ProcResult<Self> {
        let api_id = require(ENV_API_ID)?;
        let environment = require(ENV_ENVIRONMENT)?;
        let default_tenant_id = env::var(ENV_DEFAULT_TENANT).ok().filter(|v| !v.is_empty());
        Ok(Self {
            api_id,
            environment,
            default_tenant_id,
        })
    }

    /// Tenant for one message: explicit message value, else the process
    /// default, else unresolved.
    pub fn resolve_tenant(&self, message_tenant: Option<&str>) -> ProcResult<TenantId> {
        message_tenant
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_tenant_id.clone())
            .ok_or(ProcessorError::TenantUnresolved)
    }
}

fn require(var: &str) -> ProcResult<String> {
    env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProcessorError::Config(format!("environment variable {var} is not set")))
}
