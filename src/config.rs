//! Pool allocator configuration
//!
//! Everything the allocator reads from the outside world is collected here
//! and handed to the constructor explicitly; the allocator itself never
//! looks at the environment.
//!
//! # Environment Variables
//!
//! - `ROCFORGE_POOL_DEVICE`: device id (default 0)
//! - `ROCFORGE_POOL_SIZE`: pool release threshold in bytes, `K`/`M`/`G` suffixes accepted (default 0)
//! - `ROCFORGE_POOL_RESERVE`: pre-warm the pool at construction (default false)
//! - `ROCFORGE_DETERMINISTIC_OPS`: disable non-deterministic pool reuse (default false)
//! - `ROCFORGE_POOL_CONTEXT_WORKAROUND`: `auto`, `always` or `never` (default auto)
//! - `ROCFORGE_POOL_FALLBACK`: `disabled` or `when-unavailable` (default disabled)

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AllocatorError, AllocatorResult};

pub const POOL_DEVICE_ENV: &str = "ROCFORGE_POOL_DEVICE";
pub const POOL_SIZE_ENV: &str = "ROCFORGE_POOL_SIZE";
pub const POOL_RESERVE_ENV: &str = "ROCFORGE_POOL_RESERVE";
pub const DETERMINISTIC_OPS_ENV: &str = "ROCFORGE_DETERMINISTIC_OPS";
pub const CONTEXT_WORKAROUND_ENV: &str = "ROCFORGE_POOL_CONTEXT_WORKAROUND";
pub const FALLBACK_ENV: &str = "ROCFORGE_POOL_FALLBACK";

/// First driver release (6.0) on which pools of secondary devices can be
/// configured without device 0's primary context being initialized first.
pub const PRIMARY_CONTEXT_FIXED_DRIVER_VERSION: i32 = 60_000_000;

/// When to touch device 0 before configuring a pool on another device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimaryContextWorkaround {
    /// Only on drivers older than [`PRIMARY_CONTEXT_FIXED_DRIVER_VERSION`]
    #[default]
    Auto,
    Always,
    Never,
}

impl PrimaryContextWorkaround {
    /// Whether the device 0 touch is needed before configuring `device_id`.
    ///
    /// An unknown driver version is treated as old.
    pub fn applies(self, device_id: i32, driver_version: Option<i32>) -> bool {
        if device_id <= 0 {
            return false;
        }
        match self {
            PrimaryContextWorkaround::Always => true,
            PrimaryContextWorkaround::Never => false,
            PrimaryContextWorkaround::Auto => {
                driver_version.map_or(true, |v| v < PRIMARY_CONTEXT_FIXED_DRIVER_VERSION)
            }
        }
    }
}

impl FromStr for PrimaryContextWorkaround {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(PrimaryContextWorkaround::Auto),
            "always" | "on" => Ok(PrimaryContextWorkaround::Always),
            "never" | "off" => Ok(PrimaryContextWorkaround::Never),
            other => Err(format!("expected auto, always or never, got {:?}", other)),
        }
    }
}

/// When the fallback allocator is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Held and released with the allocator, never called
    #[default]
    Disabled,
    /// Serve every request from the fallback when the pool could not be set up
    WhenPoolUnavailable,
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disabled" | "never" | "off" => Ok(FallbackPolicy::Disabled),
            "when-unavailable" | "when_unavailable" | "when-pool-unavailable" => {
                Ok(FallbackPolicy::WhenPoolUnavailable)
            }
            other => Err(format!(
                "expected disabled or when-unavailable, got {:?}",
                other
            )),
        }
    }
}

/// Construction-time configuration of a pool allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolAllocatorConfig {
    /// Device whose default pool is used
    pub device_id: i32,
    /// Pool release threshold in bytes; also reported as `bytes_limit`
    pub pool_size: usize,
    /// Allocate and free `pool_size` bytes at construction
    pub reserve_memory: bool,
    /// Disable opportunistic and internal-dependency reuse in the pool
    pub deterministic: bool,
    pub primary_context_workaround: PrimaryContextWorkaround,
    pub fallback_policy: FallbackPolicy,
}

impl Default for PoolAllocatorConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            pool_size: 0,
            reserve_memory: false,
            deterministic: false,
            primary_context_workaround: PrimaryContextWorkaround::Auto,
            fallback_policy: FallbackPolicy::Disabled,
        }
    }
}

impl PoolAllocatorConfig {
    /// Configuration for `device_id` with a `pool_size` byte release threshold
    pub fn new(device_id: i32, pool_size: usize) -> Self {
        Self {
            device_id,
            pool_size,
            ..Self::default()
        }
    }

    pub fn with_reserve_memory(mut self, reserve: bool) -> Self {
        self.reserve_memory = reserve;
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_primary_context_workaround(mut self, policy: PrimaryContextWorkaround) -> Self {
        self.primary_context_workaround = policy;
        self
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    /// Read the configuration from `ROCFORGE_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparseable ones are an error.
    pub fn from_env() -> AllocatorResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`PoolAllocatorConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> AllocatorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(POOL_DEVICE_ENV) {
            config.device_id = value
                .trim()
                .parse::<i32>()
                .map_err(|e| invalid_env(POOL_DEVICE_ENV, &value, e.to_string()))?;
        }
        if let Some(value) = lookup(POOL_SIZE_ENV) {
            config.pool_size =
                parse_byte_size(&value).map_err(|e| invalid_env(POOL_SIZE_ENV, &value, e))?;
        }
        if let Some(value) = lookup(POOL_RESERVE_ENV) {
            config.reserve_memory =
                parse_bool(&value).map_err(|e| invalid_env(POOL_RESERVE_ENV, &value, e))?;
        }
        if let Some(value) = lookup(DETERMINISTIC_OPS_ENV) {
            config.deterministic =
                parse_bool(&value).map_err(|e| invalid_env(DETERMINISTIC_OPS_ENV, &value, e))?;
        }
        if let Some(value) = lookup(CONTEXT_WORKAROUND_ENV) {
            config.primary_context_workaround = value
                .parse()
                .map_err(|e| invalid_env(CONTEXT_WORKAROUND_ENV, &value, e))?;
        }
        if let Some(value) = lookup(FALLBACK_ENV) {
            config.fallback_policy = value
                .parse()
                .map_err(|e| invalid_env(FALLBACK_ENV, &value, e))?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AllocatorResult<()> {
        if self.device_id < 0 {
            return Err(AllocatorError::InvalidConfiguration(format!(
                "device_id must be non-negative, got {}",
                self.device_id
            )));
        }
        if self.reserve_memory && self.pool_size == 0 {
            return Err(AllocatorError::InvalidConfiguration(
                "reserve_memory requires a non-zero pool_size".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid_env(name: &str, value: &str, reason: impl Into<String>) -> AllocatorError {
    AllocatorError::InvalidEnvVar {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Parse a boolean flag (`1/0`, `true/false`, `yes/no`, `on/off`)
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("expected a boolean, got {:?}", other)),
    }
}

/// Parse a byte count with an optional binary suffix (`K`, `M`, `G`, `T`,
/// optionally followed by `B` or `iB`)
pub fn parse_byte_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(format!("expected a byte count, got {:?}", value));
    }

    let base: usize = digits
        .parse()
        .map_err(|e| format!("invalid byte count {:?}: {}", digits, e))?;
    let shift = match suffix.trim().to_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        other => return Err(format!("unknown size suffix {:?}", other)),
    };

    1usize
        .checked_shl(shift)
        .and_then(|multiplier| base.checked_mul(multiplier))
        .ok_or_else(|| format!("byte count {:?} overflows", value))
}
