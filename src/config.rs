//! Compiler and VM configuration
//!
//! Both halves have sensible defaults and can be loaded from TOML:
//!
//! ```toml
//! [compiler]
//! trace_listing = true
//! max_encode_passes = 64
//!
//! [vm]
//! max_stack = 256
//! max_steps = 100000
//! ```
//!
//! Missing tables or keys fall back to their defaults.

use std::path::Path;

use serde::Deserialize;

pub use crate::bytecode::vm::VmConfig;

/// Configuration for routine compilation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Log the full disassembly of every compiled routine at debug level
    pub trace_listing: bool,
    /// Upper bound on branch relaxation passes before giving up
    pub max_encode_passes: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            trace_listing: false,
            max_encode_passes: 256,
        }
    }
}

/// Combined configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub compiler: CompilerConfig,
    pub vm: VmConfig,
}

impl DispatchConfig {
    /// Parse configuration from TOML content.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no routine could be built or run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compiler.max_encode_passes == 0 {
            return Err(ConfigError::Invalid("compiler.max_encode_passes must be at least 1".to_string()));
        }
        if self.vm.max_steps == 0 {
            return Err(ConfigError::Invalid("vm.max_steps must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse_toml(&content)
    }
}

/// Error loading a configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read
    Io { path: String, message: String },
    /// The file is not valid configuration TOML
    Parse(String),
    /// A value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "Failed to read {}: {}", path, message),
            Self::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::Invalid(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
