//! Purpose: Runtime configuration for module invocations.
//! Exports: `RuntimeConfig` and the `OBJRUN_*` environment variable names.
//! Role: One source of defaults for the host; JSON file and env overrides layer on top.
//! Invariants: Unknown JSON fields are rejected; every loaded config is validated.
//! Invariants: Env overrides only touch fields they name.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::diag;
use crate::core::error::{Error, ErrorKind};

pub const ENV_DEBUG: &str = "OBJRUN_DEBUG";
pub const ENV_OUTPUT_CAPACITY: &str = "OBJRUN_OUTPUT_CAPACITY";
pub const ENV_STACK_SIZE: &str = "OBJRUN_STACK_SIZE";
pub const ENV_THREAD_NAME: &str = "OBJRUN_THREAD_NAME";

pub const DEFAULT_OUTPUT_CAPACITY: usize = 4096;
pub const DEFAULT_THREAD_NAME: &str = "objrun-module";
pub const MIN_STACK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Initial output buffer size handed to each invocation.
    pub output_capacity: usize,
    /// Turns on gated diagnostics for the whole process.
    pub debug: bool,
    pub stack_size: Option<usize>,
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            debug: false,
            stack_size: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message("invalid runtime config json")
                .with_source(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to read config {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `OBJRUN_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, Error> {
        self.with_overrides(std::env::vars())
    }

    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                ENV_DEBUG => self.debug = parse_flag(ENV_DEBUG, value)?,
                ENV_OUTPUT_CAPACITY => self.output_capacity = parse_size(ENV_OUTPUT_CAPACITY, value)?,
                ENV_STACK_SIZE => self.stack_size = Some(parse_size(ENV_STACK_SIZE, value)?),
                ENV_THREAD_NAME => self.thread_name = value.to_string(),
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.thread_name.is_empty() {
            return Err(Error::new(ErrorKind::Config).with_message("thread_name must not be empty"));
        }
        if self.thread_name.contains('\0') {
            return Err(Error::new(ErrorKind::Config).with_message("thread_name must not contain NUL"));
        }
        if let Some(stack_size) = self.stack_size {
            if stack_size < MIN_STACK_SIZE {
                return Err(Error::new(ErrorKind::Config)
                    .with_message(format!("stack_size must be at least {MIN_STACK_SIZE} bytes"))
                    .with_hint("Leave stack_size unset to use the platform default."));
            }
        }
        Ok(())
    }

    /// Pushes the debug setting into the process-wide diagnostic gate.
    pub fn apply_debug(&self) {
        diag::set_enabled(self.debug);
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::new(ErrorKind::Config)
            .with_message(format!("{name} is not a boolean: {value}"))
            .with_hint("Use 1/0, true/false, yes/no or on/off.")),
    }
}

fn parse_size(name: &str, value: &str) -> Result<usize, Error> {
    value.trim().parse::<usize>().map_err(|err| {
        Error::new(ErrorKind::Config)
            .with_message(format!("{name} is not a byte count: {value}"))
            .with_source(err)
    })
}
