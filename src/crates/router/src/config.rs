//! Provider configuration: where a provider's launch descriptor comes from.
//!
//! The primary source is a YAML file (path from `ROUTER_PROVIDERS_PATH`,
//! default `providers.yaml`); individual fields can be overridden per
//! provider via `ROUTER_PROVIDER_<NAME>_COMMAND` /
//! `ROUTER_PROVIDER_<NAME>_ARGS` (space-separated), following this
//! workspace's usual env-override convention.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tooling::config::{get_env, ConfigBuilder};

use crate::error::{Result, RouterAppError};

/// How to launch one provider's subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLaunchDescriptor {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The full set of known providers, keyed by provider name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderLaunchDescriptor>,
}

impl ConfigBuilder for ProvidersConfig {
    /// Every provider must have a non-empty command.
    fn validate(&self) -> tooling::Result<()> {
        for (name, descriptor) in &self.providers {
            if descriptor.command.trim().is_empty() {
                return Err(tooling::ToolingError::General(format!(
                    "provider '{name}' has an empty command"
                )));
            }
        }
        Ok(())
    }

    /// Reads `{prefix}PROVIDER_<NAME>_COMMAND` / `_ARGS` for every provider
    /// already present in `self` at merge time. Since provider names
    /// aren't enumerable from the environment alone, `from_env` on its own
    /// returns an empty set; callers load the YAML file first and then
    /// apply overrides via `apply_env_overrides`.
    fn from_env(_prefix: &str) -> tooling::Result<Self> {
        Ok(Self::default())
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        for (name, descriptor) in other.providers {
            self.providers.insert(name, descriptor);
        }
        self
    }
}

impl ProvidersConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| {
            RouterAppError::Configuration(format!(
                "could not read provider config '{}': {source}",
                path.display()
            ))
        })?;
        let mut config: ProvidersConfig = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        config
            .validate()
            .map_err(|e| RouterAppError::Configuration(e.to_string()))?;
        Ok(config)
    }

    /// Resolve the configured providers file, defaulting to `providers.yaml`
    /// in the current directory, then applying env overrides.
    pub fn load() -> Result<Self> {
        let path = resolve_providers_path();
        Self::load_from_path(path)
    }

    fn apply_env_overrides(&mut self) {
        for (name, descriptor) in self.providers.iter_mut() {
            let command_key = format!("ROUTER_PROVIDER_{}_COMMAND", name.to_uppercase());
            if let Ok(Some(command)) = get_env(&command_key) {
                descriptor.command = command;
            }
            let args_key = format!("ROUTER_PROVIDER_{}_ARGS", name.to_uppercase());
            if let Ok(Some(args)) = get_env(&args_key) {
                descriptor.args = args.split_whitespace().map(str::to_string).collect();
            }
        }
    }

    pub fn descriptor(&self, provider: &str) -> Option<&ProviderLaunchDescriptor> {
        self.providers.get(provider)
    }
}

fn resolve_providers_path() -> PathBuf {
    get_env("ROUTER_PROVIDERS_PATH")
        .ok()
        .flatten()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("providers.yaml"))
}

/// Process-level settings that aren't specific to graph structure or any
/// one provider: where the graph document lives, where session state is
/// persisted, which session to fall back to, and the log filter.
#[derive(Debug, Clone)]
pub struct RouterProcessConfig {
    pub graph_path: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub default_session: Option<String>,
    pub log_filter: String,
}

impl Default for RouterProcessConfig {
    fn default() -> Self {
        Self {
            graph_path: PathBuf::from("graph.yaml"),
            state_dir: None,
            default_session: None,
            log_filter: "info".to_string(),
        }
    }
}

impl ConfigBuilder for RouterProcessConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.graph_path.as_os_str().is_empty() {
            return Err(tooling::ToolingError::General("graph path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Reads `ROUTER_GRAPH_PATH`, `ROUTER_STATE_DIR`, `ROUTER_DEFAULT_SESSION`,
    /// and `RUST_LOG`, falling back to this type's defaults for anything unset.
    fn from_env(_prefix: &str) -> tooling::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            graph_path: get_env("ROUTER_GRAPH_PATH")?
                .map(PathBuf::from)
                .unwrap_or(defaults.graph_path),
            state_dir: get_env("ROUTER_STATE_DIR")?.map(PathBuf::from),
            default_session: get_env("ROUTER_DEFAULT_SESSION")?,
            log_filter: get_env("RUST_LOG")?.unwrap_or(defaults.log_filter),
        })
    }

    /// Only fills in gaps left by `self`; used to layer this process's
    /// hardcoded defaults underneath an environment-derived config, not the
    /// other way around.
    fn merge(&mut self, other: Self) -> &mut Self {
        if self.state_dir.is_none() {
            self.state_dir = other.state_dir;
        }
        if self.default_session.is_none() {
            self.default_session = other.default_session;
        }
        self
    }
}

impl RouterProcessConfig {
    /// Load from environment variables, falling back to defaults, then
    /// validate.
    pub fn load() -> Result<Self> {
        let config = Self::from_env_with_defaults("ROUTER_")
            .map_err(|e| RouterAppError::Configuration(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_descriptor_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "providers:\n  git:\n    command: git-mcp\n    args: [\"--stdio\"]\n"
        )
        .unwrap();

        let config = ProvidersConfig::load_from_path(file.path()).unwrap();
        let git = config.descriptor("git").unwrap();
        assert_eq!(git.command, "git-mcp");
        assert_eq!(git.args, vec!["--stdio".to_string()]);
    }

    #[test]
    fn rejects_provider_with_empty_command() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "providers:\n  broken:\n    command: \"\"\n").unwrap();

        let err = ProvidersConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, RouterAppError::Configuration(_)));
    }

    #[test]
    fn env_override_replaces_command_and_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "providers:\n  git:\n    command: git-mcp\n").unwrap();

        std::env::set_var("ROUTER_PROVIDER_GIT_COMMAND", "custom-git-mcp");
        std::env::set_var("ROUTER_PROVIDER_GIT_ARGS", "--foo --bar");

        let config = ProvidersConfig::load_from_path(file.path()).unwrap();
        let git = config.descriptor("git").unwrap();
        assert_eq!(git.command, "custom-git-mcp");
        assert_eq!(git.args, vec!["--foo".to_string(), "--bar".to_string()]);

        std::env::remove_var("ROUTER_PROVIDER_GIT_COMMAND");
        std::env::remove_var("ROUTER_PROVIDER_GIT_ARGS");
    }

    #[test]
    fn unknown_path_surfaces_configuration_error() {
        let err = ProvidersConfig::load_from_path("/nonexistent/providers.yaml").unwrap_err();
        assert!(matches!(err, RouterAppError::Configuration(_)));
    }

    #[test]
    fn process_config_defaults_when_env_unset() {
        let config = RouterProcessConfig::default();
        assert_eq!(config.graph_path, PathBuf::from("graph.yaml"));
        assert_eq!(config.log_filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn process_config_reads_env_overrides() {
        std::env::set_var("ROUTER_GRAPH_PATH", "/tmp/custom-graph.yaml");
        std::env::set_var("ROUTER_DEFAULT_SESSION", "agent-1");

        let config = RouterProcessConfig::from_env("ROUTER_").unwrap();
        assert_eq!(config.graph_path, PathBuf::from("/tmp/custom-graph.yaml"));
        assert_eq!(config.default_session.as_deref(), Some("agent-1"));

        std::env::remove_var("ROUTER_GRAPH_PATH");
        std::env::remove_var("ROUTER_DEFAULT_SESSION");
    }
}
