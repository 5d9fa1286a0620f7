pub mod config;
pub mod doctor;
pub mod exec;
pub mod kernels;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sage_domain::config::Config;

/// sage-kernel: run code on SAGE3's Jupyter kernels and manage the
/// kernel registry.
#[derive(Debug, Parser)]
#[command(name = "sage-kernel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Host the proxy: sweep expired requests and reconcile the registry
    /// until interrupted (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage kernels and their registry records.
    #[command(subcommand)]
    Kernels(KernelsCommand),
    /// Execute code on a kernel and print every result.
    Exec {
        /// Target kernel id.
        #[arg(long)]
        kernel: String,
        /// Request id (a UUID). Generated when omitted.
        #[arg(long)]
        uuid: Option<String>,
        /// Print raw result payloads as JSON lines.
        #[arg(long)]
        json: bool,
        /// The code to run.
        code: String,
    },
    /// Interrupt the cell running on a kernel.
    Interrupt {
        kernel: String,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum KernelsCommand {
    /// List live kernels, or the kernels a user may pick with `--user`.
    List {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Start a kernel and register it for a room.
    Add {
        /// Kernel spec name (e.g. `python3`).
        #[arg(long, default_value = "python3")]
        name: String,
        #[arg(long)]
        room: String,
        #[arg(long)]
        board: String,
        /// Owner user id.
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        alias: String,
        #[arg(long)]
        private: bool,
    },
    /// Shut a kernel down and drop its registry record.
    Delete {
        kernel: String,
        /// User requesting the deletion (logged).
        #[arg(long)]
        user: String,
    },
    /// Restart a kernel.
    Restart {
        kernel: String,
    },
    /// List installed kernel specs.
    Specs,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `SAGE_CONFIG` (or `config.toml`) and
/// overlay the process environment. Returns the config and the path used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("SAGE_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let mut config = load_config_from(&config_path)?;
    config
        .apply_env()
        .map_err(|e| anyhow::anyhow!("environment: {e}"))?;
    Ok((config, config_path))
}

/// Parse `path`, or return defaults when it does not exist.
pub fn load_config_from(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use sage_domain::config::Environment;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_parses_code_and_kernel() {
        let cli = Cli::try_parse_from(["sage-kernel", "exec", "--kernel", "k1", "1+2"]).unwrap();
        match cli.command {
            Some(Command::Exec { kernel, code, uuid, json }) => {
                assert_eq!(kernel, "k1");
                assert_eq!(code, "1+2");
                assert!(uuid.is_none());
                assert!(!json);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.redis.registry_key, "JUPYTER:KERNELS");
    }

    #[test]
    fn file_values_are_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "environment = \"production\"\n[jupyter]\nusername = \"wall\"\n[proxy]\npending_deadline_secs = 0"
        )
        .unwrap();

        let config = load_config_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.jupyter.username, "wall");
        assert!(config.proxy.pending_deadline().is_none());
        assert_eq!(config.jupyter_url(), "http://jupyter:8888");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[proxy\nbroken").unwrap();
        let err = load_config_from(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }
}
