//! Command-line interface definition for Toolmux
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to inspect configured MCP servers, list their
//! aggregated tools, and invoke a single tool.

use clap::{Parser, Subcommand};

/// Toolmux - MCP stdio client and tool multiplexer
///
/// Launches the MCP servers named in the configuration file and exposes
/// their tools under unique, API-safe names.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolmux")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Toolmux
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List configured MCP servers
    Servers,

    /// Start every configured server and list the aggregated tools
    Tools {
        /// Print tool definitions as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Invoke one tool by its external name
    Call {
        /// External tool name (for example `files__read_file`)
        name: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Id placed in the printed `tool_result` block
        #[arg(long, default_value = "toolu_cli")]
        tool_use_id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_servers() {
        let cli = Cli::try_parse_from(["toolmux", "servers"]).unwrap();
        assert!(matches!(cli.command, Commands::Servers));
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_tools_json() {
        let cli = Cli::try_parse_from(["toolmux", "-v", "tools", "--json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Tools { json: true }));
    }

    #[test]
    fn test_cli_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "toolmux",
            "--config",
            "mux.yaml",
            "call",
            "files__read_file",
            "--args",
            r#"{"path":"/tmp/a"}"#,
        ])
        .unwrap();
        assert_eq!(cli.config, Some("mux.yaml".to_string()));
        if let Commands::Call {
            name,
            args,
            tool_use_id,
        } = cli.command
        {
            assert_eq!(name, "files__read_file");
            assert_eq!(args, r#"{"path":"/tmp/a"}"#);
            assert_eq!(tool_use_id, "toolu_cli");
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_call_defaults_to_empty_args() {
        let cli = Cli::try_parse_from(["toolmux", "call", "x__y"]).unwrap();
        if let Commands::Call { args, .. } = cli.command {
            assert_eq!(args, "{}");
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_call_requires_name() {
        assert!(Cli::try_parse_from(["toolmux", "call"]).is_err());
    }
}
