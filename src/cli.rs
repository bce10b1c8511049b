//! Command-line interface definition for Tollgate
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for provisioning services, fetching tokens and
//! calling resource capabilities.

use clap::{Parser, Subcommand};

/// Tollgate - machine-to-machine credential broker
///
/// Provisions OAuth2 client-credentials clients with an identity provider,
/// stores their secrets, and calls protected resources with bearer tokens.
#[derive(Parser, Debug, Clone)]
#[command(name = "tollgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tollgate.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Region of the resource endpoint (overrides config)
    #[arg(long, env = "TOLLGATE_REGION")]
    pub region: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Tollgate
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create or reuse the provider objects for a service and store its credentials
    Provision {
        /// Service name; becomes part of the credential keys
        #[arg(short, long)]
        service: String,
    },

    /// Delete a service's client and stored credentials
    Deprovision {
        /// Service name
        #[arg(short, long)]
        service: String,
    },

    /// Obtain an access token for a service
    Token {
        /// Service name
        #[arg(short, long)]
        service: String,

        /// Print the token value instead of only its expiry
        #[arg(long)]
        show: bool,
    },

    /// List the capabilities a resource offers
    Tools {
        /// Service name whose credentials are used
        #[arg(short, long)]
        service: String,

        /// Resource identifier (for example an ARN)
        #[arg(short, long)]
        resource: String,

        /// Resource qualifier
        #[arg(short, long)]
        qualifier: Option<String>,
    },

    /// Invoke one capability of a resource
    Invoke {
        /// Service name whose credentials are used
        #[arg(short, long)]
        service: String,

        /// Resource identifier (for example an ARN)
        #[arg(short, long)]
        resource: String,

        /// Capability name
        #[arg(short, long)]
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Resource qualifier
        #[arg(short, long)]
        qualifier: Option<String>,
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

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/tollgate.yaml".to_string()),
            verbose: false,
            json_logs: false,
            region: None,
            command: Commands::Token {
                service: "default".to_string(),
                show: false,
            },
        }
    }
}
