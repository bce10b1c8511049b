//! Tollgate - machine-to-machine credential broker library
//!
//! This library provisions OAuth2 client-credentials clients with an
//! identity provider, stores their secrets, exchanges them for access
//! tokens, and calls protected MCP resources with those tokens.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `locator`: Resource addresses and invocation URL encoding
//! - `secrets`: Secret store backends (memory, SQLite, OS keyring)
//! - `credentials`: Per-service credential records on top of a store
//! - `provider`: Identity-provider admin API abstraction
//! - `registrar`: Idempotent provisioning of pools, resource servers and clients
//! - `broker`: Token acquisition with caching and single-flight refresh
//! - `session`: Authenticated MCP sessions against resources
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate::{Config, Locator, ResourceAddress, SessionClient, TokenBroker};
//! use tollgate::credentials::CredentialRepository;
//! use tollgate::secrets::open_store;
//!
//! #[tokio::main]
//! async fn main() -> tollgate::Result<()> {
//!     let config = Config::load("config/tollgate.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let store = open_store(&config.store)?;
//!     let repository = CredentialRepository::new(store, config.namespace.clone());
//!     let broker = Arc::new(TokenBroker::new(repository, &config.broker)?);
//!
//!     let client = SessionClient::new(broker, Locator::new(&config.locator)?, config.session.clone());
//!     let address = ResourceAddress::new("calc", "us-east-1");
//!     let session = client.open(&address, "calc").await?;
//!     let result = session.invoke("add", serde_json::json!({"a": 5, "b": 3})).await?;
//!     println!("{}", result.value());
//!     session.close().await
//! }
//! ```

pub mod broker;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod locator;
pub mod logging;
pub mod provider;
pub mod registrar;
pub mod retry;
pub mod secrets;
pub mod session;
pub mod telemetry;

// Re-export commonly used types
pub use broker::{AccessToken, TokenBroker};
pub use config::Config;
pub use error::{Result, TollgateError};
pub use locator::{Locator, ResourceAddress};
pub use registrar::Registrar;
pub use session::{Session, SessionClient};
