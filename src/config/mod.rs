//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → moved into ServerContext, shared via Arc with every component
//! ```
//!
//! # Design Decisions
//! - Config is immutable for the lifetime of one listener run
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AcmeConfig, ContentConfig, ListenerConfig, LoggingConfig, SecurityConfig, ServerConfig,
    TimeoutConfig, TlsConfig, WebSocketConfig,
};
