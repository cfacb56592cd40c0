//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → InterceptorConfig (validated, immutable)
//!     → handed to ProxyController, shared via Arc with connection tasks
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the proxy starts; a restart picks up changes
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, InterceptorConfig, LimitsConfig, ListenerConfig, ObservabilityConfig,
    TimeoutConfig, TunnelConfig,
};
pub use validation::{validate_config, ValidationError};
