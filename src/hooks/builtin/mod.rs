//! Ready-made handlers for common interception tasks.

mod basic_auth;
mod script_injection;

pub use basic_auth::BasicAuth;
pub use script_injection::ScriptInjection;
