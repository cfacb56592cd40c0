//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (controller.rs):
//!     ProxyController::init(config) → start(port)
//!         → bind listener (PortUnavailable on a taken fixed port)
//!         → start admin API (optional)
//!         → spawn accept loop
//!
//! Shutdown (controller.rs + shutdown.rs):
//!     stop() → Shutdown::trigger
//!         → accept loop exits, listener dropped (port released)
//!         → hook dispatch refuses to start new handlers
//!         → in-flight sessions drain until the grace deadline
//!         → survivors aborted
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → runner calls stop()
//! ```
//!
//! # Design Decisions
//! - Ordered startup: listener first, admin next, accept loop last
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: forced close after deadline

pub mod controller;
pub mod shutdown;
pub mod signals;

pub use controller::ProxyController;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::shutdown_signal;
