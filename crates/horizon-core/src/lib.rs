//! # horizon-core - Core Domain Types
//!
//! Foundation crate for the Horizon streaming services. Provides the error
//! taxonomy, connection lifecycle types, endpoint construction and logging
//! setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing, url).
//!
//! ## Public API
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum covering transport, wire-format and configuration failures
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Connection Types (`types`)
//! - [`ConnectionState`] - Lifecycle state owned by a connection controller
//! - [`ConnectionReport`] - Debugging snapshot of a connection manager
//!
//! ### Endpoints (`endpoint`)
//! - [`websocket_origin()`] - Rewrite an HTTP(S) origin to WS(S)
//! - [`websocket_url()`] - Origin + path + percent-encoded query
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use horizon_core::prelude::*;
//! ```

pub mod endpoint;
pub mod error;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all Horizon crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use endpoint::{http_url, websocket_origin, websocket_url};
pub use error::{Error, Result, ResultExt};
pub use types::{ConnectionReport, ConnectionState};
