//! Wire models
//!
//! Request and response schemas for every endpoint the deployment engine
//! talks to. Responses are decoded into these types explicitly; nothing
//! downstream inspects raw JSON.

pub mod models;

pub use models::bundle::*;
pub use models::compile::*;
pub use models::flags::*;
pub use models::host::*;
pub use models::{ErrorResponse, SourceFile};
