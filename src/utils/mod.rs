//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod ewma;

pub use error::ShardRouteError;
pub use ewma::Ewma;
pub use print::{log_identity, logger_init, set_log_identity, ME};
