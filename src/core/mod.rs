//! Core business logic: rates, conversion, refresh and chat sessions

pub mod config;
pub mod conversion;
pub mod error;
pub mod log;
pub mod rate;
pub mod refresh;
pub mod session;
pub mod store;

// Re-export main types for cleaner imports
pub use conversion::{Conversion, RateService};
pub use error::RateError;
pub use rate::{RateEntry, RateSnapshot, RateSource};
pub use store::RateStore;
