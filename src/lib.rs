//! Per-identifier, per-category admission control backed either by a shared
//! store (sliding window) or by an in-process counter (fixed window).

pub mod api;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::{LimiterConfig, StoreConfig};
pub use error::{LimiterError, RejectionKind, TooManyRequests};
pub use ratelimit::{BackendKind, Category, Decision, service::AdmissionService};
