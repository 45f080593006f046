//! Token lifecycle — expiry checks and refresh-on-demand.

pub mod lifecycle;

pub use lifecycle::{TokenLifecycle, ValidToken};
