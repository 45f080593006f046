//! Token store — PostgreSQL backend for HubSpot tokens and extension mappings.

pub mod db;

pub use db::{HubData, TokenRecord, TokenStore, TokenUpsert};
