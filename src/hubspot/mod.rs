//! Outbound HubSpot client — OAuth token endpoints and settings API.

pub mod client;

pub use client::{portal_id_from_account_info, HubSpotClient, TokenSet};
