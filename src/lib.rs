//! Dealership sales-training chat backend.
//!
//! The core is the session-state and roleplay-negotiation engine in
//! [`engine`]; [`coach`] orchestrates turns against an external
//! OpenAI-compatible model and the activity log writers in [`sheetlog`].

pub mod actions;
pub mod coach;
pub mod config;
pub mod engine;
pub mod llm_client;
pub mod server;
pub mod sheetlog;
