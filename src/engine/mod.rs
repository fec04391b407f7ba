//! Session-state and roleplay-negotiation engine.
//!
//! Leaf-first: number extraction and band classification feed the session
//! state machine; command normalization and scenario inference decide what a
//! turn means before the state machine mutates anything.

pub mod command;
pub mod numbers;
pub mod scenario;
pub mod session;

pub use command::{known_command_missing_bang, normalize_command, ControlToken};
pub use numbers::{band_str, compute_band, extract_int, Band};
pub use scenario::{infer_scenario, Scenario};
pub use session::{Session, SessionState, SessionStore, MAX_STEP};
