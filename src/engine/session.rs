//! Per-session negotiation state and the store that owns it.
//!
//! One `Session` per session id, each behind its own lock: a turn for a
//! session is serialized against other turns for the same session, and
//! nothing is shared across sessions except the external activity log.

use chrono::{DateTime, Duration, Utc};
use regex_lite::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, RwLock};

use crate::engine::command::ControlToken;
use crate::engine::numbers::{compute_band, extract_int, Band};
use crate::engine::scenario::{infer_scenario, Scenario};
use crate::llm_client::ChatMessage;

/// Hard ceiling on roleplay progress. Exceeding it freezes the step; it
/// never auto-ends the roleplay.
pub const MAX_STEP: u32 = 10;

/// "at 480", "= 480", "at $480"
fn offer_signal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(at|=)\s*\$?\d+").unwrap())
}

const TARGET_KEYWORDS: &[&str] = &[
    "under", "closer to", "around", "about", "target", "budget", "cap",
];

/// Negotiation state for one conversation session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub scenario: Option<Scenario>,
    pub step: u32,
    pub target: Option<i64>,
    pub offer: Option<i64>,
    pub band: Option<Band>,
    pub last_updated: DateTime<Utc>,
}

impl SessionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            scenario: None,
            step: 0,
            target: None,
            offer: None,
            band: None,
            last_updated: now,
        }
    }

    /// Silent reset to Idle. Used by the TTL check and the "end" control.
    fn reset(&mut self) {
        self.scenario = None;
        self.step = 0;
        self.target = None;
        self.offer = None;
        self.band = None;
    }

    /// Clear everything if the session sat idle past the TTL. Runs first,
    /// before the incoming turn is processed.
    pub fn expire_if_idle(&mut self, now: DateTime<Utc>, ttl: Duration) {
        if now - self.last_updated > ttl {
            tracing::debug!("Session idle past TTL, resetting roleplay state");
            self.reset();
        }
    }

    /// Apply one turn of input. `normalized` is the output of
    /// `normalize_command`; `raw` is the original text (numbers are extracted
    /// from it so digits lost to normalization can't matter).
    ///
    /// Band is recomputed and `last_updated` stamped unconditionally at the
    /// end, so the band can never outlive the (target, offer) pair that
    /// produced it.
    pub fn apply_input(&mut self, normalized: &str, raw: &str, now: DateTime<Utc>) {
        if let Some(scenario) = infer_scenario(normalized) {
            // Re-triggering an already-active scenario restarts it.
            self.scenario = Some(scenario);
            self.step = 0;
        }

        match ControlToken::parse(normalized) {
            Some(ControlToken::Restart) => self.step = 0,
            Some(ControlToken::End) => self.reset(),
            Some(ControlToken::Continue) => {}
            None => {
                self.capture_numbers(normalized, raw);
            }
        }

        self.band = compute_band(self.target, self.offer);
        self.last_updated = now;
    }

    /// Offer/target capture from free text. Both pattern families may fire
    /// on the same input; a keyword match without an extractable number
    /// leaves the field as it was.
    fn capture_numbers(&mut self, normalized: &str, raw: &str) {
        let offer_signaled = normalized.contains("we're at")
            || normalized.contains("we\u{2019}re at")
            || normalized.starts_with('$')
            || offer_signal_re().is_match(normalized);
        if offer_signaled {
            if let Some(offer) = extract_int(raw) {
                self.offer = Some(offer);
            }
        }

        if TARGET_KEYWORDS.iter().any(|k| normalized.contains(k)) {
            if let Some(target) = extract_int(raw) {
                self.target = Some(target);
            }
        }
    }

    /// Post-turn step increment, called once the reply has been produced.
    pub fn finish_turn(&mut self) {
        if self.scenario.is_some() {
            self.step = (self.step + 1).min(MAX_STEP);
        }
    }

    pub fn scenario_str(&self) -> &'static str {
        self.scenario.map(Scenario::as_str).unwrap_or("")
    }
}

/// One conversation: negotiation state plus the transcript and identity the
/// orchestrator needs. Owned exclusively by its session id.
pub struct Session {
    pub id: String,
    pub user_name: String,
    pub state: SessionState,
    pub messages: Vec<ChatMessage>,
    /// Highest caller-supplied event sequence number processed so far.
    pub last_seq: Option<u64>,
}

impl Session {
    pub fn new(id: String, welcome: Option<&str>, now: DateTime<Utc>) -> Self {
        let mut messages = Vec::new();
        if let Some(text) = welcome {
            messages.push(ChatMessage::assistant(text));
        }
        Self {
            id,
            user_name: "User".to_string(),
            state: SessionState::new(now),
            messages,
            last_seq: None,
        }
    }

    /// Append to the transcript, dropping the oldest entries past the
    /// retention cap.
    pub fn push_message(&mut self, message: ChatMessage, retention: usize) {
        self.messages.push(message);
        if self.messages.len() > retention {
            let excess = self.messages.len() - retention;
            self.messages.drain(..excess);
        }
    }

    /// Duplicate-event guard: an event whose sequence number is not greater
    /// than the last processed one is a replay and must be dropped.
    pub fn accept_seq(&mut self, seq: Option<u64>) -> bool {
        match seq {
            None => true,
            Some(seq) => {
                if self.last_seq.map(|last| seq <= last).unwrap_or(false) {
                    false
                } else {
                    self.last_seq = Some(seq);
                    true
                }
            }
        }
    }
}

/// All live sessions, keyed by session id. Each session sits behind its own
/// `Mutex` so turns for one session serialize while distinct sessions run
/// concurrently.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    welcome: Option<String>,
}

impl SessionStore {
    pub fn new(welcome: Option<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            welcome,
        }
    }

    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!("New session: {}", session_id);
                Arc::new(Mutex::new(Session::new(
                    session_id.to_string(),
                    self.welcome.as_deref(),
                    Utc::now(),
                )))
            })
            .clone()
    }
}
