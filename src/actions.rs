//! Structured actions the model may request during a turn.
//!
//! Exactly two are recognized: upserting one daily-activity row and logging
//! one roleplay turn. Each declares a JSON Schema for its parameters,
//! enabling OpenAI-format function-calling; anything else the model asks for
//! is ignored.

use serde::{Deserialize, Serialize};

/// OpenAI-format function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// OpenAI-format tool definition (wraps FunctionDef).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

pub const APPEND_DAILY_LOG: &str = "append_daily_log";
pub const LOG_SESSION_TURN: &str = "log_session_turn";

/// The two tool definitions offered to the model on the first invocation of
/// each turn. The follow-up invocation after an action offers none, which is
/// what limits a turn to a single action round.
pub fn coach_tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: APPEND_DAILY_LOG.to_string(),
                description: "Record the day's activity numbers once the four daily-log \
                              answers have been collected. Upserts one row per user per day."
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "user": { "type": "string" },
                        "ups": { "type": "string" },
                        "calls": { "type": "string" },
                        "followups": { "type": "string" },
                        "appointments": { "type": "string" }
                    },
                    "required": ["user", "ups", "calls", "followups", "appointments"]
                }),
            },
        },
        ToolDef {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: LOG_SESSION_TURN.to_string(),
                description: "Write one turn of the active roleplay to the per-session log."
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "session_id": { "type": "string" },
                        "user_name": { "type": "string" },
                        "scenario": { "type": "string" },
                        "step": { "type": "integer" },
                        "target_payment": { "type": "integer" },
                        "offer_payment": { "type": "integer" },
                        "band": { "type": "string" },
                        "message": { "type": "string" }
                    },
                    "required": ["session_id", "user_name", "scenario", "step", "band", "message"]
                }),
            },
        },
    ]
}

/// Arguments of an `append_daily_log` request. Every field defaults so a
/// malformed request degrades to empty values instead of failing the turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailyLogArgs {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ups: String,
    #[serde(default)]
    pub calls: String,
    #[serde(default)]
    pub followups: String,
    #[serde(default)]
    pub appointments: String,
}

/// Arguments of a `log_session_turn` request. Missing fields fall back to
/// the live session state at execution time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionTurnArgs {
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub target_payment: Option<i64>,
    #[serde(default)]
    pub offer_payment: Option<i64>,
    #[serde(default)]
    pub band: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A recognized action parsed out of a model tool call.
#[derive(Debug, Clone)]
pub enum CoachAction {
    AppendDailyLog(DailyLogArgs),
    LogSessionTurn(SessionTurnArgs),
}

impl CoachAction {
    /// Parse a tool call by name. Malformed argument JSON degrades to the
    /// type's defaults; an unrecognized name is `None`.
    pub fn parse(name: &str, raw_arguments: &str) -> Option<Self> {
        match name {
            APPEND_DAILY_LOG => {
                let args = serde_json::from_str(raw_arguments).unwrap_or_else(|e| {
                    tracing::warn!("Malformed append_daily_log arguments: {}", e);
                    DailyLogArgs::default()
                });
                Some(CoachAction::AppendDailyLog(args))
            }
            LOG_SESSION_TURN => {
                let args = serde_json::from_str(raw_arguments).unwrap_or_else(|e| {
                    tracing::warn!("Malformed log_session_turn arguments: {}", e);
                    SessionTurnArgs::default()
                });
                Some(CoachAction::LogSessionTurn(args))
            }
            other => {
                tracing::warn!("Model requested unknown action '{}', ignoring", other);
                None
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoachAction::AppendDailyLog(_) => APPEND_DAILY_LOG,
            CoachAction::LogSessionTurn(_) => LOG_SESSION_TURN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_openai_shaped() {
        let defs = coach_tool_definitions();
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().all(|d| d.tool_type == "function"));
        let json = serde_json::to_value(&defs).unwrap();
        assert_eq!(json[0]["function"]["name"], APPEND_DAILY_LOG);
        assert_eq!(json[1]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn parses_daily_log_args() {
        let action = CoachAction::parse(
            APPEND_DAILY_LOG,
            r#"{"user":"sam","ups":"4","calls":"10","followups":"3","appointments":"1"}"#,
        )
        .unwrap();
        match action {
            CoachAction::AppendDailyLog(args) => {
                assert_eq!(args.user.as_deref(), Some("sam"));
                assert_eq!(args.ups, "4");
                assert_eq!(args.appointments, "1");
            }
            _ => panic!("wrong action"),
        }
    }

    #[test]
    fn malformed_arguments_degrade_to_defaults() {
        let action = CoachAction::parse(APPEND_DAILY_LOG, "{not json").unwrap();
        match action {
            CoachAction::AppendDailyLog(args) => {
                assert!(args.user.is_none());
                assert_eq!(args.ups, "");
            }
            _ => panic!("wrong action"),
        }
    }

    #[test]
    fn unknown_action_is_none() {
        assert!(CoachAction::parse("drop_tables", "{}").is_none());
    }

    #[test]
    fn session_turn_missing_fields_are_none() {
        let action = CoachAction::parse(LOG_SESSION_TURN, r#"{"step": 3}"#).unwrap();
        match action {
            CoachAction::LogSessionTurn(args) => {
                assert_eq!(args.step, Some(3));
                assert!(args.band.is_none());
                assert!(args.message.is_none());
            }
            _ => panic!("wrong action"),
        }
    }
}
