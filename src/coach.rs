//! Conversation orchestrator: runs the state machine over the incoming
//! turn, builds the model input, executes at most one structured action,
//! and produces the reply.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::actions::{coach_tool_definitions, CoachAction, DailyLogArgs, SessionTurnArgs};
use crate::config::CoachConfig;
use crate::engine::command::{known_command_missing_bang, normalize_command};
use crate::engine::numbers::band_str;
use crate::engine::session::Session;
use crate::llm_client::{ChatMessage, ModelBackend};
use crate::sheetlog::{ActivityLog, DailyLogEntry, SessionLogRow};

/// Stand-in reply when the model returned no prose at all.
const WORKING_ON_IT: &str = "Working on it…";

pub struct Coach {
    model: Arc<dyn ModelBackend>,
    log: Arc<dyn ActivityLog>,
    config: CoachConfig,
}

impl Coach {
    pub fn new(model: Arc<dyn ModelBackend>, log: Arc<dyn ActivityLog>, config: CoachConfig) -> Self {
        Self { model, log, config }
    }

    /// Process one user turn. The caller holds the session's lock, so turns
    /// for one session are serialized; everything here is best-effort and
    /// always produces a reply string.
    pub async fn respond(&self, session: &mut Session, raw_text: &str) -> String {
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.session_ttl_secs as i64);
        session.state.expire_if_idle(now, ttl);

        let normalized = normalize_command(raw_text);
        session.state.apply_input(&normalized, raw_text, now);

        session.push_message(
            ChatMessage::user(raw_text),
            self.config.transcript_retention,
        );

        // Known command typed without its "!" gets the one-line correction
        // instead of a model round-trip.
        let reply = if let Some(canonical) = known_command_missing_bang(&normalized) {
            format!(
                "Looks like you meant {}. Try it with the exclamation point.",
                canonical
            )
        } else {
            self.model_round(session, raw_text).await
        };

        session.state.finish_turn();
        session.push_message(
            ChatMessage::assistant(&reply),
            self.config.transcript_retention,
        );

        // Best-effort per-turn session log; failures are recorded for the
        // operator, never surfaced in the reply.
        let row = SessionLogRow {
            session_id: session.id.clone(),
            user_name: session.user_name.clone(),
            scenario: session.state.scenario_str().to_string(),
            step: session.state.step,
            target_payment: session.state.target,
            offer_payment: session.state.offer,
            band: band_str(session.state.band).to_string(),
            message: reply.clone(),
        };
        if let Err(e) = self.log.session_log_append(&row) {
            tracing::warn!("Failed to log session turn: {}", e);
        }

        reply
    }

    /// Invoke the model, execute a requested action if any, and re-invoke
    /// once for the final prose. Exactly one action round per turn: the
    /// follow-up invocation offers no tools, and any tool call it returns
    /// anyway is dropped.
    async fn model_round(&self, session: &Session, raw_text: &str) -> String {
        let mut messages = self.build_model_input(session);
        let tools = coach_tool_definitions();

        let first = match self.model.chat(messages.clone(), &tools).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("LLM call failed: {}", e);
                return self.config.apology_message.clone();
            }
        };

        let Some(call) = first.tool_calls.into_iter().next() else {
            return first.content.unwrap_or_else(|| WORKING_ON_IT.to_string());
        };

        let Some(action) = CoachAction::parse(&call.function.name, &call.function.arguments)
        else {
            return first.content.unwrap_or_else(|| WORKING_ON_IT.to_string());
        };

        let result = self.execute_action(session, raw_text, &action);
        messages.push(ChatMessage::assistant_tool_call(call.clone()));
        messages.push(ChatMessage::tool_result(
            &call.id,
            action.name(),
            &result.to_string(),
        ));

        match self.model.chat(messages, &[]).await {
            Ok(reply) => reply.content.unwrap_or_else(|| WORKING_ON_IT.to_string()),
            Err(e) => {
                tracing::error!("LLM follow-up call failed: {}", e);
                self.config.apology_message.clone()
            }
        }
    }

    /// Execute one structured action against the log writers. Store errors
    /// become `{ok:false, error}` for the model, never a failed turn.
    fn execute_action(
        &self,
        session: &Session,
        raw_text: &str,
        action: &CoachAction,
    ) -> serde_json::Value {
        let outcome = match action {
            CoachAction::AppendDailyLog(args) => self.run_daily_log(session, args),
            CoachAction::LogSessionTurn(args) => self.run_session_turn(session, raw_text, args),
        };
        match outcome {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Action {} failed: {}", action.name(), e);
                serde_json::json!({ "ok": false, "error": e.to_string() })
            }
        }
    }

    fn run_daily_log(&self, session: &Session, args: &DailyLogArgs) -> Result<serde_json::Value> {
        let entry = DailyLogEntry {
            user: args
                .user
                .clone()
                .unwrap_or_else(|| session.user_name.clone()),
            ups: args.ups.clone(),
            calls: args.calls.clone(),
            followups: args.followups.clone(),
            appointments: args.appointments.clone(),
        };
        let outcome = self.log.daily_log_upsert(&entry)?;
        Ok(serde_json::json!({
            "ok": true,
            "mode": outcome.mode,
            "log_id": outcome.log_id,
        }))
    }

    /// Missing arguments fall back to the live session state.
    fn run_session_turn(
        &self,
        session: &Session,
        raw_text: &str,
        args: &SessionTurnArgs,
    ) -> Result<serde_json::Value> {
        let state = &session.state;
        let row = SessionLogRow {
            session_id: session.id.clone(),
            user_name: session.user_name.clone(),
            scenario: state.scenario_str().to_string(),
            step: args.step.unwrap_or(state.step),
            target_payment: args.target_payment.or(state.target),
            offer_payment: args.offer_payment.or(state.offer),
            band: args
                .band
                .clone()
                .unwrap_or_else(|| band_str(state.band).to_string()),
            message: args
                .message
                .clone()
                .unwrap_or_else(|| raw_text.to_string()),
        };
        let partition = self.log.session_log_append(&row)?;
        Ok(serde_json::json!({ "ok": true, "sheet": partition }))
    }

    /// Assemble the outbound prompt: persona and policy system texts, a
    /// compact JSON snapshot of session state, then the recent conversation
    /// window. System messages always survive truncation in full.
    fn build_model_input(&self, session: &Session) -> Vec<ChatMessage> {
        let state = &session.state;
        let snapshot = serde_json::json!({
            "user_name": session.user_name,
            "session_id": session.id,
            "scenario": state.scenario_str(),
            "step": state.step,
            "target_payment": state.target,
            "offer_payment": state.offer,
            "band": band_str(state.band),
            "last_updated": state.last_updated.to_rfc3339(),
        });

        let mut messages = vec![
            ChatMessage::system(&self.config.persona),
            ChatMessage::system(&format!(
                "User: {}. Session: {}.",
                session.user_name, session.id
            )),
            ChatMessage::system(&self.config.style_line),
            ChatMessage::system(&format!("SESSION_STATE_JSON={}", snapshot)),
        ];
        messages.extend(
            session
                .messages
                .iter()
                .filter(|m| m.role == "user" || m.role == "assistant")
                .cloned(),
        );
        truncate_context(messages, self.config.max_context_messages)
    }
}

/// Keep every system message and only the most recent `max_conversation`
/// conversational turns.
fn truncate_context(messages: Vec<ChatMessage>, max_conversation: usize) -> Vec<ChatMessage> {
    let (system, conversation): (Vec<_>, Vec<_>) =
        messages.into_iter().partition(|m| m.role == "system");

    let mut conversation = conversation;
    if conversation.len() > max_conversation {
        let skip = conversation.len() - max_conversation;
        tracing::debug!(
            "Truncating conversation window from {} to {} messages",
            conversation.len(),
            max_conversation
        );
        conversation.drain(..skip);
    }

    let mut result = system;
    result.extend(conversation);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{FunctionCallPayload, ModelReply, ToolCallPayload};
    use crate::sheetlog::{DailyLogOutcome, UpsertMode};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted model: pops one reply per invocation, records what it saw.
    struct FakeModel {
        replies: Mutex<VecDeque<Result<ModelReply>>>,
        seen: Mutex<Vec<(Vec<ChatMessage>, usize)>>,
    }

    impl FakeModel {
        fn new(replies: Vec<Result<ModelReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn prose(text: &str) -> Result<ModelReply> {
            Ok(ModelReply {
                content: Some(text.to_string()),
                tool_calls: vec![],
            })
        }

        fn action(name: &str, arguments: &str) -> Result<ModelReply> {
            Ok(ModelReply {
                content: None,
                tool_calls: vec![ToolCallPayload {
                    id: "call_1".to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCallPayload {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                }],
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelBackend for FakeModel {
        async fn chat(
            &self,
            messages: Vec<ChatMessage>,
            tools: &[crate::actions::ToolDef],
        ) -> Result<ModelReply> {
            self.seen.lock().unwrap().push((messages, tools.len()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("fake model ran out of replies")))
        }
    }

    /// Recording log store with switchable failure modes.
    #[derive(Default)]
    struct FakeLog {
        daily: Mutex<Vec<DailyLogEntry>>,
        turns: Mutex<Vec<SessionLogRow>>,
        fail_daily: bool,
        fail_session: bool,
    }

    impl ActivityLog for FakeLog {
        fn daily_log_upsert(&self, entry: &DailyLogEntry) -> Result<DailyLogOutcome> {
            if self.fail_daily {
                anyhow::bail!("store unreachable");
            }
            self.daily.lock().unwrap().push(entry.clone());
            Ok(DailyLogOutcome {
                mode: UpsertMode::Append,
                log_id: format!("{}|2026-08-23", entry.user.to_lowercase()),
            })
        }

        fn session_log_append(&self, row: &SessionLogRow) -> Result<String> {
            if self.fail_session {
                anyhow::bail!("store unreachable");
            }
            self.turns.lock().unwrap().push(row.clone());
            Ok(row.session_id.clone())
        }
    }

    fn coach(model: FakeModel, log: FakeLog) -> (Coach, Arc<FakeModel>, Arc<FakeLog>) {
        let model = Arc::new(model);
        let log = Arc::new(log);
        (
            Coach::new(model.clone(), log.clone(), CoachConfig::default()),
            model,
            log,
        )
    }

    fn session() -> Session {
        Session::new("sess-test".to_string(), None, Utc::now())
    }

    #[tokio::test]
    async fn prose_reply_flows_through() {
        let (coach, model, log) =
            coach(FakeModel::new(vec![FakeModel::prose("Good opener.")]), FakeLog::default());
        let mut s = session();

        let reply = coach.respond(&mut s, "how do I greet an up?").await;
        assert_eq!(reply, "Good opener.");
        assert_eq!(model.calls(), 1);

        // user + assistant in transcript, one best-effort turn logged
        assert_eq!(s.messages.len(), 2);
        assert_eq!(log.turns.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn model_failure_substitutes_apology() {
        let (coach, _, log) = coach(
            FakeModel::new(vec![Err(anyhow!("connection refused"))]),
            FakeLog::default(),
        );
        let mut s = session();

        let reply = coach.respond(&mut s, "hello").await;
        assert_eq!(reply, CoachConfig::default().apology_message);
        // Turn still completes and still gets logged.
        assert_eq!(log.turns.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn daily_log_action_executes_then_reinvokes() {
        let (coach, model, log) = coach(
            FakeModel::new(vec![
                FakeModel::action(
                    "append_daily_log",
                    r#"{"user":"Sam","ups":"4","calls":"10","followups":"3","appointments":"1"}"#,
                ),
                FakeModel::prose("Logged. Keep stacking clean reps."),
            ]),
            FakeLog::default(),
        );
        let mut s = session();

        let reply = coach.respond(&mut s, "!dailylog done 4 10 3 1").await;
        assert_eq!(reply, "Logged. Keep stacking clean reps.");
        assert_eq!(log.daily.lock().unwrap().len(), 1);
        assert_eq!(log.daily.lock().unwrap()[0].user, "Sam");

        // First call offered both tools, follow-up offered none.
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, 2);
        assert_eq!(seen[1].1, 0);
        // Follow-up saw the action round-trip.
        let follow_up = &seen[1].0;
        assert!(follow_up.iter().any(|m| m.role == "tool"));
        assert!(follow_up
            .iter()
            .any(|m| m.tool_calls.is_some() && m.role == "assistant"));
    }

    #[tokio::test]
    async fn only_one_action_round_per_turn() {
        // Follow-up reply tries to chain a second action; it must be dropped.
        let (coach, _, log) = coach(
            FakeModel::new(vec![
                FakeModel::action("log_session_turn", r#"{"step":1}"#),
                FakeModel::action("append_daily_log", r#"{"user":"Sam"}"#),
            ]),
            FakeLog::default(),
        );
        let mut s = session();

        let reply = coach.respond(&mut s, "continue").await;
        assert_eq!(reply, WORKING_ON_IT);
        assert_eq!(log.daily.lock().unwrap().len(), 0);
        // one action append + one best-effort turn append
        assert_eq!(log.turns.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn daily_log_user_defaults_to_session_user() {
        let (coach, _, log) = coach(
            FakeModel::new(vec![
                FakeModel::action("append_daily_log", "{not json"),
                FakeModel::prose("Logged."),
            ]),
            FakeLog::default(),
        );
        let mut s = session();
        s.user_name = "Alex".to_string();

        coach.respond(&mut s, "!dailylog").await;
        let daily = log.daily.lock().unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].user, "Alex");
        assert_eq!(daily[0].ups, "");
    }

    #[tokio::test]
    async fn store_failure_feeds_error_to_model_not_user() {
        let (coach, model, _) = coach(
            FakeModel::new(vec![
                FakeModel::action("append_daily_log", r#"{"user":"Sam"}"#),
                FakeModel::prose("Couldn't save that one, I'll retry later."),
            ]),
            FakeLog {
                fail_daily: true,
                fail_session: true,
                ..Default::default()
            },
        );
        let mut s = session();

        let reply = coach.respond(&mut s, "!dailylog").await;
        assert_eq!(reply, "Couldn't save that one, I'll retry later.");

        let seen = model.seen.lock().unwrap();
        let tool_msg = seen[1]
            .0
            .iter()
            .find(|m| m.role == "tool")
            .expect("tool result present");
        assert!(tool_msg.content.as_ref().unwrap().contains("\"ok\":false"));
    }

    #[tokio::test]
    async fn session_turn_action_falls_back_to_state() {
        let (coach, _, log) = coach(
            FakeModel::new(vec![
                FakeModel::action("log_session_turn", r#"{"step": 9}"#),
                FakeModel::prose("Noted."),
            ]),
            FakeLog::default(),
        );
        let mut s = session();
        s.state.apply_input("!roleplay price", "!roleplay price", Utc::now());
        s.state.apply_input("under 450", "under 450", Utc::now());

        coach.respond(&mut s, "we're at 480").await;
        let turns = log.turns.lock().unwrap();
        // Action row first, then the best-effort per-turn row.
        assert_eq!(turns[0].step, 9);
        assert_eq!(turns[0].target_payment, Some(450));
        assert_eq!(turns[0].offer_payment, Some(480));
        assert_eq!(turns[0].band, "B");
        assert_eq!(turns[0].message, "we're at 480");
    }

    #[tokio::test]
    async fn missing_bang_command_short_circuits() {
        let (coach, model, _) = coach(FakeModel::new(vec![]), FakeLog::default());
        let mut s = session();

        let reply = coach.respond(&mut s, "dailylog").await;
        assert_eq!(
            reply,
            "Looks like you meant !dailylog. Try it with the exclamation point."
        );
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn scenario_turn_increments_step_after_reply() {
        let (coach, _, _) = coach(
            FakeModel::new(vec![
                FakeModel::prose("Customer: that price is too high."),
                FakeModel::prose("Good push-back."),
            ]),
            FakeLog::default(),
        );
        let mut s = session();

        coach.respond(&mut s, "!roleplay price").await;
        assert_eq!(s.state.step, 1);
        coach.respond(&mut s, "let me show you the value first").await;
        assert_eq!(s.state.step, 2);
    }

    #[tokio::test]
    async fn model_input_carries_state_snapshot_and_window() {
        let (coach, model, _) = coach(
            FakeModel::new(vec![FakeModel::prose("ok")]),
            FakeLog::default(),
        );
        let mut s = session();
        s.user_name = "Sam".to_string();
        s.state.apply_input("under 450", "under 450", Utc::now());

        coach.respond(&mut s, "we're at 480").await;

        let seen = model.seen.lock().unwrap();
        let input = &seen[0].0;
        let state_msg = input
            .iter()
            .find(|m| {
                m.role == "system"
                    && m.content
                        .as_deref()
                        .unwrap_or("")
                        .starts_with("SESSION_STATE_JSON=")
            })
            .expect("state snapshot present");
        let json: serde_json::Value = serde_json::from_str(
            state_msg
                .content
                .as_deref()
                .unwrap()
                .trim_start_matches("SESSION_STATE_JSON="),
        )
        .unwrap();
        assert_eq!(json["target_payment"], 450);
        assert_eq!(json["offer_payment"], 480);
        assert_eq!(json["band"], "B");
        assert_eq!(json["user_name"], "Sam");
    }

    #[test]
    fn truncation_keeps_system_and_recent_turns() {
        let mut messages = vec![ChatMessage::system("persona")];
        for i in 0..20 {
            messages.push(ChatMessage::user(&format!("u{}", i)));
            messages.push(ChatMessage::assistant(&format!("a{}", i)));
        }
        messages.push(ChatMessage::system("late system"));

        let out = truncate_context(messages, 15);
        let system: Vec<_> = out.iter().filter(|m| m.role == "system").collect();
        let conversation: Vec<_> = out.iter().filter(|m| m.role != "system").collect();
        assert_eq!(system.len(), 2);
        assert_eq!(conversation.len(), 15);
        assert_eq!(conversation.last().unwrap().content.as_deref(), Some("a19"));
        assert_eq!(conversation[0].content.as_deref(), Some("a12"));
    }
}
