//! Roleplay session state machine.
//!
//! `Session` is the sole mutator of phase, transcript and report. State sits
//! behind a mutex that is never held across an await; every await point is
//! bracketed by a generation check so results from an epoch that `restart`
//! ended are dropped instead of leaking into the next one.
//!
//! Phases: Idle -> Active -> Analyzing -> Finished, with `restart` returning
//! to Idle from anywhere.

use crate::feedback::FeedbackReport;
use crate::gateway::{DialogueHandle, ModelGateway, StreamError, DEFAULT_TEMPERATURE};
use crate::llm::LlmError;
use crate::persona::{self, Persona, PersonaId};
use crate::transcript::{Message, Transcript};
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Hidden first turn asking the persona to open the conversation
pub const KICKOFF_PROMPT: &str = "Start the conversation now according to your role instructions.";

/// Shown in place of the kickoff reply when the dialogue cannot start
pub const CONNECT_ERROR_TEXT: &str =
    "I'm having trouble connecting right now. Please check your API key and try again.";

/// Replaces a model reply whose stream failed
pub const TURN_ERROR_TEXT: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Active,
    Analyzing,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Active => "active",
            Phase::Analyzing => "analyzing",
            Phase::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// State changes, in the order they were applied
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(Phase),
    StreamingChanged(bool),
    MessageAppended(Message),
    /// A streamed fragment landed; `text` is the message text after it
    FragmentApplied {
        id: Uuid,
        fragment: String,
        text: String,
    },
    MessageReplaced {
        id: Uuid,
        text: String,
    },
    ReportReady(FeedbackReport),
    Reset,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {action} while the session is {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },
    #[error("a model reply is still streaming")]
    TurnInFlight,
    #[error("message is empty")]
    EmptyMessage,
    #[error("analysis aborted; the conversation is still open")]
    AnalysisAborted,
    #[error(transparent)]
    UnknownPersona(#[from] persona::UnknownPersona),
}

/// Read-only copy of session state for rendering
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub persona: Option<PersonaId>,
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    pub report: Option<FeedbackReport>,
}

struct State {
    /// Bumped by every restart
    generation: u64,
    phase: Phase,
    persona: Option<&'static Persona>,
    transcript: Transcript,
    is_streaming: bool,
    /// Placeholder currently being streamed into
    in_flight: Option<Uuid>,
    report: Option<FeedbackReport>,
    /// None while a turn has it checked out, or when the dialogue never opened
    handle: Option<DialogueHandle>,
}

impl State {
    fn new() -> Self {
        Self {
            generation: 0,
            phase: Phase::Idle,
            persona: None,
            transcript: Transcript::new(),
            is_streaming: false,
            in_flight: None,
            report: None,
            handle: None,
        }
    }
}

pub struct Session {
    gateway: Arc<ModelGateway>,
    temperature: f32,
    state: Mutex<State>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl Session {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self {
            gateway,
            temperature: DEFAULT_TEMPERATURE,
            state: Mutex::new(State::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Callers hold the state lock so events follow mutation order
    fn emit(&self, event: SessionEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_phase(&self, st: &mut State, phase: Phase) {
        if st.phase != phase {
            tracing::debug!(from = %st.phase, to = %phase, "phase change");
            st.phase = phase;
            self.emit(SessionEvent::PhaseChanged(phase));
        }
    }

    fn set_streaming(&self, st: &mut State, streaming: bool) {
        if st.is_streaming != streaming {
            st.is_streaming = streaming;
            self.emit(SessionEvent::StreamingChanged(streaming));
        }
    }

    fn append(&self, st: &mut State, message: Message) -> Uuid {
        let id = st.transcript.push(message.clone());
        self.emit(SessionEvent::MessageAppended(message));
        id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.state();
        SessionSnapshot {
            phase: st.phase,
            persona: st.persona.map(|p| p.id),
            messages: st.transcript.messages().to_vec(),
            is_streaming: st.is_streaming,
            report: st.report.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming
    }

    pub fn persona(&self) -> Option<&'static Persona> {
        self.state().persona
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().transcript.messages().to_vec()
    }

    pub fn report(&self) -> Option<FeedbackReport> {
        self.state().report.clone()
    }

    /// Idle -> Active. Opens a dialogue for `id` and appends the persona's
    /// opening line as the first message.
    ///
    /// A dialogue that cannot be opened still lands in Active, with a single
    /// apology message and no handle.
    pub async fn select_persona(&self, id: PersonaId) -> Result<(), SessionError> {
        let persona = persona::get_persona(id);

        let (generation, opened) = {
            let mut st = self.state();
            if st.phase != Phase::Idle {
                return Err(SessionError::InvalidPhase {
                    action: "select a persona",
                    phase: st.phase,
                });
            }
            st.persona = Some(persona);
            st.transcript = Transcript::new();
            st.report = None;
            st.in_flight = None;
            self.set_phase(&mut st, Phase::Active);
            self.set_streaming(&mut st, true);
            let opened = self
                .gateway
                .create_dialogue_session(persona.preamble, self.temperature);
            (st.generation, opened)
        };

        tracing::info!(persona = %id, "session started");

        // The kickoff reply is buffered and appended whole
        let (handle, opening) = match opened {
            Ok(mut handle) => match self.gateway.send_turn(&mut handle, KICKOFF_PROMPT, |_| {}).await {
                Ok(text) => (Some(handle), text),
                Err(e) => {
                    tracing::error!(persona = %id, error = %e, "kickoff turn failed");
                    (Some(handle), CONNECT_ERROR_TEXT.to_string())
                }
            },
            Err(e) => {
                tracing::error!(persona = %id, error = %e, "could not open dialogue");
                (None, CONNECT_ERROR_TEXT.to_string())
            }
        };

        let mut st = self.state();
        if st.generation != generation {
            tracing::debug!(persona = %id, "session restarted during kickoff, discarding");
            return Ok(());
        }
        st.handle = handle;
        self.append(&mut st, Message::model(opening));
        self.set_streaming(&mut st, false);
        Ok(())
    }

    /// Like `select_persona`, resolving an id or 1-based catalog position
    pub async fn select_persona_by(&self, selector: &str) -> Result<(), SessionError> {
        let persona = persona::find_persona(selector)?;
        self.select_persona(persona.id).await
    }

    /// Active -> Active. Appends the user message and a model placeholder,
    /// then streams the reply into the placeholder.
    ///
    /// A failed stream replaces the placeholder text with an apology; it is
    /// not an error for the caller.
    pub async fn user_send(&self, text: &str) -> Result<(), SessionError> {
        let (generation, placeholder, handle) = {
            let mut st = self.state();
            if st.phase != Phase::Active {
                return Err(SessionError::InvalidPhase {
                    action: "send a message",
                    phase: st.phase,
                });
            }
            if st.is_streaming {
                return Err(SessionError::TurnInFlight);
            }
            if text.trim().is_empty() {
                return Err(SessionError::EmptyMessage);
            }

            self.append(&mut st, Message::user(text));
            let placeholder = self.append(&mut st, Message::placeholder());
            st.in_flight = Some(placeholder);
            self.set_streaming(&mut st, true);
            (st.generation, placeholder, st.handle.take())
        };

        let (handle, result) = match handle {
            Some(mut handle) => {
                let result = self
                    .gateway
                    .send_turn(&mut handle, text, |fragment| {
                        self.apply_fragment(generation, placeholder, fragment)
                    })
                    .await;
                (Some(handle), result)
            }
            None => (
                None,
                Err(StreamError {
                    partial: String::new(),
                    delivered: 0,
                    source: LlmError::Unavailable("no dialogue session".to_string()),
                }),
            ),
        };

        let mut st = self.state();
        if st.generation != generation {
            tracing::debug!("session restarted during turn, discarding reply");
            return Ok(());
        }
        st.handle = handle;
        if let Err(e) = result {
            tracing::warn!(error = %e, "reply replaced with apology");
            if st.transcript.replace_text(placeholder, TURN_ERROR_TEXT) {
                self.emit(SessionEvent::MessageReplaced {
                    id: placeholder,
                    text: TURN_ERROR_TEXT.to_string(),
                });
            }
        }
        st.in_flight = None;
        self.set_streaming(&mut st, false);
        Ok(())
    }

    fn apply_fragment(&self, generation: u64, id: Uuid, fragment: &str) {
        let mut st = self.state();
        if st.generation != generation {
            return;
        }
        if let Some(text) = st.transcript.append_text(id, fragment).map(str::to_string) {
            self.emit(SessionEvent::FragmentApplied {
                id,
                fragment: fragment.to_string(),
                text,
            });
        }
    }

    /// Active -> Analyzing -> Finished.
    ///
    /// The gateway always produces a report, falling back to a canonical one
    /// on failure. If analysis panics anyway, the session goes back to
    /// Active and `AnalysisAborted` is returned.
    pub async fn end_session(&self) -> Result<(), SessionError> {
        let (generation, completed) = {
            let mut st = self.state();
            if st.phase != Phase::Active {
                return Err(SessionError::InvalidPhase {
                    action: "end the session",
                    phase: st.phase,
                });
            }
            if st.is_streaming {
                return Err(SessionError::TurnInFlight);
            }
            tracing::info!(messages = st.transcript.len(), "ending session");
            self.set_phase(&mut st, Phase::Analyzing);
            (st.generation, st.transcript.completed(st.in_flight))
        };

        let outcome = AssertUnwindSafe(self.gateway.analyze_transcript(&completed))
            .catch_unwind()
            .await;

        let mut st = self.state();
        if st.generation != generation {
            tracing::debug!("session restarted during analysis, discarding report");
            return Ok(());
        }
        match outcome {
            Ok(report) => {
                st.report = Some(report.clone());
                self.emit(SessionEvent::ReportReady(report));
                self.set_phase(&mut st, Phase::Finished);
                Ok(())
            }
            Err(_) => {
                tracing::error!("analysis panicked, returning to the conversation");
                self.set_phase(&mut st, Phase::Active);
                Err(SessionError::AnalysisAborted)
            }
        }
    }

    /// Any phase -> Idle. Drops persona, transcript, report and the dialogue
    /// handle; in-flight work from before the restart is discarded.
    pub fn restart(&self) {
        let mut st = self.state();
        if !st.transcript.is_empty() {
            tracing::debug!(discarded = st.transcript.len(), "discarding transcript");
        }
        st.generation += 1;
        st.persona = None;
        st.transcript = Transcript::new();
        st.report = None;
        st.handle = None;
        st.in_flight = None;
        self.emit(SessionEvent::Reset);
        self.set_streaming(&mut st, false);
        self.set_phase(&mut st, Phase::Idle);
        tracing::info!(generation = st.generation, "session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::llm::Role;
    use crate::test_utils::{report_json, MockLlmClient, Script};

    fn session_with(mock: &MockLlmClient) -> Arc<Session> {
        let gateway = ModelGateway::with_client(Arc::new(mock.clone()), MockLlmClient::models());
        Arc::new(Session::new(Arc::new(gateway)))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn wait_until(session: &Session, cond: impl Fn(&SessionSnapshot) -> bool) {
        for _ in 0..1000 {
            if cond(&session.snapshot()) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_angry_client_scenario() {
        let mock = MockLlmClient::new(vec![
            Script::fragments(&["Where IS ", "my delivery?!"]),
            Script::fragments(&["That's ", "not good ", "enough."]),
        ])
        .with_reports(vec![Ok(report_json(72.0))]);
        let session = session_with(&mock);
        let mut rx = session.subscribe();

        session.select_persona(PersonaId::AngryClient).await.unwrap();
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.persona().unwrap().title, "Angry Client");
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Where IS my delivery?!");

        session
            .user_send("I'm sorry, let me check on that")
            .await
            .unwrap();
        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].text, "That's not good enough.");

        session.end_session().await.unwrap();
        assert_eq!(session.phase(), Phase::Finished);
        let report = session.report().unwrap();
        assert_eq!(report.clarity.score, 72.0);
        assert!(report.filler_words.is_empty());
        assert_eq!(report.suggestions.len(), 1);

        let phases: Vec<Phase> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PhaseChanged(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![Phase::Active, Phase::Analyzing, Phase::Finished]);

        // The hidden kickoff never reaches the transcript or the analysis
        let analysis = mock.requests().pop().unwrap();
        let prompt = &analysis.contents[0].text;
        assert!(prompt.contains(
            "MODEL: Where IS my delivery?!\nUSER: I'm sorry, let me check on that\nMODEL: That's not good enough."
        ));
        assert!(!prompt.contains(KICKOFF_PROMPT));
    }

    #[tokio::test]
    async fn test_fragments_observed_in_order() {
        let mock = MockLlmClient::new(vec![
            Script::fragments(&["Hi."]),
            Script::fragments(&["Hel", "lo", " there"]),
        ]);
        let session = session_with(&mock);
        session.select_persona(PersonaId::Casual).await.unwrap();

        let mut rx = session.subscribe();
        session.user_send("hey").await.unwrap();

        let texts: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::FragmentApplied { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hel", "Hello", "Hello there"]);
        assert_eq!(session.messages().last().unwrap().text, "Hello there");
    }

    #[tokio::test]
    async fn test_kickoff_is_appended_whole() {
        let mock = MockLlmClient::new(vec![Script::fragments(&["Tell me ", "about yourself."])]);
        let session = session_with(&mock);
        let mut rx = session.subscribe();

        session.select_persona(PersonaId::Interviewer).await.unwrap();

        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::FragmentApplied { .. })));
        let appended: Vec<&Message> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::MessageAppended(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].text, "Tell me about yourself.");

        let kickoff = &mock.requests()[0];
        assert_eq!(kickoff.contents.len(), 1);
        assert_eq!(kickoff.contents[0].text, KICKOFF_PROMPT);
        assert_eq!(
            kickoff.system_instruction.as_deref(),
            Some(persona::get_persona(PersonaId::Interviewer).preamble)
        );
    }

    #[tokio::test]
    async fn test_transcript_grows_by_two_per_send() {
        let mock = MockLlmClient::new(vec![
            Script::fragments(&["Hello."]),
            Script::fragments(&["One."]),
            Script::fail_after(&["Tw"], LlmError::Transport("reset".to_string())),
            Script::fragments(&["Three."]),
        ]);
        let session = session_with(&mock);
        session.select_persona(PersonaId::Casual).await.unwrap();

        let mut len = session.messages().len();
        for text in ["first", "second", "third"] {
            session.user_send(text).await.unwrap();
            let next = session.messages().len();
            assert_eq!(next, len + 2);
            len = next;
        }

        let messages = session.messages();
        assert_eq!(messages[0].text, "Hello.");
        assert_eq!(messages[1].text, "first");
        assert_eq!(messages[4].text, TURN_ERROR_TEXT);
        assert_eq!(messages[6].text, "Three.");
    }

    #[tokio::test]
    async fn test_stream_error_overwrites_placeholder() {
        let mock = MockLlmClient::new(vec![
            Script::fragments(&["Hello."]),
            Script::fail_after(&["That's ", "not"], LlmError::Transport("reset".to_string())),
        ]);
        let session = session_with(&mock);
        session.select_persona(PersonaId::AngryClient).await.unwrap();
        let mut rx = session.subscribe();

        session.user_send("sorry").await.unwrap();

        assert_eq!(session.phase(), Phase::Active);
        assert!(!session.is_streaming());
        let last = session.messages().pop().unwrap();
        assert_eq!(last.text, TURN_ERROR_TEXT);

        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::MessageReplaced {
            id: last.id,
            text: TURN_ERROR_TEXT.to_string(),
        }));
        assert_eq!(events.last(), Some(&SessionEvent::StreamingChanged(false)));
    }

    #[tokio::test]
    async fn test_missing_credentials_leave_session_active() {
        let config = GatewayConfig {
            api_key_env: Some("CONVOCOACH_TEST_UNSET_KEY".to_string()),
            ..GatewayConfig::default()
        };
        let session = Session::new(Arc::new(ModelGateway::from_config(&config)));

        session.select_persona(PersonaId::Ielts).await.unwrap();
        assert_eq!(session.phase(), Phase::Active);
        assert!(!session.is_streaming());
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, CONNECT_ERROR_TEXT);

        session.user_send("Hello?").await.unwrap();
        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text, "Hello?");
        assert_eq!(messages[2].text, TURN_ERROR_TEXT);

        // Analysis cannot reach the model either, but still finishes
        session.end_session().await.unwrap();
        assert_eq!(session.phase(), Phase::Finished);
        assert!(session.report().unwrap().is_fallback());
    }

    #[tokio::test]
    async fn test_kickoff_failure_shows_connect_error() {
        let mock = MockLlmClient::new(vec![
            Script::refuse(LlmError::Api {
                status: 503,
                message: "unavailable".to_string(),
            }),
            Script::fragments(&["Back online."]),
        ]);
        let session = session_with(&mock);

        session.select_persona(PersonaId::SalesCustomer).await.unwrap();
        assert_eq!(session.messages()[0].text, CONNECT_ERROR_TEXT);

        // The handle survived, so the next turn can succeed
        session.user_send("Hi").await.unwrap();
        assert_eq!(session.messages()[2].text, "Back online.");
    }

    #[tokio::test]
    async fn test_overlapping_send_is_rejected() {
        let (gated, tx) = Script::gated();
        let mock = MockLlmClient::new(vec![Script::fragments(&["Hello."]), gated]);
        let session = session_with(&mock);
        session.select_persona(PersonaId::Casual).await.unwrap();

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.user_send("first").await })
        };
        wait_until(&session, |s| s.is_streaming).await;

        assert_eq!(session.user_send("second").await, Err(SessionError::TurnInFlight));
        assert_eq!(session.end_session().await, Err(SessionError::TurnInFlight));
        assert_eq!(session.messages().len(), 3);

        tx.send(Ok("Sure.".to_string())).unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text, "first");
        assert_eq!(messages[2].text, "Sure.");
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_restart_mid_stream_discards_late_fragments() {
        let (gated, tx) = Script::gated();
        let mock = MockLlmClient::new(vec![Script::fragments(&["Hello."]), gated]);
        let session = session_with(&mock);
        session.select_persona(PersonaId::AngryClient).await.unwrap();

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.user_send("sorry").await })
        };
        wait_until(&session, |s| s.is_streaming).await;

        tx.send(Ok("Hel".to_string())).unwrap();
        wait_until(&session, |s| s.messages.last().map(|m| m.text.as_str()) == Some("Hel")).await;

        session.restart();
        tx.send(Ok("lo".to_string())).unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.is_streaming);
        assert!(snapshot.persona.is_none());

        mock.push_script(Script::fragments(&["Nice weather, huh?"]));
        session.select_persona(PersonaId::Casual).await.unwrap();
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Nice weather, huh?");
    }

    #[tokio::test]
    async fn test_restart_during_kickoff_discards_opening() {
        let (gated, tx) = Script::gated();
        let mock = MockLlmClient::new(vec![gated]);
        let session = session_with(&mock);

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.select_persona(PersonaId::Interviewer).await })
        };
        wait_until(&session, |s| s.phase == Phase::Active).await;

        session.restart();
        tx.send(Ok("Introduce yourself.".to_string())).unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_restart_during_analysis_discards_report() {
        let (mock, release) = MockLlmClient::new(vec![
            Script::fragments(&["Hey, how's it going?"]),
            Script::fragments(&["Describe your hometown."]),
        ])
        .gated_report();
        let session = session_with(&mock);
        session.select_persona(PersonaId::Casual).await.unwrap();

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.end_session().await })
        };
        wait_until(&session, |s| s.phase == Phase::Analyzing).await;

        session.restart();
        session.select_persona(PersonaId::Ielts).await.unwrap();
        release.send(Ok(report_json(90.0))).unwrap();
        assert_eq!(task.await.unwrap(), Ok(()));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Active);
        assert_eq!(snapshot.persona, Some(PersonaId::Ielts));
        assert!(snapshot.report.is_none());
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].text, "Describe your hometown.");
    }

    #[tokio::test]
    async fn test_no_cross_talk_after_restart() {
        let mock = MockLlmClient::new(vec![
            Script::fragments(&["Where IS my delivery?!"]),
            Script::fragments(&["Not good enough."]),
            Script::fragments(&["Lovely day, isn't it?"]),
        ])
        .with_reports(vec![Ok(report_json(50.0))]);
        let session = session_with(&mock);

        session.select_persona(PersonaId::AngryClient).await.unwrap();
        session.user_send("Let me check").await.unwrap();
        session.end_session().await.unwrap();
        assert_eq!(session.phase(), Phase::Finished);

        session.restart();
        session.select_persona(PersonaId::Casual).await.unwrap();

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Lovely day, isn't it?");
        assert!(session.report().is_none());

        let kickoff = mock.requests().pop().unwrap();
        assert_eq!(
            kickoff.system_instruction.as_deref(),
            Some(persona::get_persona(PersonaId::Casual).preamble)
        );
        assert_eq!(kickoff.contents.len(), 1);
        assert_eq!(kickoff.contents[0].role, Role::User);
        assert_eq!(kickoff.contents[0].text, KICKOFF_PROMPT);
    }

    #[tokio::test]
    async fn test_restart_resets_report() {
        let mock = MockLlmClient::new(vec![
            Script::fragments(&["Hello."]),
            Script::fragments(&["Hello again."]),
        ])
        .with_reports(vec![Ok(report_json(80.0))]);
        let session = session_with(&mock);

        session.select_persona(PersonaId::Ielts).await.unwrap();
        session.end_session().await.unwrap();
        assert!(session.report().is_some());

        session.restart();
        assert!(session.report().is_none());
        session.select_persona(PersonaId::Ielts).await.unwrap();
        assert!(session.report().is_none());
        assert_eq!(session.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn test_analysis_failure_still_finishes() {
        let mock = MockLlmClient::new(vec![Script::fragments(&["Hello."])])
            .with_reports(vec![Ok("not json".to_string())]);
        let session = session_with(&mock);

        session.select_persona(PersonaId::Casual).await.unwrap();
        session.end_session().await.unwrap();

        assert_eq!(session.phase(), Phase::Finished);
        assert_eq!(session.report(), Some(FeedbackReport::fallback()));
    }

    #[tokio::test]
    async fn test_analysis_panic_returns_to_active() {
        let mock = MockLlmClient::new(vec![Script::fragments(&["Hello."])]).panicking_on_generate();
        let session = session_with(&mock);

        session.select_persona(PersonaId::Casual).await.unwrap();
        assert_eq!(session.end_session().await, Err(SessionError::AnalysisAborted));
        assert_eq!(session.phase(), Phase::Active);
        assert!(session.report().is_none());
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_phase_guards() {
        let mock = MockLlmClient::new(vec![Script::fragments(&["Hello."])]);
        let session = session_with(&mock);

        assert!(matches!(
            session.user_send("hi").await,
            Err(SessionError::InvalidPhase { phase: Phase::Idle, .. })
        ));
        assert!(matches!(
            session.end_session().await,
            Err(SessionError::InvalidPhase { phase: Phase::Idle, .. })
        ));

        session.select_persona(PersonaId::Casual).await.unwrap();
        assert!(matches!(
            session.select_persona(PersonaId::Ielts).await,
            Err(SessionError::InvalidPhase { phase: Phase::Active, .. })
        ));
        assert_eq!(session.user_send("   ").await, Err(SessionError::EmptyMessage));
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_select_by_selector() {
        let mock = MockLlmClient::new(vec![Script::fragments(&["Hello."])]);
        let session = session_with(&mock);

        assert!(matches!(
            session.select_persona_by("pirate").await,
            Err(SessionError::UnknownPersona(_))
        ));
        assert_eq!(session.phase(), Phase::Idle);

        session.select_persona_by("4").await.unwrap();
        assert_eq!(session.persona().unwrap().id, PersonaId::AngryClient);
    }

    #[tokio::test]
    async fn test_restart_from_idle_is_harmless() {
        let mock = MockLlmClient::new(vec![]);
        let session = session_with(&mock);
        session.restart();
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.messages().is_empty());
    }
}
