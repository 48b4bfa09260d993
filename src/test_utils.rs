use crate::gateway::ModelSettings;
use crate::llm::{FragmentStream, GenerateRequest, LlmClient, LlmError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Scripted outcome of one `stream_generate` call
pub enum Script {
    /// Deliver these fragments, then end normally
    Fragments(Vec<String>),
    /// Deliver these fragments, then fail
    FailAfter(Vec<String>, LlmError),
    /// Fail before any fragment
    Refuse(LlmError),
    /// Deliver whatever the test pushes into the sender; ends when it drops
    Gated(mpsc::UnboundedReceiver<Result<String, LlmError>>),
}

impl Script {
    pub fn fragments(parts: &[&str]) -> Self {
        Script::Fragments(parts.iter().map(|s| s.to_string()).collect())
    }

    pub fn fail_after(parts: &[&str], error: LlmError) -> Self {
        Script::FailAfter(parts.iter().map(|s| s.to_string()).collect(), error)
    }

    pub fn refuse(error: LlmError) -> Self {
        Script::Refuse(error)
    }

    pub fn gated() -> (Self, mpsc::UnboundedSender<Result<String, LlmError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Script::Gated(rx), tx)
    }
}

#[derive(Clone)]
pub struct MockLlmClient {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    reports: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    requests: Arc<Mutex<Vec<GenerateRequest>>>,
    /// Next `generate` waits on this instead of the scripted reports
    report_gate: Arc<Mutex<Option<oneshot::Receiver<Result<String, LlmError>>>>>,
    panic_on_generate: bool,
}

impl MockLlmClient {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            reports: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            report_gate: Arc::new(Mutex::new(None)),
            panic_on_generate: false,
        }
    }

    /// Responses for successive `generate` calls
    pub fn with_reports(self, reports: Vec<Result<String, LlmError>>) -> Self {
        *self.reports.lock().expect("reports lock") = reports.into();
        self
    }

    /// Hold the next `generate` open until the test sends its reply
    pub fn gated_report(self) -> (Self, oneshot::Sender<Result<String, LlmError>>) {
        let (tx, rx) = oneshot::channel();
        *self.report_gate.lock().expect("gate lock") = Some(rx);
        (self, tx)
    }

    /// Make `generate` panic, simulating a broken analysis contract
    pub fn panicking_on_generate(mut self) -> Self {
        self.panic_on_generate = true;
        self
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().expect("scripts lock").push_back(script);
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn models() -> ModelSettings {
        ModelSettings {
            chat_model: "chat-model".to_string(),
            feedback_model: "feedback-model".to_string(),
        }
    }

    fn record(&self, request: &GenerateRequest) {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn stream_generate(&self, request: &GenerateRequest) -> Result<FragmentStream, LlmError> {
        self.record(request);
        let script = self.scripts.lock().expect("scripts lock").pop_front();
        match script {
            None => Ok(Box::pin(futures::stream::empty())),
            Some(Script::Fragments(parts)) => {
                Ok(Box::pin(futures::stream::iter(parts.into_iter().map(Ok))))
            }
            Some(Script::FailAfter(parts, error)) => {
                let items: Vec<Result<String, LlmError>> = parts
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(error)))
                    .collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(Script::Refuse(error)) => Err(error),
            Some(Script::Gated(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        self.record(request);
        if self.panic_on_generate {
            panic!("mock analysis contract violation");
        }
        let gate = self.report_gate.lock().expect("gate lock").take();
        if let Some(rx) = gate {
            return rx.await.unwrap_or(Err(LlmError::Empty));
        }
        self.reports
            .lock()
            .expect("reports lock")
            .pop_front()
            .unwrap_or(Err(LlmError::Empty))
    }
}

/// A schema-conformant report with the given clarity score, no filler
/// words and one suggestion
pub fn report_json(clarity: f64) -> String {
    serde_json::json!({
        "clarity": {"score": clarity, "reasoning": "Direct and easy to follow."},
        "confidence": {"score": 64, "reasoning": "Apologetic tone early on."},
        "fillerWords": [],
        "suggestions": [{
            "original": "I'm sorry, let me check on that",
            "improved": "I hear you. I'm pulling up your delivery status right now.",
            "explanation": "Acknowledges the frustration and commits to action."
        }],
        "overallSummary": "You stayed calm under pressure."
    })
    .to_string()
}
