//! Testing utilities.
//!
//! Deterministic doubles for the two external collaborators:
//! - [`MockLlm`] returns scripted completions without API calls
//! - [`ScriptedInterpreter`] plays back canned game output and records
//!   every command, save, and restore it receives
//!
//! Both are used by the integration tests and are available to downstream
//! crates for their own harnesses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{InterpreterError, LlmError};
use crate::interpreter::Interpreter;
use crate::llm::{ChatRequest, Completion, LlmClient, TokenUsage};

// ============================================================================
// Mock LLM
// ============================================================================

#[derive(Default)]
struct MockLlmState {
    text_queue: VecDeque<String>,
    json_queue: VecDeque<Value>,
    /// (substring of the user message, response) pairs, checked in order.
    json_stubs: Vec<(String, Value)>,
    default_text: String,
    default_json: Value,
}

/// A language-model client that returns scripted responses.
///
/// Responses queued with [`queue_text`](MockLlm::queue_text) /
/// [`queue_json`](MockLlm::queue_json) are returned first, in order.
/// `stub_json` entries match on a substring of the request's user message
/// and serve as fallbacks for calls arriving in less predictable order.
/// When nothing matches, `complete` answers with a safe `ACTION: look`
/// response and `complete_json` with an empty object, the same sentinel a
/// real client returns after exhausting its schema retries.
pub struct MockLlm {
    state: Mutex<MockLlmState>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockLlmState {
                default_text: "Nothing better to do.\nACTION: look".to_string(),
                default_json: json!({}),
                ..MockLlmState::default()
            }),
        }
    }

    /// Queue a text completion.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.state.lock().unwrap().text_queue.push_back(text.into());
    }

    /// Queue a structured completion.
    pub fn queue_json(&self, value: Value) {
        self.state.lock().unwrap().json_queue.push_back(value);
    }

    /// Serve `value` whenever the user message contains `key`.
    pub fn stub_json(&self, key: impl Into<String>, value: Value) {
        self.state.lock().unwrap().json_stubs.push((key.into(), value));
    }

    /// Replace the fallback text completion.
    pub fn set_default_text(&self, text: impl Into<String>) {
        self.state.lock().unwrap().default_text = text.into();
    }

    /// Replace the fallback structured completion.
    pub fn set_default_json(&self, value: Value) {
        self.state.lock().unwrap().default_json = value;
    }

    fn completion(text: String) -> Completion {
        Completion {
            text,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
                cached_tokens: 0,
            },
            cost_estimate: 0.001,
            latency_ms: 5.0,
        }
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _request: ChatRequest) -> Result<Completion, LlmError> {
        let mut state = self.state.lock().unwrap();
        let text = state
            .text_queue
            .pop_front()
            .unwrap_or_else(|| state.default_text.clone());
        Ok(Self::completion(text))
    }

    async fn complete_json(
        &self,
        request: ChatRequest,
        _schema: &Value,
    ) -> Result<(Value, Completion), LlmError> {
        let mut state = self.state.lock().unwrap();
        if let Some(value) = state.json_queue.pop_front() {
            return Ok((value.clone(), Self::completion(value.to_string())));
        }
        let message: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        for (key, value) in &state.json_stubs {
            if message.contains(key.as_str()) {
                return Ok((value.clone(), Self::completion(value.to_string())));
            }
        }
        let value = state.default_json.clone();
        Ok((value.clone(), Self::completion(value.to_string())))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Scripted interpreter
// ============================================================================

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<(String, String)>,
    /// (substring of the command, response) pairs, checked in order.
    stubs: Vec<(String, (String, String))>,
    default: (String, String),
    commands: Vec<String>,
    saves: Vec<u32>,
    restores: Vec<u32>,
    fail_restore: bool,
    fail_commands: bool,
}

/// Shared inspection/scripting handle for a [`ScriptedInterpreter`].
///
/// The orchestrator consumes the interpreter by value; tests keep a handle
/// to script further responses and to assert on the command log.
#[derive(Clone)]
pub struct ScriptedHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedHandle {
    /// Queue the next `(room_name, output)` response.
    pub fn queue_response(&self, room_name: impl Into<String>, output: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back((room_name.into(), output.into()));
    }

    /// Serve a response whenever the command contains `key`.
    pub fn stub(
        &self,
        key: impl Into<String>,
        room_name: impl Into<String>,
        output: impl Into<String>,
    ) {
        self.state
            .lock()
            .unwrap()
            .stubs
            .push((key.into(), (room_name.into(), output.into())));
    }

    /// Set the fallback response.
    pub fn set_default(&self, room_name: impl Into<String>, output: impl Into<String>) {
        self.state.lock().unwrap().default = (room_name.into(), output.into());
    }

    /// Make every `restore` call fail.
    pub fn set_fail_restore(&self, fail: bool) {
        self.state.lock().unwrap().fail_restore = fail;
    }

    /// Make every `do_command` call fail with an I/O error.
    pub fn set_fail_commands(&self, fail: bool) {
        self.state.lock().unwrap().fail_commands = fail;
    }

    /// Every command sent so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Save slots written, in order.
    pub fn saves(&self) -> Vec<u32> {
        self.state.lock().unwrap().saves.clone()
    }

    /// Slots restored from, in order.
    pub fn restores(&self) -> Vec<u32> {
        self.state.lock().unwrap().restores.clone()
    }
}

/// An interpreter double that plays back scripted output.
pub struct ScriptedInterpreter {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                default: ("Nowhere".to_string(), "Nothing happens.".to_string()),
                ..ScriptState::default()
            })),
        }
    }

    pub fn handle(&self) -> ScriptedHandle {
        ScriptedHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for ScriptedInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn do_command(&mut self, command: &str) -> Result<(String, String), InterpreterError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        if state.fail_commands {
            return Err(InterpreterError::Io("scripted failure".to_string()));
        }
        if let Some(response) = state.queue.pop_front() {
            return Ok(response);
        }
        for (key, response) in &state.stubs {
            if command.contains(key.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(state.default.clone())
    }

    async fn save(&mut self, slot: u32) -> Result<(), InterpreterError> {
        self.state.lock().unwrap().saves.push(slot);
        Ok(())
    }

    async fn restore(&mut self, slot: u32) -> Result<(), InterpreterError> {
        let mut state = self.state.lock().unwrap();
        state.restores.push(slot);
        if state.fail_restore {
            return Err(InterpreterError::RestoreFailed {
                slot,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}
