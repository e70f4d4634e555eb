// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Chat tab: conversation with the local language model

use chrono::{DateTime, Local};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::conversation::ConversationLog;
use crate::ollama::OllamaClient;
use crate::task::TaskRunner;
use crate::AssistantError;

const GREETING: &str = "Hello! I'm your AI Assistant. 👋\n\n\
    I'm powered by a local AI model running on your computer - \
    no internet connection or API keys required!\n\n\
    Please wait while I load the AI model...\n\n\
    Once loaded, I can help you with:\n\
    • Answering questions\n\
    • General conversation\n\
    • Providing information\n\
    • Writing assistance";
const MODEL_LOADED: &str = "AI model loaded successfully! I'm ready to chat. 🎉";
const WAIT_FOR_MODEL: &str = "Please wait for the AI model to load first!";
const CLEARED: &str = "Chat cleared! How can I help you? 😊";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    You,
    Assistant,
    Error,
}

/// One line of the visible transcript
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Outcomes of background chat work
#[derive(Debug)]
pub enum ChatMsg {
    ModelReady,
    ModelFailed(AssistantError),
    Reply(String),
    ReplyFailed(AssistantError),
}

/// Chat view model
///
/// The transcript is what the user sees; the [`ConversationLog`] is what the
/// model sees. Only user messages and model replies reach the log.
pub struct ChatTab {
    config: ChatConfig,
    log: ConversationLog,
    transcript: Vec<ChatEntry>,
    rendered: usize,
    status: ChatStatus,
    model_ready: bool,
    awaiting_reply: bool,
}

impl ChatTab {
    pub fn new(config: ChatConfig) -> Self {
        let log = ConversationLog::new(config.history_limit, config.terminator.clone());
        let mut tab = Self {
            config,
            log,
            transcript: Vec::new(),
            rendered: 0,
            status: ChatStatus::Loading,
            model_ready: false,
            awaiting_reply: false,
        };
        tab.push(Speaker::Assistant, GREETING);
        tab
    }

    fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(ChatEntry {
            speaker,
            text: text.into(),
            timestamp: Local::now(),
        });
    }

    /// Accept user input and return the prompt for the model
    ///
    /// Returns `None` when nothing should be sent: blank input, a reply
    /// still pending, or the model not loaded yet (which also posts a
    /// notice).
    pub fn send(&mut self, input: &str) -> Option<String> {
        let message = input.trim();
        if message.is_empty() || self.awaiting_reply {
            return None;
        }
        if !self.model_ready {
            self.push(Speaker::Error, WAIT_FOR_MODEL);
            return None;
        }

        self.push(Speaker::You, message);
        self.log.append(message);
        self.awaiting_reply = true;
        Some(self.log.build_prompt())
    }

    /// Start a fresh conversation; refused while a reply is pending
    pub fn clear(&mut self) -> bool {
        if self.awaiting_reply {
            return false;
        }
        self.log = ConversationLog::new(self.config.history_limit, self.config.terminator.clone());
        self.transcript.clear();
        self.rendered = 0;
        self.push(Speaker::Assistant, CLEARED);
        true
    }

    pub fn update(&mut self, msg: ChatMsg) {
        match msg {
            ChatMsg::ModelReady => {
                self.model_ready = true;
                self.status = ChatStatus::Ready;
                self.push(Speaker::Assistant, MODEL_LOADED);
            }
            ChatMsg::ModelFailed(e) => {
                let text = match e {
                    AssistantError::Setup(remedy) => remedy,
                    other => format!("Failed to load model: {}", other),
                };
                self.status = ChatStatus::Failed(text.clone());
                self.push(Speaker::Error, text);
            }
            ChatMsg::Reply(reply) => {
                self.awaiting_reply = false;
                let reply = match reply.trim() {
                    "" => self.config.fallback_reply.clone(),
                    text => text.to_string(),
                };
                self.log.append(reply.clone());
                self.push(Speaker::Assistant, reply);
            }
            ChatMsg::ReplyFailed(e) => {
                self.awaiting_reply = false;
                self.push(Speaker::Error, format!("Error generating response: {}", e));
            }
        }
    }

    pub fn status(&self) -> &ChatStatus {
        &self.status
    }

    pub fn transcript(&self) -> &[ChatEntry] {
        &self.transcript
    }

    /// Entries added since the last call
    pub fn take_unrendered(&mut self) -> &[ChatEntry] {
        let start = self.rendered.min(self.transcript.len());
        self.rendered = self.transcript.len();
        &self.transcript[start..]
    }

    pub fn conversation(&self) -> &ConversationLog {
        &self.log
    }

    pub fn is_model_ready(&self) -> bool {
        self.model_ready
    }

    /// A reply is being generated; input and clear are disabled
    pub fn is_typing(&self) -> bool {
        self.awaiting_reply
    }

    pub fn input_enabled(&self) -> bool {
        !self.awaiting_reply
    }
}

pub fn render_status(status: &ChatStatus) -> String {
    match status {
        ChatStatus::Loading => "⏳ Loading AI model... (this may take a minute on first run)".to_string(),
        ChatStatus::Ready => "✅ AI model ready! Start chatting below.".to_string(),
        ChatStatus::Failed(reason) => {
            format!("❌ {}", reason.lines().next().unwrap_or_default())
        }
    }
}

pub fn render_entry(entry: &ChatEntry) -> String {
    let time = entry.timestamp.format("%H:%M");
    match entry.speaker {
        Speaker::You => format!("[{}] You: {}", time, entry.text),
        Speaker::Assistant => format!("[{}] Assistant: {}", time, entry.text),
        Speaker::Error => format!("⚠️ {}", entry.text),
    }
}

pub fn render_typing() -> &'static str {
    "● ● ●  typing..."
}

/// Chat tab wired to the model server through a [`TaskRunner`]
pub struct ChatController {
    tab: ChatTab,
    runner: TaskRunner<ChatMsg>,
    client: OllamaClient,
    model: String,
    runtime: Handle,
}

impl ChatController {
    pub fn new(tab: ChatTab, client: OllamaClient, model: &str, runtime: Handle) -> Self {
        Self {
            tab,
            runner: TaskRunner::new(),
            client,
            model: model.to_string(),
            runtime,
        }
    }

    /// Check the server and model in the background
    pub fn load_model(&mut self) -> bool {
        let client = self.client.clone();
        let model = self.model.clone();
        let runtime = self.runtime.clone();
        info!("Loading chat model {}", self.model);
        self.runner.submit(
            "load-model",
            move |_| runtime.block_on(client.ensure_model(&model)),
            |()| ChatMsg::ModelReady,
            ChatMsg::ModelFailed,
        )
    }

    /// Send user input; false if nothing was submitted
    pub fn send(&mut self, input: &str) -> bool {
        let Some(prompt) = self.tab.send(input) else {
            return false;
        };

        debug!("Prompt has {} history entries", self.tab.conversation().len());
        let client = self.client.clone();
        let model = self.model.clone();
        let runtime = self.runtime.clone();
        let submitted = self.runner.submit(
            "chat-turn",
            move |_| runtime.block_on(client.generate(&model, &prompt)),
            ChatMsg::Reply,
            ChatMsg::ReplyFailed,
        );
        if !submitted {
            self.tab.update(ChatMsg::ReplyFailed(AssistantError::Validation(
                "another task is still running".to_string(),
            )));
        }
        submitted
    }

    pub fn clear(&mut self) -> bool {
        self.tab.clear()
    }

    /// Apply a finished task, if any; true when the tab changed
    pub fn poll(&mut self) -> bool {
        match self.runner.poll() {
            Some(msg) => {
                self.tab.update(msg);
                true
            }
            None => false,
        }
    }

    /// Block until the running task is delivered
    pub fn wait(&mut self) {
        if let Some(msg) = self.runner.wait() {
            self.tab.update(msg);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.runner.is_running()
    }

    pub fn tab(&self) -> &ChatTab {
        &self.tab
    }

    pub fn tab_mut(&mut self) -> &mut ChatTab {
        &mut self.tab
    }
}
