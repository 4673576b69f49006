//! Intent classification: decide what, if anything, to answer for one chat message.
//!
//! Order is fixed and first match wins:
//! 1. messages from the bot itself are ignored;
//! 2. a triggered message whose first token is the prefix goes through the policy
//!    (accepted → command, refused → rejection);
//! 3. otherwise the canned reply table is tried top to bottom;
//! 4. anything else is ignored.
//!
//! Canned entries can shadow later ones ("help, are you up?" answers with usage,
//! not liveness). That is part of the contract and covered by tests.

use regex::Regex;
use std::sync::Arc;

use crate::channels::InboundMessage;
use crate::command;
use crate::exec::{format_outcome, Executor};
use crate::policy::{tokenize, Policy, Rejection, ValidatedCommand};

pub const LIVENESS_REPLY: &str = "Yes I'm running";
pub const GREETING_REPLY: &str = "Hello my friend !";

/// Which path a message takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Ignore,
    Command(ValidatedCommand),
    Rejected(Rejection),
    Canned(String),
}

/// Ordered (pattern, reply) table.
#[derive(Debug, Clone)]
pub struct CannedReplies {
    entries: Vec<(Regex, String)>,
}

impl CannedReplies {
    pub fn new<P, R>(entries: impl IntoIterator<Item = (P, R)>) -> Result<Self, regex::Error>
    where
        P: AsRef<str>,
        R: Into<String>,
    {
        let mut compiled = Vec::new();
        for (pattern, reply) in entries {
            compiled.push((Regex::new(pattern.as_ref())?, reply.into()));
        }
        Ok(Self { entries: compiled })
    }

    /// Built-in table: alive, help, up, running, hello.
    pub fn standard(trigger_prefix: &str) -> Self {
        let usage = format!(
            "{} <namespace|all> <verb> [resource] [flags...]",
            trigger_prefix
        );
        // ASCII word boundaries: "aliveé" still counts as "alive".
        Self::new([
            (r"(?-u:\b)alive(?-u:\b)", LIVENESS_REPLY.to_string()),
            (r"(?-u:\b)help(?-u:\b)", usage),
            (r"(?-u:\b)up(?-u:\b)", LIVENESS_REPLY.to_string()),
            (r"(?-u:\b)running(?-u:\b)", LIVENESS_REPLY.to_string()),
            (r"(?i)(?-u:\b)hello(?-u:\b)", GREETING_REPLY.to_string()),
        ])
        .expect("built-in reply patterns must compile")
    }

    /// First matching reply, if any.
    pub fn lookup(&self, text: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, reply)| reply.as_str())
    }
}

/// Classifies messages and produces replies. Collaborators are injected; nothing is global.
pub struct Classifier {
    bot_user_id: String,
    policy: Arc<Policy>,
    executor: Arc<dyn Executor>,
    canned: CannedReplies,
    max_reply_chars: usize,
}

impl Classifier {
    pub fn new(
        bot_user_id: impl Into<String>,
        policy: Arc<Policy>,
        executor: Arc<dyn Executor>,
        max_reply_chars: usize,
    ) -> Self {
        let canned = CannedReplies::standard(policy.trigger_prefix());
        Self {
            bot_user_id: bot_user_id.into(),
            policy,
            executor,
            canned,
            max_reply_chars,
        }
    }

    /// Replace the canned reply table.
    pub fn with_canned(mut self, canned: CannedReplies) -> Self {
        self.canned = canned;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Select the path for a message. Pure: the same message always yields the same intent.
    pub fn classify(&self, msg: &InboundMessage) -> Intent {
        if msg.author_id == self.bot_user_id {
            return Intent::Ignore;
        }
        if self.policy.is_triggered(&msg.text) {
            let tokens = tokenize(&msg.text);
            match self.policy.validate(&tokens) {
                Ok(Some(cmd)) => return Intent::Command(cmd),
                Err(rejection) => return Intent::Rejected(rejection),
                Ok(None) => {}
            }
        }
        match self.canned.lookup(&msg.text) {
            Some(reply) => Intent::Canned(reply.to_string()),
            None => Intent::Ignore,
        }
    }

    /// Produce the reply text for an intent. Commands are built and run here.
    pub async fn respond(&self, msg: &InboundMessage, intent: Intent) -> Option<String> {
        match intent {
            Intent::Ignore => None,
            Intent::Canned(reply) => Some(reply),
            Intent::Rejected(rejection) => {
                log::warn!(
                    "rejected command from {} (message {}): {}",
                    msg.author_id,
                    msg.message_id,
                    rejection
                );
                if self.policy.announce_rejections() {
                    Some(format!("command rejected: {}", rejection))
                } else {
                    None
                }
            }
            Intent::Command(cmd) => {
                let invocation = command::build(&self.policy, &cmd);
                log::info!(
                    "running for {} (message {}): {}",
                    msg.author_id,
                    msg.message_id,
                    invocation.display()
                );
                let outcome = self.executor.run(&invocation).await;
                if !outcome.succeeded {
                    log::warn!(
                        "command failed (message {}): {}",
                        msg.message_id,
                        outcome.error_detail.as_deref().unwrap_or("unknown error")
                    );
                }
                format_outcome(&outcome, self.max_reply_chars)
            }
        }
    }

    /// Classify and respond in one step.
    pub async fn reply_to(&self, msg: &InboundMessage) -> Option<String> {
        let intent = self.classify(msg);
        self.respond(msg, intent).await
    }
}
