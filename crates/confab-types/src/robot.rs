//! Robot persona definitions.
//!
//! A `Robot` is a configured AI persona the user can talk with: a system
//! prompt plus language, voice, model, and reply-budget settings. The set of
//! robots is loaded once at startup and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Welcome clip served for English-speaking robots.
pub const WELCOME_VOICE_EN: &str = "hello-english.aac";
/// Welcome clip served for Chinese-speaking robots.
pub const WELCOME_VOICE_ZH: &str = "hello-chinese.aac";

/// A configured AI persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    /// Unique identifier, referenced by the `robot` query parameter.
    pub uuid: String,
    /// Human-readable name shown in the robot roster.
    pub label: String,
    /// The system prompt that defines the persona.
    pub prompt: String,
    /// Language hint passed to ASR (`en`, `zh`, ...).
    pub asr_language: String,
    /// Optional cosmetic prefix prepended to the first sentence of a reply.
    pub reply_prefix: String,
    /// Welcome voice clip file name, served by the examples endpoint.
    pub voice: String,
    /// Target word budget folded into the system prompt.
    pub reply_limit: u32,
    /// Chat completion model.
    pub chat_model: String,
    /// Maximum number of turns kept as rolling history.
    pub chat_window: usize,
}

impl Robot {
    /// Returns the welcome clip file name for an ASR language.
    pub fn welcome_voice(asr_language: &str) -> &'static str {
        if asr_language == "zh" {
            WELCOME_VOICE_ZH
        } else {
            WELCOME_VOICE_EN
        }
    }
}

impl fmt::Display for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uuid:{},label:{},asr:{}",
            self.uuid, self.label, self.asr_language
        )?;
        if !self.reply_prefix.is_empty() {
            write!(f, ",prefix:{}", self.reply_prefix)?;
        }
        write!(
            f,
            ",voice={},limit={},model={},window={},prompt:{}",
            self.voice, self.reply_limit, self.chat_model, self.chat_window, self.prompt
        )
    }
}
