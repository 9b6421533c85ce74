//! Voice infrastructure for the confab platform.
//!
//! Provides the swappable provider adapters the talk server consumes — ASR
//! (speech to text), streaming chat completion, and TTS (text to speech) —
//! plus the incremental sentence segmenter that turns a chat delta stream
//! into speakable sentences, and the ffmpeg helpers the ASR adapters use to
//! normalize uploaded audio.
//!
//! Adapters are dependency-injected behind the `AsrBackend`, `ChatBackend`
//! and `TtsBackend` traits; the OpenAI-compatible implementations cover any
//! proxy speaking that dialect, and a Tencent speech pair is selected by
//! configuration.

pub mod asr;
pub mod chat;
pub mod config;
pub mod error;
pub mod media;
pub mod segmenter;
pub mod tencent;
pub mod tts;

pub use asr::{AsrBackend, AsrOutcome, BeforeRequestHook, OpenAiAsr};
pub use chat::{ChatBackend, ChatRequest, ChatStream, OpenAiChat};
pub use config::{OpenAiEndpoint, ProviderConfig, TencentConfig};
pub use error::VoiceError;
pub use segmenter::{Sentence, SentenceSegmenter};
pub use tencent::{TencentAsr, TencentTts};
pub use tts::{ChooseOutputPath, OpenAiTts, TtsBackend};
