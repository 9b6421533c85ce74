use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("ASR error: {0}")]
    Asr(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("chat error: {0}")]
    Chat(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
