//! Per-turn orchestration: bad-case filtering, history management, and the
//! background chat-stream consumer that feeds the TTS worker.

use crate::stage::Stage;
use crate::worker::AnswerSegment;
use crate::AppState;
use confab_types::{ChatMessage, Robot};
use confab_voice::{ChatRequest, ChatStream, Sentence, SentenceSegmenter, VoiceError};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Phrases the Chinese speech model hallucinates on silence — subtitle and
/// like-and-subscribe boilerplate from its training data.
const ZH_SPURIOUS_PHRASES: &[&str] = &[
    "请不吝点赞",
    "支持明镜与点点栏目",
    "谢谢观看",
    "請不吝點贊",
    "支持明鏡與點點欄目",
];

/// Judges ASR output as a known hallucination or otherwise useless input.
///
/// Returns the reason string when the turn should be rejected. This is the
/// only content policy in the system.
pub fn badcase_reason(language: &str, text: &str) -> Option<String> {
    if text.is_empty() {
        return Some("empty asr".to_string());
    }

    match language {
        "zh" => {
            if ZH_SPURIOUS_PHRASES.iter().any(|phrase| text.contains(phrase)) {
                return Some(format!("badcase: {text}"));
            }
            // Subtitle credits come in two halves around the community name.
            if text.contains("字幕由") && text.contains("社群提供") {
                return Some(format!("badcase: {text}"));
            }
        }
        "en" => {
            // Whisper transcribes silence as a lone "you" or a run of dots.
            if text.eq_ignore_ascii_case("you") || text.bytes().all(|b| b == b'.') {
                return Some(format!("badcase: {text}"));
            }
        }
        _ => {}
    }

    None
}

/// Commits the buffered pair into history, assembles the chat request, opens
/// the stream, and hands it to a background consumer. Returns once the
/// stream is open so the HTTP caller can respond immediately.
pub async fn start_chat(
    state: &Arc<AppState>,
    stage: &Arc<Stage>,
    robot: &Robot,
    rid: &str,
) -> Result<(), VoiceError> {
    let request = {
        let mut turn = stage.turn.lock().await;

        if !turn.prev_user.is_empty() && !turn.prev_assistant.is_empty() {
            let user = ChatMessage::user(turn.prev_user.clone());
            let assistant = ChatMessage::assistant(turn.prev_assistant.clone());
            turn.history.push(user);
            turn.history.push(assistant);
            while turn.history.len() > robot.chat_window * 2 {
                turn.history.remove(0);
            }
        }

        turn.prev_user = turn.asr_prompt_carry.clone();
        turn.prev_assistant.clear();

        let system = format!(
            "{} Keep your reply neat, limiting the reply to {} words.",
            robot.prompt, robot.reply_limit
        );

        let mut messages = Vec::with_capacity(turn.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(turn.history.iter().cloned());
        messages.push(ChatMessage::user(turn.asr_prompt_carry.clone()));

        ChatRequest {
            model: robot.chat_model.clone(),
            messages,
            max_tokens: state.settings.max_tokens,
            temperature: state.settings.temperature,
        }
    };

    tracing::debug!(
        robot = %robot.uuid,
        model = %request.model,
        messages = request.messages.len(),
        max_tokens = request.max_tokens,
        temperature = request.temperature,
        "opening chat stream"
    );

    let stream = state.chat.open_stream(request).await?;

    tokio::spawn(
        consume_stream(stage.clone(), robot.clone(), rid.to_string(), stream)
            .instrument(stage.span.clone()),
    );

    Ok(())
}

/// Drains the chat stream through the segmenter, committing each sentence.
///
/// A stream failure terminates segmentation; segments already submitted
/// keep flowing to the client. Only a clean end flushes the remainder.
async fn consume_stream(stage: Arc<Stage>, robot: Robot, rid: String, mut stream: ChatStream) {
    stage.set_generating(true);

    let mut segmenter = SentenceSegmenter::new();
    let mut failed = false;

    while let Some(item) = stream.next().await {
        match item {
            Ok(delta) => {
                if let Some(sentence) = segmenter.push(&delta) {
                    commit_sentence(&stage, &robot, &rid, sentence).await;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "chat stream failed");
                failed = true;
                break;
            }
        }
    }

    if !failed {
        if let Some(sentence) = segmenter.finish() {
            commit_sentence(&stage, &robot, &rid, sentence).await;
        }
    }

    stage.set_generating(false);
}

/// Records a flushed sentence into the turn state and submits it for TTS.
///
/// The raw sentence feeds the history buffer and the ASR prompt carry; the
/// reply prefix decorates only the synthesized audio of the first sentence.
async fn commit_sentence(stage: &Arc<Stage>, robot: &Robot, rid: &str, sentence: Sentence) {
    if sentence.text.is_empty() {
        return;
    }

    let mut text = sentence.text.clone();
    if sentence.first && !robot.reply_prefix.is_empty() {
        text = format!("{} {}", robot.reply_prefix, text);
    }

    {
        let mut turn = stage.turn.lock().await;
        turn.prev_assistant.push_str(&sentence.text);
        turn.prev_assistant.push(' ');
        // The next utterance will reference both sides of this exchange, so
        // the reply biases the next ASR call as well.
        turn.asr_prompt_carry.push(' ');
        turn.asr_prompt_carry.push_str(&sentence.text);

        if sentence.first {
            turn.timings.chat_first = Some(Instant::now());
            turn.timings.first_reply = text.clone();
        }
    }

    stage
        .worker
        .submit(stage, AnswerSegment::real(rid, text, sentence.first));
}
