//! Incremental sentence segmentation for streaming TTS.
//!
//! The chat stream produces small text deltas; speech synthesis wants whole
//! sentences. The segmenter accumulates deltas and flushes a sentence as
//! soon as a boundary is plausible, trading prosody for latency: waiting for
//! the full reply would delay the first audio by the entire generation time.
//!
//! Boundary rules, in order:
//! 1. Deltas are normalized: `"\n\n"` becomes `"\n"`, `"\n"` becomes a space.
//! 2. A terminator in the latest delta (`, . ? ! \n` or `。 ？ ！ ，`) makes
//!    the buffer eligible to flush.
//! 3. Long buffers are force-flushed: an all-ASCII buffer at 30 spaces for
//!    the first sentence and 50 after, a non-ASCII buffer at 50 and 100
//!    scalars.
//! 4. Short buffers are suppressed: under 3 (first) or 5 (later) spaces or
//!    scalars nothing flushes, terminator or not.
//! 5. A trailing decimal number ("1.3", "1,300") suppresses the terminator
//!    rule and switches to the longer budgets so numerals are not split.
//! 6. `finish()` flushes whatever remains, with no minimum.

use regex::Regex;

/// One flushed sentence, plus whether it was the first of the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub first: bool,
}

/// Splits a growing delta stream into speakable sentences.
pub struct SentenceSegmenter {
    sentence: String,
    first: bool,
    decimal_tail: Regex,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self {
            sentence: String::new(),
            first: true,
            decimal_tail: Regex::new(r"\d+(\.|,)\d*$").expect("decimal tail pattern is valid"),
        }
    }

    /// Feeds one delta. Returns a sentence when the buffer flushed.
    pub fn push(&mut self, delta: &str) -> Option<Sentence> {
        let words = normalize(delta);
        self.sentence.push_str(&words);

        if self.should_flush(&words) {
            return self.take();
        }
        None
    }

    /// Flushes the remainder at stream end, regardless of length.
    pub fn finish(&mut self) -> Option<Sentence> {
        if self.sentence.is_empty() {
            return None;
        }
        self.take()
    }

    fn take(&mut self) -> Option<Sentence> {
        let text = std::mem::take(&mut self.sentence);
        let first = self.first;
        self.first = false;
        Some(Sentence { text, first })
    }

    fn should_flush(&self, last_words: &str) -> bool {
        if self.sentence.is_empty() {
            return false;
        }

        // A terminator anywhere in the most recent delta.
        let mut flush = last_words.contains([',', '.', '?', '!', '\n'])
            || last_words.contains(['。', '？', '！', '，']);

        // A trailing numeral like "1.3" or "1,300" must not be split.
        let decimal_guard = self.decimal_tail.is_match(&self.sentence);
        if decimal_guard {
            flush = false;
        }

        let long_budget = !self.first || decimal_guard;

        if self.sentence.is_ascii() {
            let (max_words, min_words) = if long_budget { (50, 5) } else { (30, 3) };
            let spaces = self.sentence.matches(' ').count();
            if spaces >= max_words {
                flush = true;
            } else if spaces < min_words {
                flush = false;
            }
        } else {
            let (max_scalars, min_scalars) = if long_budget { (100, 5) } else { (50, 3) };
            let scalars = self.sentence.chars().count();
            if scalars >= max_scalars {
                flush = true;
            } else if scalars < min_scalars {
                flush = false;
            }
        }

        flush
    }
}

fn normalize(delta: &str) -> String {
    delta.replace("\n\n", "\n").replace('\n', " ")
}
