//! Sentence splitting for streaming LLM output
//!
//! Buffers reply tokens and emits complete sentences so synthesis can
//! start before the full reply exists. The first sentence is released as
//! early as possible to cut time-to-first-audio; later ones wait for a
//! real terminator or the buffer cap.

/// Splitter configuration
#[derive(Debug, Clone)]
pub struct SentenceSplitterConfig {
    /// Minimum characters before the first sentence may be forced out
    pub min_chars_first_sentence: usize,
    /// Maximum buffered characters before forcing a break at a word boundary
    pub max_buffer_chars: usize,
}

impl Default for SentenceSplitterConfig {
    fn default() -> Self {
        Self {
            min_chars_first_sentence: 15,
            max_buffer_chars: 500,
        }
    }
}

const TERMINATORS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；'];

/// Token-to-sentence aggregator
pub struct SentenceSplitter {
    config: SentenceSplitterConfig,
    buffer: String,
    first_emitted: bool,
}

impl SentenceSplitter {
    pub fn new(config: SentenceSplitterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            first_emitted: false,
        }
    }

    pub fn default_config() -> Self {
        Self::new(SentenceSplitterConfig::default())
    }

    /// Feed one token; returns any complete sentences it closed
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);

        let mut sentences = self.extract_sentences();

        if sentences.is_empty() && self.should_force_break() {
            if let Some(partial) = self.break_at_word_boundary() {
                sentences.push(partial);
            }
        }

        if !sentences.is_empty() {
            self.first_emitted = true;
        }
        sentences
    }

    /// Flush whatever remains at end of stream
    pub fn flush(&mut self) -> Option<String> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        self.first_emitted = false;
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn extract_sentences(&mut self) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut current = String::new();
        let mut remaining = String::new();
        let mut chars = self.buffer.chars().peekable();

        while let Some(c) = chars.next() {
            current.push(c);

            if TERMINATORS.contains(&c) {
                // Pull in closing quotes and trailing whitespace
                while let Some(&next) = chars.peek() {
                    if next == '"' || next == '\'' || next == ')' || next == '\u{2019}' {
                        current.push(next);
                        chars.next();
                    } else if next.is_whitespace() {
                        chars.next();
                        break;
                    } else {
                        break;
                    }
                }

                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
            }
        }

        remaining.push_str(&current);
        self.buffer = remaining;
        sentences
    }

    fn should_force_break(&self) -> bool {
        if self.first_emitted {
            self.buffer.len() >= self.config.max_buffer_chars
        } else {
            self.buffer.len() >= self.config.min_chars_first_sentence
                && self.buffer.contains(char::is_whitespace)
        }
    }

    fn break_at_word_boundary(&mut self) -> Option<String> {
        let pos = self.buffer.rfind(char::is_whitespace)?;
        let partial = self.buffer[..pos].trim().to_string();
        self.buffer = self.buffer[pos..].trim_start().to_string();
        if partial.is_empty() {
            None
        } else {
            Some(partial)
        }
    }
}
