//! Sentence chunking for TTS
//!
//! Splits agent text into speakable chunks so the first sentence can be
//! synthesized and played while the rest is still being generated.

use intake_config::SynthesisConfig;

/// Chunk output from the chunker
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The text to synthesize
    pub text: String,
    /// Position of this chunk in the utterance
    pub index: usize,
    /// Is this the final chunk?
    pub is_final: bool,
}

/// Chunker configuration
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Sentences shorter than this are merged with the next one
    pub min_chars: usize,
    /// Chunks longer than this are split at a clause or word boundary
    pub max_chars: usize,
}

impl ChunkerConfig {
    pub fn from_settings(synthesis: &SynthesisConfig) -> Self {
        Self {
            max_chars: synthesis.max_chunk_chars,
            ..Self::default()
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: 12,
            max_chars: 220,
        }
    }
}

pub struct SentenceChunker {
    config: ChunkerConfig,
}

impl SentenceChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split `text` into chunks in speaking order
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let mut pieces: Vec<String> = Vec::new();
        let mut pending = String::new();

        for sentence in sentences(text) {
            if !pending.is_empty() {
                pending.push(' ');
            }
            pending.push_str(&sentence);
            if pending.len() >= self.config.min_chars {
                pieces.extend(self.bound(std::mem::take(&mut pending)));
            }
        }
        if !pending.is_empty() {
            match pieces.last_mut() {
                Some(last) if last.len() + pending.len() < self.config.max_chars => {
                    last.push(' ');
                    last.push_str(&pending);
                }
                _ => pieces.extend(self.bound(pending)),
            }
        }

        let count = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, text)| TextChunk {
                text,
                index,
                is_final: index + 1 == count,
            })
            .collect()
    }

    /// Split an over-long piece at commas, then at spaces
    fn bound(&self, piece: String) -> Vec<String> {
        if piece.len() <= self.config.max_chars {
            return vec![piece];
        }
        let mut out = Vec::new();
        let mut current = String::new();
        for word in piece.split_whitespace() {
            if !current.is_empty() && current.len() + 1 + word.len() > self.config.max_chars {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            if word.ends_with(',') && current.len() >= self.config.max_chars / 2 {
                out.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// Split on sentence-ending punctuation followed by whitespace
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '?' | '!')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if at_boundary {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}
