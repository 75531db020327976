//! Line-oriented, token-bounded text chunker.
//!
//! Splits file text into overlapping [`TextChunk`]s. Chunk boundaries always
//! fall between lines; a line is never split. Consecutive chunks share up to
//! `overlap_tokens` worth of trailing lines so that code spanning a boundary
//! appears whole in at least one chunk.
//!
//! Token counts come from [`count_tokens`], a deterministic word/punctuation
//! rule rather than a provider tokenizer, so chunk boundaries are
//! reproducible offline.
//!
//! # Algorithm
//!
//! 1. Split the text on `'\n'`; lines are numbered from 1.
//! 2. Accumulate lines into a window while the running token count stays
//!    within `max_tokens`.
//! 3. When the next line would overflow a non-empty window, emit the window.
//! 4. Start the next window with the longest suffix of the emitted window
//!    that fits in `overlap_tokens`, dropping leading overlap lines if the
//!    overlap plus the next line would still overflow.
//! 5. A line longer than `max_tokens` on its own becomes a single chunk.
//!
//! # Example
//!
//! ```rust
//! use code_vectorizer::chunk::chunk_text;
//!
//! let chunks = chunk_text("fn main() {\n    run();\n}", 100, 10).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
//! ```

use crate::error::{Result, VectorizeError};

/// A contiguous slice of a file's lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based position of the chunk within its file.
    pub index: usize,
    pub content: String,
    /// First line (1-based, inclusive).
    pub start_line: usize,
    /// Last line (1-based, inclusive).
    pub end_line: usize,
    pub token_count: usize,
}

/// Count tokens in `text`.
///
/// A maximal run of alphanumeric or `_` characters is one token; every other
/// non-whitespace character is one token on its own.
pub fn count_tokens(text: &str) -> usize {
    let mut tokens = 0;
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            if !in_word {
                tokens += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !c.is_whitespace() {
                tokens += 1;
            }
        }
    }
    tokens
}

/// Tokens a line contributes to a chunk: its words plus one for the line break.
fn line_tokens(line: &str) -> usize {
    count_tokens(line) + 1
}

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    /// Rejects `max_tokens == 0` and `overlap_tokens >= max_tokens`.
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(VectorizeError::Validation(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if overlap_tokens >= max_tokens {
            return Err(VectorizeError::Validation(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap_tokens, max_tokens
            )));
        }
        Ok(Self {
            max_tokens,
            overlap_tokens,
        })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Lazily chunk `text`. Whitespace-only text yields nothing.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        let lines: Vec<&'a str> = if text.trim().is_empty() {
            Vec::new()
        } else {
            text.split('\n').collect()
        };
        let tokens = lines.iter().map(|l| line_tokens(l)).collect();
        Chunks {
            lines,
            tokens,
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
            pos: 0,
            window_start: 0,
            window_tokens: 0,
            next_index: 0,
        }
    }
}

/// Iterator over the chunks of one text. Cloning restarts from the clone point.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    lines: Vec<&'a str>,
    tokens: Vec<usize>,
    max_tokens: usize,
    overlap_tokens: usize,
    /// Next line to consider (0-based).
    pos: usize,
    /// First line of the open window (0-based).
    window_start: usize,
    window_tokens: usize,
    next_index: usize,
}

impl<'a> Chunks<'a> {
    fn emit(&mut self, end: usize) -> TextChunk {
        let chunk = TextChunk {
            index: self.next_index,
            content: self.lines[self.window_start..end].join("\n"),
            start_line: self.window_start + 1,
            end_line: end,
            token_count: self.window_tokens,
        };
        self.next_index += 1;
        chunk
    }

    /// Rewind into the window just emitted so the next one starts with
    /// overlap, leaving room for the line at `self.pos`.
    fn rewind(&mut self) {
        let next_line = self.tokens[self.pos];
        let mut start = self.pos;
        let mut overlap = 0;
        while start > self.window_start && overlap + self.tokens[start - 1] <= self.overlap_tokens
        {
            start -= 1;
            overlap += self.tokens[start];
        }
        while start < self.pos && overlap + next_line > self.max_tokens {
            overlap -= self.tokens[start];
            start += 1;
        }
        self.window_start = start;
        self.window_tokens = overlap;
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<TextChunk> {
        while self.pos < self.lines.len() {
            let t = self.tokens[self.pos];
            if self.pos > self.window_start && self.window_tokens + t > self.max_tokens {
                let chunk = self.emit(self.pos);
                self.rewind();
                return Some(chunk);
            }
            self.window_tokens += t;
            self.pos += 1;
        }

        if self.pos > self.window_start {
            let chunk = self.emit(self.pos);
            self.window_start = self.pos;
            self.window_tokens = 0;
            return Some(chunk);
        }
        None
    }
}

/// Chunk `text` eagerly.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<TextChunk>> {
    Ok(Chunker::new(max_tokens, overlap_tokens)?.chunks(text).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (1..=n)
            .map(|i| format!("let value_{} = compute({});", i, i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop the lines each chunk shares with its predecessor and re-join.
    fn reconstruct(chunks: &[TextChunk]) -> String {
        let mut lines: Vec<&str> = Vec::new();
        let mut last_end: usize = 0;
        for c in chunks {
            let skip = (last_end + 1).saturating_sub(c.start_line);
            lines.extend(c.content.split('\n').skip(skip));
            last_end = c.end_line;
        }
        lines.join("\n")
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   "), 0);
        assert_eq!(count_tokens("hello world"), 2);
        assert_eq!(count_tokens("foo_bar(baz);"), 5);
        assert_eq!(count_tokens("a+b"), 3);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_text("", 20, 5).unwrap().is_empty());
        assert!(chunk_text("  \n\n\t\n", 20, 5).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_overlap_not_below_max() {
        assert!(matches!(
            Chunker::new(20, 20),
            Err(VectorizeError::Validation(_))
        ));
        assert!(Chunker::new(20, 25).is_err());
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(20, 19).is_ok());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("fn a() {}\nfn b() {}", 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[0].content, "fn a() {}\nfn b() {}");
    }

    #[test]
    fn test_indices_contiguous_and_lines_ordered() {
        let text = numbered_lines(50);
        let chunks = chunk_text(&text, 20, 5).unwrap();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.start_line <= c.end_line);
        }
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 50);
    }

    #[test]
    fn test_token_bound_respected() {
        let text = numbered_lines(80);
        for c in chunk_text(&text, 25, 8).unwrap() {
            assert!(c.token_count <= 25, "chunk {} has {} tokens", c.index, c.token_count);
            assert_eq!(
                c.token_count,
                c.content.split('\n').map(line_tokens).sum::<usize>()
            );
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        // Each line: `let value_N = compute(N);` = 8 tokens + 1 for the break.
        let text = numbered_lines(10);
        let chunks = chunk_text(&text, 20, 9).unwrap();
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line);
        }
    }

    #[test]
    fn test_zero_overlap_has_no_shared_lines() {
        let text = numbered_lines(10);
        let chunks = chunk_text(&text, 20, 0).unwrap();
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn test_reconstructs_original_text() {
        let text = format!("{}\n\n// trailing comment\n", numbered_lines(37));
        let chunks = chunk_text(&text, 30, 10).unwrap();
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_long_line_becomes_own_chunk() {
        let long = (0..60).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let text = format!("short one\n{}\nshort two", long);
        let chunks = chunk_text(&text, 20, 5).unwrap();
        let own = chunks
            .iter()
            .find(|c| c.content == long)
            .expect("long line should be a chunk by itself");
        assert_eq!((own.start_line, own.end_line), (2, 2));
        assert!(own.token_count > 20);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_lines(40);
        let c1 = chunk_text(&text, 20, 5).unwrap();
        let c2 = chunk_text(&text, 20, 5).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_iterator_restartable_by_clone() {
        let text = numbered_lines(30);
        let chunker = Chunker::new(20, 5).unwrap();
        let mut iter = chunker.chunks(&text);
        let first = iter.next().unwrap();
        let rest_a: Vec<_> = iter.clone().collect();
        let rest_b: Vec<_> = iter.collect();
        assert_eq!(first.index, 0);
        assert_eq!(rest_a, rest_b);
    }

    #[test]
    fn test_fifty_and_ten_line_files() {
        let a = numbered_lines(50);
        let b = numbered_lines(10);
        let count = chunk_text(&a, 20, 5).unwrap().len() + chunk_text(&b, 20, 5).unwrap().len();
        let again = chunk_text(&a, 20, 5).unwrap().len() + chunk_text(&b, 20, 5).unwrap().len();
        assert_eq!(count, again);
        // 9 tokens per line, 2 lines per chunk, no room for overlap + next line.
        assert_eq!(chunk_text(&a, 20, 5).unwrap().len(), 25);
        assert_eq!(chunk_text(&b, 20, 5).unwrap().len(), 5);
    }
}
