//! Paragraph-boundary text chunker.
//!
//! Stands in for the external chunking step when documents are ingested
//! from the command line. Text is split on paragraph boundaries (`\n\n`)
//! into [`ChunkInput`]s that respect an approximate `max_tokens` limit.
//! Markdown headings encountered along the way become the chunk's
//! `section_path`.

use groundwork_core::models::ChunkInput;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Track the heading trail as markdown headings are seen.
fn update_headings(trail: &mut Vec<(usize, String)>, paragraph: &str) {
    let first = paragraph.lines().next().unwrap_or_default();
    let level = first.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 || !first[level..].starts_with(' ') {
        return;
    }
    trail.retain(|(l, _)| *l < level);
    trail.push((level, first[level..].trim().to_string()));
}

struct Builder {
    chunks: Vec<ChunkInput>,
    buf: String,
    section: Vec<String>,
}

impl Builder {
    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let mut chunk = ChunkInput::new(self.chunks.len() as u32, std::mem::take(&mut self.buf));
        chunk.section_path = self.section.clone();
        self.chunks.push(chunk);
    }

    fn push_piece(&mut self, piece: &str) {
        let mut chunk = ChunkInput::new(self.chunks.len() as u32, piece);
        chunk.section_path = self.section.clone();
        self.chunks.push(chunk);
    }
}

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
///
/// Positions are contiguous from 0. Blank input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<ChunkInput> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut trail: Vec<(usize, String)> = Vec::new();
    let mut b = Builder {
        chunks: Vec::new(),
        buf: String::new(),
        section: Vec::new(),
    };

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let before = trail.len();
        let before_last = trail.last().cloned();
        update_headings(&mut trail, trimmed);
        if trail.len() != before || trail.last() != before_last.as_ref() {
            // A new section starts a new chunk.
            b.flush();
            b.section = trail.iter().map(|(_, h)| h.clone()).collect();
        }

        let would_be = if b.buf.is_empty() {
            trimmed.len()
        } else {
            b.buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars {
            b.flush();
        }

        if trimmed.len() > max_chars {
            // Hard split, preferring newline or space boundaries.
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let mut split_at = remaining.len().min(max_chars);
                while !remaining.is_char_boundary(split_at) {
                    split_at -= 1;
                }
                let actual = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .filter(|pos| *pos > 0)
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at.max(1))
                } else {
                    split_at
                };
                let piece = remaining[..actual].trim();
                if !piece.is_empty() {
                    b.push_piece(piece);
                }
                remaining = &remaining[actual..];
            }
        } else {
            if !b.buf.is_empty() {
                b.buf.push_str("\n\n");
            }
            b.buf.push_str(trimmed);
        }
    }

    b.flush();
    b.chunks
}
