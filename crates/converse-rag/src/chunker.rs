use serde::{Deserialize, Serialize};

/// Window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Characters shared between adjacent windows.
pub const DEFAULT_OVERLAP: usize = 50;

/// A slice of a source document, before embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub content: String,
}

/// Splits documents into overlapping character windows.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl Chunker {
    /// `overlap` is clamped below `chunk_size` so the window always advances.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    /// Split `text` into windows. Chunk ids are `{source}#{ordinal}`.
    ///
    /// Windows are measured in characters, not bytes, so Cyrillic text
    /// never splits mid-codepoint.
    pub fn split(&self, source: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut ordinal = 0;

        loop {
            let end = (start + self.chunk_size).min(chars.len());
            let content: String = chars[start..end].iter().collect();
            chunks.push(Chunk {
                id: format!("{source}#{ordinal}"),
                source: source.to_string(),
                content,
            });
            if end == chars.len() {
                break;
            }
            start += step;
            ordinal += 1;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = Chunker::default().split("a.txt", "короткий текст");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "a.txt#0");
        assert_eq!(chunks[0].content, "короткий текст");
    }

    #[test]
    fn windows_overlap_by_the_configured_amount() {
        let chunker = Chunker::new(10, 3);
        let text = "abcdefghijklmnopqrst"; // 20 chars
        let chunks = chunker.split("doc", text);
        assert_eq!(chunks[0].content, "abcdefghij");
        assert_eq!(chunks[1].content, "hijklmnopq");
        // last 3 chars of window N == first 3 of window N+1
        assert_eq!(&chunks[0].content[7..], &chunks[1].content[..3]);
    }

    #[test]
    fn final_window_is_truncated_not_padded() {
        let chunker = Chunker::new(10, 3);
        let chunks = chunker.split("doc", "abcdefghijklm"); // 13 chars
        let last = chunks.last().expect("chunks");
        assert!(last.content.len() <= 10);
        assert!(last.content.ends_with('m'));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(Chunker::default().split("doc", "").is_empty());
    }

    #[test]
    fn overlap_is_clamped_below_chunk_size() {
        // A degenerate overlap must not stall the window.
        let chunker = Chunker::new(5, 50);
        let chunks = chunker.split("doc", "abcdefghij");
        assert!(chunks.len() >= 2);
    }
}
