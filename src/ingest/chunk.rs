//! Text chunking, grounded on the original `_split_text_into_chunks`.
//!
//! Chunk size and overlap scale with input length, and chunk boundaries snap
//! back to the nearest sentence-ending punctuation within a short window so
//! chunks don't split mid-sentence.

/// Sentence-boundary markers searched for when snapping a chunk end backward.
const BOUNDARY_MARKERS: &[&str] = &[". ", "\n", "\u{3002}", "\u{ff01}", "\u{ff1f}"];
/// How far back from the naive chunk end to search for a boundary marker.
const BOUNDARY_WINDOW: usize = 200;
/// Hard ceiling on total chunked output, matching the original's safety valve.
const MAX_TOTAL_CHUNK_BYTES: usize = 100_000_000;

/// Chunk size and overlap, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Target chunk size, in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in characters.
    pub overlap: usize,
}

impl ChunkParams {
    /// Choose chunk size/overlap based on total input length, matching the
    /// original's three length bands.
    #[must_use]
    pub fn for_text_len(text_len: usize) -> Self {
        if text_len > 10_000_000 {
            Self { chunk_size: 5000, overlap: 500 }
        } else if text_len > 1_000_000 {
            Self { chunk_size: 2000, overlap: 400 }
        } else {
            Self { chunk_size: 1000, overlap: 200 }
        }
    }
}

/// Split `text` into overlapping, sentence-boundary-snapped chunks.
#[must_use]
pub fn split_text_into_chunks(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let text_len = chars.len();
    if text_len == 0 {
        return Vec::new();
    }
    let params = ChunkParams::for_text_len(text_len);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut total_bytes = 0usize;

    while start < text_len {
        let naive_end = (start + params.chunk_size).min(text_len);
        let end = if naive_end < text_len {
            snap_to_boundary(&chars, start, naive_end)
        } else {
            naive_end
        };

        let slice: String = chars[start..end].iter().collect();
        let trimmed = slice.trim();
        if !trimmed.is_empty() {
            total_bytes += trimmed.len();
            chunks.push(trimmed.to_string());
        }

        if total_bytes > MAX_TOTAL_CHUNK_BYTES {
            break;
        }

        let next_start = end.saturating_sub(params.overlap);
        // Guard against the overlap causing no forward progress.
        start = if next_start <= start { end } else { next_start };
    }

    chunks
}

/// Search backward from `naive_end` within [`BOUNDARY_WINDOW`] chars for a
/// sentence-boundary marker, returning the snapped end (exclusive), or
/// `naive_end` unchanged if none is found.
fn snap_to_boundary(chars: &[char], start: usize, naive_end: usize) -> usize {
    let window_start = naive_end.saturating_sub(BOUNDARY_WINDOW).max(start);
    let window: String = chars[window_start..naive_end].iter().collect();

    let mut best: Option<usize> = None;
    for marker in BOUNDARY_MARKERS {
        if let Some(byte_pos) = window.rfind(marker) {
            let char_pos = window[..byte_pos].chars().count() + marker.chars().count();
            let absolute = window_start + char_pos;
            best = Some(best.map_or(absolute, |b: usize| b.max(absolute)));
        }
    }
    best.unwrap_or(naive_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text_into_chunks("").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_text_into_chunks("hello world");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn chunking_makes_forward_progress_and_covers_all_text() {
        let text = "word ".repeat(1000);
        let chunks = split_text_into_chunks(&text);
        assert!(!chunks.is_empty());
        assert!(chunks.len() > 1);
        // No chunk should be empty.
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn params_scale_with_text_length() {
        assert_eq!(ChunkParams::for_text_len(500).chunk_size, 1000);
        assert_eq!(ChunkParams::for_text_len(2_000_000).chunk_size, 2000);
        assert_eq!(ChunkParams::for_text_len(20_000_000).chunk_size, 5000);
    }

    #[test]
    fn snaps_to_sentence_boundary_when_available() {
        let text = format!("{}. {}", "a".repeat(50), "b".repeat(1000));
        let chunks = split_text_into_chunks(&text);
        assert!(chunks[0].ends_with('.') || chunks[0].len() < 1000);
    }
}
