//! Fixed-size overlapping windows over extracted document text.
//!
//! Window sizes and offsets count Unicode scalar values (`char`s), so a
//! multi-byte code point is never split across two chunks.

use std::ops::Range;

use common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub window: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window: 800,
            overlap: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn new(window: usize, overlap: usize) -> Result<Self, AppError> {
        let config = Self { window, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.window == 0 {
            return Err(AppError::Validation(
                "chunk window must be greater than zero".into(),
            ));
        }
        if self.overlap >= self.window {
            return Err(AppError::Validation(format!(
                "chunk overlap ({}) must be smaller than the window ({})",
                self.overlap, self.window
            )));
        }
        Ok(())
    }

    /// Distance between the starts of consecutive windows.
    pub fn stride(&self) -> usize {
        self.window.saturating_sub(self.overlap).max(1)
    }
}

/// Code-point ranges of each chunk.
///
/// One window per step: windows start at every multiple of
/// `window - overlap` below the text length, so the trailing windows may be
/// shorter than `window`. Empty text yields no chunks.
pub fn chunk_spans(
    text: &str,
    window: usize,
    overlap: usize,
) -> Result<Vec<Range<usize>>, AppError> {
    let config = ChunkingConfig::new(window, overlap)?;
    let total = text.chars().count();
    let stride = config.stride();

    let mut spans = Vec::with_capacity(total.div_ceil(stride));
    let mut start = 0usize;
    while start < total {
        let end = start.saturating_add(window).min(total);
        spans.push(start..end);
        start = start.saturating_add(stride);
    }

    Ok(spans)
}

/// Splits `text` into overlapping windows; see [`chunk_spans`].
pub fn split(text: &str, window: usize, overlap: usize) -> Result<Vec<String>, AppError> {
    let spans = chunk_spans(text, window, overlap)?;

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();

    spans
        .into_iter()
        .map(|span| {
            let start = boundaries.get(span.start).copied();
            let end = boundaries.get(span.end).copied();
            match (start, end) {
                (Some(start), Some(end)) => text
                    .get(start..end)
                    .map(str::to_owned)
                    .ok_or_else(|| AppError::InternalError("chunk is not on a char boundary".into())),
                _ => Err(AppError::InternalError("chunk span out of range".into())),
            }
        })
        .collect()
}
