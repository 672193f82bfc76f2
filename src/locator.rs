//! Fuzzy span location for approximate code snippets.
//!
//! The model quotes an "old code" snippet that often differs slightly from
//! the file's real contents (whitespace drift, stale context, typos). This
//! module finds the byte range in the real file that best matches the quoted
//! snippet, tolerating a bounded number of character edits.
//!
//! The search is a semi-global (infix) Levenshtein alignment: deletions from
//! the full text before and after the matched window are free, edits inside
//! the window are charged. Among all candidate windows the best-scoring one
//! wins, with the leftmost chosen on ties, so span selection is deterministic
//! and independent of where the scan happens to start.

use crate::error::LocatorError;

/// A half-open `[start, end)` byte range into a file's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Slices the span out of the text it was located in.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Locates the best approximate match for `partial_text` inside `full_text`.
///
/// The edit budget is `floor(len(partial_text) * threshold / 100)` character
/// edits (insertions, deletions, substitutions). A located window must also
/// score a similarity ratio of at least `threshold` against `partial_text`
/// or the match is rejected.
///
/// # Errors
///
/// Returns [`LocatorError::SpanNotFound`] when no window fits the edit
/// budget, and [`LocatorError::BelowThreshold`] when the best window's
/// similarity ratio falls short. Both signal "ask the model again".
pub fn locate(full_text: &str, partial_text: &str, threshold: u32) -> Result<Span, LocatorError> {
    if partial_text.is_empty() {
        return Err(LocatorError::EmptySnippet);
    }

    let partial: Vec<char> = partial_text.chars().collect();
    let budget = partial.len() * threshold as usize / 100;

    // Byte offset of every character boundary in the full text, so the
    // char-level alignment can be reported as a byte span.
    let mut offsets: Vec<usize> = Vec::new();
    let mut full: Vec<char> = Vec::new();
    for (off, ch) in full_text.char_indices() {
        offsets.push(off);
        full.push(ch);
    }
    offsets.push(full_text.len());

    let m = partial.len();
    let n = full.len();

    // Semi-global DP. Each cell holds (edit distance, column where the
    // matched window begins). Row 0 is all zeros: a match may start at any
    // position in the full text for free.
    let mut prev: Vec<(usize, usize)> = (0..=n).map(|j| (0, j)).collect();
    let mut cur: Vec<(usize, usize)> = vec![(0, 0); n + 1];

    for i in 1..=m {
        cur[0] = (i, 0);
        for j in 1..=n {
            let sub_cost = usize::from(partial[i - 1] != full[j - 1]);
            let diag = (prev[j - 1].0 + sub_cost, prev[j - 1].1);
            let up = (prev[j].0 + 1, prev[j].1);
            let left = (cur[j - 1].0 + 1, cur[j - 1].1);

            let mut best = diag;
            if up.0 < best.0 {
                best = up;
            }
            if left.0 < best.0 {
                best = left;
            }
            cur[j] = best;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    // Scan the final row for the minimal distance; on ties prefer the
    // leftmost window start, then the shortest window.
    let mut best: Option<(usize, usize, usize)> = None; // (dist, start_col, end_col)
    for (j, &(dist, start)) in prev.iter().enumerate() {
        let candidate = (dist, start, j);
        match best {
            None => best = Some(candidate),
            Some(b) if candidate < b => best = Some(candidate),
            _ => {}
        }
    }
    let (dist, start_col, end_col) = best.expect("DP row is never empty");

    if dist > budget {
        return Err(LocatorError::SpanNotFound { budget });
    }

    let window_len = end_col - start_col;
    let ratio = ratio_from_distance(dist, window_len.max(m));
    if ratio < threshold {
        return Err(LocatorError::BelowThreshold { ratio, threshold });
    }

    Ok(Span {
        start: offsets[start_col],
        end: offsets[end_col],
    })
}

/// Normalized Levenshtein similarity between two strings, 0-100.
pub fn similarity_ratio(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 100;
    }
    ratio_from_distance(levenshtein(&a_chars, &b_chars), max_len)
}

fn ratio_from_distance(dist: usize, max_len: usize) -> u32 {
    if max_len == 0 {
        return 100;
    }
    ((max_len.saturating_sub(dist)) * 100 / max_len) as u32
}

/// Plain Levenshtein distance over character slices.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur: Vec<usize> = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let sub_cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + sub_cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
