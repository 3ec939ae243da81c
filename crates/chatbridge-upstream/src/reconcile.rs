//! Incremental delta extraction.
//!
//! The upstream does not promise a consistent framing: text frames may carry
//! the full message so far, only the newest tokens, or a partially rewritten
//! tail. [`Reconciler`] keeps everything already sent to the client and turns
//! each new frame into the part the client has not seen, never repeating
//! text that was already emitted.

/// Shortest suffix of the sent text (in chars) trusted as an anchor.
pub const DEFAULT_MIN_SUFFIX_MATCH: usize = 8;

#[derive(Debug, Clone)]
pub struct Reconciler {
    sent_total: String,
    last_frame: Option<String>,
    min_suffix_match: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SUFFIX_MATCH)
    }
}

impl Reconciler {
    pub fn new(min_suffix_match: usize) -> Self {
        Self {
            sent_total: String::new(),
            last_frame: None,
            min_suffix_match: min_suffix_match.max(1),
        }
    }

    /// Everything emitted so far.
    pub fn sent_total(&self) -> &str {
        &self.sent_total
    }

    /// Compute the delta for `frame`, record it as sent and return it.
    pub fn push_frame(&mut self, frame: &str) -> String {
        let delta = match &self.last_frame {
            None => frame.to_string(),
            Some(previous) => self.delta_against(previous, frame),
        };
        self.sent_total.push_str(&delta);
        self.last_frame = Some(frame.to_string());
        delta
    }

    fn delta_against(&self, previous: &str, frame: &str) -> String {
        let sent = self.sent_total.as_str();

        // Everything sent so far reappears: cumulative framing.
        if !sent.is_empty() {
            if let Some(rest) = frame.strip_prefix(sent) {
                return rest.to_string();
            }
            if let Some(idx) = frame.rfind(sent) {
                return frame[idx + sent.len()..].to_string();
            }
        }

        // The tail of what was sent reappears: the frame overlaps it.
        if let Some(anchor) = self.longest_sent_suffix_in(frame) {
            if let Some(idx) = frame.rfind(anchor) {
                return frame[idx + anchor.len()..].to_string();
            }
        }

        let common = common_prefix_len(previous, frame);
        let candidate = &frame[common..];
        if candidate.is_empty() || !sent.contains(candidate) {
            return candidate.to_string();
        }

        // The remainder is text the client already has; only emit a tail of
        // the frame that has never been sent.
        shortest_unsent_suffix(sent, frame).unwrap_or_default().to_string()
    }

    /// Longest proper suffix of `sent_total`, at least `min_suffix_match`
    /// chars long, that occurs in `frame`.
    fn longest_sent_suffix_in<'a>(&'a self, frame: &str) -> Option<&'a str> {
        let sent = self.sent_total.as_str();
        let total = sent.chars().count();
        if total <= self.min_suffix_match {
            return None;
        }

        // If a suffix occurs in the frame, every shorter suffix does too.
        let (mut lo, mut hi) = (self.min_suffix_match, total - 1);
        if !frame.contains(suffix_chars(sent, lo)) {
            return None;
        }
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if frame.contains(suffix_chars(sent, mid)) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Some(suffix_chars(sent, lo))
    }
}

/// Shortest suffix of `frame` that does not occur in `sent`.
fn shortest_unsent_suffix<'a>(sent: &str, frame: &'a str) -> Option<&'a str> {
    let total = frame.chars().count();
    if total == 0 || sent.contains(frame) {
        return None;
    }

    // If a suffix is absent from `sent`, every longer suffix is too.
    let (mut lo, mut hi) = (1, total);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if sent.contains(suffix_chars(frame, mid)) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Some(suffix_chars(frame, lo))
}

/// The last `n` chars of `s`.
fn suffix_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Byte length of the longest common prefix, on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}
