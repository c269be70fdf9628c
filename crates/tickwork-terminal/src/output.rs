//! Output capping for captured process streams.
//!
//! Task logs care about how a command ended, so capping keeps the tail of the
//! stream and replaces the head with a marker.

/// Strip ANSI escapes and decode lossily.
pub fn clean(raw: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&stripped).into_owned()
}

/// Keep at most the last `max_chars` characters of `output`.
///
/// Splits on character boundaries, never inside a multi-byte sequence.
pub fn keep_tail(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let omitted = total - max_chars;
    let tail: String = output.chars().skip(omitted).collect();
    format!("[... {omitted} chars omitted ...]\n{tail}")
}
