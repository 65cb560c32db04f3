//! Captured-output truncation.
//!
//! Script output is unbounded (a payload can `print` in a loop for an hour)
//! while execution records are meant to stay queryable. Truncation keeps
//! the head and the tail of the output: the head shows how the run started,
//! the tail holds the final result or error.

/// Truncate `output` to at most `max_chars` characters, replacing the
/// middle with an omission marker.
///
/// The cut points fall on character boundaries, never inside a multi-byte
/// sequence.
pub fn clip_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head: String = output.chars().take(half).collect();
    let tail_start = total - half;
    let tail: String = output.chars().skip(tail_start).collect();
    let omitted = total - 2 * half;

    format!("{head}\n... [{omitted} chars omitted] ...\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        assert_eq!(clip_output("ok\n", 100), "ok\n");
        assert_eq!(clip_output("", 100), "");
    }

    #[test]
    fn exact_length_untouched() {
        let s = "y".repeat(50);
        assert_eq!(clip_output(&s, 50), s);
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let input = format!("{}{}{}", "A".repeat(100), "B".repeat(500), "C".repeat(100));
        let clipped = clip_output(&input, 200);

        assert!(clipped.starts_with('A'));
        assert!(clipped.ends_with('C'));
        assert!(clipped.contains("chars omitted"));
        assert!(clipped.len() < input.len());
    }

    #[test]
    fn omitted_count_is_reported() {
        let s = "x".repeat(300);
        let clipped = clip_output(&s, 100);
        assert!(clipped.contains("[200 chars omitted]"));
    }

    #[test]
    fn multibyte_output_does_not_panic() {
        let s = "汉".repeat(500);
        let clipped = clip_output(&s, 100);
        assert!(clipped.contains("chars omitted"));
    }
}
