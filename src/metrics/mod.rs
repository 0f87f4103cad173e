//! Text metrics comparing a transcription with its ground truth.
//!
//! Everything here is pure and allocation-local, so it can be called from any
//! number of worker threads at once.

pub mod diff;

use strsim::{generic_levenshtein, levenshtein};

use crate::core::model::TextDiff;

pub use diff::diff_chars;

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub diff: TextDiff,
    pub word_error_rate: f64,
    pub char_error_rate: f64,
    pub accuracy: f64,
}

/// Scores `prediction` against `ground_truth`.
///
/// Both sides lose a single trailing newline first. WER and CER are edit
/// distances over the reference length; accuracy is the matched-character
/// ratio of the alignment and is independent of the two error rates.
pub fn score(ground_truth: &str, prediction: &str) -> Score {
    let expected = normalize(ground_truth);
    let actual = normalize(prediction);

    let diff = diff_chars(expected, actual);
    let accuracy = accuracy(&diff, expected.chars().count(), actual.chars().count());

    Score {
        word_error_rate: word_error_rate(expected, actual),
        char_error_rate: char_error_rate(expected, actual),
        accuracy,
        diff,
    }
}

/// Strips exactly one trailing line break. Internal whitespace is untouched.
pub fn normalize(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

pub fn word_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let ref_words: Vec<&str> = reference.split_whitespace().collect();
    let hyp_words: Vec<&str> = hypothesis.split_whitespace().collect();
    let distance = generic_levenshtein(&ref_words, &hyp_words);
    error_rate(distance, ref_words.len(), hyp_words.is_empty())
}

pub fn char_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let distance = levenshtein(reference, hypothesis);
    error_rate(distance, reference.chars().count(), hypothesis.is_empty())
}

// An empty reference scores 0 against an empty hypothesis and 1 otherwise.
fn error_rate(distance: usize, reference_len: usize, hypothesis_empty: bool) -> f64 {
    if reference_len == 0 {
        return if hypothesis_empty { 0.0 } else { 1.0 };
    }
    distance as f64 / reference_len as f64
}

fn accuracy(diff: &TextDiff, expected_len: usize, actual_len: usize) -> f64 {
    let total = expected_len + actual_len;
    if total == 0 {
        return 1.0;
    }
    (2 * diff.matched_chars()) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_strings_score_perfectly() {
        let s = score("THE CAT", "THE CAT");
        assert_eq!(s.accuracy, 1.0);
        assert_eq!(s.word_error_rate, 0.0);
        assert_eq!(s.char_error_rate, 0.0);
    }

    #[test]
    fn one_substituted_word() {
        let s = score("THE CAT", "THE DOG");
        assert!(close(s.word_error_rate, 0.5));
        assert!(close(s.char_error_rate, 3.0 / 7.0));
        assert!(s.accuracy < 1.0);
        assert!(close(s.accuracy, 8.0 / 14.0));
    }

    #[test]
    fn empty_reference_is_defined() {
        let s = score("", "");
        assert_eq!(s.word_error_rate, 0.0);
        assert_eq!(s.char_error_rate, 0.0);
        assert_eq!(s.accuracy, 1.0);

        let s = score("", "noise");
        assert_eq!(s.word_error_rate, 1.0);
        assert_eq!(s.char_error_rate, 1.0);
        assert_eq!(s.accuracy, 0.0);
    }

    #[test]
    fn single_trailing_newline_is_ignored() {
        assert_eq!(score("THE CAT\n", "THE CAT").char_error_rate, 0.0);
        assert_eq!(score("THE CAT\r\n", "THE CAT\n").accuracy, 1.0);
        // only one newline is stripped
        assert!(score("THE CAT\n\n", "THE CAT").char_error_rate > 0.0);
        assert_eq!(normalize("a \n"), "a ");
    }

    #[test]
    fn error_rates_can_exceed_one_but_accuracy_cannot() {
        let s = score("a", "completely different words here");
        assert!(s.word_error_rate > 1.0);
        assert!(s.char_error_rate > 1.0);
        assert!((0.0..=1.0).contains(&s.accuracy));
    }

    #[test]
    fn metric_families_can_disagree() {
        // word order swap: every word is wrong by position but most
        // characters still align
        let s = score("alpha beta", "beta alpha");
        assert_eq!(s.word_error_rate, 1.0);
        assert!(s.accuracy > 0.4);
    }

    #[test]
    fn ranges_hold_over_assorted_pairs() {
        let pairs = [
            ("", "x"),
            ("x", ""),
            ("Ein ſchoͤnes Buch", "Ein schönes Buch"),
            ("  spaced  out ", "spaced out"),
            ("line one\nline two", "line one line two"),
        ];
        for (gt, pred) in pairs {
            let s = score(gt, pred);
            assert!((0.0..=1.0).contains(&s.accuracy), "{gt:?} / {pred:?}");
            assert!(s.word_error_rate >= 0.0);
            assert!(s.char_error_rate >= 0.0);
        }
    }
}
