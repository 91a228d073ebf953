//! Text normalisation for crime narratives.
//!
//! Produces the canonical cleaned form that both the proxy labeller and the
//! embedder consume, so training and inference see identical text.
//!
//! # Algorithm
//!
//! 1. Lowercase the whole input
//! 2. Drop every character that is not an ASCII letter or whitespace
//! 3. Split on whitespace and rejoin the tokens with single spaces
//!
//! The output contains only `[a-z ]`, never starts or ends with a space and
//! never holds two consecutive spaces, so normalising it again is a no-op.

/// Normalise free text into its canonical cleaned form.
///
/// "The victim (age 32), MALE!" → "the victim age male"
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalise a possibly-missing value. Missing text normalises to `""`.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(
            normalize("The victim (age 32), MALE!"),
            "the victim age male"
        );
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize("  burglary \t at\n\n a  residence  "), "burglary at a residence");
    }

    #[test]
    fn drops_non_ascii_letters() {
        assert_eq!(normalize("café crème"), "caf crme");
    }

    #[test]
    fn digits_only_becomes_empty() {
        assert_eq!(normalize("1300 0344"), "");
    }

    #[test]
    fn missing_text_is_empty() {
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn idempotent() {
        let samples = [
            "The suspect's behavior included: theft, Unknown(9999).",
            "  MIXED case\twith\nnewlines ",
            "already clean text",
            "",
            "!!!",
            "Straße über 12 Ñandú",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    proptest! {
        #[test]
        fn normalizing_twice_changes_nothing(text in any::<String>()) {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn output_is_lowercase_words(text in "\\PC*") {
            let out = normalize(&text);
            prop_assert!(out.chars().all(|c| c.is_ascii_lowercase() || c == ' '));
            prop_assert!(!out.starts_with(' ') && !out.ends_with(' '));
            prop_assert!(!out.contains("  "));
        }
    }
}
