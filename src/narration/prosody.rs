//! Cosmetic text shaping applied to each utterance before synthesis.
//!
//! Extra spaces after punctuation and emotive exclamations make local
//! engines take slightly longer, more natural breaths. This runs per
//! fragment, after fragmentation, so it never affects fragment boundaries.

use std::sync::LazyLock;

use regex::Regex;

static EMOTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(अरे वाह|ओह हो|क्या बात है|देखो तो)!").expect("valid emotive regex")
});

static PAUSE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([?.,])").expect("valid punctuation regex"));

pub fn shape_for_speech(text: &str) -> String {
    let text = EMOTIVE.replace_all(text, "$1! ");
    PAUSE_PUNCT.replace_all(&text, "$1 ").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_follow_pause_punctuation() {
        assert_eq!(shape_for_speech("Yes,no.Why?"), "Yes, no. Why?");
    }

    #[test]
    fn emotive_exclamations_get_room() {
        assert_eq!(shape_for_speech("अरे वाह!फिर"), "अरे वाह! फिर");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(shape_for_speech("एक बार की बात है।"), "एक बार की बात है।");
    }
}
