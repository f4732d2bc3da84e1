use std::sync::LazyLock;

use regex::Regex;

/// Shorthand that TTS voices read letter by letter, with what should be said instead.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("AITAH", "Am I the asshole here?"),
    ("AITA", "Am I the asshole?"),
    ("WIBTA", "Would I be the asshole?"),
    ("TIFU", "Today I messed up"),
];

static ABBREVIATION_RES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    ABBREVIATIONS
        .iter()
        .map(|(short, long)| {
            let re = Regex::new(&format!(r"(?i)\b{short}\b\??")).unwrap();
            (re, *long)
        })
        .collect()
});

static AGE_MALE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+)[mM]\b").unwrap());
static AGE_FEMALE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+)[fF]\b").unwrap());

/// Builds the text handed to the TTS voice: title and body joined, then
/// symbols, abbreviations and age/gender shorthand spelled out.
pub fn prepare_narration(title: &str, body: &str) -> String {
    normalize(&format!("{}. {}", title.trim(), body.trim()))
}

/// How many words the voice speaks for the title. Captions skip this many
/// aligned words since the title card already shows them.
pub fn spoken_word_count(title: &str) -> usize {
    normalize(title).split_whitespace().count()
}

fn normalize(text: &str) -> String {
    let mut out = text.replace('&', " and ").replace('#', " number ");
    for (re, long) in ABBREVIATION_RES.iter() {
        out = re.replace_all(&out, *long).into_owned();
    }
    out = AGE_MALE.replace_all(&out, "$1 male").into_owned();
    out = AGE_FEMALE.replace_all(&out, "$1 female").into_owned();
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_spelled_out() {
        assert_eq!(
            prepare_narration("Me & my sister", "We were #1"),
            "Me and my sister. We were number 1"
        );
    }

    #[test]
    fn aita_expands_and_swallows_question_mark() {
        assert_eq!(
            prepare_narration("AITA for leaving?", "aita? Maybe."),
            "Am I the asshole? for leaving?. Am I the asshole? Maybe."
        );
    }

    #[test]
    fn aitah_is_not_split_into_aita() {
        assert_eq!(
            normalize("AITAH for this"),
            "Am I the asshole here? for this"
        );
    }

    #[test]
    fn age_gender_shorthand() {
        assert_eq!(
            normalize("My husband (42M) and I (23f) argued"),
            "My husband (42 male) and I (23 female) argued"
        );
        assert_eq!(normalize("I ran 5km"), "I ran 5km");
    }

    #[test]
    fn spoken_title_counts_expanded_words() {
        assert_eq!(spoken_word_count("AITA for skipping dinner"), 7);
        assert_eq!(spoken_word_count("   "), 0);
    }
}
