//! Candidate scoring and selection.
//!
//! Scores are small integers built from fixed bonuses (see `defaults`):
//! English language, preferred flag, English-speaking country, brevity, and a
//! penalty for names that read like a rank label ("rose family").

use std::cmp::Ordering;

use crate::defaults::{
    ENGLISH_COUNTRIES, ENGLISH_LANGUAGES, RANK_LABEL_WORDS, SCORE_BREVITY_WORDS, SCORE_ENGLISH,
    SCORE_ENGLISH_COUNTRY, SCORE_PREFERRED, SCORE_RANK_LABEL_PENALTY,
};
use crate::models::ScoredCandidate;

/// A missing or blank language is treated as English.
pub fn is_english(language: Option<&str>) -> bool {
    match language.map(str::trim) {
        None | Some("") => true,
        Some(lang) => ENGLISH_LANGUAGES
            .iter()
            .any(|en| en.eq_ignore_ascii_case(lang)),
    }
}

fn is_english_country(country: Option<&str>) -> bool {
    country.is_some_and(|c| {
        ENGLISH_COUNTRIES
            .iter()
            .any(|cc| cc.eq_ignore_ascii_case(c.trim()))
    })
}

/// True when a word after the first is a rank label ("Rose family", "Oak group").
pub fn looks_like_rank_label(name: &str) -> bool {
    name.split_whitespace().skip(1).any(|word| {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        RANK_LABEL_WORDS.contains(&word.as_str())
    })
}

/// Score one candidate name.
pub fn score(name: &str, preferred: bool, language: Option<&str>, country: Option<&str>) -> i32 {
    let mut s = 0;
    if is_english(language) {
        s += SCORE_ENGLISH;
    }
    if preferred {
        s += SCORE_PREFERRED;
    }
    if is_english_country(country) {
        s += SCORE_ENGLISH_COUNTRY;
    }
    let words = name.split_whitespace().count() as i32;
    s += (SCORE_BREVITY_WORDS - words).max(0);
    if looks_like_rank_label(name) {
        s -= SCORE_RANK_LABEL_PENALTY;
    }
    s
}

/// Locale tag for a candidate: `en`, `en-CC`, or the raw language code.
pub fn locale_for(language: Option<&str>, country: Option<&str>) -> String {
    if is_english(language) {
        match country.map(str::trim).filter(|c| !c.is_empty()) {
            Some(cc) => format!("en-{}", cc.to_uppercase()),
            None => "en".to_string(),
        }
    } else {
        language.map(|l| l.trim().to_lowercase()).unwrap_or_else(|| "en".to_string())
    }
}

/// Total order on scored candidates; `Greater` means `a` wins.
///
/// Higher score wins; ties go to the lexicographically smaller lowercase name,
/// then the smaller raw name, then the smaller locale.
pub fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    a.score
        .cmp(&b.score)
        .then_with(|| {
            b.candidate
                .text
                .to_lowercase()
                .cmp(&a.candidate.text.to_lowercase())
        })
        .then_with(|| b.candidate.text.cmp(&a.candidate.text))
        .then_with(|| b.locale.cmp(&a.locale))
}

/// Pick the winner of a candidate set. Independent of input order.
pub fn select_best<I>(candidates: I) -> Option<ScoredCandidate>
where
    I: IntoIterator<Item = ScoredCandidate>,
{
    candidates.into_iter().max_by(compare)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NameCandidate;

    #[test]
    fn test_scenario_african_violet() {
        let candidates = vec![
            NameCandidate::new("African Violet", "gbif")
                .preferred(true)
                .with_language("en")
                .with_country("US")
                .scored(),
            NameCandidate::new("Violeta Africana", "gbif")
                .with_language("es")
                .scored(),
        ];
        let best = select_best(candidates).unwrap();
        assert_eq!(best.candidate.text, "African Violet");
        assert_eq!(best.locale, "en-US");
        assert_eq!(best.score, 10 + 5 + 2 + 4);
    }

    #[test]
    fn test_english_three_letter_code() {
        assert_eq!(score("Dog rose", false, Some("eng"), None), 10 + 4);
        assert_eq!(score("Dog rose", false, Some("ENG"), None), 10 + 4);
    }

    #[test]
    fn test_missing_language_counts_as_english() {
        assert_eq!(score("Dog rose", false, None, None), 14);
        assert_eq!(locale_for(None, None), "en");
        assert_eq!(locale_for(Some(""), Some("gb")), "en-GB");
    }

    #[test]
    fn test_non_english_locale_is_raw_code() {
        assert_eq!(locale_for(Some("es"), Some("MX")), "es");
        assert_eq!(locale_for(Some("DE"), None), "de");
    }

    #[test]
    fn test_brevity_bonus_floors_at_zero() {
        let long = "one two three four five six seven eight";
        assert_eq!(score(long, false, Some("fr"), None), 0);
        assert_eq!(score("one", false, Some("fr"), None), 5);
    }

    #[test]
    fn test_rank_label_penalty() {
        assert!(looks_like_rank_label("Rose family"));
        assert!(looks_like_rank_label("Bramble aggregate"));
        assert!(looks_like_rank_label("Oak (group)"));
        assert!(!looks_like_rank_label("Family"));
        assert!(!looks_like_rank_label("Groupie fern"));
        assert_eq!(
            score("Rose family", false, Some("en"), None),
            10 + 4 - 3
        );
    }

    #[test]
    fn test_country_bonus() {
        assert_eq!(score("Daisy", false, Some("en"), Some("nz")), 10 + 2 + 5);
        assert_eq!(score("Daisy", false, Some("en"), Some("FR")), 10 + 5);
    }

    #[test]
    fn test_tie_break_is_order_independent() {
        let a = NameCandidate::new("Bay", "dwca").with_language("en").scored();
        let b = NameCandidate::new("Bay", "dwca")
            .with_language("en")
            .with_country("AU")
            .scored();
        let c = NameCandidate::new("Ash", "dwca").with_language("en").scored();
        // a and c tie on score; b scores higher.
        assert_eq!(a.score, c.score);

        let forward = select_best(vec![a.clone(), c.clone()]).unwrap();
        let backward = select_best(vec![c.clone(), a.clone()]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.candidate.text, "Ash");

        let best = select_best(vec![a, b, c]).unwrap();
        assert_eq!(best.locale, "en-AU");
    }

    #[test]
    fn test_select_best_empty() {
        assert!(select_best(Vec::new()).is_none());
    }
}
