use std::collections::BTreeSet;

/// Rank-ordered trigram profiles for the languages the harvested journals
/// publish in. Derived from common-word statistics; a profile only has to
/// separate its language from the other *expected* candidates of a journal,
/// not from every language on earth.
const PROFILES: &[(&str, &[&str])] = &[
    (
        "eng",
        &[
            " th", "the", "he ", " of", "of ", " an", "and", "nd ", " in", "in ", "ing", "ng ",
            "ion", "on ", "tio", "ati", "ent", "ed ", " to", "to ", "er ", "es ", " re", "re ",
            " co", "at ", " a ", "is ", " is", "al ", "ter", " be", "nt ", "th ", "ly ", "ver",
            "all", " on", "ons", "for", "or ", " st", "ts ", " hi", "ry ",
        ],
    ),
    (
        "ger",
        &[
            " de", "der", "er ", "en ", "ie ", " un", "und", "nd ", "die", " di", "ein", "ung",
            "ng ", "ch ", "sch", " ge", "che", "ich", "ten", " zu", "zu ", "ine", "den", "gen",
            " da", "das", "ber", " ei", "ver", "cht", "ht ", "ier", " be", "ers", "nde", "ste",
            " au", "auf", "lic", "ach", "te ", "des", " we", "it ", "hte",
        ],
    ),
    (
        "fre",
        &[
            " de", "de ", " le", "le ", "es ", "ent", "nt ", " la", "la ", "ion", "on ", "re ",
            " et", "et ", "les", "que", " qu", "ue ", "ur ", "tio", " un", "une", "ait", "eur",
            " pa", "par", "our", " po", "ais", "e d", "s d", " co", "con", "ons", "ant", "men",
            " se", "te ", "des", "ne ", "ire", " pr", "sur", "ous", "ans",
        ],
    ),
    (
        "ita",
        &[
            " di", "di ", " de", "la ", " la", "to ", "re ", "ell", "lla", "del", " co", "ion",
            "one", "ne ", "zio", "azi", " in", "in ", "che", " ch", "he ", "er ", " pe", "per",
            "no ", "ato", " un", "ti ", "ent", "i d", "e d", "con", " so", "gli", " gl", "ale",
            "nte", "ita", " si", "si ", "o d", "le ", "men", "a d", "ere",
        ],
    ),
    (
        "spa",
        &[
            " de", "de ", " la", "la ", "os ", "as ", "es ", " en", "en ", "el ", " el", "ion",
            "cio", "aci", "ent", " qu", "que", "ue ", " se", "nte", "con", " co", "sta", "ado",
            "res", "al ", "ar ", "una", "dad", " un", "n l", "e l", "del", " y ", "ara", " pa",
            "par", "a d", "o d", "ien", "cia", "los", " lo", "nes", "ada",
        ],
    ),
    (
        "lat",
        &[
            "um ", "us ", " et", "et ", "is ", " in", "in ", "tur", "que", "ue ", "rum", " qu",
            "qui", "em ", "ere", "nt ", "unt", "ibu", "bus", "tio", " es", "est", "st ", "ati",
            "one", "ius", " cu", "am ", "ur ", "it ", "tis", "ae ", " au", "aut", " no", "non",
            "nis", "ter", "ita", "ant", "era", "iam", "ent", "os ", " di",
        ],
    ),
    (
        "dut",
        &[
            " de", "de ", "en ", " he", "het", "et ", "an ", " va", "van", " ee", "een", "n d",
            "er ", "ij ", "ijk", "aar", " ge", "ing", "ng ", "sch", " me", "met", "oor", " vo",
            "voo", "nde", "den", "ver", " en", "ede", " da", "dat", "at ", " in", "in ", "te ",
            " te", "cht", "gen", "eer", "ond", "zij", " zi", "lij", "ken",
        ],
    ),
    (
        "por",
        &[
            " de", "de ", "os ", "as ", " co", "ão ", "ção", "açã", " a ", "es ", " qu", "que",
            "ue ", "do ", " do", "da ", " da", "ent", "nte", " se", "em ", " em", "ara", " pa",
            "par", "res", " es", "sta", "con", " na", "na ", " um", "uma", "ade", "dad", "o d",
            "a d", "s d", "ais", " po", "por", "men", "nto", "to ", "ida",
        ],
    ),
];

/// Penalty for a document trigram absent from a language profile.
const OUT_OF_PLACE_PENALTY: usize = 64;
/// How many of the document's most frequent trigrams enter the comparison.
const DOCUMENT_PROFILE_SIZE: usize = 64;

fn profile_for(language: &str) -> Option<&'static [&'static str]> {
    // The German library convention spells some codes differently from
    // ISO 639-2/B; accept both.
    let canonical = match language {
        "deu" => "ger",
        "fra" => "fre",
        "nld" => "dut",
        other => other,
    };
    PROFILES
        .iter()
        .find(|(code, _)| *code == canonical)
        .map(|(_, trigrams)| *trigrams)
}

fn document_trigrams(text: &str) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = std::iter::once(' ')
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            let trigram: String = window.iter().collect();
            match counts.iter_mut().find(|(t, _)| *t == trigram) {
                Some((_, n)) => *n += 1,
                None => counts.push((trigram, 1)),
            }
        }
    }
    // stable sort keeps first-seen order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(DOCUMENT_PROFILE_SIZE)
        .map(|(t, _)| t)
        .collect()
}

fn out_of_place_distance(document: &[String], profile: &[&str]) -> usize {
    document
        .iter()
        .enumerate()
        .map(|(rank, trigram)| {
            match profile.iter().position(|p| p == trigram) {
                Some(profile_rank) => rank.abs_diff(profile_rank),
                None => OUT_OF_PLACE_PENALTY,
            }
        })
        .sum()
}

/// N-gram classification of `text`, restricted to the candidate set.
/// Returns `None` when the text is empty or no candidate has a profile.
pub fn classify(text: &str, candidates: &BTreeSet<String>) -> Option<String> {
    let document = document_trigrams(text);
    if document.is_empty() {
        return None;
    }

    candidates
        .iter()
        .filter_map(|language| {
            profile_for(language).map(|profile| (language, out_of_place_distance(&document, profile)))
        })
        .min_by_key(|(_, distance)| *distance)
        .map(|(language, _)| language.clone())
}

/// Maps an ISO 639-1 code onto the bibliographic three-letter code used in
/// the generated records. Codes that are already three letters pass through.
pub fn to_bibliographic_code(code: &str) -> String {
    let lowered = code.to_lowercase();
    match lowered.as_str() {
        "en" => "eng",
        "de" => "ger",
        "fr" => "fre",
        "it" => "ita",
        "es" => "spa",
        "nl" => "dut",
        "la" => "lat",
        "pt" => "por",
        "da" => "dan",
        "sv" => "swe",
        "no" => "nor",
        "fi" => "fin",
        "el" => "gre",
        "ru" => "rus",
        "pl" => "pol",
        "cs" => "cze",
        "hu" => "hun",
        "deu" => "ger",
        "fra" => "fre",
        "nld" => "dut",
        other => return other.to_string(),
    }
    .to_string()
}

/// A language value usable without detection: a known two-letter code or
/// any three-letter code.
pub fn is_plausible_language_code(code: &str) -> bool {
    let lowered = code.to_lowercase();
    if lowered.len() == 3 && lowered.chars().all(|c| c.is_ascii_alphabetic()) {
        return true;
    }
    lowered.len() == 2 && to_bibliographic_code(&lowered).len() == 3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn classifies_english_and_german_titles() {
        let set = candidates(&["eng", "ger"]);
        assert_eq!(
            classify("The history of the church in the nineteenth century", &set),
            Some("eng".to_string())
        );
        assert_eq!(
            classify(
                "Die Geschichte der Kirche und die Entwicklung der Gemeinden",
                &set
            ),
            Some("ger".to_string())
        );
    }

    #[test]
    fn classification_is_restricted_to_candidates() {
        let set = candidates(&["fre"]);
        // clearly English text, but French is the only candidate
        assert_eq!(
            classify("The history of the church", &set),
            Some("fre".to_string())
        );
    }

    #[test]
    fn empty_text_or_unknown_candidates_yield_none() {
        assert_eq!(classify("", &candidates(&["eng"])), None);
        assert_eq!(classify("some text", &candidates(&["xyz"])), None);
    }

    #[test]
    fn maps_two_letter_codes() {
        assert_eq!(to_bibliographic_code("en"), "eng");
        assert_eq!(to_bibliographic_code("de"), "ger");
        assert_eq!(to_bibliographic_code("ger"), "ger");
        assert!(is_plausible_language_code("en"));
        assert!(is_plausible_language_code("eng"));
        assert!(!is_plausible_language_code("english"));
    }
}
