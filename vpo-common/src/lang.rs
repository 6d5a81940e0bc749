//! Language code normalization.
//!
//! Track languages are stored in a canonical three-letter form so that
//! policy preferences (`["eng", "jpn"]`) compare reliably against probe
//! output, which mixes two-letter codes, ISO 639-2/B codes and 639-2/T
//! codes. Unrecognized codes pass through unchanged; they are never
//! replaced with an "undefined" marker.

/// Normalize a language code to its canonical three-letter form.
pub fn normalize_language(code: &str) -> String {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return code.to_string();
    }
    match canonical(&trimmed.to_ascii_lowercase()) {
        Some(c) => c.to_string(),
        None => code.to_string(),
    }
}

/// True when two codes refer to the same language after normalization.
pub fn language_matches(a: &str, b: &str) -> bool {
    normalize_language(a).eq_ignore_ascii_case(&normalize_language(b))
}

fn canonical(code: &str) -> Option<&'static str> {
    let c = match code {
        "en" | "eng" => "eng",
        "ja" | "jp" | "jpn" => "jpn",
        "fr" | "fre" | "fra" => "fra",
        "de" | "ger" | "deu" => "deu",
        "es" | "spa" => "spa",
        "it" | "ita" => "ita",
        "pt" | "por" => "por",
        "ru" | "rus" => "rus",
        "zh" | "chi" | "zho" => "zho",
        "ko" | "kor" => "kor",
        "nl" | "dut" | "nld" => "nld",
        "sv" | "swe" => "swe",
        "no" | "nor" => "nor",
        "da" | "dan" => "dan",
        "fi" | "fin" => "fin",
        "pl" | "pol" => "pol",
        "cs" | "cze" | "ces" => "ces",
        "hu" | "hun" => "hun",
        "tr" | "tur" => "tur",
        "ar" | "ara" => "ara",
        "he" | "heb" => "heb",
        "hi" | "hin" => "hin",
        "th" | "tha" => "tha",
        "vi" | "vie" => "vie",
        "uk" | "ukr" => "ukr",
        "el" | "gre" | "ell" => "ell",
        "ro" | "rum" | "ron" => "ron",
        "id" | "ind" => "ind",
        "ms" | "may" | "msa" => "msa",
        "und" => "und",
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_letter_codes_normalize() {
        assert_eq!(normalize_language("en"), "eng");
        assert_eq!(normalize_language("ja"), "jpn");
        assert_eq!(normalize_language("fr"), "fra");
    }

    #[test]
    fn bibliographic_codes_normalize_to_terminology() {
        assert_eq!(normalize_language("fre"), "fra");
        assert_eq!(normalize_language("ger"), "deu");
        assert_eq!(normalize_language("chi"), "zho");
    }

    #[test]
    fn canonical_codes_are_stable() {
        assert_eq!(normalize_language("eng"), "eng");
        assert_eq!(normalize_language("jpn"), "jpn");
    }

    #[test]
    fn unrecognized_codes_pass_through() {
        assert_eq!(normalize_language("tlh"), "tlh");
        assert_eq!(normalize_language("x-fan"), "x-fan");
        assert_eq!(normalize_language(""), "");
    }

    #[test]
    fn matching_is_alias_aware() {
        assert!(language_matches("en", "eng"));
        assert!(language_matches("FRE", "fra"));
        assert!(!language_matches("eng", "jpn"));
    }
}
