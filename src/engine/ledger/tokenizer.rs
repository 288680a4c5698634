// ── Ledger: Keyword Tokenizer ───────────────────────────────────────────────
//
// Lexical side of the ledger: query keywords, the default keyword extractor,
// token-set Jaccard (the content-similarity fallback when either side lacks
// an embedding) and term counting for the inverted index.
//
// Tokens are lowercased runs of letters/digits/underscore. Stopwords and
// tokens shorter than MIN_KEYWORD_LEN are dropped.

use crate::atoms::constants::{MIN_KEYWORD_LEN, STOPWORDS};
use crate::atoms::traits::KeywordExtractor;
use log::warn;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| match Regex::new(r"[\p{L}\p{N}_]+") {
    Ok(re) => Some(re),
    Err(e) => {
        warn!("[ledger:tokenizer] Failed to compile token pattern: {}", e);
        None
    }
});

/// Every token in order, duplicates kept. Used for term frequencies.
pub(crate) fn tokens(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let raw: Vec<&str> = match TOKEN_RE.as_ref() {
        Some(re) => re.find_iter(&lowered).map(|m| m.as_str()).collect(),
        None => lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .collect(),
    };
    raw.into_iter()
        .filter(|t| t.chars().count() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Distinct tokens, first-occurrence order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Lowercase and trim caller-supplied labels, dropping blanks.
pub(crate) fn normalize_labels(labels: &[String]) -> BTreeSet<String> {
    labels
        .iter()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect()
}

/// |A ∩ B| / |A ∪ B| over token sets. 0.0 when both are empty.
pub(crate) fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Term frequencies over the block's context tokens plus its explicit keywords.
pub(crate) fn term_frequencies<'a>(
    context: &str,
    keywords: impl IntoIterator<Item = &'a String>,
) -> HashMap<String, u32> {
    let mut tf: HashMap<String, u32> = HashMap::new();
    for token in tokens(context) {
        *tf.entry(token).or_default() += 1;
    }
    for kw in keywords {
        let kw = kw.trim().to_lowercase();
        if !kw.is_empty() {
            *tf.entry(kw).or_default() += 1;
        }
    }
    tf
}

/// Default `KeywordExtractor`: the tokenizer above.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleKeywordExtractor;

impl KeywordExtractor for SimpleKeywordExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        extract_keywords(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_drops_stopwords_and_short_tokens() {
        let kws = extract_keywords("How does the JWT login endpoint work? A JWT!");
        assert_eq!(kws, vec!["jwt", "login", "endpoint", "work"]);
    }

    #[test]
    fn test_tokens_keep_duplicates() {
        assert_eq!(tokens("auth auth service"), vec!["auth", "auth", "service"]);
    }

    #[test]
    fn test_unicode_tokens() {
        assert_eq!(extract_keywords("Größe café_au_lait"), vec!["größe", "café_au_lait"]);
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
        assert!((jaccard(&set(&["a", "b"]), &set(&["b", "c"])) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&set(&["x"]), &set(&["x"])), 1.0);
    }

    #[test]
    fn test_term_frequencies_count_context_and_keywords() {
        let kws = vec!["Auth".to_string()];
        let tf = term_frequencies("auth service auth", &kws);
        assert_eq!(tf["auth"], 3);
        assert_eq!(tf["service"], 1);
    }

    #[test]
    fn test_normalize_labels() {
        let got = normalize_labels(&[" Rust ".into(), "".into(), "rust".into(), "SQL".into()]);
        assert_eq!(got, set(&["rust", "sql"]));
    }
}
