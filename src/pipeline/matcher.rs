//! Deterministic LP and deal matching.
//!
//! Pure functions over candidate lists fetched by the caller — no I/O,
//! no side effects. Absence is `None`, never an error.

use regex::Regex;

use crate::model::{Deal, LpContact};

/// Resolve the sender address against known LP contacts.
///
/// Case-insensitive exact match; first match wins (emails are unique per
/// organization).
pub fn match_lp<'a>(from_email: &str, known_lps: &'a [LpContact]) -> Option<&'a LpContact> {
    let needle = from_email.trim().to_lowercase();
    known_lps
        .iter()
        .find(|lp| lp.email.to_lowercase() == needle)
}

/// Resolve a deal by whole-word name/company match over `search_text`
/// (subject + body).
///
/// Only draft/active deals participate. The first deal in the provided
/// ordering whose name or company name appears wins; ties are not
/// disambiguated by recency or relevance.
pub fn match_deal<'a>(search_text: &str, deals: &'a [Deal]) -> Option<&'a Deal> {
    deals
        .iter()
        .filter(|deal| deal.status.is_matchable())
        .find(|deal| {
            term_matches(&deal.name, search_text)
                || deal
                    .company_name
                    .as_deref()
                    .is_some_and(|company| term_matches(company, search_text))
        })
}

fn term_matches(term: &str, text: &str) -> bool {
    whole_word_pattern(term).is_some_and(|re| re.is_match(text))
}

/// Build a case-insensitive whole-word pattern for a deal term.
///
/// The term is literal-escaped, so punctuation in the name becomes required
/// literal characters in the text ("Acme, Inc." will not match "Acme Inc").
/// A `\b` boundary is applied only where the term's edge character is
/// alphanumeric; `\b` next to punctuation would invert its meaning.
pub(crate) fn whole_word_pattern(term: &str) -> Option<Regex> {
    let trimmed = term.trim();
    let first = trimmed.chars().next()?;
    let last = trimmed.chars().last()?;

    let mut pattern = String::from("(?i)");
    if first.is_alphanumeric() {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(trimmed));
    if last.is_alphanumeric() {
        pattern.push_str(r"\b");
    }

    Regex::new(&pattern).ok()
}
