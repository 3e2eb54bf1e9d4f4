//! Payment-to-plot matching.
//!
//! Plot-identifying tokens are pulled from the purpose text first and from the
//! payer name only when the purpose yields nothing usable. Each registry plot
//! is scored by token overlap and the scores are turned into a match status
//! using the configured thresholds.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{MatchStatus, Plot};

/// Plot number and street both named.
const SCORE_NUMBER_AND_STREET: f64 = 1.0;
/// Plot number named, no street mentioned at all.
const SCORE_NUMBER_ONLY: f64 = 0.7;
/// Plot number named together with a different registry street.
const SCORE_NUMBER_OTHER_STREET: f64 = 0.4;
const SCORE_STREET_ONLY: f64 = 0.3;
/// Confidence discount for tokens taken from the payer name.
const PAYER_FALLBACK_FACTOR: f64 = 0.9;

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,4}[./-]\d{1,2}[./-]\d{1,4}\b").expect("date pattern is valid")
});

static MONEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+[.,]\d{2}\b").expect("money pattern is valid"));

/// Street designators that say nothing about which street is meant.
const STREET_NOISE: &[&str] = &[
    "street", "lane", "road", "avenue", "улица", "переулок", "проезд", "проспект", "линия",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchingPolicy {
    pub match_threshold: f64,
    pub ambiguous_threshold: f64,
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            match_threshold: 0.6,
            ambiguous_threshold: 0.3,
        }
    }
}

impl MatchingPolicy {
    pub fn new(match_threshold: f64, ambiguous_threshold: f64) -> LedgerResult<Self> {
        let in_range = |v: f64| v > 0.0 && v <= 1.0;
        if !in_range(match_threshold) || !in_range(ambiguous_threshold) {
            return Err(LedgerError::validation(
                "match thresholds must lie in (0, 1]",
            ));
        }
        if ambiguous_threshold > match_threshold {
            return Err(LedgerError::validation(
                "ambiguous threshold must not exceed the match threshold",
            ));
        }
        Ok(Self {
            match_threshold,
            ambiguous_threshold,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub match_status: MatchStatus,
    pub matched_plot_id: Option<Uuid>,
    /// Plots that cleared the ambiguous threshold, best first.
    pub candidates: Vec<Uuid>,
    pub confidence: f64,
    pub reason: String,
}

impl MatchOutcome {
    fn unmatched(reason: impl Into<String>) -> Self {
        Self {
            match_status: MatchStatus::Unmatched,
            matched_plot_id: None,
            candidates: Vec::new(),
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// Normalized tokens found in a piece of free text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub numbers: BTreeSet<String>,
    pub stems: BTreeSet<String>,
}

impl Tokens {
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty() && self.stems.is_empty()
    }
}

/// Extract plot numbers and word stems, ignoring dates and money amounts.
pub fn extract_tokens(text: &str) -> Tokens {
    let lowered = text.to_lowercase();
    let without_dates = DATE_RE.replace_all(&lowered, " ");
    let cleaned = MONEY_RE.replace_all(&without_dates, " ");

    let mut tokens = Tokens::default();
    for raw in cleaned.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        if let Some(number) = normalize_number(raw) {
            tokens.numbers.insert(number);
        } else if raw.chars().count() >= 3 && raw.chars().all(char::is_alphabetic) {
            tokens.stems.insert(stem(raw));
        }
    }
    tokens
}

/// `"012A"` → `"12a"`. Accepts up to four digits with an optional one-letter
/// suffix; anything else is not a plot number.
pub fn normalize_number(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let digits: String = lowered.chars().take_while(char::is_ascii_digit).collect();
    let suffix = &lowered[digits.len()..];
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    if suffix.chars().count() > 1 || !suffix.chars().all(char::is_alphabetic) {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    let number = if trimmed.is_empty() { "0" } else { trimmed };
    Some(format!("{}{}", number, suffix))
}

/// Crude stem so that inflected street names still compare equal.
fn stem(word: &str) -> String {
    let len = word.chars().count();
    if len <= 4 {
        word.to_string()
    } else {
        word.chars().take((len - 2).max(4)).collect()
    }
}

fn street_stems(street: &str) -> BTreeSet<String> {
    extract_tokens(street)
        .stems
        .into_iter()
        .filter(|s| !STREET_NOISE.iter().any(|noise| stem(noise) == *s))
        .collect()
}

struct PlotKey {
    plot_id: Uuid,
    label: String,
    number: Option<String>,
    streets: BTreeSet<String>,
}

/// Match keys of the active registry plots, built once and reused for every
/// payment of an import.
pub struct PreparedRegistry {
    keys: Vec<PlotKey>,
    streets: BTreeSet<String>,
}

impl PreparedRegistry {
    /// Archived plots are left out, so they are never proposed.
    pub fn new<'a, I>(plots: I) -> Self
    where
        I: IntoIterator<Item = &'a Plot>,
    {
        let keys: Vec<PlotKey> = plots
            .into_iter()
            .filter(|p| !p.archived)
            .map(|plot| PlotKey {
                plot_id: plot.plot_id,
                label: plot.label.clone(),
                number: normalize_number(&plot.number),
                streets: plot.street.as_deref().map(street_stems).unwrap_or_default(),
            })
            .collect();
        let streets = keys.iter().flat_map(|k| k.streets.iter().cloned()).collect();
        Self { keys, streets }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn score_all(&self, tokens: &Tokens) -> Vec<(&PlotKey, f64)> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let mentions_registry_street = self.streets.iter().any(|s| tokens.stems.contains(s));
        self.keys
            .iter()
            .filter_map(|key| {
                let number_hit = key
                    .number
                    .as_ref()
                    .is_some_and(|n| tokens.numbers.contains(n));
                let street_hit = key.streets.iter().any(|s| tokens.stems.contains(s));
                let score = match (number_hit, street_hit) {
                    (true, true) => SCORE_NUMBER_AND_STREET,
                    (true, false) if mentions_registry_street => SCORE_NUMBER_OTHER_STREET,
                    (true, false) => SCORE_NUMBER_ONLY,
                    (false, true) => SCORE_STREET_ONLY,
                    (false, false) => return None,
                };
                Some((key, score))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlotMatcher {
    policy: MatchingPolicy,
}

impl PlotMatcher {
    pub fn new(policy: MatchingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchingPolicy {
        self.policy
    }

    /// Match one payment against the plot registry. Archived plots are never
    /// proposed. Pure: nothing is persisted.
    pub fn match_payment<'a, I>(
        &self,
        plots: I,
        payer: &str,
        purpose: &str,
        amount: Decimal,
    ) -> MatchOutcome
    where
        I: IntoIterator<Item = &'a Plot>,
    {
        self.match_prepared(&PreparedRegistry::new(plots), payer, purpose, amount)
    }

    /// Same as [`match_payment`](Self::match_payment) against keys built
    /// beforehand.
    pub fn match_prepared(
        &self,
        registry: &PreparedRegistry,
        payer: &str,
        purpose: &str,
        amount: Decimal,
    ) -> MatchOutcome {
        if amount <= Decimal::ZERO {
            return MatchOutcome::unmatched("non-positive amount is never matched");
        }

        let (source, factor, scored) = match registry.score_all(&extract_tokens(purpose)) {
            scored if !scored.is_empty() => ("purpose", 1.0, scored),
            _ => (
                "payer",
                PAYER_FALLBACK_FACTOR,
                registry.score_all(&extract_tokens(payer)),
            ),
        };
        if scored.is_empty() {
            return MatchOutcome::unmatched("no plot number or street recognised");
        }

        let mut ranked: Vec<(&PlotKey, f64)> = scored
            .into_iter()
            .map(|(key, score)| (key, score * factor))
            .filter(|(_, score)| *score >= self.policy.ambiguous_threshold)
            .collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.plot_id.cmp(&b.0.plot_id))
        });

        let strong: Vec<&(&PlotKey, f64)> = ranked
            .iter()
            .filter(|(_, score)| *score >= self.policy.match_threshold)
            .collect();
        let candidates: Vec<Uuid> = ranked.iter().map(|(k, _)| k.plot_id).collect();
        let confidence = ranked.first().map(|(_, s)| *s).unwrap_or(0.0);

        match (strong.as_slice(), ranked.len()) {
            ([(key, score)], _) => MatchOutcome {
                match_status: MatchStatus::Matched,
                matched_plot_id: Some(key.plot_id),
                candidates,
                confidence: *score,
                reason: format!("plot {} recognised in {}", key.label, source),
            },
            (_, n) if n >= 2 => MatchOutcome {
                match_status: MatchStatus::Ambiguous,
                matched_plot_id: None,
                candidates,
                confidence,
                reason: format!("{} plots fit the {} text", n, source),
            },
            _ => MatchOutcome {
                match_status: MatchStatus::Unmatched,
                matched_plot_id: None,
                candidates,
                confidence,
                reason: format!("no plot clears the match threshold from {}", source),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MembershipStatus;
    use chrono::Utc;

    fn plot(number: &str, street: Option<&str>) -> Plot {
        let now = Utc::now();
        Plot {
            plot_id: Uuid::new_v4(),
            number: number.to_string(),
            street: street.map(str::to_string),
            label: number.to_string(),
            owner_name: None,
            contact: None,
            membership: MembershipStatus::Member,
            archived: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn tokens_skip_dates_and_amounts() {
        let tokens = extract_tokens("Membership fee plot 012 for 01.02.2025, 5000.00 RUB");
        assert_eq!(tokens.numbers, BTreeSet::from(["12".to_string()]));
        assert!(tokens.stems.contains(&stem("membership")));
    }

    #[test]
    fn plot_numbers_normalize() {
        assert_eq!(normalize_number("007"), Some("7".to_string()));
        assert_eq!(normalize_number("12A"), Some("12a".to_string()));
        assert_eq!(normalize_number("12345"), None);
        assert_eq!(normalize_number("12ab"), None);
    }

    #[test]
    fn number_in_purpose_matches_single_plot() {
        let plots = vec![plot("12", Some("Oak street")), plot("14", Some("Oak street"))];
        let outcome = PlotMatcher::default().match_payment(
            &plots,
            "Ivanov",
            "dues plot 12",
            Decimal::new(5000, 0),
        );
        assert_eq!(outcome.match_status, MatchStatus::Matched);
        assert_eq!(outcome.matched_plot_id, Some(plots[0].plot_id));
    }

    #[test]
    fn street_disambiguates_shared_numbers() {
        let plots = vec![plot("5", Some("Oak street")), plot("5", Some("Pine lane"))];
        let matcher = PlotMatcher::default();

        let both = matcher.match_payment(&plots, "", "plot 5", Decimal::ONE);
        assert_eq!(both.match_status, MatchStatus::Ambiguous);
        assert_eq!(both.candidates.len(), 2);

        let pine = matcher.match_payment(&plots, "", "Pine 5", Decimal::ONE);
        assert_eq!(pine.match_status, MatchStatus::Matched);
        assert_eq!(pine.matched_plot_id, Some(plots[1].plot_id));
    }

    #[test]
    fn payer_is_used_only_as_fallback() {
        let plots = vec![plot("3", None), plot("9", None)];
        let outcome =
            PlotMatcher::default().match_payment(&plots, "Owner of plot 9", "", Decimal::ONE);
        assert_eq!(outcome.match_status, MatchStatus::Matched);
        assert_eq!(outcome.matched_plot_id, Some(plots[1].plot_id));
        assert!((outcome.confidence - SCORE_NUMBER_ONLY * PAYER_FALLBACK_FACTOR).abs() < 1e-9);
    }

    #[test]
    fn archived_plots_are_not_candidates() {
        let mut archived = plot("4", None);
        archived.archived = true;
        let outcome = PlotMatcher::default().match_payment(
            std::iter::once(&archived),
            "",
            "plot 4",
            Decimal::ONE,
        );
        assert_eq!(outcome.match_status, MatchStatus::Unmatched);
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn inconsistent_thresholds_are_rejected() {
        assert!(MatchingPolicy::new(0.3, 0.6).is_err());
        assert!(MatchingPolicy::new(1.5, 0.3).is_err());
        assert!(MatchingPolicy::new(0.6, 0.3).is_ok());
    }

    #[test]
    fn prepared_registry_matches_like_the_plain_call() {
        let mut archived = plot("8", None);
        archived.archived = true;
        let plots = vec![plot("5", Some("Oak street")), plot("5", Some("Pine lane")), archived];
        let registry = PreparedRegistry::new(&plots);
        assert_eq!(registry.len(), 2);

        let matcher = PlotMatcher::default();
        for purpose in ["plot 5", "Pine 5", "Oak street", "plot 8", "donation"] {
            assert_eq!(
                matcher.match_prepared(&registry, "", purpose, Decimal::ONE),
                matcher.match_payment(&plots, "", purpose, Decimal::ONE),
            );
        }
    }
}
