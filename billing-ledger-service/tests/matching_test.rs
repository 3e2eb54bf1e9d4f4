use billing_ledger_service::models::{MatchStatus, MembershipStatus, Plot};
use billing_ledger_service::services::matching::{extract_tokens, normalize_number};
use billing_ledger_service::services::{MatchingPolicy, PlotMatcher};
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

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

/// Two thresholds in (0, 1] with ambiguous <= match.
fn policy() -> impl Strategy<Value = MatchingPolicy> {
    (0.05f64..=1.0, 0.05f64..=1.0).prop_map(|(x, y)| {
        let (ambiguous, matched) = if x <= y { (x, y) } else { (y, x) };
        MatchingPolicy::new(matched, ambiguous).unwrap()
    })
}

// A bare plot number scores 0.7 against a plot without a street mention.
const NUMBER_ONLY: f64 = 0.7;

proptest! {
    #[test]
    fn single_candidate_follows_thresholds(policy in policy()) {
        let plots = vec![plot("12", None), plot("40", None)];
        let outcome = PlotMatcher::new(policy)
            .match_payment(&plots, "", "dues plot 12", Decimal::ONE);

        if policy.match_threshold <= NUMBER_ONLY {
            prop_assert_eq!(outcome.match_status, MatchStatus::Matched);
            prop_assert_eq!(outcome.matched_plot_id, Some(plots[0].plot_id));
            prop_assert!(outcome.confidence >= policy.match_threshold);
        } else {
            prop_assert_eq!(outcome.match_status, MatchStatus::Unmatched);
            prop_assert_eq!(outcome.matched_plot_id, None);
        }
        prop_assert_eq!(
            outcome.candidates.is_empty(),
            policy.ambiguous_threshold > NUMBER_ONLY
        );
    }

    #[test]
    fn shared_numbers_are_never_auto_matched(policy in policy()) {
        let plots = vec![plot("5", Some("Oak street")), plot("5", Some("Pine lane"))];
        let outcome = PlotMatcher::new(policy)
            .match_payment(&plots, "", "plot 5", Decimal::ONE);

        prop_assert_eq!(outcome.matched_plot_id, None);
        if policy.ambiguous_threshold <= NUMBER_ONLY {
            prop_assert_eq!(outcome.match_status, MatchStatus::Ambiguous);
            prop_assert_eq!(outcome.candidates.len(), 2);
        } else {
            prop_assert_eq!(outcome.match_status, MatchStatus::Unmatched);
        }
    }

    #[test]
    fn non_positive_amounts_stay_unmatched(cents in -1_000_000i64..=0) {
        let plots = vec![plot("12", None)];
        let outcome = PlotMatcher::default()
            .match_payment(&plots, "", "plot 12", Decimal::new(cents, 2));
        prop_assert_eq!(outcome.match_status, MatchStatus::Unmatched);
        prop_assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn matched_implies_single_strong_candidate(
        policy in policy(),
        purpose in "(plot|lot|dues) (1|2|3|12|12a)( oak| pine)?",
    ) {
        let plots = vec![
            plot("1", Some("Oak street")),
            plot("2", Some("Pine lane")),
            plot("3", None),
            plot("12", Some("Oak street")),
            plot("12A", None),
        ];
        let outcome = PlotMatcher::new(policy).match_payment(&plots, "", &purpose, Decimal::ONE);
        if outcome.match_status == MatchStatus::Matched {
            let plot_id = outcome.matched_plot_id.unwrap();
            prop_assert_eq!(outcome.candidates.first(), Some(&plot_id));
            prop_assert!(outcome.confidence >= policy.match_threshold);
        } else {
            prop_assert_eq!(outcome.matched_plot_id, None);
        }
    }

    #[test]
    fn leading_zeros_do_not_change_plot_numbers(n in 1u32..=999, zeros in 0usize..=1) {
        let padded = format!("{}{}", "0".repeat(zeros), n);
        prop_assert_eq!(normalize_number(&padded), Some(n.to_string()));
    }
}

#[test]
fn dates_in_purpose_are_not_plot_numbers() {
    let tokens = extract_tokens("payment for 12.01.2025 plot 7");
    assert!(tokens.numbers.contains("7"));
    assert!(!tokens.numbers.contains("12"));
    assert!(!tokens.numbers.contains("2025"));
}
