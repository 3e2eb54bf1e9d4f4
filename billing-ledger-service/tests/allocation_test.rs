mod common;

use billing_ledger_service::error::LedgerError;
use billing_ledger_service::models::{AllocationStatus, AutoAllocateRequest, UnapplyTarget};
use common::*;
use proptest::prelude::*;
use rust_decimal::Decimal;

#[test]
fn payment_fills_oldest_month_first() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "12", Some("Lipovaya"));
    let jan = add_charge(&t.ledger, plot.plot_id, "2025-01", 3000);
    let feb = add_charge(&t.ledger, plot.plot_id, "2025-02", 4000);
    let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 2, 10), 5000);

    let summary = t
        .ledger
        .auto_allocate(&AutoAllocateRequest::default(), &ctx())
        .unwrap();
    assert_eq!(summary.updated_count, 1);
    assert_eq!(summary.charges_affected, 2);
    assert_eq!(summary.total_allocated, money(5000));

    let state = t.ledger.snapshot();
    assert_eq!(state.charge(jan.charge_id).unwrap().amount_paid, money(3000));
    assert_eq!(state.charge(feb.charge_id).unwrap().amount_paid, money(2000));

    let payment = state.payment(payment.payment_id).unwrap();
    assert_eq!(payment.remaining_amount, Decimal::ZERO);
    assert_eq!(payment.allocation_status, AllocationStatus::Allocated);
}

#[test]
fn auto_allocate_twice_does_not_double_allocate() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "3", None);
    add_charge(&t.ledger, plot.plot_id, "2025-01", 1000);
    add_payment(&t.ledger, plot.plot_id, date(2025, 1, 15), 600);

    let first = t
        .ledger
        .auto_allocate(&AutoAllocateRequest::default(), &ctx())
        .unwrap();
    let totals_after_first: Vec<_> = t
        .ledger
        .snapshot()
        .payments()
        .map(|p| (p.allocated_amount, p.remaining_amount))
        .collect();

    let second = t
        .ledger
        .auto_allocate(&AutoAllocateRequest::default(), &ctx())
        .unwrap();
    let totals_after_second: Vec<_> = t
        .ledger
        .snapshot()
        .payments()
        .map(|p| (p.allocated_amount, p.remaining_amount))
        .collect();

    assert_eq!(first.total_allocated, money(600));
    assert_eq!(second.total_allocated, Decimal::ZERO);
    assert_eq!(totals_after_first, totals_after_second);
}

#[test]
fn auto_allocate_never_crosses_plots() {
    let t = ledger();
    let a = add_plot(&t.ledger, "1", None);
    let b = add_plot(&t.ledger, "2", None);
    let b_charge = add_charge(&t.ledger, b.plot_id, "2025-01", 500);
    let payment = add_payment(&t.ledger, a.plot_id, date(2025, 1, 5), 500);

    let summary = t
        .ledger
        .auto_allocate(&AutoAllocateRequest::default(), &ctx())
        .unwrap();
    assert_eq!(summary.total_allocated, Decimal::ZERO);

    let state = t.ledger.snapshot();
    assert_eq!(state.charge(b_charge.charge_id).unwrap().amount_paid, Decimal::ZERO);
    assert_eq!(state.payment(payment.payment_id).unwrap().remaining_amount, money(500));
}

#[test]
fn disabled_and_through_filters_are_respected() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "8", None);
    let jan = add_charge(&t.ledger, plot.plot_id, "2025-01", 100);
    let feb = add_charge(&t.ledger, plot.plot_id, "2025-02", 100);
    let held = add_payment(&t.ledger, plot.plot_id, date(2025, 1, 2), 100);
    add_payment(&t.ledger, plot.plot_id, date(2025, 1, 3), 300);

    t.ledger
        .set_auto_allocate_disabled(held.payment_id, true, &ctx())
        .unwrap();
    let request = AutoAllocateRequest {
        through: Some(month("2025-01")),
        ..Default::default()
    };
    let summary = t.ledger.auto_allocate(&request, &ctx()).unwrap();
    assert_eq!(summary.total_allocated, money(100));

    let state = t.ledger.snapshot();
    assert_eq!(state.charge(jan.charge_id).unwrap().amount_paid, money(100));
    assert_eq!(state.charge(feb.charge_id).unwrap().amount_paid, Decimal::ZERO);
    assert_eq!(state.payment(held.payment_id).unwrap().allocated_amount, Decimal::ZERO);
}

#[test]
fn preview_does_not_persist() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "4", None);
    add_charge(&t.ledger, plot.plot_id, "2025-01", 700);
    let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 1, 20), 1000);

    let preview = t.ledger.preview_allocation(&AutoAllocateRequest::default());
    assert_eq!(preview.total_allocated, money(700));
    assert_eq!(preview.lines.len(), 1);

    let state = t.ledger.snapshot();
    assert_eq!(state.payment(payment.payment_id).unwrap().remaining_amount, money(1000));
    assert!(state.allocations().is_empty());
}

#[test]
fn manual_allocation_beyond_remaining_is_rejected() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "5", None);
    let charge = add_charge(&t.ledger, plot.plot_id, "2025-01", 1000);
    let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 1, 20), 300);

    let err = t
        .ledger
        .manual_allocate(payment.payment_id, charge.charge_id, money(301), &ctx())
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientRemaining { .. }));

    let err = t
        .ledger
        .manual_allocate(payment.payment_id, charge.charge_id, Decimal::ZERO, &ctx())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let state = t.ledger.snapshot();
    assert!(state.allocations().is_empty());
}

#[test]
fn unapply_restores_remaining_and_keeps_history() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "6", None);
    let charge = add_charge(&t.ledger, plot.plot_id, "2025-01", 1000);
    let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 1, 20), 800);

    let summary = t
        .ledger
        .manual_allocate(payment.payment_id, charge.charge_id, money(250), &ctx())
        .unwrap();
    let allocation_id = summary.allocation_ids[0];

    let reversed = t
        .ledger
        .unapply(UnapplyTarget::Allocation(allocation_id), &ctx())
        .unwrap();
    assert_eq!(reversed.total_allocated, money(-250));

    let state = t.ledger.snapshot();
    let payment = state.payment(payment.payment_id).unwrap();
    assert_eq!(payment.remaining_amount, money(800));
    assert_eq!(payment.allocation_status, AllocationStatus::Unallocated);
    assert_eq!(state.charge(charge.charge_id).unwrap().amount_paid, Decimal::ZERO);
    // original plus its counter-entry
    assert_eq!(state.allocations().len(), 2);
    assert!(state.is_reversed(allocation_id));

    let err = t
        .ledger
        .unapply(UnapplyTarget::Allocation(allocation_id), &ctx())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn unapplying_a_payment_with_nothing_allocated_is_a_no_op() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "7", None);
    let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 1, 20), 800);

    let summary = t
        .ledger
        .unapply(UnapplyTarget::Payment(payment.payment_id), &ctx())
        .unwrap();
    assert_eq!(summary.updated_count, 0);
    assert!(summary.allocation_ids.is_empty());
}

#[test]
fn voiding_a_payment_reverses_its_allocations() {
    let t = ledger();
    let plot = add_plot(&t.ledger, "9", None);
    let charge = add_charge(&t.ledger, plot.plot_id, "2025-01", 1000);
    let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 1, 20), 400);
    t.ledger
        .auto_allocate(&AutoAllocateRequest::default(), &ctx())
        .unwrap();

    let err = t.ledger.void_payment(payment.payment_id, &ctx()).unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let voided = t
        .ledger
        .void_payment(payment.payment_id, &ctx_with_reason("bank returned the transfer"))
        .unwrap();
    assert!(voided.is_voided);
    assert_eq!(voided.allocated_amount, Decimal::ZERO);
    assert_eq!(
        t.ledger.snapshot().charge(charge.charge_id).unwrap().amount_paid,
        Decimal::ZERO
    );
}

#[derive(Debug, Clone)]
enum Step {
    Auto,
    Manual { charge: usize, amount: i64 },
    UnapplyPayment,
    UnapplyFirstOpen,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Auto),
        (0usize..3, 1i64..2000).prop_map(|(charge, amount)| Step::Manual { charge, amount }),
        Just(Step::UnapplyPayment),
        Just(Step::UnapplyFirstOpen),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn totals_are_conserved_and_never_negative(steps in prop::collection::vec(step(), 1..25)) {
        let t = ledger();
        let plot = add_plot(&t.ledger, "42", None);
        let charges = [
            add_charge(&t.ledger, plot.plot_id, "2025-01", 900),
            add_charge(&t.ledger, plot.plot_id, "2025-02", 1200),
            add_charge(&t.ledger, plot.plot_id, "2025-03", 500),
        ];
        let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 3, 1), 1500);

        for step in steps {
            // Rejections are fine; the invariants must hold either way.
            let _ = match step {
                Step::Auto => t.ledger.auto_allocate(&AutoAllocateRequest::default(), &ctx()),
                Step::Manual { charge, amount } => t.ledger.manual_allocate(
                    payment.payment_id,
                    charges[charge].charge_id,
                    money(amount),
                    &ctx(),
                ),
                Step::UnapplyPayment => t
                    .ledger
                    .unapply(UnapplyTarget::Payment(payment.payment_id), &ctx()),
                Step::UnapplyFirstOpen => {
                    let state = t.ledger.snapshot();
                    let open = state
                        .allocations_for_payment(payment.payment_id)
                        .find(|a| !a.is_reversal() && !state.is_reversed(a.allocation_id))
                        .map(|a| a.allocation_id);
                    match open {
                        Some(id) => t.ledger.unapply(UnapplyTarget::Allocation(id), &ctx()),
                        None => continue,
                    }
                }
            };

            let state = t.ledger.snapshot();
            let p = state.payment(payment.payment_id).unwrap();
            prop_assert_eq!(p.allocated_amount + p.remaining_amount, p.amount);
            prop_assert!(p.remaining_amount >= Decimal::ZERO);

            let allocated: Decimal = state
                .allocations_for_payment(payment.payment_id)
                .map(|a| a.amount)
                .sum();
            prop_assert_eq!(allocated, p.allocated_amount);

            for charge in &charges {
                let c = state.charge(charge.charge_id).unwrap();
                prop_assert!(c.amount_paid >= Decimal::ZERO);
                let paid: Decimal = state
                    .allocations_for_charge(charge.charge_id)
                    .map(|a| a.amount)
                    .sum();
                prop_assert_eq!(paid, c.amount_paid);
            }
        }
    }

    #[test]
    fn unapply_after_manual_allocation_restores_remaining(amount in 1i64..=1500) {
        let t = ledger();
        let plot = add_plot(&t.ledger, "77", None);
        let charge = add_charge(&t.ledger, plot.plot_id, "2025-01", 5000);
        let payment = add_payment(&t.ledger, plot.plot_id, date(2025, 1, 9), 1500);

        let summary = t
            .ledger
            .manual_allocate(payment.payment_id, charge.charge_id, money(amount), &ctx())
            .unwrap();
        t.ledger
            .unapply(UnapplyTarget::Allocation(summary.allocation_ids[0]), &ctx())
            .unwrap();

        let remaining = t.ledger.snapshot().payment(payment.payment_id).unwrap().remaining_amount;
        prop_assert_eq!(remaining, money(1500));
    }
}
