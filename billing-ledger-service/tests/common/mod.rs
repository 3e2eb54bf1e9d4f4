//! Common test utilities for billing-ledger-service integration tests.
#![allow(dead_code)]

use billing_ledger_service::config::BillingLedgerConfig;
use billing_ledger_service::models::{
    BillingMonth, Charge, ChargeCategory, MembershipStatus, NewCharge, NewPayment, Payment,
    PaymentMethod, Plot, UpsertPlot,
};
use billing_ledger_service::services::{
    BillingLedger, InMemoryLedgerStore, ManualClock, MutationContext, PlotMatcher,
};
use billing_ledger_service::startup::{Application, Ledger};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,billing_ledger_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const ACTOR: &str = "treasurer";

pub struct TestLedger {
    pub ledger: Ledger,
    pub clock: Arc<ManualClock>,
}

/// An empty ledger whose clock stands at 2025-03-01.
pub fn ledger() -> TestLedger {
    init_tracing();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let ledger = BillingLedger::new(
        Arc::new(InMemoryLedgerStore::new()),
        clock.clone(),
        PlotMatcher::default(),
        "daily-v1".to_string(),
    );
    TestLedger { ledger, clock }
}

pub fn ctx() -> MutationContext {
    MutationContext::new(ACTOR)
}

pub fn ctx_with_reason(reason: &str) -> MutationContext {
    MutationContext::new(ACTOR).with_reason(reason)
}

pub fn money(units: i64) -> Decimal {
    Decimal::new(units, 0)
}

pub fn month(raw: &str) -> BillingMonth {
    raw.parse().unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn add_plot(ledger: &Ledger, number: &str, street: Option<&str>) -> Plot {
    ledger
        .upsert_plot(
            UpsertPlot {
                plot_id: None,
                number: number.to_string(),
                street: street.map(str::to_string),
                label: None,
                owner_name: None,
                contact: Some(format!("+7900000{:0>4}", number)),
                membership: MembershipStatus::Member,
            },
            &ctx(),
        )
        .unwrap()
}

pub fn add_charge(ledger: &Ledger, plot_id: Uuid, billing_month: &str, amount: i64) -> Charge {
    ledger
        .create_charge(
            NewCharge {
                plot_id,
                month: month(billing_month),
                category: ChargeCategory::Membership,
                amount: money(amount),
                note: None,
                due_date: None,
            },
            &ctx(),
        )
        .unwrap()
}

/// A payment attached to `plot_id` directly, bypassing the matcher.
pub fn add_payment(ledger: &Ledger, plot_id: Uuid, paid_on: NaiveDate, amount: i64) -> Payment {
    ledger
        .create_payment(
            NewPayment {
                amount: money(amount),
                paid_on,
                payer: "Resident".to_string(),
                purpose: format!("dues {}", Uuid::new_v4()),
                method: PaymentMethod::Bank,
                bank_reference: None,
                plot_id: Some(plot_id),
            },
            &ctx(),
        )
        .unwrap()
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub ledger: Arc<Ledger>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).header("x-user-id", ACTOR)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).header("x-user-id", ACTOR)
    }
}

/// Spawn the HTTP application on a random port.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let mut config = BillingLedgerConfig::with_common(CommonConfig {
        port: 0,
        environment: "test".to_string(),
    });
    config.service_name = "billing-ledger-service-test".to_string();
    config.jobs.retry_backoff = Duration::from_millis(10);

    let app = Application::build(config)
        .await
        .expect("Failed to build application");

    let address = format!("http://127.0.0.1:{}", app.port());
    let ledger = app.ledger();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        ledger,
    }
}
