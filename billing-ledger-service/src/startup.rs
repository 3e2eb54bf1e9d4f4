use crate::config::BillingLedgerConfig;
use crate::handlers::{self, allocations, imports, jobs, payments, penalties, periods, plots};
use crate::jobs::{JobRunner, LedgerJobHandler};
use crate::services::{
    BillingLedger, Clock, InMemoryLedgerStore, LogNotifier, Notifier, PlotMatcher, SystemClock,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub type Ledger = BillingLedger<InMemoryLedgerStore>;

#[derive(Clone)]
pub struct AppState {
    pub config: BillingLedgerConfig,
    pub ledger: Arc<Ledger>,
    pub jobs: Arc<JobRunner>,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: BillingLedgerConfig) -> Result<Self, AppError> {
        Self::build_with(config, Arc::new(SystemClock), Arc::new(LogNotifier::new())).await
    }

    /// Build with an explicit clock and delivery channel.
    pub async fn build_with(
        config: BillingLedgerConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = Arc::new(BillingLedger::new(
            store,
            clock.clone(),
            PlotMatcher::new(config.matching),
            config.penalty_policy_version.clone(),
        ));

        let handler = Arc::new(LedgerJobHandler::new(ledger.clone(), notifier));
        let job_runner = Arc::new(JobRunner::new(config.jobs, handler, clock));
        job_runner.start();

        let state = AppState {
            config: config.clone(),
            ledger,
            jobs: job_runner,
        };

        let app = router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.state.ledger.clone()
    }

    pub fn jobs(&self) -> Arc<JobRunner> {
        self.state.jobs.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/plots", post(plots::upsert_plot).get(plots::list_plots))
        .route("/plots/debts", get(plots::plot_debts))
        .route("/plots/:id/archive", post(plots::archive_plot))
        .route("/charges", post(payments::create_charge))
        .route("/payments", post(payments::create_payment))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/void", post(payments::void_payment))
        .route("/payments/:id/plot", post(payments::assign_plot))
        .route(
            "/payments/:id/auto-allocate",
            post(payments::auto_allocate_payment),
        )
        .route("/allocations/preview", post(allocations::preview_allocation))
        .route("/allocations/auto", post(allocations::auto_allocate))
        .route("/allocations/manual", post(allocations::manual_allocate))
        .route("/allocations/unapply", post(allocations::unapply))
        .route("/penalties/preview", post(penalties::preview_penalty))
        .route("/penalties/apply", post(penalties::apply_penalty))
        .route("/penalties/recalc", post(penalties::recalc_penalty))
        .route("/penalties/:id/void", post(penalties::void_penalty))
        .route("/penalties/:id/freeze", post(penalties::freeze_penalty))
        .route("/penalties/:id/unfreeze", post(penalties::unfreeze_penalty))
        .route("/periods/:month", get(periods::period_status))
        .route("/periods/:month/close", post(periods::close_period))
        .route("/periods/:month/changes", get(periods::post_close_changes))
        .route("/imports/statement", post(imports::import_statement))
        .route("/imports/payments", post(imports::import_payments))
        .route("/imports/:id/rollback", post(imports::rollback_import))
        .route("/jobs", post(jobs::enqueue_job).get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/retry", post(jobs::retry_job))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
