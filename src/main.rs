//! Payment Saga service
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌─────────────┐    ┌─────────────┐
//! │ Gateway  │───▶│ Orchestrator │───▶│  Directory  │    │ Side-effect │
//! │  (HTTP)  │    │    (saga)    │───▶│   Ledger    │    │   worker    │
//! └──────────┘    └──────────────┘    └─────────────┘    └─────────────┘
//!                        │   ▲              audit / events ◀─┘
//!                        ▼   │
//!                 ┌──────────────┐    ┌──────────────┐
//!                 │ Record store │◀───│   Recovery   │
//!                 └──────────────┘    │    worker    │
//!                                     └──────────────┘
//! ```
//!
//! Usage: `payment_saga [--env dev] [--port 8080]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use payment_saga::config::AppConfig;
use payment_saga::gateway::{self, AppState};
use payment_saga::payment::adapters::{
    HttpAccountLedger, HttpAuditLogger, HttpCustomerDirectory, HttpEventPublisher,
    InMemoryServices,
};
use payment_saga::payment::{
    AccountLedgerClient, AuditLogger, CustomerDirectoryClient, EventPublisher,
    InMemoryPaymentStore, PaymentOrchestrator, PaymentRecordStore, PaymentStats,
    PgPaymentStore, RecoveryWorker, SideEffectWorker, side_effect_channel,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

/// Remote collaborators, each either HTTP or simulated
struct Collaborators {
    directory: Arc<dyn CustomerDirectoryClient>,
    ledger: Arc<dyn AccountLedgerClient>,
    audit: Arc<dyn AuditLogger>,
    events: Arc<dyn EventPublisher>,
}

fn build_collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    let timeout = config.saga.remote_timeout();
    let clients = &config.clients;

    let sim = InMemoryServices::new();
    for c in &config.simulation.customers {
        sim.add_customer(c.id, c.account_id, &c.name, c.balance);
    }
    if !config.simulation.customers.is_empty() {
        tracing::info!(
            customers = config.simulation.customers.len(),
            "Simulation data seeded"
        );
    }

    let directory: Arc<dyn CustomerDirectoryClient> = match &clients.directory_url {
        Some(url) => Arc::new(
            HttpCustomerDirectory::new(url, timeout).context("customer directory client")?,
        ),
        None => {
            tracing::warn!("Customer directory simulated in memory");
            sim.directory.clone()
        }
    };
    let ledger: Arc<dyn AccountLedgerClient> = match &clients.ledger_url {
        Some(url) => {
            Arc::new(HttpAccountLedger::new(url, timeout).context("account ledger client")?)
        }
        None => {
            tracing::warn!("Account ledger simulated in memory");
            sim.ledger.clone()
        }
    };
    let audit: Arc<dyn AuditLogger> = match &clients.audit_url {
        Some(url) => Arc::new(HttpAuditLogger::new(url, timeout).context("audit client")?),
        None => sim.audit.clone(),
    };
    let events: Arc<dyn EventPublisher> = match &clients.events_url {
        Some(url) => Arc::new(HttpEventPublisher::new(url, timeout).context("event client")?),
        None => sim.events.clone(),
    };

    Ok(Collaborators {
        directory,
        ledger,
        audit,
        events,
    })
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentRecordStore>> {
    match &config.postgres_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(16)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            let store = PgPaymentStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("Failed to prepare payments schema")?;
            tracing::info!("Payment store: PostgreSQL");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("Payment store: in-memory (records lost on restart)");
            Ok(Arc::new(InMemoryPaymentStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = payment_saga::logging::init_logging(&app_config);

    tracing::info!(version = env!("GIT_HASH"), "Starting payment saga in {} mode", env);

    let stats = Arc::new(PaymentStats::new());
    let store = build_store(&app_config).await?;
    let collaborators = build_collaborators(&app_config)?;

    let (side_effects, receiver) =
        side_effect_channel(app_config.side_effects.queue_size, stats.clone());
    SideEffectWorker::new(
        collaborators.audit,
        collaborators.events,
        app_config.side_effects.clone(),
        stats.clone(),
    )
    .spawn(receiver);

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store,
        collaborators.directory,
        collaborators.ledger,
        side_effects,
        app_config.side_effects.topic.clone(),
        stats,
        app_config.saga.clone(),
    ));

    if app_config.recovery.enabled {
        RecoveryWorker::new(orchestrator.clone(), app_config.recovery.clone()).spawn();
    } else {
        tracing::warn!("Recovery worker disabled; stale payments will not be resumed");
    }

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    let state = Arc::new(AppState::new(orchestrator));
    gateway::run_server(&app_config.gateway.host, port, state).await
}
