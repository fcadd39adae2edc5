use crate::activitypub::{
    ActorDirectory, DeliveryLedger, HttpActorFetcher, InboxProcessor, SweepHandle, SweepReport, Sweeper,
};
use crate::api::{self, AppState};
use crate::bootstrap;
use crate::config::DriftwoodConfig;
use crate::database::models::ActorRecord;
use crate::database::Database;
use anyhow::Result;
use std::sync::Arc;

/// Bootstraps the backend once and wires the inbox pipeline together for
/// whichever entrypoint (REST server, one-shot sweep, actor lookup) runs.
pub struct DriftwoodNode {
    config: DriftwoodConfig,
    database: Database,
    directory: ActorDirectory,
    ledger: DeliveryLedger,
    sweeper: Sweeper,
}

impl DriftwoodNode {
    pub async fn start(config: DriftwoodConfig) -> Result<Self> {
        let bootstrap = bootstrap::initialize(&config).await?;
        let database = bootstrap.database.clone();
        let federation = &config.federation;

        let fetcher = HttpActorFetcher::new(federation)?;
        let directory = ActorDirectory::new(database.clone(), Arc::new(fetcher), federation.fetch_timeout);
        let ledger = DeliveryLedger::new(database.clone(), federation.claim_lease);
        let processor = InboxProcessor::new(database.clone(), directory.clone(), ledger.clone());
        let sweeper = Sweeper::new(processor, ledger.clone());

        tracing::info!(
            directories_created = ?bootstrap.directories_created,
            database_initialized = bootstrap.database_initialized,
            db_path = %config.paths.db_path.display(),
            "driftwood node initialized"
        );

        Ok(Self {
            config,
            database,
            directory,
            ledger,
            sweeper,
        })
    }

    /// Runs the inbox server with a background sweep worker until shutdown.
    pub async fn run_http_server(&self) -> Result<()> {
        let worker = SweepHandle::start(self.sweeper.clone(), self.config.federation.sweep_interval);
        let state = AppState::new(
            self.config.clone(),
            self.database.clone(),
            self.directory.clone(),
            self.ledger.clone(),
            Some(worker.clone()),
        );
        let result = api::serve_http(state).await;
        worker.shutdown();
        result
    }

    /// A single sweep over the pending ledger entries.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweeper.run_once().await
    }

    /// Resolves (and caches) a remote actor.
    pub async fn resolve_actor(&self, identifier: &str) -> Result<ActorRecord> {
        Ok(self.directory.resolve(identifier).await?)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.ledger.count_pending()
    }
}
