//! Shard Synchronization Coordination
//!
//! Drives one shard sync attempt end to end: pre-flight checks against
//! the cluster plan, the lock-free initial sync, soft-lock catch-up and
//! the exclusive finalization, plus the failure bookkeeping around it.
//!
//! An attempt that fails for an operational reason is counted against
//! the shard and the caller is expected to schedule a fresh attempt.
//! Attempts that merely became moot (plan moved on, shutdown, deadline)
//! end without counting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cluster::is_planned_follower;
use crate::error::{Error, Result};
use crate::leader::{FollowerRegistrar, LeaderClient, LockClient};
use crate::sync::cancel::SyncCancellation;
use crate::sync::catchup::CatchupDriver;
use crate::sync::finalize::ExclusiveFinalizer;
use crate::sync::job::{shard_summary, JobPriority, SyncJobSpec, SyncJobState};
use crate::sync::syncer::{InitialSyncConfig, InitialSyncer, SyncOutcome, TailingSyncer};
use crate::sync::SyncContext;

/// Counted failures a shard accumulates before attempts get delayed
const FAILURE_BACKOFF_THRESHOLD: u32 = 4;

/// Largest pre-attempt delay, however many failures piled up
const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// Slice size for shutdown-aware sleeping
const SLEEP_SLICE: Duration = Duration::from_millis(500);

/// Poll interval while the planned leader has not taken over yet
const LEADER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Document gap above which a normal-priority attempt is handed back
/// for rescheduling at background priority
const RESCHEDULE_GAP: u64 = 10_000;

/// How long to wait for the cluster to settle after an attempt
const VERSION_WAIT: Duration = Duration::from_secs(600);

/// Runs a single synchronization attempt for one shard
pub struct SyncCoordinator {
    ctx: Arc<SyncContext>,
    spec: SyncJobSpec,
}

impl SyncCoordinator {
    pub fn new(ctx: Arc<SyncContext>, spec: SyncJobSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self { ctx, spec })
    }

    /// Run the attempt to completion, cancellation or failure.
    ///
    /// The follower counters and the shard version are updated whatever
    /// the outcome, so the caller only has to decide whether to
    /// reschedule.
    pub async fn run(self) -> Result<()> {
        let mut state =
            SyncJobState::new(self.spec.client_info(&self.ctx.identity.server_id), None);
        tracing::debug!(
            "Synchronizing {}",
            shard_summary(&self.spec, state.started_at)
        );

        let result = self.execute(&mut state).await;
        self.finish(&result).await;

        match &result {
            Ok(()) => {
                tracing::info!(
                    "Synchronized shard {}/{} with leader {}: {} documents on leader at start, \
                     {} held locally, {} after catch-up",
                    self.spec.database,
                    self.spec.shard,
                    self.spec.leader,
                    state.initial_docs_on_leader,
                    state.initial_docs_on_follower,
                    state.docs_at_end
                );
            }
            Err(e) if e.counts_as_failure() => {
                tracing::warn!(
                    "Synchronization of shard {}/{} failed: {}",
                    self.spec.database,
                    self.spec.shard,
                    e
                );
            }
            Err(e) => {
                tracing::info!(
                    "Synchronization of shard {}/{} ended early: {}",
                    self.spec.database,
                    self.spec.shard,
                    e
                );
            }
        }
        result
    }

    async fn execute(&self, state: &mut SyncJobState) -> Result<()> {
        self.backoff_after_failures().await?;
        self.wait_for_leader().await?;

        let endpoint = self.ctx.cluster.server_endpoint(&self.spec.leader).await?;
        let client = LeaderClient::new(
            self.ctx.http.clone(),
            endpoint,
            self.spec.database.clone(),
            self.ctx.identity.clone(),
        );
        let locks = Arc::new(LockClient::new(
            client.clone(),
            self.ctx.config.lock_acquire_timeout(),
            self.ctx.config.lock_cancel_timeout(),
        ));

        self.check_document_gap(&client, state).await?;

        // The attempt clock covers the data transfer, not the wait for
        // the leader or the backoff before it.
        if self.spec.sync_by_revision {
            state.deadline = self
                .ctx
                .config
                .attempt_timeout()
                .map(|timeout| Instant::now() + timeout);
        }

        let tailing = self.ctx.syncers.tailing_syncer(
            &self.spec.database,
            client.endpoint(),
            &self.spec.leader,
        )?;
        let (initial, outcome) = self
            .initial_sync(client.endpoint(), state, tailing.as_ref())
            .await?;

        let cancel = SyncCancellation::new(self.ctx.shutdown.clone(), state.deadline);
        let driver = CatchupDriver::new(
            locks.clone(),
            tailing.clone(),
            self.ctx.shutdown.clone(),
            self.spec.shard.clone(),
            self.ctx.config.catchup.max_soft_tries,
            self.ctx.config.soft_lock_ttl(),
            self.ctx.config.catchup_budget(),
        );
        let tick = driver
            .run(outcome.last_log_tick, &cancel)
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Could not catch up with shard {}/{}",
                    self.spec.database, self.spec.shard
                ))
            })?;

        let registrar = FollowerRegistrar::new(
            client.clone(),
            self.ctx.store.clone(),
            self.ctx.config.registrar_timeout(),
        );
        let finalizer = ExclusiveFinalizer::new(
            locks,
            client,
            registrar,
            tailing,
            self.ctx.store.clone(),
            self.ctx.tracker.clone(),
            self.spec.database.clone(),
            self.spec.shard.clone(),
            self.spec.leader.clone(),
            self.ctx.config.hard_lock_ttl(),
            self.ctx.config.recount_timeout(),
            initial.syncer_id(),
        );
        finalizer.run(state, tick, &cancel).await
    }

    /// Delay the attempt when this shard keeps failing
    async fn backoff_after_failures(&self) -> Result<()> {
        let failures = self
            .ctx
            .tracker
            .replication_errors(&self.spec.database, &self.spec.shard);
        let delay = match failure_backoff(failures) {
            Some(delay) => delay,
            None => return Ok(()),
        };
        tracing::info!(
            "Delaying sync of shard {}/{} by {:.1}s after {} failed attempts",
            self.spec.database,
            self.spec.shard,
            delay.as_secs_f64(),
            failures
        );
        self.interruptible_sleep(delay).await
    }

    async fn interruptible_sleep(&self, total: Duration) -> Result<()> {
        let deadline = Instant::now() + total;
        loop {
            if self.ctx.shutdown.is_stopping() {
                return Err(Error::ShuttingDown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(SLEEP_SLICE.min(deadline - now)).await;
        }
    }

    /// Wait until the planned leader has actually taken over the shard.
    ///
    /// Also detects attempts that became moot before doing any work: the
    /// plan moved on, another server leads the shard, or the follower is
    /// already in sync and no resync was forced.
    async fn wait_for_leader(&self) -> Result<()> {
        loop {
            if self.ctx.shutdown.is_stopping() {
                return Err(Error::ShuttingDown);
            }

            let plan = self
                .ctx
                .cluster
                .shard_plan(&self.spec.database, &self.spec.collection, &self.spec.shard)
                .await
                .map_err(|e| {
                    Error::PlanChanged(format!(
                        "Could not read plan of shard {}/{}: {}",
                        self.spec.database, self.spec.shard, e
                    ))
                })?;
            if !is_planned_follower(&plan, &self.spec.leader, &self.ctx.identity.server_id) {
                return Err(Error::PlanChanged(format!(
                    "Server {} is no longer a planned follower of shard {}/{}",
                    self.ctx.identity.server_id, self.spec.database, self.spec.shard
                )));
            }

            let current = self
                .ctx
                .cluster
                .shard_current(&self.spec.database, &self.spec.collection, &self.spec.shard)
                .await
                .map_err(|e| {
                    Error::PlanChanged(format!(
                        "Could not read current state of shard {}/{}: {}",
                        self.spec.database, self.spec.shard, e
                    ))
                })?;
            match current.first() {
                Some(current_leader) if current_leader != &self.spec.leader => {
                    return Err(Error::PlanChanged(format!(
                        "Planned leader {} has not taken over shard {}/{}, current leader is {}",
                        self.spec.leader, self.spec.database, self.spec.shard, current_leader
                    )));
                }
                Some(_) => {
                    if current.iter().any(|s| s == &self.ctx.identity.server_id) {
                        if self.spec.forced_resync {
                            tracing::info!(
                                "Resynchronizing shard {}/{} although it is already in sync",
                                self.spec.database,
                                self.spec.shard
                            );
                            return Ok(());
                        }
                        return Err(Error::PlanChanged(format!(
                            "Shard {}/{} is already in sync with leader {}",
                            self.spec.database, self.spec.shard, self.spec.leader
                        )));
                    }
                    return Ok(());
                }
                None => {
                    tokio::time::sleep(LEADER_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Compare document counts and hand oversized attempts back for
    /// rescheduling at background priority
    async fn check_document_gap(
        &self,
        client: &LeaderClient,
        state: &mut SyncJobState,
    ) -> Result<()> {
        let leader_docs = client
            .shard_count(&self.spec.shard, self.ctx.config.count_timeout())
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Could not fetch document count of shard {}/{} from leader {}",
                    self.spec.database, self.spec.shard, self.spec.leader
                ))
            })?;
        let local_docs = self
            .ctx
            .store
            .document_count(&self.spec.database, &self.spec.shard)
            .await?;
        state.initial_docs_on_leader = leader_docs;
        state.initial_docs_on_follower = local_docs;

        let gap = leader_docs.abs_diff(local_docs);
        if gap > RESCHEDULE_GAP && self.spec.priority != JobPriority::Slow {
            return Err(Error::Rescheduled(format!(
                "Shard {}/{} is {} documents apart from its leader, \
                 rescheduling at background priority",
                self.spec.database, self.spec.shard, gap
            )));
        }
        Ok(())
    }

    /// Transfer the shard's data without holding any leader lock
    async fn initial_sync(
        &self,
        endpoint: &str,
        state: &mut SyncJobState,
        tailing: &dyn TailingSyncer,
    ) -> Result<(Arc<dyn InitialSyncer>, SyncOutcome)> {
        // Writes on this shard now go through the leader.
        self.ctx
            .store
            .set_shard_leader(&self.spec.database, &self.spec.shard, &self.spec.leader)
            .await?;

        let config = InitialSyncConfig {
            endpoint: endpoint.to_string(),
            database: self.spec.database.clone(),
            incremental: state.initial_docs_on_follower > 0,
            leader_id: self.spec.leader.clone(),
            restrict_collections: vec![self.spec.shard.clone()],
            include_system: true,
            skip_create_drop: true,
            client_info: state.client_info.clone(),
        };
        let initial = self.ctx.syncers.initial_syncer(config)?;

        let cancel = SyncCancellation::new(self.ctx.shutdown.clone(), state.deadline)
            .with_plan_guard(
                self.ctx.cluster.clone(),
                &self.spec.database,
                &self.spec.collection,
                &self.spec.shard,
                &self.spec.leader,
                &self.ctx.identity.server_id,
            );
        let started = Instant::now();
        let outcome = match initial.run(&cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if cancel.deadline_exceeded() {
                    tracing::info!(
                        "Initial sync of shard {}/{} gave up at its attempt deadline, \
                         will be retried",
                        self.spec.database,
                        self.spec.shard
                    );
                    return Err(Error::AttemptTimeout);
                }
                return Err(e.with_context(&format!(
                    "Initial sync of shard {}/{} failed (last progress: {})",
                    self.spec.database,
                    self.spec.shard,
                    initial.progress()
                )));
            }
        };
        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(5) {
            tracing::info!(
                "Initial sync of shard {}/{} took {:.1}s",
                self.spec.database,
                self.spec.shard,
                elapsed.as_secs_f64()
            );
        }

        if !outcome
            .collections
            .iter()
            .any(|(_, name)| name == &self.spec.shard)
        {
            return Err(Error::Internal(format!(
                "Shard {}/{} seems to be gone from leader, this can happen if a collection \
                 was dropped during synchronization",
                self.spec.database, self.spec.shard
            )));
        }

        tailing
            .inherit_from_initial(initial.as_ref())
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Could not hand over initial sync state of shard {}/{}",
                    self.spec.database, self.spec.shard
                ))
            })?;
        Ok((initial, outcome))
    }

    /// Post-attempt bookkeeping, whatever the outcome.
    ///
    /// Updates the failure counters, then waits for the cluster state
    /// cache to absorb the attempt's effects before bumping the local
    /// shard version, so that a follow-up attempt sees fresh data.
    async fn finish(&self, result: &Result<()>) {
        match result {
            Ok(()) => {
                self.ctx
                    .tracker
                    .remove_replication_error(&self.spec.database, &self.spec.shard);
            }
            Err(Error::AttemptTimeout) => {
                self.ctx.tracker.count_timed_out_attempt();
            }
            Err(e) if e.counts_as_failure() => {
                self.ctx
                    .tracker
                    .store_replication_error(&self.spec.database, &self.spec.shard);
            }
            Err(_) => {}
        }

        let deadline = Instant::now() + VERSION_WAIT;
        let mut snooze = Duration::from_millis(100);
        let mut version = 0;
        while Instant::now() < deadline {
            if self.ctx.shutdown.is_stopping() {
                break;
            }
            match self.ctx.cluster.current_version(VERSION_WAIT / 10).await {
                // Version 0 means the state cache has not converged yet.
                Ok(0) => {}
                Ok(v) => {
                    version = v;
                    break;
                }
                Err(e) => {
                    tracing::debug!("Could not fetch current cluster version: {}", e);
                }
            }
            tokio::time::sleep(snooze).await;
            if snooze < Duration::from_secs(2) {
                snooze += Duration::from_millis(100);
            }
        }
        if version > 0 {
            if let Err(e) = self.ctx.cluster.wait_for_current_version(version).await {
                tracing::debug!("Could not wait for cluster version {}: {}", version, e);
            }
        }
        self.ctx.tracker.bump_shard_version(&self.spec.shard);
    }
}

/// Delay before an attempt, `None` below the failure threshold.
///
/// Grows quadratically with the failure count and caps at `MAX_BACKOFF`.
fn failure_backoff(failures: u32) -> Option<Duration> {
    if failures < FAILURE_BACKOFF_THRESHOLD {
        return None;
    }
    let n = failures as f64;
    let secs = (2.0 + 0.1 * n * (n + 1.0) / 2.0).min(MAX_BACKOFF.as_secs_f64());
    Some(Duration::from_secs_f64(secs))
}
