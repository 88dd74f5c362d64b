//! Test Support
//!
//! A mock shard leader serving the replication endpoints over real HTTP,
//! plus in-process fakes for the cluster view, the storage engine and the
//! two syncers. The mock records every request so tests can assert on
//! ordering, not just on outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::cluster::{ClusterView, NodeIdentity};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::leader::{LeaderClient, LockClient};
use crate::state::FailureTracker;
use crate::store::ShardStore;
use crate::sync::{
    CatchupStatus, InitialSyncConfig, InitialSyncer, JobPriority, ShutdownFlag, SyncCancellation,
    SyncContext, SyncJobSpec, SyncOutcome, SyncerFactory, TailingSyncer, Tick,
};

/// Recorded state of the mock leader, shared with the request handlers
pub(crate) struct MockLeaderState {
    pub next_lock_id: AtomicU64,
    /// Lock id -> body of the request that planted it
    pub locks: Mutex<HashMap<u64, Value>>,
    /// Ids of successfully cancelled locks, in cancellation order
    pub cancelled: Mutex<Vec<u64>>,
    /// Bodies of accepted addFollower requests
    pub followers: Mutex<Vec<Value>>,
    /// Every handled request, in arrival order
    pub events: Mutex<Vec<String>>,
    pub doc_count: AtomicU64,
    /// Term granted with hard locks; 0 omits the field
    pub following_term: AtomicU64,
    /// Tick bound granted with hard locks; 0 omits the field
    pub last_log_tick: AtomicU64,
    pub fail_hold_lock: AtomicBool,
    pub fail_cancel: AtomicBool,
    /// Answer cancellations as if the database were dropped
    pub cancel_database_gone: AtomicBool,
    pub fail_recalculate: AtomicBool,
    /// Nonzero makes addFollower fail with this error code
    pub add_follower_error: AtomicU64,
    /// Hand out an unparsable lock id
    pub lock_id_garbage: AtomicBool,
}

impl Default for MockLeaderState {
    fn default() -> Self {
        Self {
            next_lock_id: AtomicU64::new(1),
            locks: Mutex::default(),
            cancelled: Mutex::default(),
            followers: Mutex::default(),
            events: Mutex::default(),
            doc_count: AtomicU64::new(0),
            following_term: AtomicU64::new(0),
            last_log_tick: AtomicU64::new(0),
            fail_hold_lock: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            cancel_database_gone: AtomicBool::new(false),
            fail_recalculate: AtomicBool::new(false),
            add_follower_error: AtomicU64::new(0),
            lock_id_garbage: AtomicBool::new(false),
        }
    }
}

impl MockLeaderState {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    /// Position of the first recorded event starting with `needle`
    pub fn event_index(&self, needle: &str) -> Option<usize> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .position(|event| event.starts_with(needle))
    }
}

/// A shard leader bound to a local port for the lifetime of a test
pub(crate) struct MockLeader {
    pub state: Arc<MockLeaderState>,
    pub endpoint: String,
}

/// Route logs to the captured test output, honoring `RUST_LOG`. Only the
/// first call installs the subscriber.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl MockLeader {
    pub async fn spawn() -> Self {
        init_logging();
        let state = Arc::new(MockLeaderState::default());
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        MockLeader { state, endpoint }
    }

    /// Poll until `predicate` holds or two seconds pass
    pub async fn wait_until(&self, predicate: impl Fn(&MockLeaderState) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate(&self.state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

fn router(state: Arc<MockLeaderState>) -> Router {
    Router::new()
        .route(
            "/_db/:db/_api/replication/holdReadLockCollection",
            get(lock_id).post(hold_lock).delete(cancel_lock),
        )
        .route("/_db/:db/_api/replication/addFollower", put(add_follower))
        .route("/_db/:db/_api/collection/:shard/count", get(count))
        .route(
            "/_db/:db/_api/collection/:shard/recalculateCount",
            put(recalculate),
        )
        .with_state(state)
}

fn error_body(code: u64, message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": true,
            "errorNum": code,
            "errorMessage": message,
        })),
    )
}

async fn lock_id(State(state): State<Arc<MockLeaderState>>) -> (StatusCode, Json<Value>) {
    if state.lock_id_garbage.load(Ordering::SeqCst) {
        return (StatusCode::OK, Json(json!({ "id": "not-a-number" })));
    }
    let id = state.next_lock_id.fetch_add(1, Ordering::SeqCst);
    state.record(format!("lockId {}", id));
    (StatusCode::OK, Json(json!({ "id": id.to_string() })))
}

async fn hold_lock(
    State(state): State<Arc<MockLeaderState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if state.fail_hold_lock.load(Ordering::SeqCst) {
        return error_body(1000, "hold failed");
    }
    let id = body["id"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    let soft = body["soft"].as_bool().unwrap_or(true);
    state.record(format!("lock {} soft={}", id, soft));
    state.locks.lock().unwrap().insert(id, body);

    let mut grant = json!({ "error": false });
    if !soft {
        let term = state.following_term.load(Ordering::SeqCst);
        if term > 0 {
            grant["followingTerm"] = term.into();
        }
        let tick = state.last_log_tick.load(Ordering::SeqCst);
        if tick > 0 {
            grant["lastLogTick"] = tick.into();
        }
    }
    (StatusCode::OK, Json(grant))
}

async fn cancel_lock(
    State(state): State<Arc<MockLeaderState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let id = body["id"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    state.record(format!("unlock {}", id));
    if state.cancel_database_gone.load(Ordering::SeqCst) {
        return error_body(1228, "database not found");
    }
    if state.fail_cancel.load(Ordering::SeqCst) {
        return error_body(1000, "cancel failed");
    }
    state.cancelled.lock().unwrap().push(id);
    (StatusCode::OK, Json(json!({ "error": false })))
}

async fn add_follower(
    State(state): State<Arc<MockLeaderState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("addFollower".to_string());
    let code = state.add_follower_error.load(Ordering::SeqCst);
    if code != 0 {
        let message = match code {
            1487 => "shard not empty",
            1493 => "checksum mismatch for shard",
            1228 => "database not found",
            _ => "leader refused",
        };
        return error_body(code, message);
    }
    state.followers.lock().unwrap().push(body);
    (StatusCode::OK, Json(json!({ "error": false })))
}

async fn count(
    State(state): State<Arc<MockLeaderState>>,
    Path((_db, shard)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    state.record(format!("count {}", shard));
    (
        StatusCode::OK,
        Json(json!({ "count": state.doc_count.load(Ordering::SeqCst) })),
    )
}

async fn recalculate(
    State(state): State<Arc<MockLeaderState>>,
    Path((_db, shard)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    state.record(format!("recalculate {}", shard));
    if state.fail_recalculate.load(Ordering::SeqCst) {
        return error_body(1000, "recount failed");
    }
    (
        StatusCode::OK,
        Json(json!({ "count": state.doc_count.load(Ordering::SeqCst) })),
    )
}

pub(crate) fn test_identity() -> NodeIdentity {
    NodeIdentity {
        server_id: "node-2".to_string(),
        instance_id: 42,
        reboot_id: 1,
    }
}

pub(crate) fn mock_leader_client(leader: &MockLeader) -> LeaderClient {
    LeaderClient::new(
        reqwest::Client::new(),
        leader.endpoint.clone(),
        "db",
        test_identity(),
    )
}

pub(crate) fn mock_lock_client(leader: &MockLeader) -> LockClient {
    LockClient::new(
        mock_leader_client(leader),
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
}

/// Cluster view backed by a plan list and a scripted current state.
///
/// `shard_current` walks through the script one answer per call and then
/// repeats the last entry, so tests can model a leader takeover.
pub(crate) struct FakeCluster {
    endpoint: String,
    plan: Mutex<Vec<String>>,
    current: Mutex<VecDeque<Vec<String>>>,
    pub version: AtomicU64,
    pub waited_for: Mutex<Vec<u64>>,
}

impl FakeCluster {
    pub fn new(endpoint: &str, plan: &[&str], current: Vec<Vec<String>>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            plan: Mutex::new(plan.iter().map(|s| s.to_string()).collect()),
            current: Mutex::new(current.into()),
            version: AtomicU64::new(0),
            waited_for: Mutex::default(),
        }
    }

    pub fn set_plan(&self, plan: &[&str]) {
        *self.plan.lock().unwrap() = plan.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_current(&self, script: Vec<Vec<String>>) {
        *self.current.lock().unwrap() = script.into();
    }
}

#[async_trait::async_trait]
impl ClusterView for FakeCluster {
    async fn shard_plan(
        &self,
        _database: &str,
        _collection: &str,
        _shard: &str,
    ) -> Result<Vec<String>> {
        Ok(self.plan.lock().unwrap().clone())
    }

    async fn shard_current(
        &self,
        _database: &str,
        _collection: &str,
        _shard: &str,
    ) -> Result<Vec<String>> {
        let mut script = self.current.lock().unwrap();
        if script.len() > 1 {
            Ok(script.pop_front().unwrap_or_default())
        } else {
            Ok(script.front().cloned().unwrap_or_default())
        }
    }

    async fn server_endpoint(&self, _server: &str) -> Result<String> {
        Ok(self.endpoint.clone())
    }

    async fn current_version(&self, _timeout: Duration) -> Result<u64> {
        Ok(self.version.load(Ordering::SeqCst))
    }

    async fn wait_for_current_version(&self, version: u64) -> Result<()> {
        self.waited_for.lock().unwrap().push(version);
        Ok(())
    }
}

/// Storage engine with settable counts and a record of leader changes
pub(crate) struct FakeStore {
    pub docs: AtomicU64,
    /// Result of a recount; `u64::MAX` mirrors `docs`
    pub recount: AtomicU64,
    pub leaders: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn new(docs: u64) -> Self {
        Self {
            docs: AtomicU64::new(docs),
            recount: AtomicU64::new(u64::MAX),
            leaders: Mutex::default(),
        }
    }
}

#[async_trait::async_trait]
impl ShardStore for FakeStore {
    async fn document_count(&self, _database: &str, _shard: &str) -> Result<u64> {
        Ok(self.docs.load(Ordering::SeqCst))
    }

    async fn recalculate_count(&self, _database: &str, _shard: &str) -> Result<u64> {
        let recount = self.recount.load(Ordering::SeqCst);
        if recount == u64::MAX {
            Ok(self.docs.load(Ordering::SeqCst))
        } else {
            Ok(recount)
        }
    }

    async fn set_shard_leader(&self, _database: &str, _shard: &str, leader: &str) -> Result<()> {
        self.leaders.lock().unwrap().push(leader.to_string());
        Ok(())
    }
}

/// Initial syncer with a scripted outcome and an optional artificial delay
pub(crate) struct FakeInitial {
    /// `None` stands for the default successful outcome
    pub outcome: Mutex<Option<Result<SyncOutcome>>>,
    pub delay: Mutex<Duration>,
    id: u64,
}

impl FakeInitial {
    pub fn new(id: u64) -> Self {
        Self {
            outcome: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            id,
        }
    }
}

#[async_trait::async_trait]
impl InitialSyncer for FakeInitial {
    fn syncer_id(&self) -> u64 {
        self.id
    }

    fn progress(&self) -> String {
        "copying documents".to_string()
    }

    async fn run(&self, _cancel: &SyncCancellation) -> Result<SyncOutcome> {
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        match self.outcome.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(SyncOutcome {
                last_log_tick: 1000,
                collections: vec![("9000001".to_string(), "s100".to_string())],
            }),
        }
    }
}

/// Tailing syncer that advances a fixed tick step per round and catches
/// up after a configurable number of rounds
pub(crate) struct FakeTailing {
    rounds_until_caught_up: Mutex<u64>,
    tick_step: u64,
    pub catchup_calls: Mutex<Vec<(Tick, Duration)>>,
    pub finalize_calls: Mutex<Vec<(Tick, Tick)>>,
    pub leader_ids: Mutex<Vec<String>>,
    pub inherited: AtomicBool,
    pub catchup_error: Mutex<Option<Error>>,
    pub finalize_error: Mutex<Option<Error>>,
}

impl FakeTailing {
    pub fn new(rounds_until_caught_up: u64, tick_step: u64) -> Self {
        Self {
            rounds_until_caught_up: Mutex::new(rounds_until_caught_up),
            tick_step,
            catchup_calls: Mutex::default(),
            finalize_calls: Mutex::default(),
            leader_ids: Mutex::default(),
            inherited: AtomicBool::new(false),
            catchup_error: Mutex::new(None),
            finalize_error: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl TailingSyncer for FakeTailing {
    fn set_leader_id(&self, leader: &str) {
        self.leader_ids.lock().unwrap().push(leader.to_string());
    }

    async fn inherit_from_initial(&self, _initial: &dyn InitialSyncer) -> Result<()> {
        self.inherited.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn catchup(
        &self,
        _shard: &str,
        from: Tick,
        budget: Duration,
        _cancel: &SyncCancellation,
    ) -> Result<CatchupStatus> {
        if let Some(e) = self.catchup_error.lock().unwrap().take() {
            return Err(e);
        }
        self.catchup_calls.lock().unwrap().push((from, budget));
        let mut rounds = self.rounds_until_caught_up.lock().unwrap();
        let hit_budget = *rounds > 1;
        *rounds = rounds.saturating_sub(1);
        Ok(CatchupStatus {
            tick_reached: from + self.tick_step,
            hit_budget,
        })
    }

    async fn finalize(
        &self,
        _shard: &str,
        from: Tick,
        upper_bound: Tick,
        _cancel: &SyncCancellation,
    ) -> Result<()> {
        if let Some(e) = self.finalize_error.lock().unwrap().take() {
            return Err(e);
        }
        self.finalize_calls.lock().unwrap().push((from, upper_bound));
        Ok(())
    }
}

/// Factory handing out one shared fake of each syncer
pub(crate) struct FakeFactory {
    initial: Arc<FakeInitial>,
    tailing: Arc<FakeTailing>,
    pub initial_configs: Mutex<Vec<InitialSyncConfig>>,
}

impl FakeFactory {
    pub fn new(initial: Arc<FakeInitial>, tailing: Arc<FakeTailing>) -> Self {
        Self {
            initial,
            tailing,
            initial_configs: Mutex::default(),
        }
    }
}

impl SyncerFactory for FakeFactory {
    fn initial_syncer(&self, config: InitialSyncConfig) -> Result<Arc<dyn InitialSyncer>> {
        self.initial_configs.lock().unwrap().push(config);
        Ok(self.initial.clone())
    }

    fn tailing_syncer(
        &self,
        _database: &str,
        _endpoint: &str,
        _leader: &str,
    ) -> Result<Arc<dyn TailingSyncer>> {
        Ok(self.tailing.clone())
    }
}

/// Everything a coordinator test needs, with handles to all fakes
pub(crate) struct TestEnv {
    pub cluster: Arc<FakeCluster>,
    pub store: Arc<FakeStore>,
    pub initial: Arc<FakeInitial>,
    pub tailing: Arc<FakeTailing>,
    pub factory: Arc<FakeFactory>,
    pub ctx: Arc<SyncContext>,
}

impl TestEnv {
    /// Same fakes under a different configuration
    pub fn with_config(self, config: SyncConfig) -> TestEnv {
        let ctx = Arc::new(SyncContext {
            config,
            identity: self.ctx.identity.clone(),
            cluster: self.cluster.clone(),
            store: self.store.clone(),
            syncers: self.factory.clone(),
            tracker: self.ctx.tracker.clone(),
            shutdown: self.ctx.shutdown.clone(),
            http: self.ctx.http.clone(),
        });
        TestEnv { ctx, ..self }
    }
}

/// Healthy baseline: this server is the planned follower, the leader is
/// in place, the leader holds 500 documents against 480 local ones, and
/// one catch-up round suffices.
pub(crate) fn test_env(leader: &MockLeader) -> TestEnv {
    leader.state.doc_count.store(500, Ordering::SeqCst);
    let cluster = Arc::new(FakeCluster::new(
        &leader.endpoint,
        &["leader-1", "node-2"],
        vec![vec!["leader-1".to_string()]],
    ));
    cluster.version.store(3, Ordering::SeqCst);
    let store = Arc::new(FakeStore::new(480));
    let initial = Arc::new(FakeInitial::new(7));
    let tailing = Arc::new(FakeTailing::new(1, 100));
    let factory = Arc::new(FakeFactory::new(initial.clone(), tailing.clone()));
    let ctx = Arc::new(SyncContext {
        config: SyncConfig::default(),
        identity: test_identity(),
        cluster: cluster.clone(),
        store: store.clone(),
        syncers: factory.clone(),
        tracker: Arc::new(FailureTracker::new()),
        shutdown: ShutdownFlag::new(),
        http: reqwest::Client::new(),
    });
    TestEnv {
        cluster,
        store,
        initial,
        tailing,
        factory,
        ctx,
    }
}

pub(crate) fn test_spec() -> SyncJobSpec {
    SyncJobSpec {
        database: "db".to_string(),
        shard: "s100".to_string(),
        collection: "c9".to_string(),
        leader: "leader-1".to_string(),
        shard_version: 1,
        forced_resync: false,
        sync_by_revision: false,
        priority: JobPriority::Normal,
    }
}
