//! Allocation runs against an in-process labeling service and an in-memory
//! libSQL store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use task_allocator::allocator::{
    AssignmentAllocator, AssignmentRequest, POOL_FAILURE_MESSAGE, SUCCESS_MESSAGE, UserStatus,
};
use task_allocator::config::LabelingConfig;
use task_allocator::error::{DatabaseError, LabelingError};
use task_allocator::labeling::{AssigneePush, FilterSet, LabelingService, TaskPage, View};
use task_allocator::model::{AssignmentOutcome, DeveloperRecord, TaskId, WorkItem, WorkStatus};
use task_allocator::pool::TaskPoolClient;
use task_allocator::pusher::UpstreamPusher;
use task_allocator::recorder::AssignmentRecorder;
use task_allocator::retry::RetryPolicy;
use task_allocator::store::{DEVELOPER_ROLE, Database, LibSqlBackend, StoredAssignment};

const PROJECT: i64 = 42;

/// Labeling service double with a fixed pool and per-user push statuses.
#[derive(Default)]
struct FakeLabeling {
    page: Mutex<Option<TaskPage>>,
    filter_status: Mutex<u16>,
    push_status: Mutex<HashMap<i64, u16>>,
    pushes: Mutex<Vec<(i64, Vec<TaskId>)>>,
}

impl FakeLabeling {
    fn with_pool(total: u64, ids: &[i64]) -> Self {
        let fake = Self::default();
        *fake.page.lock().unwrap() = Some(TaskPage {
            total,
            ids: ids.iter().copied().map(TaskId).collect(),
        });
        *fake.filter_status.lock().unwrap() = 200;
        fake
    }

    fn fail_push_for(&self, user_id: i64, status: u16) {
        self.push_status.lock().unwrap().insert(user_id, status);
    }

    fn pushes(&self) -> Vec<(i64, Vec<TaskId>)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelingService for FakeLabeling {
    async fn list_views(&self, project_id: i64) -> Result<Vec<View>, LabelingError> {
        Ok(vec![View {
            id: 7,
            project: Some(project_id),
        }])
    }

    async fn update_view_filter(
        &self,
        _view_id: i64,
        _project_id: i64,
        _filters: &FilterSet,
    ) -> Result<(), LabelingError> {
        let status = *self.filter_status.lock().unwrap();
        if status == 200 {
            Ok(())
        } else {
            Err(LabelingError::Status {
                endpoint: "PUT /views/{id}".into(),
                status,
            })
        }
    }

    async fn list_tasks(
        &self,
        _view_id: i64,
        _project_id: i64,
        _page_size: u32,
    ) -> Result<TaskPage, LabelingError> {
        self.page.lock().unwrap().clone().ok_or(LabelingError::Status {
            endpoint: "GET /tasks".into(),
            status: 503,
        })
    }

    async fn assign_tasks(
        &self,
        _project_id: i64,
        push: &AssigneePush,
    ) -> Result<u16, LabelingError> {
        let user = push.users[0];
        self.pushes
            .lock()
            .unwrap()
            .push((user, push.selected_items.included.clone()));
        Ok(*self.push_status.lock().unwrap().get(&user).unwrap_or(&200))
    }
}

/// Store wrapper whose audit writes fail for one email.
struct FailingWrites {
    inner: Arc<LibSqlBackend>,
    fail_for: String,
}

#[async_trait]
impl Database for FailingWrites {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.inner.init_schema().await
    }
    async fn upsert_developer(&self, d: &DeveloperRecord, role: &str) -> Result<(), DatabaseError> {
        self.inner.upsert_developer(d, role).await
    }
    async fn list_developers(&self) -> Result<Vec<DeveloperRecord>, DatabaseError> {
        self.inner.list_developers().await
    }
    async fn append_assignment(
        &self,
        outcome: &AssignmentOutcome,
        work_items: &[WorkItem],
    ) -> Result<i64, DatabaseError> {
        if outcome.user_email == self.fail_for {
            return Err(DatabaseError::Query("disk full".into()));
        }
        self.inner.append_assignment(outcome, work_items).await
    }
    async fn list_assignments(
        &self,
        project_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredAssignment>, DatabaseError> {
        self.inner.list_assignments(project_id, limit).await
    }
    async fn list_work_items(&self, project_id: i64) -> Result<Vec<WorkItem>, DatabaseError> {
        self.inner.list_work_items(project_id).await
    }
}

fn developer(user_id: i64, email: &str) -> DeveloperRecord {
    DeveloperRecord {
        user_id,
        user_email: email.to_string(),
        location: Some("Bengaluru".into()),
        skillsets: BTreeSet::from(["Hindi".to_string()]),
    }
}

async fn seeded_db() -> Arc<LibSqlBackend> {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    for (id, email) in [(1, "alice@x.com"), (2, "bob@x.com"), (3, "carol@x.com")] {
        db.upsert_developer(&developer(id, email), DEVELOPER_ROLE)
            .await
            .unwrap();
    }
    db
}

fn allocator(labeling: Arc<FakeLabeling>, db: Arc<dyn Database>) -> AssignmentAllocator {
    let mut config = LabelingConfig::new("http://unused", secrecy::SecretString::from("t"));
    config.filter_retry = RetryPolicy::immediate(20);
    AssignmentAllocator::new(
        TaskPoolClient::new(labeling.clone(), config),
        UpstreamPusher::new(labeling),
        AssignmentRecorder::new(Arc::clone(&db)),
        db,
    )
}

fn request(language: &str, counts: &[(&str, u32)]) -> AssignmentRequest {
    AssignmentRequest::new(
        PROJECT,
        language,
        counts.iter().map(|(e, c)| (e.to_string(), *c)).collect(),
    )
}

fn tasks(ids: &[i64]) -> Vec<TaskId> {
    ids.iter().copied().map(TaskId).collect()
}

async fn logs_for(db: &LibSqlBackend, email: &str) -> Vec<StoredAssignment> {
    db.list_assignments(Some(PROJECT), 1000)
        .await
        .unwrap()
        .into_iter()
        .filter(|l| l.outcome.user_email == email)
        .collect()
}

#[tokio::test]
async fn slices_pool_in_request_order() {
    let fake = Arc::new(FakeLabeling::with_pool(5, &[1, 2, 3, 4, 5]));
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 2), ("bob@x.com", 3)]))
        .await;

    assert!(!report.error);
    assert_eq!(report.message, SUCCESS_MESSAGE);
    assert_eq!(
        fake.pushes(),
        vec![(1, tasks(&[1, 2])), (2, tasks(&[3, 4, 5]))]
    );

    let alice = logs_for(&db, "alice@x.com").await;
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].outcome.task_ids, Some(tasks(&[1, 2])));
    let bob = logs_for(&db, "bob@x.com").await;
    assert_eq!(bob[0].outcome.task_ids, Some(tasks(&[3, 4, 5])));

    let items = db.list_work_items(PROJECT).await.unwrap();
    assert_eq!(items.len(), 5);
    assert!(items.iter().all(|i| i.status == WorkStatus::NotStarted));
    assert!(items.iter().all(|i| i.language == "Hindi"));
    let batch = items[0].batch_id.clone();
    assert!(batch.is_some());
    assert!(items.iter().all(|i| i.batch_id == batch), "one run, one batch id");
}

#[tokio::test]
async fn capacity_overrun_has_no_side_effects() {
    let fake = Arc::new(FakeLabeling::with_pool(3, &[1, 2, 3]));
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 5)]))
        .await;

    assert!(report.error);
    assert!(report.message.contains('3'), "{}", report.message);
    assert!(report.message.contains("greater than available tasks"));
    assert!(fake.pushes().is_empty());
    assert!(db.list_assignments(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn capacity_uses_reported_total_not_listed_ids() {
    // Upstream reports 5 but only lists 3 ids.
    let fake = Arc::new(FakeLabeling::with_pool(5, &[1, 2, 3]));
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 2), ("bob@x.com", 3), ("carol@x.com", 0)]))
        .await;

    assert!(!report.error);
    assert_eq!(report.results[1].task_ids, tasks(&[3]));
    assert_eq!(report.results[1].status, UserStatus::Assigned);
    assert_eq!(report.results[2].status, UserStatus::ZeroRecorded);

    let bob = logs_for(&db, "bob@x.com").await;
    assert_eq!(bob[0].outcome.assigned_count, 1);
    assert_eq!(bob[0].outcome.task_ids, Some(tasks(&[3])));
}

#[tokio::test]
async fn exhausted_pool_skips_push() {
    let fake = Arc::new(FakeLabeling::with_pool(4, &[1, 2]));
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 2), ("bob@x.com", 2)]))
        .await;

    assert!(!report.error);
    assert_eq!(report.results[1].status, UserStatus::PoolExhausted);
    assert_eq!(fake.pushes().len(), 1);
    assert!(logs_for(&db, "bob@x.com").await.is_empty());
}

#[tokio::test]
async fn pool_unavailable_has_no_side_effects() {
    let fake = Arc::new(FakeLabeling::default());
    *fake.filter_status.lock().unwrap() = 200;
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 1)]))
        .await;

    assert!(report.error);
    assert_eq!(report.message, POOL_FAILURE_MESSAGE);
    assert!(fake.pushes().is_empty());
    assert!(db.list_assignments(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn view_filter_internal_errors_abort_the_run() {
    let fake = Arc::new(FakeLabeling::with_pool(5, &[1, 2, 3, 4, 5]));
    *fake.filter_status.lock().unwrap() = 500;
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("all", &[("alice@x.com", 1)]))
        .await;

    assert!(report.error);
    assert_eq!(report.message, POOL_FAILURE_MESSAGE);
    assert!(fake.pushes().is_empty());
}

#[tokio::test]
async fn zero_count_writes_one_marker_row() {
    let fake = Arc::new(FakeLabeling::with_pool(2, &[1, 2]));
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 0), ("bob@x.com", 2)]))
        .await;

    assert!(!report.error);
    let alice = logs_for(&db, "alice@x.com").await;
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].outcome.assigned_count, 0);
    assert!(alice[0].outcome.task_ids.is_none());

    let items = db.list_work_items(PROJECT).await.unwrap();
    assert!(items.iter().all(|i| i.user_email != "alice@x.com"));
    assert!(fake.pushes().iter().all(|(user, _)| *user != 1));
    // Bob still gets the first ids: the zero-count user consumed nothing.
    assert_eq!(fake.pushes(), vec![(2, tasks(&[1, 2]))]);
}

#[tokio::test]
async fn unknown_user_is_skipped() {
    let fake = Arc::new(FakeLabeling::with_pool(4, &[1, 2, 3, 4]));
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("mallory@x.com", 2), ("bob@x.com", 2)]))
        .await;

    assert!(!report.error);
    assert_eq!(report.results[0].status, UserStatus::UserNotFound);
    assert!(logs_for(&db, "mallory@x.com").await.is_empty());
    assert_eq!(fake.pushes(), vec![(2, tasks(&[1, 2]))]);
}

#[tokio::test]
async fn push_failure_is_swallowed_per_user() {
    let fake = Arc::new(FakeLabeling::with_pool(4, &[1, 2, 3, 4]));
    fake.fail_push_for(2, 500);
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 2), ("bob@x.com", 2)]))
        .await;

    assert!(!report.error, "aggregate verdict stays successful");
    assert_eq!(report.results[0].status, UserStatus::Assigned);
    assert_eq!(report.results[1].status, UserStatus::PushFailed);

    let alice = logs_for(&db, "alice@x.com").await;
    assert_eq!(alice[0].outcome.task_ids, Some(tasks(&[1, 2])));
    assert!(logs_for(&db, "bob@x.com").await.is_empty());
    assert_eq!(db.list_work_items(PROJECT).await.unwrap().len(), 2);
}

#[tokio::test]
async fn ambiguous_push_failure_does_not_reuse_ids() {
    let fake = Arc::new(FakeLabeling::with_pool(6, &[1, 2, 3, 4, 5, 6]));
    fake.fail_push_for(1, 502);
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    allocator
        .allocate(&request("Hindi", &[("alice@x.com", 2), ("bob@x.com", 2)]))
        .await;

    assert_eq!(fake.pushes()[1], (2, tasks(&[3, 4])));
}

#[tokio::test]
async fn rejected_push_releases_ids_to_later_users() {
    let fake = Arc::new(FakeLabeling::with_pool(5, &[1, 2, 3, 4, 5]));
    fake.fail_push_for(2, 403);
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request(
            "Hindi",
            &[("alice@x.com", 1), ("bob@x.com", 2), ("carol@x.com", 2)],
        ))
        .await;

    assert!(!report.error);
    assert_eq!(report.results[1].status, UserStatus::PushFailed);
    assert!(report.results[1].detail.as_deref().unwrap().contains("returned to pool"));
    assert!(report.results[1].task_ids.is_empty(), "released ids are not bob's");
    assert_eq!(report.results[2].task_ids, tasks(&[2, 3]));

    let mut seen = HashSet::new();
    for r in &report.results {
        for id in &r.task_ids {
            assert!(seen.insert(*id), "{id} reported under two users");
        }
    }
    let carol = logs_for(&db, "carol@x.com").await;
    assert_eq!(carol[0].outcome.task_ids, Some(tasks(&[2, 3])));
}

#[tokio::test]
async fn record_failure_is_reported_and_run_continues() {
    let fake = Arc::new(FakeLabeling::with_pool(4, &[1, 2, 3, 4]));
    let inner = seeded_db().await;
    let db: Arc<dyn Database> = Arc::new(FailingWrites {
        inner: inner.clone(),
        fail_for: "alice@x.com".into(),
    });
    let allocator = allocator(fake.clone(), db);

    let report = allocator
        .allocate(&request("Hindi", &[("alice@x.com", 2), ("bob@x.com", 2)]))
        .await;

    assert!(!report.error);
    assert_eq!(report.results[0].status, UserStatus::RecordFailed);
    assert_eq!(report.results[1].status, UserStatus::Assigned);
    assert_eq!(fake.pushes().len(), 2, "alice's push already went out");
    assert!(logs_for(&inner, "alice@x.com").await.is_empty());
    assert_eq!(logs_for(&inner, "bob@x.com").await.len(), 1);
}

#[tokio::test]
async fn successful_slices_are_disjoint_subset_of_pool() {
    let pool: Vec<i64> = (100..140).collect();
    let fake = Arc::new(FakeLabeling::with_pool(pool.len() as u64, &pool));
    fake.fail_push_for(2, 409);
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());

    let report = allocator
        .allocate(&request(
            "all",
            &[("alice@x.com", 13), ("bob@x.com", 9), ("carol@x.com", 17)],
        ))
        .await;
    assert!(!report.error);

    let pool_ids: HashSet<TaskId> = tasks(&pool).into_iter().collect();
    let mut seen = HashSet::new();
    for r in report.results.iter().filter(|r| r.status == UserStatus::Assigned) {
        for id in &r.task_ids {
            assert!(pool_ids.contains(id));
            assert!(seen.insert(*id), "{id} assigned twice");
        }
    }
    let items = db.list_work_items(PROJECT).await.unwrap();
    assert_eq!(items.len(), seen.len());
}

#[tokio::test]
async fn replaying_a_request_is_not_idempotent() {
    // The pool has no reservations: if upstream still reports the same
    // tasks, a replay hands them out again.
    let fake = Arc::new(FakeLabeling::with_pool(3, &[1, 2, 3]));
    let db = seeded_db().await;
    let allocator = allocator(fake.clone(), db.clone());
    let req = request("Hindi", &[("alice@x.com", 2)]);

    allocator.allocate(&req).await;
    allocator.allocate(&req).await;

    let pushes = fake.pushes();
    assert_eq!(pushes[0].1, pushes[1].1);
    assert_eq!(logs_for(&db, "alice@x.com").await.len(), 2);
}

/// Labeling double that sleeps in every call and records the order of
/// calls plus the peak number of overlapping ones.
#[derive(Default)]
struct SlowLabeling {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl SlowLabeling {
    async fn enter(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LabelingService for SlowLabeling {
    async fn list_views(&self, project_id: i64) -> Result<Vec<View>, LabelingError> {
        Ok(vec![View {
            id: 7,
            project: Some(project_id),
        }])
    }

    async fn update_view_filter(
        &self,
        _view_id: i64,
        _project_id: i64,
        _filters: &FilterSet,
    ) -> Result<(), LabelingError> {
        self.enter("filter").await;
        Ok(())
    }

    async fn list_tasks(
        &self,
        _view_id: i64,
        _project_id: i64,
        _page_size: u32,
    ) -> Result<TaskPage, LabelingError> {
        self.enter("list").await;
        Ok(TaskPage {
            total: 10,
            ids: tasks(&(1..=10).collect::<Vec<_>>()),
        })
    }

    async fn assign_tasks(
        &self,
        _project_id: i64,
        _push: &AssigneePush,
    ) -> Result<u16, LabelingError> {
        self.enter("push").await;
        Ok(200)
    }
}

#[tokio::test]
async fn runs_for_one_project_do_not_interleave() {
    let fake = Arc::new(SlowLabeling::default());
    let db = seeded_db().await;
    let mut config = LabelingConfig::new("http://unused", secrecy::SecretString::from("t"));
    config.filter_retry = RetryPolicy::immediate(20);
    let store: Arc<dyn Database> = db.clone();
    let allocator = Arc::new(AssignmentAllocator::new(
        TaskPoolClient::new(fake.clone(), config),
        UpstreamPusher::new(fake.clone()),
        AssignmentRecorder::new(Arc::clone(&store)),
        store,
    ));

    let a = {
        let allocator = Arc::clone(&allocator);
        tokio::spawn(async move {
            allocator
                .allocate(&request("Hindi", &[("alice@x.com", 2), ("carol@x.com", 1)]))
                .await
        })
    };
    let b = {
        let allocator = Arc::clone(&allocator);
        tokio::spawn(async move { allocator.allocate(&request("all", &[("bob@x.com", 3)])).await })
    };

    assert!(!a.await.unwrap().error);
    assert!(!b.await.unwrap().error);

    assert_eq!(fake.peak.load(Ordering::SeqCst), 1, "upstream calls overlapped");
    let calls = fake.calls.lock().unwrap().clone();
    let a_then_b = ["filter", "list", "push", "push", "filter", "list", "push"];
    let b_then_a = ["filter", "list", "push", "filter", "list", "push", "push"];
    assert!(
        calls == a_then_b || calls == b_then_a,
        "second run started before the first finished: {calls:?}"
    );
    // Each run saw the full pool, so the second run re-handed the first ids.
    assert_eq!(db.list_assignments(Some(PROJECT), 10).await.unwrap().len(), 3);
}
