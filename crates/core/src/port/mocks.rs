// ============================================================================
// In-Memory Implementations for Testing
// ============================================================================
//
// The job store mirrors the Postgres adapter's locking model: every row owns a
// tokio mutex standing in for the row lock, `transit_state` waits for it and
// `transit_state_batch` only takes the locks that are free right now.

use super::*;
use crate::domain::{
    Feed, FeedId, FeedRefreshJob, FeedRefreshJobFiltering, FeedRefreshJobOrdering,
    FeedRefreshJobState, FeedRefreshJobUpdates, JobId, NewFeedPost, NewFeedRefreshJob,
    RefreshJobError,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

/// Manually driven clock
pub struct ManualTimeProvider {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeProvider {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
struct JobTable {
    rows: BTreeMap<JobId, FeedRefreshJob>,
    locks: HashMap<JobId, Arc<RowLock<()>>>,
    feeds: HashSet<FeedId>,
    last_id: JobId,
}

impl JobTable {
    fn find_by_feed(&self, feed_id: FeedId) -> Option<FeedRefreshJob> {
        self.rows.values().find(|job| job.feed_id == feed_id).cloned()
    }
}

/// In-memory refresh job store
#[derive(Clone)]
pub struct InMemoryFeedRefreshJobRepository {
    table: Arc<Mutex<JobTable>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl InMemoryFeedRefreshJobRepository {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            table: Arc::new(Mutex::new(JobTable::default())),
            time_provider,
        }
    }

    /// Register a feed id so jobs may reference it
    pub fn add_feed(&self, feed_id: FeedId) {
        self.table.lock().unwrap().feeds.insert(feed_id);
    }

    /// Committed rows ordered by id
    pub fn snapshot(&self) -> Vec<FeedRefreshJob> {
        self.table.lock().unwrap().rows.values().cloned().collect()
    }

    /// Overwrite a committed row, bypassing the transition protocol
    pub fn put(&self, job: FeedRefreshJob) {
        let mut table = self.table.lock().unwrap();
        table.last_id = table.last_id.max(job.id);
        table.feeds.insert(job.feed_id);
        table
            .locks
            .entry(job.id)
            .or_insert_with(|| Arc::new(RowLock::new(())));
        table.rows.insert(job.id, job);
    }

    /// Hold a row lock as a concurrent transaction would
    pub async fn hold_row_lock(&self, job_id: JobId) -> Option<OwnedMutexGuard<()>> {
        let lock = self.table.lock().unwrap().locks.get(&job_id).cloned();
        match lock {
            Some(lock) => Some(lock.lock_owned().await),
            None => None,
        }
    }

    fn begin(&self) -> InMemoryJobTransaction {
        InMemoryJobTransaction {
            table: Arc::clone(&self.table),
            time_provider: Arc::clone(&self.time_provider),
            staged: BTreeMap::new(),
            created: Vec::new(),
            guards: HashMap::new(),
            finished: false,
        }
    }

    fn committed(&self, pick: impl Fn(&JobTable) -> Option<FeedRefreshJob>) -> Option<FeedRefreshJob> {
        let table = self.table.lock().unwrap();
        pick(&*table)
    }
}

#[async_trait]
impl FeedRefreshJobRepository for InMemoryFeedRefreshJobRepository {
    async fn get_by_id(&self, job_id: JobId) -> Result<FeedRefreshJob> {
        self.committed(|table| table.rows.get(&job_id).cloned())
            .ok_or_else(|| RefreshJobError::not_found_by("id", job_id).into())
    }

    async fn get_by_feed_id(&self, feed_id: FeedId) -> Result<FeedRefreshJob> {
        self.committed(|table| table.find_by_feed(feed_id))
            .ok_or_else(|| RefreshJobError::not_found_by("feed_id", feed_id).into())
    }

    async fn get_or_create(&self, new_job: &NewFeedRefreshJob) -> Result<FeedRefreshJob> {
        let mut tx = self.begin();
        let job = tx.get_or_create(new_job).await?;
        Transaction::commit(Box::new(tx)).await?;
        Ok(job)
    }

    async fn get_list(
        &self,
        order_by: FeedRefreshJobOrdering,
        filter_by: Option<&FeedRefreshJobFiltering>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FeedRefreshJob>> {
        let mut jobs: Vec<FeedRefreshJob> = {
            let table = self.table.lock().unwrap();
            table
                .rows
                .values()
                .filter(|job| filter_by.map_or(true, |filter| filter.matches(job)))
                .cloned()
                .collect()
        };
        jobs.sort_by(|a, b| order_by.compare(a, b));

        Ok(jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update(
        &self,
        job_id: JobId,
        updates: &FeedRefreshJobUpdates,
    ) -> Result<FeedRefreshJob> {
        let mut tx = self.begin();
        let job = tx.update(job_id, updates).await?;
        Transaction::commit(Box::new(tx)).await?;
        Ok(job)
    }

    async fn transit_state(
        &self,
        job_id: JobId,
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<FeedRefreshJob> {
        let mut tx = self.begin();
        let job = tx.transit_state(job_id, old_state, new_state).await?;
        Transaction::commit(Box::new(tx)).await?;
        Ok(job)
    }

    async fn transit_state_batch(
        &self,
        job_ids: &[JobId],
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<Vec<FeedRefreshJob>> {
        let mut tx = self.begin();
        let jobs = tx
            .transit_state_batch(job_ids, old_state, new_state)
            .await?;
        Transaction::commit(Box::new(tx)).await?;
        Ok(jobs)
    }
}

#[async_trait]
impl TransactionalFeedRefreshJobRepository for InMemoryFeedRefreshJobRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn FeedRefreshJobTransaction>> {
        Ok(Box::new(self.begin()))
    }
}

/// In-memory transaction
///
/// Updates are staged and published on commit. Inserts become visible at once
/// (the unique feed_id check needs them) and are removed again on rollback.
pub struct InMemoryJobTransaction {
    table: Arc<Mutex<JobTable>>,
    time_provider: Arc<dyn TimeProvider>,
    staged: BTreeMap<JobId, FeedRefreshJob>,
    created: Vec<JobId>,
    guards: HashMap<JobId, OwnedMutexGuard<()>>,
    finished: bool,
}

impl InMemoryJobTransaction {
    fn current(&self, job_id: JobId) -> Option<FeedRefreshJob> {
        self.staged
            .get(&job_id)
            .cloned()
            .or_else(|| self.table.lock().unwrap().rows.get(&job_id).cloned())
    }

    fn current_by_feed(&self, feed_id: FeedId) -> Option<FeedRefreshJob> {
        let committed = self.table.lock().unwrap().find_by_feed(feed_id);
        committed.map(|job| self.staged.get(&job.id).cloned().unwrap_or(job))
    }

    /// Blocking row lock (SELECT ... FOR UPDATE)
    async fn lock_row(&mut self, job_id: JobId) {
        if self.guards.contains_key(&job_id) {
            return;
        }
        let lock = self.table.lock().unwrap().locks.get(&job_id).cloned();
        if let Some(lock) = lock {
            let guard = lock.lock_owned().await;
            self.guards.insert(job_id, guard);
        }
    }

    /// Non-blocking row lock (SELECT ... FOR UPDATE SKIP LOCKED)
    fn try_lock_row(&mut self, job_id: JobId) -> bool {
        if self.guards.contains_key(&job_id) {
            return true;
        }
        let lock = self.table.lock().unwrap().locks.get(&job_id).cloned();
        match lock.map(|lock| lock.try_lock_owned()) {
            Some(Ok(guard)) => {
                self.guards.insert(job_id, guard);
                true
            }
            _ => false,
        }
    }

    fn stage_transition(
        &mut self,
        job_id: JobId,
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Option<FeedRefreshJob> {
        let mut job = self.current(job_id)?;
        if job.state != old_state {
            return None;
        }
        job.state = new_state;
        job.state_changed_at = self.time_provider.now();
        self.staged.insert(job_id, job.clone());
        Some(job)
    }
}

impl Drop for InMemoryJobTransaction {
    fn drop(&mut self) {
        if self.finished || self.created.is_empty() {
            return;
        }
        if let Ok(mut table) = self.table.lock() {
            for job_id in &self.created {
                table.rows.remove(job_id);
                table.locks.remove(job_id);
            }
        }
    }
}

#[async_trait]
impl Transaction for InMemoryJobTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.table.lock().unwrap().rows.extend(staged);
        self.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FeedRefreshJobTransaction for InMemoryJobTransaction {
    async fn get_by_id(&mut self, job_id: JobId) -> Result<FeedRefreshJob> {
        self.current(job_id)
            .ok_or_else(|| RefreshJobError::not_found_by("id", job_id).into())
    }

    async fn get_by_feed_id(&mut self, feed_id: FeedId) -> Result<FeedRefreshJob> {
        self.current_by_feed(feed_id)
            .ok_or_else(|| RefreshJobError::not_found_by("feed_id", feed_id).into())
    }

    async fn get_or_create(&mut self, new_job: &NewFeedRefreshJob) -> Result<FeedRefreshJob> {
        if let Some(job) = self.current_by_feed(new_job.feed_id) {
            return Ok(job);
        }

        let now = self.time_provider.now();
        let mut table = self.table.lock().unwrap();
        if !table.feeds.contains(&new_job.feed_id) {
            return Err(RefreshJobError::NoFeed {
                feed_id: new_job.feed_id,
            }
            .into());
        }
        // Lost the race: someone inserted the row since the read above
        if let Some(existing) = table.find_by_feed(new_job.feed_id) {
            return Ok(existing);
        }

        table.last_id += 1;
        let job = FeedRefreshJob {
            id: table.last_id,
            feed_id: new_job.feed_id,
            state: FeedRefreshJobState::Pending,
            execute_after: new_job.execute_after,
            retries: 0,
            state_changed_at: now,
        };
        table.rows.insert(job.id, job.clone());
        table.locks.insert(job.id, Arc::new(RowLock::new(())));
        self.created.push(job.id);
        Ok(job)
    }

    async fn update(
        &mut self,
        job_id: JobId,
        updates: &FeedRefreshJobUpdates,
    ) -> Result<FeedRefreshJob> {
        self.lock_row(job_id).await;
        let mut job = self.current(job_id).ok_or_else(|| {
            AppError::from(RefreshJobError::NotFound(format!(
                "Failed to update refresh job with job_id={}",
                job_id
            )))
        })?;
        updates.apply_to(&mut job);
        self.staged.insert(job_id, job.clone());
        Ok(job)
    }

    async fn transit_state(
        &mut self,
        job_id: JobId,
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<FeedRefreshJob> {
        self.lock_row(job_id).await;
        self.stage_transition(job_id, old_state, new_state)
            .ok_or_else(|| {
                RefreshJobError::StateTransition {
                    job_id,
                    from: old_state,
                    to: new_state,
                }
                .into()
            })
    }

    async fn transit_state_batch(
        &mut self,
        job_ids: &[JobId],
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<Vec<FeedRefreshJob>> {
        let mut ids = job_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let locked: Vec<JobId> = ids
            .into_iter()
            .filter(|job_id| self.try_lock_row(*job_id))
            .collect();

        Ok(locked
            .into_iter()
            .filter_map(|job_id| self.stage_transition(job_id, old_state, new_state))
            .collect())
    }
}

/// In-memory feed repository sharing the job store's view of feeds
pub struct InMemoryFeedRepository {
    feeds: Mutex<BTreeMap<FeedId, Feed>>,
    jobs: InMemoryFeedRefreshJobRepository,
}

impl InMemoryFeedRepository {
    pub fn new(jobs: InMemoryFeedRefreshJobRepository) -> Self {
        Self {
            feeds: Mutex::new(BTreeMap::new()),
            jobs,
        }
    }

    pub fn add_feed(&self, id: FeedId, url: impl Into<String>) -> Feed {
        let feed = Feed {
            id,
            url: url.into(),
            title: None,
        };
        self.feeds.lock().unwrap().insert(id, feed.clone());
        self.jobs.add_feed(id);
        feed
    }
}

#[async_trait]
impl FeedRepository for InMemoryFeedRepository {
    async fn get_by_id(&self, feed_id: FeedId) -> Result<Feed> {
        self.feeds
            .lock()
            .unwrap()
            .get(&feed_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Feed {} not found", feed_id)))
    }

    async fn list_unscheduled(&self, limit: i64) -> Result<Vec<Feed>> {
        let scheduled: HashSet<FeedId> =
            self.jobs.snapshot().into_iter().map(|job| job.feed_id).collect();
        Ok(self
            .feeds
            .lock()
            .unwrap()
            .values()
            .filter(|feed| !scheduled.contains(&feed.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// In-memory post store keyed by (feed_id, guid)
#[derive(Default)]
pub struct InMemoryFeedPostRepository {
    posts: Mutex<BTreeMap<(FeedId, String), NewFeedPost>>,
}

impl InMemoryFeedPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, feed_id: FeedId) -> usize {
        self.posts
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| *id == feed_id)
            .count()
    }
}

#[async_trait]
impl FeedPostRepository for InMemoryFeedPostRepository {
    async fn persist_new(&self, feed_id: FeedId, posts: &[NewFeedPost]) -> Result<u64> {
        let mut stored = self.posts.lock().unwrap();
        let mut inserted = 0;
        for post in posts {
            let key = (feed_id, post.guid.clone());
            if !stored.contains_key(&key) {
                stored.insert(key, post.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

/// Mock fetcher behavior
#[derive(Debug, Clone)]
pub enum MockFetchBehavior {
    /// Return these posts
    Posts(Vec<NewFeedPost>),
    /// Fail with this error
    Fail(FetchError),
    /// Panic with message (for panic isolation testing)
    Panic(String),
}

/// Mock Feed Content Fetcher (behavior per URL, empty feed by default)
#[derive(Default)]
pub struct MockFeedContentFetcher {
    behaviors: Mutex<HashMap<String, MockFetchBehavior>>,
    call_count: Mutex<usize>,
}

impl MockFeedContentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, url: impl Into<String>, behavior: MockFetchBehavior) {
        self.behaviors.lock().unwrap().insert(url.into(), behavior);
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl FeedContentFetcher for MockFeedContentFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<NewFeedPost>, FetchError> {
        *self.call_count.lock().unwrap() += 1;

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(MockFetchBehavior::Posts(Vec::new()));

        match behavior {
            MockFetchBehavior::Posts(posts) => Ok(posts),
            MockFetchBehavior::Fail(err) => Err(err),
            MockFetchBehavior::Panic(msg) => {
                panic!("{}", msg);
            }
        }
    }
}

/// Build a post with the given guid (test helper)
pub fn post(guid: impl Into<String>) -> NewFeedPost {
    let guid = guid.into();
    NewFeedPost {
        title: format!("Post {}", guid),
        url: Some(format!("https://example.com/{}", guid)),
        summary: None,
        published_at: None,
        guid,
    }
}
