//! Per-record dynamic DNS schedules.
//!
//! Each record with a refresh rate gets its own task ticking at that rate. Jobs live only in
//! memory; [`Scheduler::load_and_start`] rebuilds them from the store at startup. A separate
//! sweep task updates every record on a fixed interval regardless of the per-record jobs.

use crate::dns::UpdateEngine;
use crate::error::Error;
use crate::model::UpdateResult;
use crate::store::DynStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What a scheduled tick runs.
#[async_trait::async_trait]
pub trait RecordUpdater {
    async fn update_record(&self, record_id: u64) -> Result<UpdateResult, Error>;
    async fn update_all_records(&self) -> Result<Vec<UpdateResult>, Error>;
}

pub type DynUpdater = Arc<dyn RecordUpdater + Send + Sync>;

#[async_trait::async_trait]
impl RecordUpdater for UpdateEngine {
    async fn update_record(&self, record_id: u64) -> Result<UpdateResult, Error> {
        self.update_one(record_id).await
    }

    async fn update_all_records(&self) -> Result<Vec<UpdateResult>, Error> {
        self.update_all().await
    }
}

/// Snapshot of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub record_id: u64,
    pub interval_minutes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_started: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub next_update: OffsetDateTime,
    pub is_paused: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paused_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
struct JobState {
    interval_minutes: u64,
    last_started: OffsetDateTime,
    next_update: OffsetDateTime,
    paused_at: Option<OffsetDateTime>,
}

impl JobState {
    fn new(interval_minutes: u64, now: OffsetDateTime) -> Self {
        JobState {
            interval_minutes,
            last_started: now,
            next_update: now + interval(interval_minutes),
            paused_at: None,
        }
    }

    fn pause(&mut self, now: OffsetDateTime) {
        self.paused_at.get_or_insert(now);
    }

    /// Push the next update back by the time spent paused.
    fn resume(&mut self, now: OffsetDateTime) {
        if let Some(paused_at) = self.paused_at.take() {
            self.next_update += now - paused_at;
        }
    }

    /// Whether the tick at `now` should run an update.
    fn tick(&mut self, now: OffsetDateTime) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.last_started = now;
        self.next_update = now + interval(self.interval_minutes);
        true
    }

    fn info(&self, record_id: u64) -> JobInfo {
        JobInfo {
            record_id,
            interval_minutes: self.interval_minutes,
            last_started: self.last_started,
            next_update: self.next_update,
            is_paused: self.paused_at.is_some(),
            paused_at: self.paused_at,
        }
    }
}

fn interval(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

type SharedState = Arc<Mutex<JobState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Job {
    state: SharedState,
    stop: oneshot::Sender<()>,
}

impl Job {
    fn stop(self) {
        // The loop may already have exited.
        let _ = self.stop.send(());
    }
}

pub struct Scheduler {
    updater: DynUpdater,
    jobs: RwLock<HashMap<u64, Job>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(updater: DynUpdater) -> Self {
        Scheduler {
            updater,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Start updating `record_id` every `interval_minutes`, replacing any existing job for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a zero interval.
    pub async fn start(&self, record_id: u64, interval_minutes: u64) -> Result<(), Error> {
        if interval_minutes == 0 {
            return Err(Error::Validation(
                "refresh interval must be at least one minute".to_string(),
            ));
        }
        let state = Arc::new(Mutex::new(JobState::new(
            interval_minutes,
            OffsetDateTime::now_utc(),
        )));
        let (stop, stopped) = oneshot::channel();
        tokio::spawn(run(
            record_id,
            interval(interval_minutes),
            state.clone(),
            self.updater.clone(),
            stopped,
        ));

        let previous = self
            .jobs
            .write()
            .await
            .insert(record_id, Job { state, stop });
        if let Some(previous) = previous {
            previous.stop();
            debug!("replaced schedule for record {record_id}");
        }
        info!("scheduled record {record_id} every {interval_minutes} minute(s)");
        Ok(())
    }

    /// Stop the job for `record_id`. Returns whether there was one.
    pub async fn stop(&self, record_id: u64) -> bool {
        let job = self.jobs.write().await.remove(&record_id);
        match job {
            Some(job) => {
                job.stop();
                info!("stopped schedule for record {record_id}");
                true
            }
            None => false,
        }
    }

    /// Skip ticks until resumed. The job keeps its timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no job exists for `record_id`.
    pub async fn pause(&self, record_id: u64) -> Result<JobInfo, Error> {
        self.with_job(record_id, |state| state.pause(OffsetDateTime::now_utc()))
            .await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no job exists for `record_id`.
    pub async fn resume(&self, record_id: u64) -> Result<JobInfo, Error> {
        self.with_job(record_id, |state| state.resume(OffsetDateTime::now_utc()))
            .await
    }

    async fn with_job(
        &self,
        record_id: u64,
        f: impl FnOnce(&mut JobState),
    ) -> Result<JobInfo, Error> {
        let jobs = self.jobs.read().await;
        let job = jobs
            .get(&record_id)
            .ok_or_else(|| Error::not_found("scheduled job", record_id))?;
        let mut state = lock(&job.state);
        f(&mut *state);
        Ok(state.info(record_id))
    }

    /// Apply a record's refresh rate: a positive rate (re)starts its job, anything else stops it.
    pub async fn update(&self, record_id: u64, refresh_minutes: Option<i64>) {
        match refresh_minutes
            .filter(|rate| *rate > 0)
            .and_then(|rate| u64::try_from(rate).ok())
        {
            Some(minutes) => {
                if let Err(err) = self.start(record_id, minutes).await {
                    warn!("failed to schedule record {record_id}: {err}");
                }
            }
            None => {
                self.stop(record_id).await;
            }
        }
    }

    /// Snapshot of every job, ordered by record id.
    pub async fn list_active(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.read().await;
        let mut infos: Vec<JobInfo> = jobs
            .iter()
            .map(|(record_id, job)| lock(&job.state).info(*record_id))
            .collect();
        infos.sort_by_key(|info| info.record_id);
        infos
    }

    pub async fn is_scheduled(&self, record_id: u64) -> bool {
        self.jobs.read().await.contains_key(&record_id)
    }

    /// Start a job for every active record with a refresh rate in every active configuration.
    /// Returns the number of jobs started. A configuration whose records can't be listed, or a
    /// record whose job can't start, is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns store errors from listing the configurations.
    pub async fn load_and_start(&self, store: &DynStore) -> Result<usize, Error> {
        let mut scheduled = Vec::new();
        {
            let store = store.read().await;
            for config in store.list_dns_configs().await? {
                if !config.is_active {
                    continue;
                }
                let records = match store.list_dns_records(config.id).await {
                    Ok(records) => records,
                    Err(err) => {
                        warn!("failed to load records of DNS configuration {}: {err}", config.id);
                        continue;
                    }
                };
                for record in records {
                    if let Some(minutes) = record.refresh_minutes().filter(|_| record.is_active) {
                        scheduled.push((record.id, minutes));
                    }
                }
            }
        }
        let mut started = 0;
        for (record_id, minutes) in scheduled {
            match self.start(record_id, minutes).await {
                Ok(()) => started += 1,
                Err(err) => warn!("failed to schedule record {record_id}: {err}"),
            }
        }
        info!("started {started} scheduled DNS job(s)");
        Ok(started)
    }

    pub async fn stop_all(&self) {
        let jobs: Vec<Job> = self.jobs.write().await.drain().map(|(_, job)| job).collect();
        let count = jobs.len();
        jobs.into_iter().for_each(Job::stop);
        info!("stopped {count} scheduled DNS job(s)");
    }

    /// Spawn the sweep updating every record each `every`. A zero interval disables it.
    #[must_use]
    pub fn spawn_sweep(&self, every: Duration) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            info!("global DNS sweep disabled");
            return None;
        }
        let updater = self.updater.clone();
        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("starting DNS sweep");
                match updater.update_all_records().await {
                    Ok(results) => {
                        for result in results.iter().filter(|r| !r.success) {
                            warn!("sweep: record {}: {}", result.record_id, result.message);
                        }
                    }
                    Err(err) => warn!("DNS sweep failed: {err}"),
                }
            }
        }))
    }
}

async fn run(
    record_id: u64,
    every: Duration,
    state: SharedState,
    updater: DynUpdater,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                if !lock(&state).tick(OffsetDateTime::now_utc()) {
                    debug!("record {record_id} is paused, skipping tick");
                    continue;
                }
                match updater.update_record(record_id).await {
                    Ok(result) => debug!("record {record_id}: {}", result.message),
                    Err(err) => warn!("scheduled update of record {record_id} failed: {err}"),
                }
            }
        }
    }
    debug!("schedule loop for record {record_id} exited");
}
