use std::{collections::VecDeque, sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Timelike};
use log::{debug, error, info, warn};
use tokio::{sync::watch, task::spawn_blocking, time::sleep};

use crate::{
    clock::Clock,
    counter::SharedAggregator,
    database::RecordStore,
    models::FlushRecord,
};

/// Second of the minute at which a window closes.
const FLUSH_SECOND: u32 = 59;
/// Slept after a flush so the timer cannot re-fire within the same second.
const REFIRE_GUARD: Duration = Duration::from_secs(1);
/// Attempts per record before it stays buffered until the next flush.
const APPEND_ATTEMPTS: u32 = 3;
/// Delay before the first retry, doubled on each subsequent one.
const APPEND_RETRY_DELAY: Duration = Duration::from_millis(250);
/// Unpersisted records kept while the store is unavailable.
const PENDING_CAP: usize = 256;

/// Closes a camera's minute window at second [`FLUSH_SECOND`] and persists
/// the drained record.
///
/// Records that cannot be persisted are buffered and retried on later
/// flushes, oldest first. When `done` flips (or its sender drops) the
/// scheduler drains one final partial window and exits.
pub struct WindowScheduler {
    camera_id: String,
    aggregator: SharedAggregator,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    done: watch::Receiver<bool>,
    pending: VecDeque<FlushRecord>,
}

impl WindowScheduler {
    pub fn new(
        camera_id: String,
        aggregator: SharedAggregator,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            camera_id,
            aggregator,
            store,
            clock,
            done,
            pending: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        info!(target: "scheduler", "{} window scheduler started", self.camera_id);
        loop {
            let wait = time_until_flush(&self.clock.wall());
            if !wait.is_zero() {
                tokio::select! {
                    _ = sleep(wait) => {
                        // Timers can fire marginally early against the wall
                        // clock; wait out the difference.
                        if !time_until_flush(&self.clock.wall()).is_zero() {
                            continue;
                        }
                    }
                    _ = self.done.changed() => break,
                }
            }
            self.flush(false).await;
            sleep(REFIRE_GUARD).await;
            if *self.done.borrow() || self.done.has_changed().is_err() {
                break;
            }
        }
        self.flush(true).await;
        info!(target: "scheduler", "{} window scheduler stopped", self.camera_id);
    }

    async fn flush(&mut self, is_final: bool) {
        let record = self.aggregator.drain(self.clock.wall());
        if is_final && record.is_empty() {
            debug!(target: "scheduler", "{} has nothing to persist on shutdown", self.camera_id);
            return;
        }
        info!(
            target: "scheduler",
            "{} closed window {} {} with counts {:?}",
            self.camera_id, record.date, record.time, record.lane_counts
        );
        self.push_pending(record);
        self.drain_pending().await;
    }

    fn push_pending(&mut self, record: FlushRecord) {
        if self.pending.len() == PENDING_CAP {
            self.pending.pop_front();
            warn!(target: "scheduler", "{} dropped the oldest unpersisted record", self.camera_id);
        }
        self.pending.push_back(record);
    }

    async fn drain_pending(&mut self) {
        while let Some(record) = self.pending.front() {
            if self.try_append(record.clone()).await {
                self.pending.pop_front();
            } else {
                warn!(
                    target: "scheduler",
                    "{} keeps {} record(s) buffered for the next flush",
                    self.camera_id,
                    self.pending.len()
                );
                return;
            }
        }
    }

    async fn try_append(&self, record: FlushRecord) -> bool {
        let mut delay = APPEND_RETRY_DELAY;
        for attempt in 1..=APPEND_ATTEMPTS {
            let store = self.store.clone();
            let pending = record.clone();
            let appended = spawn_blocking(move || store.append(&pending)).await;
            match appended {
                Ok(Ok(())) => return true,
                Ok(Err(err)) => {
                    error!(
                        target: "scheduler",
                        "{} failed to persist {} {} on attempt {attempt}: {err}",
                        self.camera_id, record.date, record.time
                    );
                }
                Err(err) => {
                    error!(target: "scheduler", "{} append task failed: {err}", self.camera_id);
                }
            }
            if attempt < APPEND_ATTEMPTS {
                sleep(delay).await;
                delay *= 2;
            }
        }
        false
    }
}

/// Time left until second [`FLUSH_SECOND`] of the current minute, zero while
/// inside that second.
fn time_until_flush<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    if now.second() >= FLUSH_SECOND {
        return Duration::ZERO;
    }
    let flush_millis = u64::from(FLUSH_SECOND) * 1000;
    let now_millis = u64::from(now.second()) * 1000 + u64::from(now.timestamp_subsec_millis());
    Duration::from_millis(flush_millis - now_millis)
}

#[cfg(test)]
mod tests {
    use std::{
        fmt::Debug,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use chrono::{Local, TimeZone as _, Utc};
    use tokio::{spawn, time::Instant};

    use super::*;
    use crate::{
        counter::{LaneAggregator, SharedAggregator},
        database::MockRecordStore,
        models::Tuning,
    };

    fn aggregator(lane_count: usize) -> SharedAggregator {
        SharedAggregator::new(LaneAggregator::new(
            "CAM01_HW_I90",
            lane_count,
            &Tuning::default(),
        ))
    }

    /// Wall time anchored at 14:30:30 and advanced by the paused runtime.
    #[derive(Debug)]
    struct AnchoredClock {
        base: DateTime<Local>,
        started: Instant,
    }

    impl AnchoredClock {
        fn new() -> Self {
            Self {
                base: Local.with_ymd_and_hms(2024, 5, 6, 14, 30, 30).unwrap(),
                started: Instant::now(),
            }
        }
    }

    impl Clock for AnchoredClock {
        fn wall(&self) -> DateTime<Local> {
            self.base
                + chrono::Duration::from_std(self.started.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero())
        }

        fn monotonic(&self) -> Duration {
            self.started.elapsed()
        }
    }

    fn store_recording_into(records: Arc<Mutex<Vec<FlushRecord>>>) -> MockRecordStore {
        let mut store = MockRecordStore::new();
        store.expect_append().returning(move |record| {
            records.lock().unwrap().push(record.clone());
            Ok(())
        });
        store
    }

    fn scheduler_under_test(
        aggregator: SharedAggregator,
        store: MockRecordStore,
    ) -> (WindowScheduler, watch::Sender<bool>) {
        let (done_tx, done_rx) = watch::channel(false);
        let scheduler = WindowScheduler::new(
            "CAM01_HW_I90".to_string(),
            aggregator,
            Arc::new(store),
            Arc::new(AnchoredClock::new()),
            done_rx,
        );
        (scheduler, done_tx)
    }

    #[test]
    fn time_until_flush_counts_down_to_second_59() {
        let early = Utc.with_ymd_and_hms(2024, 5, 6, 14, 30, 0).unwrap();
        assert_eq!(time_until_flush(&early), Duration::from_secs(59));

        let late = Utc
            .with_ymd_and_hms(2024, 5, 6, 14, 30, 58)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(400))
            .unwrap();
        assert_eq!(time_until_flush(&late), Duration::from_millis(600));

        let inside = Utc.with_ymd_and_hms(2024, 5, 6, 14, 30, 59).unwrap();
        assert_eq!(time_until_flush(&inside), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_at_the_minute_boundary_and_resets() {
        let aggregator = aggregator(3);
        for _ in 0..3 {
            aggregator.record_count(0);
        }
        for _ in 0..5 {
            aggregator.record_count(1);
        }
        for _ in 0..2 {
            aggregator.record_count(2);
        }
        aggregator.record_speed(0, 25.0);
        aggregator.record_speed(0, 27.0);
        aggregator.record_speed(2, 150.0);

        let records = Arc::new(Mutex::new(Vec::new()));
        let (scheduler, done_tx) = scheduler_under_test(
            aggregator.clone(),
            store_recording_into(records.clone()),
        );
        let handle = spawn(scheduler.run());

        // Clock starts at :30, so the boundary is 29 seconds out.
        tokio::time::sleep(Duration::from_secs(31)).await;
        done_tx.send(true).unwrap();
        handle.await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, "14:30");
        assert_eq!(records[0].day_of_week, "Monday");
        assert_eq!(records[0].lane_counts, vec![3, 5, 2]);
        assert_eq!(records[0].lane_avg_speeds, vec![26.0, 0.0, 0.0]);
        assert_eq!(aggregator.lane_counts(), vec![0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn final_flush_persists_a_partial_window() {
        let aggregator = aggregator(2);
        aggregator.record_count(1);

        let records = Arc::new(Mutex::new(Vec::new()));
        let (scheduler, done_tx) = scheduler_under_test(
            aggregator.clone(),
            store_recording_into(records.clone()),
        );
        let handle = spawn(scheduler.run());

        // Well before the boundary the stream ends.
        tokio::time::sleep(Duration::from_secs(5)).await;
        done_tx.send(true).unwrap();
        handle.await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lane_counts, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn final_flush_skips_an_empty_window() {
        let aggregator = aggregator(2);

        let records = Arc::new(Mutex::new(Vec::new()));
        let (scheduler, done_tx) = scheduler_under_test(
            aggregator.clone(),
            store_recording_into(records.clone()),
        );
        let handle = spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        done_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(records.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_appends_stay_buffered_until_the_store_recovers() {
        let aggregator = aggregator(1);
        aggregator.record_count(0);

        let records = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(AtomicU32::new(0));
        let mut store = MockRecordStore::new();
        {
            let records = records.clone();
            let attempts = attempts.clone();
            store.expect_append().returning(move |record| {
                // The first window fails its whole retry ladder, then the
                // store comes back.
                if attempts.fetch_add(1, Ordering::SeqCst) < APPEND_ATTEMPTS {
                    anyhow::bail!("disk full");
                }
                records.lock().unwrap().push(record.clone());
                Ok(())
            });
        }

        let (scheduler, done_tx) = scheduler_under_test(aggregator.clone(), store);
        let handle = spawn(scheduler.run());

        // First boundary: every attempt fails, the record stays buffered.
        tokio::time::sleep(Duration::from_secs(31)).await;
        aggregator.record_count(0);

        // Second boundary: buffered record persists first, then the new one.
        tokio::time::sleep(Duration::from_secs(60)).await;
        done_tx.send(true).unwrap();
        handle.await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, "14:30");
        assert_eq!(records[1].time, "14:31");
        assert_eq!(attempts.load(Ordering::SeqCst), APPEND_ATTEMPTS + 2);
    }
}
