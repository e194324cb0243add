use std::{
    fmt::Debug,
    sync::LazyLock,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};

static ENGINE_EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Wall and monotonic time sources for a stream.
///
/// Frame bookkeeping uses the monotonic reading; minute stamping and flush
/// scheduling use the wall reading.
pub trait Clock: Debug + Send + Sync {
    /// Current wall-clock time.
    fn wall(&self) -> DateTime<Local>;

    /// Monotonic time since an arbitrary fixed origin.
    fn monotonic(&self) -> Duration;
}

/// [`Clock`] backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }

    fn monotonic(&self) -> Duration {
        ENGINE_EPOCH.elapsed()
    }
}
