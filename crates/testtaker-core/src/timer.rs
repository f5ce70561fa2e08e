//! Countdown clock for a timed attempt.
//!
//! The timer is seeded from the backend's remaining-seconds value and then
//! counts down on its own tokio task, one unit per tick. When it reaches
//! zero it fires its expiry hook exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Lifecycle of a [`CountdownTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    /// Terminal.
    Expired,
}

type ExpiryHook = Box<dyn Fn() + Send + Sync>;
type TickHook = Box<dyn Fn(u64) + Send + Sync>;

struct Shared {
    state: Mutex<TimerState>,
    remaining: AtomicU64,
    /// Bumped on every seed and stop; ticks carrying an older value are ignored.
    generation: AtomicU64,
    fired: AtomicBool,
    on_expire: ExpiryHook,
    on_tick: TickHook,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one tick. Returns `false` once this run should stop ticking.
    fn tick(&self, generation: u64) -> bool {
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        let left = match self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        };
        (self.on_tick)(left);
        if left == 0 {
            self.expire();
            return false;
        }
        true
    }

    fn expire(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state() = TimerState::Expired;
        tracing::info!("attempt time limit reached");
        (self.on_expire)();
    }
}

/// Decrementing clock with a one-shot expiry latch.
pub struct CountdownTimer {
    shared: Arc<Shared>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CountdownTimer {
    /// A timer that ticks every `period` and calls `on_expire` at zero.
    pub fn new(period: Duration, on_expire: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_tick_hook(period, on_expire, |_| {})
    }

    /// Like [`CountdownTimer::new`], also reporting the remaining count after
    /// every tick.
    pub fn with_tick_hook(
        period: Duration,
        on_expire: impl Fn() + Send + Sync + 'static,
        on_tick: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::Idle),
                remaining: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                fired: AtomicBool::new(false),
                on_expire: Box::new(on_expire),
                on_tick: Box::new(on_tick),
            }),
            period,
            task: Mutex::new(None),
        }
    }

    /// Start (or restart) the countdown from `remaining` units.
    ///
    /// Must be called from within a tokio runtime. Seeding zero expires
    /// immediately. Returns `false` if the timer has already expired.
    pub fn seed(&self, remaining: u64) -> bool {
        {
            let mut state = self.shared.state();
            if *state == TimerState::Expired {
                tracing::debug!(remaining, "ignoring re-seed of expired timer");
                return false;
            }
            *state = TimerState::Running;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.remaining.store(remaining, Ordering::Release);
        self.abort_task();

        if remaining == 0 {
            self.shared.expire();
            return true;
        }

        let shared = Arc::clone(&self.shared);
        let period = self.period;
        let first_tick = Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            loop {
                ticker.tick().await;
                if !shared.tick(generation) {
                    break;
                }
            }
        });
        *self.task_slot() = Some(handle);
        tracing::debug!(remaining, "countdown started");
        true
    }

    /// Tear the countdown down. An expired timer stays expired.
    pub fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.abort_task();
        let mut state = self.shared.state();
        if *state == TimerState::Running {
            *state = TimerState::Idle;
        }
    }

    pub fn state(&self) -> TimerState {
        *self.shared.state()
    }

    pub fn remaining(&self) -> u64 {
        self.shared.remaining.load(Ordering::Acquire)
    }

    /// `true` once the expiry hook has run.
    pub fn has_fired(&self) -> bool {
        self.shared.fired.load(Ordering::Acquire)
    }

    fn abort_task(&self) {
        if let Some(handle) = self.task_slot().take() {
            handle.abort();
        }
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    const SEC: Duration = Duration::from_secs(1);

    fn counting_timer() -> (CountdownTimer, Arc<AtomicU32>) {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let timer = CountdownTimer::new(SEC, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (timer, fired)
    }

    async fn advance(by: Duration) {
        tokio::time::advance(by).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_seeded_ticks() {
        let (timer, fired) = counting_timer();
        assert_eq!(timer.state(), TimerState::Idle);
        timer.seed(5);
        assert_eq!(timer.state(), TimerState::Running);

        for expected_left in (1..5).rev() {
            advance(SEC).await;
            assert_eq!(timer.remaining(), expected_left);
            assert_eq!(fired.load(Ordering::SeqCst), 0);
        }

        advance(SEC).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Expired);

        advance(SEC * 10).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_expiry() {
        let (timer, fired) = counting_timer();
        timer.seed(2);
        advance(SEC).await;
        timer.stop();
        assert_eq!(timer.state(), TimerState::Idle);
        advance(SEC * 5).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reseed_restarts_countdown() {
        let (timer, fired) = counting_timer();
        timer.seed(3);
        advance(SEC * 2).await;
        assert!(timer.seed(4));
        assert_eq!(timer.remaining(), 4);
        advance(SEC * 3).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        advance(SEC).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_timer_ignores_reseed() {
        let (timer, fired) = counting_timer();
        timer.seed(1);
        advance(SEC).await;
        assert!(!timer.seed(10));
        assert_eq!(timer.state(), TimerState::Expired);
        advance(SEC * 20).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_seed_expires_immediately() {
        let (timer, fired) = counting_timer();
        timer.seed(0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_from_torn_down_run_is_inert() {
        let (timer, fired) = counting_timer();
        timer.seed(1);
        let stale_generation = timer.shared.generation.load(Ordering::Acquire);
        timer.stop();
        assert!(!timer.shared.tick(stale_generation));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_hook_sees_countdown() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let timer = CountdownTimer::with_tick_hook(
            SEC,
            || {},
            move |left| sink.lock().unwrap().push(left),
        );
        timer.seed(3);
        advance(SEC * 3).await;
        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 0]);
    }
}
