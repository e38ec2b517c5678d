//! Link Monitor - tracks the last successful I/O on a channel
//!
//! **App Start Relative Time Pattern**:
//! - Monotonic time anchored to the first access
//! - Unaffected by system clock changes
//! - Stored in `AtomicU64`, readable from any thread without locking

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global anchor point for monotonic time
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic microseconds since the anchor
fn get_monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Activity monitor for one channel
///
/// `0` in either field means "never happened".
#[derive(Debug, Default)]
pub struct LinkMonitor {
    last_rx_us: AtomicU64,
    last_tx_us: AtomicU64,
}

impl LinkMonitor {
    pub fn new() -> Self {
        // 锚点在第一次使用时建立，保证之后的记录值 > 0
        let _ = get_monotonic_micros();
        Self::default()
    }

    /// Register that a frame was received
    pub fn register_rx(&self) {
        self.last_rx_us.store(get_monotonic_micros().max(1), Ordering::Relaxed);
    }

    /// Register that a frame was written
    pub fn register_tx(&self) {
        self.last_tx_us.store(get_monotonic_micros().max(1), Ordering::Relaxed);
    }

    /// Time since the last received frame (`None` if nothing was ever received)
    pub fn time_since_last_rx(&self) -> Option<Duration> {
        Self::elapsed(self.last_rx_us.load(Ordering::Relaxed))
    }

    /// Time since the last written frame (`None` if nothing was ever written)
    pub fn time_since_last_tx(&self) -> Option<Duration> {
        Self::elapsed(self.last_tx_us.load(Ordering::Relaxed))
    }

    /// Returns true if any frame was received within `window`
    pub fn is_active(&self, window: Duration) -> bool {
        self.time_since_last_rx().is_some_and(|elapsed| elapsed < window)
    }

    fn elapsed(stamp_us: u64) -> Option<Duration> {
        (stamp_us != 0).then(|| Duration::from_micros(get_monotonic_micros().saturating_sub(stamp_us)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_never_active_before_traffic() {
        let monitor = LinkMonitor::new();
        assert!(monitor.time_since_last_rx().is_none());
        assert!(monitor.time_since_last_tx().is_none());
        assert!(!monitor.is_active(Duration::from_secs(10)));
    }

    #[test]
    fn test_rx_activity_window() {
        let monitor = LinkMonitor::new();
        monitor.register_rx();
        assert!(monitor.is_active(Duration::from_millis(100)));

        thread::sleep(Duration::from_millis(30));
        assert!(!monitor.is_active(Duration::from_millis(10)));
        assert!(monitor.time_since_last_rx().unwrap() >= Duration::from_millis(30));
    }

    #[test]
    fn test_tx_tracking() {
        let monitor = LinkMonitor::new();
        monitor.register_tx();
        assert!(monitor.time_since_last_tx().unwrap() < Duration::from_secs(1));
        // 发送不算接收活动
        assert!(!monitor.is_active(Duration::from_secs(1)));
    }
}
