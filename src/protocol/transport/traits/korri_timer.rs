//! Asynchronous delay source pacing the stack runner's tick.
use embassy_time::Duration;

/// Timer abstraction; implementations wrap `embassy_time::Timer` on target
/// and `tokio::time::sleep` on a host.
pub trait KorriTimer {
    /// Wait for `duration`.
    fn delay<'a>(&'a mut self, duration: Duration) -> impl core::future::Future<Output = ()> + 'a;
}
