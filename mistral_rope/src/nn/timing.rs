//! Simple timing instrumentation for rotary embedding hot paths.
//!
//! Enable with `--features timing` to collect performance metrics.
//! When disabled, all timing operations compile to no-ops.

#[cfg(feature = "timing")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "timing")]
use std::time::Instant;

/// Global timing accumulators (in microseconds)
#[cfg(feature = "timing")]
pub static TABLE_TIME_US: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "timing")]
pub static PADDING_TIME_US: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "timing")]
pub static POSITION_TIME_US: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "timing")]
pub static ROPE_TIME_US: AtomicU64 = AtomicU64::new(0);

/// Call counts
#[cfg(feature = "timing")]
pub static TABLE_CALLS: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "timing")]
pub static PADDING_CALLS: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "timing")]
pub static POSITION_CALLS: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "timing")]
pub static ROPE_CALLS: AtomicU64 = AtomicU64::new(0);

/// Reset all timing accumulators.
#[cfg(feature = "timing")]
pub fn reset_timings() {
    for counter in [
        &TABLE_TIME_US,
        &PADDING_TIME_US,
        &POSITION_TIME_US,
        &ROPE_TIME_US,
        &TABLE_CALLS,
        &PADDING_CALLS,
        &POSITION_CALLS,
        &ROPE_CALLS,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}

#[cfg(feature = "timing")]
fn summary_line(label: &str, time_us: &AtomicU64, calls: &AtomicU64) {
    let total = time_us.load(Ordering::Relaxed);
    let calls = calls.load(Ordering::Relaxed);
    println!(
        "{:<16}{:>8.2}ms ({} calls, {:.3}ms avg)",
        label,
        total as f64 / 1000.0,
        calls,
        if calls > 0 {
            total as f64 / calls as f64 / 1000.0
        } else {
            0.0
        }
    );
}

/// Print timing summary.
#[cfg(feature = "timing")]
pub fn print_timings() {
    println!("\n=== Timing Summary ===");
    summary_line("Table build:", &TABLE_TIME_US, &TABLE_CALLS);
    summary_line("Padding shift:", &PADDING_TIME_US, &PADDING_CALLS);
    summary_line("Position select:", &POSITION_TIME_US, &POSITION_CALLS);
    summary_line("RoPE apply:", &ROPE_TIME_US, &ROPE_CALLS);
    println!("======================\n");
}

/// RAII timer that adds elapsed time to an atomic counter and bumps a call count.
#[cfg(feature = "timing")]
pub struct Timer {
    start: Instant,
    counter: &'static AtomicU64,
}

#[cfg(feature = "timing")]
impl Timer {
    #[inline]
    pub fn new(counter: &'static AtomicU64, calls: &'static AtomicU64) -> Self {
        calls.fetch_add(1, Ordering::Relaxed);
        Self {
            start: Instant::now(),
            counter,
        }
    }
}

#[cfg(feature = "timing")]
impl Drop for Timer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_micros() as u64;
        self.counter.fetch_add(elapsed, Ordering::Relaxed);
    }
}

/// Macro for timing a code block. Compiles to the bare block when the timing
/// feature is disabled.
///
/// The counter arguments are identifiers from `nn::timing`, so call sites do
/// not need feature-gated imports.
#[macro_export]
macro_rules! timed {
    ($counter:ident, $calls:ident, $block:expr) => {{
        #[cfg(feature = "timing")]
        let _timer = $crate::nn::timing::Timer::new(
            &$crate::nn::timing::$counter,
            &$crate::nn::timing::$calls,
        );
        $block
    }};
}
