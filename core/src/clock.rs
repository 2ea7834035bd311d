use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic milliseconds since this process started.
///
/// Lease deadlines are absolute timestamps from this clock; they are never
/// compared across process restarts, so wall-clock drift and leap seconds
/// don't matter.
pub fn monotonic_millis() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}
