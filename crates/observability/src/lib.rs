//! Process-wide tracing setup shared by the API binary and workers.

pub mod tracing;

pub use self::tracing::LogFormat;

/// Install the global subscriber using `LOG_FORMAT` and `RUST_LOG`.
/// Later calls keep the first subscriber.
pub fn init() {
    self::tracing::init();
}
