//! Diff rendering for the `promptstack` binary.
//!
//! Diffs are computed on a dedicated `std::thread` that owns the
//! `DiffGenerator`; requests arrive over a crossbeam channel and finished
//! renderings go back to the async side as `AppEvent::DiffReady`.
pub mod types;
pub mod worker;
