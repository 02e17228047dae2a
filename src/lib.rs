//! Workspace meta package.
//!
//! Carries the cross-rank scenario tests under `tests/`; the actual
//! functionality lives in the `lib/*` member crates.
