//! Health checking for backend servers.
//!
//! The aggregator's own health loop lives in `aggregator::facade` (a
//! consecutive-failure counter driving `connected` -> `degraded`). This
//! module holds the opt-in circuit breaker primitive callers may layer in
//! front of `Facade::execute_tool` themselves; it is not wired into core
//! routing.

pub mod circuit_breaker;
