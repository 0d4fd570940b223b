//! Helmsman Core
//!
//! Agent orchestration engine for trading bot fleets: a fixed set of
//! decision agents behind a uniform task runtime, an event bus with an
//! audit log, fan-out/fan-in dispatch with partial-failure tolerance,
//! a pure decision rule engine and a loss circuit breaker.

pub mod agents;
pub mod bus;
pub mod config;
pub mod decision;
pub mod domain;
pub mod orchestrator;
pub mod throttle;
