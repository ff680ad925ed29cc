//! Failover control.
//!
//! Peak-hour schedule, switch-rate limiting, the evaluation circuit breaker
//! and the health monitor that drives relay group switches.

pub mod controller;
pub mod limiter;
pub mod peak;

pub use controller::{Evaluation, MonitorHandle, SwitchController, TickOutcome};
pub use limiter::{CircuitBreaker, SwitchLimiter};
pub use peak::PeakSchedule;
