//! Execution pipeline: position cache, risk gate, and order coordinator.

pub mod coordinator;
pub mod positions;
pub mod risk;

pub use coordinator::{ExecutionReport, ExecutionStatus, OrderCoordinator, PollPolicy};
pub use positions::{Position, PositionCache};
pub use risk::{RiskDecision, RiskGate};
