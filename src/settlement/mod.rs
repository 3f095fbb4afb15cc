// Semester point settlement
pub mod engine;
pub mod scheduler;
pub mod window;

pub use engine::{SettlementEngine, SettlementOutcome};
pub use scheduler::SettlementScheduler;
pub use window::SettlementCalendar;
