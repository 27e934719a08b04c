//! 核心编排层：分类、预算、探测、恢复状态机、巡检、会话监管与终止

pub mod budget;
pub mod chat_handler;
pub mod classifier;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod probe;
pub mod session_supervisor;
pub mod shutdown;
pub mod wait;
pub mod window;

pub use budget::RetryBudget;
pub use chat_handler::ChatHandler;
pub use classifier::{classify, ClassifiedEvent, SuccessKind};
pub use error::CoffeeError;
pub use monitor::PresenceMonitor;
pub use orchestrator::{RecoveryOrchestrator, Stage, StageOutcome, Transition};
pub use probe::{LocationProbe, LocationState};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use wait::Listener;
