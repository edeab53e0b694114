//! Agent framework: the model/tool loop behind each user turn

mod agent_loop;
mod invoker;
mod state;
mod store;

pub use agent_loop::AgentLoop;
pub use invoker::ModelInvoker;
pub use state::{AgentConfig, FinishReason, LoopPhase, TurnEvent, TurnObserver, TurnOutcome};
pub use store::MessageStore;
