// Relay worker
//
// Engine-side half of the platform: the agent execution workflow, its
// activities, the in-process runner and schedule manager, the
// trigger<->schedule reconciler, and the collaborator clients.

pub mod activities;
pub mod clients;
pub mod platform;
pub mod reconciler;
pub mod runner;
pub mod schedule;
pub mod workflow;

pub use activities::{Activities, RetryPolicy, WorkerActivities};
pub use clients::{HttpAgentDirectory, HttpLlmClient, HttpToolClient, StaticAgentDirectory};
pub use platform::Platform;
pub use reconciler::ScheduleReconciler;
pub use runner::InProcessRunner;
pub use schedule::InProcessScheduleManager;
pub use workflow::{AgentExecutionWorkflow, WorkflowHandle};
