pub mod agent;
pub mod controller;
pub mod execution;
pub mod registry;
pub mod runner;
pub mod schema;
pub mod step;
pub mod stream;
pub mod workflow;

pub use agent::{AgentReply, SubAgent};
pub use controller::SuspendController;
pub use execution::{ExecutionChannel, ExecutionEvent, Outcome, WorkflowStream};
pub use registry::WorkflowRegistry;
pub use runner::{RunContext, StepChainRunner};
pub use step::{Step, StepContext, StepExecutor, StepNode};
pub use stream::{to_stream_part, EventEmitter, EventForwarder, ForwardOptions, ForwardOutcome};
pub use workflow::{WorkflowBuilder, WorkflowDefinition, WorkflowSummary};
