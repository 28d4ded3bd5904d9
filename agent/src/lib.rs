pub mod agent;
pub mod error;
pub mod runtime;
pub mod session;

pub use agent::{AgentReference, BedrockAgentRuntime};
pub use error::{InvocationError, classify_service_code};
pub use runtime::{AgentRuntime, InvokeRequest, ResponseEvent};
pub use session::{SessionClient, SessionState, TurnOutcome};
