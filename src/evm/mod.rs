//! EVM side of the adapter: trace types and the collaborator seams

pub mod backend;
pub mod decode;
pub mod deploy;
pub mod recorded;
pub mod trace;

pub use backend::{
    BackendFactory, BreakpointDescriptor, DebugBackend, DebugTarget, DeployRequest, Deployer,
    Deployment,
};
pub use trace::{FunctionInvocation, Simulation, Step, Word};
