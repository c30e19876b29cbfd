//! Debug adapter: session state, navigation and the DAP server loop
//!
//! The adapter speaks DAP to an editor over a byte stream and drives one
//! pre-recorded execution trace supplied by a [`crate::evm::DebugBackend`].

mod capture;
mod handler;
mod inspect;
mod launch;
mod navigation;
mod server;
mod session;

pub use handler::{Adapter, OutgoingEvent, Reply};
pub use inspect::{LOCALS_REF, STACK_REF, STORAGE_REF};
pub use launch::entry_point;
pub use navigation::{run_to_breakpoint, step_instruction, step_source, StopReason};
pub use server::Server;
pub use session::{BreakpointStore, EntryPoint, Session, THREAD_ID};
