//! Request handlers
//!
//! Every command maps to one handler returning a [`Reply`]: the response body
//! plus the events that follow it. Failures are plain `Err` values; turning
//! them into DAP failure responses is the server's job.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::common::config::LaunchDefaults;
use crate::common::{Error, Result};
use crate::dap::{
    Breakpoint, Capabilities, ContinueArguments, ContinueResponseBody, EvaluateArguments,
    LaunchArguments, RequestMessage, SetBreakpointsArguments, SetBreakpointsResponseBody,
    StackTraceArguments, StoppedEventBody, Thread, ThreadEventBody, ThreadsResponseBody,
    VariablesArguments,
};
use crate::evm::{BackendFactory, BreakpointDescriptor, Deployer};

use super::capture::OutputCapture;
use super::inspect;
use super::launch::{self, LaunchContext};
use super::navigation::{self, StopReason};
use super::session::{Session, THREAD_ID};

/// An event to send right after the response
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEvent {
    pub event: String,
    pub body: Value,
}

/// Successful outcome of a request
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub body: Option<Value>,
    pub events: Vec<OutgoingEvent>,
    /// End the session once the reply is sent
    pub terminate: bool,
}

impl Reply {
    /// Success with an empty `{}` body
    pub fn empty() -> Self {
        Self {
            body: Some(json!({})),
            ..Self::default()
        }
    }

    pub fn body<T: Serialize>(body: &T) -> Result<Self> {
        Ok(Self {
            body: Some(serde_json::to_value(body)?),
            ..Self::default()
        })
    }

    pub fn event<T: Serialize>(mut self, event: &str, body: &T) -> Result<Self> {
        self.events.push(OutgoingEvent {
            event: event.to_string(),
            body: serde_json::to_value(body)?,
        });
        Ok(self)
    }

    fn stopped(self, reason: StopReason) -> Result<Self> {
        self.event(
            "stopped",
            &StoppedEventBody {
                reason: reason.as_str().to_string(),
                thread_id: THREAD_ID,
                description: reason.description().map(str::to_string),
            },
        )
    }

    fn terminate(mut self) -> Self {
        self.terminate = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Granularity {
    Source,
    Instruction,
}

/// Command dispatch over one session
pub struct Adapter {
    session: Session,
    factory: Box<dyn BackendFactory>,
    deployer: Option<Box<dyn Deployer>>,
    defaults: LaunchDefaults,
    console: OutputCapture,
}

impl Adapter {
    pub fn new(factory: Box<dyn BackendFactory>, defaults: LaunchDefaults) -> Self {
        Self {
            session: Session::new(),
            factory,
            deployer: None,
            defaults,
            console: OutputCapture::new(),
        }
    }

    /// Enable `contractFile` launches
    pub fn with_deployer(mut self, deployer: Box<dyn Deployer>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Collaborator output captured by the last request
    pub fn take_output(&mut self) -> Option<String> {
        self.console.take()
    }

    pub async fn handle(&mut self, request: &RequestMessage) -> Result<Reply> {
        match request.command.as_str() {
            "initialize" => self.initialize(),
            "launch" => self.launch(arguments(request)?).await,
            "setBreakpoints" => self.set_breakpoints(arguments(request)?),
            "configurationDone" => Ok(Reply::empty()),
            "threads" => Reply::body(&ThreadsResponseBody {
                threads: vec![Thread {
                    id: THREAD_ID,
                    name: "main".to_string(),
                }],
            }),
            "continue" => self.continue_(arguments(request)?),
            "next" | "stepOut" => self.step(Granularity::Source),
            "stepIn" => self.step(Granularity::Instruction),
            "stackTrace" => {
                let args: StackTraceArguments = arguments(request)?;
                tracing::trace!(thread_id = args.thread_id, "stackTrace");
                Reply::body(&inspect::stack_trace(&self.session))
            }
            "scopes" => Reply::body(&inspect::scopes()),
            "variables" => {
                let args: VariablesArguments = arguments(request)?;
                Reply::body(&inspect::variables(&self.session, args.variables_reference))
            }
            "evaluate" => {
                let args: EvaluateArguments = arguments(request)?;
                Reply::body(&inspect::evaluate(&self.session, &args.expression)?)
            }
            "disconnect" | "terminate" => {
                tracing::info!("Session ended by {}", request.command);
                Ok(Reply::empty().terminate())
            }
            other => Err(Error::UnsupportedCommand(other.to_string())),
        }
    }

    fn initialize(&self) -> Result<Reply> {
        let capabilities = Capabilities {
            supports_configuration_done_request: true,
            supports_set_breakpoints_request: true,
            supports_terminate_request: true,
            ..Capabilities::default()
        };
        Reply::body(&capabilities)?.event("initialized", &json!({}))
    }

    async fn launch(&mut self, args: LaunchArguments) -> Result<Reply> {
        self.session.clear();

        let ctx = LaunchContext {
            factory: self.factory.as_ref(),
            deployer: self.deployer.as_deref(),
            defaults: &self.defaults,
        };
        let launched = launch::launch(&args, &ctx, &mut self.console).await?;
        self.session
            .install(launched.backend, launched.simulation, launched.entry)?;
        self.resolve_stored_breakpoints();

        if let Some(function) = self.session.current_function() {
            tracing::info!("Stopped at entry of {}", function.name);
        }

        Reply::empty()
            .event(
                "thread",
                &ThreadEventBody {
                    reason: "started".to_string(),
                    thread_id: THREAD_ID,
                },
            )?
            .stopped(StopReason::Entry)
    }

    fn set_breakpoints(&mut self, args: SetBreakpointsArguments) -> Result<Reply> {
        let path = args.source.path.unwrap_or_default();
        let requests: Vec<BreakpointDescriptor> = args
            .breakpoints
            .iter()
            .flat_map(|bp| {
                let line = bp.line.map(|line| BreakpointDescriptor::Line {
                    path: path.clone(),
                    line,
                });
                let function = bp
                    .function_name
                    .clone()
                    .map(|name| BreakpointDescriptor::Function { name });
                line.into_iter().chain(function)
            })
            .collect();

        self.session.breakpoints.replace(&path, requests.clone());

        let live = self.session.is_live();
        let breakpoints = requests
            .iter()
            .map(|request| {
                let outcome = if live {
                    self.register_breakpoint(&path, request)
                } else {
                    Err(Error::breakpoint_failed(
                        &request.to_string(),
                        "no active debugging session",
                    ))
                };
                verification(request, outcome, live)
            })
            .collect();

        Reply::body(&SetBreakpointsResponseBody { breakpoints })
    }

    fn register_breakpoint(&mut self, path: &str, request: &BreakpointDescriptor) -> Result<()> {
        let pcs = self.session.resolve(request)?;
        tracing::debug!("Breakpoint {} -> pcs {:?}", request, pcs);
        self.session.breakpoints.register(path, pcs);
        Ok(())
    }

    /// Resolve breakpoints set before the session had a trace
    fn resolve_stored_breakpoints(&mut self) {
        for path in self.session.breakpoints.paths() {
            let requests = self.session.breakpoints.requests(&path).to_vec();
            for request in &requests {
                if let Err(e) = self.register_breakpoint(&path, request) {
                    tracing::warn!("{}", e);
                }
            }
        }
    }

    fn continue_(&mut self, args: ContinueArguments) -> Result<Reply> {
        let body = ContinueResponseBody {
            all_threads_continued: false,
        };

        let Some(trace) = self.session.trace() else {
            tracing::debug!("Continue without a trace");
            return Reply::body(&body)?.stopped(StopReason::Breakpoint);
        };

        let from = self.session.current_index();
        let (index, reason) =
            navigation::run_to_breakpoint(trace, from, self.session.breakpoints.pcs());
        tracing::debug!(
            thread_id = args.thread_id,
            "Continued from step {} to {} ({})",
            from,
            index,
            reason.as_str()
        );
        self.session.move_to(index)?;

        Reply::body(&body)?.stopped(reason)
    }

    fn step(&mut self, granularity: Granularity) -> Result<Reply> {
        if let Some(trace) = self.session.trace() {
            let from = self.session.current_index();
            let index = match granularity {
                Granularity::Source => {
                    navigation::step_source(trace, from, self.session.source_map())
                }
                Granularity::Instruction => navigation::step_instruction(trace, from),
            };
            self.session.move_to(index)?;
        }
        Reply::empty().stopped(StopReason::Step)
    }
}

fn verification(request: &BreakpointDescriptor, outcome: Result<()>, live: bool) -> Breakpoint {
    let (line, function_name) = match request {
        BreakpointDescriptor::Line { line, .. } => (Some(*line), None),
        BreakpointDescriptor::Function { name } => (None, Some(name.clone())),
    };
    Breakpoint {
        verified: outcome.is_ok(),
        line,
        function_name,
        // before launch the failure is expected, not worth reporting
        message: outcome.err().filter(|_| live).map(|e| e.to_string()),
    }
}

/// Deserialize request arguments, treating absent arguments as defaults
fn arguments<T: DeserializeOwned + Default>(request: &RequestMessage) -> Result<T> {
    match &request.arguments {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            T::deserialize(value).map_err(|e| Error::invalid_arguments(&request.command, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::backend::ValueDecoder;
    use crate::evm::decode::AbiDecoder;
    use crate::evm::{DebugBackend, DebugTarget, FunctionInvocation, Simulation, Step};

    struct Fixed;

    impl DebugBackend for Fixed {
        fn run_simulation(&mut self, out: &mut dyn std::io::Write) -> Result<Simulation> {
            writeln!(out, "simulated")?;
            let mut steps: Vec<Step> = (0..50).map(|i| Step::new(i, "PUSH1")).collect();
            steps[30].pc = 200;
            Ok(Simulation {
                steps,
                functions: Some(vec![
                    FunctionInvocation::new("dispatcher", 0, Some(49)),
                    FunctionInvocation::new("transfer", 12, Some(40)),
                ]),
            })
        }

        fn decoder(&self) -> &dyn ValueDecoder {
            &AbiDecoder
        }
    }

    struct FixedFactory;

    impl BackendFactory for FixedFactory {
        fn create(&self, _target: &DebugTarget) -> Result<Box<dyn DebugBackend>> {
            Ok(Box::new(Fixed))
        }
    }

    fn adapter() -> Adapter {
        Adapter::new(Box::new(FixedFactory), LaunchDefaults::default())
    }

    fn request(command: &str, arguments: Value) -> RequestMessage {
        RequestMessage {
            seq: 1,
            command: command.to_string(),
            arguments: Some(arguments),
        }
    }

    async fn launched() -> Adapter {
        let mut adapter = adapter();
        adapter
            .handle(&request(
                "launch",
                json!({ "contractAddress": "0xA", "ethdebugDir": "/d", "function": "transfer" }),
            ))
            .await
            .unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_initialize_declares_capabilities() {
        let reply = adapter().handle(&request("initialize", json!({}))).await.unwrap();
        let body = reply.body.unwrap();
        assert_eq!(body["supportsConfigurationDoneRequest"], true);
        assert_eq!(body["supportsStepBack"], false);
        assert_eq!(reply.events[0].event, "initialized");
    }

    #[tokio::test]
    async fn test_launch_stops_at_entry() {
        let mut adapter = adapter();
        let reply = adapter
            .handle(&request(
                "launch",
                json!({ "contractAddress": "0xA", "ethdebugDir": "/d", "function": "transfer" }),
            ))
            .await
            .unwrap();

        let events: Vec<&str> = reply.events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(events, vec!["thread", "stopped"]);
        assert_eq!(reply.events[1].body["reason"], "entry");
        assert_eq!(adapter.session().current_index(), 12);
        assert_eq!(adapter.session().current_function().unwrap().name, "transfer");
        assert_eq!(adapter.take_output().as_deref(), Some("simulated\n"));
    }

    #[tokio::test]
    async fn test_continue_distinguishes_end_of_trace() {
        let mut adapter = launched().await;
        adapter
            .handle(&request(
                "setBreakpoints",
                json!({ "source": { "path": "x" }, "breakpoints": [{ "functionName": "200" }] }),
            ))
            .await
            .unwrap();

        let reply = adapter.handle(&request("continue", json!({}))).await.unwrap();
        assert_eq!(reply.events[0].body["reason"], "breakpoint");
        assert_eq!(adapter.session().current_index(), 30);

        let reply = adapter.handle(&request("continue", json!({}))).await.unwrap();
        assert_eq!(reply.events[0].body["reason"], "end-of-trace");
        assert_eq!(adapter.session().current_index(), 49);
    }

    #[tokio::test]
    async fn test_breakpoints_before_launch_resolve_on_launch() {
        let mut adapter = adapter();
        let reply = adapter
            .handle(&request(
                "setBreakpoints",
                json!({ "source": { "path": "x" }, "breakpoints": [{ "functionName": "0x14" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(reply.body.unwrap()["breakpoints"][0]["verified"], false);

        adapter
            .handle(&request(
                "launch",
                json!({ "contractAddress": "0xA", "ethdebugDir": "/d", "function": "transfer" }),
            ))
            .await
            .unwrap();
        adapter.handle(&request("continue", json!({}))).await.unwrap();
        assert_eq!(adapter.session().current_index(), 20);
    }

    #[tokio::test]
    async fn test_step_in_moves_one_instruction() {
        let mut adapter = launched().await;
        let reply = adapter.handle(&request("stepIn", json!({}))).await.unwrap();
        assert_eq!(reply.events[0].body["reason"], "step");
        assert_eq!(adapter.session().current_index(), 13);

        // no source map: next falls back to one instruction
        adapter.handle(&request("stepOut", json!({}))).await.unwrap();
        assert_eq!(adapter.session().current_index(), 14);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let err = adapter()
            .handle(&request("frobnicate", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported command: frobnicate");
    }

    #[tokio::test]
    async fn test_malformed_arguments_fail_request() {
        let err = adapter()
            .handle(&request("variables", json!({ "variablesReference": "many" })))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_terminates() {
        let reply = adapter().handle(&request("disconnect", json!({}))).await.unwrap();
        assert!(reply.terminate);
        assert_eq!(reply.body, Some(json!({})));
    }
}
