//! The `launch` procedure
//!
//! Resolves where the contract and its debug info live, binds a backend,
//! runs the simulation and picks the step the session first stops at.

use std::io::Write;
use std::path::PathBuf;

use crate::common::config::LaunchDefaults;
use crate::common::{Error, Result};
use crate::dap::LaunchArguments;
use crate::evm::{
    BackendFactory, DebugBackend, DebugTarget, DeployRequest, Deployer, FunctionInvocation,
    Simulation,
};

use super::session::EntryPoint;

/// Collaborators a launch can draw on
pub struct LaunchContext<'a> {
    pub factory: &'a dyn BackendFactory,
    pub deployer: Option<&'a dyn Deployer>,
    pub defaults: &'a LaunchDefaults,
}

/// A backend with its trace, ready to install into the session
pub struct Launched {
    pub backend: Box<dyn DebugBackend>,
    pub simulation: Simulation,
    pub entry: EntryPoint,
}

/// Run the whole launch procedure
///
/// Whatever the simulation prints goes to `out`, also when it fails.
pub async fn launch(
    args: &LaunchArguments,
    ctx: &LaunchContext<'_>,
    out: &mut dyn Write,
) -> Result<Launched> {
    let target = resolve_target(args, ctx).await?;
    tracing::info!(
        address = %target.contract_address,
        ethdebug_dir = %target.ethdebug_dir.display(),
        function = %target.function_name,
        "Launching debugger"
    );

    let mut backend = ctx.factory.create(&target)?;

    if let Some(abi_path) = &target.abi_path {
        match backend.load_abi(abi_path) {
            Ok(()) => tracing::info!("Loaded ABI from {}", abi_path.display()),
            Err(e) => tracing::warn!("Failed to load ABI from {}: {}", abi_path.display(), e),
        }
    }

    if !args.no_snapshot {
        if let Err(e) = backend.snapshot_state() {
            tracing::debug!("Baseline snapshot skipped: {}", e);
        }
    }

    let simulation = simulate(backend.as_mut(), out)?;
    tracing::info!("Trace generated with {} steps", simulation.steps.len());
    if let Some(functions) = &simulation.functions {
        for (i, f) in functions.iter().enumerate() {
            tracing::debug!(
                "Function {}: {} (entry: {}, exit: {:?})",
                i,
                f.name,
                f.entry_step,
                f.exit_step
            );
        }
    }

    let entry = entry_point(simulation.functions.as_deref(), &target.function_name);
    tracing::info!("Starting at step {}", entry.step);

    Ok(Launched {
        backend,
        simulation,
        entry,
    })
}

fn simulate(backend: &mut dyn DebugBackend, out: &mut dyn Write) -> Result<Simulation> {
    let simulation = backend.run_simulation(out).map_err(|e| match e {
        Error::Simulation(_) => e,
        other => Error::Simulation(other.to_string()),
    })?;
    if simulation.steps.is_empty() {
        return Err(Error::Simulation(Error::EmptyTrace.to_string()));
    }
    Ok(simulation)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Resolve the contract address and debug directory for a launch
///
/// `contractFile` wins over `contractAddress` + `ethdebugDir` when both are
/// given.
pub async fn resolve_target(
    args: &LaunchArguments,
    ctx: &LaunchContext<'_>,
) -> Result<DebugTarget> {
    let rpc = non_empty(&args.rpc)
        .unwrap_or(&ctx.defaults.default_rpc)
        .to_string();
    let function_name = args.function_name().unwrap_or_default().to_string();
    let function_args = args.arguments();
    let abi_path = non_empty(&args.abi_path).map(PathBuf::from);

    if let Some(contract_file) = non_empty(&args.contract_file) {
        let deployer = ctx.deployer.ok_or_else(|| {
            Error::LaunchConfig(
                "contractFile requires a deploy command; set [deploy] command in the configuration"
                    .to_string(),
            )
        })?;
        let request = deploy_request(args, contract_file, &rpc, ctx.defaults)?;
        let deployment = deployer.deploy(&request).await?;
        tracing::info!(
            "Deployed {} at {}",
            contract_file,
            deployment.contract_address
        );

        return Ok(DebugTarget {
            contract_address: deployment.contract_address,
            ethdebug_dir: deployment.ethdebug_dir,
            rpc_url: deployment.rpc_url.unwrap_or(rpc),
            function_name,
            function_args,
            abi_path: deployment.abi_path.or(abi_path),
        });
    }

    match (non_empty(&args.contract_address), non_empty(&args.ethdebug_dir)) {
        (Some(address), Some(dir)) => Ok(DebugTarget {
            contract_address: address.to_string(),
            ethdebug_dir: PathBuf::from(dir),
            rpc_url: rpc,
            function_name,
            function_args,
            abi_path,
        }),
        _ => Err(Error::LaunchConfig(
            "Provide contractFile or contractAddress + ethdebugDir".to_string(),
        )),
    }
}

fn deploy_request(
    args: &LaunchArguments,
    contract_file: &str,
    rpc: &str,
    defaults: &LaunchDefaults,
) -> Result<DeployRequest> {
    let fork_port = match args.fork_port {
        Some(port) => u16::try_from(port)
            .map_err(|_| Error::LaunchConfig(format!("forkPort {} is not a valid port", port)))?,
        None => defaults.default_fork_port,
    };

    Ok(DeployRequest {
        contract_file: PathBuf::from(contract_file),
        rpc_url: rpc.to_string(),
        constructor_args: args.constructor_args.clone(),
        fork_url: non_empty(&args.fork_url).map(str::to_string),
        fork_block: args.fork_block,
        fork_port,
        reuse_fork: args.reuse_fork,
        keep_fork: args.keep_fork,
        auto_snapshot: !args.no_snapshot,
    })
}

/// Pick the first stop of a session
///
/// An invocation named like the target function wins, matching either the
/// full signature or the bare name. Otherwise the second invocation is used
/// when there are several, on the assumption that the first is the selector
/// dispatcher. This is a best-effort default, not a general rule.
pub fn entry_point(functions: Option<&[FunctionInvocation]>, target: &str) -> EntryPoint {
    let Some(functions) = functions.filter(|f| !f.is_empty()) else {
        return EntryPoint {
            step: 0,
            function: None,
        };
    };

    let bare = target.split('(').next().unwrap_or(target);
    let index = functions
        .iter()
        .position(|f| !target.is_empty() && (f.name == target || f.name == bare))
        .unwrap_or(if functions.len() > 1 { 1 } else { 0 });

    EntryPoint {
        step: functions[index].entry_step,
        function: Some(index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::evm::backend::ValueDecoder;
    use crate::evm::decode::AbiDecoder;
    use crate::evm::{Deployment, Step};

    struct NoFactory;

    impl BackendFactory for NoFactory {
        fn create(&self, _target: &DebugTarget) -> Result<Box<dyn DebugBackend>> {
            Err(Error::Backend("unused".into()))
        }
    }

    struct FixedDeployer;

    #[async_trait]
    impl Deployer for FixedDeployer {
        async fn deploy(&self, request: &DeployRequest) -> Result<Deployment> {
            assert_eq!(request.fork_port, 8550);
            assert!(!request.auto_snapshot);
            Ok(Deployment {
                contract_address: "0xD".into(),
                ethdebug_dir: PathBuf::from("/out/debug"),
                abi_path: Some(PathBuf::from("/out/Token.abi")),
                rpc_url: Some("http://localhost:8550".into()),
            })
        }
    }

    fn args(value: Value) -> LaunchArguments {
        serde_json::from_value(value).unwrap()
    }

    fn invocations() -> Vec<FunctionInvocation> {
        vec![
            FunctionInvocation::new("dispatcher", 0, Some(40)),
            FunctionInvocation::new("transfer", 12, Some(30)),
            FunctionInvocation::new("approve", 31, Some(39)),
        ]
    }

    #[test]
    fn test_entry_point_by_name() {
        let functions = invocations();
        let entry = entry_point(Some(&functions), "approve");
        assert_eq!(entry, EntryPoint { step: 31, function: Some(2) });

        let entry = entry_point(Some(&functions), "transfer(address,uint256)");
        assert_eq!(entry.step, 12);
    }

    #[test]
    fn test_entry_point_skips_dispatcher_when_unmatched() {
        // best-effort: assumes invocation 0 is the selector dispatcher
        let functions = invocations();
        let entry = entry_point(Some(&functions), "unknown");
        assert_eq!(entry, EntryPoint { step: 12, function: Some(1) });
    }

    #[test]
    fn test_entry_point_single_and_missing() {
        let one = vec![FunctionInvocation::new("fallback", 4, None)];
        assert_eq!(entry_point(Some(&one), "transfer").step, 4);
        assert_eq!(entry_point(None, "transfer"), EntryPoint { step: 0, function: None });
        assert_eq!(entry_point(Some(&[]), "transfer").function, None);
    }

    #[tokio::test]
    async fn test_attach_mode() {
        let defaults = LaunchDefaults::default();
        let ctx = LaunchContext {
            factory: &NoFactory,
            deployer: None,
            defaults: &defaults,
        };
        let target = resolve_target(
            &args(json!({
                "contractAddress": "0xA",
                "ethdebugDir": "/d",
                "function": "transfer",
                "functionArgs": ["0xB", 5]
            })),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(target.contract_address, "0xA");
        assert_eq!(target.ethdebug_dir, PathBuf::from("/d"));
        assert_eq!(target.rpc_url, "http://localhost:8545");
        assert_eq!(target.function_name, "transfer");
        assert_eq!(target.function_args, vec![json!("0xB"), json!(5)]);
    }

    #[tokio::test]
    async fn test_missing_addressing_mode() {
        let defaults = LaunchDefaults::default();
        let ctx = LaunchContext {
            factory: &NoFactory,
            deployer: None,
            defaults: &defaults,
        };
        let err = resolve_target(&args(json!({ "contractAddress": "0xA" })), &ctx)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Provide contractFile or contractAddress + ethdebugDir"
        );
    }

    #[tokio::test]
    async fn test_contract_file_without_deployer() {
        let defaults = LaunchDefaults::default();
        let ctx = LaunchContext {
            factory: &NoFactory,
            deployer: None,
            defaults: &defaults,
        };
        let err = resolve_target(&args(json!({ "contractFile": "Token.sol" })), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LaunchConfig(_)));
    }

    #[tokio::test]
    async fn test_contract_file_uses_deployment() {
        let defaults = LaunchDefaults::default();
        let ctx = LaunchContext {
            factory: &NoFactory,
            deployer: Some(&FixedDeployer),
            defaults: &defaults,
        };
        let target = resolve_target(
            &args(json!({
                "contractFile": "Token.sol",
                "contractAddress": "0xIgnored",
                "ethdebugDir": "/ignored",
                "forkPort": "8550",
                "noSnapshot": true
            })),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(target.contract_address, "0xD");
        assert_eq!(target.ethdebug_dir, PathBuf::from("/out/debug"));
        assert_eq!(target.rpc_url, "http://localhost:8550");
        assert_eq!(target.abi_path, Some(PathBuf::from("/out/Token.abi")));
    }

    #[test]
    fn test_invalid_fork_port() {
        let err = deploy_request(
            &args(json!({ "forkPort": 70000 })),
            "Token.sol",
            "http://localhost:8545",
            &LaunchDefaults::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("70000"));
    }

    struct Silent;

    impl DebugBackend for Silent {
        fn run_simulation(&mut self, out: &mut dyn Write) -> Result<Simulation> {
            writeln!(out, "nothing to run")?;
            Ok(Simulation::default())
        }

        fn decoder(&self) -> &dyn ValueDecoder {
            &AbiDecoder
        }
    }

    struct Broken;

    impl DebugBackend for Broken {
        fn run_simulation(&mut self, _out: &mut dyn Write) -> Result<Simulation> {
            Err(Error::Backend("execution reverted".into()))
        }

        fn decoder(&self) -> &dyn ValueDecoder {
            &AbiDecoder
        }
    }

    #[test]
    fn test_empty_trace_is_error_and_output_kept() {
        let mut out = Vec::new();
        let err = simulate(&mut Silent, &mut out).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Failed to generate execution trace: {}", Error::EmptyTrace)
        );
        assert_eq!(out, b"nothing to run\n");
    }

    #[test]
    fn test_simulation_errors_are_wrapped() {
        let err = simulate(&mut Broken, &mut Vec::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to generate execution trace: execution reverted"
        );
    }

    #[test]
    fn test_simulate_returns_steps() {
        struct One;
        impl DebugBackend for One {
            fn run_simulation(&mut self, _out: &mut dyn Write) -> Result<Simulation> {
                Ok(Simulation {
                    steps: vec![Step::new(0, "STOP")],
                    functions: None,
                })
            }
            fn decoder(&self) -> &dyn ValueDecoder {
                &AbiDecoder
            }
        }
        assert_eq!(simulate(&mut One, &mut Vec::new()).unwrap().steps.len(), 1);
    }
}
