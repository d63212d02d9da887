//! Standalone CLI around the task execution core.
//!
//! This binary is not the real discovery/RPC surface the subsystem is
//! normally invoked through (that lives in the surrounding agent
//! framework, out of scope here); it exists purely so the core crates
//! are independently runnable and demoable: `run` drives a task end to
//! end, `status` queries an existing request's spool, `filter-check`
//! exercises the `-S` expression tokenizer/validator, and `discover`
//! prints the capability metadata the real plugin advertises.

mod error;
mod panic_handler;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use error::AgentError;
use pta_core::{
    discovery::Capabilities,
    planner::{Platform, PlannerRoots},
    AgentConfig, ArtifactCache, InputMethod, SpoolManager, StatusObserver, TaskDescriptor,
    TaskResolver, WrapperLauncher,
};
use pta_transport::{ReqwestTransport, TaskServerClient};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pta-agent", about = "Puppet task execution core, as a CLI", version)]
struct Cli {
    /// Optional JSON config file layered over compiled-in defaults and
    /// `PTA_`-prefixed environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a task, ensure its files are cached, and launch it through
    /// the platform wrapper.
    Run {
        /// Qualified task name, e.g. `mymodule` or `mymodule::subtask`.
        task: String,
        /// Puppet environment to resolve the task in.
        #[arg(long, default_value = "production")]
        environment: String,
        /// Caller-supplied, node-unique request id; also the spool
        /// directory name.
        #[arg(long)]
        requestid: String,
        /// Opaque input payload (typically JSON) delivered to the task.
        #[arg(long, default_value = "{}")]
        input: String,
        /// Override the input method instead of letting the planner infer
        /// it from the task's first file.
        #[arg(long)]
        input_method: Option<String>,
        /// Block until the task completes before printing status.
        #[arg(long)]
        wait: bool,
    },
    /// Print the status of a previously requested task, read from its
    /// spool.
    Status {
        #[arg(long)]
        requestid: String,
    },
    /// Tokenize and validate a `-S` filter expression, given as separate
    /// shell-split arguments.
    FilterCheck {
        #[arg(trailing_var_arg = true)]
        tokens: Vec<String>,
    },
    /// Print the capability metadata the discovery plugin advertises.
    Discover,
}

fn parse_input_method(raw: &str) -> Result<InputMethod, AgentError> {
    match raw {
        "stdin" => Ok(InputMethod::Stdin),
        "environment" => Ok(InputMethod::Environment),
        "both" => Ok(InputMethod::Both),
        "powershell" => Ok(InputMethod::Powershell),
        other => Err(AgentError::UnknownInputMethod(other.to_string())),
    }
}

fn host_platform() -> Platform {
    if cfg!(windows) {
        Platform::Windows
    } else {
        Platform::Unix
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic_handler::install();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    match cli.command {
        Command::Run {
            task,
            environment,
            requestid,
            input,
            input_method,
            wait,
        } => run_task(cli.config.as_deref(), &task, &environment, &requestid, &input, input_method, wait).await,
        Command::Status { requestid } => status(cli.config.as_deref(), &requestid).await,
        Command::FilterCheck { tokens } => {
            filter_check(&tokens);
            Ok(())
        }
        Command::Discover => {
            discover();
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
    config_file: Option<&std::path::Path>,
    task: &str,
    environment: &str,
    requestid: &str,
    input: &str,
    input_method: Option<String>,
    wait: bool,
) -> Result<(), AgentError> {
    let config = AgentConfig::load(config_file)?;
    let transport = ReqwestTransport::new();
    let client = TaskServerClient::new(transport, config.server_base_url.clone());
    let resolver = TaskResolver::new(client);

    let mut descriptor: TaskDescriptor = resolver.resolve(task, environment).await?;
    descriptor.input = input.to_string();
    if let Some(raw) = input_method {
        descriptor.input_method = Some(parse_input_method(&raw)?);
    }

    let cache_client = TaskServerClient::new(ReqwestTransport::new(), config.server_base_url.clone());
    let cache = ArtifactCache::new(config.cache_dir.clone(), cache_client);
    cache.ensure_cached(&descriptor.files).await?;

    let roots = PlannerRoots {
        cache_dir: cache.root_for_planner(),
        binary_root: config.binary_root.to_string_lossy().into_owned(),
    };
    let launcher = WrapperLauncher::new(cache, config.spool_dir.clone(), roots, host_platform());

    let status = launcher.run(requestid, &descriptor, wait).await?;
    print_status(&status);
    Ok(())
}

async fn status(config_file: Option<&std::path::Path>, requestid: &str) -> Result<(), AgentError> {
    let config = AgentConfig::load(config_file)?;
    let observer = StatusObserver::new(SpoolManager::new(config.spool_dir));
    let status = observer.status(requestid).await?;
    print_status(&status);
    Ok(())
}

fn print_status(status: &pta_core::Status) {
    let json = serde_json::json!({
        "spool": status.spool.to_string_lossy(),
        "stdout": status.stdout,
        "stderr": status.stderr,
        "exitcode": status.exitcode,
        "runtime_seconds": status.runtime.num_milliseconds() as f64 / 1000.0,
        "start_time": status.start_time.to_rfc3339(),
        "wrapper_spawned": status.wrapper_spawned,
        "wrapper_error": status.wrapper_error,
        "wrapper_pid": status.wrapper_pid,
        "completed": status.completed,
    });
    println!("{}", serde_json::to_string_pretty(&json).expect("status json is always serializable"));
}

fn filter_check(tokens: &[String]) {
    match pta_filter::parse(tokens) {
        Ok(parsed) => {
            println!("ok: {} token(s) validated", parsed.len());
            for token in parsed {
                println!("  {:?} {:?}", token.kind, token.value);
            }
        }
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(1);
        }
    }
}

fn discover() {
    let caps = Capabilities::default();
    println!(
        "{}",
        serde_json::to_string_pretty(&caps).expect("capabilities are always serializable")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_input_methods() {
        assert!(matches!(parse_input_method("stdin"), Ok(InputMethod::Stdin)));
        assert!(matches!(
            parse_input_method("powershell"),
            Ok(InputMethod::Powershell)
        ));
    }

    #[test]
    fn rejects_unknown_input_method() {
        let err = parse_input_method("telepathy").unwrap_err();
        assert!(matches!(err, AgentError::UnknownInputMethod(_)));
    }

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from([
            "pta-agent",
            "run",
            "mymodule::hello",
            "--requestid",
            "req-1",
            "--wait",
        ]);
        match cli.command {
            Command::Run { task, requestid, wait, .. } => {
                assert_eq!(task, "mymodule::hello");
                assert_eq!(requestid, "req-1");
                assert!(wait);
            }
            _ => panic!("expected Run command"),
        }
    }
}
