use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use flowforge_core::config::AppConfig;
use flowforge_core::context::ExecutionContext;
use flowforge_core::event::{ExecutionEvent, RunObserver};
use flowforge_core::types::WorkflowDefinition;
use flowforge_engine::{
    DependencyMap, ExecutorRegistry, ExecutorServices, WorkflowExecutionService, WorkflowRunner,
};
use flowforge_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "flowforge", version, about = "Workflow orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowforge.toml", env = "FLOWFORGE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the bind address from the config file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Execute a workflow file and print the run summary
    Run {
        /// Workflow definition (JSON)
        workflow: PathBuf,
        /// Initial input, parsed as JSON when possible
        #[arg(short, long)]
        input: Option<String>,
        /// Record debug logs for every node
        #[arg(long)]
        debug: bool,
    },
    /// Validate a workflow file without executing it
    Validate {
        /// Workflow definition (JSON)
        workflow: PathBuf,
    },
    /// List supported node types
    Nodes,
    /// Show current configuration
    Config,
}

/// Prints one line per node transition to stderr.
struct ProgressPrinter;

impl RunObserver for ProgressPrinter {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::NodeStart {
                node_id, node_type, ..
            } => eprintln!("▶ {node_id} ({node_type})"),
            ExecutionEvent::NodeComplete {
                node_id,
                success,
                output_preview,
                ..
            } => {
                let mark = if *success { "✓" } else { "✗" };
                eprintln!("{mark} {node_id}: {output_preview}");
            }
            ExecutionEvent::Warning { message, .. } => eprintln!("! {message}"),
            _ => {}
        }
    }
}

fn build_service(config: &AppConfig) -> Arc<WorkflowExecutionService> {
    let completion = Arc::new(flowforge_llm::create_client(&config.providers));
    let mut services = ExecutorServices::new(completion);
    services.http = config.http_call.clone();
    let registry = Arc::new(ExecutorRegistry::with_builtins(services));
    Arc::new(WorkflowExecutionService::new(registry, config.engine.clone()))
}

fn load_workflow(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Ctrl-C trips the returned token.
fn cancel_on_ctrl_c(what: &'static str) -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down {what}...");
        cancel_clone.cancel();
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flowforge=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            info!(bind = %config.gateway.bind, "Starting gateway");
            let server = GatewayServer::new(config.gateway.clone(), build_service(&config));
            let cancel = cancel_on_ctrl_c("gateway");
            server.run(cancel).await?;
        }
        Commands::Run {
            workflow,
            input,
            debug,
        } => {
            let workflow = load_workflow(&workflow)?;
            let service = build_service(&config);

            let report = service.validate(&workflow);
            for warning in &report.warnings {
                warn!("{}", warning);
            }
            if !report.valid {
                anyhow::bail!("Workflow is invalid: {}", report.errors.join("; "));
            }

            let input = input
                .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
                .unwrap_or(Value::Null);
            let mut ctx = ExecutionContext::new(Uuid::new_v4().to_string())
                .with_debug(debug || config.engine.debug)
                .with_log_tail(config.engine.log_tail);
            let deps = DependencyMap::from_workflow(&workflow);

            let outcome = WorkflowRunner::new(service.registry().clone())
                .with_observer(Arc::new(ProgressPrinter))
                .with_cancellation(cancel_on_ctrl_c("run"))
                .run(&workflow.nodes, &deps, &mut ctx, input)
                .await;

            println!(
                "{}",
                serde_json::to_string_pretty(&Value::Object(outcome.summary()))?
            );
            if !outcome.succeeded() {
                std::process::exit(1);
            }
        }
        Commands::Validate { workflow } => {
            let workflow = load_workflow(&workflow)?;
            let report = build_service(&config).validate(&workflow);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                std::process::exit(1);
            }
        }
        Commands::Nodes => {
            let service = build_service(&config);
            let registry = service.registry();
            for kind in registry.supported_kinds() {
                let status = if registry.is_fully_implemented(&kind) {
                    "ready"
                } else {
                    "placeholder"
                };
                println!("{:<20} {:<12} {:?}", kind.as_str(), status, kind.capability());
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
