//! Otto command-line interface.

use clap::{Parser, Subcommand};
use otto::config::AssistantConfig;
use otto::evaluator::Evaluator;
use otto::exec::console::{render_tool_listing, render_vehicle_summary};
use otto::exec::{McpServer, ToolManager};
use otto::llm::{ApiLlmClient, LlmClient};
use otto::runtime::RuntimeBuilder;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "otto", version, about = "In-vehicle voice assistant runtime")]
struct Cli {
    /// Configuration file (JSON); defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline until Ctrl-C.
    Run,
    /// Evaluate a JSONL case file and write a JSON report.
    Eval {
        /// Cases, one JSON object per line.
        cases: PathBuf,
        /// Report output path.
        #[arg(long, default_value = "eval_report.json")]
        report: PathBuf,
    },
    /// List the tool catalog and current vehicle state.
    Tools,
    /// Serve MCP requests over stdin/stdout, one JSON object per line.
    Mcp,
}

fn load_config(path: Option<&PathBuf>) -> otto::Result<AssistantConfig> {
    match path {
        Some(path) => AssistantConfig::load(path),
        None => {
            let mut config = AssistantConfig::default();
            config.agents = AssistantConfig::default_agents();
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> otto::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Run => {
            let mut runtime = RuntimeBuilder::new(config).build()?;
            runtime.start().await?;
            info!("pipeline running, press Ctrl-C to stop");
            let _ = tokio::signal::ctrl_c().await;
            runtime.stop().await;
        }
        Command::Eval { cases, report } => {
            let llm: Arc<dyn LlmClient> = Arc::new(ApiLlmClient::new(&config.llm));
            let mut runtime = RuntimeBuilder::new(config)
                .llm(Arc::clone(&llm))
                .evaluation_mode()
                .build()?;
            runtime.start().await?;

            let evaluator = Evaluator::new(
                Arc::clone(&runtime.bus),
                Arc::clone(&runtime.tracker),
            )
            .with_judge(llm);
            let loaded = Evaluator::load_cases(&cases)?;
            info!(cases = loaded.len(), "evaluation starting");
            let result = evaluator.run(&loaded).await;
            result.write(&report)?;
            println!(
                "total={} agent_match={:.0}% response_pass={:.0}% overall={:.0}% avg_latency={}ms",
                result.summary.total,
                result.summary.agent_match_rate * 100.0,
                result.summary.response_pass_rate * 100.0,
                result.summary.overall_pass_rate * 100.0,
                result.summary.avg_latency_ms,
            );
            runtime.stop().await;
        }
        Command::Tools => {
            let manager = ToolManager::new();
            println!("{}", render_tool_listing(&manager));
            println!("{}", render_vehicle_summary(&manager));
        }
        Command::Mcp => {
            let server = McpServer::new(Arc::new(ToolManager::new()));
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            for line in stdin.lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let response = server.handle_json(&line);
                let encoded = serde_json::to_string(&response)
                    .unwrap_or_else(|_| "{\"error\":{\"code\":-32603,\"message\":\"encode failure\"}}".to_owned());
                writeln!(stdout, "{encoded}")?;
                stdout.flush()?;
            }
        }
    }
    Ok(())
}
