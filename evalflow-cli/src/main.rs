//! Evalflow CLI - run and gate pipeline conversations

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use evalflow_core::agents::{Agent, AgentRole, PromptAgent};
use evalflow_core::config::EvalFlowConfig;
use evalflow_core::gate::{check_run_variance, evaluate_report, run_variance};
use evalflow_core::llm::ModelGateway;
use evalflow_core::metrics::MetricKind;
use evalflow_core::orchestrator::PipelineOrchestrator;
use evalflow_core::prompts::PromptClient;
use evalflow_core::reference::ReferenceStore;

#[derive(Parser)]
#[command(name = "evalflow")]
#[command(about = "End-to-end evaluation of multi-agent LLM pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to evalflow.toml plus EVALFLOW_* variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one conversation through the full pipeline
    Run {
        /// User query
        query: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Write the JSON report to a file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Apply the configured quality gates and fail on violations
        #[arg(long)]
        gate: bool,
    },
    /// Run every query in a file (one per line) with a fresh pipeline each
    Batch {
        /// File with one query per line; blank lines are skipped
        file: PathBuf,

        /// Directory for per-query JSON reports
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Runs per query; above 1 the run-to-run variance is gated
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Invoke a single agent
    Ask {
        /// Agent role (router, kpi, diagnostic, simulation, insight, dashboard, persona)
        role: String,

        /// Agent input
        input: String,
    },
    /// List the reference dataset
    Regions,
    /// Version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<EvalFlowConfig> {
    let config = match path {
        Some(path) => EvalFlowConfig::from_file(path)?,
        None => EvalFlowConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            println!("evalflow {}", env!("CARGO_PKG_VERSION"));
            println!("evalflow-core {}", evalflow_core::VERSION);
        }
        Commands::Regions => {
            let config = load_config(cli.config.as_ref())?;
            let store = match &config.reference.dataset {
                Some(path) => ReferenceStore::from_file(path)?,
                None => ReferenceStore::builtin(),
            };
            println!("{:<8} {:>12} {:>8}", "REGION", "SALES", "GROWTH");
            for row in store.rows() {
                let growth = row
                    .growth
                    .as_ref()
                    .map(|g| g.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<8} {:>12} {:>8}", row.region, row.sales.to_string(), growth);
            }
        }
        Commands::Ask { role, input } => {
            let config = load_config(cli.config.as_ref())?;
            let role: AgentRole = role.parse()?;
            if role == AgentRole::Memory {
                bail!("The memory agent only recalls values stored during a conversation");
            }

            let mut prompts = PromptClient::new();
            if let Some(dir) = &config.prompts.dir {
                prompts = prompts.with_dir(dir);
            }
            let gateway = ModelGateway::from_config(&config.gateway)?;
            let mut agent = PromptAgent::new(role, Arc::new(prompts), gateway);
            if let Some(model) = config.gateway.model_for(role) {
                agent = agent.with_model(model);
            }

            let generation = agent.run(&input).await?;
            if let Some(reason) = generation.reason() {
                tracing::warn!(reason, "Response is a placeholder");
            }
            println!("{}", generation.text());
        }
        Commands::Run {
            query,
            json,
            out,
            gate,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let orchestrator = PipelineOrchestrator::from_config(&config)?;
            let report = orchestrator.run_full_conversation(&query).await;

            if json {
                println!("{}", report.to_json_pretty()?);
            } else {
                println!("{}", report.to_summary());
            }

            if let Some(path) = out {
                report
                    .write_json(&path)
                    .with_context(|| format!("writing report to {}", path.display()))?;
            }

            if gate {
                let outcome = evaluate_report(&report, &config.thresholds);
                for violation in &outcome.violations {
                    eprintln!("gate: {}", violation);
                }
                if !outcome.passed {
                    bail!("{} quality gate violation(s)", outcome.violations.len());
                }
                eprintln!("gate: all checks passed");
            }
        }
        Commands::Batch {
            file,
            out_dir,
            repeat,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading queries from {}", file.display()))?;
            let queries: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            let repeat = repeat.max(1);

            let mut unstable = 0;
            for (i, query) in queries.iter().enumerate() {
                let mut reports = Vec::with_capacity(repeat);
                for _ in 0..repeat {
                    let orchestrator = PipelineOrchestrator::from_config(&config)?;
                    reports.push(orchestrator.run_full_conversation(query).await);
                }

                for report in &reports {
                    let region = report
                        .region()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:>3}  {:>5.1}%  {:<6} {}",
                        i + 1,
                        report.summary.pass_rate * 100.0,
                        region,
                        query
                    );

                    if let Some(dir) = &out_dir {
                        let path = dir.join(format!("{:03}-{}.json", i + 1, report.run_id));
                        report.write_json(&path)?;
                    }
                }

                if repeat > 1 {
                    for (agent, value) in run_variance(&reports, MetricKind::Correctness) {
                        println!("       {:<10} correctness variance {:.3}", agent.name(), value);
                    }
                    let violations = check_run_variance(&reports, &config.thresholds);
                    for violation in &violations {
                        eprintln!("gate: {}", violation);
                    }
                    if !violations.is_empty() {
                        unstable += 1;
                    }
                }
            }

            if unstable > 0 {
                bail!(
                    "{} of {} queries exceeded the run variance limit",
                    unstable,
                    queries.len()
                );
            }
        }
    }

    Ok(())
}
