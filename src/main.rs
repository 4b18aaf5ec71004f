use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use graft::config::AppConfig;
use graft::handlers;
use graft::workflow::data::IssueInput;
use graft::workflow::orchestrator::{RunResult, RunStatus, WorkflowOrchestrator};
use graft::workflow::store::StateStore;

#[derive(Parser)]
#[command(name = "graft", about = "AI-powered GitHub issue-to-patch pipeline")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Include error details in output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a run for a single issue
    Run {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        issue: u64,
        /// Reuse an existing run id instead of generating one
        #[arg(long)]
        run_id: Option<String>,
        /// Skip commit, push, and pull request creation
        #[arg(long)]
        dry_run: bool,
    },
    /// Continue a paused or failed run
    Resume {
        #[arg(long)]
        run_id: String,
    },
    /// Show the persisted state of a run
    Status {
        #[arg(long)]
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            owner,
            repo,
            issue,
            run_id,
            dry_run,
        } => {
            // The CLI decides the submit mode up front; nothing flips it mid-run
            config.submit.dry_run = config.submit.dry_run || dry_run;

            let coordinator = handlers::default_coordinator(&config)?;
            let mut orchestrator =
                WorkflowOrchestrator::for_run(coordinator, &config.runner.state_dir, run_id)
                    .with_max_attempts(config.runner.max_attempts);
            install_interrupt_handler(&orchestrator);

            tracing::info!(
                run_id = %orchestrator.run_id(),
                owner = %owner,
                repo = %repo,
                issue = issue,
                "Starting run"
            );
            let result = orchestrator
                .run(IssueInput {
                    owner,
                    repo,
                    issue_number: issue,
                })
                .await?;
            print_result(&result, cli.verbose);
            if result.status == RunStatus::Failed {
                std::process::exit(1);
            }
        }
        Command::Resume { run_id } => {
            let coordinator = handlers::default_coordinator(&config)?;
            let mut orchestrator = WorkflowOrchestrator::for_run(
                coordinator,
                &config.runner.state_dir,
                Some(run_id),
            )
            .with_max_attempts(config.runner.max_attempts);
            install_interrupt_handler(&orchestrator);

            tracing::info!(run_id = %orchestrator.run_id(), "Resuming run");
            let result = orchestrator.resume().await?;
            print_result(&result, cli.verbose);
            if result.status == RunStatus::Failed {
                std::process::exit(1);
            }
        }
        Command::Status { run_id } => {
            let store = StateStore::for_run(&config.runner.state_dir, &run_id);
            match store.load().await? {
                Some(record) => {
                    println!("run:      {}", record.run_id);
                    println!("state:    {}", record.current_state);
                    println!("attempt:  {}", record.attempt);
                    println!("updated:  {}", record.updated_at.to_rfc3339());
                    println!(
                        "history:  {}",
                        record
                            .history
                            .iter()
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>()
                            .join(" -> ")
                    );
                    if let Some(error) = record.error {
                        println!("error:    [{}] {}", error.code, error.message);
                    }
                }
                None => println!("No record found for run {run_id}"),
            }
        }
    }

    Ok(())
}

/// Ctrl-C requests a cooperative cancel; the loop stops at the next stage
/// boundary and persists everything gathered so far.
fn install_interrupt_handler(orchestrator: &WorkflowOrchestrator) {
    let signals = orchestrator.signals();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling run");
            signals.request_cancel();
        }
    });
}

fn print_result(result: &RunResult, verbose: bool) {
    println!("run:      {}", result.run_id);
    println!("status:   {:?}", result.status);
    println!("state:    {}", result.final_state);
    println!("attempt:  {}", result.attempt);
    println!("duration: {:.1}s", result.duration.as_secs_f64());
    if let Some(submission) = &result.data.submission {
        println!("pr:       #{} {}", submission.pr_number, submission.pr_url);
    }
    if let Some(error) = &result.error {
        println!("error:    [{}] {}", error.code, error.message);
        if verbose {
            if let Some(details) = &error.details {
                println!("details:  {details}");
            }
        }
    }
}
