use anyhow::{Context, Result};
use dagflow::cli::commands::{RunCommand, ValidateCommand};
use dagflow::cli::output::*;
use dagflow::cli::{Cli, Command};
use dagflow::core::config::{PipelineConfig, RunOptions};
use dagflow::execution::{
    DependencyGraph, ExecutionEngine, RetryingExecutor, ShellExecutor, StepExecutor,
};
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load pipeline config from {}", cmd.file))?;
    let definition = config.to_definition()?;
    let options = cmd.apply_overrides(config.run_options()?)?;

    println!(
        "{} Loaded pipeline: {} ({} steps, max concurrency {}, {})",
        INFO,
        style(&definition.name).bold(),
        definition.len(),
        options.max_concurrency,
        options.failure_policy
    );

    match cmd.retry_strategy()? {
        Some(strategy) => {
            let executor = RetryingExecutor::new(ShellExecutor::new(), strategy);
            execute(cmd, executor, options, definition).await
        }
        None => execute(cmd, ShellExecutor::new(), options, definition).await,
    }
}

async fn execute<E: StepExecutor + 'static>(
    cmd: &RunCommand,
    executor: E,
    options: RunOptions,
    definition: dagflow::PipelineDefinition,
) -> Result<()> {
    let engine = ExecutionEngine::new(executor, options);

    let json = cmd.json;
    engine.add_event_handler(move |event| {
        if !json {
            println!("{}", format_execution_event(&event));
        }
    });

    let run = engine.start(definition)?;

    // Ctrl-C cancels the run; the loop still waits out the grace period
    let token = run.cancellation_token();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pipeline");
            token.cancel();
        }
    });

    let report = run.wait().await;
    signal.abort();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n{}", format_report(&report));
    }

    if report.is_success() {
        if !cmd.json {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&report.pipeline_name).bold(),
                style("successfully").green()
            );
        }
    } else {
        if !cmd.json {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&report.pipeline_name).bold(),
                style("failed").red()
            );
        }
        error!("Pipeline {} failed", report.pipeline_name);
        std::process::exit(1);
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    if !cmd.json {
        println!("{} Validating pipeline...", INFO);
    }

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let definition = config.to_definition()?;
        let options = config.run_options()?;
        Ok((definition, options))
    });

    match result {
        Ok((definition, options)) => {
            let order = DependencyGraph::build(&definition)?.topological_order();

            if cmd.json {
                let data = serde_json::json!({
                    "valid": true,
                    "name": definition.name,
                    "steps": definition.len(),
                    "max_concurrency": options.max_concurrency,
                    "failure_policy": options.failure_policy,
                    "order": order,
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Pipeline configuration is valid!", CHECK);
                println!("  Name: {}", style(&definition.name).bold());
                println!("  Steps: {}", style(definition.len()).cyan());
                println!("  Order: {}", style(order.join(" -> ")).dim());
            }
            Ok(())
        }
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": e.to_string() });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(e).red());
            }
            std::process::exit(1);
        }
    }
}
