use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use coop_sched::capture::LogSink;
use coop_sched::config::{CaptureConfig, JobConfig};
use coop_sched::control::{Action, Controller, PanelStatus};
use coop_sched::demo;
use coop_sched::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "coop-sched")]
#[command(version)]
#[command(about = "Cooperative scheduler for long-running simulations")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Drive a demo simulation through a scripted control session
    Run(RunArgs),

    /// List the built-in demo simulations
    Sims {
        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Demo simulation to run (see `coop-sched sims`)
    #[arg(long, default_value = "logistic")]
    sim: String,

    /// Whitespace-separated session script, e.g. "start wait:200 stop step wait:50".
    /// Tokens: start, stop, step, reset, defaults, wait:<ms>, set:<key>=<value>,
    /// flag:<name>
    #[arg(long, default_value = "start wait:200 stop")]
    script: String,

    /// Refresh at every checkpoint and pace the run to the animate interval
    #[arg(long)]
    throttle: bool,

    /// Target interval between two refreshes while running
    #[arg(long, default_value = "50")]
    animate_interval_ms: u64,

    /// Minimum time between two yields to the controller
    #[arg(long, default_value = "10")]
    yield_quantum_ms: u64,

    /// Log a captured frame on every step, at most one per this much simulation time
    #[arg(long)]
    capture_delay: Option<f64>,

    /// Time to keep pumping events after the script ends
    #[arg(long, default_value = "50")]
    settle_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Session Script
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum ScriptStep {
    Press(Action),
    Wait(Duration),
    Set { key: String, value: String },
}

impl FromStr for ScriptStep {
    type Err = String;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if let Some(ms) = token.strip_prefix("wait:") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| format!("invalid wait duration: {}", ms))?;
            return Ok(ScriptStep::Wait(Duration::from_millis(ms)));
        }
        if let Some(assignment) = token.strip_prefix("set:") {
            let (key, value) = assignment
                .split_once('=')
                .ok_or_else(|| format!("expected set:<key>=<value>, got {}", token))?;
            return Ok(ScriptStep::Set {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        token.parse().map(ScriptStep::Press)
    }
}

fn parse_script(script: &str) -> Result<Vec<ScriptStep>, String> {
    script.split_whitespace().map(str::parse).collect()
}

// =============================================================================
// Run Implementation
// =============================================================================

async fn run_session(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let steps = parse_script(&args.script)?;
    let simulation = demo::by_name(&args.sim)
        .ok_or_else(|| format!("unknown simulation '{}', see `coop-sched sims`", args.sim))?;

    let config = JobConfig::default()
        .with_animate_interval_ms(args.animate_interval_ms)
        .with_yield_quantum_ms(args.yield_quantum_ms)
        .with_throttle(args.throttle);
    let mut controller = Controller::new(simulation, &config);
    if let Some(delay) = args.capture_delay {
        let capture = CaptureConfig::new(&args.sim).with_delay(delay);
        controller.add_capture(capture, Arc::new(LogSink));
    }

    let shutdown = install_shutdown_handler();
    tracing::info!(sim = %args.sim, steps = steps.len(), "Running session");

    for step in steps {
        if shutdown.is_cancelled() {
            break;
        }
        match step {
            ScriptStep::Press(action) => {
                if let Err(e) = controller.press(action.clone()) {
                    eprintln!("Warning: {}: {}", action, e);
                }
                if action == Action::Reset {
                    controller.wait_inactive(Duration::from_secs(5)).await;
                }
            }
            ScriptStep::Wait(duration) => pump(&mut controller, duration, &shutdown).await,
            ScriptStep::Set { key, value } => {
                if let Err(e) = controller.set_param(&key, &value) {
                    eprintln!("Warning: set {}: {}", key, e);
                }
            }
        }
    }
    pump(&mut controller, Duration::from_millis(args.settle_ms), &shutdown).await;

    let status = controller.status();
    print_status(&status, &args.output)?;

    if controller.job().is_active() {
        controller.job().kill();
        if !controller.wait_inactive(Duration::from_secs(5)).await {
            tracing::warn!("Worker did not exit in time");
        }
    }
    Ok(())
}

/// Pump the controller for `duration`, cutting it short on shutdown.
async fn pump(controller: &mut Controller, duration: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = controller.pump_for(duration) => {}
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested, ending session");
        }
    }
}

fn print_status(
    status: &PanelStatus,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        OutputFormat::Table => {
            println!("Job ID:     {}", status.job_id);
            println!("Command:    {}", status.command);
            println!("Active:     {}", yes_no(status.active));
            println!("Throttled:  {}", yes_no(status.throttled));
            println!("Steps:      {}", status.steps);
            match status.time {
                Some(time) => println!("Time:       {}", time),
                None => println!("Time:       -"),
            }
            println!("Finished:   {}", yes_no(status.finished));
            if let Some(failure) = &status.failure {
                println!("Failure:");
                for line in failure.lines() {
                    println!("  {}", line);
                }
            }

            let buttons: Vec<String> = status
                .buttons
                .iter()
                .map(|b| {
                    if b.enabled {
                        format!("[{}]", b.label)
                    } else {
                        format!("[{} (disabled)]", b.label)
                    }
                })
                .collect();
            println!("Buttons:    {}", buttons.join(" "));

            println!();
            let locked = if status.params_locked { " (locked)" } else { "" };
            println!("Parameters{}:", locked);
            println!("  {:<16} VALUE", "KEY");
            println!("  {}", "-".repeat(30));
            for param in &status.params {
                println!("  {:<16} {}", param.key, param.value);
            }

            if !status.flags.is_empty() {
                println!();
                println!("Flags: {}", status.flags.join(", "));
            }
            if !status.captures.is_empty() {
                println!();
                println!("Captures:");
                for capture in &status.captures {
                    println!("  {:<16} {} frames", capture.label, capture.saved);
                }
            }
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

// =============================================================================
// Simulation Listing
// =============================================================================

#[derive(Serialize)]
struct SimOutput<'a> {
    name: &'a str,
    description: &'a str,
}

fn list_sims(output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output: Vec<SimOutput> = demo::DEMOS
                .iter()
                .map(|(name, description)| SimOutput { name, description })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{:<12} DESCRIPTION", "NAME");
            println!("{}", "-".repeat(78));
            for (name, description) in demo::DEMOS {
                println!("{:<12} {}", name, description);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(run_args) => run_session(run_args).await?,
        Commands::Sims { output } => list_sims(&output)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_script() {
        let steps = parse_script("start wait:20 set:r=3.2 flag:Perturb stop reset").unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep::Press(Action::Start),
                ScriptStep::Wait(Duration::from_millis(20)),
                ScriptStep::Set {
                    key: "r".to_string(),
                    value: "3.2".to_string()
                },
                ScriptStep::Press(Action::Flag("Perturb".to_string())),
                ScriptStep::Press(Action::Stop),
                ScriptStep::Press(Action::Reset),
            ]
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(parse_script("wait:soon").is_err());
        assert!(parse_script("set:r").is_err());
        assert!(parse_script("start jump").is_err());
    }

    #[test]
    fn empty_script_is_empty() {
        assert!(parse_script("   ").unwrap().is_empty());
    }
}
