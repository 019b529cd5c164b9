//! Demo host for the `cobus` scheduler: loads config, wires up a couple of
//! example tasks, and runs the step loop until interrupted.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cobus::config::Config;
use cobus::scheduler::{LoggingStatsSink, Scheduler};
use cobus::task::{Priority, TaskId};

#[derive(Parser)]
#[command(name = "cobusd", about = "Demo host for the cobus scheduler")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, default_value = "cobus.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file to the path given by `--config`.
    Init,
    /// Run the scheduler loop (the default if no subcommand is given).
    Run,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Init => {
            Config::write_default(&cli.config)
                .with_context(|| format!("writing default config to {}", cli.config))?;
            log::info!("wrote default config to {}", cli.config);
            Ok(())
        }
        Command::Run => run(&cli.config),
    }
}

fn run(config_path: &str) -> Result<()> {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("could not load {config_path} ({err}), using defaults");
            Config::default()
        }
    };
    config.validate().context("invalid configuration")?;

    let mut sched = Scheduler::with_hooks(
        config.into_scheduler_config(),
        Box::new(cobus::clock::SystemClock::new()),
        Box::new(cobus::scheduler::NoopYieldHook),
        Box::new(LoggingStatsSink),
    );

    sched
        .subscribe(
            TaskId::MAIN,
            "demo/#",
            "",
            Box::new(|_s, topic, payload, originator| {
                log::info!("demo bus: {topic} = {payload} (from {originator})");
            }),
        )
        .context("registering demo subscription")?;

    sched
        .add_task(
            Box::new(|s| {
                let _ = s.publish("demo/heartbeat", "tick", "heartbeat-task");
            }),
            Some("heartbeat".to_string()),
            1_000_000,
            Priority::Normal,
        )
        .context("registering heartbeat task")?;

    log::info!("cobusd running, ctrl-c to stop");
    loop {
        sched.step();
        thread::sleep(Duration::from_millis(10));
    }
}
