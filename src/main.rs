use anyhow::Context;
use clap::Parser;
use shisetsu::cli::{Args, Command, SearchArgs};
use shisetsu::config::Config;
use shisetsu::logging::setup_logging;
use shisetsu::output;
use shisetsu::runner::{self, Mode, Runner, TaskStatus};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logging needs the config, so a config error can only go to stderr.
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        base_url = %config.base_url,
        "starting shisetsu"
    );

    let result = match args.command {
        Command::Search(search) => run_search(config, Mode::Http, search).await,
        #[cfg(feature = "browser")]
        Command::Browse(search) => run_search(config, Mode::Browser, search).await,
        Command::Diff { previous, current } => run_diff(&previous, &current),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = format!("{e:#}"), "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run_search(config: Config, mode: Mode, args: SearchArgs) -> anyhow::Result<ExitCode> {
    let tasks = config
        .select_tasks(&args.tasks)
        .map_err(|unknown| anyhow::anyhow!("Unknown task(s): {}", unknown.join(", ")))?;
    let window = runner::date_window(
        runner::today_in_tokyo(),
        args.from,
        args.to,
        args.days.unwrap_or(config.search_days),
    )?;
    let output_base = args.output_dir.unwrap_or_else(|| config.output_dir.clone());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current request");
            ctrl_c.cancel();
        }
    });

    let summary = Runner::new(config, mode, cancel)
        .run(&tasks, window, &output_base)
        .await?;

    for report in &summary.reports {
        match &report.status {
            TaskStatus::Completed { slots } => info!(task = %report.name, slots, "Task summary"),
            TaskStatus::Refused { message } => {
                warn!(task = %report.name, message = %message, "Task summary: refused")
            }
            TaskStatus::Failed { error } => {
                warn!(task = %report.name, error = %error, "Task summary: failed")
            }
        }
    }
    info!(
        dir = %summary.run_dir.display(),
        slots = summary.slots.len(),
        "Results written"
    );

    Ok(if summary.cancelled {
        ExitCode::from(130)
    } else if summary.failed() == summary.reports.len() && !summary.reports.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn run_diff(previous: &std::path::Path, current: &std::path::Path) -> anyhow::Result<ExitCode> {
    let before = output::read_slots_csv(previous)
        .with_context(|| format!("Failed to read {}", previous.display()))?;
    let after = output::read_slots_csv(current)
        .with_context(|| format!("Failed to read {}", current.display()))?;
    let changes = shisetsu::diff::diff(&before, &after);

    for slot in &changes.added {
        println!(
            "+ {} {} {} {}",
            slot.date, slot.time_slot, slot.facility_name, slot.room_name
        );
    }
    for slot in &changes.removed {
        println!(
            "- {} {} {} {}",
            slot.date, slot.time_slot, slot.facility_name, slot.room_name
        );
    }
    info!(
        added = changes.added.len(),
        removed = changes.removed.len(),
        "Compared slot lists"
    );
    Ok(ExitCode::SUCCESS)
}
