//! Runs the configured search tasks one after another and persists the results.

use crate::config::{Config, SearchTask};
use crate::output::{self, MERGED_CSV};
use crate::shisetsu::transport::Transport;
use crate::shisetsu::{ProtocolError, SearchCriteria, SearchError, ShisetsuApi, SlotRecord, slots};
use crate::utils::fmt_duration;
use anyhow::{Context, bail};
use chrono::{Local, NaiveDate, TimeDelta, Utc};
use chrono_tz::Asia::Tokyo;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// Which client performs the searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Replay the site's HTTP endpoints.
    Http,
    /// Drive a browser over WebDriver.
    #[cfg(feature = "browser")]
    Browser,
}

/// Today's date on the site's calendar.
pub fn today_in_tokyo() -> NaiveDate {
    Utc::now().with_timezone(&Tokyo).date_naive()
}

/// Resolve the searched date window.
///
/// `from` defaults to `today`; `to` defaults to `from + days`.
pub fn date_window(
    today: NaiveDate,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    days: u32,
) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let from = from.unwrap_or(today);
    let to = match to {
        Some(to) => to,
        None => from
            .checked_add_signed(TimeDelta::days(i64::from(days)))
            .context("date window overflows the calendar")?,
    };
    if from > to {
        bail!("date window is inverted: {from} > {to}");
    }
    Ok((from, to))
}

/// What one task produced.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Written to `<task>.json`.
    pub payload: Value,
    pub slots: Vec<SlotRecord>,
    pub refusal: Option<ProtocolError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Completed { slots: usize },
    Refused { message: String },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub reports: Vec<TaskReport>,
    /// Deduplicated across tasks.
    pub slots: Vec<SlotRecord>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Failed { .. }))
            .count()
    }
}

pub struct Runner {
    config: Config,
    mode: Mode,
    cancel: CancellationToken,
    transport: Option<Arc<dyn Transport>>,
}

impl Runner {
    pub fn new(config: Config, mode: Mode, cancel: CancellationToken) -> Self {
        Self {
            config,
            mode,
            cancel,
            transport: None,
        }
    }

    /// Use `transport` instead of a real HTTP client for every task.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run `tasks` over `[from, to]`, writing into a new directory under `output_base`.
    ///
    /// A failing task is logged and recorded; the remaining tasks still run.
    pub async fn run(
        &self,
        tasks: &[SearchTask],
        (from, to): (NaiveDate, NaiveDate),
        output_base: &Path,
    ) -> anyhow::Result<RunSummary> {
        let run_dir = output::create_run_dir(output_base, &Local::now())
            .context("Failed to create run directory")?;
        info!(
            dir = %run_dir.display(),
            %from,
            %to,
            tasks = tasks.len(),
            mode = ?self.mode,
            "Starting run"
        );

        let start = Instant::now();
        let mut reports = Vec::with_capacity(tasks.len());
        let mut collected = Vec::new();
        let mut cancelled = false;

        for task in tasks {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let span = info_span!("task", name = %task.name);
            let result = self
                .run_task(task, from, to, &run_dir)
                .instrument(span)
                .await;

            let status = match result {
                Ok(result) => match result.refusal {
                    Some(refusal) => TaskStatus::Refused {
                        message: refusal.message,
                    },
                    None => {
                        let count = result.slots.len();
                        collected.extend(result.slots);
                        TaskStatus::Completed { slots: count }
                    }
                },
                Err(e) if self.cancel.is_cancelled() => {
                    warn!(task = %task.name, error = %e, "Task interrupted");
                    cancelled = true;
                    reports.push(TaskReport {
                        name: task.name.clone(),
                        status: TaskStatus::Failed {
                            error: "cancelled".to_string(),
                        },
                    });
                    break;
                }
                Err(e) => {
                    error!(task = %task.name, error = format!("{e:#}"), "Task failed");
                    TaskStatus::Failed {
                        error: format!("{e:#}"),
                    }
                }
            };
            reports.push(TaskReport {
                name: task.name.clone(),
                status,
            });
        }

        let mut merged = slots::dedup(collected);
        slots::sort_for_output(&mut merged);
        output::write_slots_csv(&run_dir.join(MERGED_CSV), &merged)
            .context("Failed to write merged CSV")?;

        let summary = RunSummary {
            run_dir,
            reports,
            slots: merged,
            cancelled,
        };
        info!(
            slots = summary.slots.len(),
            failed = summary.failed(),
            cancelled = summary.cancelled,
            duration = fmt_duration(start.elapsed()),
            "Run finished"
        );
        Ok(summary)
    }

    async fn run_task(
        &self,
        task: &SearchTask,
        from: NaiveDate,
        to: NaiveDate,
        run_dir: &Path,
    ) -> anyhow::Result<TaskResult> {
        let criteria = task
            .criteria(&self.config.search, from, to)
            .with_context(|| format!("Invalid criteria for task {}", task.name))?;

        let result = match self.mode {
            Mode::Http => self.search_http(&criteria).await?,
            #[cfg(feature = "browser")]
            Mode::Browser => self.search_browser(&criteria).await?,
        };

        output::save_json(&run_dir.join(format!("{}.json", task.name)), &result.payload)
            .context("Failed to write task JSON")?;
        output::write_slots_csv(&run_dir.join(format!("{}.csv", task.name)), &result.slots)
            .context("Failed to write task CSV")?;

        match &result.refusal {
            Some(refusal) => warn!(message = %refusal.message, "Task refused by server"),
            None => info!(slots = result.slots.len(), "Task completed"),
        }
        Ok(result)
    }

    async fn search_http(&self, criteria: &SearchCriteria) -> anyhow::Result<TaskResult> {
        // One client per task: its own session and its own throttle clock.
        let site = self.config.site();
        let client = match &self.transport {
            Some(transport) => ShisetsuApi::with_transport(site, transport.clone()),
            None => ShisetsuApi::new(site)?,
        };
        let mut client = client.with_cancellation(self.cancel.clone());

        let outcome = client.search(criteria).await.map_err(|e| match e {
            SearchError::Cancelled => anyhow::anyhow!("search cancelled"),
            other => anyhow::Error::new(other).context("Search failed"),
        })?;

        Ok(TaskResult {
            payload: Value::Object(outcome.payload),
            slots: outcome.slots,
            refusal: outcome.refusal,
        })
    }

    #[cfg(feature = "browser")]
    async fn search_browser(&self, criteria: &SearchCriteria) -> anyhow::Result<TaskResult> {
        use crate::shisetsu::browser::BrowserClient;

        let client = BrowserClient::connect(&self.config.site(), &self.config.browser)
            .await
            .context("Failed to start browser session")?;
        let result = client.search(criteria, &self.cancel).await;
        client.quit().await;
        let slots = result.context("Browser search failed")?;

        Ok(TaskResult {
            payload: serde_json::to_value(&slots)?,
            slots,
            refusal: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_window_defaults_to_today_plus_days() {
        let window = date_window(date(2024, 6, 1), None, None, 30).unwrap();
        assert_eq!(window, (date(2024, 6, 1), date(2024, 7, 1)));
    }

    #[test]
    fn test_date_window_days_count_from_explicit_start() {
        let window = date_window(date(2024, 6, 1), Some(date(2024, 6, 10)), None, 7).unwrap();
        assert_eq!(window, (date(2024, 6, 10), date(2024, 6, 17)));
    }

    #[test]
    fn test_date_window_explicit_end_wins() {
        let window =
            date_window(date(2024, 6, 1), None, Some(date(2024, 6, 5)), 30).unwrap();
        assert_eq!(window, (date(2024, 6, 1), date(2024, 6, 5)));
    }

    #[test]
    fn test_date_window_rejects_inverted() {
        assert!(date_window(date(2024, 6, 10), None, Some(date(2024, 6, 1)), 30).is_err());
    }
}
