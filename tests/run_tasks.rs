//! Task runner: sequential tasks, per-task clients, persisted output.

mod helpers;

use chrono::NaiveDate;
use figment::Figment;
use figment::providers::{Format, Toml};
use helpers::{MockTransport, Reply, SEARCH_REDIRECT, TOKEN, DETAIL_PAGE, home_page};
use http::Method;
use shisetsu::config::Config;
use shisetsu::output::{MERGED_CSV, read_slots_csv};
use shisetsu::runner::{Mode, Runner, TaskStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn config() -> Config {
    Figment::new()
        .merge(Toml::string(r#"base_url = "https://shisetsu.test/user""#))
        .extract()
        .unwrap()
}

fn window() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
    )
}

fn site_with_search_replies(replies: Vec<Reply>) -> MockTransport {
    MockTransport::new()
        .on(Method::GET, "/user/Home", [Reply::ok(home_page(TOKEN))])
        .on(Method::POST, "/user/Home/SearchByDateTime", replies)
        .on(
            Method::GET,
            "/user/VacantFrameFacilityStatus",
            [Reply::ok(DETAIL_PAGE)],
        )
}

#[tokio::test(start_paused = true)]
async fn every_task_writes_its_own_files() {
    let out = tempfile::tempdir().unwrap();
    let transport = Arc::new(site_with_search_replies(vec![Reply::ok(SEARCH_REDIRECT)]));
    let config = config();
    let tasks = config.tasks.clone();

    let summary = Runner::new(config, Mode::Http, CancellationToken::new())
        .with_transport(transport.clone())
        .run(&tasks, window(), out.path())
        .await
        .unwrap();

    assert!(summary.run_dir.starts_with(out.path()));
    for name in ["weekday.json", "weekday.csv", "weekend.json", "weekend.csv", MERGED_CSV] {
        assert!(summary.run_dir.join(name).is_file(), "missing {name}");
    }
    assert_eq!(
        summary.reports.iter().map(|r| r.status.clone()).collect::<Vec<_>>(),
        [
            TaskStatus::Completed { slots: 2 },
            TaskStatus::Completed { slots: 2 }
        ]
    );

    // Both tasks saw the same page; the merged list holds each slot once, sorted.
    let merged = read_slots_csv(&summary.run_dir.join(MERGED_CSV)).unwrap();
    assert_eq!(merged, summary.slots);
    let dates: Vec<&str> = merged.iter().map(|s| s.date.as_str()).collect();
    assert_eq!(dates, ["2024/06/01(土)", "2024/06/02(日)"]);

    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(summary.run_dir.join("weekday.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(json["DetailData"]["facilities"].as_array().unwrap().len(), 2);

    // One fresh session per task.
    assert_eq!(transport.requests_to("/user/Home").len(), 4);
}

#[tokio::test(start_paused = true)]
async fn failing_task_does_not_stop_the_run() {
    let out = tempfile::tempdir().unwrap();
    let transport = Arc::new(site_with_search_replies(vec![
        Reply::status(500, "error"),
        Reply::status(500, "error"),
        Reply::status(500, "error"),
        Reply::ok(SEARCH_REDIRECT),
    ]));
    let config = config();
    let tasks = config.tasks.clone();

    let summary = Runner::new(config, Mode::Http, CancellationToken::new())
        .with_transport(transport)
        .run(&tasks, window(), out.path())
        .await
        .unwrap();

    assert!(matches!(summary.reports[0].status, TaskStatus::Failed { .. }));
    assert_eq!(summary.reports[1].status, TaskStatus::Completed { slots: 2 });
    assert_eq!(summary.failed(), 1);
    assert!(!summary.run_dir.join("weekday.json").exists());
    assert!(summary.run_dir.join("weekend.json").is_file());
    assert_eq!(summary.slots.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_stops_before_the_next_task() {
    let out = tempfile::tempdir().unwrap();
    let transport = Arc::new(site_with_search_replies(vec![Reply::ok(SEARCH_REDIRECT)]));
    let config = config();
    let tasks = config.tasks.clone();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = Runner::new(config, Mode::Http, cancel)
        .with_transport(transport.clone())
        .run(&tasks, window(), out.path())
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert!(summary.reports.is_empty());
    assert!(transport.requests().is_empty());
    // The merged file is still written, header only.
    assert!(read_slots_csv(&summary.run_dir.join(MERGED_CSV)).unwrap().is_empty());
}
