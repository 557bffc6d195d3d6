//! Configuration module for the shisetsu poller.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SHISETSU_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `SHISETSU_BROWSER__HEADLESS=false`).

use crate::shisetsu::{CriteriaError, HhMm, SearchCriteria, SiteConfig, WeekdayCode};
use chrono::NaiveDate;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// File read when `--config` is not given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "shisetsu.toml";

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Log level for the crate's own modules; `RUST_LOG` overrides it entirely.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_base_url")]
    pub base_url: Url,

    /// Per-attempt transport timeout.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Total attempts per request, including the first.
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    /// Backoff before the second attempt; doubled for each further attempt.
    #[serde(default = "default_retry_delay", deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,
    /// Minimum gap between the end of one request and the start of the next.
    #[serde(default = "default_request_interval", deserialize_with = "deserialize_duration")]
    pub request_interval: Duration,
    #[serde(default = "default_session_ttl", deserialize_with = "deserialize_duration")]
    pub session_ttl: Duration,
    #[serde(default = "default_settle_delay", deserialize_with = "deserialize_duration")]
    pub settle_delay: Duration,
    /// Keep a search result when its detail page answers with an error status.
    #[serde(default = "default_true")]
    pub tolerate_detail_status: bool,

    /// Length of the default date window, starting today in Asia/Tokyo.
    #[serde(default = "default_search_days")]
    pub search_days: u32,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub search: SearchDefaults,
    #[serde(default = "default_tasks")]
    pub tasks: Vec<SearchTask>,
    #[serde(default)]
    pub browser: BrowserConfig,
}

/// Criteria shared by every task unless the task overrides them.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SearchDefaults {
    #[serde(default = "default_time_from")]
    pub time_from: HhMm,
    #[serde(default = "default_time_to")]
    pub time_to: HhMm,
    /// Ward codes.
    #[serde(default = "default_areas")]
    pub areas: BTreeSet<u32>,
    #[serde(default = "default_weekdays")]
    pub weekdays: BTreeSet<WeekdayCode>,
    #[serde(default = "default_category")]
    pub purpose_category: u32,
    #[serde(default = "default_category")]
    pub purpose: u32,
    #[serde(default = "default_category")]
    pub place_class_category: u32,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            time_from: default_time_from(),
            time_to: default_time_to(),
            areas: default_areas(),
            weekdays: default_weekdays(),
            purpose_category: default_category(),
            purpose: default_category(),
            place_class_category: default_category(),
        }
    }
}

/// A named search run on every poll. Unset fields fall back to
/// [`SearchDefaults`].
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SearchTask {
    pub name: String,
    #[serde(default)]
    pub weekdays: Option<BTreeSet<WeekdayCode>>,
    #[serde(default)]
    pub time_from: Option<HhMm>,
    #[serde(default)]
    pub time_to: Option<HhMm>,
    /// Ward codes. Used by both search modes; browse mode ticks each ward by
    /// its form value, falling back to `browser.area_labels`.
    #[serde(default)]
    pub areas: Option<BTreeSet<u32>>,
}

impl SearchTask {
    /// Build the criteria for this task over `[from, to]`.
    pub fn criteria(
        &self,
        defaults: &SearchDefaults,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SearchCriteria, CriteriaError> {
        let areas = self.areas.as_ref().unwrap_or(&defaults.areas);
        let weekdays = self.weekdays.as_ref().unwrap_or(&defaults.weekdays);
        SearchCriteria::builder(from, to)
            .time_range(
                self.time_from.unwrap_or(defaults.time_from),
                self.time_to.unwrap_or(defaults.time_to),
            )
            .areas(areas.iter().copied())
            .weekdays(weekdays.iter().copied())
            .purpose_category(defaults.purpose_category)
            .purpose(defaults.purpose)
            .place_class_category(defaults.place_class_category)
            .build()
    }

    /// Whether `name` (case-insensitive) selects this task.
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Text of the purpose checkbox label.
    #[serde(default = "default_purpose_label")]
    pub purpose_label: String,
    /// Ward label on the area filter, keyed by ward code. Only consulted when
    /// a ward checkbox cannot be found by its value.
    #[serde(default = "default_area_labels")]
    pub area_labels: BTreeMap<String, String>,
    /// How long to wait for each element or page transition.
    #[serde(default = "default_wait_timeout", deserialize_with = "deserialize_duration")]
    pub wait_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: true,
            purpose_label: default_purpose_label(),
            area_labels: default_area_labels(),
            wait_timeout: default_wait_timeout(),
        }
    }
}

impl Config {
    /// Layered figment: TOML file (if present) then environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SHISETSU_").split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract::<Self>()?.validated()
    }

    /// Reject values the session cannot work with.
    pub fn validated(self) -> Result<Self, figment::Error> {
        if self.session_ttl.is_zero() {
            return Err(figment::Error::from(
                "session_ttl must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn site(&self) -> SiteConfig {
        SiteConfig {
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            request_interval: self.request_interval,
            retry_times: self.retry_times,
            retry_delay: self.retry_delay,
            session_ttl: self.session_ttl,
            settle_delay: self.settle_delay,
            tolerate_detail_status: self.tolerate_detail_status,
        }
    }

    /// Tasks selected by name, or all of them when `names` is empty.
    ///
    /// Unknown names are returned as the error.
    pub fn select_tasks(&self, names: &[String]) -> Result<Vec<SearchTask>, Vec<String>> {
        if names.is_empty() {
            return Ok(self.tasks.clone());
        }
        let unknown: Vec<String> = names
            .iter()
            .filter(|n| !self.tasks.iter().any(|t| t.matches(n)))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(unknown);
        }
        Ok(self
            .tasks
            .iter()
            .filter(|t| names.iter().any(|n| t.matches(n)))
            .cloned()
            .collect())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> Url {
    Url::parse("https://www.shisetsu.city.yokohama.lg.jp/user").expect("valid default URL")
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_times() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_request_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

fn default_search_days() -> u32 {
    30
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Kanagawa, Naka and Nishi wards.
fn default_areas() -> BTreeSet<u32> {
    BTreeSet::from([5, 14, 15])
}

fn default_time_from() -> HhMm {
    hhmm(9)
}

fn default_time_to() -> HhMm {
    hhmm(21)
}

/// Every day, holidays included.
fn default_weekdays() -> BTreeSet<WeekdayCode> {
    weekday_set(1..=8)
}

fn default_category() -> u32 {
    1
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_purpose_label() -> String {
    "バドミントン".to_string()
}

fn default_area_labels() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(10)
}

fn weekday_set(codes: impl IntoIterator<Item = u8>) -> BTreeSet<WeekdayCode> {
    codes
        .into_iter()
        .filter_map(|c| WeekdayCode::new(c).ok())
        .collect()
}

fn hhmm(hour: u8) -> HhMm {
    HhMm::new(hour, 0).expect("whole hours are valid")
}

/// Weekday evenings and weekend/holiday daytime.
pub fn default_tasks() -> Vec<SearchTask> {
    vec![
        SearchTask {
            name: "weekday".to_string(),
            weekdays: Some(weekday_set(1..=5)),
            time_from: Some(hhmm(19)),
            time_to: Some(hhmm(21)),
            areas: None,
        },
        SearchTask {
            name: "weekend".to_string(),
            weekdays: Some(weekday_set([6, 7, 8])),
            time_from: Some(hhmm(9)),
            time_to: Some(hhmm(21)),
            areas: None,
        },
    ]
}

/// Duration parser for configuration values.
///
/// Accepts a bare number of seconds or a unit-suffixed value such as `3s`,
/// `500ms` or `30m`.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ])
    .allow_time_unit_delimiter()
    .default_unit(TimeUnit::Second)
    .build();

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let parsed = DURATION_PARSER
        .parse(value.trim())
        .map_err(|e| format!("invalid duration {value:?}: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration {value:?}: {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string or number of seconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_duration(value).map_err(de::Error::custom)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| de::Error::custom("duration cannot be negative"))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Duration::try_from_secs_f64(value).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
