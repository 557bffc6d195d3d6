//! Search criteria and their wire encoding.

use super::TOKEN_FIELD;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const SEARCH_TARGET: u32 = 1;
const LANGUAGE_CODE: u32 = 0;

const AREA_FIELD: &str = "HomeModel.SearchByDateTimeModel.SelectedArea";
const WEEKDAY_FIELD: &str = "HomeModel.SelectedWeekDays";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CriteriaError {
    #[error("date range is inverted: {from} > {to}")]
    InvertedDates { from: NaiveDate, to: NaiveDate },
    #[error("time range must satisfy from < to, got {from}-{to}")]
    InvertedTimes { from: HhMm, to: HhMm },
    #[error("invalid HHMM time: {0:?}")]
    InvalidTime(String),
    #[error("weekday code must be 1-8, got {0}")]
    InvalidWeekday(u8),
    #[error("at least one {0} must be selected")]
    Empty(&'static str),
}

/// A wall-clock time in the site's `HHMM` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HhMm {
    hour: u8,
    minute: u8,
}

impl HhMm {
    pub fn new(hour: u8, minute: u8) -> Result<Self, CriteriaError> {
        // 2400 is how the site spells end-of-day.
        if hour > 24 || minute > 59 || (hour == 24 && minute != 0) {
            return Err(CriteriaError::InvalidTime(format!("{hour:02}{minute:02}")));
        }
        Ok(Self { hour, minute })
    }
}

impl FromStr for HhMm {
    type Err = CriteriaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CriteriaError::InvalidTime(s.to_string());
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour = s[..2].parse().map_err(|_| invalid())?;
        let minute = s[2..].parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for HhMm {
    type Error = CriteriaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HhMm> for String {
    fn from(value: HhMm) -> Self {
        value.to_string()
    }
}

impl fmt::Display for HhMm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.hour, self.minute)
    }
}

/// Day-of-week selector: 1 = Monday ... 7 = Sunday, 8 = public holiday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WeekdayCode(u8);

impl WeekdayCode {
    pub const HOLIDAY: WeekdayCode = WeekdayCode(8);

    pub fn new(code: u8) -> Result<Self, CriteriaError> {
        if (1..=8).contains(&code) {
            Ok(Self(code))
        } else {
            Err(CriteriaError::InvalidWeekday(code))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_holiday(self) -> bool {
        self == Self::HOLIDAY
    }

    /// All eight selectors.
    pub fn all() -> BTreeSet<WeekdayCode> {
        (1..=8).map(WeekdayCode).collect()
    }

    /// Japanese label used on the site's checkboxes.
    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "月",
            2 => "火",
            3 => "水",
            4 => "木",
            5 => "金",
            6 => "土",
            7 => "日",
            _ => "祝",
        }
    }
}

impl TryFrom<u8> for WeekdayCode {
    type Error = CriteriaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WeekdayCode> for u8 {
    fn from(value: WeekdayCode) -> Self {
        value.0
    }
}

/// One search. Validated at construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchCriteria {
    date_from: NaiveDate,
    date_to: NaiveDate,
    time_from: HhMm,
    time_to: HhMm,
    areas: BTreeSet<u32>,
    weekdays: BTreeSet<WeekdayCode>,
    purpose_category: u32,
    purpose: u32,
    place_class_category: u32,
}

impl SearchCriteria {
    pub fn builder(date_from: NaiveDate, date_to: NaiveDate) -> SearchCriteriaBuilder {
        SearchCriteriaBuilder {
            date_from,
            date_to,
            time_from: HhMm { hour: 9, minute: 0 },
            time_to: HhMm { hour: 21, minute: 0 },
            areas: BTreeSet::new(),
            weekdays: WeekdayCode::all(),
            purpose_category: 1,
            purpose: 1,
            place_class_category: 1,
        }
    }

    pub fn date_from(&self) -> NaiveDate {
        self.date_from
    }

    pub fn date_to(&self) -> NaiveDate {
        self.date_to
    }

    pub fn time_range(&self) -> (HhMm, HhMm) {
        (self.time_from, self.time_to)
    }

    pub fn areas(&self) -> &BTreeSet<u32> {
        &self.areas
    }

    pub fn weekdays(&self) -> &BTreeSet<WeekdayCode> {
        &self.weekdays
    }

    /// Encode as the URL-encoded body `SearchByDateTime` expects.
    ///
    /// Field order is fixed. Areas and weekdays are sent as repeated keys,
    /// never as an array syntax.
    pub fn encode(&self, token: &str) -> String {
        let date_from = self.date_from.format("%Y-%m-%d").to_string();
        let date_to = self.date_to.format("%Y-%m-%d").to_string();
        let scalars: [(&str, String); 11] = [
            (
                "HomeModel.SearchByDateTimeModel.SelectedPurposeCategory",
                self.purpose_category.to_string(),
            ),
            (
                "HomeModel.SearchByDateTimeModel.SelectedPurpose",
                self.purpose.to_string(),
            ),
            ("HomeModel.DateFrom", date_from),
            ("HomeModel.DateTo", date_to),
            ("HomeModel.TimeFrom", self.time_from.to_string()),
            ("HomeModel.TimeTo", self.time_to.to_string()),
            ("HomeModel.SelectedSearchTarget", SEARCH_TARGET.to_string()),
            (
                "HomeModel.SelectedPlaceClassCategory",
                self.place_class_category.to_string(),
            ),
            (
                "HomeModel.SelectedPurposeCategory",
                self.purpose_category.to_string(),
            ),
            ("SelectedLanguageCode", LANGUAGE_CODE.to_string()),
            (TOKEN_FIELD, token.to_string()),
        ];

        let repeated = self
            .areas
            .iter()
            .map(|area| (AREA_FIELD, area.to_string()))
            .chain(
                self.weekdays
                    .iter()
                    .map(|day| (WEEKDAY_FIELD, day.get().to_string())),
            );

        scalars
            .into_iter()
            .chain(repeated)
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(&value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone)]
pub struct SearchCriteriaBuilder {
    date_from: NaiveDate,
    date_to: NaiveDate,
    time_from: HhMm,
    time_to: HhMm,
    areas: BTreeSet<u32>,
    weekdays: BTreeSet<WeekdayCode>,
    purpose_category: u32,
    purpose: u32,
    place_class_category: u32,
}

impl SearchCriteriaBuilder {
    pub fn time_range(mut self, from: HhMm, to: HhMm) -> Self {
        self.time_from = from;
        self.time_to = to;
        self
    }

    pub fn areas(mut self, areas: impl IntoIterator<Item = u32>) -> Self {
        self.areas = areas.into_iter().collect();
        self
    }

    pub fn weekdays(mut self, weekdays: impl IntoIterator<Item = WeekdayCode>) -> Self {
        self.weekdays = weekdays.into_iter().collect();
        self
    }

    pub fn purpose_category(mut self, category: u32) -> Self {
        self.purpose_category = category;
        self
    }

    pub fn purpose(mut self, purpose: u32) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn place_class_category(mut self, category: u32) -> Self {
        self.place_class_category = category;
        self
    }

    pub fn build(self) -> Result<SearchCriteria, CriteriaError> {
        if self.date_from > self.date_to {
            return Err(CriteriaError::InvertedDates {
                from: self.date_from,
                to: self.date_to,
            });
        }
        if self.time_from >= self.time_to {
            return Err(CriteriaError::InvertedTimes {
                from: self.time_from,
                to: self.time_to,
            });
        }
        if self.areas.is_empty() {
            return Err(CriteriaError::Empty("area"));
        }
        if self.weekdays.is_empty() {
            return Err(CriteriaError::Empty("weekday"));
        }

        Ok(SearchCriteria {
            date_from: self.date_from,
            date_to: self.date_to,
            time_from: self.time_from,
            time_to: self.time_to,
            areas: self.areas,
            weekdays: self.weekdays,
            purpose_category: self.purpose_category,
            purpose: self.purpose,
            place_class_category: self.place_class_category,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn weekdays(codes: &[u8]) -> Vec<WeekdayCode> {
        codes.iter().map(|&c| WeekdayCode::new(c).unwrap()).collect()
    }

    fn pairs(encoded: &str) -> Vec<(String, String)> {
        url::form_urlencoded::parse(encoded.as_bytes())
            .into_owned()
            .collect()
    }

    fn june() -> SearchCriteria {
        SearchCriteria::builder(date("2024-06-01"), date("2024-06-30"))
            .areas([5, 14, 15])
            .weekdays(weekdays(&[1, 2, 3, 4, 5, 6, 7, 8]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_hhmm_parse_and_display() {
        let t: HhMm = "0900".parse().unwrap();
        assert_eq!(t.to_string(), "0900");
        assert_eq!("2400".parse::<HhMm>().unwrap().to_string(), "2400");
    }

    #[test]
    fn test_hhmm_rejects_garbage() {
        for bad in ["900", "09:00", "2460", "2500", "2401", "abcd", ""] {
            assert!(bad.parse::<HhMm>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_weekday_code_bounds() {
        assert!(WeekdayCode::new(0).is_err());
        assert!(WeekdayCode::new(9).is_err());
        assert!(WeekdayCode::new(8).unwrap().is_holiday());
        assert_eq!(WeekdayCode::all().len(), 8);
    }

    #[test]
    fn test_builder_rejects_inverted_dates() {
        let err = SearchCriteria::builder(date("2024-06-30"), date("2024-06-01"))
            .areas([5])
            .build()
            .unwrap_err();
        assert!(matches!(err, CriteriaError::InvertedDates { .. }));
    }

    #[test]
    fn test_builder_rejects_equal_times() {
        let t: HhMm = "1900".parse().unwrap();
        let err = SearchCriteria::builder(date("2024-06-01"), date("2024-06-01"))
            .areas([5])
            .time_range(t, t)
            .build()
            .unwrap_err();
        assert!(matches!(err, CriteriaError::InvertedTimes { .. }));
    }

    #[test]
    fn test_builder_requires_areas() {
        let err = SearchCriteria::builder(date("2024-06-01"), date("2024-06-02"))
            .build()
            .unwrap_err();
        assert_eq!(err, CriteriaError::Empty("area"));
    }

    #[test]
    fn test_single_day_range_is_valid() {
        let c = SearchCriteria::builder(date("2024-06-01"), date("2024-06-01"))
            .areas([5])
            .build();
        assert!(c.is_ok());
    }

    #[test]
    fn test_repeated_fields_counts() {
        let encoded = june().encode("tok");
        let pairs = pairs(&encoded);

        let areas: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == AREA_FIELD)
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(areas, ["5", "14", "15"]);

        let days: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == WEEKDAY_FIELD)
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(days, ["1", "2", "3", "4", "5", "6", "7", "8"]);
    }

    #[test]
    fn test_no_duplicate_scalar_fields() {
        let encoded = june().encode("tok");
        let mut seen = std::collections::HashSet::new();
        for (key, _) in pairs(&encoded) {
            if key == AREA_FIELD || key == WEEKDAY_FIELD {
                continue;
            }
            assert!(seen.insert(key.clone()), "duplicate scalar field {key}");
        }
        assert_eq!(seen.len(), 11);
    }

    #[test]
    fn test_field_order_is_fixed() {
        let encoded = june().encode("tok");
        let keys: Vec<String> = pairs(&encoded).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            &keys[..11],
            [
                "HomeModel.SearchByDateTimeModel.SelectedPurposeCategory",
                "HomeModel.SearchByDateTimeModel.SelectedPurpose",
                "HomeModel.DateFrom",
                "HomeModel.DateTo",
                "HomeModel.TimeFrom",
                "HomeModel.TimeTo",
                "HomeModel.SelectedSearchTarget",
                "HomeModel.SelectedPlaceClassCategory",
                "HomeModel.SelectedPurposeCategory",
                "SelectedLanguageCode",
                "__RequestVerificationToken",
            ]
        );
        // Repeated areas precede repeated weekdays.
        assert_eq!(keys[11], AREA_FIELD);
        assert_eq!(keys.last().unwrap(), WEEKDAY_FIELD);
    }

    #[test]
    fn test_scalar_values() {
        let encoded = june().encode("tok");
        assert!(encoded.starts_with(
            "HomeModel.SearchByDateTimeModel.SelectedPurposeCategory=1&\
             HomeModel.SearchByDateTimeModel.SelectedPurpose=1&\
             HomeModel.DateFrom=2024-06-01&HomeModel.DateTo=2024-06-30&\
             HomeModel.TimeFrom=0900&HomeModel.TimeTo=2100"
        ));
        assert!(encoded.contains("&__RequestVerificationToken=tok&"));
    }

    #[test]
    fn test_token_is_percent_encoded() {
        let encoded = june().encode("a+b/c=");
        assert!(encoded.contains("__RequestVerificationToken=a%2Bb%2Fc%3D"));
    }

    #[test]
    fn test_duplicate_areas_collapse() {
        let c = SearchCriteria::builder(date("2024-06-01"), date("2024-06-02"))
            .areas([15, 5, 15])
            .build()
            .unwrap();
        let areas: Vec<u32> = c.areas().iter().copied().collect();
        assert_eq!(areas, [5, 15]);
    }
}
