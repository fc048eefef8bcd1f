//! Holiday-window planner
//!
//! For every public holiday in a template's target month, emit one round
//! trip whose dates bracket the holiday. The window depends on the weekday
//! the holiday falls on, so that the trip covers the adjoining weekend.
//!
//! Holidays come from a yearly calendar document, a JSON array of
//! `{date: "YYYYMMDD", week, isHoliday, description}` objects, served at
//! `{base_url}/{year}.json`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;

use super::{month_offset, round_trip, target_month};
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{TaskDefinition, TaskParameters};

const PLANNING_KEYS: &[&str] = &["Month", "DepCountry1", "ArrCountry1"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Marks a compensatory day off in calendar descriptions
const COMPENSATORY_MARKER: &str = "補";

/// Lunar New Year entries are never planned
const LUNAR_NEW_YEAR: &[&str] = &["春節", "農曆除夕"];

const NEW_YEARS_DAY: &str = "開國紀念日";

/// The day before Lunar New Year's Eve
const NEW_YEARS_EVE_EVE: &str = "小年夜";

const CALENDAR_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry of the yearly calendar document
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CalendarDay {
    /// `YYYYMMDD`
    pub date: String,
    /// Weekday as written by the calendar source
    #[serde(default)]
    pub week: String,
    /// Whether the day is a day off
    #[serde(rename = "isHoliday", default)]
    pub is_holiday: bool,
    /// Holiday name; empty for ordinary weekends
    #[serde(default)]
    pub description: String,
}

/// A holiday selected for planning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Holiday {
    /// The holiday itself
    pub date: NaiveDate,
    /// Holiday name
    pub description: String,
}

/// Source of yearly holiday calendars
#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    /// All calendar entries for `year`
    async fn year(&self, year: i32) -> Result<Vec<CalendarDay>>;
}

/// Fetches calendars over HTTP, retrying transient failures
#[derive(Clone, Debug)]
pub struct HttpHolidayCalendar {
    http_client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpHolidayCalendar {
    /// Calendar served under `base_url`
    pub fn new(base_url: &str, retry: RetryConfig) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(Error::config(
                "planner.holiday_calendar_url",
                "holiday calendar URL must not be empty",
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(CALENDAR_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            retry,
        })
    }

    async fn fetch(&self, year: i32) -> Result<Vec<CalendarDay>> {
        let url = format!("{}/{year}.json", self.base_url);
        tracing::debug!(url = %url, "Fetching holiday calendar");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let bytes = response.bytes().await?;
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);
        Ok(serde_json::from_slice(body)?)
    }
}

#[async_trait]
impl HolidayCalendar for HttpHolidayCalendar {
    async fn year(&self, year: i32) -> Result<Vec<CalendarDay>> {
        with_retry(&self.retry, || self.fetch(year)).await
    }
}

/// Named holidays of `year`-`month`, excluding compensatory days off
pub fn holidays_in_month(days: &[CalendarDay], year: i32, month: u32) -> Vec<Holiday> {
    let prefix = format!("{year}{month:02}");

    days.iter()
        .filter(|day| {
            day.is_holiday
                && !day.description.is_empty()
                && day.date.starts_with(&prefix)
                && !day.description.contains(COMPENSATORY_MARKER)
        })
        .filter_map(|day| {
            let date = NaiveDate::parse_from_str(&day.date, "%Y%m%d").ok()?;
            Some(Holiday {
                date,
                description: day.description.clone(),
            })
        })
        .collect()
}

/// Whether a holiday is excluded from planning
///
/// Lunar New Year is always excluded. Templates two months out skip
/// days 5 to 10, and templates six months out skip days 24 to 28.
pub fn is_skipped_holiday(holiday: &Holiday, month_offset: u32) -> bool {
    if LUNAR_NEW_YEAR
        .iter()
        .any(|keyword| holiday.description.contains(keyword))
    {
        return true;
    }

    let day = holiday.date.day();
    match month_offset {
        2 => (5..=10).contains(&day),
        6 => (24..=28).contains(&day),
        _ => false,
    }
}

/// Departure and return dates around a holiday
pub fn crawl_window(holiday: &Holiday) -> (NaiveDate, NaiveDate) {
    use Weekday::*;

    let weekday = holiday.date.weekday();
    let (before, after) = if holiday.description.contains(NEW_YEARS_DAY) && weekday == Wed {
        (4, 0)
    } else if holiday.description.contains(NEW_YEARS_EVE_EVE) {
        match weekday {
            Mon | Thu | Fri => (2, 4),
            Tue | Wed => (4, 2),
            Sat | Sun => (2, 3),
        }
    } else {
        match weekday {
            Mon | Tue | Sun => (4, 0),
            Wed => (0, 3),
            Thu => (1, 3),
            Fri => (2, 2),
            Sat => (3, 1),
        }
    };

    (shift(holiday.date, -before), shift(holiday.date, after))
}

fn shift(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(chrono::Duration::days(days))
        .unwrap_or(date)
}

/// Expand holiday templates relative to `today`
///
/// Each calendar year is fetched at most once. A template whose calendar
/// cannot be fetched produces no tasks.
pub async fn plan_holidays(
    templates: &[TaskDefinition],
    today: NaiveDate,
    calendar: &dyn HolidayCalendar,
) -> Vec<TaskDefinition> {
    let mut calendars: HashMap<i32, Option<Vec<CalendarDay>>> = HashMap::new();
    let mut tasks = Vec::new();

    for template in templates {
        let params = &template.api_params;
        if params.is_empty() {
            tracing::warn!("Skipping holiday template without parameters");
            continue;
        }

        let offset = month_offset(params);
        let (year, month) = target_month(today, offset);

        if let Entry::Vacant(slot) = calendars.entry(year) {
            let fetched = match calendar.year(year).await {
                Ok(days) => Some(days),
                Err(e) => {
                    tracing::error!(year, month, error = %e, "Failed to fetch holiday calendar");
                    None
                }
            };
            slot.insert(fetched);
        }
        let Some(Some(days)) = calendars.get(&year) else {
            continue;
        };

        tasks.extend(plan_template(params, days, year, month, offset));
    }

    tracing::info!(
        templates = templates.len(),
        tasks = tasks.len(),
        "Holiday tasks planned"
    );
    tasks
}

fn plan_template(
    params: &TaskParameters,
    days: &[CalendarDay],
    year: i32,
    month: u32,
    offset: u32,
) -> Vec<TaskDefinition> {
    holidays_in_month(days, year, month)
        .into_iter()
        .filter(|holiday| {
            let skipped = is_skipped_holiday(holiday, offset);
            if skipped {
                tracing::debug!(
                    date = %holiday.date,
                    holiday = %holiday.description,
                    "Holiday skipped"
                );
            }
            !skipped
        })
        .map(|holiday| {
            let (depart, back) = crawl_window(&holiday);
            round_trip(params, depart, back, PLANNING_KEYS, Some(&holiday.description))
        })
        .collect()
}
