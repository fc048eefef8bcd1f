//! Task-list generators
//!
//! Planners turn route templates from the configuration into concrete
//! [`TaskDefinition`]s with dated round-trip legs. They run before a batch
//! is submitted and have no concurrency of their own.
//!
//! A template is a set of search parameters plus a few planning-only keys:
//! `Month` (offset from the current month), `DepCity1`/`ArrCity1` and
//! `DepCountry1`/`ArrCountry1` (the route), and for fixed-month templates
//! `DepDate1`/`DepDate2` (days of the target month).

use chrono::{Datelike, NaiveDate};
use serde_json::{Value, json};

use crate::config::{PlannerConfig, RetryConfig};
use crate::types::{TaskDefinition, TaskParameters};

mod fixed_month;
mod holidays;

pub use fixed_month::plan_fixed_month;
pub use holidays::{
    CalendarDay, Holiday, HolidayCalendar, HttpHolidayCalendar, crawl_window, holidays_in_month,
    is_skipped_holiday, plan_holidays,
};

/// Every task the configuration asks for: predefined tasks first, then
/// fixed-month and holiday-window tasks
pub async fn plan_all(
    config: &PlannerConfig,
    today: NaiveDate,
    calendar: &dyn HolidayCalendar,
) -> Vec<TaskDefinition> {
    let mut tasks = config.flight_tasks.clone();
    tasks.extend(plan_fixed_month(&config.fixed_month, today));
    tasks.extend(plan_holidays(&config.holidays, today, calendar).await);

    tracing::info!(
        predefined = config.flight_tasks.len(),
        total = tasks.len(),
        "Planned acquisition tasks"
    );
    tasks
}

/// Build the calendar client used by [`plan_all`] in production
pub fn default_calendar(
    config: &PlannerConfig,
    retry: &RetryConfig,
) -> crate::Result<HttpHolidayCalendar> {
    HttpHolidayCalendar::new(&config.holiday_calendar_url, retry.clone())
}

/// `(year, month)` that lies `offset` months after `today`'s month
pub fn target_month(today: NaiveDate, offset: u32) -> (i32, u32) {
    let zero_based = today.month0() + offset;
    let year = today.year() + i32::try_from(zero_based / 12).unwrap_or(i32::MAX);
    (year, zero_based % 12 + 1)
}

/// Number of days in `month` of `year`
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// Integer template value, accepting numbers and numeric strings
pub(crate) fn int_param(params: &TaskParameters, key: &str) -> Option<i64> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Month offset of a template (`Month`, default 0)
pub(crate) fn month_offset(params: &TaskParameters) -> u32 {
    int_param(params, "Month")
        .and_then(|m| u32::try_from(m).ok())
        .unwrap_or(0)
}

fn str_param<'a>(params: &'a TaskParameters, key: &str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Fill in out-and-back `SeekDestinations` and drop planning-only keys
pub(crate) fn round_trip(
    template: &TaskParameters,
    depart: NaiveDate,
    back: NaiveDate,
    planning_keys: &[&str],
    label: Option<&str>,
) -> TaskDefinition {
    let depart_str = depart.format("%Y-%m-%d").to_string();
    let back_str = back.format("%Y-%m-%d").to_string();

    let dep_city = str_param(template, "DepCity1");
    let arr_city = str_param(template, "ArrCity1");
    let dep_country = template.get("DepCountry1").cloned().unwrap_or(Value::Null);
    let arr_country = template.get("ArrCountry1").cloned().unwrap_or(Value::Null);

    let mut params = template.clone();
    params.insert(
        "SeekDestinations".into(),
        json!([
            {
                "DepartDate": depart_str,
                "DepartCity": dep_city,
                "DepartAirport": "",
                "DepartCountry": dep_country,
                "ArriveCity": arr_city,
                "ArriveAirport": "",
                "ArriveCountry": arr_country,
            },
            {
                "DepartDate": back_str,
                "DepartCity": arr_city,
                "DepartAirport": "",
                "DepartCountry": arr_country,
                "ArriveCity": dep_city,
                "ArriveAirport": "",
                "ArriveCountry": dep_country,
            }
        ]),
    );
    for key in planning_keys {
        params.remove(*key);
    }

    let route = match label {
        Some(label) => format!("{dep_city} to {arr_city} {label}"),
        None => format!("{dep_city} to {arr_city}"),
    };
    let name = format!("{route}: depart {depart_str}, return {back_str}");

    TaskDefinition {
        name: Some(name),
        api_params: params,
    }
}
