//! Fixed day-range planner
//!
//! Each template names a month offset and two days of that month; the
//! planner emits one round trip departing on `DepDate1` and returning on
//! `DepDate2`. Days past the end of the month are clamped to its last day.

use chrono::NaiveDate;

use super::{days_in_month, int_param, month_offset, round_trip, target_month};
use crate::types::{TaskDefinition, TaskParameters};

const PLANNING_KEYS: &[&str] = &["Month", "DepDate1", "DepDate2", "DepCountry1", "ArrCountry1"];

/// Expand fixed-month templates relative to `today`
///
/// Templates with no parameters are skipped.
pub fn plan_fixed_month(templates: &[TaskDefinition], today: NaiveDate) -> Vec<TaskDefinition> {
    let tasks: Vec<TaskDefinition> = templates
        .iter()
        .filter_map(|template| plan_one(&template.api_params, today))
        .collect();

    tracing::info!(
        templates = templates.len(),
        tasks = tasks.len(),
        "Fixed-month tasks planned"
    );
    tasks
}

fn plan_one(template: &TaskParameters, today: NaiveDate) -> Option<TaskDefinition> {
    if template.is_empty() {
        tracing::warn!("Skipping fixed-month template without parameters");
        return None;
    }

    let (year, month) = target_month(today, month_offset(template));
    let last_day = days_in_month(year, month);
    let day = |key: &str| {
        let requested = int_param(template, key).unwrap_or(1).max(1);
        u32::try_from(requested).unwrap_or(u32::MAX).min(last_day)
    };

    let depart = NaiveDate::from_ymd_opt(year, month, day("DepDate1"))?;
    let back = NaiveDate::from_ymd_opt(year, month, day("DepDate2"))?;

    Some(round_trip(template, depart, back, PLANNING_KEYS, None))
}
