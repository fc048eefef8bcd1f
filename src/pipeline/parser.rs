//! Parser for search API responses
//!
//! A response carries a `FlightInfos` array. Each entry becomes at most one
//! [`FareRecord`], built from its first fare option and its itineraries:
//!
//! - `price` is `TotalPriceWithoutTax`, `tax` is `TotalPrice` minus that
//! - the first itinerary's `DepDateTime` is the departure date, the second's
//!   the return date
//! - segments of the journey with `SeqNo == 1` are outbound, all others inbound
//! - cabin details come from the fare's `SegmentDetailInfos`, matched on
//!   `(SeqNo, SegSeqNo)`

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::Parser;
use crate::error::{Error, Result};
use crate::types::{FareRecord, FlightSegment};

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parser for the travel-agency search response format
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiParser;

impl ApiParser {
    /// Create a parser
    pub fn new() -> Self {
        Self
    }
}

impl Parser for ApiParser {
    fn parse(&self, document: &Value) -> Result<Vec<FareRecord>> {
        let entries = match document.get("FlightInfos") {
            None | Some(Value::Null) => {
                tracing::warn!("Search response has no FlightInfos");
                return Ok(Vec::new());
            }
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(Error::Parse(format!(
                    "FlightInfos is not an array: {other}"
                )));
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match extract_fare(entry) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    tracing::debug!(index, "Skipping entry without fare or itinerary info")
                }
                Err(e) => tracing::warn!(index, error = %e, "Skipping malformed flight entry"),
            }
        }

        tracing::info!(
            parsed = records.len(),
            total = entries.len(),
            "Parsed search response"
        );
        Ok(records)
    }
}

fn extract_fare(entry: &Value) -> Result<Option<FareRecord>> {
    let Some(fare) = non_empty_array(entry, "FareInfos").and_then(|fares| fares.first()) else {
        return Ok(None);
    };
    let Some(itineraries) = non_empty_array(entry, "ItineraryInfos") else {
        return Ok(None);
    };

    let price = fare
        .get("TotalPriceWithoutTax")
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::Parse("fare has no TotalPriceWithoutTax".into()))?;
    let tax = fare
        .get("TotalPrice")
        .and_then(Value::as_f64)
        .map_or(0.0, |total| total - price);

    let mut record = FareRecord {
        departure_date: departure_date(&itineraries[0])?,
        return_date: match itineraries.get(1) {
            Some(itinerary) => departure_date(itinerary)?,
            None => None,
        },
        price,
        tax,
        ..FareRecord::default()
    };

    let details: HashMap<(Option<i64>, Option<i64>), &Value> = fare
        .get("SegmentDetailInfos")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|detail| ((int_field(detail, "SeqNo"), int_field(detail, "SegSeqNo")), detail))
        .collect();

    for itinerary in itineraries {
        let journey = int_field(itinerary, "SeqNo");
        let segments = itinerary
            .get("SegmentInfos")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();

        for segment in segments {
            let detail = details.get(&(journey, int_field(segment, "SegSeqNo")));
            let cabin_class = format!(
                "{}{}",
                detail.map_or("", |d| str_field(d, "CabinName")),
                detail.map_or("", |d| str_field(d, "BookingClass")),
            );
            let flight = FlightSegment {
                flight_number: flight_number(
                    str_field(segment, "MarketingAirline"),
                    str_field(segment, "FlightNo"),
                ),
                cabin_class,
            };

            if journey == Some(1) {
                record.outbound_segments.push(flight);
            } else {
                record.inbound_segments.push(flight);
            }
        }
    }

    Ok(Some(record))
}

/// Airline code plus flight number; purely numeric numbers are padded to 3 digits
fn flight_number(airline: &str, number: &str) -> String {
    if !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()) {
        format!("{airline}{number:0>3}")
    } else {
        format!("{airline}{number}")
    }
}

fn departure_date(itinerary: &Value) -> Result<Option<NaiveDate>> {
    match itinerary.get("DepDateTime").and_then(Value::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDateTime::parse_from_str(raw, DATE_TIME_FORMAT)
            .map(|dt| Some(dt.date()))
            .map_err(|e| Error::Parse(format!("invalid DepDateTime '{raw}': {e}"))),
    }
}

fn non_empty_array<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    value
        .get(key)
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}
