//! Shared helpers for fare-crawler integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fare_crawler::{
    ApiClient, ApiParser, Config, FarePipeline, FareStore, Orchestrator, TaskDefinition,
    TaskStore,
};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Endpoint the mock search API listens on
pub const SEARCH_PATH: &str = "/api/flight/search";

/// A crawler wired against a mock API and temporary storage
pub struct TestCrawler {
    pub orchestrator: Orchestrator,
    pub fares: FareStore,
    pub config: Config,
    _dir: TempDir,
}

/// Configuration pointing at `base_url` with fast retries and temp storage
pub fn test_config(base_url: &str, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.search_endpoint = SEARCH_PATH.to_string();
    config.api.timeout = Duration::from_millis(500);
    config.task.max_concurrent_tasks = 2;
    config.task.poll_interval = Duration::from_millis(5);
    config.retry.interval = Duration::from_millis(20);
    config.retry.max_attempts = 2;
    config.storage.blob_dir = dir.path().join("blobs");
    config.storage.database_path = dir.path().join("fares.db");
    config
}

/// Build the production pipeline around `config`
pub async fn crawler_with(config: Config, dir: TempDir) -> TestCrawler {
    let store = TaskStore::new();
    let fares = FareStore::open(&config.storage)
        .await
        .expect("fare store should open");
    let pipeline = FarePipeline::new(
        store.clone(),
        Arc::new(ApiClient::new(&config.api).expect("api client should build")),
        Arc::new(ApiParser),
        Arc::new(fares.clone()),
    );
    let orchestrator = Orchestrator::new(&config, store, Arc::new(pipeline));

    TestCrawler {
        orchestrator,
        fares,
        config,
        _dir: dir,
    }
}

/// Crawler against `base_url` with the default test configuration
pub async fn crawler(base_url: &str) -> TestCrawler {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = test_config(base_url, &dir);
    crawler_with(config, dir).await
}

/// A round-trip search task
pub fn route(from: &str, to: &str) -> TaskDefinition {
    TaskDefinition {
        name: Some(format!("{from} to {to}")),
        api_params: json!({
            "Rtow": "1",
            "DepCity1": from,
            "ArrCity1": to,
            "SeekDestinations": []
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    }
}

/// A search response with two fares: one direct round trip and one with
/// a connection on the way out
pub fn search_response() -> Value {
    json!({
        "FlightInfos": [
            {
                "FareInfos": [{
                    "TotalPrice": 12500,
                    "TotalPriceWithoutTax": 9800,
                    "SegmentDetailInfos": [
                        { "SeqNo": 1, "SegSeqNo": 1, "CabinName": "Economy", "BookingClass": "V" },
                        { "SeqNo": 2, "SegSeqNo": 1, "CabinName": "Economy", "BookingClass": "Q" }
                    ]
                }],
                "ItineraryInfos": [
                    {
                        "SeqNo": 1,
                        "DepDateTime": "2025-03-05T08:30:00",
                        "SegmentInfos": [
                            { "SegSeqNo": 1, "MarketingAirline": "CI", "FlightNo": "7" }
                        ]
                    },
                    {
                        "SeqNo": 2,
                        "DepDateTime": "2025-03-09T19:10:00",
                        "SegmentInfos": [
                            { "SegSeqNo": 1, "MarketingAirline": "CI", "FlightNo": "8" }
                        ]
                    }
                ]
            },
            {
                "FareInfos": [{ "TotalPrice": 9000, "TotalPriceWithoutTax": 7000 }],
                "ItineraryInfos": [
                    {
                        "SeqNo": 1,
                        "DepDateTime": "2025-03-05T06:00:00",
                        "SegmentInfos": [
                            { "SegSeqNo": 1, "MarketingAirline": "BR", "FlightNo": "12" },
                            { "SegSeqNo": 2, "MarketingAirline": "BR", "FlightNo": "891" }
                        ]
                    }
                ]
            }
        ]
    })
}
