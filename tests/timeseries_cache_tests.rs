// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests for the time-series cache: cold/warm reads, incremental
//! window extension, graceful degradation, window snapping, and the
//! progressive result channel.

mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use helpers::{test_engine, timeseries_request, ScriptedFetcher};
use semiocache::errors::FetchError;
use semiocache::{
    channel_name, revision_key, CacheRequest, ChannelMessage, HostLifetime, InterceptedRequest,
    TimeseriesCacheRequest,
};
use serde_json::{json, Value};
use url::Url;

fn revisions_of(payload: &Value) -> Vec<u64> {
    payload["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["revision"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_cold_fetch_then_warm_read_uses_cache_only() {
    let fetcher = ScriptedFetcher::boundary_rows();
    let engine = test_engine(fetcher.clone());
    let host = HostLifetime::new();

    let cold = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(10, 20)).unwrap();
    let payload = cold.respond(&host).await.unwrap();
    assert_eq!(payload["units"], json!("ms"));
    assert_eq!(revisions_of(&payload), vec![10, 20]);
    assert_eq!(fetcher.call_count(), 1);

    host.settled().await;

    let warm = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(10, 20)).unwrap();
    let payload = warm.respond(&host).await.unwrap();
    assert_eq!(revisions_of(&payload), vec![10, 20]);
    assert_eq!(fetcher.call_count(), 1, "warm read must not refetch");
}

#[tokio::test]
async fn test_extending_window_fetches_only_the_missing_slice() {
    let fetcher = ScriptedFetcher::boundary_rows();
    let engine = test_engine(fetcher.clone());
    let host = HostLifetime::new();

    let first = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(0, 50)).unwrap();
    first.respond(&host).await.unwrap();
    assert_eq!(fetcher.call_count(), 1);
    host.settled().await;

    // Overlapping extension: only [50, 100] is missing, and the fetch
    // shares revision 50 with the cached coverage as its anchor point.
    let second =
        TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(40, 100)).unwrap();
    let payload = second.respond(&host).await.unwrap();
    assert!(revisions_of(&payload).contains(&100));
    assert_eq!(fetcher.call_count(), 2);

    let calls = fetcher.recorded();
    assert_eq!(calls[1].param("min_revision"), Some("50"));
    assert_eq!(calls[1].param("max_revision"), Some("100"));
    host.settled().await;

    // Coverage is now the union [0, 100]: a spanning request needs no fetch
    let third = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(0, 100)).unwrap();
    let payload = third.respond(&host).await.unwrap();
    assert_eq!(revisions_of(&payload), vec![0, 50, 100]);
    assert_eq!(fetcher.call_count(), 2);
}

#[tokio::test]
async fn test_outage_degrades_to_cache_but_cold_outage_fails() {
    let outage = Arc::new(AtomicBool::new(false));
    let fetcher = {
        let outage = Arc::clone(&outage);
        ScriptedFetcher::new(move |request| {
            if outage.load(Ordering::SeqCst) {
                return Err(FetchError::http(503, request.url.as_str()));
            }
            let min: u64 = request.param("min_revision").unwrap().parse().unwrap();
            let max: u64 = request.param("max_revision").unwrap().parse().unwrap();
            Ok(json!({
                "units": "ms",
                "improvement_direction": 1,
                "data": [
                    {"revision": min, "value": 1.0},
                    {"revision": max, "value": 2.0},
                ],
            }))
        })
    };
    let engine = test_engine(fetcher.clone());
    let host = HostLifetime::new();

    let seed = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(10, 20)).unwrap();
    seed.respond(&host).await.unwrap();
    host.settled().await;

    outage.store(true, Ordering::SeqCst);

    // Warm series: the failed slice is skipped, cached rows still answer
    let warm = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(10, 30)).unwrap();
    let payload = warm.respond(&host).await.unwrap();
    assert_eq!(revisions_of(&payload), vec![10, 20]);

    // Cold series with no cache at all: the outage is fatal
    let cold_request = InterceptedRequest::new(
        "POST",
        Url::parse("https://example.org/api/timeseries2").unwrap(),
    )
    .with_param("test_suite", "rendering")
    .with_param("bot", "linux-perf")
    .with_param("measurement", "memory_peak")
    .with_param("columns", "revision,value")
    .with_param("min_revision", "0")
    .with_param("max_revision", "10");
    let cold = TimeseriesCacheRequest::parse(engine.clone(), cold_request).unwrap();
    assert!(cold.respond(&host).await.is_err());
}

#[tokio::test]
async fn test_failed_slice_keeps_other_slices() {
    let fetcher = ScriptedFetcher::new(|request| {
        if request.param("min_revision") == Some("60") {
            return Err(FetchError::http(500, request.url.as_str()));
        }
        let min: u64 = request.param("min_revision").unwrap().parse().unwrap();
        let max: u64 = request.param("max_revision").unwrap().parse().unwrap();
        Ok(json!({
            "units": "ms",
            "improvement_direction": 1,
            "data": [
                {"revision": min, "value": 1.0},
                {"revision": max, "value": 2.0},
            ],
        }))
    });
    let engine = test_engine(fetcher.clone());
    let host = HostLifetime::new();

    let seed = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(40, 60)).unwrap();
    seed.respond(&host).await.unwrap();
    host.settled().await;

    // [0, 100] decomposes into [0, 40] (succeeds) and [60, 100] (fails);
    // the failure must not discard the successful slice or the cache.
    let spanning =
        TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(0, 100)).unwrap();
    let payload = spanning.respond(&host).await.unwrap();
    assert_eq!(revisions_of(&payload), vec![0, 40, 60]);
    assert_eq!(fetcher.call_count(), 3);
    host.settled().await;
}

#[tokio::test]
async fn test_window_snaps_to_cached_rows() {
    let fetcher = ScriptedFetcher::failing();
    let engine = test_engine(fetcher.clone());
    let host = HostLifetime::new();

    // Seed the store directly: rows at revisions 1, 2, 4, 6 with full
    // coverage of [1, 6] for the value column.
    let database = engine
        .open_database(
            "timeseries/rendering/linux-perf/frame_time/test",
            1,
            |upgrade| {
                upgrade.create_object_store("rows");
                upgrade.create_object_store("metadata");
                upgrade.create_object_store("ranges");
            },
        )
        .await
        .unwrap();
    for revision in [1u64, 2, 4, 6] {
        database
            .put(
                "rows",
                &revision_key(revision),
                json!({"revision": revision, "value": revision as f64}),
            )
            .await
            .unwrap();
    }
    database
        .put("ranges", "value", json!([{"min": 1, "max": 6}]))
        .await
        .unwrap();

    // Window [3, 5] snaps to the reference row 2 and the last in-window
    // row 4; full coverage means no fetch despite the failing fetcher.
    let request = TimeseriesCacheRequest::parse(engine.clone(), timeseries_request(3, 5)).unwrap();
    let payload = request.respond(&host).await.unwrap();
    assert_eq!(revisions_of(&payload), vec![2, 4]);
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_channel_streams_result_then_done() {
    let fetcher = ScriptedFetcher::boundary_rows();
    let engine = test_engine(fetcher.clone());
    let host = HostLifetime::new();

    let request = timeseries_request(0, 10);
    let name = channel_name(&request.url, &request.params);
    let mut subscriber = engine.channels().subscribe(&name);

    let parsed = TimeseriesCacheRequest::parse(engine.clone(), request).unwrap();
    parsed.respond(&host).await.unwrap();

    let first = subscriber.recv().await.unwrap();
    let ChannelMessage::Result(payload) = first else {
        panic!("expected a result message, got {first:?}");
    };
    assert_eq!(revisions_of(&payload), vec![0, 10]);
    assert!(matches!(
        subscriber.recv().await.unwrap(),
        ChannelMessage::Done
    ));
    host.settled().await;
}
