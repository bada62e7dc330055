// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Range-aware time-series caching.
//!
//! A [`TimeseriesCacheRequest`] serves a window `[min_revision,
//! max_revision]` of sparse, column-oriented rows for one logical series.
//! Coverage is tracked per column as a persisted [`SortedRangeSet`], so a
//! request is decomposed against what is already cached: only the missing
//! sub-ranges ("slices") are fetched, slices already reserved by in-flight
//! peers are borrowed instead of refetched, and results are merged
//! progressively in completion order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn, Instrument};

use crate::channel::{channel_name, ChannelMessage};
use crate::engine::CacheEngine;
use crate::errors::{FetchError, RangeError, RequestError, SemiocacheError};
use crate::fetch::FetchRequest;
use crate::range::{Range, Revision, SortedRangeSet};
use crate::request::{
    CacheRequest, HostLifetime, InterceptedRequest, RequestDescriptor, RequestEntry, SharedCell,
};
use crate::spans;
use crate::store::revision_key;

const DATABASE_VERSION: u32 = 1;
const STORE_ROWS: &str = "rows";
const STORE_METADATA: &str = "metadata";
const STORE_RANGES: &str = "ranges";

/// The always-present ordering column.
pub const REVISION_COLUMN: &str = "revision";

/// One sparse row: column name → value, including [`REVISION_COLUMN`].
pub type Row = serde_json::Map<String, Value>;

/// Dimension keys identifying one logical series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesKey {
    pub suite: String,
    pub bot: String,
    pub measurement: String,
    pub test_case: Option<String>,
    pub build_type: String,
}

impl SeriesKey {
    /// Logical database name for this series.
    pub fn database_name(&self) -> String {
        let mut parts: Vec<&str> = vec!["timeseries", &self.suite, &self.bot, &self.measurement];
        if let Some(test_case) = &self.test_case {
            parts.push(test_case);
        }
        parts.push(&self.build_type);
        parts.join("/")
    }
}

/// Decoded body of one slice fetch.
#[derive(Debug)]
pub(crate) struct SlicePayload {
    units: Option<String>,
    improvement_direction: Option<i64>,
    rows: Vec<Row>,
}

/// A slice this request has reserved for fetching, visible to in-flight
/// peers so they can borrow instead of refetching.
#[derive(Clone)]
pub(crate) struct SliceReservation {
    pub range: Range,
    pub columns: BTreeSet<String>,
    pub cell: Arc<SharedCell<SlicePayload>>,
}

/// A missing sub-range and the columns still needed over it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MissingSlice {
    range: Range,
    columns: BTreeSet<String>,
}

/// Fully merged state carried from the read path to the deferred write.
struct PendingWrite {
    rows: Vec<Row>,
    coverage: Vec<(Range, BTreeSet<String>)>,
    units: Option<String>,
    improvement_direction: Option<i64>,
}

/// Completion of one slice, in whatever order the network resolves them.
struct SliceDone {
    payload: Result<Arc<SlicePayload>, RequestError>,
    fetched: Option<(Range, BTreeSet<String>)>,
}

/// Serves a windowed, column-sparse slice of one logical series.
pub struct TimeseriesCacheRequest {
    engine: Arc<CacheEngine>,
    request: InterceptedRequest,
    series: SeriesKey,
    columns: BTreeSet<String>,
    window: Range,
    channel: String,
    entry: Arc<RequestEntry>,
    pending_write: Mutex<Option<PendingWrite>>,
}

impl TimeseriesCacheRequest {
    /// Parse and register a time-series request.
    ///
    /// # Errors
    ///
    /// Fails before any registration, dedup, or fetch work when a required
    /// parameter is absent or the revision window is malformed.
    pub fn parse(
        engine: Arc<CacheEngine>,
        request: InterceptedRequest,
    ) -> Result<Arc<Self>, RequestError> {
        let series = SeriesKey {
            suite: request.require_param("test_suite")?,
            bot: request.require_param("bot")?,
            measurement: request.require_param("measurement")?,
            test_case: request.param("test_case"),
            build_type: request.param("build_type").unwrap_or_else(|| "test".to_string()),
        };

        let mut columns: BTreeSet<String> = request
            .require_param("columns")?
            .split(',')
            .map(|column| column.trim().to_string())
            .filter(|column| !column.is_empty())
            .collect();
        columns.insert(REVISION_COLUMN.to_string());

        let min_revision = parse_revision(&request, "min_revision", 0)?;
        let max_revision = parse_revision(&request, "max_revision", Revision::MAX)?;
        if min_revision > max_revision {
            return Err(RangeError::invalid_range(format!(
                "min_revision {min_revision} exceeds max_revision {max_revision}"
            ))
            .into());
        }
        let window = Range::from_explicit_range(min_revision, max_revision);

        let channel = channel_name(&request.url, &request.params);
        let entry = RequestEntry::new(
            engine.next_id(),
            request.path().to_string(),
            RequestDescriptor::Timeseries {
                series: series.clone(),
                slices: Mutex::new(Vec::new()),
            },
        );
        engine.register(Arc::clone(&entry));

        Ok(Arc::new(Self {
            engine,
            request,
            series,
            columns,
            window,
            channel,
            entry,
            pending_write: Mutex::new(None),
        }))
    }

    /// The logical series this request targets.
    pub fn series(&self) -> &SeriesKey {
        &self.series
    }

    async fn open_database(&self) -> Result<Arc<crate::store::Database>, RequestError> {
        let database = self
            .engine
            .open_database(&self.series.database_name(), DATABASE_VERSION, |upgrade| {
                upgrade.create_object_store(STORE_ROWS);
                upgrade.create_object_store(STORE_METADATA);
                upgrade.create_object_store(STORE_RANGES);
            })
            .await?;
        Ok(database)
    }

    async fn get_response(self: &Arc<Self>, host: &HostLifetime) -> Result<Value, RequestError> {
        let database = self.open_database().await?;

        // Read everything at or below the window so snapping can find the
        // reference row just before the window starts.
        let cached = database
            .get_range(
                STORE_ROWS,
                &revision_key(0),
                &revision_key(self.window.max().unwrap_or(Revision::MAX)),
            )
            .await?;
        let cached_revisions: Vec<Revision> = cached
            .iter()
            .filter_map(|(_, value)| row_revision(value.as_object()?))
            .collect();

        // Cached rows are selected over the snapped span (reference row
        // included); coverage math and fetching stay on the requested
        // window so the cache can still be extended past its last row.
        let window = self.window;
        let snapped = snap_window_to_rows(&cached_revisions, &window);
        let payload_window = Range::from_explicit_range(
            snapped.min().unwrap_or(0),
            window.max().unwrap_or(Revision::MAX),
        );

        let mut rows: BTreeMap<Revision, Row> = BTreeMap::new();
        for (_, value) in cached {
            let Some(row) = value.as_object() else { continue };
            let Some(revision) = row_revision(row) else { continue };
            if snapped.contains_value(revision) {
                rows.insert(revision, row.clone());
            }
        }

        let mut units = read_metadata_string(&database, "units").await?;
        let mut improvement_direction =
            read_metadata_i64(&database, "improvement_direction").await?;

        let coverage = read_coverage(&database).await?;
        let missing = compute_missing_slices(&window, &self.columns, &coverage)?;
        debug!(
            series = %self.series.database_name(),
            cached_rows = rows.len(),
            missing_slices = missing.len(),
            "read cached series state"
        );

        let (owned, borrowed) = self.plan_slices(missing);

        let mut stream: FuturesUnordered<BoxFuture<'static, SliceDone>> = FuturesUnordered::new();
        for reservation in &owned {
            stream.push(self.fetch_slice(reservation.clone()));
        }
        for cell in borrowed {
            stream.push(Box::pin(async move {
                SliceDone {
                    payload: cell.wait().await,
                    fetched: None,
                }
            }));
        }

        let total = stream.len();
        let mut completed = 0usize;
        let mut first_error: Option<RequestError> = None;
        let mut fetched_coverage: Vec<(Range, BTreeSet<String>)> = Vec::new();
        let mut new_rows: Vec<Row> = Vec::new();

        while let Some(done) = stream.next().await {
            completed += 1;
            match done.payload {
                Ok(payload) => {
                    if payload.units.is_some() {
                        units = payload.units.clone();
                    }
                    if payload.improvement_direction.is_some() {
                        improvement_direction = payload.improvement_direction;
                    }
                    for row in &payload.rows {
                        upsert_row(&mut rows, row.clone());
                    }
                    if done.fetched.is_some() {
                        new_rows.extend(payload.rows.iter().cloned());
                    }
                    if let Some(fetched) = done.fetched {
                        fetched_coverage.push(fetched);
                    }
                    if completed < total {
                        self.engine.channels().publish(
                            &self.channel,
                            ChannelMessage::Result(build_payload(
                                &units,
                                improvement_direction,
                                &rows,
                                &payload_window,
                            )),
                        );
                    }
                }
                Err(error) => {
                    warn!(
                        series = %self.series.database_name(),
                        %error,
                        "slice fetch failed, continuing with remaining slices"
                    );
                    first_error.get_or_insert(error);
                }
            }
        }

        if rows.is_empty() {
            if let Some(error) = first_error {
                return Err(error);
            }
        }

        if !fetched_coverage.is_empty() {
            *self.pending_write.lock().expect("pending write poisoned") = Some(PendingWrite {
                rows: new_rows,
                coverage: fetched_coverage,
                units: units.clone(),
                improvement_direction,
            });
            let this = Arc::clone(self);
            self.engine.clone().schedule_write(
                &self.entry,
                host,
                Box::pin(async move {
                    this.write_database()
                        .await
                        .map_err(SemiocacheError::from)
                }),
            );
        }

        Ok(build_payload(
            &units,
            improvement_direction,
            &rows,
            &payload_window,
        ))
    }

    /// Reserve the missing slices, borrowing any already reserved by an
    /// in-flight peer for the same series. Reservation publishing and
    /// borrowing happen atomically under the registry lock so two
    /// concurrent requests can never both fetch the same slice.
    fn plan_slices(
        &self,
        missing: Vec<MissingSlice>,
    ) -> (Vec<SliceReservation>, Vec<Arc<SharedCell<SlicePayload>>>) {
        self.engine.with_peers(&self.entry, |peers| {
            let mut owned = Vec::new();
            let mut borrowed = Vec::new();

            for mut slice in missing {
                'peers: for peer in peers {
                    let RequestDescriptor::Timeseries { series, slices } = &peer.descriptor
                    else {
                        continue;
                    };
                    if *series != self.series {
                        continue;
                    }
                    for reservation in slices.lock().expect("slice reservations poisoned").iter()
                    {
                        if !reservation.range.contains_range_inclusive(&slice.range) {
                            continue;
                        }
                        let covered: BTreeSet<String> = slice
                            .columns
                            .intersection(&reservation.columns)
                            .cloned()
                            .collect();
                        if covered.is_empty() {
                            continue;
                        }
                        for column in &covered {
                            slice.columns.remove(column);
                        }
                        borrowed.push(Arc::clone(&reservation.cell));
                        if slice.columns.is_empty() {
                            break 'peers;
                        }
                    }
                }
                if !slice.columns.is_empty() {
                    owned.push(SliceReservation {
                        range: slice.range,
                        columns: slice.columns,
                        cell: Arc::new(SharedCell::new()),
                    });
                }
            }

            if let RequestDescriptor::Timeseries { slices, .. } = &self.entry.descriptor {
                *slices.lock().expect("slice reservations poisoned") = owned.clone();
            }
            (owned, borrowed)
        })
    }

    fn fetch_slice(&self, reservation: SliceReservation) -> BoxFuture<'static, SliceDone> {
        let fetcher = Arc::clone(self.engine.fetcher());
        let series = self.series.database_name();

        let mut fetch_request = FetchRequest {
            method: self.request.method.clone(),
            url: self.request.url.clone(),
            params: self.request.params.clone(),
        };
        let mut columns = reservation.columns.clone();
        columns.insert(REVISION_COLUMN.to_string());
        fetch_request.set_param(
            "columns",
            columns.iter().cloned().collect::<Vec<_>>().join(","),
        );
        let min = reservation.range.min().unwrap_or(0);
        let max = reservation.range.max().unwrap_or(Revision::MAX);
        fetch_request.set_param("min_revision", min.to_string());
        fetch_request.set_param("max_revision", max.to_string());

        Box::pin(async move {
            let span = spans::fetch_slice(&series, min, max);
            let result = async {
                let body = fetcher.fetch(&fetch_request).await?;
                parse_slice_payload(body).map_err(RequestError::from)
            }
            .instrument(span)
            .await;

            match result {
                Ok(payload) => {
                    let payload = Arc::new(payload);
                    reservation.cell.fulfill(Arc::clone(&payload));
                    SliceDone {
                        payload: Ok(payload),
                        fetched: Some((reservation.range, reservation.columns.clone())),
                    }
                }
                Err(error) => {
                    reservation.cell.fail(RequestError::upstream(&error));
                    SliceDone {
                        payload: Err(error),
                        fetched: None,
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CacheRequest for TimeseriesCacheRequest {
    fn name(&self) -> &'static str {
        "TimeseriesCacheRequest"
    }

    async fn respond(self: Arc<Self>, host: &HostLifetime) -> Result<Value, RequestError> {
        let span = spans::timeseries_respond(&self.series.database_name());
        let result = self.get_response(host).instrument(span).await;

        let channels = self.engine.channels();
        match &result {
            Ok(value) => {
                self.entry.response.fulfill(Arc::new(value.clone()));
                channels.publish(&self.channel, ChannelMessage::Result(value.clone()));
            }
            Err(error) => {
                self.entry.response.fail(RequestError::upstream(error));
                channels.publish(&self.channel, ChannelMessage::Error(error.to_string()));
            }
        }
        channels.publish(&self.channel, ChannelMessage::Done);

        self.engine.note_responded(&self.entry);
        result
    }

    /// Upsert the newly fetched rows and fold the fetched ranges into each
    /// column's persisted coverage. Shallow row merge: fields the new
    /// payload didn't include are preserved from the stored row.
    async fn write_database(self: Arc<Self>) -> Result<(), RequestError> {
        let Some(pending) = self
            .pending_write
            .lock()
            .expect("pending write poisoned")
            .take()
        else {
            return Ok(());
        };

        let span = spans::write_database(&self.series.database_name());
        async {
            let database = self.open_database().await?;

            for row in &pending.rows {
                let Some(revision) = row_revision(row) else {
                    continue;
                };
                let key = revision_key(revision);
                let mut merged = match database.get(STORE_ROWS, &key).await? {
                    Some(Value::Object(existing)) => existing,
                    _ => Row::new(),
                };
                for (column, value) in row {
                    merged.insert(column.clone(), value.clone());
                }
                database.put(STORE_ROWS, &key, Value::Object(merged)).await?;
            }

            for (range, columns) in &pending.coverage {
                for column in columns {
                    if column == REVISION_COLUMN {
                        continue;
                    }
                    let existing: SortedRangeSet = match database.get(STORE_RANGES, column).await?
                    {
                        Some(value) => serde_json::from_value(value)?,
                        None => SortedRangeSet::new(),
                    };
                    let merged = range.merge_into_array(&existing);
                    database
                        .put(STORE_RANGES, column, serde_json::to_value(merged)?)
                        .await?;
                }
            }

            if let Some(units) = &pending.units {
                database
                    .put(STORE_METADATA, "units", json!(units))
                    .await?;
            }
            if let Some(direction) = pending.improvement_direction {
                database
                    .put(STORE_METADATA, "improvement_direction", json!(direction))
                    .await?;
            }
            database
                .put(
                    STORE_METADATA,
                    "last_access",
                    json!(chrono::Utc::now().to_rfc3339()),
                )
                .await?;

            database.commit().await?;
            debug!(
                series = %self.series.database_name(),
                rows = pending.rows.len(),
                "wrote series rows and coverage"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }
}

fn parse_revision(
    request: &InterceptedRequest,
    name: &str,
    default: Revision,
) -> Result<Revision, RequestError> {
    match request.param(name) {
        Some(raw) => raw.parse::<Revision>().map_err(|_| {
            RangeError::invalid_range(format!("parameter {name} is not a revision: {raw}")).into()
        }),
        None => Ok(default),
    }
}

fn row_revision(row: &Row) -> Option<Revision> {
    row.get(REVISION_COLUMN)?.as_u64()
}

/// Snap a requested window onto the cached revision axis: each bound moves
/// down to the nearest cached revision at or below it. The snapped span
/// selects which cached rows belong in the response, so the reference row
/// just before the window is included.
fn snap_window_to_rows(revisions: &[Revision], window: &Range) -> Range {
    let (Some(min), Some(max)) = (window.min(), window.max()) else {
        return *window;
    };

    let mut snapped_min = min;
    let at_or_below_min = revisions.partition_point(|revision| *revision <= min);
    if at_or_below_min > 0 {
        snapped_min = revisions[at_or_below_min - 1];
    }

    let mut snapped_max = max;
    let at_or_below_max = revisions.partition_point(|revision| *revision <= max);
    if at_or_below_max > 0 {
        snapped_max = revisions[at_or_below_max - 1].max(snapped_min);
    }

    Range::from_explicit_range(snapped_min, snapped_max)
}

/// Decompose the target window against per-column persisted coverage.
///
/// A column whose available range spans the whole window needs no fetch.
/// Otherwise the intersection of every present column coverage is
/// subtracted from the window; each remaining sub-range becomes one slice
/// carrying all still-missing columns.
fn compute_missing_slices(
    window: &Range,
    columns: &BTreeSet<String>,
    coverage: &HashMap<String, SortedRangeSet>,
) -> Result<Vec<MissingSlice>, RangeError> {
    let mut missing_columns = BTreeSet::new();
    let mut covered: Option<Range> = None;

    for column in columns {
        if column == REVISION_COLUMN {
            continue;
        }
        let available = coverage
            .get(column)
            .map(|set| column_available_range(set, window))
            .unwrap_or_default();

        if !available.is_empty() && available.duration() == window.duration() {
            continue;
        }
        missing_columns.insert(column.clone());
        if !available.is_empty() {
            covered = Some(match covered {
                Some(current) => current.find_intersection(&available),
                None => available,
            });
        }
    }

    if missing_columns.is_empty() {
        return Ok(Vec::new());
    }

    let slices = match covered {
        Some(covered) if !covered.is_empty() => Range::find_difference(window, &covered)?,
        _ => vec![*window],
    };
    Ok(slices
        .into_iter()
        .map(|range| MissingSlice {
            range,
            columns: missing_columns.clone(),
        })
        .collect())
}

/// The part of one column's coverage that overlaps the window. Coverage
/// sets are disjoint and sorted, so the first overlapping element is the
/// one a contiguous window can be satisfied from.
fn column_available_range(coverage: &[Range], window: &Range) -> Range {
    coverage
        .iter()
        .map(|range| range.find_intersection(window))
        .find(|intersection| !intersection.is_empty())
        .unwrap_or_default()
}

fn parse_slice_payload(body: Value) -> Result<SlicePayload, FetchError> {
    let Some(object) = body.as_object() else {
        return Err(FetchError::malformed_body("response body is not an object"));
    };
    let Some(data) = object.get("data").and_then(Value::as_array) else {
        return Err(FetchError::malformed_body("response body has no data array"));
    };

    let rows = data
        .iter()
        .filter_map(|row| row.as_object().cloned())
        .collect();
    Ok(SlicePayload {
        units: object
            .get("units")
            .and_then(Value::as_str)
            .map(str::to_string),
        improvement_direction: object.get("improvement_direction").and_then(Value::as_i64),
        rows,
    })
}

/// Sorted merge-by-revision: insert or shallow-merge one row, preserving
/// fields the new row didn't include.
fn upsert_row(rows: &mut BTreeMap<Revision, Row>, row: Row) {
    let Some(revision) = row_revision(&row) else {
        return;
    };
    let merged = rows.entry(revision).or_default();
    for (column, value) in row {
        merged.insert(column, value);
    }
}

fn build_payload(
    units: &Option<String>,
    improvement_direction: Option<i64>,
    rows: &BTreeMap<Revision, Row>,
    window: &Range,
) -> Value {
    let data: Vec<Value> = match (window.min(), window.max()) {
        (Some(min), Some(max)) => rows
            .range(min..=max)
            .map(|(_, row)| Value::Object(row.clone()))
            .collect(),
        _ => Vec::new(),
    };
    json!({
        "units": units.clone().unwrap_or_default(),
        "improvement_direction": improvement_direction.unwrap_or(0),
        "data": data,
    })
}

async fn read_metadata_string(
    database: &crate::store::Database,
    key: &str,
) -> Result<Option<String>, RequestError> {
    Ok(database
        .get(STORE_METADATA, key)
        .await?
        .and_then(|value| value.as_str().map(str::to_string)))
}

async fn read_metadata_i64(
    database: &crate::store::Database,
    key: &str,
) -> Result<Option<i64>, RequestError> {
    Ok(database
        .get(STORE_METADATA, key)
        .await?
        .and_then(|value| value.as_i64()))
}

async fn read_coverage(
    database: &crate::store::Database,
) -> Result<HashMap<String, SortedRangeSet>, RequestError> {
    let mut coverage = HashMap::new();
    for (column, value) in database.get_all(STORE_RANGES).await? {
        let set: SortedRangeSet = serde_json::from_value(value)?;
        coverage.insert(column, set);
    }
    Ok(coverage)
}
