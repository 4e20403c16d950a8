//! Almacén de lecturas particionado por chunks
//!
//! Cada chunk guarda, por vehículo, un `BTreeMap` por timestamp (índice
//! único `(vehicle_id, timestamp)` y orden temporal) y un índice secundario
//! con los timestamps de las lecturas en ralentí.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::EvictionReport;
use crate::config::StorageConfig;
use crate::database::ChunkMap;
use crate::models::telemetry::{AppendOutcome, NewReading, Reading, RejectReason};
use crate::models::{format_cursor, Page, TimeRange};
use crate::utils::errors::{AppError, AppResult};

/// Serie de un vehículo dentro de un chunk
#[derive(Debug, Default)]
pub struct ReadingSeries {
    by_time: BTreeMap<DateTime<Utc>, Reading>,
    idle: BTreeSet<DateTime<Utc>>,
}

impl ReadingSeries {
    fn in_range(&self, lower: Bound<DateTime<Utc>>, end: DateTime<Utc>) -> impl Iterator<Item = &Reading> + '_ {
        self.by_time.range((lower, Bound::Excluded(end))).map(|(_, r)| r)
    }
}

/// Resumen del almacén para `/ingest/stats`
#[derive(Debug, Clone, Serialize)]
pub struct ReadingStoreStats {
    pub total_readings: u64,
    pub chunk_count: usize,
    pub vehicle_count: usize,
    pub earliest_reading: Option<DateTime<Utc>>,
    pub latest_reading: Option<DateTime<Utc>>,
    pub closed: bool,
}

pub struct ReadingRepository {
    chunks: ChunkMap<ReadingSeries>,
    idle_speed_threshold_kph: f64,
    total_rows: AtomicU64,
    closed: AtomicBool,
}

impl ReadingRepository {
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_settings(config.reading_chunk_width, config.idle_speed_threshold_kph)
    }

    pub fn with_settings(chunk_width: Duration, idle_speed_threshold_kph: f64) -> Self {
        Self {
            chunks: ChunkMap::new(chunk_width),
            idle_speed_threshold_kph,
            total_rows: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Insertar una lectura.
    ///
    /// Un duplicado de `(vehicle_id, timestamp)` nunca sobrescribe. Entre
    /// dos inserciones concurrentes de la misma clave, exactamente una
    /// obtiene `Inserted`. Solo falla si el almacén está cerrado.
    pub fn append(&self, new: NewReading) -> AppResult<AppendOutcome> {
        if self.is_closed() {
            return Err(AppError::ServiceUnavailable("reading store is closed".to_string()));
        }
        if let Err(errors) = new.check() {
            return Ok(AppendOutcome::Rejected {
                reason: RejectReason::Invalid(errors.to_string()),
            });
        }
        Ok(self.insert(Reading::from_new(new, Utc::now())))
    }

    fn insert(&self, reading: Reading) -> AppendOutcome {
        let chunk = match self.chunks.chunk_for(reading.timestamp) {
            Ok(chunk) => chunk,
            Err(expired) => {
                return AppendOutcome::Rejected {
                    reason: RejectReason::Expired(expired.to_string()),
                }
            }
        };
        let Some(_permit) = chunk.write_permit() else {
            return AppendOutcome::Rejected {
                reason: RejectReason::Expired(format!("chunk {} was evicted", chunk.id)),
            };
        };

        let series = chunk.series(&reading.vehicle_id);
        let mut guard = series.write();
        let series = &mut *guard;

        let timestamp = reading.timestamp;
        let idle = reading.speed_kph <= self.idle_speed_threshold_kph;
        match series.by_time.entry(timestamp) {
            Entry::Occupied(_) => AppendOutcome::Duplicate,
            Entry::Vacant(slot) => {
                let id = reading.id;
                slot.insert(reading);
                if idle {
                    series.idle.insert(timestamp);
                }
                chunk.add_rows(1);
                self.total_rows.fetch_add(1, Ordering::Relaxed);
                AppendOutcome::Inserted { id }
            }
        }
    }

    /// Lecturas de `[start, end)` en orden ascendente
    pub fn query(&self, vehicle_id: &str, range: &TimeRange) -> Vec<Reading> {
        let mut readings = Vec::new();
        for chunk in self.chunks.overlapping(range) {
            if let Some(series) = chunk.existing_series(vehicle_id) {
                let series = series.read();
                readings.extend(series.in_range(Bound::Included(range.start), range.end).cloned());
            }
        }
        readings
    }

    /// Página de lecturas posteriores a `after`, reanudable con `next_cursor`
    pub fn query_page(
        &self,
        vehicle_id: &str,
        range: &TimeRange,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Page<Reading> {
        let Some(lower) = lower_bound(range.start, range.end, after) else {
            return Page::empty();
        };
        let limit = limit.max(1);

        let mut items: Vec<Reading> = Vec::with_capacity(limit.min(1024) + 1);
        for chunk in self.chunks.overlapping(range) {
            if let Bound::Excluded(cursor) = lower {
                if chunk.end <= cursor {
                    continue;
                }
            }
            if let Some(series) = chunk.existing_series(vehicle_id) {
                let series = series.read();
                let wanted = limit + 1 - items.len();
                items.extend(series.in_range(lower, range.end).take(wanted).cloned());
            }
            if items.len() > limit {
                break;
            }
        }

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|r| format_cursor(r.timestamp))
        } else {
            None
        };
        Page { items, next_cursor }
    }

    /// Lecturas en ralentí (velocidad <= umbral), vía índice secundario
    pub fn idle_readings(&self, vehicle_id: &str, range: &TimeRange) -> Vec<Reading> {
        let mut readings = Vec::new();
        for chunk in self.chunks.overlapping(range) {
            if let Some(series) = chunk.existing_series(vehicle_id) {
                let series = series.read();
                readings.extend(
                    series
                        .idle
                        .range(range.start..range.end)
                        .filter_map(|ts| series.by_time.get(ts))
                        .cloned(),
                );
            }
        }
        readings
    }

    /// Vehículos con al menos una lectura en el rango
    pub fn vehicles_in_range(&self, range: &TimeRange) -> Vec<String> {
        let mut vehicles = BTreeSet::new();
        for chunk in self.chunks.overlapping(range) {
            for (vehicle_id, series) in chunk.all_series() {
                if vehicles.contains(&vehicle_id) {
                    continue;
                }
                let has_data = series
                    .read()
                    .in_range(Bound::Included(range.start), range.end)
                    .next()
                    .is_some();
                if has_data {
                    vehicles.insert(vehicle_id);
                }
            }
        }
        vehicles.into_iter().collect()
    }

    /// Desalojar chunks completos que terminan antes de `older_than`
    pub fn evict(&self, older_than: DateTime<Utc>) -> EvictionReport {
        let evicted = self.chunks.evict_older_than(older_than);
        let rows: u64 = evicted.iter().map(|c| c.row_count()).sum();
        self.total_rows.fetch_sub(rows, Ordering::Relaxed);

        if !evicted.is_empty() {
            tracing::info!(
                "🧹 Retención de lecturas: {} chunks y {} lecturas anteriores a {} desalojados",
                evicted.len(),
                rows,
                older_than
            );
        }
        EvictionReport {
            cutoff: older_than,
            chunks_evicted: evicted.len(),
            rows_evicted: rows,
        }
    }

    /// Cerrar el almacén: los `append` posteriores fallan
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("🔒 Almacén de lecturas cerrado");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> u64 {
        self.total_rows.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn stats(&self) -> ReadingStoreStats {
        let mut vehicles = HashSet::new();
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for chunk in self.chunks.all() {
            for (vehicle_id, series) in chunk.all_series() {
                let series = series.read();
                let (Some((first, _)), Some((last, _))) =
                    (series.by_time.first_key_value(), series.by_time.last_key_value())
                else {
                    continue;
                };
                vehicles.insert(vehicle_id);
                earliest = Some(earliest.map_or(*first, |e| e.min(*first)));
                latest = Some(latest.map_or(*last, |l| l.max(*last)));
            }
        }

        ReadingStoreStats {
            total_readings: self.len(),
            chunk_count: self.chunk_count(),
            vehicle_count: vehicles.len(),
            earliest_reading: earliest,
            latest_reading: latest,
            closed: self.is_closed(),
        }
    }
}

/// Cota inferior de una consulta reanudable; `None` si el cursor ya agotó el rango
pub(crate) fn lower_bound<T: Ord + Copy>(
    range_start: T,
    range_end: T,
    after: Option<T>,
) -> Option<Bound<T>> {
    match after {
        Some(cursor) if cursor >= range_end => None,
        Some(cursor) if cursor >= range_start => Some(Bound::Excluded(cursor)),
        _ if range_start >= range_end => None,
        _ => Some(Bound::Included(range_start)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::telemetry::IngestionFormat;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 4, h, m, s).unwrap()
    }

    fn reading(vehicle_id: &str, ts: DateTime<Utc>, speed: f64, fuel: f64) -> NewReading {
        NewReading {
            vehicle_id: vehicle_id.to_string(),
            timestamp: ts,
            latitude: 22.57,
            longitude: 88.36,
            speed_kph: speed,
            fuel_percentage: fuel,
            ingestion_format: IngestionFormat::SingleReading,
            batch_id: None,
            processing_metadata: json!({}),
        }
    }

    fn store() -> ReadingRepository {
        ReadingRepository::with_settings(Duration::hours(1), 1.0)
    }

    #[test]
    fn test_duplicate_is_absorbed_not_overwritten() {
        let store = store();
        assert!(store.append(reading("V1", at(12, 0, 0), 40.0, 80.0)).unwrap().is_inserted());
        let second = store.append(reading("V1", at(12, 0, 0), 99.0, 10.0)).unwrap();
        assert_eq!(second, AppendOutcome::Duplicate);

        let range = TimeRange::hour(at(12, 0, 0));
        let rows = store.query("V1", &range);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].speed_kph, 40.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalid_reading_is_rejected() {
        let store = store();
        let outcome = store.append(reading("V1", at(12, 0, 0), 40.0, 100.0001)).unwrap();
        assert!(matches!(
            outcome,
            AppendOutcome::Rejected { reason: RejectReason::Invalid(_) }
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_query_crosses_chunk_boundaries_in_order() {
        let store = store();
        for ts in [at(14, 10, 0), at(12, 59, 59), at(13, 0, 0), at(12, 0, 0), at(15, 0, 0)] {
            store.append(reading("V1", ts, 30.0, 50.0)).unwrap();
        }
        store.append(reading("V2", at(13, 30, 0), 30.0, 50.0)).unwrap();

        let range = TimeRange::new(at(12, 0, 0), at(15, 0, 0)).unwrap();
        let stamps: Vec<_> = store.query("V1", &range).iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![at(12, 0, 0), at(12, 59, 59), at(13, 0, 0), at(14, 10, 0)]);
    }

    #[test]
    fn test_query_page_resumes_from_cursor() {
        let store = store();
        for step in 0..10 {
            let ts = at(11, 58, 0) + Duration::seconds(30 * step);
            store.append(reading("V1", ts, 30.0, 50.0)).unwrap();
        }
        let range = TimeRange::new(at(11, 0, 0), at(13, 0, 0)).unwrap();
        let everything = store.query("V1", &range);
        assert_eq!(everything.len(), 10);

        let mut collected = Vec::new();
        let mut after = None;
        loop {
            let page = store.query_page("V1", &range, after, 3);
            assert!(page.items.len() <= 3);
            collected.extend(page.items.iter().map(|r| r.timestamp));
            match page.next_cursor {
                Some(cursor) => {
                    after = Some(DateTime::parse_from_rfc3339(&cursor).unwrap().with_timezone(&Utc))
                }
                None => break,
            }
        }
        let expected: Vec<_> = everything.iter().map(|r| r.timestamp).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_idle_index_and_vehicles_in_range() {
        let store = store();
        store.append(reading("V1", at(12, 0, 0), 60.0, 80.0)).unwrap();
        store.append(reading("V1", at(12, 30, 0), 0.0, 79.0)).unwrap();
        store.append(reading("V1", at(12, 59, 0), 1.0, 79.0)).unwrap();
        store.append(reading("V2", at(13, 5, 0), 0.0, 60.0)).unwrap();

        let hour = TimeRange::hour(at(12, 0, 0));
        let idle: Vec<_> = store.idle_readings("V1", &hour).iter().map(|r| r.timestamp).collect();
        assert_eq!(idle, vec![at(12, 30, 0), at(12, 59, 0)]);

        assert_eq!(store.vehicles_in_range(&hour), vec!["V1".to_string()]);
        let wide = TimeRange::new(at(12, 0, 0), at(14, 0, 0)).unwrap();
        assert_eq!(store.vehicles_in_range(&wide).len(), 2);
    }

    #[test]
    fn test_eviction_drops_chunks_and_rejects_late_appends() {
        let store = store();
        store.append(reading("V1", at(10, 15, 0), 30.0, 50.0)).unwrap();
        store.append(reading("V1", at(12, 15, 0), 30.0, 50.0)).unwrap();

        let report = store.evict(at(11, 0, 0));
        assert_eq!(report.chunks_evicted, 1);
        assert_eq!(report.rows_evicted, 1);
        assert_eq!(store.len(), 1);

        let old = TimeRange::hour(at(10, 0, 0));
        assert!(store.query("V1", &old).is_empty());

        let late = store.append(reading("V1", at(10, 20, 0), 30.0, 50.0)).unwrap();
        assert!(matches!(
            late,
            AppendOutcome::Rejected { reason: RejectReason::Expired(_) }
        ));
    }

    #[test]
    fn test_closed_store_refuses_appends() {
        let store = store();
        store.close();
        assert!(store.append(reading("V1", at(12, 0, 0), 30.0, 50.0)).is_err());
        assert!(store.stats().closed);
    }

    #[test]
    fn test_concurrent_same_key_has_single_winner() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .append(reading("RACE", at(12, 0, 0), i as f64, 50.0))
                        .unwrap()
                })
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| o.is_inserted())
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(store.query("RACE", &TimeRange::hour(at(12, 0, 0))).len(), 1);
    }

    #[test]
    fn test_lower_bound_edges() {
        assert_eq!(lower_bound(1, 5, None), Some(Bound::Included(1)));
        assert_eq!(lower_bound(1, 5, Some(0)), Some(Bound::Included(1)));
        assert_eq!(lower_bound(1, 5, Some(3)), Some(Bound::Excluded(3)));
        assert_eq!(lower_bound(1, 5, Some(5)), None);
        assert_eq!(lower_bound(5, 5, None), None);
    }
}
