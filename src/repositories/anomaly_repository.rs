//! Almacén de anomalías
//!
//! Log de solo-agregado particionado igual que las lecturas pero con chunks
//! más anchos. Dentro de cada serie la clave es `(timestamp, id)`, así varios
//! eventos del mismo instante conviven y el orden es total.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::reading_repository::lower_bound;
use super::EvictionReport;
use crate::config::StorageConfig;
use crate::database::ChunkMap;
use crate::models::anomaly::{AnomalyEvent, AnomalyType};
use crate::models::{format_cursor, Page, TimeRange};
use crate::utils::errors::{not_found_error, validation_error, AppResult};

pub type AnomalyKey = (DateTime<Utc>, Uuid);

#[derive(Debug, Default)]
pub struct AnomalySeries {
    events: BTreeMap<AnomalyKey, AnomalyEvent>,
}

/// Ubicación de un evento para `mark_processed`
#[derive(Debug, Clone)]
struct EventLocation {
    vehicle_id: String,
    timestamp: DateTime<Utc>,
}

pub struct AnomalyRepository {
    chunks: ChunkMap<AnomalySeries>,
    by_id: DashMap<Uuid, EventLocation>,
    total: AtomicU64,
}

impl AnomalyRepository {
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_chunk_width(config.anomaly_chunk_width)
    }

    pub fn with_chunk_width(chunk_width: Duration) -> Self {
        Self {
            chunks: ChunkMap::new(chunk_width),
            by_id: DashMap::new(),
            total: AtomicU64::new(0),
        }
    }

    /// Guardar un evento ya validado
    pub fn insert(&self, event: AnomalyEvent) -> AppResult<Uuid> {
        let expired = || validation_error("timestamp", "event is older than the retention horizon");
        let chunk = self.chunks.chunk_for(event.timestamp).map_err(|_| expired())?;
        let _permit = chunk.write_permit().ok_or_else(expired)?;

        let id = event.id;
        let location = EventLocation {
            vehicle_id: event.vehicle_id.clone(),
            timestamp: event.timestamp,
        };
        let series = chunk.series(&event.vehicle_id);
        series.write().events.insert((event.timestamp, id), event);
        self.by_id.insert(id, location);

        chunk.add_rows(1);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<AnomalyEvent> {
        let location = self.by_id.get(&id).map(|l| l.clone())?;
        let chunk = self.chunks.get(self.chunks.width().chunk_of(location.timestamp))?;
        let series = chunk.existing_series(&location.vehicle_id)?;
        let event = series.read().events.get(&(location.timestamp, id)).cloned();
        event
    }

    /// Eventos del vehículo en `[start, end)`, opcionalmente filtrados por tipo
    pub fn query(
        &self,
        vehicle_id: &str,
        range: &TimeRange,
        event_type: Option<AnomalyType>,
    ) -> Vec<AnomalyEvent> {
        let mut events = Vec::new();
        for chunk in self.chunks.overlapping(range) {
            if let Some(series) = chunk.existing_series(vehicle_id) {
                let series = series.read();
                events.extend(
                    series
                        .events
                        .range((Bound::Included((range.start, Uuid::nil())), Bound::Excluded((range.end, Uuid::nil()))))
                        .map(|(_, e)| e)
                        .filter(|e| event_type.map_or(true, |t| e.event_type == t))
                        .cloned(),
                );
            }
        }
        events
    }

    /// Página reanudable; el cursor es `timestamp|id`
    pub fn query_page(
        &self,
        vehicle_id: &str,
        range: &TimeRange,
        event_type: Option<AnomalyType>,
        after: Option<AnomalyKey>,
        limit: usize,
    ) -> Page<AnomalyEvent> {
        let start: AnomalyKey = (range.start, Uuid::nil());
        let end: AnomalyKey = (range.end, Uuid::nil());
        let Some(lower) = lower_bound(start, end, after) else {
            return Page::empty();
        };
        let limit = limit.max(1);

        let mut items: Vec<AnomalyEvent> = Vec::new();
        for chunk in self.chunks.overlapping(range) {
            if let Bound::Excluded((cursor_ts, _)) = lower {
                if chunk.end <= cursor_ts {
                    continue;
                }
            }
            if let Some(series) = chunk.existing_series(vehicle_id) {
                let series = series.read();
                let wanted = limit + 1 - items.len();
                items.extend(
                    series
                        .events
                        .range((lower, Bound::Excluded(end)))
                        .map(|(_, e)| e)
                        .filter(|e| event_type.map_or(true, |t| e.event_type == t))
                        .take(wanted)
                        .cloned(),
                );
            }
            if items.len() > limit {
                break;
            }
        }

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|e| format_anomaly_cursor((e.timestamp, e.id)))
        } else {
            None
        };
        Page { items, next_cursor }
    }

    /// Eventos de toda la flota en `[start, end)`, los más recientes primero.
    ///
    /// Recorre los chunks de atrás hacia delante y se detiene al llegar a `limit`.
    pub fn feed(
        &self,
        range: &TimeRange,
        event_type: Option<AnomalyType>,
        vehicle_id: Option<&str>,
        limit: usize,
    ) -> Vec<AnomalyEvent> {
        let bounds = (
            Bound::Included((range.start, Uuid::nil())),
            Bound::Excluded((range.end, Uuid::nil())),
        );
        let mut items: Vec<AnomalyEvent> = Vec::new();
        for chunk in self.chunks.overlapping(range).into_iter().rev() {
            let series: Vec<_> = match vehicle_id {
                Some(id) => chunk.existing_series(id).into_iter().collect(),
                None => chunk.all_series().into_iter().map(|(_, s)| s).collect(),
            };

            let mut found: Vec<AnomalyEvent> = Vec::new();
            for series in series {
                let series = series.read();
                found.extend(
                    series
                        .events
                        .range(bounds)
                        .map(|(_, e)| e)
                        .filter(|e| event_type.map_or(true, |t| e.event_type == t))
                        .cloned(),
                );
            }
            found.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
            items.extend(found);
            if items.len() >= limit {
                break;
            }
        }
        items.truncate(limit);
        items
    }

    /// ¿Existe ya un evento de ese tipo para el vehículo en ese instante?
    pub fn exists(&self, vehicle_id: &str, timestamp: DateTime<Utc>, event_type: AnomalyType) -> bool {
        let Ok(instant) = TimeRange::new(timestamp, timestamp + Duration::nanoseconds(1)) else {
            return false;
        };
        !self.query(vehicle_id, &instant, Some(event_type)).is_empty()
    }

    /// Marcar como procesado. `true` solo en la transición false → true.
    pub fn mark_processed(&self, id: Uuid) -> AppResult<bool> {
        let missing = || not_found_error("Anomaly event", &id.to_string());
        let location = self.by_id.get(&id).map(|l| l.clone()).ok_or_else(missing)?;
        let chunk = self
            .chunks
            .get(self.chunks.width().chunk_of(location.timestamp))
            .ok_or_else(missing)?;
        let series = chunk.existing_series(&location.vehicle_id).ok_or_else(missing)?;

        let mut series = series.write();
        let event = series
            .events
            .get_mut(&(location.timestamp, id))
            .ok_or_else(missing)?;
        if event.processed {
            return Ok(false);
        }
        event.processed = true;
        Ok(true)
    }

    pub fn evict(&self, older_than: DateTime<Utc>) -> EvictionReport {
        let evicted = self.chunks.evict_older_than(older_than);
        let mut rows = 0u64;
        for chunk in &evicted {
            for (_, series) in chunk.all_series() {
                for (_, id) in series.read().events.keys() {
                    self.by_id.remove(id);
                }
            }
            rows += chunk.row_count();
        }
        self.total.fetch_sub(rows, Ordering::Relaxed);

        if !evicted.is_empty() {
            tracing::info!(
                "🧹 Retención de anomalías: {} chunks y {} eventos desalojados",
                evicted.len(),
                rows
            );
        }
        EvictionReport {
            cutoff: older_than,
            chunks_evicted: evicted.len(),
            rows_evicted: rows,
        }
    }

    pub fn len(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn format_anomaly_cursor((timestamp, id): AnomalyKey) -> String {
    format!("{}|{}", format_cursor(timestamp), id)
}

pub fn parse_anomaly_cursor(cursor: &str) -> Option<AnomalyKey> {
    let (timestamp, id) = cursor.split_once('|')?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc);
    let id = Uuid::parse_str(id).ok()?;
    Some((timestamp, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 4, h, m, 0).unwrap()
    }

    fn event(vehicle_id: &str, ts: DateTime<Utc>, event_type: AnomalyType) -> AnomalyEvent {
        AnomalyEvent {
            id: Uuid::new_v4(),
            vehicle_id: vehicle_id.to_string(),
            timestamp: ts,
            event_type,
            confidence_score: 0.8,
            severity: 3,
            details: json!({}),
            processed: false,
            detected_at: ts,
        }
    }

    #[test]
    fn test_query_filters_by_type_and_range() {
        let repo = AnomalyRepository::with_chunk_width(Duration::hours(24));
        repo.insert(event("V1", at(10, 0), AnomalyType::FuelTheft)).unwrap();
        repo.insert(event("V1", at(10, 30), AnomalyType::UnusualStop)).unwrap();
        repo.insert(event("V1", at(11, 0), AnomalyType::FuelTheft)).unwrap();
        repo.insert(event("V2", at(10, 15), AnomalyType::FuelTheft)).unwrap();

        let range = TimeRange::new(at(10, 0), at(11, 0)).unwrap();
        assert_eq!(repo.query("V1", &range, None).len(), 2);
        assert_eq!(repo.query("V1", &range, Some(AnomalyType::FuelTheft)).len(), 1);
        assert!(repo.exists("V1", at(10, 30), AnomalyType::UnusualStop));
        assert!(!repo.exists("V1", at(10, 30), AnomalyType::FuelTheft));
    }

    #[test]
    fn test_feed_spans_vehicles_newest_first() {
        let repo = AnomalyRepository::with_chunk_width(Duration::hours(1));
        repo.insert(event("V1", at(9, 10), AnomalyType::FuelTheft)).unwrap();
        repo.insert(event("V2", at(11, 40), AnomalyType::FuelTheft)).unwrap();
        repo.insert(event("V1", at(11, 5), AnomalyType::UnusualStop)).unwrap();
        repo.insert(event("V3", at(10, 20), AnomalyType::RouteDeviation)).unwrap();
        repo.insert(event("V2", at(14, 0), AnomalyType::FuelTheft)).unwrap();

        let range = TimeRange::new(at(9, 0), at(12, 0)).unwrap();
        let all = repo.feed(&range, None, None, 100);
        let times: Vec<_> = all.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![at(11, 40), at(11, 5), at(10, 20), at(9, 10)]);

        let thefts = repo.feed(&range, Some(AnomalyType::FuelTheft), None, 100);
        let vehicles: Vec<_> = thefts.iter().map(|e| e.vehicle_id.as_str()).collect();
        assert_eq!(vehicles, vec!["V2", "V1"]);

        let only_v1 = repo.feed(&range, None, Some("V1"), 100);
        assert_eq!(only_v1.len(), 2);
        assert!(only_v1.iter().all(|e| e.vehicle_id == "V1"));

        let newest = repo.feed(&range, None, None, 1);
        assert_eq!(newest[0].timestamp, at(11, 40));
        assert!(repo.feed(&range, None, Some("GHOST"), 100).is_empty());
    }

    #[test]
    fn test_mark_processed_transitions_once() {
        let repo = AnomalyRepository::with_chunk_width(Duration::hours(24));
        let id = repo.insert(event("V1", at(10, 0), AnomalyType::RouteDeviation)).unwrap();

        assert!(repo.mark_processed(id).unwrap());
        assert!(!repo.mark_processed(id).unwrap());
        assert!(repo.get(id).unwrap().processed);
        assert!(repo.mark_processed(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_paging_with_events_sharing_a_timestamp() {
        let repo = AnomalyRepository::with_chunk_width(Duration::hours(1));
        for _ in 0..3 {
            repo.insert(event("V1", at(10, 0), AnomalyType::UnusualStop)).unwrap();
        }
        repo.insert(event("V1", at(12, 0), AnomalyType::UnusualStop)).unwrap();

        let range = TimeRange::new(at(9, 0), at(13, 0)).unwrap();
        let first = repo.query_page("V1", &range, None, None, 2);
        assert_eq!(first.items.len(), 2);
        let cursor = parse_anomaly_cursor(first.next_cursor.as_deref().unwrap()).unwrap();

        let second = repo.query_page("V1", &range, None, Some(cursor), 2);
        assert_eq!(second.items.len(), 2);
        assert!(second.next_cursor.is_none());

        let ids: std::collections::HashSet<_> =
            first.items.iter().chain(second.items.iter()).map(|e| e.id).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_eviction_forgets_ids() {
        let repo = AnomalyRepository::with_chunk_width(Duration::hours(24));
        let old = repo.insert(event("V1", at(10, 0), AnomalyType::FuelTheft)).unwrap();

        let report = repo.evict(Utc.with_ymd_and_hms(2025, 9, 6, 0, 0, 0).unwrap());
        assert_eq!(report.rows_evicted, 1);
        assert!(repo.get(old).is_none());
        assert!(repo.mark_processed(old).is_err());
        assert!(repo.insert(event("V1", at(11, 0), AnomalyType::FuelTheft)).is_err());
    }
}
