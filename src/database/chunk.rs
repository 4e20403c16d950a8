//! Particionado por chunks de tiempo
//!
//! Cada almacén de series temporales se divide en chunks de ancho fijo sobre
//! el timestamp del evento: `chunk_id = floor(timestamp / ancho)`. La
//! ubicación se decide solo con aritmética, sin coordinación, y dentro de
//! cada chunk los datos se separan por clave (vehículo) con un lock propio.
//! Así dos escrituras solo compiten si caen en el mismo chunk y el mismo
//! vehículo.
//!
//! El desalojo por retención quita chunks enteros: O(1) por chunk, nunca
//! fila por fila.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::models::TimeRange;

pub type ChunkId = i64;

/// Ancho de chunk en milisegundos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWidth(i64);

impl ChunkWidth {
    pub fn new(width: Duration) -> Self {
        Self(width.num_milliseconds().max(1))
    }

    pub fn as_duration(&self) -> Duration {
        Duration::milliseconds(self.0)
    }

    /// Chunk que contiene `ts`
    pub fn chunk_of(&self, ts: DateTime<Utc>) -> ChunkId {
        ts.timestamp_millis().div_euclid(self.0)
    }

    /// Límites `[inicio, fin)` del chunk
    pub fn bounds(&self, id: ChunkId) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.millis_to_time(id.saturating_mul(self.0)), self.millis_to_time((id + 1).saturating_mul(self.0)))
    }

    /// Rango de ids (inclusivo) que solapa con `[start, end)`
    pub fn span(&self, range: &TimeRange) -> Option<(ChunkId, ChunkId)> {
        if range.is_empty() {
            return None;
        }
        let last_instant = range.end - Duration::milliseconds(1);
        Some((self.chunk_of(range.start), self.chunk_of(last_instant.max(range.start))))
    }

    fn millis_to_time(&self, millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Un chunk: partición temporal con series independientes por clave
pub struct Chunk<S> {
    pub id: ChunkId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    gate: RwLock<()>,
    evicted: AtomicBool,
    rows: AtomicU64,
    series: DashMap<String, Arc<RwLock<S>>>,
}

impl<S: Default> Chunk<S> {
    fn new(id: ChunkId, width: ChunkWidth) -> Self {
        let (start, end) = width.bounds(id);
        Self {
            id,
            start,
            end,
            gate: RwLock::new(()),
            evicted: AtomicBool::new(false),
            rows: AtomicU64::new(0),
            series: DashMap::new(),
        }
    }

    /// Serie de `key`, creándola si no existe
    pub fn series(&self, key: &str) -> Arc<RwLock<S>> {
        if let Some(existing) = self.series.get(key) {
            return existing.clone();
        }
        self.series
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(S::default())))
            .clone()
    }

    /// Serie de `key` solo si ya existe
    pub fn existing_series(&self, key: &str) -> Option<Arc<RwLock<S>>> {
        self.series.get(key).map(|s| s.clone())
    }

    /// Todas las series del chunk (clave, serie)
    pub fn all_series(&self) -> Vec<(String, Arc<RwLock<S>>)> {
        self.series
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl<S> Chunk<S> {
    /// Permiso de escritura compartido. `None` si el chunk ya fue desalojado.
    ///
    /// Mientras el guard vive, el desalojo de este chunk espera; las
    /// escrituras entre sí no se bloquean.
    pub fn write_permit(&self) -> Option<RwLockReadGuard<'_, ()>> {
        let guard = self.gate.read();
        if self.evicted.load(Ordering::Acquire) {
            None
        } else {
            Some(guard)
        }
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub fn add_rows(&self, n: u64) {
        self.rows.fetch_add(n, Ordering::Relaxed);
    }

    pub fn row_count(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    fn seal(&self) {
        let _exclusive = self.gate.write();
        self.evicted.store(true, Ordering::Release);
    }
}

/// El chunk destino está por debajo del horizonte de retención
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("chunk {chunk_id} is older than the retention floor {floor}")]
pub struct ChunkExpired {
    pub chunk_id: ChunkId,
    pub floor: ChunkId,
}

/// Mapa concurrente de chunks con índice ordenado de ids
pub struct ChunkMap<S> {
    width: ChunkWidth,
    chunks: DashMap<ChunkId, Arc<Chunk<S>>>,
    index: RwLock<BTreeSet<ChunkId>>,
    floor: AtomicI64,
}

impl<S: Default> ChunkMap<S> {
    pub fn new(width: Duration) -> Self {
        Self {
            width: ChunkWidth::new(width),
            chunks: DashMap::new(),
            index: RwLock::new(BTreeSet::new()),
            floor: AtomicI64::new(ChunkId::MIN),
        }
    }

    pub fn width(&self) -> ChunkWidth {
        self.width
    }

    /// Chunk para `ts`, creado de forma idempotente si no existe.
    ///
    /// Varios primeros escritores concurrentes obtienen el mismo chunk.
    pub fn chunk_for(&self, ts: DateTime<Utc>) -> Result<Arc<Chunk<S>>, ChunkExpired> {
        let id = self.width.chunk_of(ts);
        let floor = self.floor.load(Ordering::Acquire);
        if id < floor {
            return Err(ChunkExpired { chunk_id: id, floor });
        }

        if let Some(chunk) = self.chunks.get(&id) {
            return Ok(chunk.clone());
        }

        // El guard de la entrada se suelta antes de tocar el índice
        let (chunk, created) = match self.chunks.entry(id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let chunk = Arc::new(Chunk::new(id, self.width));
                entry.insert(chunk.clone());
                (chunk, true)
            }
        };
        if created {
            self.index.write().insert(id);
            tracing::debug!("🧱 Chunk {} creado [{} - {})", id, chunk.start, chunk.end);
        }

        // Un desalojo concurrente pudo subir el suelo durante la creación
        let floor = self.floor.load(Ordering::Acquire);
        if id < floor {
            if created {
                self.discard(&chunk);
            }
            return Err(ChunkExpired { chunk_id: id, floor });
        }
        Ok(chunk)
    }
}

impl<S> ChunkMap<S> {
    /// Primer id de chunk que aún admite escrituras
    pub fn floor(&self) -> ChunkId {
        self.floor.load(Ordering::Acquire)
    }

    pub fn get(&self, id: ChunkId) -> Option<Arc<Chunk<S>>> {
        self.chunks.get(&id).map(|c| c.clone())
    }

    /// Chunks existentes que solapan con el rango, en orden ascendente
    pub fn overlapping(&self, range: &TimeRange) -> Vec<Arc<Chunk<S>>> {
        let Some((first, last)) = self.width.span(range) else {
            return Vec::new();
        };
        let ids: Vec<ChunkId> = self.index.read().range(first..=last).copied().collect();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Todos los chunks, en orden ascendente
    pub fn all(&self) -> Vec<Arc<Chunk<S>>> {
        let ids: Vec<ChunkId> = self.index.read().iter().copied().collect();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Desalojar los chunks que terminan en o antes de `cutoff`.
    ///
    /// Devuelve los chunks retirados para que el almacén ajuste sus
    /// contadores e índices secundarios.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Vec<Arc<Chunk<S>>> {
        let floor = self.width.chunk_of(cutoff);
        self.floor.fetch_max(floor, Ordering::AcqRel);

        let expired: BTreeSet<ChunkId> = {
            let mut index = self.index.write();
            let keep = index.split_off(&floor);
            std::mem::replace(&mut *index, keep)
        };

        expired
            .into_iter()
            .filter_map(|id| self.chunks.remove(&id).map(|(_, chunk)| chunk))
            .inspect(|chunk| chunk.seal())
            .collect()
    }

    /// Retirar y sellar un chunk creado por debajo del suelo
    fn discard(&self, chunk: &Arc<Chunk<S>>) {
        self.chunks
            .remove_if(&chunk.id, |_, current| Arc::ptr_eq(current, chunk));
        self.index.write().remove(&chunk.id);
        chunk.seal();
        tracing::debug!("🧱 Chunk {} descartado: por debajo del suelo {}", chunk.id, self.floor());
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    type Series = BTreeMap<i64, u32>;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 4, h, m, 0).unwrap()
    }

    #[test]
    fn test_chunk_arithmetic() {
        let width = ChunkWidth::new(Duration::hours(1));
        assert_eq!(width.chunk_of(at(12, 0)), width.chunk_of(at(12, 59)));
        assert_eq!(width.chunk_of(at(13, 0)), width.chunk_of(at(12, 0)) + 1);

        let (start, end) = width.bounds(width.chunk_of(at(12, 30)));
        assert_eq!(start, at(12, 0));
        assert_eq!(end, at(13, 0));
    }

    #[test]
    fn test_chunk_arithmetic_before_epoch() {
        let width = ChunkWidth::new(Duration::hours(1));
        let ts = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        assert_eq!(width.chunk_of(ts), -1);
        assert_eq!(width.bounds(-1).1, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_span_excludes_chunk_starting_at_range_end() {
        let width = ChunkWidth::new(Duration::hours(1));
        let range = TimeRange::new(at(12, 0), at(14, 0)).unwrap();
        let (first, last) = width.span(&range).unwrap();
        assert_eq!(last - first, 1);
        assert!(width.span(&TimeRange::new(at(12, 0), at(12, 0)).unwrap()).is_none());
    }

    #[test]
    fn test_chunk_creation_is_idempotent() {
        let map: ChunkMap<Series> = ChunkMap::new(Duration::hours(1));
        let a = map.chunk_for(at(12, 5)).unwrap();
        let b = map.chunk_for(at(12, 55)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_concurrent_first_writers_share_chunk() {
        let map: Arc<ChunkMap<Series>> = Arc::new(ChunkMap::new(Duration::hours(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = map.clone();
                std::thread::spawn(move || map.chunk_for(at(9, 15)).unwrap())
            })
            .collect();
        let chunks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(chunks.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(map.len(), 1);
        assert_eq!(map.all().len(), 1);
    }

    #[test]
    fn test_overlapping_only_returns_existing_chunks_in_order() {
        let map: ChunkMap<Series> = ChunkMap::new(Duration::hours(1));
        map.chunk_for(at(15, 0)).unwrap();
        map.chunk_for(at(10, 0)).unwrap();
        map.chunk_for(at(12, 0)).unwrap();

        let range = TimeRange::new(at(11, 0), at(15, 0)).unwrap();
        let starts: Vec<_> = map.overlapping(&range).iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![at(12, 0)]);

        let range = TimeRange::new(at(0, 0), at(23, 0)).unwrap();
        let starts: Vec<_> = map.overlapping(&range).iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![at(10, 0), at(12, 0), at(15, 0)]);
    }

    #[test]
    fn test_eviction_removes_whole_chunks_and_raises_floor() {
        let map: ChunkMap<Series> = ChunkMap::new(Duration::hours(1));
        let old = map.chunk_for(at(10, 30)).unwrap();
        map.chunk_for(at(11, 30)).unwrap();
        map.chunk_for(at(12, 30)).unwrap();

        let evicted = map.evict_older_than(at(12, 0));
        assert_eq!(evicted.len(), 2);
        assert!(old.is_evicted());
        assert!(old.write_permit().is_none());
        assert_eq!(map.len(), 1);

        let err = map.chunk_for(at(11, 45)).err().unwrap();
        assert!(err.chunk_id < err.floor);
        assert!(map.chunk_for(at(12, 45)).is_ok());
    }

    #[test]
    fn test_writers_racing_eviction_leave_nothing_below_floor() {
        let map: Arc<ChunkMap<Series>> = Arc::new(ChunkMap::new(Duration::minutes(1)));
        let base = at(0, 0);
        let minutes = 240;

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        for m in 0..minutes {
                            let _ = map.chunk_for(base + Duration::minutes(m));
                        }
                    }
                })
            })
            .collect();
        let evictor = {
            let map = map.clone();
            std::thread::spawn(move || {
                for m in 0..minutes / 2 {
                    map.evict_older_than(base + Duration::minutes(m));
                    std::thread::yield_now();
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        evictor.join().unwrap();

        let floor = map.floor();
        let alive = map.all();
        assert!(alive.iter().all(|chunk| chunk.id >= floor));
        assert!(alive.iter().all(|chunk| !chunk.is_evicted()));
        assert_eq!(alive.len(), map.len());

        let stale = map.chunk_for(base).err().unwrap();
        assert_eq!(stale.floor, floor);
    }

    #[test]
    fn test_series_are_per_key() {
        let map: ChunkMap<Series> = ChunkMap::new(Duration::hours(1));
        let chunk = map.chunk_for(at(12, 0)).unwrap();
        chunk.series("V1").write().insert(1, 10);
        chunk.series("V2").write().insert(1, 20);
        assert_eq!(chunk.series("V1").read().get(&1), Some(&10));
        assert!(chunk.existing_series("V3").is_none());
        assert_eq!(chunk.all_series().len(), 2);
    }
}
