//! Prior-season baseline points and their merge with live current-season totals.
//!
//! The baseline is loaded on first use and kept for the life of the process. The source file
//! is a frozen export of a concluded season, so there is no reload or teardown path.

use super::normalizer::{normalize, AmountError};
use crate::domain::{EntityAggregate, EntityId, SnapshotRow, TimeMs};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BaselineError {
    #[error("failed to read baseline {path}: {message}")]
    Io { path: String, message: String },
    #[error("lz4 decode error: {0}")]
    Lz4(String),
    #[error("csv parse error: {0}")]
    Csv(String),
    #[error("json parse error: {0}")]
    Json(String),
    #[error("invalid baseline entry: {0}")]
    Entry(String),
    #[error("unsupported baseline format: {0}")]
    UnsupportedFormat(String),
}

/// Immutable id → prior-season points map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineMap {
    points: HashMap<EntityId, f64>,
    fingerprint: String,
}

impl BaselineMap {
    pub fn new(points: HashMap<EntityId, f64>) -> Self {
        Self {
            points,
            fingerprint: String::new(),
        }
    }

    /// Baseline for an id; absent ids have a baseline of zero.
    pub fn get(&self, id: EntityId) -> f64 {
        self.points.get(&id).copied().unwrap_or(0.0)
    }

    /// All-time points: baseline plus the normalized current-season value.
    pub fn all_time_points(&self, id: EntityId, current_normalized: f64) -> f64 {
        self.get(id) + current_normalized
    }

    /// Normalize an entity's live balance and merge it into a snapshot row.
    pub fn merge(
        &self,
        entity: &EntityAggregate,
        updated_at: TimeMs,
    ) -> Result<SnapshotRow, AmountError> {
        let current_points = normalize(&entity.current_points)?;
        let baseline_points = self.get(entity.id);
        Ok(SnapshotRow {
            id: entity.id,
            all_time_points: baseline_points + current_points,
            baseline_points,
            current_points,
            aggregates: entity.aggregates,
            updated_at_ms: updated_at,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `hash:`-prefixed digest of the source bytes, empty for in-memory maps.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Parse a baseline file's bytes, choosing the format from the file name.
    pub fn parse(file_name: &str, bytes: &[u8]) -> Result<Self, BaselineError> {
        let lower = file_name.to_ascii_lowercase();
        let points = if lower.ends_with(".csv.lz4") {
            parse_csv(&decompress_lz4_frame(bytes)?)?
        } else if lower.ends_with(".csv") {
            parse_csv(bytes)?
        } else if lower.ends_with(".json") {
            parse_json(bytes)?
        } else {
            return Err(BaselineError::UnsupportedFormat(file_name.to_string()));
        };

        Ok(Self {
            points,
            fingerprint: fingerprint(bytes),
        })
    }
}

/// Where the baseline comes from.
#[derive(Debug, Clone)]
pub enum BaselineSource {
    File(PathBuf),
    InMemory(BaselineMap),
}

impl BaselineSource {
    async fn load(&self) -> Result<BaselineMap, BaselineError> {
        match self {
            BaselineSource::InMemory(map) => Ok(map.clone()),
            BaselineSource::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| BaselineError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                let name = file_name(path);
                let map = BaselineMap::parse(&name, &bytes)?;
                info!(
                    path = %path.display(),
                    entries = map.len(),
                    fingerprint = %map.fingerprint(),
                    "Loaded prior-season baseline"
                );
                Ok(map)
            }
        }
    }
}

/// Combines the once-loaded baseline with live amounts.
#[derive(Debug)]
pub struct BaselineMerger {
    source: BaselineSource,
    map: OnceCell<BaselineMap>,
}

impl BaselineMerger {
    pub fn new(source: BaselineSource) -> Self {
        Self {
            source,
            map: OnceCell::new(),
        }
    }

    pub fn in_memory(points: HashMap<EntityId, f64>) -> Self {
        Self::new(BaselineSource::InMemory(BaselineMap::new(points)))
    }

    /// Get the baseline, loading it on first use.
    ///
    /// Only a successful load is memoized; a failed load is retried by the next caller.
    pub async fn baseline(&self) -> Result<&BaselineMap, BaselineError> {
        self.map.get_or_try_init(|| self.source.load()).await
    }

    pub fn is_loaded(&self) -> bool {
        self.map.initialized()
    }

    pub async fn all_time_points(
        &self,
        id: EntityId,
        current_normalized: f64,
    ) -> Result<f64, BaselineError> {
        Ok(self.baseline().await?.all_time_points(id, current_normalized))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn fingerprint(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("hash:{}", hex::encode(&hash[..16]))
}

fn decompress_lz4_frame(lz4_bytes: &[u8]) -> Result<Vec<u8>, BaselineError> {
    let mut decoder = lz4_flex::frame::FrameDecoder::new(lz4_bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BaselineError::Lz4(e.to_string()))?;
    Ok(out)
}

fn parse_csv(csv_bytes: &[u8]) -> Result<HashMap<EntityId, f64>, BaselineError> {
    #[derive(Debug, serde::Deserialize)]
    struct Row {
        id: i64,
        points: f64,
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(csv_bytes);

    let mut points = HashMap::new();
    for record in reader.deserialize::<Row>() {
        let row = record.map_err(|e| BaselineError::Csv(e.to_string()))?;
        insert_entry(&mut points, row.id, row.points)?;
    }
    Ok(points)
}

fn parse_json(json_bytes: &[u8]) -> Result<HashMap<EntityId, f64>, BaselineError> {
    #[derive(Debug, serde::Deserialize)]
    struct Entry {
        id: i64,
        points: f64,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(untagged)]
    enum Document {
        ById(HashMap<String, f64>),
        Entries(Vec<Entry>),
    }

    let document: Document =
        serde_json::from_slice(json_bytes).map_err(|e| BaselineError::Json(e.to_string()))?;

    let mut points = HashMap::new();
    match document {
        Document::ById(by_id) => {
            for (id, value) in by_id {
                let id = id
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| BaselineError::Entry(format!("non-numeric id {:?}", id)))?;
                insert_entry(&mut points, id, value)?;
            }
        }
        Document::Entries(entries) => {
            for entry in entries {
                insert_entry(&mut points, entry.id, entry.points)?;
            }
        }
    }
    Ok(points)
}

fn insert_entry(
    points: &mut HashMap<EntityId, f64>,
    id: i64,
    value: f64,
) -> Result<(), BaselineError> {
    let id = EntityId::new(id).map_err(|e| BaselineError::Entry(e.to_string()))?;
    if !value.is_finite() {
        return Err(BaselineError::Entry(format!("non-finite points for id {}", id)));
    }
    if points.insert(id, value).is_some() {
        return Err(BaselineError::Entry(format!("duplicate id {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn id(n: i64) -> EntityId {
        EntityId::new(n).unwrap()
    }

    fn compress_lz4_frame(input: &[u8]) -> Vec<u8> {
        let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
        encoder.write_all(input).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_merge_adds_baseline() {
        let map = BaselineMap::new(HashMap::from([(id(1), 100.5)]));
        assert_eq!(map.all_time_points(id(1), 50.25), 150.75);
    }

    #[test]
    fn test_missing_id_uses_zero_baseline() {
        let map = BaselineMap::new(HashMap::from([(id(1), 100.5)]));
        assert_eq!(map.all_time_points(id(2), 7.5), 7.5);
    }

    #[test]
    fn test_merge_entity_row() {
        use crate::domain::{Aggregates, RawAmount};

        let map = BaselineMap::new(HashMap::from([(id(1), 10.0)]));
        let entity = EntityAggregate {
            id: id(1),
            current_points: RawAmount::fixed("2500000000000000000"),
            aggregates: Aggregates::User {
                vote_count: 3,
                power_level: 2,
            },
        };

        let row = map.merge(&entity, TimeMs::new(5)).unwrap();
        assert_eq!(row.all_time_points, 12.5);
        assert_eq!(row.baseline_points, 10.0);
        assert_eq!(row.current_points, 2.5);
        assert_eq!(row.updated_at_ms, TimeMs::new(5));

        let bad = EntityAggregate {
            current_points: RawAmount::fixed("12.5e3"),
            ..entity
        };
        assert!(matches!(map.merge(&bad, TimeMs::new(5)), Err(AmountError::Malformed(_))));
    }

    #[test]
    fn test_parse_csv_baseline() {
        let csv = b"id,points\n1, 100.5\n2,3\n";
        let map = BaselineMap::parse("season1.csv", csv).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(id(1)), 100.5);
        assert!(map.fingerprint().starts_with("hash:"));
    }

    #[test]
    fn test_parse_lz4_csv_baseline() {
        let lz4 = compress_lz4_frame(b"id,points\n7,12.25\n");
        let map = BaselineMap::parse("season1.csv.lz4", &lz4).unwrap();
        assert_eq!(map.get(id(7)), 12.25);
    }

    #[test]
    fn test_parse_json_object_and_array() {
        let map = BaselineMap::parse("s1.json", br#"{"1": 10, "22": 0.5}"#).unwrap();
        assert_eq!(map.get(id(22)), 0.5);

        let map =
            BaselineMap::parse("s1.json", br#"[{"id": 3, "points": 4.5}]"#).unwrap();
        assert_eq!(map.get(id(3)), 4.5);
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(matches!(
            BaselineMap::parse("s1.csv", b"id,points\n0,1\n"),
            Err(BaselineError::Entry(_))
        ));
        assert!(matches!(
            BaselineMap::parse("s1.csv", b"id,points\n1,1\n1,2\n"),
            Err(BaselineError::Entry(_))
        ));
        assert!(matches!(
            BaselineMap::parse("s1.txt", b""),
            Err(BaselineError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_merger_loads_file_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("baseline.json");
        std::fs::write(&path, br#"{"1": 10}"#).unwrap();

        let merger = BaselineMerger::new(BaselineSource::File(path.clone()));
        assert!(!merger.is_loaded());
        assert_eq!(merger.all_time_points(id(1), 2.5).await.unwrap(), 12.5);
        assert!(merger.is_loaded());

        // The file is never re-read once loaded.
        std::fs::remove_file(&path).unwrap();
        assert_eq!(merger.all_time_points(id(1), 1.0).await.unwrap(), 11.0);
    }

    #[tokio::test]
    async fn test_merger_retries_after_failed_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("baseline.csv");

        let merger = BaselineMerger::new(BaselineSource::File(path.clone()));
        assert!(matches!(
            merger.baseline().await,
            Err(BaselineError::Io { .. })
        ));
        assert!(!merger.is_loaded());

        std::fs::write(&path, b"id,points\n5,1.5\n").unwrap();
        assert_eq!(merger.baseline().await.unwrap().get(id(5)), 1.5);
    }
}
