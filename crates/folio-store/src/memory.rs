//! In-memory chunk store with optional JSON snapshots.
//!
//! [`MemoryStore`] keeps books and chunks in ordered maps and answers
//! similarity queries by brute-force cosine similarity. It is useful for:
//! - Tests that need a real store without a database
//! - Small corpora served from a single process
//! - Sharing an ingested corpus between `folio ingest` and `folio serve`
//!   through a snapshot file

use async_trait::async_trait;
use folio_core::{
    Book, Chunk, ChunkStore, NeighborQuery, ScoredChunk, StoreError, StoreStats, VectorQuery,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory chunk store.
///
/// Chunks are keyed by `chunk_id` in a `BTreeMap`, so equal similarities
/// always come back in the same order.
///
/// # Example
///
/// ```rust
/// use folio_store::MemoryStore;
/// use folio_core::ChunkStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new(384);
/// store.init().await?;
///
/// let stats = store.stats().await?;
/// assert_eq!(stats.total_chunks, 0);
/// assert!(stats.index_ready);
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    dimension: usize,
    state: Arc<RwLock<MemoryState>>,
    /// Snapshot file rewritten after every mutation
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryState {
    books: BTreeMap<String, Book>,
    chunks: BTreeMap<String, Chunk>,
    /// Whether the vector index has been provisioned
    indexed: bool,
}

/// On-disk representation of a [`MemoryStore`].
#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    #[serde(flatten)]
    state: MemoryState,
}

impl MemoryStore {
    /// Create an empty, non-persistent store with the given vector dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: Arc::new(RwLock::new(MemoryState::default())),
            snapshot: None,
        }
    }

    /// Open a store backed by a snapshot file.
    ///
    /// Loads the file if it exists. A snapshot written with a different
    /// dimension is rejected.
    pub async fn open(path: impl Into<PathBuf>, dimension: usize) -> Result<Self, StoreError> {
        let path = path.into();

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Init(format!("Failed to parse snapshot {}: {e}", path.display()))
                })?;
                if snapshot.dimension != dimension {
                    return Err(StoreError::Schema(format!(
                        "snapshot {} has dimension {}, expected {dimension}",
                        path.display(),
                        snapshot.dimension
                    )));
                }
                info!(
                    "Loaded snapshot {:?}: {} books, {} chunks",
                    path,
                    snapshot.state.books.len(),
                    snapshot.state.chunks.len()
                );
                snapshot.state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {:?}, starting empty", path);
                MemoryState::default()
            }
            Err(e) => {
                return Err(StoreError::Init(format!(
                    "Failed to read snapshot {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            dimension,
            state: Arc::new(RwLock::new(state)),
            snapshot: Some(path),
        })
    }

    /// Path of the snapshot file, if any.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Write the current state to the snapshot file.
    ///
    /// No-op for stores created with [`MemoryStore::new`].
    pub async fn persist(&self) -> Result<(), StoreError> {
        let state = self.state.read().await;
        self.write_snapshot(&state).await
    }

    async fn write_snapshot(&self, state: &MemoryState) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            dimension: usize,
            #[serde(flatten)]
            state: &'a MemoryState,
        }

        let bytes = serde_json::to_vec(&SnapshotRef {
            dimension: self.dimension,
            state,
        })
        .map_err(|e| StoreError::Insert(format!("Failed to serialize snapshot: {e}")))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Init(format!("Failed to create snapshot dir: {e}")))?;
        }

        // Write-then-rename; readers never observe a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Insert(format!("Failed to write snapshot: {e}")))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Insert(format!("Failed to replace snapshot: {e}")))?;

        debug!("Wrote snapshot {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }

    /// Compute cosine similarity between two vectors.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }

    fn check_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        match &chunk.vector {
            None => Err(StoreError::Schema(format!(
                "chunk {} has no vector",
                chunk.chunk_id
            ))),
            Some(v) if v.len() != self.dimension => Err(StoreError::Schema(format!(
                "chunk {} has dimension {}, expected {}",
                chunk.chunk_id,
                v.len(),
                self.dimension
            ))),
            Some(_) => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn init(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.indexed {
            state.indexed = true;
            self.write_snapshot(&state).await?;
        }
        debug!("MemoryStore initialized (dimension: {})", self.dimension);
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert_book(&self, book: &Book) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.books.insert(book.book_id.clone(), book.clone());
        self.write_snapshot(&state).await?;
        debug!("Upserted book {}", book.book_id);
        Ok(())
    }

    async fn get_book(&self, book_id: &str) -> Result<Option<Book>, StoreError> {
        let state = self.state.read().await;
        Ok(state.books.get(book_id).cloned())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;

        // Validate the whole batch before touching the map
        let mut seen = std::collections::BTreeSet::new();
        for chunk in chunks {
            self.check_chunk(chunk)?;
            if !state.books.contains_key(&chunk.book_id) {
                return Err(StoreError::Insert(format!(
                    "chunk {} references unknown book {}",
                    chunk.chunk_id, chunk.book_id
                )));
            }
            if state.chunks.contains_key(&chunk.chunk_id) || !seen.insert(&chunk.chunk_id) {
                return Err(StoreError::Conflict(format!(
                    "chunk {} already exists",
                    chunk.chunk_id
                )));
            }
        }

        for chunk in chunks {
            state.chunks.insert(chunk.chunk_id.clone(), chunk.clone());
        }
        self.write_snapshot(&state).await?;

        debug!("Inserted {} chunks", chunks.len());
        Ok(())
    }

    async fn search(&self, query: VectorQuery) -> Result<Vec<ScoredChunk>, StoreError> {
        let state = self.state.read().await;

        if !state.indexed {
            return Err(StoreError::Unavailable(
                "vector index does not exist".to_string(),
            ));
        }
        if query.embedding.len() != self.dimension {
            return Err(StoreError::Query(format!(
                "query vector has dimension {}, expected {}",
                query.embedding.len(),
                self.dimension
            )));
        }

        // Brute force search with cosine similarity
        let mut results: Vec<(f32, &Chunk)> = state
            .chunks
            .values()
            .filter_map(|chunk| {
                chunk
                    .vector
                    .as_ref()
                    .map(|v| (Self::cosine_similarity(&query.embedding, v), chunk))
            })
            .collect();

        // Stable sort: ties keep chunk_id order
        results.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let top: Vec<ScoredChunk> = results
            .into_iter()
            .take(query.limit)
            .map(|(similarity, chunk)| ScoredChunk {
                chunk: chunk.without_vector(),
                similarity,
            })
            .collect();

        debug!("Found {} results (limit {})", top.len(), query.limit);
        Ok(top)
    }

    async fn neighbors(&self, query: &NeighborQuery) -> Result<Vec<Chunk>, StoreError> {
        let state = self.state.read().await;

        let mut found: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|chunk| query.matches(chunk))
            .map(Chunk::without_vector)
            .collect();
        found.sort_by_key(|chunk| chunk.start_pos);

        debug!(
            "Neighbors of {} p{} [{}, {}]: {}",
            query.book_id,
            query.page_number,
            query.start_min,
            query.end_max,
            found.len()
        );
        Ok(found)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.state.read().await;

        Ok(StoreStats {
            total_books: state.books.len() as u64,
            total_chunks: state.chunks.len() as u64,
            index_ready: state.indexed,
        })
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let books = state.books.len();
        let chunks = state.chunks.len();

        *state = MemoryState::default();
        self.write_snapshot(&state).await?;

        info!("Reset store: removed {books} books and {chunks} chunks, dropped index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_book(book_id: &str) -> Book {
        Book {
            book_id: book_id.to_string(),
            title: "Crane Maintenance".to_string(),
            author: "Anon".to_string(),
        }
    }

    fn test_chunk(book_id: &str, page: u32, start: u32, vector: Vec<f32>) -> Chunk {
        Chunk::new(book_id, page, start, format!("text {page}-{start}")).with_vector(vector)
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new(3);
        store.init().await.unwrap();
        store.upsert_book(&test_book("b1")).await.unwrap();
        store.upsert_book(&test_book("b2")).await.unwrap();
        store
            .insert_chunks(&[
                test_chunk("b1", 1, 1, vec![1.0, 0.0, 0.0]),
                test_chunk("b1", 1, 4, vec![0.9, 0.1, 0.0]),
                test_chunk("b1", 2, 1, vec![0.0, 1.0, 0.0]),
                test_chunk("b2", 1, 1, vec![0.0, 0.0, 1.0]),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_memory_store_new() {
        let store = MemoryStore::new(384);
        assert_eq!(store.dimension(), 384);
        assert!(store.snapshot_path().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_insert_and_stats() {
        let store = seeded_store().await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_books, 2);
        assert_eq!(stats.total_chunks, 4);
        assert!(stats.index_ready);
    }

    #[tokio::test]
    async fn test_memory_store_search() {
        let store = seeded_store().await;

        let results = store
            .search(VectorQuery {
                embedding: vec![1.0, 0.0, 0.0],
                limit: 2,
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "b1_chunk_1_1");
        assert_eq!(results[1].chunk.chunk_id, "b1_chunk_1_4");
        assert!((results[0].similarity - 1.0).abs() < 0.001);
        assert!(results[0].similarity >= results[1].similarity);
        assert!(results[0].chunk.vector.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_search_ties_are_deterministic() {
        let store = MemoryStore::new(2);
        store.init().await.unwrap();
        store.upsert_book(&test_book("b1")).await.unwrap();
        store
            .insert_chunks(&[
                test_chunk("b1", 3, 1, vec![1.0, 0.0]),
                test_chunk("b1", 1, 1, vec![1.0, 0.0]),
                test_chunk("b1", 2, 1, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let query = VectorQuery {
            embedding: vec![1.0, 0.0],
            limit: 3,
        };
        let first = store.search(query.clone()).await.unwrap();
        let second = store.search(query).await.unwrap();

        let ids: Vec<_> = first.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, ["b1_chunk_1_1", "b1_chunk_2_1", "b1_chunk_3_1"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_memory_store_search_requires_index() {
        let store = MemoryStore::new(3);
        let result = store
            .search(VectorQuery {
                embedding: vec![1.0, 0.0, 0.0],
                limit: 1,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_memory_store_search_rejects_wrong_dimension() {
        let store = seeded_store().await;
        let result = store
            .search(VectorQuery {
                embedding: vec![1.0, 0.0],
                limit: 1,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn test_memory_store_neighbors() {
        let store = MemoryStore::new(2);
        store.init().await.unwrap();
        store.upsert_book(&test_book("b1")).await.unwrap();
        store
            .insert_chunks(&[
                test_chunk("b1", 4, 10, vec![1.0, 0.0]),
                test_chunk("b1", 4, 1, vec![1.0, 0.0]),
                test_chunk("b1", 4, 7, vec![1.0, 0.0]),
                test_chunk("b1", 4, 4, vec![1.0, 0.0]),
                test_chunk("b1", 5, 4, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        // Chunk [4, 7) with w = 3 reaches [1, 10]
        let found = store
            .neighbors(&NeighborQuery {
                book_id: "b1".to_string(),
                page_number: 4,
                start_min: 1,
                end_max: 10,
            })
            .await
            .unwrap();

        let starts: Vec<_> = found.iter().map(|c| c.start_pos).collect();
        assert_eq!(starts, [1, 4, 7]);
        assert!(found.iter().all(|c| c.page_number == 4));
        assert!(found.iter().all(|c| c.vector.is_none()));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_duplicate_chunk() {
        let store = seeded_store().await;

        let result = store
            .insert_chunks(&[test_chunk("b1", 1, 1, vec![1.0, 0.0, 0.0])])
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        // Duplicates inside one batch are rejected too, and nothing is written
        let dup = test_chunk("b2", 9, 1, vec![1.0, 0.0, 0.0]);
        let result = store.insert_chunks(&[dup.clone(), dup]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.stats().await.unwrap().total_chunks, 4);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_bad_vectors() {
        let store = seeded_store().await;

        let result = store
            .insert_chunks(&[test_chunk("b1", 7, 1, vec![1.0])])
            .await;
        assert!(matches!(result, Err(StoreError::Schema(_))));

        let result = store
            .insert_chunks(&[Chunk::new("b1", 7, 1, "no vector")])
            .await;
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_orphan_chunk() {
        let store = seeded_store().await;
        let result = store
            .insert_chunks(&[test_chunk("missing", 1, 1, vec![1.0, 0.0, 0.0])])
            .await;
        assert!(matches!(result, Err(StoreError::Insert(_))));
    }

    #[tokio::test]
    async fn test_memory_store_get_book() {
        let store = seeded_store().await;
        let book = store.get_book("b1").await.unwrap().unwrap();
        assert_eq!(book.title, "Crane Maintenance");
        assert!(store.get_book("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_reset() {
        let store = seeded_store().await;
        store.reset().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_books, 0);
        assert_eq!(stats.total_chunks, 0);
        assert!(!stats.index_ready);

        // Index is gone until init runs again
        let query = VectorQuery {
            embedding: vec![1.0, 0.0, 0.0],
            limit: 1,
        };
        assert!(store.search(query.clone()).await.is_err());
        store.init().await.unwrap();
        assert!(store.search(query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_snapshot_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("data").join("folio.json");

        {
            let store = MemoryStore::open(&path, 3).await.unwrap();
            store.init().await.unwrap();
            store.upsert_book(&test_book("b1")).await.unwrap();
            store
                .insert_chunks(&[test_chunk("b1", 1, 1, vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        assert!(path.exists());

        let reopened = MemoryStore::open(&path, 3).await.unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.total_books, 1);
        assert_eq!(stats.total_chunks, 1);
        assert!(stats.index_ready);

        let results = reopened
            .search(VectorQuery {
                embedding: vec![1.0, 0.0, 0.0],
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(results[0].chunk.chunk_id, "b1_chunk_1_1");
    }

    #[tokio::test]
    async fn test_memory_store_snapshot_dimension_mismatch() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("folio.json");

        let store = MemoryStore::open(&path, 3).await.unwrap();
        store.init().await.unwrap();

        let result = MemoryStore::open(&path, 384).await;
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[tokio::test]
    async fn test_memory_store_corrupt_snapshot() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("folio.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = MemoryStore::open(&path, 3).await;
        assert!(matches!(result, Err(StoreError::Init(_))));
    }

    #[test]
    fn test_cosine_similarity() {
        // Same vector = 1.0
        let sim = MemoryStore::cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((sim - 1.0).abs() < 0.001);

        // Orthogonal vectors = 0.0
        let sim = MemoryStore::cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 0.001);

        // Opposite vectors = -1.0
        let sim = MemoryStore::cosine_similarity(&[1.0, 0.0, 0.0], &[-1.0, 0.0, 0.0]);
        assert!((sim - (-1.0)).abs() < 0.001);

        // Zero vector
        let sim = MemoryStore::cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]);
        assert!(sim.abs() < f32::EPSILON);
    }
}
