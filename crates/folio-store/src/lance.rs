//! `LanceDB` implementation of `ChunkStore`.

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use async_trait::async_trait;
use folio_core::{
    Book, Chunk, ChunkStore, NeighborQuery, ScoredChunk, StoreError, StoreStats, VectorQuery,
};
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table, connect};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::schema::{BOOKS_TABLE, CHUNKS_TABLE, VECTOR_COLUMN, books_schema, chunks_schema};

/// IVF-PQ training needs at least this many rows; below it searches are
/// exhaustive.
const MIN_INDEX_ROWS: usize = 256;

/// Chunk ids checked per duplicate-detection query.
const CONFLICT_CHECK_BATCH: usize = 500;

/// LanceDB-based chunk store.
pub struct LanceStore {
    /// Path to the `LanceDB` database
    db_path: PathBuf,
    /// Embedding dimension
    embedding_dim: usize,
    /// Database connection (lazy initialized)
    connection: RwLock<Option<Connection>>,
    /// Chunks table handle
    chunks_table: RwLock<Option<Table>>,
    /// Books table handle
    books_table: RwLock<Option<Table>>,
}

impl LanceStore {
    /// Create a new `LanceStore`.
    #[must_use]
    pub fn new(db_path: PathBuf, embedding_dim: usize) -> Self {
        Self {
            db_path,
            embedding_dim,
            connection: RwLock::new(None),
            chunks_table: RwLock::new(None),
            books_table: RwLock::new(None),
        }
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get or create connection.
    async fn get_connection(&self) -> Result<Connection, StoreError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn = self.connection.write().await;
        if let Some(ref c) = *conn {
            return Ok(c.clone());
        }

        let db_path_str = self.db_path.to_string_lossy().to_string();
        let new_conn = connect(&db_path_str)
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to LanceDB: {e}")))?;
        *conn = Some(new_conn.clone());
        Ok(new_conn)
    }

    /// Get or open a table, caching the handle in `slot`.
    async fn get_table(
        &self,
        slot: &RwLock<Option<Table>>,
        name: &str,
    ) -> Result<Table, StoreError> {
        {
            let table = slot.read().await;
            if let Some(ref t) = *table {
                return Ok(t.clone());
            }
        }

        let conn = self.get_connection().await?;
        let mut table_lock = slot.write().await;
        if let Some(ref t) = *table_lock {
            return Ok(t.clone());
        }

        let t = conn.open_table(name).execute().await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to open {name} table (run init?): {e}"))
        })?;
        *table_lock = Some(t.clone());
        Ok(t)
    }

    async fn get_chunks_table(&self) -> Result<Table, StoreError> {
        self.get_table(&self.chunks_table, CHUNKS_TABLE).await
    }

    async fn get_books_table(&self) -> Result<Table, StoreError> {
        self.get_table(&self.books_table, BOOKS_TABLE).await
    }

    /// Convert chunks to Arrow `RecordBatch`.
    fn chunks_to_batch(&self, chunks: &[Chunk]) -> Result<RecordBatch, StoreError> {
        let chunk_ids: Vec<_> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let book_ids: Vec<_> = chunks.iter().map(|c| c.book_id.as_str()).collect();
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        let pages: Vec<_> = chunks.iter().map(|c| c.page_number).collect();
        let starts: Vec<_> = chunks.iter().map(|c| c.start_pos).collect();
        let ends: Vec<_> = chunks.iter().map(|c| c.end_pos).collect();

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match &chunk.vector {
                Some(v) if v.len() == self.embedding_dim => vectors.push(v.as_slice()),
                Some(v) => {
                    return Err(StoreError::Schema(format!(
                        "chunk {} has dimension {}, expected {}",
                        chunk.chunk_id,
                        v.len(),
                        self.embedding_dim
                    )));
                }
                None => {
                    return Err(StoreError::Schema(format!(
                        "chunk {} has no vector",
                        chunk.chunk_id
                    )));
                }
            }
        }

        let schema = Arc::new(chunks_schema(self.embedding_dim));
        let vector_array = build_vector_array(&vectors, self.embedding_dim);

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(StringArray::from(book_ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(UInt32Array::from(pages)),
                Arc::new(UInt32Array::from(starts)),
                Arc::new(UInt32Array::from(ends)),
                vector_array,
            ],
        )
        .map_err(|e| StoreError::Insert(format!("Failed to create RecordBatch: {e}")))
    }

    /// Convert a book to Arrow `RecordBatch`.
    fn book_to_batch(book: &Book) -> Result<RecordBatch, StoreError> {
        RecordBatch::try_new(
            Arc::new(books_schema()),
            vec![
                Arc::new(StringArray::from(vec![book.book_id.as_str()])),
                Arc::new(StringArray::from(vec![book.title.as_str()])),
                Arc::new(StringArray::from(vec![book.author.as_str()])),
            ],
        )
        .map_err(|e| StoreError::Insert(format!("Failed to create book RecordBatch: {e}")))
    }

    /// Fail if any of the given chunk ids is already stored.
    async fn check_conflicts(&self, table: &Table, chunks: &[Chunk]) -> Result<(), StoreError> {
        for batch in chunks.chunks(CONFLICT_CHECK_BATCH) {
            let ids = batch
                .iter()
                .map(|c| format!("'{}'", escape(&c.chunk_id)))
                .collect::<Vec<_>>()
                .join(", ");
            let existing = table
                .count_rows(Some(format!("chunk_id IN ({ids})")))
                .await
                .map_err(|e| StoreError::Query(format!("Failed to check chunk ids: {e}")))?;
            if existing > 0 {
                return Err(StoreError::Conflict(format!(
                    "{existing} of {} chunks already exist",
                    batch.len()
                )));
            }
        }
        Ok(())
    }

    /// Build the cosine IVF-PQ index once there is enough data to train it.
    async fn ensure_vector_index(&self, table: &Table) -> Result<(), StoreError> {
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Query(format!("Failed to count chunks: {e}")))?;
        if rows < MIN_INDEX_ROWS || has_vector_index(table).await? {
            return Ok(());
        }

        info!("Creating cosine vector index over {rows} chunks");
        table
            .create_index(
                &[VECTOR_COLUMN],
                Index::IvfPq(IvfPqIndexBuilder::default().distance_type(DistanceType::Cosine)),
            )
            .execute()
            .await
            .map_err(|e| StoreError::Init(format!("Failed to create vector index: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for LanceStore {
    async fn init(&self) -> Result<(), StoreError> {
        info!("Initializing LanceDB at {:?}", self.db_path);

        // Ensure directory exists
        if let Some(parent) = self.db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Init(format!("Failed to create db directory: {e}")))?;
        }

        let conn = self.get_connection().await?;

        let tables = conn
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Init(format!("Failed to list tables: {e}")))?;

        if !tables.iter().any(|t| t == CHUNKS_TABLE) {
            info!("Creating chunks table");
            conn.create_empty_table(CHUNKS_TABLE, Arc::new(chunks_schema(self.embedding_dim)))
                .execute()
                .await
                .map_err(|e| StoreError::Init(format!("Failed to create chunks table: {e}")))?;
        }

        if !tables.iter().any(|t| t == BOOKS_TABLE) {
            info!("Creating books table");
            conn.create_empty_table(BOOKS_TABLE, Arc::new(books_schema()))
                .execute()
                .await
                .map_err(|e| StoreError::Init(format!("Failed to create books table: {e}")))?;
        }

        let table = self.get_chunks_table().await?;
        self.ensure_vector_index(&table).await?;

        info!("LanceDB initialized successfully");
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.embedding_dim
    }

    async fn upsert_book(&self, book: &Book) -> Result<(), StoreError> {
        debug!("Upserting book {}", book.book_id);

        let table = self.get_books_table().await?;
        table
            .delete(&format!("book_id = '{}'", escape(&book.book_id)))
            .await
            .map_err(|e| StoreError::Delete(format!("Failed to replace book: {e}")))?;

        let batch = Self::book_to_batch(book)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| StoreError::Insert(format!("Failed to insert book: {e}")))?;

        Ok(())
    }

    async fn get_book(&self, book_id: &str) -> Result<Option<Book>, StoreError> {
        let table = self.get_books_table().await?;

        let mut results = table
            .query()
            .only_if(format!("book_id = '{}'", escape(book_id)))
            .limit(1)
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to query book: {e}")))?;

        if let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to fetch book: {e}")))?
        {
            return Ok(batch_to_books(&batch)?.into_iter().next());
        }

        Ok(None)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        debug!("Inserting {} chunks", chunks.len());

        let table = self.get_chunks_table().await?;
        let batch = self.chunks_to_batch(chunks)?;
        self.check_conflicts(&table, chunks).await?;

        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| StoreError::Insert(format!("Failed to insert chunks: {e}")))?;

        if let Err(e) = self.ensure_vector_index(&table).await {
            warn!("Vector index not built yet: {e}");
        }

        debug!("Successfully inserted {} chunks", chunks.len());
        Ok(())
    }

    async fn search(&self, query: VectorQuery) -> Result<Vec<ScoredChunk>, StoreError> {
        debug!("Searching with limit {}", query.limit);

        if query.embedding.len() != self.embedding_dim {
            return Err(StoreError::Query(format!(
                "query vector has dimension {}, expected {}",
                query.embedding.len(),
                self.embedding_dim
            )));
        }

        let table = self.get_chunks_table().await?;

        let mut results = table
            .vector_search(query.embedding)
            .map_err(|e| StoreError::Query(format!("Failed to create search query: {e}")))?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(query.limit)
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to execute search: {e}")))?;

        let mut scored = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to fetch results: {e}")))?
        {
            scored.extend(batch_to_scored(&batch)?);
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!("Found {} results", scored.len());
        Ok(scored)
    }

    async fn neighbors(&self, query: &NeighborQuery) -> Result<Vec<Chunk>, StoreError> {
        let table = self.get_chunks_table().await?;

        let filter = format!(
            "book_id = '{}' AND page_number = {} AND start_pos >= {} AND end_pos <= {}",
            escape(&query.book_id),
            query.page_number,
            query.start_min,
            query.end_max
        );

        let mut results = table
            .query()
            .only_if(filter)
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to query neighbors: {e}")))?;

        let mut chunks = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to fetch neighbors: {e}")))?
        {
            chunks.extend(batch_to_chunks(&batch, false)?);
        }

        chunks.sort_by_key(|c| c.start_pos);
        Ok(chunks)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.get_connection().await?;
        let tables = conn
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to list tables: {e}")))?;

        if !tables.iter().any(|t| t == CHUNKS_TABLE) {
            return Ok(StoreStats::default());
        }

        let chunks_table = self.get_chunks_table().await?;
        let books_table = self.get_books_table().await?;

        let total_chunks = chunks_table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Query(format!("Failed to count chunks: {e}")))?;
        let total_books = books_table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Query(format!("Failed to count books: {e}")))?;

        Ok(StoreStats {
            total_books: total_books as u64,
            total_chunks: total_chunks as u64,
            index_ready: true,
        })
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let conn = self.get_connection().await?;
        let tables = conn
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to list tables: {e}")))?;

        for name in [CHUNKS_TABLE, BOOKS_TABLE] {
            if tables.iter().any(|t| t == name) {
                conn.drop_table(name)
                    .await
                    .map_err(|e| StoreError::Delete(format!("Failed to drop {name} table: {e}")))?;
            }
        }

        *self.chunks_table.write().await = None;
        *self.books_table.write().await = None;

        info!("Dropped chunks and books tables at {:?}", self.db_path);
        Ok(())
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

async fn has_vector_index(table: &Table) -> Result<bool, StoreError> {
    let indices = table
        .list_indices()
        .await
        .map_err(|e| StoreError::Query(format!("Failed to list indices: {e}")))?;
    Ok(indices
        .iter()
        .any(|idx| idx.columns.iter().any(|c| c == VECTOR_COLUMN)))
}

fn build_vector_array(vectors: &[&[f32]], dim: usize) -> ArrayRef {
    use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};

    let mut builder = FixedSizeListBuilder::new(Float32Builder::new(), dim as i32);

    for values in vectors {
        builder.values().append_slice(values);
        builder.append(true);
    }

    Arc::new(builder.finish())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Query(format!("Missing column {name}")))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
        .ok_or_else(|| StoreError::Query(format!("Missing column {name}")))
}

fn batch_to_chunks(batch: &RecordBatch, with_vector: bool) -> Result<Vec<Chunk>, StoreError> {
    let chunk_ids = string_column(batch, "chunk_id")?;
    let book_ids = string_column(batch, "book_id")?;
    let texts = string_column(batch, "text")?;
    let pages = u32_column(batch, "page_number")?;
    let starts = u32_column(batch, "start_pos")?;
    let ends = u32_column(batch, "end_pos")?;
    let vectors = batch
        .column_by_name(VECTOR_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

    let mut chunks = Vec::with_capacity(batch.num_rows());

    for i in 0..batch.num_rows() {
        let vector = if with_vector {
            vectors.and_then(|arr| {
                if arr.is_null(i) {
                    None
                } else {
                    arr.value(i)
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|values| values.values().to_vec())
                }
            })
        } else {
            None
        };

        chunks.push(Chunk {
            chunk_id: chunk_ids.value(i).to_string(),
            book_id: book_ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            page_number: pages.value(i),
            start_pos: starts.value(i),
            end_pos: ends.value(i),
            vector,
        });
    }

    Ok(chunks)
}

fn batch_to_scored(batch: &RecordBatch) -> Result<Vec<ScoredChunk>, StoreError> {
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| StoreError::Query("Missing column _distance".to_string()))?;

    Ok(batch_to_chunks(batch, false)?
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| ScoredChunk {
            chunk,
            // Cosine distance is 1 - cosine similarity
            similarity: 1.0 - distances.value(i),
        })
        .collect())
}

fn batch_to_books(batch: &RecordBatch) -> Result<Vec<Book>, StoreError> {
    let book_ids = string_column(batch, "book_id")?;
    let titles = string_column(batch, "title")?;
    let authors = string_column(batch, "author")?;

    Ok((0..batch.num_rows())
        .map(|i| Book {
            book_id: book_ids.value(i).to_string(),
            title: titles.value(i).to_string(),
            author: authors.value(i).to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEST_DIM: usize = 8;

    fn test_book(book_id: &str) -> Book {
        Book {
            book_id: book_id.to_string(),
            title: "Hoisting Equipment".to_string(),
            author: "O'Neil".to_string(),
        }
    }

    fn axis_embedding(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; TEST_DIM];
        v[axis % TEST_DIM] = 1.0;
        v
    }

    fn test_chunk(book_id: &str, page: u32, start: u32, axis: usize) -> Chunk {
        Chunk::new(book_id, page, start, format!("page {page} sentence {start}"))
            .with_vector(axis_embedding(axis))
    }

    async fn new_store() -> (tempfile::TempDir, LanceStore) {
        let temp = tempdir().unwrap();
        let store = LanceStore::new(temp.path().join("test.lance"), TEST_DIM);
        store.init().await.unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_init_creates_tables() {
        let (_temp, store) = new_store().await;

        let conn = store.get_connection().await.unwrap();
        let tables = conn.table_names().execute().await.unwrap();
        assert!(tables.contains(&"chunks".to_string()));
        assert!(tables.contains(&"books".to_string()));
    }

    #[tokio::test]
    async fn test_init_idempotent() {
        let (_temp, store) = new_store().await;
        assert!(store.init().await.is_ok());
    }

    #[tokio::test]
    async fn test_upsert_and_get_book() {
        let (_temp, store) = new_store().await;

        store.upsert_book(&test_book("b1")).await.unwrap();
        store.upsert_book(&test_book("b1")).await.unwrap();

        let book = store.get_book("b1").await.unwrap().unwrap();
        assert_eq!(book.author, "O'Neil");
        assert!(store.get_book("missing").await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().total_books, 1);
    }

    #[tokio::test]
    async fn test_search_returns_nearest_first() {
        let (_temp, store) = new_store().await;
        store.upsert_book(&test_book("b1")).await.unwrap();
        store
            .insert_chunks(&[
                test_chunk("b1", 1, 1, 0),
                test_chunk("b1", 1, 4, 1),
                test_chunk("b1", 2, 1, 2),
            ])
            .await
            .unwrap();

        let results = store
            .search(VectorQuery {
                embedding: axis_embedding(1),
                limit: 2,
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "b1_chunk_1_4");
        assert!((results[0].similarity - 1.0).abs() < 0.001);
        assert!(results[0].chunk.vector.is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let (_temp, store) = new_store().await;
        store.upsert_book(&test_book("b1")).await.unwrap();
        store
            .insert_chunks(&[test_chunk("b1", 1, 1, 0)])
            .await
            .unwrap();

        let result = store.insert_chunks(&[test_chunk("b1", 1, 1, 0)]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_insert_rejects_wrong_dimension() {
        let (_temp, store) = new_store().await;
        let chunk = Chunk::new("b1", 1, 1, "x").with_vector(vec![1.0]);
        let result = store.insert_chunks(&[chunk]).await;
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[tokio::test]
    async fn test_neighbors_ordered_and_bounded() {
        let (_temp, store) = new_store().await;
        store.upsert_book(&test_book("b1")).await.unwrap();
        store
            .insert_chunks(&[
                test_chunk("b1", 4, 7, 0),
                test_chunk("b1", 4, 1, 1),
                test_chunk("b1", 4, 4, 2),
                test_chunk("b1", 4, 10, 3),
                test_chunk("b1", 3, 4, 4),
            ])
            .await
            .unwrap();

        let found = store
            .neighbors(&NeighborQuery {
                book_id: "b1".to_string(),
                page_number: 4,
                start_min: 3,
                end_max: 10,
            })
            .await
            .unwrap();

        let starts: Vec<_> = found.iter().map(|c| c.start_pos).collect();
        assert_eq!(starts, [4, 7]);
    }

    #[tokio::test]
    async fn test_reset_drops_everything() {
        let (_temp, store) = new_store().await;
        store.upsert_book(&test_book("b1")).await.unwrap();
        store
            .insert_chunks(&[test_chunk("b1", 1, 1, 0)])
            .await
            .unwrap();

        store.reset().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert!(!stats.index_ready);

        let result = store
            .search(VectorQuery {
                embedding: axis_embedding(0),
                limit: 1,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        store.init().await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_books, 0);
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape("O'Neil"), "O''Neil");
        assert_eq!(escape("plain"), "plain");
    }
}
