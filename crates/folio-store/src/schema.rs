//! Arrow schema definitions for `LanceDB` tables.

use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Name of the books table.
pub const BOOKS_TABLE: &str = "books";

/// Name of the chunks table.
pub const CHUNKS_TABLE: &str = "chunks";

/// Name of the vector column the similarity index is built on.
pub const VECTOR_COLUMN: &str = "vector";

/// Schema for the chunks table.
#[must_use]
pub fn chunks_schema(embedding_dim: usize) -> Schema {
    Schema::new(vec![
        // Identity
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("book_id", DataType::Utf8, false),
        // Content
        Field::new("text", DataType::Utf8, false),
        // Position
        Field::new("page_number", DataType::UInt32, false),
        Field::new("start_pos", DataType::UInt32, false),
        Field::new("end_pos", DataType::UInt32, false),
        // Embedding
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                embedding_dim as i32,
            ),
            false,
        ),
    ])
}

/// Schema for the books table.
#[must_use]
pub fn books_schema() -> Schema {
    Schema::new(vec![
        Field::new("book_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("author", DataType::Utf8, false),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_schema_vector_dimension() {
        let schema = chunks_schema(384);
        let field = schema.field_with_name(VECTOR_COLUMN).unwrap();
        match field.data_type() {
            DataType::FixedSizeList(_, size) => assert_eq!(*size, 384),
            other => panic!("unexpected vector type: {other:?}"),
        }
        assert!(schema.field_with_name("book_id").is_ok());
    }

    #[test]
    fn test_books_schema_fields() {
        let schema = books_schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["book_id", "title", "author"]);
    }
}
