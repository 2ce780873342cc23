use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Candidate rows: `id`, `text`, `indexed_at` (ms) and a `dim`-wide vector.
pub fn candidate_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("indexed_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Width of the `vector` column, if the schema has one.
pub fn vector_dim(schema: &Schema) -> Option<i32> {
	match schema.field_with_name("vector").ok()?.data_type() {
		DataType::FixedSizeList(_, n) => Some(*n),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dim_round_trips_through_schema() {
		assert_eq!(vector_dim(&candidate_schema(384)), Some(384));
		assert_eq!(vector_dim(&Schema::empty()), None);
	}
}
