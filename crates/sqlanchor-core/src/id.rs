//! Identifier aliases.

/// Primary key type for persisted objects.
///
/// SQLite rowids are signed 64-bit integers, and every persisted type uses
/// a single-column auto-incrementing integer primary key, so one alias
/// covers the whole workspace. Cache keys handed out by an identity map
/// share this type even though they live in a separate namespace.
pub type Id = i64;

/// Counter for the number of live handles pointing at a cached object.
pub type HandleCounter = u32;
