/// Game state storage and retrieval operations.
pub mod game_store;
/// Database model definitions.
pub mod models;
/// Transactional mutations shared by every storage backend.
pub mod mutations;
/// Storage abstraction layer for database operations.
pub mod storage;
