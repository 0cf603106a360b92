// ABOUTME: PostgreSQL backend for the table store
// ABOUTME: Connection management plus the TableStore implementation

pub mod connection;
pub mod store;

pub use connection::connect;
pub use store::PostgresStore;
