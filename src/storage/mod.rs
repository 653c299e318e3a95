mod kv;
mod schema;
mod types;

pub use kv::KvStore;
pub use schema::Database;
pub use types::DatabaseError;
