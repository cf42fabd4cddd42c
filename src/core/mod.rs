pub mod client_pool;
pub mod events;
pub mod probe;
pub mod query;
pub mod scheduler;
pub mod store;

pub use client_pool::ClientPool;
pub use events::EventDetector;
pub use query::QueryEngine;
pub use scheduler::Scheduler;
pub use store::Store;
