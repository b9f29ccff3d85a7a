//! In-memory backend / 内存后端
//!
//! Keeps everything in process memory. Useful for tests and as the reference
//! behaviour of the backend contract.

mod driver;
mod factory;
mod service;

pub use driver::{MemoryStorage, DEFAULT_PAGE_SIZE};
pub use factory::MemoryFactory;
pub use service::MemoryService;
