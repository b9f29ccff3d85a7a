//! Local filesystem backend / 本地存储后端
//!
//! Keys map onto files below a root directory. Multipart uploads are staged
//! in a hidden `.multipart` directory and concatenated on completion.

mod driver;
mod factory;
mod service;

pub use driver::{LocalStorage, DEFAULT_PAGE_SIZE};
pub use factory::LocalFactory;
pub use service::LocalService;
