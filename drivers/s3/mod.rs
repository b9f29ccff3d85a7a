//! S3 compatible backend / S3兼容存储后端

mod config;
mod driver;
mod factory;

pub use config::S3Config;
pub use driver::S3Storage;
pub use factory::S3Factory;
