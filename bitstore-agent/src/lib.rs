//! Bitstream storage backends.
//!
//! | Service             | Storage                        | `backend` values                          |
//! |---------------------|--------------------------------|-------------------------------------------|
//! | `CloudBitStore`     | Object store via a client      | `s3`, `aws-s3`, `b2`, `minio`, `transient` |
//! | `DirectoryBitStore` | Local directory tree           | `directory`                               |
//!
//! Build a service with [`from_config`], call `init` once, then share it.

pub mod backend;
pub mod config;
pub mod staging;

pub use backend::cloud::CloudBitStore;
pub use backend::directory::DirectoryBitStore;
pub use backend::s3::{S3Client, S3Config};
pub use backend::transient::TransientClient;
pub use backend::{connect, from_config};
pub use config::BitStoreConfig;
pub use staging::{StagedUpload, StagingArea};
