//! Shared vocabulary for bitstream storage: the bitstream record, the
//! attribute vocabulary of `about`, storage-key resolution, the service and
//! object-store client traits, and the error types that cross them.

pub mod backend;
pub mod bitstream;
pub mod error;

pub use backend::{full_key, generate_id, BitStoreService, BlobMetadata, BlobReader, ObjectStoreClient};
pub use bitstream::{AttributeKey, AttributeValue, Attributes, Bitstream, CHECKSUM_ALGORITHM};
pub use error::{BitStoreError, ObjectStoreError, Operation};
