pub mod hashing;
pub mod net;
pub mod unpack;

// Re-exports for convenience
pub use hashing::{md5_bytes, md5_file};
pub use net::{FetchError, Fetcher, TextResponse};
pub use unpack::{extract_zip, UnpackError};
