use resmir_core::formats::SitemapError;
use resmir_core::Capability;
use resmir_infra::{FetchError, UnpackError};

/// Everything that can go wrong on one processing branch. Errors are
/// accumulated per branch and reported; they never cross between unrelated
/// branches as control flow.
#[derive(Debug, thiserror::Error)]
pub enum ProcError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Sitemap(#[from] SitemapError),
    #[error("expected capability {expected}, found {found} at {uri}")]
    WrongCapability {
        uri: String,
        expected: Capability,
        found: Capability,
    },
    #[error("unexpected capability '{token}' in {uri}")]
    UnexpectedCapability { uri: String, token: String },
    #[error("no destination for {0}")]
    Mapping(String),
    #[error("could not discover a resource sync method for {0}")]
    Discovery(String),
    #[error("apply failed for {uri}: {reason}")]
    Apply { uri: String, reason: String },
    #[error("unpack failed for {uri}: {source}")]
    Unpack {
        uri: String,
        #[source]
        source: UnpackError,
    },
    #[error("sync state error: {0}")]
    State(String),
    #[error("sitemap nesting deeper than {limit} at {uri}")]
    DepthExceeded { uri: String, limit: u32 },
}
