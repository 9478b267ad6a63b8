//! Wire-format parsing for ResourceSync sitemap documents.

mod sitemap;

pub use sitemap::parse_sitemap;

/// Failure modes of the sitemap codec. `Parse` is malformed XML; `Schema` is
/// well-formed XML that is not a valid ResourceSync sitemap.
#[derive(Debug, thiserror::Error)]
pub enum SitemapError {
    #[error("xml parse error: {0}")]
    Parse(String),
    #[error("sitemap schema error: {0}")]
    Schema(String),
}

impl From<quick_xml::Error> for SitemapError {
    fn from(err: quick_xml::Error) -> Self {
        SitemapError::Parse(err.to_string())
    }
}
