use chrono::{DateTime, Utc};
use std::fmt;

pub mod compare;
pub mod destmap;
pub mod formats;
pub mod timeutil;
pub mod uri_utils;

/// The capability a ResourceSync sitemap declares in its `<rs:md>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Description,
    CapabilityList,
    ResourceList,
    ResourceDump,
    ChangeList,
    ChangeDump,
    ResourceDumpManifest,
    ChangeDumpManifest,
}

impl Capability {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "description" => Some(Self::Description),
            "capabilitylist" => Some(Self::CapabilityList),
            "resourcelist" => Some(Self::ResourceList),
            "resourcedump" => Some(Self::ResourceDump),
            "changelist" => Some(Self::ChangeList),
            "changedump" => Some(Self::ChangeDump),
            "resourcedump-manifest" => Some(Self::ResourceDumpManifest),
            "changedump-manifest" => Some(Self::ChangeDumpManifest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::CapabilityList => "capabilitylist",
            Self::ResourceList => "resourcelist",
            Self::ResourceDump => "resourcedump",
            Self::ChangeList => "changelist",
            Self::ChangeDump => "changedump",
            Self::ResourceDumpManifest => "resourcedump-manifest",
            Self::ChangeDumpManifest => "changedump-manifest",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of change a change-list entry announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A single digest from an `<rs:md hash="…">` attribute, e.g. `md5:1584abb…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub algorithm: String,
    pub hex: String,
}

impl Digest {
    /// Parse a (possibly space-separated, multi-algorithm) hash attribute.
    /// Prefers an md5 digest when several are listed.
    pub fn parse_attr(attr: &str) -> Option<Self> {
        let mut first = None;
        for part in attr.split_whitespace() {
            let (algorithm, hex) = part.split_once(':')?;
            if hex.is_empty() {
                continue;
            }
            let digest = Digest {
                algorithm: algorithm.to_ascii_lowercase(),
                hex: hex.to_ascii_lowercase(),
            };
            if digest.is_md5() {
                return Some(digest);
            }
            first.get_or_insert(digest);
        }
        first
    }

    pub fn is_md5(&self) -> bool {
        self.algorithm == "md5"
    }
}

/// A typed `<rs:ln rel="…" href="…"/>` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// One `<url>` or `<sitemap>` child of a sitemap document.
#[derive(Debug, Clone, Default)]
pub struct ResourceEntry {
    pub uri: String,
    /// Raw capability token from the entry-level `<rs:md>`, if any.
    /// Kept verbatim so callers can report unrecognized tokens.
    pub capability: Option<String>,
    pub lastmod: Option<DateTime<Utc>>,
    pub md_at: Option<DateTime<Utc>>,
    pub change: Option<ChangeKind>,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
    pub hash: Option<Digest>,
    /// Member path inside a dump archive (`path` attribute of a
    /// resourcedump-manifest entry).
    pub path: Option<String>,
    pub links: Vec<Link>,
}

impl ResourceEntry {
    pub fn kind(&self) -> Option<Capability> {
        self.capability.as_deref().and_then(Capability::parse)
    }

    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == rel)
            .map(|l| l.href.as_str())
    }

    /// The instant a change-list entry happened: `rs:md at` wins, then lastmod.
    pub fn change_datetime(&self) -> Option<DateTime<Utc>> {
        self.md_at.or(self.lastmod)
    }
}

/// A parsed ResourceSync sitemap, either a urlset or a sitemapindex.
#[derive(Debug, Clone)]
pub struct SitemapDoc {
    pub capability: Capability,
    pub is_index: bool,
    pub md_at: Option<DateTime<Utc>>,
    pub md_completed: Option<DateTime<Utc>>,
    pub md_from: Option<DateTime<Utc>>,
    pub md_until: Option<DateTime<Utc>>,
    pub links: Vec<Link>,
    pub resources: Vec<ResourceEntry>,
}

impl SitemapDoc {
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == rel)
            .map(|l| l.href.as_str())
    }

    pub fn described_by(&self) -> Option<&str> {
        self.link("describedby")
    }

    pub fn up(&self) -> Option<&str> {
        self.link("up")
    }

    pub fn index_link(&self) -> Option<&str> {
        self.link("index")
    }
}
