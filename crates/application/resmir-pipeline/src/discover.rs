use reqwest::header::HeaderMap;
use resmir_core::Capability;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::context::Context;
use crate::processor::{Processor, ProcStatus};

pub const WELLKNOWN_RESOURCE: &str = ".well-known/resourcesync";

/// The well-known ResourceSync entry point beneath a bare source URI.
pub fn well_known_uri(base_uri: &str) -> String {
    format!("{}/{WELLKNOWN_RESOURCE}", base_uri.trim_end_matches('/'))
}

/// Five-step entry-point discovery for a bare source URI. Steps run in a
/// fixed order and the first hit wins; probes never write reporter rows.
pub struct Discoverer<'a> {
    ctx: &'a Context,
    uri: String,
}

impl<'a> Discoverer<'a> {
    pub fn new(ctx: &'a Context, uri: impl Into<String>) -> Self {
        Self {
            ctx,
            uri: uri.into(),
        }
    }

    /// Returns the root processor for this source, or `None` when every
    /// discovery step failed.
    pub async fn discover(&self) -> Option<Processor> {
        // 1. The well-known URI leads to a source description.
        if let Some(processor) = self.try_wellknown().await {
            debug!(uri = %self.uri, "discovered via well-known");
            return Some(processor);
        }

        // Steps 2-4 all work from one GET of the bare URI.
        match self.ctx.fetcher.get_text(&self.uri).await {
            Ok(response) => {
                // 2. The URI itself is a capability list.
                if let Some(processor) = self.try_capability_doc(&response.body) {
                    debug!(uri = %self.uri, "discovered as capability list");
                    return Some(processor);
                }
                // 3. An HTML page linking the capability list.
                if let Some(processor) = self.try_html_link(&response.body) {
                    debug!(uri = %self.uri, "discovered via html link");
                    return Some(processor);
                }
                // 4. A Link response header naming the capability list.
                if let Some(processor) = self.try_link_header(&response.headers) {
                    debug!(uri = %self.uri, "discovered via link header");
                    return Some(processor);
                }
            }
            Err(e) => debug!(uri = %self.uri, error = %e, "bare uri not readable"),
        }

        // 5. robots.txt pointing at a resource list.
        if let Some(processor) = self.try_robots().await {
            debug!(uri = %self.uri, "discovered via robots.txt");
            return Some(processor);
        }

        warn!(uri = %self.uri, "could not discover a resource sync method");
        None
    }

    async fn try_wellknown(&self) -> Option<Processor> {
        let mut probe = Processor::probe(well_known_uri(&self.uri), Capability::Description);
        if probe.read_source(self.ctx).await && probe.status == ProcStatus::Document {
            probe.report_errors = true;
            Some(probe)
        } else {
            None
        }
    }

    fn try_capability_doc(&self, body: &str) -> Option<Processor> {
        Processor::from_fetched(self.uri.clone(), Capability::CapabilityList, body, self.ctx).ok()
    }

    fn try_html_link(&self, body: &str) -> Option<Processor> {
        let selector = Selector::parse(r#"link[rel="resourcesync"]"#).ok()?;
        let href = {
            let html = Html::parse_document(body);
            html.select(&selector)
                .find_map(|element| element.value().attr("href").map(str::to_string))
        }?;
        let target = self.resolve_href(&href)?;
        Some(Processor::new(target, Capability::CapabilityList))
    }

    fn try_link_header(&self, headers: &HeaderMap) -> Option<Processor> {
        let header = headers.get(reqwest::header::LINK)?.to_str().ok()?;
        let target = link_header_target(header, "resourcesync")?;
        let target = self.resolve_href(&target)?;
        Some(Processor::new(target, Capability::CapabilityList))
    }

    async fn try_robots(&self) -> Option<Processor> {
        let robots_uri = format!("{}/robots.txt", self.uri.trim_end_matches('/'));
        let response = match self.ctx.fetcher.get_text(&robots_uri).await {
            Ok(response) => response,
            Err(e) => {
                debug!(uri = %robots_uri, error = %e, "no robots.txt");
                return None;
            }
        };
        let mut sitemaps = response.body.lines().filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
        });
        let first = sitemaps.next()?;
        if sitemaps.next().is_some() {
            warn!(uri = %robots_uri, "robots.txt names several sitemaps, using the first");
        }
        Some(Processor::new(first, Capability::ResourceList))
    }

    /// Capability lists may be advertised with relative hrefs.
    fn resolve_href(&self, href: &str) -> Option<String> {
        if Url::parse(href).is_ok() {
            return Some(href.to_string());
        }
        Url::parse(&self.uri)
            .ok()?
            .join(href)
            .ok()
            .map(|u| u.to_string())
    }
}

/// Pick the target of a `Link` header entry with the wanted relation, e.g.
/// `<http://x/cap.xml>; rel="resourcesync"`.
fn link_header_target(header: &str, wanted_rel: &str) -> Option<String> {
    for part in header.split(',') {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        for param in pieces {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.trim() != "rel" {
                continue;
            }
            let value = value.trim().trim_matches('"');
            if value.split_whitespace().any(|rel| rel == wanted_rel) {
                return Some(target.to_string());
            }
        }
    }
    None
}
