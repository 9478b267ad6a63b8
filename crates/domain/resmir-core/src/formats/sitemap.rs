use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::SitemapError;
use crate::timeutil::parse_w3c_datetime;
use crate::{Capability, ChangeKind, Digest, Link, ResourceEntry, SitemapDoc};

enum TextTarget {
    Loc,
    Lastmod,
}

struct DocBuilder {
    is_index: bool,
    capability_token: Option<String>,
    doc: SitemapDoc,
    current: Option<ResourceEntry>,
    text_target: Option<TextTarget>,
}

/// Parse a ResourceSync sitemap (urlset or sitemapindex). The codec performs
/// no I/O; callers hand it the document body.
pub fn parse_sitemap(text: &str) -> Result<SitemapDoc, SitemapError> {
    let mut reader = Reader::from_str(text);
    let mut builder: Option<DocBuilder> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => handle_open(&mut builder, &e, false)?,
            Event::Empty(e) => handle_open(&mut builder, &e, true)?,
            Event::Text(t) => {
                if let Some(b) = builder.as_mut() {
                    let value = t
                        .unescape()
                        .map_err(|e| SitemapError::Parse(e.to_string()))?;
                    b.take_text(value.trim());
                }
            }
            Event::End(e) => {
                if let Some(b) = builder.as_mut() {
                    b.close(e.local_name().as_ref())?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let builder =
        builder.ok_or_else(|| SitemapError::Schema("document has no root element".into()))?;
    builder.finish()
}

fn handle_open(
    builder: &mut Option<DocBuilder>,
    element: &BytesStart<'_>,
    self_closing: bool,
) -> Result<(), SitemapError> {
    let name = element.local_name();
    match builder.as_mut() {
        None => {
            let is_index = match name.as_ref() {
                b"urlset" => false,
                b"sitemapindex" => true,
                other => {
                    return Err(SitemapError::Schema(format!(
                        "unexpected root element <{}>",
                        String::from_utf8_lossy(other)
                    )))
                }
            };
            *builder = Some(DocBuilder::new(is_index));
        }
        Some(b) => {
            b.open(name.as_ref(), element, self_closing)?;
        }
    }
    Ok(())
}

impl DocBuilder {
    fn new(is_index: bool) -> Self {
        Self {
            is_index,
            capability_token: None,
            doc: SitemapDoc {
                capability: Capability::Description, // replaced in finish()
                is_index,
                md_at: None,
                md_completed: None,
                md_from: None,
                md_until: None,
                links: Vec::new(),
                resources: Vec::new(),
            },
            current: None,
            text_target: None,
        }
    }

    fn open(
        &mut self,
        name: &[u8],
        element: &BytesStart<'_>,
        self_closing: bool,
    ) -> Result<(), SitemapError> {
        match name {
            b"url" | b"sitemap" => {
                self.current = Some(ResourceEntry::default());
            }
            b"md" => self.take_md(element)?,
            b"ln" => self.take_ln(element)?,
            b"loc" if !self_closing => self.text_target = Some(TextTarget::Loc),
            b"lastmod" if !self_closing => self.text_target = Some(TextTarget::Lastmod),
            _ => {}
        }
        Ok(())
    }

    fn take_text(&mut self, value: &str) {
        let Some(entry) = self.current.as_mut() else {
            return;
        };
        match self.text_target {
            Some(TextTarget::Loc) => entry.uri = value.to_string(),
            Some(TextTarget::Lastmod) => entry.lastmod = parse_w3c_datetime(value),
            None => {}
        }
    }

    fn close(&mut self, name: &[u8]) -> Result<(), SitemapError> {
        match name {
            b"loc" | b"lastmod" => self.text_target = None,
            b"url" | b"sitemap" => {
                let entry = self
                    .current
                    .take()
                    .ok_or_else(|| SitemapError::Schema("stray closing tag".into()))?;
                if entry.uri.is_empty() {
                    return Err(SitemapError::Schema("entry without <loc>".into()));
                }
                self.doc.resources.push(entry);
            }
            _ => {}
        }
        Ok(())
    }

    fn take_md(&mut self, element: &BytesStart<'_>) -> Result<(), SitemapError> {
        for attr in element.attributes() {
            let attr = attr.map_err(|e| SitemapError::Parse(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| SitemapError::Parse(e.to_string()))?;
            let value = value.as_ref();
            match (attr.key.local_name().as_ref(), self.current.as_mut()) {
                (b"capability", Some(entry)) => entry.capability = Some(value.to_string()),
                (b"capability", None) => self.capability_token = Some(value.to_string()),
                (b"at", Some(entry)) => entry.md_at = parse_w3c_datetime(value),
                (b"at", None) => self.doc.md_at = parse_w3c_datetime(value),
                (b"completed", None) => self.doc.md_completed = parse_w3c_datetime(value),
                (b"from", None) => self.doc.md_from = parse_w3c_datetime(value),
                (b"until", None) => self.doc.md_until = parse_w3c_datetime(value),
                (b"change", Some(entry)) => entry.change = ChangeKind::parse(value),
                (b"hash", Some(entry)) => entry.hash = Digest::parse_attr(value),
                (b"length", Some(entry)) => entry.length = value.parse().ok(),
                (b"type", Some(entry)) => entry.mime_type = Some(value.to_string()),
                (b"path", Some(entry)) => entry.path = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(())
    }

    fn take_ln(&mut self, element: &BytesStart<'_>) -> Result<(), SitemapError> {
        let mut rel = None;
        let mut href = None;
        for attr in element.attributes() {
            let attr = attr.map_err(|e| SitemapError::Parse(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| SitemapError::Parse(e.to_string()))?;
            match attr.key.local_name().as_ref() {
                b"rel" => rel = Some(value.to_string()),
                b"href" => href = Some(value.to_string()),
                _ => {}
            }
        }
        let (Some(rel), Some(href)) = (rel, href) else {
            return Err(SitemapError::Schema("ln element without rel/href".into()));
        };
        let link = Link { rel, href };
        match self.current.as_mut() {
            Some(entry) => entry.links.push(link),
            None => self.doc.links.push(link),
        }
        Ok(())
    }

    fn finish(mut self) -> Result<SitemapDoc, SitemapError> {
        let token = self
            .capability_token
            .ok_or_else(|| SitemapError::Schema("missing capability declaration".into()))?;
        self.doc.capability = Capability::parse(&token)
            .ok_or_else(|| SitemapError::Schema(format!("unknown capability '{token}'")))?;
        self.doc.is_index = self.is_index;
        Ok(self.doc)
    }
}
