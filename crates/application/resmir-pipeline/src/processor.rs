use resmir_core::formats::parse_sitemap;
use resmir_core::{Capability, SitemapDoc};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::context::Context;
use crate::dump;
use crate::error::ProcError;
use crate::sync::Syncer;

pub(crate) const ORIGIN_PROCESSOR: &str = "processor";

/// Lifecycle of a single sitemap node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    /// Nothing read yet.
    Init,
    /// Fetch or parse of the assigned URI failed.
    ReadError,
    /// The assigned URI was read and parsed with the expected capability.
    Document,
    /// Implied actions ran, but some branch recorded exceptions.
    ProcessedWithExceptions,
    /// Implied actions ran cleanly.
    Processed,
}

/// One node of the capability graph: a sitemap URI, the capability it must
/// declare, and the exceptions its branch accumulated.
pub struct Processor {
    pub source_uri: String,
    pub expected: Capability,
    pub status: ProcStatus,
    /// Discovery probes read silently; everything else reports failures.
    pub report_errors: bool,
    pub exceptions: Vec<ProcError>,
    doc: Option<SitemapDoc>,
    depth: u32,
}

impl Processor {
    pub fn new(source_uri: impl Into<String>, expected: Capability) -> Self {
        Self {
            source_uri: source_uri.into(),
            expected,
            status: ProcStatus::Init,
            report_errors: true,
            exceptions: Vec::new(),
            doc: None,
            depth: 0,
        }
    }

    /// A silent probe used during discovery.
    pub fn probe(source_uri: impl Into<String>, expected: Capability) -> Self {
        let mut proc = Self::new(source_uri, expected);
        proc.report_errors = false;
        proc
    }

    fn child(source_uri: String, expected: Capability, depth: u32) -> Self {
        let mut proc = Self::new(source_uri, expected);
        proc.depth = depth;
        proc
    }

    /// Build a processor from an already-fetched body (discovery reuses the
    /// response that probed the bare source URI).
    pub fn from_fetched(
        source_uri: impl Into<String>,
        expected: Capability,
        body: &str,
        ctx: &Context,
    ) -> Result<Self, ProcError> {
        let source_uri = source_uri.into();
        let doc = parse_sitemap(body)?;
        if doc.capability != expected {
            return Err(ProcError::WrongCapability {
                uri: source_uri,
                expected,
                found: doc.capability,
            });
        }
        ctx.notify_sitemap(&source_uri, doc.capability, body);
        let mut proc = Self::new(source_uri, expected);
        proc.status = ProcStatus::Document;
        proc.doc = Some(doc);
        Ok(proc)
    }

    pub fn document(&self) -> Option<&SitemapDoc> {
        self.doc.as_ref()
    }

    /// Fetch, parse, and verify the assigned URI. On success all registered
    /// sitemap listeners observe `(uri, capability, raw text)`.
    pub async fn read_source(&mut self, ctx: &Context) -> bool {
        if self.status == ProcStatus::Document {
            return true;
        }
        match Self::fetch_document(ctx, &self.source_uri, self.expected).await {
            Ok(doc) => {
                self.doc = Some(doc);
                self.status = ProcStatus::Document;
                true
            }
            Err(e) => {
                debug!(uri = %self.source_uri, error = %e, "could not read source");
                self.status = ProcStatus::ReadError;
                if self.report_errors {
                    ctx.reporter
                        .log_exception(&self.source_uri, ORIGIN_PROCESSOR, &e.to_string());
                }
                self.exceptions.push(e);
                false
            }
        }
    }

    async fn fetch_document(
        ctx: &Context,
        uri: &str,
        expected: Capability,
    ) -> Result<SitemapDoc, ProcError> {
        let response = ctx.fetcher.get_text(uri).await?;
        let doc = parse_sitemap(&response.body)?;
        if doc.capability != expected {
            return Err(ProcError::WrongCapability {
                uri: uri.to_string(),
                expected,
                found: doc.capability,
            });
        }
        ctx.notify_sitemap(uri, doc.capability, &response.body);
        Ok(doc)
    }

    fn take_document(&mut self) -> Option<SitemapDoc> {
        self.doc.take()
    }
}

#[derive(Debug)]
pub struct WalkOutcome {
    pub status: ProcStatus,
    pub exceptions: Vec<String>,
}

#[derive(Clone, Copy)]
enum SyncKind {
    Baseline,
    Incremental,
}

/// Depth-first traversal of one source's capability graph, driven by an
/// explicit work stack. Bounded depth and a visited set keep pathological
/// sources (cyclic or endlessly nested indexes) from looping forever.
pub struct SourceWalk<'a> {
    ctx: &'a Context,
    visited: HashSet<String>,
    exceptions: Vec<String>,
}

impl<'a> SourceWalk<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            visited: HashSet::new(),
            exceptions: Vec::new(),
        }
    }

    pub async fn run(&mut self, root: Processor) -> WalkOutcome {
        let mut stack = vec![root];
        while let Some(mut proc) = stack.pop() {
            if self.ctx.stop_requested() {
                debug!("stop requested, abandoning walk");
                break;
            }
            if !self.visited.insert(proc.source_uri.clone()) {
                debug!(uri = %proc.source_uri, "sitemap already visited, skipping");
                continue;
            }
            if proc.depth > self.ctx.settings.max_depth {
                self.exceptions.push(
                    ProcError::DepthExceeded {
                        uri: proc.source_uri.clone(),
                        limit: self.ctx.settings.max_depth,
                    }
                    .to_string(),
                );
                continue;
            }
            if !proc.read_source(self.ctx).await {
                self.drain(proc);
                continue;
            }
            let children = self.dispatch(&mut proc).await;
            self.drain(proc);
            // Reverse so the stack pops children in document order.
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        let status = if self.exceptions.is_empty() {
            ProcStatus::Processed
        } else {
            ProcStatus::ProcessedWithExceptions
        };
        WalkOutcome {
            status,
            exceptions: std::mem::take(&mut self.exceptions),
        }
    }

    fn drain(&mut self, proc: Processor) {
        for e in proc.exceptions {
            self.exceptions.push(e.to_string());
        }
    }

    async fn dispatch(&mut self, proc: &mut Processor) -> Vec<Processor> {
        let Some(doc) = proc.take_document() else {
            return Vec::new();
        };
        debug!(uri = %proc.source_uri, capability = %doc.capability, is_index = doc.is_index, "processing");
        match proc.expected {
            Capability::Description => doc
                .resources
                .iter()
                .map(|r| Processor::child(r.uri.clone(), Capability::CapabilityList, proc.depth + 1))
                .collect(),
            Capability::CapabilityList => capability_children(proc, &doc),
            Capability::ResourceList => {
                self.relay_or_sync(proc, &doc, SyncKind::Baseline).await
            }
            Capability::ChangeList => {
                self.relay_or_sync(proc, &doc, SyncKind::Incremental).await
            }
            Capability::ResourceDump => self.relay_or_dump(proc, &doc).await,
            other => {
                warn!(uri = %proc.source_uri, capability = %other, "capability not processed here");
                Vec::new()
            }
        }
    }

    /// Index documents relay to same-capability children; a plain list is
    /// handed to the syncer.
    async fn relay_or_sync(
        &mut self,
        proc: &mut Processor,
        doc: &SitemapDoc,
        kind: SyncKind,
    ) -> Vec<Processor> {
        if doc.is_index {
            return relay_children(proc, doc);
        }
        let syncer = Syncer::new(self.ctx);
        let errors = match kind {
            SyncKind::Baseline => syncer.baseline(&proc.source_uri, doc).await,
            SyncKind::Incremental => syncer.incremental(&proc.source_uri, doc).await,
        };
        proc.exceptions.extend(errors);
        proc.status = if proc.exceptions.is_empty() {
            ProcStatus::Processed
        } else {
            ProcStatus::ProcessedWithExceptions
        };
        Vec::new()
    }

    async fn relay_or_dump(&mut self, proc: &mut Processor, doc: &SitemapDoc) -> Vec<Processor> {
        if doc.is_index {
            return relay_children(proc, doc);
        }
        let errors = dump::process_dump(self.ctx, &proc.source_uri, doc).await;
        proc.exceptions.extend(errors);
        proc.status = if proc.exceptions.is_empty() {
            ProcStatus::Processed
        } else {
            ProcStatus::ProcessedWithExceptions
        };
        Vec::new()
    }
}

/// A capability list dispatches each entry on its own declared capability.
fn capability_children(proc: &mut Processor, doc: &SitemapDoc) -> Vec<Processor> {
    let mut children = Vec::new();
    for entry in &doc.resources {
        match entry.kind() {
            Some(
                capability @ (Capability::CapabilityList
                | Capability::ResourceList
                | Capability::ChangeList
                | Capability::ResourceDump),
            ) => {
                children.push(Processor::child(
                    entry.uri.clone(),
                    capability,
                    proc.depth + 1,
                ));
            }
            Some(Capability::ChangeDump) => {
                warn!(uri = %entry.uri, "changedump is accepted but not processed");
            }
            _ => {
                let token = entry
                    .capability
                    .clone()
                    .unwrap_or_else(|| "none".to_string());
                debug!(uri = %proc.source_uri, %token, "unexpected capability in capability list");
                proc.exceptions.push(ProcError::UnexpectedCapability {
                    uri: proc.source_uri.clone(),
                    token,
                });
            }
        }
    }
    children
}

/// Index relay: recurse only into entries declaring the parent's capability.
fn relay_children(proc: &mut Processor, doc: &SitemapDoc) -> Vec<Processor> {
    let mut children = Vec::new();
    for entry in &doc.resources {
        if entry.kind() == Some(proc.expected) {
            children.push(Processor::child(
                entry.uri.clone(),
                proc.expected,
                proc.depth + 1,
            ));
        } else {
            let token = entry
                .capability
                .clone()
                .unwrap_or_else(|| "none".to_string());
            proc.exceptions.push(ProcError::UnexpectedCapability {
                uri: proc.source_uri.clone(),
                token,
            });
        }
    }
    children
}
