// src/storage/sitemap.rs

//! Sitemap-based catalog documents.
//!
//! Snapshots and change-sets are written as `<urlset>` documents in the
//! sitemap namespace with ResourceSync (`rs:`) extensions. Above the
//! configured entry limit the entries are split into numbered chunk
//! documents listed by a `<sitemapindex>`.
//!
//! ```text
//! <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
//!         xmlns:rs="http://www.openarchives.org/rs/terms/">
//!   <url>
//!     <loc>http://example.org/res1</loc>
//!     <lastmod rs:type="updated">2012-07-25T17:13:46Z</lastmod>
//!     <rs:size>20</rs:size>
//!     <rs:fixity type="md5">...</rs:fixity>
//!   </url>
//! </urlset>
//! ```

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    Capabilities, Capability, ChangeSet, ChangeType, DocumentKind, Fixity, PublishConfig,
    Resource, ResourceContainer, Snapshot,
};
use crate::storage::DocumentStore;
use crate::utils::http::PageFetcher;
use crate::utils::mapper::Mapper;
use crate::utils::url::{UrlAuthority, file_path, get_domain, is_file_uri};
use crate::utils::xml::{self, Element};

pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
pub const RS_NS: &str = "http://www.openarchives.org/rs/terms/";
pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

const FIXITY_TYPES: [&str; 3] = ["md5", "sha-1", "sha-256"];

/// A parsed catalog: snapshot or change-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Catalog {
    Snapshot(Snapshot),
    ChangeSet(ChangeSet),
}

impl Catalog {
    fn empty(change_set: bool) -> Self {
        if change_set {
            Catalog::ChangeSet(ChangeSet::new())
        } else {
            Catalog::Snapshot(Snapshot::new())
        }
    }

    pub fn container(&self) -> &dyn ResourceContainer {
        match self {
            Catalog::Snapshot(s) => s,
            Catalog::ChangeSet(c) => c,
        }
    }

    fn container_mut(&mut self) -> &mut dyn ResourceContainer {
        match self {
            Catalog::Snapshot(s) => s,
            Catalog::ChangeSet(c) => c,
        }
    }

    pub fn is_change_set(&self) -> bool {
        matches!(self, Catalog::ChangeSet(_))
    }
}

/// What a read touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadSummary {
    /// Documents parsed, index included
    pub documents: usize,
    pub bytes_read: usize,
    /// Entries parsed, duplicates included
    pub entries: usize,
    pub change_set: bool,
}

/// What a write produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Keys written, chunks first and the index (or single document) last
    pub documents: Vec<String>,
    /// Set when entries were split across chunk documents
    pub index: Option<String>,
    pub entries: usize,
}

/// Encoder/decoder for catalog documents.
#[derive(Clone)]
pub struct CatalogCodec {
    max_entries: usize,
    allow_multifile: bool,
    pretty: bool,
    mapper: Mapper,
    fetcher: Option<Arc<dyn PageFetcher>>,
}

impl Default for CatalogCodec {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            allow_multifile: true,
            pretty: false,
            mapper: Mapper::default(),
            fetcher: None,
        }
    }
}

impl CatalogCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PublishConfig) -> Result<Self> {
        Ok(Self::new()
            .with_max_entries(config.max_sitemap_entries)
            .with_multifile(config.allow_multifile)
            .with_pretty(config.pretty_xml)
            .with_mapper(config.mapper()?))
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_multifile(mut self, allow: bool) -> Self {
        self.allow_multifile = allow;
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Mapping between published URIs and local paths.
    pub fn with_mapper(mut self, mapper: Mapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Fetcher for `http(s)` locations.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    // --- Writing ---

    /// Write `container` as one document named `basename`, or as chunks
    /// plus an index named `basename` when it exceeds the entry limit.
    pub async fn write<C>(
        &self,
        container: &C,
        store: &dyn DocumentStore,
        basename: &str,
    ) -> Result<WriteSummary>
    where
        C: ResourceContainer + Sync + ?Sized,
    {
        let entries: Vec<&Resource> = container.resources().collect();
        let mut summary = WriteSummary {
            entries: entries.len(),
            ..Default::default()
        };

        if entries.len() <= self.max_entries {
            let xml = self.urlset_xml(
                entries.into_iter(),
                container.capabilities(),
                container.is_change_set(),
            )?;
            log::info!("Writing sitemap {}...", store.location(basename));
            store.write_bytes(basename, xml.as_bytes()).await?;
            summary.documents.push(basename.to_string());
            return Ok(summary);
        }

        if !self.allow_multifile {
            return Err(AppError::config(format!(
                "{} entries exceed the limit of {} per sitemap but multifile output is disabled",
                entries.len(),
                self.max_entries
            )));
        }

        let (prefix, suffix) = match basename.strip_suffix(".xml") {
            Some(prefix) => (prefix, ".xml"),
            None => (basename, ".xml"),
        };
        let empty = Capabilities::new();
        let mut chunks = Vec::new();
        for (n, chunk) in entries.chunks(self.max_entries).enumerate() {
            let key = format!("{prefix}{n:05}{suffix}");
            let xml = self.urlset_xml(chunk.iter().copied(), &empty, container.is_change_set())?;
            log::info!("Writing sitemap {}...", store.location(&key));
            store.write_bytes(&key, xml.as_bytes()).await?;
            chunks.push((self.chunk_uri(store, &key), Utc::now()));
            summary.documents.push(key);
        }
        log::info!("Wrote {} sitemaps", chunks.len());

        let xml = self.index_xml(&chunks, container.capabilities(), container.is_change_set())?;
        log::info!("Writing sitemapindex {}...", store.location(basename));
        store.write_bytes(basename, xml.as_bytes()).await?;
        summary.documents.push(basename.to_string());
        summary.index = Some(basename.to_string());
        Ok(summary)
    }

    /// Published URI of a chunk, from its local location.
    fn chunk_uri(&self, store: &dyn DocumentStore, key: &str) -> String {
        let location = store.location(key);
        match self.mapper.dst_to_src(&location) {
            Ok(uri) => uri,
            Err(_) => {
                let uri = format!("file://{location}");
                log::error!(
                    "sitemapindex: can't map {} into URI space, writing {}",
                    location,
                    uri
                );
                uri
            }
        }
    }

    /// Serialize a container as a single `<urlset>` regardless of size.
    pub fn to_xml<C: ResourceContainer + ?Sized>(&self, container: &C) -> Result<String> {
        self.urlset_xml(
            container.resources(),
            container.capabilities(),
            container.is_change_set(),
        )
    }

    fn writer(&self) -> Writer<Vec<u8>> {
        if self.pretty {
            Writer::new_with_indent(Vec::new(), b' ', 2)
        } else {
            Writer::new(Vec::new())
        }
    }

    fn urlset_xml<'a>(
        &self,
        entries: impl Iterator<Item = &'a Resource>,
        capabilities: &Capabilities,
        change_set: bool,
    ) -> Result<String> {
        let mut writer = self.writer();
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("urlset");
        root.push_attribute(("xmlns", SITEMAP_NS));
        root.push_attribute(("xmlns:rs", RS_NS));
        if !capabilities.is_empty() {
            root.push_attribute(("xmlns:xhtml", XHTML_NS));
        }
        if change_set {
            root.push_attribute(("rs:type", "changeset"));
        }
        writer.write_event(Event::Start(root))?;
        write_capabilities(&mut writer, capabilities)?;
        for resource in entries {
            write_entry(&mut writer, resource, "url")?;
        }
        writer.write_event(Event::End(BytesEnd::new("urlset")))?;
        finish(writer)
    }

    /// Serialize a `<sitemapindex>` over `(location, written)` pairs.
    ///
    /// A change-set index carries the same root marker as its chunks so
    /// readers pick the right container before fetching any chunk.
    pub fn index_xml(
        &self,
        chunks: &[(String, DateTime<Utc>)],
        capabilities: &Capabilities,
        change_set: bool,
    ) -> Result<String> {
        let mut writer = self.writer();
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("sitemapindex");
        root.push_attribute(("xmlns", SITEMAP_NS));
        if !capabilities.is_empty() {
            root.push_attribute(("xmlns:xhtml", XHTML_NS));
        }
        if change_set {
            root.push_attribute(("xmlns:rs", RS_NS));
            root.push_attribute(("rs:type", "changeset"));
        }
        writer.write_event(Event::Start(root))?;
        write_capabilities(&mut writer, capabilities)?;
        for (location, written) in chunks {
            let entry = Resource::new(location.as_str()).with_timestamp(*written);
            write_entry(&mut writer, &entry, "sitemap")?;
        }
        writer.write_event(Event::End(BytesEnd::new("sitemapindex")))?;
        finish(writer)
    }

    // --- Reading ---

    /// Parse a single `<urlset>` document into `container`.
    ///
    /// An index yields [`AppError::UnexpectedDocument`]. Returns the number
    /// of entries parsed.
    pub fn parse_urlset_into<C: ResourceContainer>(
        &self,
        xml: &str,
        container: &mut C,
        source: &str,
    ) -> Result<usize> {
        let root = xml::parse_document(xml)?;
        match document_kind(&root)? {
            DocumentKind::UrlSet => fill_from(&root, container, source),
            found => Err(AppError::UnexpectedDocument {
                expected: DocumentKind::UrlSet,
                found,
            }),
        }
    }

    /// Parse a `<sitemapindex>` into its chunk entries and capabilities.
    ///
    /// A `<urlset>` yields [`AppError::UnexpectedDocument`].
    pub fn parse_index(&self, xml: &str) -> Result<(Vec<Resource>, Capabilities)> {
        let root = xml::parse_document(xml)?;
        match document_kind(&root)? {
            DocumentKind::Index => index_from(&root),
            found => Err(AppError::UnexpectedDocument {
                expected: DocumentKind::Index,
                found,
            }),
        }
    }

    /// Parse a single document held in memory.
    pub fn from_xml(&self, xml: &str, prefer_change_set: bool) -> Result<Catalog> {
        let root = xml::parse_document(xml)?;
        let mut catalog = Catalog::empty(is_change_set(&root, prefer_change_set));
        match document_kind(&root)? {
            DocumentKind::UrlSet => {
                fill_from(&root, catalog.container_mut(), "memory")?;
                Ok(catalog)
            }
            found => Err(AppError::UnexpectedDocument {
                expected: DocumentKind::UrlSet,
                found,
            }),
        }
    }

    /// Read a snapshot from a path, `file:` URI or URL, following an index.
    pub async fn read_snapshot(&self, location: &str) -> Result<(Snapshot, ReadSummary)> {
        match self.read(location, false).await? {
            (Catalog::Snapshot(snapshot), summary) => Ok((snapshot, summary)),
            (Catalog::ChangeSet(_), _) => Err(AppError::protocol(format!(
                "{location} is a change-set, not a snapshot"
            ))),
        }
    }

    /// Read a change-set from a path, `file:` URI or URL, following an index.
    pub async fn read_change_set(&self, location: &str) -> Result<(ChangeSet, ReadSummary)> {
        match self.read(location, true).await? {
            (Catalog::ChangeSet(change_set), summary) => Ok((change_set, summary)),
            (Catalog::Snapshot(_), _) => Err(AppError::protocol(format!(
                "{location} is not a change-set"
            ))),
        }
    }

    /// Read a catalog; the root `rs:type="changeset"` marker wins over
    /// `prefer_change_set`.
    pub async fn read(&self, location: &str, prefer_change_set: bool) -> Result<(Catalog, ReadSummary)> {
        let mut summary = ReadSummary::default();
        let body = self.load(location).await?;
        summary.bytes_read += body.len();
        summary.documents += 1;
        log::info!("Read sitemap/sitemapindex from {} ({} bytes)", location, body.len());

        let root = xml::parse_document(&body)?;
        let mut catalog = Catalog::empty(is_change_set(&root, prefer_change_set));
        summary.change_set = catalog.is_change_set();

        match document_kind(&root)? {
            DocumentKind::UrlSet => {
                summary.entries += fill_from(&root, catalog.container_mut(), location)?;
            }
            DocumentKind::Index => {
                if !self.allow_multifile {
                    return Err(AppError::config(format!(
                        "Got sitemapindex from {location} but support for sitemapindex disabled"
                    )));
                }
                let (chunks, capabilities) = index_from(&root)?;
                log::info!("Now reading {} sitemaps", chunks.len());
                for chunk in &chunks {
                    let chunk_location = self.resolve_chunk(location, &chunk.uri)?;
                    let body = self.load(&chunk_location).await?;
                    summary.bytes_read += body.len();
                    summary.documents += 1;
                    log::info!("Read sitemap from {} ({} bytes)", chunk_location, body.len());

                    let chunk_root = xml::parse_document(&body)?;
                    match document_kind(&chunk_root)? {
                        DocumentKind::UrlSet => {
                            summary.entries +=
                                fill_from(&chunk_root, catalog.container_mut(), &chunk_location)?;
                        }
                        found => {
                            return Err(AppError::UnexpectedDocument {
                                expected: DocumentKind::UrlSet,
                                found,
                            });
                        }
                    }
                }
                catalog.container_mut().capabilities_mut().extend(capabilities);
            }
        }
        Ok((catalog, summary))
    }

    /// Where to read a chunk listed by the index at `index_location`.
    fn resolve_chunk(&self, index_location: &str, chunk_uri: &str) -> Result<String> {
        if is_file_uri(index_location) {
            if is_file_uri(chunk_uri) {
                return Ok(chunk_uri.to_string());
            }
            return self.mapper.src_to_dst(chunk_uri);
        }
        let authority = UrlAuthority::new(index_location)
            .ok_or_else(|| AppError::protocol(format!("Bad index location {index_location}")))?;
        if !authority.has_authority_over(chunk_uri) {
            return Err(AppError::AuthorityViolation {
                index: index_location.to_string(),
                location: chunk_uri.to_string(),
            });
        }
        Ok(chunk_uri.to_string())
    }

    async fn load(&self, location: &str) -> Result<String> {
        if is_file_uri(location) {
            return Ok(tokio::fs::read_to_string(file_path(location)).await?);
        }
        let fetcher = self.fetcher.as_ref().ok_or_else(|| {
            AppError::config(format!("No fetcher configured to read {location}"))
        })?;
        log::debug!(
            "Fetching {} from {}",
            location,
            get_domain(location).unwrap_or_default()
        );
        fetcher.fetch(&Url::parse(location)?).await
    }
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| AppError::protocol(format!("generated XML is not UTF-8: {e}")))
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    let mut start = BytesStart::new(name);
    for attribute in attributes {
        start.push_attribute(*attribute);
    }
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_entry<W: Write>(writer: &mut Writer<W>, resource: &Resource, element: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(element)))?;
    write_text_element(writer, "loc", &[], &resource.uri)?;
    // A change tag is written even without a timestamp
    match (resource.change, resource.lastmod()) {
        (Some(ChangeType::Deleted), Some(lastmod)) => {
            write_text_element(writer, "expires", &[], &lastmod)?
        }
        (Some(ChangeType::Deleted), None) => {
            writer.write_event(Event::Empty(BytesStart::new("expires")))?
        }
        (Some(change), Some(lastmod)) => {
            write_text_element(writer, "lastmod", &[("rs:type", change.as_str())], &lastmod)?
        }
        (Some(change), None) => {
            let mut empty = BytesStart::new("lastmod");
            empty.push_attribute(("rs:type", change.as_str()));
            writer.write_event(Event::Empty(empty))?
        }
        (None, Some(lastmod)) => write_text_element(writer, "lastmod", &[], &lastmod)?,
        (None, None) => {}
    }
    if let Some(size) = resource.size {
        write_text_element(writer, "rs:size", &[], &size.to_string())?;
    }
    if let Some(fixity) = &resource.fixity {
        write_text_element(
            writer,
            "rs:fixity",
            &[("type", fixity.algorithm.as_str())],
            &fixity.digest,
        )?;
    }
    writer.write_event(Event::End(BytesEnd::new(element)))?;
    Ok(())
}

/// One `<xhtml:link>` per capability, in href order.
fn write_capabilities<W: Write>(writer: &mut Writer<W>, capabilities: &Capabilities) -> Result<()> {
    for (href, capability) in capabilities {
        let mut link = BytesStart::new("xhtml:link");
        link.push_attribute(("href", href.as_str()));
        if !capability.rel.is_empty() {
            link.push_attribute(("rel", capability.rel.join(" ").as_str()));
        }
        if !capability.types.is_empty() {
            link.push_attribute(("type", capability.types.join(" ").as_str()));
        }
        writer.write_event(Event::Empty(link))?;
    }
    Ok(())
}

fn document_kind(root: &Element) -> Result<DocumentKind> {
    if root.is(SITEMAP_NS, "urlset") {
        Ok(DocumentKind::UrlSet)
    } else if root.is(SITEMAP_NS, "sitemapindex") {
        Ok(DocumentKind::Index)
    } else {
        Err(AppError::protocol(format!(
            "XML root <{}> is not a sitemap or sitemapindex",
            root.name.local
        )))
    }
}

fn is_change_set(root: &Element, prefer_change_set: bool) -> bool {
    match root.attr_ns(RS_NS, "type") {
        Some("changeset") => true,
        Some(other) => {
            log::info!("Bad value of rs:type on root element ({}), ignoring", other);
            prefer_change_set
        }
        None => prefer_change_set,
    }
}

fn fill_from<C: ResourceContainer + ?Sized>(root: &Element, container: &mut C, source: &str) -> Result<usize> {
    let change_set = container.is_change_set();
    let mut parsed = 0;
    for url in root.children_named(SITEMAP_NS, "url") {
        container.add_parsed(resource_from(url, change_set)?, source);
        parsed += 1;
    }
    container.capabilities_mut().extend(capabilities_from(root)?);
    Ok(parsed)
}

fn index_from(root: &Element) -> Result<(Vec<Resource>, Capabilities)> {
    let chunks = root
        .children_named(SITEMAP_NS, "sitemap")
        .map(|e| resource_from(e, false))
        .collect::<Result<Vec<_>>>()?;
    Ok((chunks, capabilities_from(root)?))
}

fn resource_from(element: &Element, change_set: bool) -> Result<Resource> {
    let loc = element
        .child_text(SITEMAP_NS, "loc")
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AppError::protocol(format!("Missing <loc> element while parsing <{}>", element.name.local)))?;
    let mut resource = Resource::new(loc);
    let mut change = None;

    let lastmod = element.child(SITEMAP_NS, "lastmod");
    if let Some(lastmod) = lastmod {
        let text = lastmod.text.trim();
        if !text.is_empty() {
            resource = resource.with_lastmod(text)?;
        }
        match lastmod.attr_ns(RS_NS, "type") {
            Some("created") => change = Some(ChangeType::Created),
            Some("updated") => change = Some(ChangeType::Updated),
            Some(other) => log::warn!("Bad rs:type '{}' for <lastmod> for {}", other, loc),
            None => {}
        }
    }
    if let Some(expires) = element.child(SITEMAP_NS, "expires") {
        let text = expires.text.trim();
        if !text.is_empty() {
            resource = resource.with_lastmod(text)?;
        }
        change = Some(ChangeType::Deleted);
        if lastmod.is_some() {
            log::warn!("Got <lastmod> and <expires> for {}", loc);
        }
    }
    if change_set {
        resource.change = change;
    }

    if let Some(size) = element.child_text(RS_NS, "size") {
        let size = size
            .parse()
            .map_err(|_| AppError::protocol(format!("Invalid <rs:size> for {loc}")))?;
        resource = resource.with_size(size);
    }

    if let Some(fixity) = element.child(RS_NS, "fixity") {
        match fixity.attr("type") {
            Some(kind) if FIXITY_TYPES.contains(&kind) => {
                resource = resource.with_fixity(Fixity {
                    algorithm: kind.to_string(),
                    digest: fixity.text.trim().to_string(),
                });
            }
            Some(kind) => log::warn!("Unknown type ({}) in <rs:fixity> for {}", kind, loc),
            None => log::warn!("<rs:fixity> without type for {}", loc),
        }
    }
    Ok(resource)
}

fn capabilities_from(root: &Element) -> Result<Capabilities> {
    let mut capabilities = Capabilities::new();
    for link in root.children_named(XHTML_NS, "link") {
        let href = link
            .attr("href")
            .ok_or_else(|| AppError::protocol("xhtml:link without href"))?;
        let split = |value: Option<&str>| -> Vec<String> {
            value
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };
        capabilities.insert(
            href.to_string(),
            Capability {
                rel: split(link.attr("rel")),
                types: split(link.attr("type")),
            },
        );
    }
    Ok(capabilities)
}
