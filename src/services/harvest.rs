// src/services/harvest.rs

//! OAI-PMH harvest client.
//!
//! Issues `Identify` and `ListRecords` requests against a single endpoint
//! and turns each page into [`ChangeRecord`]s. Pagination follows
//! `resumptionToken`s until a page carries none. A 503 answer is the only
//! condition that is retried automatically.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ChangeRecord, Granularity, HarvestConfig, RecordHeader};
use crate::utils::datetime::parse_w3c;
use crate::utils::http::{HttpFetcher, PageFetcher};
use crate::utils::url::same_authority;
use crate::utils::xml::{self, Element};

pub const OAI_NS: &str = "http://www.openarchives.org/OAI/2.0/";
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

static RESUMPTION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:\w+:)?resumptionToken[^>]*>([^<]+)</(?:\w+:)?resumptionToken>")
        .expect("valid regex")
});

/// Client for one harvest endpoint.
#[derive(Clone)]
pub struct HarvestClient {
    fetcher: Arc<dyn PageFetcher>,
    endpoint: Url,
    metadata_prefix: String,
    granularity: Option<Granularity>,
    default_retry: Duration,
    cancel: CancellationToken,
}

impl HarvestClient {
    /// Create a client for `endpoint` using the given fetcher.
    pub fn new(fetcher: Arc<dyn PageFetcher>, endpoint: &str) -> Result<Self> {
        Ok(Self {
            fetcher,
            endpoint: Url::parse(endpoint)?,
            metadata_prefix: "oai_dc".to_string(),
            granularity: None,
            default_retry: Duration::from_secs(10),
            cancel: CancellationToken::new(),
        })
    }

    /// Create an HTTP-backed client from configuration.
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::from_config(config)?);
        Ok(Self::new(fetcher, &config.endpoint)?
            .with_metadata_prefix(&config.metadata_prefix)
            .with_default_retry(Duration::from_secs(config.default_retry_secs)))
    }

    pub fn with_metadata_prefix(mut self, prefix: &str) -> Self {
        self.metadata_prefix = prefix.to_string();
        self
    }

    /// Backoff used when a 503 carries no Retry-After value.
    pub fn with_default_retry(mut self, retry: Duration) -> Self {
        self.default_retry = retry;
        self
    }

    /// Token that interrupts backoff and inter-page sleeps.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn metadata_prefix(&self) -> &str {
        &self.metadata_prefix
    }

    /// Granularity from the last successful probe, if any.
    pub fn granularity(&self) -> Option<Granularity> {
        self.granularity
    }

    /// URL of the `GetRecord` response for `identifier`.
    pub fn record_url(&self, identifier: &str) -> String {
        self.request(&[
            ("verb", "GetRecord"),
            ("metadataPrefix", self.metadata_prefix.as_str()),
            ("identifier", identifier),
        ])
        .to_string()
    }

    /// Ask the endpoint for its datestamp granularity.
    ///
    /// Failures are logged and fall back to the previously known value,
    /// or [`Granularity::DateOnly`] if nothing is known yet.
    pub async fn probe_granularity(&mut self) -> Granularity {
        let url = self.request(&[("verb", "Identify")]);
        match self.identify(&url).await {
            Ok(granularity) => {
                log::info!("Endpoint {} granularity: {}", self.endpoint, granularity);
                self.granularity = Some(granularity);
                granularity
            }
            Err(e) => {
                let fallback = self.granularity.unwrap_or_default();
                log::warn!(
                    "Identify failed for {}: {}. Assuming {}",
                    self.endpoint,
                    e,
                    fallback
                );
                fallback
            }
        }
    }

    async fn identify(&self, url: &Url) -> Result<Granularity> {
        let body = self.fetcher.fetch(url).await?;
        let root = xml::parse_document(&body)?;
        if !root.is(OAI_NS, "OAI-PMH") {
            return Err(AppError::protocol("Identify response is not an OAI-PMH document"));
        }
        if let Some(error) = root.child(OAI_NS, "error") {
            return Err(oai_error(error));
        }
        root.child(OAI_NS, "Identify")
            .and_then(|identify| identify.child_text(OAI_NS, "granularity"))
            .map(Granularity::from_identify)
            .ok_or_else(|| AppError::protocol("Identify response has no granularity"))
    }

    /// Start a record sequence.
    ///
    /// With `from` set, the value is formatted to the endpoint's granularity
    /// (probed once if still unknown) and sent as lower bound. `delay` is
    /// slept between pages.
    pub async fn list_changes(
        &mut self,
        from: Option<DateTime<Utc>>,
        delay: Option<Duration>,
    ) -> ListChanges {
        let mut params = vec![
            ("verb", "ListRecords".to_string()),
            ("metadataPrefix", self.metadata_prefix.clone()),
        ];
        if let Some(from) = from {
            let granularity = match self.granularity {
                Some(g) => g,
                None => self.probe_granularity().await,
            };
            params.push(("from", granularity.format(&from)));
        }
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let first = self.request(&pairs);

        log::info!("Listing records from {}", first);
        ListChanges {
            client: self.clone(),
            next_request: Some(first),
            delay,
            buffer: VecDeque::new(),
            pages_parsed: 0,
            pages_requested: 0,
        }
    }

    fn request(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().extend_pairs(params);
        url
    }

    /// Follow-up request: earlier `from` and token parameters are dropped.
    fn resume_request(&self, token: &str) -> Url {
        self.request(&[
            ("verb", "ListRecords"),
            ("metadataPrefix", self.metadata_prefix.as_str()),
            ("resumptionToken", token),
        ])
    }

    /// Fetch a page, sleeping and retrying the same request while rate limited.
    async fn fetch_page(&self, url: &Url) -> Result<String> {
        loop {
            match self.fetcher.fetch(url).await {
                Err(AppError::RateLimited { retry_after }) => {
                    let wait = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(self.default_retry);
                    log::warn!(
                        "Endpoint {} rate limited, retrying in {}s",
                        self.endpoint,
                        wait.as_secs()
                    );
                    self.sleep(wait).await?;
                }
                other => return other,
            }
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn extract_record(&self, record: &Element, response_date: DateTime<Utc>) -> Result<ChangeRecord> {
        let header = record
            .child(OAI_NS, "header")
            .ok_or_else(|| AppError::protocol("record without header"))?;
        let identifier = header
            .child_text(OAI_NS, "identifier")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::protocol("record header without identifier"))?;
        let datestamp = header
            .child_text(OAI_NS, "datestamp")
            .ok_or_else(|| AppError::protocol(format!("record {identifier} without datestamp")))?;
        let datestamp = parse_w3c(datestamp)?;
        let deleted = header.attr("status") == Some("deleted");

        let resource_uri = record
            .child(OAI_NS, "metadata")
            .and_then(|metadata| self.extract_uri(metadata));

        Ok(ChangeRecord {
            header: RecordHeader {
                identifier: identifier.to_string(),
                datestamp,
                deleted,
            },
            resource_uri,
            response_date,
        })
    }

    /// First `dc:identifier`, then `dc:relation`, under the endpoint's authority.
    fn extract_uri(&self, metadata: &Element) -> Option<String> {
        let identifiers = metadata.descendants_named(DC_NS, "identifier");
        let relations = metadata.descendants_named(DC_NS, "relation");
        identifiers
            .into_iter()
            .chain(relations)
            .map(|e| e.text.trim().trim_end_matches('/'))
            .find(|value| same_authority(&self.endpoint, value))
            .map(str::to_string)
    }
}

/// Lazy, finite sequence of change records from one `list_changes` call.
pub struct ListChanges {
    client: HarvestClient,
    next_request: Option<Url>,
    delay: Option<Duration>,
    buffer: VecDeque<ChangeRecord>,
    pages_parsed: usize,
    pages_requested: usize,
}

impl ListChanges {
    /// Next record, or `None` once the last page has been consumed.
    ///
    /// After an `Err` the sequence is finished.
    pub async fn next(&mut self) -> Option<Result<ChangeRecord>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            let url = self.next_request.take()?;
            if let Err(e) = self.load_page(&url).await {
                return Some(Err(e));
            }
        }
    }

    /// Number of pages that parsed as OAI-PMH responses.
    pub fn pages_parsed(&self) -> usize {
        self.pages_parsed
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<ChangeRecord>> {
        futures::stream::unfold(self, |mut pager| async move {
            pager.next().await.map(|item| (item, pager))
        })
    }

    async fn load_page(&mut self, url: &Url) -> Result<()> {
        if self.pages_requested > 0 {
            if let Some(delay) = self.delay {
                self.client.sleep(delay).await?;
            }
        }
        self.pages_requested += 1;

        let body = self.client.fetch_page(url).await?;
        let root = match xml::parse_document(&body) {
            Ok(root) if root.is(OAI_NS, "OAI-PMH") => root,
            Ok(_) => return self.recover("missing OAI-PMH root element", &body),
            Err(e) => return self.recover(&e.to_string(), &body),
        };

        if let Some(error) = root.child(OAI_NS, "error") {
            return Err(oai_error(error));
        }

        let response_date = match root.child_text(OAI_NS, "responseDate").map(parse_w3c) {
            Some(Ok(date)) => date,
            _ => {
                log::warn!("Page {} has no usable responseDate, using now", url);
                Utc::now()
            }
        };

        let Some(list) = root.child(OAI_NS, "ListRecords") else {
            return self.recover("missing ListRecords element", &body);
        };
        self.pages_parsed += 1;

        for record in list.children_named(OAI_NS, "record") {
            match self.client.extract_record(record, response_date) {
                Ok(change) => self.buffer.push_back(change),
                Err(e) => log::warn!(
                    "Skipping record from {} ({}): {}",
                    self.client.endpoint,
                    record_context(record),
                    e
                ),
            }
        }

        if let Some(token) = list
            .child_text(OAI_NS, "resumptionToken")
            .filter(|t| !t.is_empty())
        {
            log::debug!("Resumption token {}", token);
            self.next_request = Some(self.client.resume_request(token));
        }
        Ok(())
    }

    /// Continue past an unreadable page if a token can still be found.
    fn recover(&mut self, reason: &str, body: &str) -> Result<()> {
        if let Some(token) = RESUMPTION_TOKEN
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|t| !t.is_empty())
        {
            log::warn!(
                "Skipping malformed page from {} ({}), continuing with token {}",
                self.client.endpoint,
                reason,
                token
            );
            self.next_request = Some(self.client.resume_request(token));
            return Ok(());
        }
        if self.pages_parsed == 0 {
            return Err(AppError::protocol(format!(
                "Unreadable response from {}: {}",
                self.client.endpoint, reason
            )));
        }
        log::warn!(
            "Abandoning pagination at {} after {} pages: {}",
            self.client.endpoint,
            self.pages_parsed,
            reason
        );
        Ok(())
    }
}

fn oai_error(error: &Element) -> AppError {
    let code = error.attr("code").unwrap_or_default().to_string();
    let message = error.text.trim().to_string();
    if code == "noRecordsMatch" {
        AppError::NoRecordsMatch(message)
    } else {
        AppError::Oai { code, message }
    }
}

fn record_context(record: &Element) -> String {
    let header = record.child(OAI_NS, "header");
    format!(
        "identifier={}, datestamp={}",
        header
            .and_then(|h| h.child_text(OAI_NS, "identifier"))
            .unwrap_or("?"),
        header
            .and_then(|h| h.child_text(OAI_NS, "datestamp"))
            .unwrap_or("?")
    )
}
