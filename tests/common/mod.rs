//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use resync_oai::error::{AppError, Result};
use resync_oai::models::{ChangeEvent, ChangeType};
use resync_oai::services::Observer;
use resync_oai::utils::http::PageFetcher;
use tokio::time::Instant;
use url::Url;

/// Replies from a script in order and records when each URL was requested.
pub struct ScriptedFetcher {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<(Url, Instant)>>,
}

impl ScriptedFetcher {
    pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, reply: Result<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        self.requests.lock().unwrap().push((url.clone(), Instant::now()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::protocol("script exhausted")))
    }
}

/// Observer remembering every event in order.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<(String, ChangeType)>>);

impl EventLog {
    pub fn events(&self) -> Vec<(String, ChangeType)> {
        self.0.lock().unwrap().clone()
    }
}

impl Observer for EventLog {
    fn name(&self) -> &str {
        "event-log"
    }

    fn on_change(&self, event: &ChangeEvent) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .push((event.resource_uri.clone(), event.change_type));
        Ok(())
    }
}

pub fn page(response_date: &str, records: &[String], token: Option<&str>) -> Result<String> {
    let token = token
        .map(|t| format!("<resumptionToken>{t}</resumptionToken>"))
        .unwrap_or_default();
    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
        <OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
          <responseDate>{response_date}</responseDate>
          <ListRecords>{}{token}</ListRecords>
        </OAI-PMH>"#,
        records.concat()
    ))
}

pub fn identify(granularity: &str) -> Result<String> {
    Ok(format!(
        r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
          <responseDate>2012-01-01T00:00:00Z</responseDate>
          <Identify><granularity>{granularity}</granularity></Identify>
        </OAI-PMH>"#
    ))
}

pub fn created(id: &str, datestamp: &str, uri: &str) -> String {
    format!(
        r#"<record>
          <header><identifier>{id}</identifier><datestamp>{datestamp}</datestamp></header>
          <metadata>
            <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
                       xmlns:dc="http://purl.org/dc/elements/1.1/">
              <dc:identifier>{uri}</dc:identifier>
            </oai_dc:dc>
          </metadata>
        </record>"#
    )
}

pub fn deleted(id: &str, datestamp: &str) -> String {
    format!(
        r#"<record><header status="deleted"><identifier>{id}</identifier><datestamp>{datestamp}</datestamp></header></record>"#
    )
}

pub fn query(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
