//! Job history browser.
//!
//! Pages of `server.history.list` results, newest job first, cached per
//! start offset. Session events invalidate the cache: a changed job drops
//! the page holding it, while a new job shifts every offset and drops
//! everything.

use crate::core::session::{Session, SessionEvent};
use crate::domain::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::debug;

pub const METHOD_HISTORY_LIST: &str = "server.history.list";
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// One finished or running print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub filename: String,
    /// completed, cancelled, error, in_progress, ...
    pub status: String,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub print_duration: f64,
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub filament_used: f64,
}

/// Opaque position in the job list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PageToken(usize);

impl PageToken {
    pub fn first() -> Self {
        Self(0)
    }

    pub fn offset(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    /// Total jobs known to the controller
    pub total: usize,
    pub next: Option<PageToken>,
}

/// Browses one printer's job history
pub struct JobHistoryBrowser {
    session: Session,
    events: broadcast::Receiver<SessionEvent>,
    page_size: usize,
    pages: HashMap<PageToken, JobPage>,
}

impl JobHistoryBrowser {
    pub fn new(session: Session, page_size: usize) -> Self {
        let events = session.events();
        Self {
            session,
            events,
            page_size: page_size.max(1),
            pages: HashMap::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The page starting at `token`, from cache when it is still valid
    pub async fn list(&mut self, token: PageToken) -> Result<JobPage, RpcError> {
        self.sync();
        if let Some(page) = self.pages.get(&token) {
            return Ok(page.clone());
        }

        let params = json!({
            "start": token.offset(),
            "limit": self.page_size,
            "order": "desc",
        });
        let result = self
            .session
            .send(METHOD_HISTORY_LIST, params, self.session.request_timeout())
            .await?;
        let page = parse_page(&result, token, self.page_size)?;

        // Events that arrived during the fetch may already outdate it
        if self.sync() {
            return Ok(page);
        }
        self.pages.insert(token, page.clone());
        Ok(page)
    }

    /// Apply queued session events; true if anything was invalidated
    pub fn sync(&mut self) -> bool {
        let mut invalidated = false;
        loop {
            match self.events.try_recv() {
                Ok(event) => invalidated |= self.invalidate(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("Job browser missed {} events, dropping cache", skipped);
                    self.pages.clear();
                    invalidated = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        invalidated
    }

    /// Drop cached pages affected by `event`
    pub fn invalidate(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::JobChanged { action, job_id } => match job_id {
                Some(id) if action != "added" => {
                    let before = self.pages.len();
                    self.pages.retain(|_, page| !page.jobs.iter().any(|job| &job.job_id == id));
                    before != self.pages.len()
                }
                _ => self.clear(),
            },
            SessionEvent::Resubscribed => self.clear(),
            _ => false,
        }
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    fn clear(&mut self) -> bool {
        let had_pages = !self.pages.is_empty();
        self.pages.clear();
        had_pages
    }
}

fn parse_page(result: &Value, token: PageToken, page_size: usize) -> Result<JobPage, RpcError> {
    let jobs: Vec<JobRecord> = match result.get("jobs") {
        Some(jobs) => serde_json::from_value(jobs.clone())
            .map_err(|e| RpcError::ProtocolMalformed(format!("job list: {}", e)))?,
        None => return Err(RpcError::ProtocolMalformed("job list without jobs".to_string())),
    };
    let total = result
        .get("count")
        .and_then(Value::as_u64)
        .map(|count| count as usize)
        .unwrap_or(token.offset() + jobs.len());

    let end = token.offset() + jobs.len();
    let next = (jobs.len() == page_size && end < total).then_some(PageToken(end));
    Ok(JobPage { jobs, total, next })
}

/// Seconds as `H:MM:SS`
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}
