use crate::core::communication::transport::Connector;
use crate::core::session::{
    emergency::EmergencyStopRecord,
    reconnect::{Clock, TokioClock},
    session::{Session, SessionOptions},
    state::ConnectionState,
};
use crate::domain::config::MoonriverConfig;
use crate::domain::error::{ConnectError, EmergencyStopError};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Owns one session per configured printer
pub struct SessionManager {
    config: Arc<MoonriverConfig>,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, Session>>,
}

/// Session summary information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub endpoint: String,
    pub state: ConnectionState,
    pub pending_requests: usize,
    pub subscribed_objects: usize,
    pub macros: usize,
    pub requests_sent: u64,
    pub reconnects: u64,
}

impl SessionManager {
    pub fn new(config: Arc<MoonriverConfig>, connector: Arc<dyn Connector>) -> Self {
        Self::with_clock(config, connector, Arc::new(TokioClock))
    }

    pub fn with_clock(config: Arc<MoonriverConfig>, connector: Arc<dyn Connector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            connector,
            clock,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MoonriverConfig {
        &self.config
    }

    /// Configured printer names, in configuration order
    pub fn printer_names(&self) -> Vec<String> {
        self.config.printers.iter().map(|p| p.name.clone()).collect()
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.config.printer(name).is_some()
    }

    /// Connect to `name`, reusing a live session if there is one
    pub async fn connect(&self, name: &str) -> Result<Session, ConnectError> {
        if let Some(session) = self.get(name).await {
            if !session.is_closed() {
                return Ok(session);
            }
        }

        let printer = self
            .config
            .printer(name)
            .ok_or_else(|| ConnectError::UnknownPrinter(name.to_string()))?;
        let options = SessionOptions::from_config(printer, &self.config.global)?;
        let session =
            Session::connect_with_clock(options, Arc::clone(&self.connector), Arc::clone(&self.clock)).await?;

        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(name.to_string(), session.clone()) {
            // Lost a race with another connect; keep the newest
            previous.disconnect().await;
        }
        Ok(session)
    }

    /// Connect every configured printer concurrently
    pub async fn connect_all(&self) -> Vec<(String, Result<(), ConnectError>)> {
        let names = self.printer_names();
        let results = join_all(names.iter().map(|name| self.connect(name))).await;

        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                if let Err(e) = &result {
                    warn!("Printer '{}' unavailable: {}", name, e);
                }
                (name, result.map(|_| ()))
            })
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<Session> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Every open session, sorted by name
    pub async fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.name().cmp(b.name()));
        sessions
    }

    /// Disconnect and forget a session. Returns false if there was none.
    pub async fn disconnect(&self, name: &str) -> bool {
        let session = self.sessions.write().await.remove(name);
        match session {
            Some(session) => {
                session.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnect every session
    pub async fn shutdown(&self) {
        let sessions: Vec<Session> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        join_all(sessions.iter().map(|s| s.disconnect())).await;
        info!("Closed {} sessions", count);
    }

    /// Send an emergency stop to `name`
    pub async fn emergency_stop(&self, name: &str) -> Result<EmergencyStopRecord, EmergencyStopError> {
        match self.get(name).await {
            Some(session) => session.emergency_stop().await,
            None => Err(EmergencyStopError::NotConnected(name.to_string())),
        }
    }

    /// One summary per configured printer, plus any ad hoc sessions
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await.clone();
        let mut summaries = Vec::new();

        for printer in &self.config.printers {
            let summary = match sessions.get(&printer.name) {
                Some(session) => summarize(session).await,
                None => SessionSummary {
                    name: printer.name.clone(),
                    endpoint: printer.url.clone(),
                    state: ConnectionState::Disconnected,
                    pending_requests: 0,
                    subscribed_objects: 0,
                    macros: 0,
                    requests_sent: 0,
                    reconnects: 0,
                },
            };
            summaries.push(summary);
        }

        let mut extra: Vec<&Session> = sessions
            .values()
            .filter(|s| !self.is_configured(s.name()))
            .collect();
        extra.sort_by(|a, b| a.name().cmp(b.name()));
        for session in extra {
            summaries.push(summarize(session).await);
        }

        summaries
    }
}

async fn summarize(session: &Session) -> SessionSummary {
    let capabilities = session.capabilities();
    let statistics = session.statistics();
    SessionSummary {
        name: session.name().to_string(),
        endpoint: session.endpoint().to_string(),
        state: session.state(),
        pending_requests: session.pending_count().await,
        subscribed_objects: capabilities.subscribed.len(),
        macros: capabilities.macros.len(),
        requests_sent: statistics.requests_sent,
        reconnects: statistics.reconnects,
    }
}
