// src/exec/endpoint.rs

//! Locating the local command daemon.
//!
//! A daemon answers `GET /info` with `{"version": .., "owner": ..}`. Several
//! daemons (other projects, other tool versions) may share the host, so
//! discovery walks up from the configured start port until it finds one
//! whose identity matches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RemoteSection;
use crate::errors::{CmdstreamError, Result};
use crate::history::{PingRecord, SharedHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PingResult {
    /// A daemon with the expected identity answered.
    Match,
    /// Something answered, but not the daemon we want.
    Mismatch,
    /// Nothing usable is listening on the port.
    NoServer,
}

/// Body of a daemon's `/info` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DaemonInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub owner: String,
}

/// Address and expected identity of the daemon.
///
/// Clones share the current port, so a port found by one discovery is where
/// the next one starts.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    client: reqwest::Client,
    host: String,
    port: Arc<AtomicU16>,
    max_attempts: u16,
    owner: Option<String>,
    version: Option<String>,
    history: Option<SharedHistory>,
}

impl RemoteEndpoint {
    pub fn new(settings: &RemoteSection, client: reqwest::Client) -> Self {
        Self {
            client,
            host: settings.host.clone(),
            port: Arc::new(AtomicU16::new(settings.start_port)),
            max_attempts: settings.max_port_attempts,
            owner: settings.owner.clone(),
            version: settings.version.clone(),
            history: None,
        }
    }

    /// Record pings and discovery steps in `history`.
    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port())
    }

    pub fn info_url(&self) -> String {
        format!("{}/info", self.base_url())
    }

    pub fn execute_url(&self) -> String {
        format!("{}/execute", self.base_url())
    }

    /// Query `/info` on the current port.
    pub async fn ping(&self) -> PingResult {
        let url = self.info_url();
        let (result, owner_matches, version_matches) = match self.client.get(&url).send().await {
            Err(err) => {
                debug!(url = %url, error = %err, "daemon did not answer");
                (PingResult::NoServer, false, false)
            }
            Ok(response) if !response.status().is_success() => {
                debug!(url = %url, status = %response.status(), "daemon info request rejected");
                (PingResult::NoServer, false, false)
            }
            Ok(response) => match response.json::<DaemonInfo>().await {
                Ok(info) => {
                    let owner_matches = self
                        .owner
                        .as_ref()
                        .is_none_or(|owner| owner.eq_ignore_ascii_case(&info.owner));
                    let version_matches = self
                        .version
                        .as_ref()
                        .is_none_or(|version| *version == info.version);
                    debug!(url = %url, ?info, owner_matches, version_matches, "daemon answered");
                    let result = if owner_matches && version_matches {
                        PingResult::Match
                    } else {
                        PingResult::Mismatch
                    };
                    (result, owner_matches, version_matches)
                }
                Err(err) => {
                    debug!(url = %url, error = %err, "unreadable daemon info");
                    (PingResult::Mismatch, false, false)
                }
            },
        };

        if let Some(history) = &self.history {
            let record = PingRecord {
                port: self.port(),
                url,
                owner_matches,
                version_matches,
                result,
            };
            history.with(|h| h.set_latest_ping(record));
        }
        result
    }

    /// Find a matching daemon and return its execute URL.
    ///
    /// A port held by a different daemon is skipped. An empty port, or
    /// running out of attempts, means no daemon is available.
    pub async fn discover(&self) -> Result<String> {
        for _ in 0..self.max_attempts {
            match self.ping().await {
                PingResult::Match => {
                    let url = self.execute_url();
                    info!(url = %url, "using command daemon");
                    self.server_event(format!("using daemon at {url}"));
                    return Ok(url);
                }
                PingResult::Mismatch => {
                    let port = self.port();
                    let Some(next) = port.checked_add(1) else {
                        break;
                    };
                    self.server_event(format!("port {port} belongs to another daemon; trying {next}"));
                    self.port.store(next, Ordering::SeqCst);
                }
                PingResult::NoServer => {
                    self.server_event(format!("no daemon listening at {}", self.base_url()));
                    return Err(CmdstreamError::DaemonUnavailable {
                        url: self.base_url(),
                    });
                }
            }
        }

        self.server_event(format!(
            "gave up looking for a daemon after {} port(s)",
            self.max_attempts
        ));
        Err(CmdstreamError::DaemonUnavailable {
            url: self.base_url(),
        })
    }

    fn server_event(&self, message: String) {
        if let Some(history) = &self.history {
            history.with(|h| h.add_server_event(message));
        }
    }
}
