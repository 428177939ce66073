//! Static host names published from a hosts file.
//!
//! The file has one `<address> <hostname>` pair per line. Each host gets its
//! own entry group, so a conflict on one name leaves the others alone.
//! Conflicts are only logged; static names are never renamed.

use beacon_core::{
    EntryGroupState, GroupEvent, GroupId, InterfaceScope, PublishFlags, Responder, Transport,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Hosts file errors.
#[derive(Debug, Error)]
pub enum HostsError {
    #[error("failed to open static hosts file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: unexpected end of line")]
    MissingHostName { path: String, line: usize },

    #[error("{path}:{line}: junk at the end of the line")]
    TrailingJunk { path: String, line: usize },
}

/// One `<address> <hostname>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHost {
    pub host: String,
    pub ip: String,
    group: Option<GroupId>,
}

impl StaticHost {
    pub fn new(host: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ip: ip.into(),
            group: None,
        }
    }

    #[cfg(test)]
    pub fn group(&self) -> Option<GroupId> {
        self.group
    }
}

/// Result of parsing a hosts file: what was read before any error.
#[derive(Debug, Default)]
pub struct ParsedHosts {
    pub hosts: Vec<StaticHost>,
    pub error: Option<HostsError>,
}

/// Parse hosts file contents. Parsing stops at the first malformed line.
pub fn parse_hosts(path: &str, contents: &str) -> ParsedHosts {
    let mut parsed = ParsedHosts::default();

    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        let text = match raw.find('#') {
            Some(comment) => &raw[..comment],
            None => raw,
        };
        let mut fields = text.split_whitespace();

        let Some(ip) = fields.next() else {
            continue;
        };
        let Some(host) = fields.next() else {
            parsed.error = Some(HostsError::MissingHostName {
                path: path.to_string(),
                line,
            });
            break;
        };
        if fields.next().is_some() {
            parsed.error = Some(HostsError::TrailingJunk {
                path: path.to_string(),
                line,
            });
            break;
        }

        parsed.hosts.push(StaticHost::new(host, ip));
    }

    parsed
}

/// The static hosts currently known, with the groups publishing them.
#[derive(Debug, Default)]
pub struct StaticHosts {
    path: Option<PathBuf>,
    hosts: Vec<StaticHost>,
}

impl StaticHosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the hosts file. A missing file yields no hosts.
    ///
    /// A malformed line is logged and ends parsing; hosts read before it are
    /// kept.
    pub fn load(path: &Path) -> Result<Self, HostsError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no static hosts file");
                return Ok(Self {
                    path: Some(path.to_path_buf()),
                    hosts: Vec::new(),
                });
            }
            Err(source) => {
                return Err(HostsError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let parsed = parse_hosts(&path.display().to_string(), &contents);
        if let Some(err) = &parsed.error {
            error!(error = %err, "malformed static hosts file");
        }
        info!(path = %path.display(), count = parsed.hosts.len(), "static hosts loaded");

        Ok(Self {
            path: Some(path.to_path_buf()),
            hosts: parsed.hosts,
        })
    }

    pub fn hosts(&self) -> &[StaticHost] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Publish every host: address and reverse PTR in its own group.
    ///
    /// Failures are logged per host and do not stop the others.
    pub fn add_to_server<T: Transport>(&mut self, responder: &mut Responder<T>) {
        for host in &mut self.hosts {
            let group = *host.group.get_or_insert_with(|| responder.create_group());

            let addr: IpAddr = match host.ip.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    error!(host = %host.host, ip = %host.ip, "static host: invalid address");
                    continue;
                }
            };

            if let Err(e) = responder.add_address(
                Some(group),
                InterfaceScope::ANY,
                PublishFlags::unique(),
                &host.host,
                addr,
            ) {
                error!(host = %host.host, error = %e, "static host: failed to add address");
                continue;
            }

            if let Err(e) = responder.commit_group(group) {
                error!(host = %host.host, error = %e, "static host: failed to commit");
            }
        }
    }

    /// Withdraw every host, keeping the groups for a later re-add.
    pub fn remove_from_server<T: Transport>(&mut self, responder: &mut Responder<T>) {
        for host in &self.hosts {
            if let Some(group) = host.group {
                if let Err(e) = responder.reset_group(group) {
                    warn!(host = %host.host, error = %e, "static host: failed to withdraw");
                }
            }
        }
    }

    /// Release every host and its group.
    pub fn free_all<T: Transport>(&mut self, responder: &mut Responder<T>) {
        for host in self.hosts.drain(..) {
            if let Some(group) = host.group {
                if let Err(e) = responder.free_group(group) {
                    warn!(host = %host.host, error = %e, "static host: failed to free group");
                }
            }
        }
    }

    /// Re-read the hosts file and republish.
    pub fn reload<T: Transport>(&mut self, responder: &mut Responder<T>) -> Result<(), HostsError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        info!(path = %path.display(), "reloading static hosts");
        self.remove_from_server(responder);
        self.free_all(responder);
        *self = Self::load(&path)?;
        self.add_to_server(responder);
        Ok(())
    }

    /// Log a state change of one of our groups. Returns whether it was ours.
    pub fn handle_event<T: Transport>(&self, responder: &Responder<T>, event: &GroupEvent) -> bool {
        let Some(host) = self.hosts.iter().find(|h| h.group == Some(event.group)) else {
            return false;
        };

        match event.state {
            EntryGroupState::Collision => {
                error!(host = %host.host, "host name conflict, not established");
            }
            EntryGroupState::Established => {
                info!(host = %host.host, "static host established");
            }
            EntryGroupState::Failure => {
                let reason = responder
                    .group(event.group)
                    .and_then(|g| g.last_error())
                    .unwrap_or("unknown error");
                error!(host = %host.host, %reason, "failed to establish static host");
            }
            EntryGroupState::Uncommitted | EntryGroupState::Registering => {}
        }
        true
    }
}
