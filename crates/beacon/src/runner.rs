//! Runner module - drives the responder from a tokio event loop.
//!
//! The responder itself never blocks and owns no clock. The runner sleeps
//! until the engine's next deadline, runs the periodic interface sweep,
//! forwards group events to the static hosts and the host name publisher,
//! and reloads the hosts file on SIGHUP.

use std::future::Future;
use std::time::Duration;

use beacon_core::{GroupEvent, Responder, Transport};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::publisher::HostNamePublisher;
use crate::static_hosts::StaticHosts;

/// Idle wake-up when no timer is pending. The sweep usually fires first.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// Everything the daemon loop owns.
pub struct Daemon<T: Transport> {
    responder: Responder<T>,
    events: mpsc::UnboundedReceiver<GroupEvent>,
    hosts: StaticHosts,
    publisher: Option<HostNamePublisher>,
    sweep_interval: Duration,
}

impl<T: Transport> Daemon<T> {
    /// Build the responder, register interfaces and read the hosts file.
    pub fn new(config: &DaemonConfig, transport: T) -> anyhow::Result<Self> {
        let mut responder = Responder::with_validated_config(
            config.engine.clone(),
            transport,
            std::time::Instant::now(),
        )?;
        let events = responder.subscribe();

        for spec in &config.interfaces {
            responder.add_interface(spec.clone());
        }

        let hosts = match config.hosts_path() {
            Some(path) => StaticHosts::load(&path)?,
            None => StaticHosts::new(),
        };

        let publisher = if config.addresses.is_empty() {
            debug!("no addresses configured, not publishing a host name");
            None
        } else {
            Some(HostNamePublisher::new(
                config.resolved_host_name()?,
                config.addresses.clone(),
                config.max_rename_attempts,
            ))
        };

        Ok(Self {
            responder,
            events,
            hosts,
            publisher,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        })
    }

    #[cfg(test)]
    pub fn responder(&self) -> &Responder<T> {
        &self.responder
    }

    #[cfg(test)]
    pub fn hosts(&self) -> &StaticHosts {
        &self.hosts
    }

    #[cfg(test)]
    pub fn publisher(&self) -> Option<&HostNamePublisher> {
        self.publisher.as_ref()
    }

    /// Publish the host name and the static hosts.
    pub fn start(&mut self) -> anyhow::Result<()> {
        info!(
            interfaces = self.responder.interface_ids().len(),
            static_hosts = self.hosts.len(),
            "starting responder"
        );
        if let Some(publisher) = &mut self.publisher {
            publisher.publish(&mut self.responder)?;
        }
        self.hosts.add_to_server(&mut self.responder);
        Ok(())
    }

    /// Fire due timers.
    pub fn tick(&mut self) {
        if let Err(e) = self.responder.handle_timeout(std::time::Instant::now()) {
            error!(error = %e, "responder fault");
        }
    }

    /// Periodic sweep: picks up new interfaces and refreshes records.
    pub fn sweep(&mut self) {
        self.responder.advance_clock(std::time::Instant::now());
        if let Err(e) = self.responder.announce_all_interfaces() {
            error!(error = %e, "responder fault during sweep");
        }
    }

    /// Dispatch one group event to whoever owns the group.
    pub fn handle_event(&mut self, event: GroupEvent) {
        debug!(group = %event.group, state = ?event.state, "group event");
        if self.hosts.handle_event(&self.responder, &event) {
            return;
        }
        if let Some(publisher) = &mut self.publisher {
            self.responder.advance_clock(std::time::Instant::now());
            match publisher.handle_event(&mut self.responder, &event) {
                Ok(true) => debug!(name = %publisher.name(), state = ?publisher.state(), "host name publisher"),
                Ok(false) => {}
                Err(e) => error!(error = %e, "host name publisher failed"),
            }
        }
    }

    /// Drain queued group events without waiting.
    #[cfg(test)]
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    /// Re-read the static hosts file and republish it.
    pub fn reload_hosts(&mut self) {
        self.responder.advance_clock(std::time::Instant::now());
        if let Err(e) = self.hosts.reload(&mut self.responder) {
            error!(error = %e, "failed to reload static hosts");
        }
    }

    /// Withdraw everything with goodbyes.
    pub fn shutdown(&mut self) {
        info!("shutting down responder");
        self.responder.advance_clock(std::time::Instant::now());
        self.hosts.remove_from_server(&mut self.responder);
        if let Some(publisher) = &mut self.publisher {
            if let Err(e) = publisher.withdraw(&mut self.responder) {
                warn!(error = %e, "failed to withdraw host name");
            }
        }
        if let Err(e) = self.responder.goodbye_all(true) {
            warn!(error = %e, "failed to send all goodbyes");
        }
    }

    /// Run until `shutdown` resolves, then withdraw everything.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<Responder<T>> {
        self.start()?;

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut hangup = Hangup::new();
        tokio::pin!(shutdown);

        loop {
            let wake = match self.responder.poll_timeout() {
                Some(deadline) => Instant::from_std(deadline),
                None => Instant::now() + IDLE_WAKE,
            };

            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                _ = tokio::time::sleep_until(wake) => self.tick(),

                Some(event) = self.events.recv() => self.handle_event(event),

                _ = sweep.tick() => self.sweep(),

                _ = hangup.recv() => self.reload_hosts(),
            }
        }

        self.shutdown();
        Ok(self.responder)
    }
}

/// SIGHUP listener; never fires where the signal does not exist.
struct Hangup {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl Hangup {
    fn new() -> Self {
        use tokio::signal::unix::{signal, SignalKind};
        let signal = match signal(SignalKind::hangup()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGHUP, hosts reload disabled");
                None
            }
        };
        Self { signal }
    }

    async fn recv(&mut self) {
        if let Some(signal) = self.signal.as_mut() {
            if signal.recv().await.is_some() {
                return;
            }
            self.signal = None;
        }
        std::future::pending::<()>().await
    }
}

#[cfg(not(unix))]
impl Hangup {
    fn new() -> Self {
        Self {}
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{EntryGroupState, PacketKind};
    use beacon_test_utils::{fixtures, RecordingTransport};

    fn config(hosts: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            hosts_file: Some(hosts.to_path_buf()),
            interfaces: vec![fixtures::eth(1)],
            host_name: Some("beacon-test".to_string()),
            addresses: vec![fixtures::v4(9)],
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn test_new_registers_interfaces_and_hosts() {
        let file = fixtures::hosts_file("192.168.1.20 nas.local\n");
        let daemon = Daemon::new(&config(file.path()), RecordingTransport::new()).unwrap();

        assert_eq!(daemon.responder().interface_ids().len(), 1);
        assert_eq!(daemon.hosts().len(), 1);
        assert_eq!(daemon.publisher().unwrap().name(), "beacon-test.local");
    }

    #[test]
    fn test_no_addresses_means_no_publisher() {
        let file = fixtures::hosts_file("");
        let config = DaemonConfig {
            addresses: Vec::new(),
            ..config(file.path())
        };
        let daemon = Daemon::new(&config, RecordingTransport::new()).unwrap();
        assert!(daemon.publisher().is_none());
    }

    #[test]
    fn test_invalid_engine_config_is_rejected() {
        let file = fixtures::hosts_file("");
        let mut config = config(file.path());
        config.engine.probe_count = 0;
        assert!(Daemon::new(&config, RecordingTransport::new()).is_err());
    }

    #[test]
    fn test_start_and_shutdown() {
        let file = fixtures::hosts_file("192.168.1.20 nas.local\n");
        let transport = RecordingTransport::new();
        let mut daemon = Daemon::new(&config(file.path()), transport.clone()).unwrap();

        daemon.start().unwrap();
        daemon.tick();
        daemon.drain_events();
        // Host name and static host each probe A + PTR once.
        assert_eq!(transport.count(PacketKind::Probe), 4);

        let group = daemon.hosts().hosts()[0].group().unwrap();
        assert_eq!(
            daemon.responder().group_state(group),
            Some(EntryGroupState::Registering)
        );

        daemon.shutdown();
        assert_eq!(daemon.responder().announcements().count(), 0);
        assert_eq!(
            daemon.responder().group_state(group),
            Some(EntryGroupState::Uncommitted)
        );
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let file = fixtures::hosts_file("192.168.1.20 nas.local\n");
        let transport = RecordingTransport::new();
        let daemon = Daemon::new(&config(file.path()), transport.clone()).unwrap();

        let responder = daemon
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(transport.count(PacketKind::Probe) >= 4);
        assert_eq!(responder.announcements().count(), 0);
    }

    #[test]
    fn test_reload_picks_up_new_hosts() {
        use std::io::Write;

        let mut file = fixtures::hosts_file("192.168.1.20 nas.local\n");
        let mut daemon = Daemon::new(&config(file.path()), RecordingTransport::new()).unwrap();
        daemon.start().unwrap();

        writeln!(file, "192.168.1.21 printer.local").unwrap();
        daemon.reload_hosts();

        assert_eq!(daemon.hosts().len(), 2);
        assert!(daemon.hosts().hosts().iter().all(|h| h.group().is_some()));
    }
}
