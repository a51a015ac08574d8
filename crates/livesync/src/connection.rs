use crate::config::ConnectionConfig;
use crate::cursor::ResumeCursor;
use crate::dispatcher::{Dispatch, Dispatcher, EnvelopeHandler};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::transport::{Connector, ReadyState, Transport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_DRIFT_SLACK: Duration = Duration::from_millis(1000);

/// Written to the transport as a liveness probe; only the success of the
/// write matters.
const PROBE_PAYLOAD: &str = "ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
}

/// What a heartbeat tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The heartbeat is not armed (closed manager); nothing happened.
    Stopped,
    /// Probe succeeded.
    Healthy,
    /// Probe failed but drift stayed within the slack.
    Tolerated { drift: Duration },
    /// Probe failed past the slack; the connection was rebuilt.
    Reconnected { drift: Duration },
}

#[derive(Debug)]
struct Heartbeat {
    interval: Duration,
    slack: Duration,
    /// Last tick at which the connection was known good, or the last (re)open.
    last_tick: Instant,
    /// Pending timer; `None` means cancelled.
    next_tick: Option<Instant>,
}

enum Step {
    Tick,
    Event(Option<TransportEvent>),
    Shutdown,
    Recheck,
}

/// Owns the single realtime connection
///
/// Rebuilds the connection from the resumption cursor when the heartbeat
/// decides it is dead, and feeds every inbound frame through the
/// dispatcher. Transport failures never escape: they are logged and
/// left to the heartbeat.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    cursor: ResumeCursor,
    transport: Option<Box<dyn Transport>>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    heartbeat: Heartbeat,
    dispatcher: Dispatcher,
    status: ConnectionStatus,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager with the default heartbeat. Nothing is connected
    /// until `open()` (or `run()`).
    pub fn new(connector: C, cursor: ResumeCursor) -> Self {
        Self {
            connector,
            cursor,
            transport: None,
            inbound: None,
            heartbeat: Heartbeat {
                interval: DEFAULT_HEARTBEAT_INTERVAL,
                slack: DEFAULT_DRIFT_SLACK,
                last_tick: Instant::now(),
                next_tick: None,
            },
            dispatcher: Dispatcher::new(),
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn from_config(connector: C, config: &ConnectionConfig) -> Result<Self> {
        let cursor = ResumeCursor::new(
            &config.base_url,
            config.channel.clone(),
            config.client_id.clone(),
            config.last_message_id.clone(),
        )?;
        Ok(Self::new(connector, cursor).with_heartbeat(
            Duration::from_millis(config.heartbeat_interval_ms),
            Duration::from_millis(config.drift_slack_ms),
        ))
    }

    pub fn with_heartbeat(mut self, interval: Duration, slack: Duration) -> Self {
        self.heartbeat.interval = interval;
        self.heartbeat.slack = slack;
        self
    }

    pub fn subscribe(&mut self, handler: Arc<dyn EnvelopeHandler>) -> bool {
        self.dispatcher.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, handler: &Arc<dyn EnvelopeHandler>) -> bool {
        self.dispatcher.unsubscribe(handler)
    }

    pub fn cursor(&self) -> &ResumeCursor {
        &self.cursor
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn last_tick(&self) -> Instant {
        self.heartbeat.last_tick
    }

    /// When the next heartbeat is due, if the timer is armed.
    pub fn next_heartbeat(&self) -> Option<Instant> {
        self.heartbeat.next_tick
    }

    /// (Re)establish the connection from the current cursor and restart the
    /// heartbeat. A failed connect is logged and left to the heartbeat.
    pub fn open(&mut self) {
        self.open_at(Instant::now());
    }

    fn open_at(&mut self, now: Instant) {
        self.heartbeat.next_tick = None;
        self.drop_link();

        let url = self.cursor.connection_url();
        match self.connector.connect(&url) {
            Ok(link) => {
                self.transport = Some(link.transport);
                self.inbound = Some(link.events);
                self.status = ConnectionStatus::Connecting;
                info!("Connection opened: {}", url);
            }
            Err(e) => {
                self.status = ConnectionStatus::Reconnecting;
                warn!("Connection to {} failed: {}", url, e);
            }
        }

        self.heartbeat.last_tick = now;
        self.heartbeat.next_tick = Some(now + self.heartbeat.interval);
    }

    /// Cancel the heartbeat and tear the connection down. Safe to call in
    /// any state; events still queued on the old link are discarded.
    pub fn close(&mut self) {
        self.heartbeat.next_tick = None;
        if self.drop_link() {
            info!("Connection closed");
        }
        self.status = ConnectionStatus::Disconnected;
    }

    fn drop_link(&mut self) -> bool {
        self.inbound = None;
        match self.transport.take() {
            Some(mut transport) => {
                transport.close();
                true
            }
            None => false,
        }
    }

    /// Liveness probe: no transport or a closing/closed one is not open;
    /// otherwise a throwaway write decides.
    pub fn is_open(&self) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            return false;
        };
        if matches!(
            transport.ready_state(),
            ReadyState::Closing | ReadyState::Closed
        ) {
            return false;
        }
        transport.send_text(PROBE_PAYLOAD).is_ok()
    }

    /// Write an envelope as a text frame. Returns whether the transport
    /// accepted it.
    pub fn send(&self, envelope: &Envelope) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            return false;
        };
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Unable to encode envelope: {}", e);
                return false;
            }
        };
        match transport.send_text(&frame) {
            Ok(()) => true,
            Err(e) => {
                debug!("Send failed: {}", e);
                false
            }
        }
    }

    pub fn heartbeat(&mut self) -> HeartbeatOutcome {
        self.heartbeat_at(Instant::now())
    }

    /// One heartbeat tick observed at `now`.
    ///
    /// Healthy ticks advance the tick timestamp. A failed probe only
    /// forces `close()` + `open()` when the time since that timestamp
    /// exceeds the interval by more than the slack, so one missed or late
    /// tick never reconnects on its own. A connection that stays down is
    /// therefore retried every second tick, roughly twice the interval.
    pub fn heartbeat_at(&mut self, now: Instant) -> HeartbeatOutcome {
        if self.heartbeat.next_tick.is_none() {
            return HeartbeatOutcome::Stopped;
        }
        self.heartbeat.next_tick = Some(now + self.heartbeat.interval);

        if self.is_open() {
            self.heartbeat.last_tick = now;
            return HeartbeatOutcome::Healthy;
        }

        let elapsed = now.saturating_duration_since(self.heartbeat.last_tick);
        let drift = elapsed.saturating_sub(self.heartbeat.interval);

        if drift > self.heartbeat.slack {
            info!(
                "Heartbeat off by {}ms without a live connection, re-connecting",
                drift.as_millis()
            );
            self.close();
            self.open_at(now);
            return HeartbeatOutcome::Reconnected { drift };
        }

        debug!("Liveness probe failed, drift {}ms", drift.as_millis());
        HeartbeatOutcome::Tolerated { drift }
    }

    /// Apply one event from the current link.
    pub async fn handle_event(&mut self, event: TransportEvent) -> Option<Dispatch> {
        match event {
            TransportEvent::Opened => {
                self.status = ConnectionStatus::Open;
                debug!("Transport open");
                None
            }
            TransportEvent::Frame(raw) => {
                if self.transport.is_none() {
                    return None;
                }
                Some(self.dispatcher.dispatch(&raw, &mut self.cursor).await)
            }
            TransportEvent::Closed { code, reason } => {
                info!("Socket closing (code {:?}) {}", code, reason);
                if self.status != ConnectionStatus::Disconnected {
                    self.status = ConnectionStatus::Reconnecting;
                }
                None
            }
            TransportEvent::Error(e) => {
                warn!("Socket error: {}", e);
                if self.status != ConnectionStatus::Disconnected {
                    self.status = ConnectionStatus::Reconnecting;
                }
                None
            }
        }
    }

    /// Drive the connection until `shutdown` turns true or its sender is
    /// dropped, then close.
    ///
    /// Heartbeat ticks and transport events are handled one at a time, each
    /// to completion. Opens the connection first unless already open.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        if self.heartbeat.next_tick.is_none() {
            self.open();
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let step = tokio::select! {
                _ = wait_until(self.heartbeat.next_tick) => Step::Tick,
                event = next_event(&mut self.inbound) => Step::Event(event),
                changed = shutdown.changed() => match changed {
                    Ok(()) => Step::Recheck,
                    Err(_) => Step::Shutdown,
                },
            };

            match step {
                Step::Tick => {
                    self.heartbeat();
                }
                Step::Event(Some(event)) => {
                    self.handle_event(event).await;
                }
                Step::Event(None) => {
                    debug!("Link event stream ended");
                    self.inbound = None;
                }
                Step::Recheck => {}
                Step::Shutdown => break,
            }
        }

        self.close();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_event(
    inbound: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryConnector;

    const INTERVAL: Duration = Duration::from_millis(3000);

    fn manager() -> (ConnectionManager<InMemoryConnector>, InMemoryConnector) {
        let connector = InMemoryConnector::new();
        let cursor = ResumeCursor::new("ws://live.test/socket", "acme", "", "").unwrap();
        (ConnectionManager::new(connector.clone(), cursor), connector)
    }

    #[test]
    fn test_open_connects_and_arms_heartbeat() {
        let (mut manager, connector) = manager();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        manager.open();

        assert_eq!(connector.urls(), vec!["ws://live.test/socket?channel=acme"]);
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(
            manager.next_heartbeat(),
            Some(manager.last_tick() + INTERVAL)
        );
    }

    #[test]
    fn test_reopen_closes_previous_link() {
        let (mut manager, connector) = manager();
        manager.open();
        manager.open();
        assert_eq!(manager.connector().connect_count(), 2);
        assert_eq!(connector.close_count(), 1);
    }

    #[test]
    fn test_is_open_probes_with_a_write() {
        let (mut manager, connector) = manager();
        assert!(!manager.is_open());

        manager.open();
        assert!(manager.is_open());
        assert_eq!(connector.sent(), vec![PROBE_PAYLOAD.to_string()]);

        connector.set_writable(false);
        assert!(!manager.is_open());
    }

    #[test]
    fn test_healthy_ticks_never_reconnect() {
        let (mut manager, connector) = manager();
        manager.open();
        let start = manager.last_tick();

        for i in 1..=20u32 {
            // Even wildly late ticks are fine while the probe succeeds
            let now = start + INTERVAL * i * 3;
            assert_eq!(manager.heartbeat_at(now), HeartbeatOutcome::Healthy);
            assert_eq!(manager.last_tick(), now);
        }

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.close_count(), 0);
    }

    #[test]
    fn test_late_tick_with_dead_probe_reconnects_once() {
        let (mut manager, connector) = manager();
        manager.open();
        connector.set_writable(false);

        let now = manager.last_tick() + INTERVAL + Duration::from_millis(1500);
        let outcome = manager.heartbeat_at(now);

        assert_eq!(
            outcome,
            HeartbeatOutcome::Reconnected {
                drift: Duration::from_millis(1500)
            }
        );
        assert_eq!(connector.close_count(), 1);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(manager.last_tick(), now);
        assert_eq!(manager.next_heartbeat(), Some(now + INTERVAL));
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_failed_recovery_stays_reconnecting() {
        let (mut manager, connector) = manager();
        manager.open();
        connector.set_writable(false);
        connector.set_refuse(true);

        let now = manager.last_tick() + INTERVAL * 2;
        assert!(matches!(
            manager.heartbeat_at(now),
            HeartbeatOutcome::Reconnected { .. }
        ));
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
        assert_eq!(manager.next_heartbeat(), Some(now + INTERVAL));
    }

    #[test]
    fn test_persistent_failure_retried_every_second_tick() {
        let (mut manager, connector) = manager();
        connector.set_refuse(true);
        manager.open();
        let start = manager.last_tick();

        let outcomes: Vec<_> = (1..=6u32)
            .map(|i| manager.heartbeat_at(start + INTERVAL * i))
            .collect();

        let reconnects = outcomes
            .iter()
            .filter(|o| matches!(o, HeartbeatOutcome::Reconnected { .. }))
            .count();
        assert_eq!(reconnects, 3);
        assert_eq!(connector.connect_count(), 4);
    }

    #[test]
    fn test_drift_within_slack_is_tolerated() {
        let (mut manager, connector) = manager();
        manager.open();
        connector.set_writable(false);
        let start = manager.last_tick();

        let outcome = manager.heartbeat_at(start + INTERVAL + Duration::from_millis(1000));

        assert_eq!(
            outcome,
            HeartbeatOutcome::Tolerated {
                drift: Duration::from_millis(1000)
            }
        );
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.last_tick(), start);
    }

    #[test]
    fn test_dead_connection_recovered_on_second_tick() {
        let (mut manager, connector) = manager();
        manager.open();
        let start = manager.last_tick();
        assert_eq!(manager.heartbeat_at(start + INTERVAL), HeartbeatOutcome::Healthy);

        connector.set_writable(false);
        assert!(matches!(
            manager.heartbeat_at(start + INTERVAL * 2),
            HeartbeatOutcome::Tolerated { .. }
        ));
        assert!(matches!(
            manager.heartbeat_at(start + INTERVAL * 3),
            HeartbeatOutcome::Reconnected { .. }
        ));
        assert_eq!(connector.connect_count(), 2);
    }

    #[test]
    fn test_refused_connect_retried_by_heartbeat() {
        let (mut manager, connector) = manager();
        connector.set_refuse(true);
        manager.open();
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
        assert!(!manager.is_open());

        let start = manager.last_tick();
        manager.heartbeat_at(start + INTERVAL);
        connector.set_refuse(false);
        let outcome = manager.heartbeat_at(start + INTERVAL * 2);

        assert!(matches!(outcome, HeartbeatOutcome::Reconnected { .. }));
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_close_stops_heartbeat() {
        let (mut manager, connector) = manager();
        manager.open();
        manager.close();
        manager.close();

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.next_heartbeat(), None);
        assert_eq!(connector.close_count(), 1);

        connector.set_writable(false);
        let late = manager.last_tick() + INTERVAL * 10;
        assert_eq!(manager.heartbeat_at(late), HeartbeatOutcome::Stopped);
        assert_eq!(connector.connect_count(), 1);
    }

    #[test]
    fn test_send_envelope() {
        let (mut manager, connector) = manager();
        let env = Envelope::parse(r#"{"id":"1","clientId":"c","type":"hello","data":{}}"#).unwrap();
        assert!(!manager.send(&env));

        manager.open();
        assert!(manager.send(&env));
        let sent = connector.sent();
        assert_eq!(Envelope::parse(&sent[0]).unwrap(), env);
    }

    #[tokio::test]
    async fn test_frames_after_close_are_ignored() {
        let (mut manager, _connector) = manager();
        manager.open();
        manager.close();

        let outcome = manager
            .handle_event(TransportEvent::Frame(
                r#"{"id":"m-1","clientId":"c-1","type":"x"}"#.to_string(),
            ))
            .await;

        assert_eq!(outcome, None);
        assert_eq!(manager.cursor().last_message_id(), "");
    }

    #[tokio::test]
    async fn test_status_follows_transport_events() {
        let (mut manager, _connector) = manager();
        manager.open();
        manager.handle_event(TransportEvent::Opened).await;
        assert_eq!(manager.status(), ConnectionStatus::Open);

        manager
            .handle_event(TransportEvent::Closed {
                code: Some(1006),
                reason: String::new(),
            })
            .await;
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
    }
}
