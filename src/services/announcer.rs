//! Announcer service
//!
//! Periodically broadcasts a fixed server message to every connected client.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::config::AnnounceConfig;
use crate::hub::{fired, Hub, MIN_PING_INTERVAL};

pub struct Announcer {
    hub: Hub,
    period: Duration,
    message: Bytes,
}

impl Announcer {
    pub fn new(hub: Hub, period: Duration, message: impl Into<Bytes>) -> Self {
        Self {
            hub,
            period: period.max(MIN_PING_INTERVAL),
            message: message.into(),
        }
    }

    /// Build the announcer, or `None` when announcements are disabled.
    pub fn from_config(hub: Hub, config: &AnnounceConfig) -> Option<Self> {
        config
            .interval
            .map(|period| Self::new(hub, period, config.message.clone()))
    }

    /// Run until `shutdown` flips or the hub starts shutting down.
    #[instrument(skip(self, shutdown), fields(period = ?self.period))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting announcer");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.hub.is_shutting_down() {
                        break;
                    }
                    debug!("Broadcasting announcement");
                    self.hub.broadcast(self.message.clone()).await;
                }
                _ = fired(&mut shutdown) => break,
            }
        }

        info!("Announcer shutting down");
    }
}

/// Handle for stopping the announcer
pub struct AnnouncerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl AnnouncerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for AnnouncerHandle {
    fn default() -> Self {
        Self::new().0
    }
}
