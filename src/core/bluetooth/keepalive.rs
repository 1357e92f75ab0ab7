//! Ping based liveness check of the active session

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::bus::GattCharacteristic;
use crate::error::{PlejdError, Result};

/// The side of the session the monitor pings
#[async_trait]
pub trait PingLink: Send + Sync {
    /// Runs one ping exchange, returning the pong byte
    async fn ping(&self) -> Result<u8>;

    /// Called once when a ping failed; the monitor stops afterwards
    fn ping_failed(&self, reason: PlejdError);
}

/// Writes `sent` to the ping characteristic and checks that the peer
/// answers with `sent + 1` (mod 256).
pub async fn ping_exchange(ping: &dyn GattCharacteristic, sent: u8) -> Result<u8> {
    ping.write(&[sent]).await?;
    let pong = ping.read().await?;

    let received = pong.first().copied();
    if received != Some(sent.wrapping_add(1)) {
        return Err(PlejdError::PingMismatch { sent, received });
    }
    Ok(sent.wrapping_add(1))
}

/// Pings every `interval` until a ping fails or `cancel` fires
pub async fn run(link: Arc<dyn PingLink>, interval: Duration, cancel: CancellationToken) {
    info!("Keepalive started, interval {:?}", interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = link.ping() => outcome,
        };

        match outcome {
            Ok(pong) => trace!("Ping ok ({})", pong),
            Err(e) => {
                warn!("Ping failed, reconnecting: {}", e);
                link.ping_failed(e);
                break;
            }
        }
    }
    info!("Keepalive stopped");
}
