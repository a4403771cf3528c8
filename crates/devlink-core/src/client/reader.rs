//! Connection reader task.
//!
//! Owns the read half of the transport and demultiplexes every frame:
//! responses complete the pending command with the same `commandId`,
//! events go to the broadcast channel, anything else is dropped.

use super::pending::PendingTable;
use super::LinkState;
use crate::backoff::{Backoff, BackoffConfig};
use crate::codec::{Envelope, Event};
use crate::error::LinkError;
use crate::transport::TransportReader;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

/// Where decoded frames go.
#[derive(Clone)]
pub(crate) struct Demux {
    pub pending: PendingTable,
    pub events: broadcast::Sender<Event>,
    pub link: Arc<watch::Sender<LinkState>>,
}

impl Demux {
    pub fn route(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => match response.command_id.clone() {
                Some(command_id) => {
                    debug!("Response {} ({})", command_id, response.status);
                    if !self.pending.complete(&command_id, response) {
                        warn!("Dropping response for unknown command {}", command_id);
                    }
                }
                None => warn!("Dropping response without commandId"),
            },
            Envelope::Event(event) => {
                debug!("Event {} from {}", event.event_type, event.device_type);
                if self.events.send(event).is_err() {
                    trace!("No active listeners, event discarded");
                }
            }
            Envelope::Command(command) => {
                warn!("Dropping unexpected command frame {}", command.command_type);
            }
        }
    }

    /// Mark the link closed and fail everything still waiting on it.
    pub fn close(&self, reason: &LinkError) {
        self.pending.close(|| LinkError::BrokenConnection);
        self.link.send_replace(LinkState::Closed);
        debug!("Reader stopped: {}", reason);
    }
}

/// Read until the connection breaks.
pub(crate) async fn run(mut reader: TransportReader, demux: Demux, backoff: BackoffConfig) {
    let mut backoff = Backoff::new(backoff);

    let reason = loop {
        match reader.read_envelope().await {
            Ok(envelope) => {
                backoff.reset();
                demux.route(envelope);
            }
            Err(e) if e.is_broken_connection() => break e,
            Err(e @ LinkError::Decode { .. }) => {
                warn!("Dropping undecodable frame: {}", e);
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                warn!(
                    "Read failed ({} in a row): {}. Retrying in {:?}",
                    backoff.failures(),
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!("Reader giving up: {}", e);
                break e;
            }
        }
    };

    demux.close(&reason);
}
