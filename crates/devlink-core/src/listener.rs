//! Bounded event listening.
//!
//! An [`EventListener`] yields the events published on one connection until
//! its deadline passes, the connection closes or its cancellation token
//! fires. It is finite and cannot be restarted; open a new one with
//! [`DeviceClient::listen`](crate::DeviceClient::listen).

use crate::cancel::CancellationToken;
use crate::client::LinkState;
use crate::codec::Event;
use futures::stream::{self, Stream};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    /// The listening window elapsed.
    TimedOut,
    /// The service closed the connection.
    ConnectionClosed,
    /// The cancellation token fired.
    Cancelled,
}

impl ListenOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenOutcome::TimedOut => "timed_out",
            ListenOutcome::ConnectionClosed => "connection_closed",
            ListenOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ListenOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Listener lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Polling,
    Finished(ListenOutcome),
}

enum Step {
    Deliver(Event),
    Skip,
    Stop(ListenOutcome),
}

/// Finite sequence of events from one connection.
pub struct EventListener {
    events: broadcast::Receiver<Event>,
    link: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    timeout: Duration,
    deadline: Instant,
    state: ListenerState,
    delivered: usize,
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl EventListener {
    /// The listening window starts now.
    pub(crate) fn new(
        events: broadcast::Receiver<Event>,
        link: watch::Receiver<LinkState>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            link,
            cancel,
            timeout,
            deadline: Instant::now() + timeout,
            state: ListenerState::Idle,
            delivered: 0,
        }
    }

    /// Wait for the next event. `None` once the listener has stopped.
    pub async fn next(&mut self) -> Option<Event> {
        if let ListenerState::Finished(_) = self.state {
            return None;
        }
        if self.state == ListenerState::Idle {
            debug!("Listening for events for {:?}", self.timeout);
            self.state = ListenerState::Polling;
        }

        loop {
            let step = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => Step::Stop(ListenOutcome::Cancelled),
                received = self.events.recv() => match received {
                    Ok(event) => Step::Deliver(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Listener lagged behind, skipped {} events", skipped);
                        Step::Skip
                    }
                    Err(RecvError::Closed) => Step::Stop(ListenOutcome::ConnectionClosed),
                },
                _ = link_closed(&mut self.link) => Step::Stop(ListenOutcome::ConnectionClosed),
                _ = tokio::time::sleep_until(self.deadline) => Step::Stop(ListenOutcome::TimedOut),
            };

            // Events still buffered when the window closes are not part
            // of it.
            let step = match step {
                Step::Deliver(_) if Instant::now() >= self.deadline => {
                    Step::Stop(ListenOutcome::TimedOut)
                }
                other => other,
            };

            match step {
                Step::Deliver(event) => {
                    self.delivered += 1;
                    return Some(event);
                }
                Step::Skip => continue,
                Step::Stop(outcome) => {
                    debug!(
                        "Listener finished: {} after {} events",
                        outcome, self.delivered
                    );
                    self.state = ListenerState::Finished(outcome);
                    return None;
                }
            }
        }
    }

    /// How the listener ended, once it has.
    pub fn outcome(&self) -> Option<ListenOutcome> {
        match self.state {
            ListenerState::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Number of events yielded so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Drain the listener, returning every event and the outcome.
    pub async fn collect(mut self) -> (Vec<Event>, ListenOutcome) {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        // next() only returns None after setting an outcome.
        let outcome = self.outcome().unwrap_or(ListenOutcome::ConnectionClosed);
        (events, outcome)
    }

    /// Adapt into a `Stream` of events.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        stream::unfold(self, |mut listener| async move {
            listener.next().await.map(|event| (event, listener))
        })
    }
}

/// Resolves once the link is closed or its sender is gone.
async fn link_closed(link: &mut watch::Receiver<LinkState>) {
    loop {
        if *link.borrow_and_update() == LinkState::Closed {
            return;
        }
        if link.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EventType;
    use futures::StreamExt;

    struct Channels {
        events: broadcast::Sender<Event>,
        link: watch::Sender<LinkState>,
    }

    fn open(timeout: Duration, cancel: CancellationToken) -> (EventListener, Channels) {
        let (events, rx) = broadcast::channel(4);
        let (link, link_rx) = watch::channel(LinkState::Open);
        (
            EventListener::new(rx, link_rx, timeout, cancel),
            Channels { events, link },
        )
    }

    fn event(event_type: EventType) -> Event {
        Event {
            event_type,
            device_type: "payment".into(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_window() {
        let (mut listener, _channels) = open(Duration::from_secs(1), CancellationToken::new());
        assert_eq!(listener.state(), ListenerState::Idle);

        let started = Instant::now();
        assert!(listener.next().await.is_none());
        assert_eq!(listener.outcome(), Some(ListenOutcome::TimedOut));
        assert!(started.elapsed() >= Duration::from_secs(1));

        // Finished listeners stay finished.
        assert!(listener.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_then_times_out() {
        let (listener, channels) = open(Duration::from_secs(1), CancellationToken::new());
        channels
            .events
            .send(event(EventType::PaymentComplete))
            .unwrap();

        let (events, outcome) = listener.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PaymentComplete);
        assert_eq!(outcome, ListenOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_closed_link_stops_immediately() {
        let (mut listener, channels) =
            open(Duration::from_secs(30), CancellationToken::new());
        channels.link.send_replace(LinkState::Closed);

        let result = tokio::time::timeout(Duration::from_secs(1), listener.next())
            .await
            .expect("listener should stop at once");
        assert!(result.is_none());
        assert_eq!(listener.outcome(), Some(ListenOutcome::ConnectionClosed));
        assert_eq!(listener.delivered(), 0);
    }

    #[tokio::test]
    async fn test_dropped_channels_count_as_closed() {
        let (mut listener, channels) =
            open(Duration::from_secs(30), CancellationToken::new());
        drop(channels);

        assert!(listener.next().await.is_none());
        assert_eq!(listener.outcome(), Some(ListenOutcome::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_cancel_stops_listener() {
        let token = CancellationToken::new();
        let (mut listener, _channels) = open(Duration::from_secs(30), token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        assert!(listener.next().await.is_none());
        assert_eq!(listener.outcome(), Some(ListenOutcome::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_listener_skips_and_continues() {
        let (listener, channels) = open(Duration::from_secs(1), CancellationToken::new());
        // Capacity is 4; the first two are overwritten.
        for _ in 0..6 {
            channels
                .events
                .send(event(EventType::PaymentStateChanged))
                .unwrap();
        }

        let (events, outcome) = listener.collect().await;
        assert_eq!(events.len(), 4);
        assert_eq!(outcome, ListenOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_after_window_is_not_delivered() {
        let (mut listener, channels) = open(Duration::from_secs(1), CancellationToken::new());
        for _ in 0..3 {
            channels
                .events
                .send(event(EventType::PaymentStateChanged))
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(listener.next().await.is_none());
        assert_eq!(listener.outcome(), Some(ListenOutcome::TimedOut));
        assert_eq!(listener.delivered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_adapter() {
        let (listener, channels) = open(Duration::from_secs(1), CancellationToken::new());
        channels
            .events
            .send(event(EventType::DeviceStateChanged))
            .unwrap();
        channels
            .events
            .send(event(EventType::PaymentCancelled))
            .unwrap();

        let types: Vec<EventType> = listener
            .into_stream()
            .map(|e| e.event_type)
            .collect()
            .await;
        assert_eq!(
            types,
            vec![EventType::DeviceStateChanged, EventType::PaymentCancelled]
        );
    }
}
