//! Outbound armory events

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use crate::models::event::ArmoryEvent;

/// Receives lending state changes for activity logging and notifications.
///
/// Publishing never fails the operation that produced the event.
pub trait ArmoryEventSink: Send + Sync {
    fn publish(&self, event: ArmoryEvent);
}

/// Writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl ArmoryEventSink for TracingEventSink {
    fn publish(&self, event: ArmoryEvent) {
        tracing::info!(
            event_id = %event.id,
            kind = %event.kind,
            item_instance_id = event.item_instance_id,
            clan_id = event.clan_id,
            lender_user_id = event.lender_user_id,
            borrower_user_id = ?event.borrower_user_id,
            at = %event.at,
            "Armory event"
        );
    }
}

/// Fans events out to any number of subscribers
#[derive(Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<ArmoryEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArmoryEvent> {
        self.sender.subscribe()
    }

    /// Stream of events; events missed by a lagging subscriber are skipped
    pub fn stream(&self) -> impl Stream<Item = ArmoryEvent> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Armory event subscriber lagging: {}", e);
                None
            }
        })
    }
}

impl ArmoryEventSink for BroadcastEventSink {
    fn publish(&self, event: ArmoryEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

/// Publishes to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn ArmoryEventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ArmoryEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ArmoryEventSink for FanoutEventSink {
    fn publish(&self, event: ArmoryEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

/// Keeps every published event, for inspection
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<ArmoryEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ArmoryEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ArmoryEventSink for RecordingEventSink {
    fn publish(&self, event: ArmoryEvent) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
    }
}
