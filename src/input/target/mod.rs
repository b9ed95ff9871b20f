use std::io;

use thiserror::Error;

use crate::drivers::hanvon::{event::Event, profile::DeviceProfile};

pub mod tablet;

/// Possible errors writing to a target device
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write to virtual device: {0}")]
    Io(#[from] io::Error),
    #[error("event not supported by the virtual device: {0:?}")]
    Unsupported(Event),
}

/// A target device is any virtual input device that receives decoded tablet
/// events. Events written with [EventSink::write_event] describe one input
/// sample until [EventSink::sync] is called.
pub trait EventSink {
    /// Write a single event to the device
    fn write_event(&mut self, event: &Event) -> Result<(), SinkError>;
    /// Terminate the current batch of events
    fn sync(&mut self) -> Result<(), SinkError>;
}

/// Creates target devices for a given tablet. Dropping a created sink
/// destroys the device.
pub trait SinkFactory {
    type Sink: EventSink;

    fn create(&mut self, profile: &DeviceProfile) -> Result<Self::Sink, SinkError>;
}

/// Forward a batch of events to the given sink, in order. A failed write is
/// logged and the rest of the batch is still sent, and the batch is always
/// terminated with a sync. Returns the result of that sync.
pub fn apply<S: EventSink + ?Sized>(sink: &mut S, events: &[Event]) -> Result<(), SinkError> {
    if events.is_empty() {
        return Ok(());
    }

    let mut synced = None;
    for event in events {
        if *event == Event::SyncBatchEnd {
            synced = Some(sink.sync());
            continue;
        }
        if let Err(e) = sink.write_event(event) {
            log::debug!("Failed to write event {event:?}: {e}");
        }
    }

    match synced {
        Some(result) => result,
        None => sink.sync(),
    }
}
