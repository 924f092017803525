//! Unsolicited result code handlers and their registry.
//!
//! The modem announces asynchronous events (an MQTT message arriving, the
//! network dropping) by emitting a fixed prefix into the same stream that
//! carries command responses. Every byte a wait consumes is offered to the
//! registered handlers before the wait's own candidates are tested, so an
//! announcement is caught no matter which command is in flight.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AtError, AtResult};
use crate::queue::BoundedQueue;
use crate::stream::Stream;
use crate::window::RollingWindow;

/// Event codes pushed into the engine's URC queue after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrcEvent {
    /// An inbound MQTT message was decoded into the client inbox.
    MqttMessageRx,
    /// The MQTT broker connection was lost.
    MqttConnectionLost,
    /// The MQTT service lost the network.
    MqttNoNet,
    /// The HTTP server closed the connection.
    HttpPeerClosed,
    /// The HTTP service lost the network.
    HttpNoNet,
    /// A GNSS NMEA sentence was captured.
    GnssSentence,
    /// The server closed an SSL/TCP socket.
    SslPeerClosed,
}

/// A handler triggered when the stream ends with its pattern.
///
/// Handlers are triggers: whatever they decode goes into a queue they share
/// with the façade that registered them. The wait that dispatched them never
/// sees their result.
pub trait UrcHandler: Send {
    /// Literal prefix the modem emits to announce the notification.
    fn pattern(&self) -> &str;

    /// Event code queued after a successful [`process`](UrcHandler::process).
    fn event(&self) -> Option<UrcEvent> {
        None
    }

    /// Consume the rest of the notification.
    ///
    /// Bytes read through `stream` bypass the rolling window.
    fn process(&mut self, stream: &mut Stream<'_>) -> AtResult<()>;
}

/// Handler that only records an event code.
#[derive(Debug, Clone)]
pub struct NotificationHandler {
    pattern: String,
    event: UrcEvent,
}

impl NotificationHandler {
    pub fn new(pattern: impl Into<String>, event: UrcEvent) -> Self {
        NotificationHandler {
            pattern: pattern.into(),
            event,
        }
    }
}

impl UrcHandler for NotificationHandler {
    fn pattern(&self) -> &str {
        &self.pattern
    }

    fn event(&self) -> Option<UrcEvent> {
        Some(self.event)
    }

    fn process(&mut self, _stream: &mut Stream<'_>) -> AtResult<()> {
        Ok(())
    }
}

/// Token returned by [`UrcRegistry::register`], used to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

struct Slot {
    id: HandlerId,
    handler: Box<dyn UrcHandler>,
}

/// Fixed-size set of registered handlers, tested in insertion order.
pub struct UrcRegistry {
    slots: Vec<Slot>,
    capacity: usize,
    next_id: u32,
}

impl std::fmt::Debug for UrcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrcRegistry")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl UrcRegistry {
    /// Create a registry with room for `capacity` handlers.
    pub fn new(capacity: usize) -> Self {
        UrcRegistry {
            slots: Vec::with_capacity(capacity),
            capacity,
            next_id: 0,
        }
    }

    /// Add a handler after all existing ones.
    pub fn register(&mut self, handler: Box<dyn UrcHandler>) -> AtResult<HandlerId> {
        if self.slots.len() >= self.capacity {
            return Err(AtError::RegistryFull {
                capacity: self.capacity,
            });
        }
        let id = HandlerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        debug!("Registered URC handler for {:?}", handler.pattern());
        self.slots.push(Slot { id, handler });
        Ok(id)
    }

    /// Remove a handler, returning it. Remaining handlers keep their order.
    pub fn deregister(&mut self, id: HandlerId) -> Option<Box<dyn UrcHandler>> {
        let index = self.slots.iter().position(|slot| slot.id == id)?;
        let slot = self.slots.remove(index);
        debug!("Deregistered URC handler for {:?}", slot.handler.pattern());
        Some(slot.handler)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registered patterns in dispatch order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.handler.pattern())
    }

    /// Run every handler whose pattern the window currently ends with.
    ///
    /// Handler errors are logged and swallowed: the wait in progress has its
    /// own outcome to report, and a half-read notification must not abort it.
    pub(crate) fn dispatch(
        &mut self,
        window: &RollingWindow,
        stream: &mut Stream<'_>,
        events: &mut BoundedQueue<UrcEvent>,
    ) {
        for slot in self.slots.iter_mut() {
            if !window.ends_with(slot.handler.pattern().as_bytes()) {
                continue;
            }
            debug!("Dispatching URC {:?}", slot.handler.pattern());
            match slot.handler.process(stream) {
                Ok(()) => {
                    if let Some(event) = slot.handler.event() {
                        if events.is_full() {
                            warn!("URC queue full, dropping oldest event");
                        }
                        events.push(event);
                    }
                }
                Err(e) => {
                    warn!("URC handler for {:?} failed: {}", slot.handler.pattern(), e);
                }
            }
        }
    }
}
