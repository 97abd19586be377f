//! Change notification mechanics: bus abstraction, message shape, and
//! decoding of notifications emitted by the posts service.

pub mod bus;
pub mod in_memory_bus;
pub mod inbound;
pub mod message;

pub use bus::{EventBus, Settlement, Subscription};
pub use in_memory_bus::{Deduplicated, InMemoryBusError, InMemoryEventBus};
pub use inbound::{DecodeError, InboundChange};
pub use message::{BusMessage, MessageAttribute, OPERATION_ATTRIBUTE};
