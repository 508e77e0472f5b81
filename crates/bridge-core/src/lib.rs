#![doc = r"Core pieces of the native view bridge: runtime, wire protocol, queue and view mirror."]

pub mod bridge;
pub mod dispatcher;
pub mod error;
pub mod hash;
pub mod message;
pub mod options;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod subscription;
pub mod timer;
pub mod transport;
pub mod view;

pub use bridge::{Bridge, ConnectionState, DeliverySink, NextEvent, PendingResponse};
pub use dispatcher::{EventDispatcher, NativeEvent};
pub use error::{isolate_handler, BridgeError, BridgeResult};
pub use message::{
    BridgeMessage, Inbound, Operation, Priority, Props, Response, BATCH_MESSAGE_TYPE,
    VIEW_EVENT_MESSAGE_TYPE,
};
pub use options::BridgeOptions;
pub use platform::{Clock, RuntimeScheduler};
pub use queue::{BatchSender, MessageQueue, QueueStats, QueuedMessage};
pub use registry::{generate_view_id, ViewRegistry};
pub use runtime::{DefaultScheduler, Runtime, RuntimeHandle};
pub use subscription::Subscription;
pub use timer::TimerRegistration;
pub use transport::{
    NativeChannelFactory, NativeChannelTransport, NativeHost, Transport, TransportDetector,
    TransportEvent, TransportFactory, TransportKind,
};
pub use view::{Layout, ViewId, ViewNode, ViewType};

#[cfg(test)]
pub use runtime::{TestClock, TestRuntime, TestScheduler};
