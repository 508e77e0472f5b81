//! Testing utilities and harness for the native view bridge

pub mod harness;
pub mod mirror;
pub mod transport;

pub use harness::{ManualClock, TestHarness};
pub use mirror::{MirrorNode, NativeMirror};
pub use transport::{
    flatten_operations, echo_responder, RecordingTransport, StubTransportFactory,
    UnavailableFactory, WireLog,
};

pub mod prelude {
    pub use crate::harness::*;
    pub use crate::mirror::*;
    pub use crate::transport::*;
}
