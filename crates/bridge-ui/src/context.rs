use bridge_core::{
    Bridge, BridgeOptions, BridgeResult, RuntimeHandle, TransportDetector, TransportKind,
};

use crate::renderer::Renderer;

/// Everything a screen needs to talk to the native side, built explicitly
/// and passed down instead of living in a global.
#[derive(Clone, Debug)]
pub struct NativeContext {
    runtime: RuntimeHandle,
    bridge: Bridge,
    renderer: Renderer,
}

impl NativeContext {
    pub fn new(runtime: RuntimeHandle, options: BridgeOptions, detector: TransportDetector) -> Self {
        Self::with_bridge(Bridge::new(runtime, options, detector))
    }

    pub fn with_bridge(bridge: Bridge) -> Self {
        let renderer = Renderer::new(bridge.clone());
        Self {
            runtime: bridge.runtime_handle(),
            bridge,
            renderer,
        }
    }

    pub fn connect(&self) -> BridgeResult<TransportKind> {
        self.bridge.connect()
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Pushes staged updates and queued messages out, then disconnects.
    pub fn shutdown(&self) {
        self.renderer.flush_updates();
        if let Err(err) = self.renderer.queue().drain_all() {
            log::warn!(
                "final flush failed, {} messages dropped: {err}",
                self.renderer.queue().pending_count()
            );
        }
        self.renderer.queue().clear();
        self.bridge.disconnect();
    }
}
