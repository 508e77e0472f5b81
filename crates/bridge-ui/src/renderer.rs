//! Façade the component layer drives.
//!
//! The renderer keeps three views of every live native view: the registry
//! node, the props last handed to the queue (`cached_props`), and the props
//! changed since then (`pending_updates`). Updates are diffed against the
//! cached value overlaid with the pending one, merged into the pending
//! accumulator, and emitted as one `updateView` per view when the microtask
//! flush runs.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use bridge_core::hash::HashMap;
use bridge_core::{
    generate_view_id, Bridge, BridgeError, BridgeMessage, BridgeResult, ConnectionState,
    EventDispatcher, Layout, MessageQueue, NativeEvent, Operation, Priority, Props, RuntimeHandle,
    Subscription, ViewId, ViewNode, ViewRegistry, ViewType, VIEW_EVENT_MESSAGE_TYPE,
};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::json;

use crate::component::{ComponentSpec, ComponentTable};
use crate::diff::{diff_against_effective, merge_props};
use crate::style::{style_props, StyleCache, StyleCacheStats};

/// Request type answered by the native side with a [`Layout`].
pub const MEASURE_VIEW_MESSAGE_TYPE: &str = "measureView";

struct RendererInner {
    bridge: Bridge,
    runtime: RuntimeHandle,
    queue: MessageQueue,
    registry: RefCell<ViewRegistry>,
    dispatcher: EventDispatcher,
    components: RefCell<ComponentTable>,
    cached_props: RefCell<HashMap<ViewId, Props>>,
    pending_updates: RefCell<IndexMap<ViewId, Props>>,
    update_flush_scheduled: Cell<bool>,
    style_cache: RefCell<StyleCache>,
    event_subscription: RefCell<Option<Subscription>>,
    state_subscription: RefCell<Option<Subscription>>,
}

impl Drop for RendererInner {
    fn drop(&mut self) {
        for slot in [&mut self.event_subscription, &mut self.state_subscription] {
            if let Some(subscription) = slot.get_mut().take() {
                subscription.unsubscribe();
            }
        }
        self.queue.clear_sender();
    }
}

#[derive(Clone)]
pub struct Renderer {
    inner: Rc<RendererInner>,
}

impl Renderer {
    pub fn new(bridge: Bridge) -> Self {
        let runtime = bridge.runtime_handle();
        let options = bridge.options().clone();
        let queue = MessageQueue::new(runtime.clone(), &options);
        let sender = bridge.clone();
        queue.set_sender(move |batch| sender.send_batch(batch));

        let dispatcher = EventDispatcher::new(runtime.clone());
        let routing = dispatcher.clone();
        let subscription = bridge.on(VIEW_EVENT_MESSAGE_TYPE, move |message| {
            route_view_event(&routing, message);
        });

        let renderer = Self {
            inner: Rc::new(RendererInner {
                bridge,
                runtime,
                queue,
                registry: RefCell::new(ViewRegistry::new()),
                dispatcher,
                components: RefCell::new(ComponentTable::with_builtins()),
                cached_props: RefCell::new(HashMap::new()),
                pending_updates: RefCell::new(IndexMap::new()),
                update_flush_scheduled: Cell::new(false),
                style_cache: RefCell::new(StyleCache::new(options.style_cache_capacity)),
                event_subscription: RefCell::new(Some(subscription)),
                state_subscription: RefCell::new(None),
            }),
        };
        let weak = Rc::downgrade(&renderer.inner);
        let reconnect = renderer.inner.bridge.on_state_change(move |state| {
            if state != ConnectionState::Connected {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                Renderer { inner }.flush_held_messages();
            }
        });
        *renderer.inner.state_subscription.borrow_mut() = Some(reconnect);
        renderer
    }

    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.inner.queue
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Runs `f` with shared access to the local view mirror.
    pub fn with_registry<R>(&self, f: impl FnOnce(&ViewRegistry) -> R) -> R {
        f(&self.inner.registry.borrow())
    }

    pub fn cached_props(&self, id: &ViewId) -> Option<Props> {
        self.inner.cached_props.borrow().get(id).cloned()
    }

    pub fn pending_update(&self, id: &ViewId) -> Option<Props> {
        self.inner.pending_updates.borrow().get(id).cloned()
    }

    pub fn has_pending_updates(&self) -> bool {
        !self.inner.pending_updates.borrow().is_empty()
    }

    pub fn style_cache_stats(&self) -> StyleCacheStats {
        self.inner.style_cache.borrow().stats()
    }

    pub fn register_component(&self, spec: ComponentSpec) {
        self.inner.components.borrow_mut().register(spec);
    }

    /// Creates a native view. Sent at high priority and flushed right away.
    pub fn create_view(&self, view_type: impl Into<ViewType>, props: Props) -> ViewId {
        let id = generate_view_id();
        let view_type = view_type.into();
        self.inner.registry.borrow_mut().register(ViewNode::new(
            id.clone(),
            view_type.clone(),
            props.clone(),
        ));
        self.inner
            .cached_props
            .borrow_mut()
            .insert(id.clone(), props.clone());
        self.enqueue(
            Operation::CreateView {
                view_id: id.clone(),
                view_type,
                props,
            },
            Priority::High,
        );
        if let Err(err) = self.inner.queue.flush_immediate() {
            log::warn!("flush after creating {id} failed: {err}");
        }
        id
    }

    /// Instantiates a registered component kind.
    pub fn create_component(&self, kind: &str, props: Props) -> BridgeResult<ViewId> {
        let (view_type, props) = self.inner.components.borrow().resolve(kind, props)?;
        Ok(self.create_view(view_type, props))
    }

    /// Stages the changed keys of `props` for `id`.
    ///
    /// Nothing is staged or scheduled when no key changes. Repeated calls
    /// before the next microtask coalesce into one `updateView`, last write
    /// wins per key.
    pub fn update_view(&self, id: &ViewId, props: Props) -> BridgeResult<()> {
        if !self.inner.registry.borrow().has(id) {
            return Err(BridgeError::UnknownView(id.clone()));
        }
        let diff = {
            let cached = self.inner.cached_props.borrow();
            let pending = self.inner.pending_updates.borrow();
            diff_against_effective(cached.get(id), pending.get(id), &props)
        };
        if diff.is_empty() {
            return Ok(());
        }
        merge_props(
            self.inner
                .pending_updates
                .borrow_mut()
                .entry(id.clone())
                .or_default(),
            &diff,
        );
        self.schedule_update_flush();
        Ok(())
    }

    /// Applies every staged update: merges it into the cache and registry
    /// and enqueues one `updateView` per view at normal priority.
    pub fn flush_updates(&self) -> usize {
        self.inner.update_flush_scheduled.set(false);
        let pending = std::mem::take(&mut *self.inner.pending_updates.borrow_mut());
        let count = pending.len();
        for (id, diff) in pending {
            merge_props(
                self.inner
                    .cached_props
                    .borrow_mut()
                    .entry(id.clone())
                    .or_default(),
                &diff,
            );
            if let Some(node) = self.inner.registry.borrow_mut().get_mut(&id) {
                merge_props(&mut node.props, &diff);
            }
            self.enqueue(
                Operation::UpdateView {
                    view_id: id,
                    props: diff,
                },
                Priority::Normal,
            );
        }
        count
    }

    /// Flattens style shorthands (cached) and updates the `style` prop.
    pub fn set_style(&self, id: &ViewId, style: &Props) -> BridgeResult<()> {
        let flattened = self.inner.style_cache.borrow_mut().flatten(style);
        self.update_view(id, style_props(flattened))
    }

    /// Removes `id` and all its descendants, children first.
    pub fn remove_view(&self, id: &ViewId) -> BridgeResult<()> {
        let parent = {
            let registry = self.inner.registry.borrow();
            if !registry.has(id) {
                return Err(BridgeError::UnknownView(id.clone()));
            }
            registry.parent(id).cloned()
        };
        if let Some(parent) = parent {
            self.inner.registry.borrow_mut().remove_child(&parent, id);
        }
        self.remove_subtree(id);
        Ok(())
    }

    pub fn append_child(&self, parent: &ViewId, child: &ViewId) -> BridgeResult<()> {
        self.inner.registry.borrow_mut().append_child(parent, child)?;
        self.enqueue(
            Operation::AppendChild {
                parent_id: parent.clone(),
                child_id: child.clone(),
            },
            Priority::Normal,
        );
        Ok(())
    }

    /// Returns the index actually used once clamped to the child count.
    pub fn insert_child(&self, parent: &ViewId, child: &ViewId, index: usize) -> BridgeResult<usize> {
        let index = self
            .inner
            .registry
            .borrow_mut()
            .insert_child(parent, child, index)?;
        self.enqueue(
            Operation::InsertChild {
                parent_id: parent.clone(),
                child_id: child.clone(),
                index,
            },
            Priority::Normal,
        );
        Ok(index)
    }

    /// Returns false, and sends nothing, when `child` was not attached to `parent`.
    pub fn remove_child(&self, parent: &ViewId, child: &ViewId) -> bool {
        let removed = self.inner.registry.borrow_mut().remove_child(parent, child);
        if removed {
            self.enqueue(
                Operation::RemoveChild {
                    parent_id: parent.clone(),
                    child_id: child.clone(),
                },
                Priority::Normal,
            );
        }
        removed
    }

    pub fn set_root_view(&self, id: &ViewId) -> BridgeResult<()> {
        if !self.inner.registry.borrow().has(id) {
            return Err(BridgeError::UnknownView(id.clone()));
        }
        self.enqueue(
            Operation::SetRootView {
                view_id: id.clone(),
            },
            Priority::High,
        );
        Ok(())
    }

    pub fn register_event_listener(
        &self,
        id: &ViewId,
        event_type: &str,
        handler: impl Fn(&NativeEvent) + 'static,
    ) -> BridgeResult<Subscription> {
        if !self.inner.registry.borrow().has(id) {
            return Err(BridgeError::UnknownView(id.clone()));
        }
        Ok(self.inner.dispatcher.register(id, event_type, handler))
    }

    pub fn register_global_listener(
        &self,
        event_type: &str,
        handler: impl Fn(&NativeEvent) + 'static,
    ) -> Subscription {
        self.inner.dispatcher.register_global(event_type, handler)
    }

    /// Asks the native side for the frame of `id`. Always a round trip.
    pub fn measure_view(&self, id: &ViewId) -> impl Future<Output = BridgeResult<Layout>> {
        self.inner
            .bridge
            .request(MEASURE_VIEW_MESSAGE_TYPE, json!({ "viewId": id }))
            .map(|result| {
                result.and_then(|value| {
                    serde_json::from_value::<Layout>(value).map_err(BridgeError::from)
                })
            })
    }

    // Messages refused while disconnected stay queued until the next connect.
    fn flush_held_messages(&self) {
        let pending = self.inner.queue.pending_count();
        if pending == 0 {
            return;
        }
        log::debug!("connected, flushing {pending} held messages");
        if let Err(err) = self.inner.queue.flush_immediate() {
            log::warn!("flush after connecting failed: {err}");
        }
    }

    fn remove_subtree(&self, id: &ViewId) {
        let children = self.inner.registry.borrow().children(id).to_vec();
        for child in &children {
            self.remove_subtree(child);
        }
        self.inner.pending_updates.borrow_mut().shift_remove(id);
        self.inner.cached_props.borrow_mut().remove(id);
        self.inner.dispatcher.unregister_view(id);
        self.inner.registry.borrow_mut().unregister(id);
        self.enqueue(
            Operation::RemoveView {
                view_id: id.clone(),
            },
            Priority::Normal,
        );
    }

    fn schedule_update_flush(&self) {
        if self.inner.update_flush_scheduled.replace(true) {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        self.inner.runtime.spawn_task(move || {
            if let Some(inner) = weak.upgrade() {
                Renderer { inner }.flush_updates();
            }
        });
    }

    fn enqueue(&self, operation: Operation, priority: Priority) {
        if let Err(err) = self.inner.queue.enqueue_operation(&operation, priority) {
            log::error!("could not encode {}: {err}", operation.message_type());
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("views", &self.inner.registry.borrow().len())
            .field("pending_updates", &self.inner.pending_updates.borrow().len())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

fn route_view_event(dispatcher: &EventDispatcher, message: &BridgeMessage) {
    match serde_json::from_value::<NativeEvent>(message.payload.clone()) {
        Ok(event) => {
            dispatcher.dispatch(&event.view_id, &event.event_type, event.data);
        }
        Err(err) => log::warn!("dropping malformed {VIEW_EVENT_MESSAGE_TYPE}: {err}"),
    }
}
