use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::isolate_handler;
use crate::hash::HashMap;
use crate::runtime::RuntimeHandle;
use crate::subscription::Subscription;
use crate::view::ViewId;

/// An event raised by a native view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeEvent {
    pub view_id: ViewId,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: u64,
}

type EventHandler = Rc<dyn Fn(&NativeEvent)>;
type HandlerList = Vec<(u64, EventHandler)>;

struct DispatcherInner {
    runtime: RuntimeHandle,
    view_handlers: RefCell<HashMap<(ViewId, String), HandlerList>>,
    global_handlers: RefCell<HashMap<String, HandlerList>>,
    next_id: Cell<u64>,
}

/// Routes native events to per-view and global subscribers.
///
/// Each handler runs isolated: a panicking handler is logged and the
/// remaining handlers still run.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Rc<DispatcherInner>,
}

impl EventDispatcher {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self {
            inner: Rc::new(DispatcherInner {
                runtime,
                view_handlers: RefCell::new(HashMap::new()),
                global_handlers: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    pub fn register(
        &self,
        view_id: &ViewId,
        event_type: &str,
        handler: impl Fn(&NativeEvent) + 'static,
    ) -> Subscription {
        let id = self.next_id();
        let key = (view_id.clone(), event_type.to_string());
        self.inner
            .view_handlers
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .push((id, Rc::new(handler)));
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                remove_from(&mut inner.view_handlers.borrow_mut(), &key, id);
            }
        })
    }

    /// Observes `event_type` on every view.
    pub fn register_global(
        &self,
        event_type: &str,
        handler: impl Fn(&NativeEvent) + 'static,
    ) -> Subscription {
        let id = self.next_id();
        let key = event_type.to_string();
        self.inner
            .global_handlers
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .push((id, Rc::new(handler)));
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                remove_from(&mut inner.global_handlers.borrow_mut(), &key, id);
            }
        })
    }

    /// Invokes view-scoped handlers, then global ones. Returns how many ran
    /// to completion.
    pub fn dispatch(&self, view_id: &ViewId, event_type: &str, data: Value) -> usize {
        let event = NativeEvent {
            view_id: view_id.clone(),
            event_type: event_type.to_string(),
            data,
            timestamp: self.inner.runtime.now_millis(),
        };
        self.dispatch_event(&event)
    }

    pub fn dispatch_event(&self, event: &NativeEvent) -> usize {
        let key = (event.view_id.clone(), event.event_type.clone());
        let mut handlers = snapshot(self.inner.view_handlers.borrow().get(&key));
        handlers.extend(snapshot(
            self.inner.global_handlers.borrow().get(&event.event_type),
        ));

        let mut completed = 0;
        for handler in handlers {
            match isolate_handler(&event.event_type, || handler(event)) {
                Ok(()) => completed += 1,
                Err(err) => log::error!("{err} (view {})", event.view_id),
            }
        }
        completed
    }

    /// Drops every handler registered for `view_id`.
    pub fn unregister_view(&self, view_id: &ViewId) {
        self.inner
            .view_handlers
            .borrow_mut()
            .retain(|(view, _), _| view != view_id);
    }

    pub fn has_handlers(&self, view_id: &ViewId) -> bool {
        self.inner
            .view_handlers
            .borrow()
            .keys()
            .any(|(view, _)| view == view_id)
    }

    pub fn handler_count(&self) -> usize {
        let scoped: usize = self.inner.view_handlers.borrow().values().map(Vec::len).sum();
        let global: usize = self.inner.global_handlers.borrow().values().map(Vec::len).sum();
        scoped + global
    }

    pub fn clear(&self) {
        self.inner.view_handlers.borrow_mut().clear();
        self.inner.global_handlers.borrow_mut().clear();
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }
}

fn snapshot(list: Option<&HandlerList>) -> Vec<EventHandler> {
    list.map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
        .unwrap_or_default()
}

fn remove_from<K: std::hash::Hash + Eq>(map: &mut HashMap<K, HandlerList>, key: &K, id: u64) {
    if let Some(list) = map.get_mut(key) {
        list.retain(|(handler_id, _)| *handler_id != id);
        if list.is_empty() {
            map.remove(key);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::EventDispatcher;
    use crate::runtime::TestRuntime;
    use crate::view::ViewId;

    #[test]
    fn view_handlers_run_before_global_ones() {
        let runtime = TestRuntime::new();
        let dispatcher = EventDispatcher::new(runtime.handle());
        let order = Rc::new(RefCell::new(Vec::new()));
        let button = ViewId::from("view_1");

        let log = order.clone();
        let _global = dispatcher.register_global("press", move |_| {
            log.borrow_mut().push("global");
        });
        let log = order.clone();
        let _first = dispatcher.register(&button, "press", move |_| {
            log.borrow_mut().push("first");
        });
        let log = order.clone();
        let _second = dispatcher.register(&button, "press", move |event| {
            assert_eq!(event.data, json!({"x": 1}));
            log.borrow_mut().push("second");
        });

        assert_eq!(dispatcher.dispatch(&button, "press", json!({"x": 1})), 3);
        assert_eq!(*order.borrow(), vec!["first", "second", "global"]);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let runtime = TestRuntime::new();
        let dispatcher = EventDispatcher::new(runtime.handle());
        let hits = Rc::new(RefCell::new(0));
        let view = ViewId::from("view_2");

        let _bad = dispatcher.register(&view, "change", |_| panic!("broken handler"));
        let counter = hits.clone();
        let _good = dispatcher.register_global("change", move |_| *counter.borrow_mut() += 1);

        assert_eq!(dispatcher.dispatch(&view, "change", json!(null)), 1);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn unregister_view_and_unsubscribe_remove_handlers() {
        let runtime = TestRuntime::new();
        let dispatcher = EventDispatcher::new(runtime.handle());
        let view = ViewId::from("view_3");
        let other = ViewId::from("view_4");

        let _a = dispatcher.register(&view, "press", |_| {});
        let _b = dispatcher.register(&view, "longPress", |_| {});
        let keep = dispatcher.register(&other, "press", |_| {});
        assert_eq!(dispatcher.handler_count(), 3);

        dispatcher.unregister_view(&view);
        assert!(!dispatcher.has_handlers(&view));
        assert!(dispatcher.has_handlers(&other));

        keep.unsubscribe();
        assert_eq!(dispatcher.handler_count(), 0);
        assert_eq!(dispatcher.dispatch(&view, "press", json!(null)), 0);
    }
}
