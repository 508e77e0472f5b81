use std::cell::Cell;
use std::rc::Rc;

use bridge_core::{BridgeOptions, BridgeResult, Props, TransportDetector, TransportKind, ViewType};
use bridge_runtime_std::{options_from_env, StdRuntime};
use bridge_testing::{NativeMirror, StubTransportFactory, WireLog};
use bridge_ui::{NativeContext, MEASURE_VIEW_MESSAGE_TYPE};
use futures::FutureExt;
use serde_json::{json, Value};

const ITEM_COUNT: usize = 3;

fn props(value: Value) -> Props {
    match value {
        Value::Object(map) => map,
        _ => Props::new(),
    }
}

/// Plays the native side: answers measurements with a fixed row layout.
fn fake_native_side(frame: &Value) -> Option<Value> {
    match frame.get("type")?.as_str()? {
        MEASURE_VIEW_MESSAGE_TYPE => Some(json!({
            "id": frame.get("id")?,
            "success": true,
            "data": {"x": 0.0, "y": 64.0, "width": 360.0, "height": 48.0},
        })),
        _ => None,
    }
}

/// Pumps the runtime, parking between turns until nothing is scheduled.
fn run_until_idle(runtime: &StdRuntime) {
    loop {
        runtime.pump();
        if !runtime.wait_for_work() {
            break;
        }
    }
}

fn main() -> BridgeResult<()> {
    env_logger::init();

    println!("=== Native bridge loopback demo ===");
    println!("Builds a small view tree, drives it through the bridge and");
    println!("prints the tree as the in-process native side sees it.");
    println!();

    let options = options_from_env().unwrap_or_else(|err| {
        log::warn!("ignoring bridge environment: {err}");
        BridgeOptions::default()
    });
    let runtime = StdRuntime::new();
    let wire = WireLog::new();
    wire.set_responder(fake_native_side);
    let detector = TransportDetector::new().with(StubTransportFactory::new(
        TransportKind::InMemory,
        wire.clone(),
    ));
    let context = NativeContext::new(runtime.runtime_handle(), options, detector);
    let kind = context.connect()?;
    println!("connected over {kind} transport");

    let renderer = context.renderer();
    let root = renderer.create_view(ViewType::View, props(json!({"testId": "root"})));
    let title = renderer.create_component("text", props(json!({"children": "Inbox"})))?;
    let list = renderer.create_view(ViewType::List, Props::new());
    renderer.append_child(&root, &title)?;
    renderer.append_child(&root, &list)?;

    let mut rows = Vec::with_capacity(ITEM_COUNT);
    for n in 0..ITEM_COUNT {
        let row = renderer.create_component("button", props(json!({"title": format!("Item {n}")})))?;
        renderer.append_child(&list, &row)?;
        rows.push(row);
    }
    renderer.set_root_view(&root)?;
    renderer.set_style(&list, &props(json!({"padding": 8, "borderRadius": 4})))?;

    let presses = Rc::new(Cell::new(0));
    let counter = presses.clone();
    let _press = renderer.register_global_listener("press", move |event| {
        counter.set(counter.get() + 1);
        log::info!("press on {}", event.view_id);
    });
    for row in &rows {
        wire.emit_view_event(row.as_str(), "press", json!({}));
    }

    for n in 1..=10 {
        renderer.update_view(&title, props(json!({"text": format!("Inbox ({n})")})))?;
    }
    run_until_idle(&runtime);

    match renderer.measure_view(&rows[0]).now_or_never() {
        Some(Ok(layout)) => println!(
            "first row measured at {}x{} (+{}, +{})",
            layout.width, layout.height, layout.x, layout.y
        ),
        Some(Err(err)) => log::warn!("measure failed: {err}"),
        None => log::warn!("measure is still pending"),
    }

    if let Some(last) = rows.pop() {
        renderer.remove_view(&last)?;
    }
    run_until_idle(&runtime);

    let mut mirror = NativeMirror::new();
    let applied = mirror.sync(&wire)?;
    println!("presses routed: {}", presses.get());
    println!("operations applied on the native side: {applied}");
    println!("queue: {:?}", renderer.queue().stats());
    println!("style cache: {:?}", renderer.style_cache_stats());
    println!();
    print!("{}", mirror.dump(&root));

    context.shutdown();
    Ok(())
}
