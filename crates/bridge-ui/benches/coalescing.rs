use bridge_core::{BridgeOptions, Props, TransportDetector, TransportKind, ViewId, ViewType};
use bridge_testing::{StubTransportFactory, TestHarness, WireLog};
use bridge_ui::{diff_props, flatten_style, NativeContext, StyleCache};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

const VIEW_COUNT: usize = 128;
const UPDATES_PER_VIEW_SAMPLES: &[usize] = &[1, 4, 16, 64];

fn props(value: Value) -> Props {
    match value {
        Value::Object(map) => map,
        _ => Props::new(),
    }
}

struct BridgeFixture {
    harness: TestHarness,
    context: NativeContext,
    log: WireLog,
    views: Vec<ViewId>,
    tick: u64,
}

impl BridgeFixture {
    fn new(view_count: usize) -> Self {
        let harness = TestHarness::new();
        let log = WireLog::new();
        let detector = TransportDetector::new().with(StubTransportFactory::new(
            TransportKind::InMemory,
            log.clone(),
        ));
        let context = NativeContext::new(harness.handle(), BridgeOptions::default(), detector);
        context.connect().expect("connect");

        let renderer = context.renderer();
        let root = renderer.create_view(ViewType::View, Props::new());
        let views = (0..view_count)
            .map(|n| {
                let id = renderer.create_view(
                    ViewType::Text,
                    props(json!({"text": format!("Row {n}"), "style": {"padding": 4}})),
                );
                renderer.append_child(&root, &id).expect("append");
                id
            })
            .collect();
        renderer.set_root_view(&root).expect("root");

        let mut fixture = Self {
            harness,
            context,
            log,
            views,
            tick: 0,
        };
        fixture.settle();
        fixture
    }

    /// Stages `updates` writes per view, then runs the microtask and the
    /// frame flush. Returns the number of frames that reached the transport.
    fn update_round(&mut self, updates: usize) -> usize {
        let renderer = self.context.renderer();
        for id in &self.views {
            for _ in 0..updates {
                self.tick += 1;
                renderer
                    .update_view(id, props(json!({"text": format!("Tick {}", self.tick)})))
                    .expect("update");
            }
        }
        self.settle()
    }

    fn settle(&mut self) -> usize {
        self.harness.pump();
        self.harness
            .advance(self.context.bridge().options().flush_interval_ms);
        self.log.take_frames().len()
    }
}

fn bench_update_coalescing(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_coalescing");
    for &updates in UPDATES_PER_VIEW_SAMPLES {
        group.bench_with_input(
            BenchmarkId::new("updates_per_view", updates),
            &updates,
            |b, &updates| {
                let mut fixture = BridgeFixture::new(VIEW_COUNT);
                b.iter(|| black_box(fixture.update_round(updates)));
            },
        );
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let previous = props(json!({
        "text": "Item",
        "visible": true,
        "style": {"padding": 4, "margin": 2, "color": "#202020"},
    }));
    let next = props(json!({
        "text": "Item",
        "visible": true,
        "style": {"padding": 8, "margin": 2, "color": "#202020"},
    }));

    c.bench_function("diff_props", |b| {
        b.iter(|| black_box(diff_props(&previous, &next)));
    });
}

fn bench_style(c: &mut Criterion) {
    let style = props(json!({
        "margin": 8,
        "marginTop": 0,
        "paddingHorizontal": 12,
        "borderRadius": 6,
        "backgroundColor": "#ffffff",
    }));

    c.bench_function("flatten_style", |b| {
        b.iter(|| black_box(flatten_style(&style)));
    });

    let mut cache = StyleCache::new(BridgeOptions::default().style_cache_capacity);
    c.bench_function("flatten_style_cached", |b| {
        b.iter(|| black_box(cache.flatten(&style)));
    });
}

criterion_group!(coalescing, bench_update_coalescing, bench_diff, bench_style);
criterion_main!(coalescing);
