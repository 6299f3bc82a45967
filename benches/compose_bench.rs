use criterion::{criterion_group, criterion_main, Criterion};

use badgeserver::{compose, BadgeRequest, BadgeService, FixedWidthMetrics, RasterBackend, TemplateStore};

// Run with:
//    cargo bench --bench compose_bench

fn request() -> BadgeRequest {
    BadgeRequest {
        vendor: "build".into(),
        status: "passing".into(),
        color: "green".into(),
        ..Default::default()
    }
}

/// Bench: template parse + composition
fn bench_compose(c: &mut Criterion) {
    let store = TemplateStore::embedded().expect("embedded template");
    let metrics = FixedWidthMetrics::default();
    let req = request();

    c.bench_function("load_and_compose", |b| {
        b.iter(|| {
            let doc = store.load().unwrap();
            compose(&doc, &req, &metrics).unwrap();
        })
    });
}

/// Bench: full SVG and PNG rendering
fn bench_render(c: &mut Criterion) {
    let service = BadgeService::with_defaults().expect("service");
    let req = request();

    c.bench_function("render_svg", |b| {
        b.iter(|| {
            service.render_svg(&req).unwrap();
        })
    });

    c.bench_function("render_png_default", |b| {
        b.iter(|| {
            service.render_png(&req, RasterBackend::Default).unwrap();
        })
    });
}

criterion_group!(benches, bench_compose, bench_render);
criterion_main!(benches);
