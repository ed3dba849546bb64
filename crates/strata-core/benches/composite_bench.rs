use criterion::{criterion_group, criterion_main, Criterion};
use image::Rgba;
use std::hint::black_box;
use strata_core::filter::{Brightness, Invert};
use strata_core::{BlendMode, Composition, HolderRef, Layer};

fn layered(width: u32, height: u32) -> Composition {
    let mut comp = Composition::new("bench", width, height);
    comp.add_layer(HolderRef::Root, Layer::fill("paper", Rgba([240, 235, 220, 255])))
        .unwrap();
    for (i, mode) in [BlendMode::Multiply, BlendMode::Screen, BlendMode::Overlay]
        .into_iter()
        .enumerate()
    {
        let color = Rgba([40 * i as u8, 120, 200 - 50 * i as u8, 200]);
        comp.add_layer(
            HolderRef::Root,
            Layer::fill(format!("fill {}", i), color)
                .with_blend_mode(mode)
                .with_opacity(0.6),
        )
        .unwrap();
    }
    comp
}

fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");

    group.bench_function("flatten_1080p_4_layers", |b| {
        let mut comp = layered(1920, 1080);
        let top = comp.root_layers()[3];
        let mut opacity = 0.5;
        b.iter(|| {
            // Force a recompute every iteration
            opacity = if opacity > 0.5 { 0.4 } else { 0.6 };
            comp.set_opacity(top, opacity).unwrap();
            black_box(comp.composite_image().unwrap());
        });
    });

    group.bench_function("smart_filter_edit_last_of_3", |b| {
        let mut content = Composition::new("content", 1280, 720);
        content
            .add_layer(HolderRef::Root, Layer::fill("base", Rgba([10, 80, 160, 255])))
            .unwrap();
        let mut comp = Composition::new("bench", 1280, 720);
        let so = comp
            .add_layer(HolderRef::Root, Layer::smart_object("so", content))
            .unwrap();
        comp.add_smart_filter(so, "invert", Box::new(Invert)).unwrap();
        comp.add_smart_filter(so, "brighten", Box::new(Brightness::new(0.1)))
            .unwrap();
        let last = comp.add_smart_filter(so, "invert 2", Box::new(Invert)).unwrap();
        comp.composite_image().unwrap();

        b.iter(|| {
            comp.filter_settings_changed(last).unwrap();
            black_box(comp.composite_image().unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_composite);
criterion_main!(benches);
