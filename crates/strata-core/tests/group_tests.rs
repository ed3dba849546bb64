use image::Rgba;
use strata_core::filter::Invert;
use strata_core::{BlendMode, Composition, HolderRef, Layer, PixelBuffer};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

fn assert_close(actual: Rgba<u8>, expected: [u8; 4]) {
    for (a, e) in actual.0.iter().zip(expected.iter()) {
        assert!(
            (*a as i32 - *e as i32).abs() <= 2,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }
}

fn same_pixels(a: &PixelBuffer, b: &PixelBuffer) -> bool {
    a.image().as_raw() == b.image().as_raw()
}

#[test]
fn test_pass_through_group_matches_flat_stack() {
    let mut flat = Composition::new("flat", 3, 3);
    flat.add_layer(HolderRef::Root, Layer::fill("white", WHITE)).unwrap();
    flat.add_layer(
        HolderRef::Root,
        Layer::fill("red", RED)
            .with_blend_mode(BlendMode::Multiply)
            .with_opacity(0.5),
    )
    .unwrap();
    flat.add_layer(
        HolderRef::Root,
        Layer::fill("blue", BLUE)
            .with_blend_mode(BlendMode::Screen)
            .with_opacity(0.3),
    )
    .unwrap();

    let mut grouped = Composition::new("grouped", 3, 3);
    grouped
        .add_layer(HolderRef::Root, Layer::fill("white", WHITE))
        .unwrap();
    let group = grouped.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
    assert!(!grouped.is_isolated(group).unwrap());
    grouped
        .add_layer(
            HolderRef::Layer(group),
            Layer::fill("red", RED)
                .with_blend_mode(BlendMode::Multiply)
                .with_opacity(0.5),
        )
        .unwrap();
    grouped
        .add_layer(
            HolderRef::Layer(group),
            Layer::fill("blue", BLUE)
                .with_blend_mode(BlendMode::Screen)
                .with_opacity(0.3),
        )
        .unwrap();

    let a = flat.composite_image().unwrap();
    let b = grouped.composite_image().unwrap();
    assert!(same_pixels(&a, &b));
}

fn stacked(isolated: bool) -> Composition {
    let mut comp = Composition::new("doc", 2, 2);
    comp.add_layer(HolderRef::Root, Layer::fill("white", WHITE)).unwrap();
    let group = comp
        .add_layer(HolderRef::Root, Layer::group("g").with_opacity(0.5))
        .unwrap();
    comp.set_isolated(group, isolated).unwrap();
    comp.add_layer(HolderRef::Layer(group), Layer::fill("red", RED))
        .unwrap();
    comp.add_layer(
        HolderRef::Layer(group),
        Layer::fill("blue", BLUE).with_opacity(0.5),
    )
    .unwrap();
    comp
}

#[test]
fn test_isolated_group_composites_as_unit() {
    let mut isolated = stacked(true);
    let mut pass_through = stacked(false);

    let a = isolated.composite_image().unwrap();
    let b = pass_through.composite_image().unwrap();
    assert!(!same_pixels(&a, &b));

    // Red and half blue mixed first, then half of that over white
    assert_close(a.pixel(0, 0), [192, 128, 192, 255]);
    // Children land directly on white; the group's own opacity is ignored
    assert_close(b.pixel(0, 0), [128, 0, 128, 255]);
}

#[test]
fn test_adjustment_in_pass_through_group_sees_layers_below() {
    let mut comp = Composition::new("doc", 2, 2);
    comp.add_layer(HolderRef::Root, Layer::fill("red", RED)).unwrap();
    let group = comp.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
    comp.add_layer(
        HolderRef::Layer(group),
        Layer::adjustment("invert", Box::new(Invert)),
    )
    .unwrap();

    let image = comp.composite_image().unwrap();
    assert_eq!(image.pixel(1, 1), Rgba([0, 255, 255, 255]));

    // Isolated, the adjustment has nothing beneath it inside the group
    comp.set_isolated(group, true).unwrap();
    let image = comp.composite_image().unwrap();
    assert_eq!(image.pixel(1, 1), RED);
}

#[test]
fn test_isolation_toggle_recomputes() {
    let mut comp = stacked(true);
    let group = comp.find_layer("g").unwrap();
    comp.composite_image().unwrap();
    assert!(comp.layer_cache_stats(group).unwrap().unwrap().valid);

    comp.set_isolated(group, false).unwrap();
    assert!(!comp.cache_stats().valid);
    assert!(!comp.layer_cache_stats(group).unwrap().unwrap().valid);
    assert_eq!(
        comp.layer(group).unwrap().blend_mode(),
        BlendMode::PassThrough
    );
}

#[test]
fn test_hidden_group_hides_children() {
    let mut comp = stacked(true);
    let group = comp.find_layer("g").unwrap();
    comp.set_visible(group, false).unwrap();
    let image = comp.composite_image().unwrap();
    assert_eq!(image.pixel(0, 0), WHITE);
}

#[test]
fn test_group_and_ungroup_keep_image() {
    let mut comp = Composition::new("doc", 2, 2);
    let white = comp.add_layer(HolderRef::Root, Layer::fill("white", WHITE)).unwrap();
    let red = comp
        .add_layer(
            HolderRef::Root,
            Layer::fill("red", RED).with_blend_mode(BlendMode::Multiply),
        )
        .unwrap();
    let before = comp.composite_image().unwrap();

    let group = comp.group_layers(&[white, red], "both").unwrap();
    assert_eq!(comp.root_layers(), &[group]);
    assert_eq!(comp.children(HolderRef::Layer(group)).unwrap(), &[white, red]);
    let grouped = comp.composite_image().unwrap();
    assert!(same_pixels(&before, &grouped));

    let released = comp.ungroup(group).unwrap();
    assert_eq!(released, vec![white, red]);
    assert!(!comp.contains(group));
    assert_eq!(comp.root_layers(), &[white, red]);
    let after = comp.composite_image().unwrap();
    assert!(same_pixels(&before, &after));
}

#[test]
fn test_nested_groups_invalidate_upwards_only() {
    let mut comp = Composition::new("doc", 2, 2);
    let a = comp.add_layer(HolderRef::Root, Layer::group("a")).unwrap();
    let b = comp.add_layer(HolderRef::Root, Layer::group("b")).unwrap();
    comp.set_isolated(a, true).unwrap();
    comp.set_isolated(b, true).unwrap();
    let inner = comp
        .add_layer(HolderRef::Layer(a), Layer::group("inner"))
        .unwrap();
    comp.set_isolated(inner, true).unwrap();
    let fill = comp
        .add_layer(HolderRef::Layer(inner), Layer::fill("fill", RED))
        .unwrap();
    comp.add_layer(HolderRef::Layer(b), Layer::fill("other", BLUE))
        .unwrap();
    comp.composite_image().unwrap();

    comp.set_fill_color(fill, WHITE).unwrap();
    let valid = |comp: &Composition, id| comp.layer_cache_stats(id).unwrap().unwrap().valid;
    assert!(!valid(&comp, inner));
    assert!(!valid(&comp, a));
    assert!(valid(&comp, b));
    assert!(!comp.cache_stats().valid);

    let image = comp.composite_image().unwrap();
    assert_eq!(image.pixel(0, 0), BLUE);
}
