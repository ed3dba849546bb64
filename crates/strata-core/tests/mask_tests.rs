use image::{GrayImage, Luma, Rgba};
use strata_core::filter::Invert;
use strata_core::{
    check_integrity, Composition, HolderRef, IssueSeverity, Layer, LayerId, Mask, MaskInit,
    PixelBuffer, QuadrantAngle,
};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

fn masked_red(init: MaskInit) -> (Composition, LayerId) {
    let mut comp = Composition::new("doc", 4, 4);
    let id = comp.add_layer(HolderRef::Root, Layer::fill("red", RED)).unwrap();
    comp.add_mask(id, init).unwrap();
    (comp, id)
}

#[test]
fn test_black_mask_hides_layer() {
    let (mut comp, _) = masked_red(MaskInit::HideAll);
    let image = comp.composite_image().unwrap();
    assert_eq!(image.pixel(2, 2)[3], 0);
}

#[test]
fn test_white_mask_is_transparent_to_compositing() {
    let (mut comp, _) = masked_red(MaskInit::RevealAll);
    let image = comp.composite_image().unwrap();
    assert_eq!(image.pixel(2, 2), RED);
}

#[test]
fn test_gray_mask_halves_alpha() {
    let (mut comp, id) = masked_red(MaskInit::RevealAll);
    comp.edit_mask(id, |mask| {
        for pixel in mask.pixels_mut().pixels_mut() {
            *pixel = Luma([128]);
        }
    })
    .unwrap()
    .unwrap();

    let image = comp.composite_image().unwrap();
    let pixel = image.pixel(1, 1);
    assert_eq!(&pixel.0[..3], &[255, 0, 0]);
    assert!((pixel[3] as i32 - 128).abs() <= 1, "alpha {}", pixel[3]);
}

#[test]
fn test_disabled_and_deleted_masks_are_ignored() {
    let (mut comp, id) = masked_red(MaskInit::HideAll);
    comp.set_mask_enabled(id, false).unwrap();
    assert_eq!(comp.composite_image().unwrap().pixel(0, 0), RED);

    comp.set_mask_enabled(id, true).unwrap();
    assert_eq!(comp.composite_image().unwrap().pixel(0, 0)[3], 0);

    let removed = comp.delete_mask(id).unwrap();
    assert!(removed.is_some());
    assert!(comp.layer(id).unwrap().mask().is_none());
    assert_eq!(comp.composite_image().unwrap().pixel(0, 0), RED);
}

#[test]
fn test_mask_edit_invalidates_composite() {
    let (mut comp, id) = masked_red(MaskInit::RevealAll);
    comp.composite_image().unwrap();
    assert!(comp.cache_stats().valid);

    comp.edit_mask(id, |mask| mask.pixels_mut().put_pixel(0, 0, Luma([0])))
        .unwrap();
    assert!(!comp.cache_stats().valid);
    let image = comp.composite_image().unwrap();
    assert_eq!(image.pixel(0, 0)[3], 0);
    assert_eq!(image.pixel(1, 0), RED);
}

#[test]
fn test_edit_mask_without_mask() {
    let mut comp = Composition::new("doc", 2, 2);
    let id = comp.add_layer(HolderRef::Root, Layer::fill("red", RED)).unwrap();
    assert_eq!(comp.edit_mask(id, |_| ()).unwrap(), None);
}

#[test]
fn test_views_share_mask_samples() {
    let mut gray = GrayImage::new(3, 1);
    gray.put_pixel(0, 0, Luma([255]));
    gray.put_pixel(1, 0, Luma([0]));
    gray.put_pixel(2, 0, Luma([100]));
    let mask = Mask::from_gray(gray);

    let alpha = mask.alpha_view();
    assert_eq!(alpha.as_slice().as_ptr(), mask.pixels().as_raw().as_ptr());
    assert_eq!(alpha.alpha(2, 0), 100);

    let rubylith = mask.rubylith_view();
    assert_eq!(rubylith.pixel(0, 0)[3], 0);
    assert_eq!(rubylith.pixel(1, 0), Rgba([255, 0, 0, 127]));
}

#[test]
fn test_linked_mask_follows_layer() {
    let mut comp = Composition::new("doc", 4, 4);
    let pixels = PixelBuffer::filled(4, 4, RED).unwrap();
    let id = comp
        .add_layer(HolderRef::Root, Layer::image("img", pixels))
        .unwrap();
    comp.add_mask(id, MaskInit::HideAll).unwrap();
    comp.edit_mask(id, |mask| mask.pixels_mut().put_pixel(0, 0, Luma([255])))
        .unwrap();

    comp.translate_layer(id, 1, 0).unwrap();
    let mask = comp.layer(id).unwrap().mask().unwrap();
    assert_eq!(mask.pixels().get_pixel(1, 0)[0], 255);
    assert_eq!(mask.pixels().get_pixel(0, 0)[0], 255);
    assert_eq!(mask.pixels().get_pixel(2, 0)[0], 0);

    comp.set_mask_linked(id, false).unwrap();
    comp.translate_layer(id, 1, 0).unwrap();
    let mask = comp.layer(id).unwrap().mask().unwrap();
    assert_eq!(mask.pixels().get_pixel(2, 0)[0], 0);
}

fn smart_object_with_filter() -> (Composition, LayerId, LayerId) {
    let mut content = Composition::new("content", 4, 2);
    content
        .add_layer(HolderRef::Root, Layer::fill("red", RED))
        .unwrap();
    let mut comp = Composition::new("doc", 8, 8);
    let so = comp
        .add_layer(HolderRef::Root, Layer::smart_object("so", content))
        .unwrap();
    let filter = comp.add_smart_filter(so, "inv", Box::new(Invert)).unwrap();
    (comp, so, filter)
}

#[test]
fn test_smart_filter_mask_uses_output_size() {
    let (mut comp, so, filter) = smart_object_with_filter();
    comp.add_mask(filter, MaskInit::RevealAll).unwrap();
    assert_eq!(comp.layer(filter).unwrap().mask().unwrap().pixels().dimensions(), (4, 2));

    comp.delete_mask(filter).unwrap();
    comp.resize_smart_object(so, (6, 6)).unwrap();
    comp.add_mask(filter, MaskInit::RevealAll).unwrap();
    assert_eq!(comp.mask_size(filter).unwrap(), (6, 6));
    assert_eq!(comp.layer(filter).unwrap().mask().unwrap().pixels().dimensions(), (6, 6));

    let warnings = check_integrity(&comp)
        .into_iter()
        .filter(|issue| issue.severity == IssueSeverity::Warning)
        .count();
    assert_eq!(warnings, 0);
}

#[test]
fn test_smart_filter_mask_follows_rotation() {
    let (mut comp, so, filter) = smart_object_with_filter();
    comp.add_mask(filter, MaskInit::HideAll).unwrap();
    comp.edit_mask(filter, |mask| {
        for (x, _, pixel) in mask.pixels_mut().enumerate_pixels_mut() {
            if x < 2 {
                *pixel = Luma([255]);
            }
        }
    })
    .unwrap();

    comp.rotate_smart_object(so, QuadrantAngle::Cw90).unwrap();
    let mask = comp.layer(filter).unwrap().mask().unwrap();
    assert_eq!(mask.pixels().dimensions(), (2, 4));
    assert_eq!(mask.pixels().get_pixel(0, 0)[0], 255);
    assert_eq!(mask.pixels().get_pixel(1, 3)[0], 0);

    // The revealed left half of the content is now the top half
    let image = comp.layer_image(so).unwrap().unwrap();
    assert_eq!(image.pixel(0, 0), Rgba([0, 255, 255, 255]));
    assert_eq!(image.pixel(1, 3), RED);
}

#[test]
fn test_inserted_smart_filter_mask_is_fitted() {
    let (mut comp, so, _) = smart_object_with_filter();
    let layer = Layer::smart_filter("second", Box::new(Invert))
        .with_mask(Mask::new(8, 8, MaskInit::RevealAll));
    let second = comp.insert_smart_filter(so, 0, layer).unwrap();
    let mask = comp.layer(second).unwrap().mask().unwrap();
    assert_eq!(mask.pixels().dimensions(), (4, 2));
    assert!(mask.pixels().pixels().all(|p| p[0] == 255));
}
