// Geometric Transform Engine
// Pure functions mapping a head box or user selection onto the output frame

use tracing::debug;

use crate::domain::{
    CropTransform, HeadBox, ImageSize, PhotoSpec, PipelineError, Rect, SelectionRect,
};

/// Rounding tolerance when checking margins in output pixels
pub const MARGIN_SLACK_PX: f64 = 1.0;

/// Smallest selection side accepted after normalization
pub const MIN_SELECTION_SIDE_PX: f64 = 8.0;

const BOUNDS_EPSILON: f64 = 1e-6;

/// `compute_transform(image_size, head_box, spec) -> CropTransform`
///
/// Scales the crop so the head occupies `head_height_ratio` of the output and
/// places the crown at the spec's target crown line, centred horizontally on
/// the head. The crop is then slid back inside the image if needed.
///
/// # Errors
/// `InsufficientMargin` if the image is too small for the crop or if, after
/// sliding, the head no longer satisfies the spec's margins.
pub fn compute_transform(
    image_size: ImageSize,
    head: &HeadBox,
    spec: &PhotoSpec,
) -> Result<CropTransform, PipelineError> {
    let out_w = spec.output_width_px as f64;
    let out_h = spec.output_height_px as f64;
    let img_w = image_size.width as f64;
    let img_h = image_size.height as f64;

    let target_head = spec.target_head_height_px();
    let scale = target_head / head.height();
    let crop_w = out_w / scale;
    let crop_h = out_h / scale;

    debug!(
        target_head_px = target_head,
        scale = scale,
        crop_w = crop_w,
        crop_h = crop_h,
        "Computed crop scale"
    );

    if crop_w > img_w + BOUNDS_EPSILON || crop_h > img_h + BOUNDS_EPSILON {
        return Err(PipelineError::InsufficientMargin(format!(
            "crop of {:.0}x{:.0}px needed around a {:.0}px head, image is only {}",
            crop_w,
            crop_h,
            head.height(),
            image_size
        )));
    }

    let crown_y = spec.target_crown_y_px();
    let x = (head.rect.center_x() - crop_w / 2.0).clamp(0.0, (img_w - crop_w).max(0.0));
    let y = (head.rect.y - crown_y / scale).clamp(0.0, (img_h - crop_h).max(0.0));

    let transform = CropTransform {
        source: Rect::new(x, y, crop_w, crop_h),
        output_width: spec.output_width_px,
        output_height: spec.output_height_px,
    };
    check_head_placement(&transform, head, spec)?;
    Ok(transform)
}

fn check_head_placement(
    t: &CropTransform,
    head: &HeadBox,
    spec: &PhotoSpec,
) -> Result<(), PipelineError> {
    let out_w = t.output_width as f64;
    let out_h = t.output_height as f64;

    let top = t.to_output_y(head.rect.y);
    let bottom = out_h - t.to_output_y(head.rect.bottom());

    match spec.top_margin_px_range {
        Some(range) if !range.contains(top, MARGIN_SLACK_PX) => {
            return Err(PipelineError::InsufficientMargin(format!(
                "top margin {:.1}px outside allowed {}",
                top, range
            )));
        }
        None if top < -MARGIN_SLACK_PX => {
            return Err(PipelineError::InsufficientMargin(format!(
                "head crown cut off by {:.1}px at the top edge",
                -top
            )));
        }
        _ => {}
    }

    match spec.bottom_margin_px_range {
        Some(range) if !range.contains(bottom, MARGIN_SLACK_PX) => {
            return Err(PipelineError::InsufficientMargin(format!(
                "bottom margin {:.1}px outside allowed {}",
                bottom, range
            )));
        }
        None if bottom < -MARGIN_SLACK_PX => {
            return Err(PipelineError::InsufficientMargin(format!(
                "chin cut off by {:.1}px at the bottom edge",
                -bottom
            )));
        }
        _ => {}
    }

    let left = t.to_output_x(head.rect.x);
    let right = t.to_output_x(head.rect.right());
    if left < -MARGIN_SLACK_PX || right > out_w + MARGIN_SLACK_PX {
        return Err(PipelineError::InsufficientMargin(format!(
            "head spans {:.1}..{:.1}px, outside the {}px frame",
            left, right, t.output_width
        )));
    }
    Ok(())
}

/// `normalize_selection(selection, spec) -> CropTransform`
///
/// Corrects one side of the rectangle about its centre to the exact target
/// aspect ratio, then shrinks it uniformly about the same centre until it fits
/// the image. The position of the centre is never changed.
///
/// # Errors
/// `SelectionOutOfBounds` if the selection is degenerate, its centre lies
/// outside the image, or the fitted rectangle would be smaller than
/// `MIN_SELECTION_SIDE_PX`.
pub fn normalize_selection(
    selection: &SelectionRect,
    image_size: ImageSize,
    spec: &PhotoSpec,
) -> Result<CropTransform, PipelineError> {
    let rect = selection.as_rect();
    if !rect.is_valid() {
        return Err(PipelineError::SelectionOutOfBounds(format!(
            "selection {} is not a valid rectangle",
            rect
        )));
    }

    let img_w = image_size.width as f64;
    let img_h = image_size.height as f64;
    let cx = rect.center_x();
    let cy = rect.center_y();
    if !(0.0..=img_w).contains(&cx) || !(0.0..=img_h).contains(&cy) {
        return Err(PipelineError::SelectionOutOfBounds(format!(
            "selection {} is centred outside the {} image",
            rect, image_size
        )));
    }

    let target = spec.aspect_ratio();
    let (mut w, mut h) = if rect.aspect_ratio() > target {
        (rect.height * target, rect.height)
    } else {
        (rect.width, rect.width / target)
    };

    // Largest half-extents that keep the centre fixed
    let max_half_w = cx.min(img_w - cx);
    let max_half_h = cy.min(img_h - cy);
    let fit = (2.0 * max_half_w / w).min(2.0 * max_half_h / h).min(1.0);
    w *= fit;
    h *= fit;

    if w < MIN_SELECTION_SIDE_PX || h < MIN_SELECTION_SIDE_PX {
        return Err(PipelineError::SelectionOutOfBounds(format!(
            "selection {} cannot fit the {} image at aspect {:.4}",
            rect, image_size, target
        )));
    }

    let x = (cx - w / 2.0).clamp(0.0, (img_w - w).max(0.0));
    let y = (cy - h / 2.0).clamp(0.0, (img_h - h).max(0.0));
    debug!(
        from = %rect,
        to = %Rect::new(x, y, w, h),
        "Normalized selection"
    );

    Ok(CropTransform {
        source: Rect::new(x, y, w, h),
        output_width: spec.output_width_px,
        output_height: spec.output_height_px,
    })
}

/// Selection offered to the user in the manual workflow.
///
/// The auto transform's crop when it exists; otherwise the largest
/// target-aspect rectangle centred on the head that fits the image.
pub fn default_selection(
    image_size: ImageSize,
    head: &HeadBox,
    spec: &PhotoSpec,
) -> Result<SelectionRect, PipelineError> {
    match compute_transform(image_size, head, spec) {
        Ok(t) => Ok(SelectionRect::from(t.source)),
        Err(PipelineError::InsufficientMargin(reason)) => {
            debug!(reason = %reason, "Auto crop unavailable, centring default selection on head");
            let span = image_size.width.max(image_size.height) as f64 * 2.0;
            let seed = Rect::centered(
                head.rect.center_x(),
                head.rect.center_y(),
                span * spec.aspect_ratio(),
                span,
            );
            let t = normalize_selection(&SelectionRect::from(seed), image_size, spec)?;
            Ok(SelectionRect::from(t.source))
        }
        Err(e) => Err(e),
    }
}
