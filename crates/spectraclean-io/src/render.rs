//! Side-by-side PNG of original, denoised and segmented views of one cube.

use crate::error::{IoError, IoResult};
use image::{ImageFormat, Rgb, RgbImage};
use log::info;
use palette::{Hsl, IntoColor, Srgb};
use spectraclean_core::Tensor;
use std::path::Path;

const PANEL_GAP: u32 = 4;

/// Three bands for a false-color view: first, middle and last.
pub fn default_bands(bands: usize) -> [usize; 3] {
    [0, bands / 2, bands.saturating_sub(1)]
}

/// `n` visually distinct colors with evenly spaced hues.
pub fn segment_palette(n: usize) -> Vec<Rgb<u8>> {
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let rgb: Srgb = Hsl::new(hue, 0.75, 0.55).into_color();
            Rgb([
                (rgb.red * 255.0).round() as u8,
                (rgb.green * 255.0).round() as u8,
                (rgb.blue * 255.0).round() as u8,
            ])
        })
        .collect()
}

/// Min-max stretch of the chosen bands of a `[C, H, W]` cube into 8-bit RGB.
/// Single-band cubes render as grayscale.
fn false_color(cube: &Tensor<f64>, bands: [usize; 3]) -> IoResult<Vec<Rgb<u8>>> {
    let (c, h, w) = cube.shape().chw()?;
    let bands = if c == 1 { [0, 0, 0] } else { bands };
    if let Some(&bad) = bands.iter().find(|&&b| b >= c) {
        return Err(IoError::Render(format!("band {} out of range for {} bands", bad, c)));
    }

    let plane = h * w;
    let data = cube.data();
    let selected = bands.iter().flat_map(|&b| data[b * plane..(b + 1) * plane].iter().copied());
    let (lo, hi) = selected.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = if hi > lo { hi - lo } else { 1.0 };
    let to_u8 = |v: f64| (((v - lo) / span).clamp(0.0, 1.0) * 255.0).round() as u8;

    Ok((0..plane)
        .map(|p| Rgb(bands.map(|b| to_u8(data[b * plane + p]))))
        .collect())
}

fn label_colors(labels: &Tensor<f64>) -> IoResult<Vec<Rgb<u8>>> {
    if labels.data().iter().any(|&l| l < 0.0 || !l.is_finite()) {
        return Err(IoError::Render("segment labels must be non-negative".into()));
    }
    let n = labels.max_all()? as usize + 1;
    let palette = segment_palette(n);
    Ok(labels.data().iter().map(|&l| palette[l as usize]).collect())
}

/// Compose the three panels into one image.
///
/// `original` and `denoised` are `[C, H, W]`; `labels` is `[H, W]`.
pub fn comparison_image(
    original: &Tensor<f64>,
    denoised: &Tensor<f64>,
    labels: &Tensor<f64>,
    bands: Option<[usize; 3]>,
) -> IoResult<RgbImage> {
    let (c, h, w) = original.shape().chw()?;
    if denoised.shape() != original.shape() {
        return Err(IoError::Render(format!(
            "denoised shape {} differs from original {}",
            denoised.shape(),
            original.shape()
        )));
    }
    if labels.shape_vec() != vec![h, w] {
        return Err(IoError::Render(format!(
            "label map {} does not match a {}x{} image",
            labels.shape(),
            h,
            w
        )));
    }
    let bands = bands.unwrap_or_else(|| default_bands(c));

    let panels = [
        false_color(original, bands)?,
        false_color(denoised, bands)?,
        label_colors(labels)?,
    ];

    let (pw, ph) = (w as u32, h as u32);
    let mut img = RgbImage::from_pixel(3 * pw + 2 * PANEL_GAP, ph, Rgb([255, 255, 255]));
    for (i, panel) in panels.iter().enumerate() {
        let x0 = i as u32 * (pw + PANEL_GAP);
        for (p, &color) in panel.iter().enumerate() {
            img.put_pixel(x0 + (p % w) as u32, (p / w) as u32, color);
        }
    }
    Ok(img)
}

/// Write the three-panel comparison as a PNG.
pub fn render_comparison(
    original: &Tensor<f64>,
    denoised: &Tensor<f64>,
    labels: &Tensor<f64>,
    bands: Option<[usize; 3]>,
    path: &Path,
) -> IoResult<()> {
    let img = comparison_image(original, denoised, labels, bands)?;
    img.save_with_format(path, ImageFormat::Png)?;
    info!("saved comparison to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cube() -> Tensor<f64> {
        Tensor::uniform(vec![5, 4, 6], 0.0, 1.0, Some(3))
    }

    #[test]
    fn test_default_bands() {
        assert_eq!(default_bands(31), [0, 15, 30]);
        assert_eq!(default_bands(1), [0, 0, 0]);
    }

    #[test]
    fn test_palette_is_distinct() {
        let colors = segment_palette(5);
        for i in 0..colors.len() {
            for j in i + 1..colors.len() {
                assert_ne!(colors[i], colors[j]);
            }
        }
    }

    #[test]
    fn test_panel_layout() {
        let labels = Tensor::new((0..24).map(|i| (i % 3) as f64).collect(), vec![4, 6]).unwrap();
        let img = comparison_image(&cube(), &cube(), &labels, None).unwrap();
        assert_eq!(img.dimensions(), (3 * 6 + 2 * PANEL_GAP, 4));
        // Gap column stays white, label panel uses the palette.
        assert_eq!(*img.get_pixel(6, 0), Rgb([255, 255, 255]));
        let palette = segment_palette(3);
        assert_eq!(*img.get_pixel(2 * (6 + PANEL_GAP) + 1, 0), palette[1]);
    }

    #[test]
    fn test_single_band_is_grayscale() {
        let gray = Tensor::uniform(vec![1, 4, 6], 0.0, 1.0, Some(8));
        let labels = Tensor::zeros(vec![4, 6]);
        let img = comparison_image(&gray, &gray, &labels, None).unwrap();
        let px = img.get_pixel(2, 1);
        assert!(px[0] == px[1] && px[1] == px[2]);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let labels = Tensor::zeros(vec![3, 3]);
        assert!(comparison_image(&cube(), &cube(), &labels, None).is_err());

        let labels = Tensor::zeros(vec![4, 6]);
        assert!(comparison_image(&cube(), &cube(), &labels, Some([0, 1, 9])).is_err());
    }

    #[test]
    fn test_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comparison.png");
        let labels = Tensor::zeros(vec![4, 6]);
        render_comparison(&cube(), &cube(), &labels, Some([4, 2, 0]), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
