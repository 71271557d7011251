//! 検出パイプラインの画像処理モジュール

use std::path::Path;

use anyhow::{ensure, Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::drawing::draw_text_mut;
use imageproc::rect::Rect;
use ndarray::Array4;
use rusttype::{Font, Scale};

use crate::detection_result::{BoundingBox, Detection};

/// アスペクト比を保ったまま、画像を指定した幅にリサイズします。
///
/// # Args
///
/// * `img` - リサイズする画像
/// * `width` - リサイズ後の幅
///
/// # Return
///
/// * リサイズした画像
pub fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    if img.width() == width || img.width() == 0 {
        return img.clone();
    }
    let ratio = width as f32 / img.width() as f32;
    let height = ((img.height() as f32 * ratio).round() as u32).max(1);
    img.resize_exact(width, height, FilterType::Triangle)
}

/// 画像から領域を切り出し、分類器の入力サイズにリサイズします。
///
/// 領域は画像の内側に切り詰められます。右下の座標は含みません。
///
/// # Args
///
/// * `img` - 元画像
/// * `bbox` - 切り出す領域
/// * `dims` - 分類器の入力サイズ (幅, 高さ)
///
/// # Return
///
/// * 切り出してリサイズした画像
pub fn crop_roi(img: &RgbImage, bbox: &BoundingBox, dims: (u32, u32)) -> RgbImage {
    let (w, h) = img.dimensions();
    let x1 = (bbox.x1.max(0) as u32).min(w.saturating_sub(1));
    let y1 = (bbox.y1.max(0) as u32).min(h.saturating_sub(1));
    let x2 = (bbox.x2.max(0) as u32).min(w);
    let y2 = (bbox.y2.max(0) as u32).min(h);
    let cw = x2.saturating_sub(x1).max(1);
    let ch = y2.saturating_sub(y1).max(1);

    let roi = imageops::crop_imm(img, x1, y1, cw, ch).to_image();
    imageops::resize(&roi, dims.0, dims.1, FilterType::CatmullRom)
}

/// 切り出した領域をMobileNetV2の入力 (NHWC, -1.0 ~ 1.0) に変換します。
///
/// # Args
///
/// * `rois` - 同じ大きさの画像の配列
///
/// # Return
///
/// * (N, 高さ, 幅, 3) のテンソル
pub fn to_input_tensor(rois: &[RgbImage]) -> Result<Array4<f32>> {
    let (w, h) = rois.first().map(|r| r.dimensions()).unwrap_or((0, 0));
    ensure!(
        rois.iter().all(|r| r.dimensions() == (w, h)),
        "all regions must have the same size"
    );

    let mut data = Vec::with_capacity(rois.len() * (w * h * 3) as usize);
    for roi in rois {
        data.extend(roi.as_raw().iter().map(|&v| f32::from(v) / 127.5 - 1.));
    }
    let tensor = Array4::from_shape_vec((rois.len(), h as usize, w as usize, 3), data)?;
    Ok(tensor)
}

/// TTFファイルからフォントを読み込みます。
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<Font<'static>> {
    let path = path.as_ref();
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    Font::try_from_vec(data).with_context(|| format!("invalid font: {}", path.display()))
}

/// バウンディングボックスの描画スタイル
#[derive(Debug, Clone, Copy)]
pub struct DrawStyle {
    pub color: Rgb<u8>,
    pub thickness: u32,
    pub font_size: f32,
}

impl Default for DrawStyle {
    fn default() -> Self {
        Self {
            color: Rgb([0, 255, 0]),
            thickness: 2,
            font_size: 14.,
        }
    }
}

/// 画像上に線を描画します。縦か横の線のみ対応しています。
///
/// # Args
///
/// * `img` - 線を描画する画像 (in-place)
/// * `x1`, `y1`, `x2`, `y2` - 線の始点と終点の座標
/// * `thickness` - 線の太さ
/// * `color` - 線の色
fn draw_line(img: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, thickness: u32, color: Rgb<u8>) {
    let half = (thickness / 2) as i32;
    let (bx, by) = (x1.min(x2) - half, y1.min(y2) - half);

    let (w, h) = if x1 == x2 {
        (thickness, y1.abs_diff(y2) + thickness)
    } else {
        (x1.abs_diff(x2) + thickness, thickness)
    };

    let rect = Rect::at(bx, by).of_size(w, h);
    draw_filled_rect_mut(img, rect, color);
}

/// 画像上に矩形を描画します。
fn draw_rect(img: &mut RgbImage, bbox: &BoundingBox, thickness: u32, color: Rgb<u8>) {
    let BoundingBox { x1, y1, x2, y2 } = *bbox;
    draw_line(img, x1, y1, x1, y2, thickness, color);
    draw_line(img, x1, y2, x2, y2, thickness, color);
    draw_line(img, x1, y1, x2, y1, thickness, color);
    draw_line(img, x2, y1, x2, y2, thickness, color);
}

/// ラベルのベースラインのy座標。ボックスの上に余白がなければ内側に置きます。
pub fn label_baseline(y1: i32) -> i32 {
    if y1 - 10 > 10 {
        y1 - 10
    } else {
        y1 + 10
    }
}

/// 検出結果のラベル文字列 (例: `Cat: 99.87%`)
pub fn label_text(d: &Detection) -> String {
    let mut chars = d.label.chars();
    let label = match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("{}: {:.2}%", label, d.score * 100.)
}

/// 画像上にバウンディングボックスとラベルを描画します。
///
/// # Args
///
/// * `img` - 描画する画像 (in-place)
/// * `detections` - 検出結果の配列
/// * `font` - ラベルのフォント。`None` の場合は枠だけ描画します
/// * `style` - 描画スタイル
pub fn draw_detections(
    img: &mut RgbImage,
    detections: &[Detection],
    font: Option<&Font>,
    style: &DrawStyle,
) {
    let thickness = style.thickness.max(1);
    for d in detections {
        draw_rect(img, &d.bbox, thickness, style.color);

        if let Some(font) = font {
            let scale = Scale::uniform(style.font_size);
            let v_metrics = font.v_metrics(scale);
            let top = label_baseline(d.bbox.y1) - v_metrics.ascent.round() as i32;
            draw_text_mut(img, style.color, d.bbox.x1, top, scale, font, &label_text(d));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection_result::ScoredBox;

    #[test]
    fn resize_keeps_aspect_ratio() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(1000, 600));
        let resized = resize_to_width(&img, 500);
        assert_eq!((resized.width(), resized.height()), (500, 300));
    }

    #[test]
    fn crop_roi_clamps_to_image() {
        let img = RgbImage::from_pixel(50, 40, Rgb([10, 20, 30]));
        let roi = crop_roi(&img, &BoundingBox::new(-5, 30, 80, 90), (16, 16));
        assert_eq!(roi.dimensions(), (16, 16));
        let px = roi.get_pixel(8, 8);
        for (c, want) in px.0.iter().zip([10u8, 20, 30]) {
            assert!(c.abs_diff(want) <= 1);
        }
    }

    #[test]
    fn input_tensor_is_nhwc_and_scaled() {
        let a = RgbImage::from_pixel(4, 2, Rgb([0, 255, 0]));
        let b = RgbImage::from_pixel(4, 2, Rgb([255, 0, 255]));
        let t = to_input_tensor(&[a, b]).unwrap();
        assert_eq!(t.shape(), &[2, 2, 4, 3]);
        assert_eq!(t[[0, 1, 3, 0]], -1.);
        assert_eq!(t[[0, 1, 3, 1]], 1.);
        assert_eq!(t[[1, 0, 0, 0]], 1.);
    }

    #[test]
    fn input_tensor_rejects_mixed_sizes() {
        let a = RgbImage::new(4, 2);
        let b = RgbImage::new(2, 4);
        assert!(to_input_tensor(&[a, b]).is_err());
    }

    #[test]
    fn label_goes_inside_when_box_is_near_top() {
        assert_eq!(label_baseline(100), 90);
        assert_eq!(label_baseline(20), 30);
        assert_eq!(label_baseline(0), 10);
    }

    #[test]
    fn label_text_is_capitalised_percentage() {
        let d = Detection::new("cat", ScoredBox::new(BoundingBox::new(0, 0, 1, 1), 0.99876));
        assert_eq!(label_text(&d), "Cat: 99.88%");
    }

    #[test]
    fn draws_box_outline() {
        let mut img = RgbImage::new(60, 60);
        let d = Detection::new("cat", ScoredBox::new(BoundingBox::new(10, 10, 40, 40), 0.9));
        draw_detections(&mut img, &[d], None, &DrawStyle::default());

        let green = Rgb([0, 255, 0]);
        assert_eq!(*img.get_pixel(10, 25), green);
        assert_eq!(*img.get_pixel(40, 25), green);
        assert_eq!(*img.get_pixel(25, 10), green);
        assert_eq!(*img.get_pixel(25, 40), green);
        assert_eq!(*img.get_pixel(25, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn box_on_the_border_does_not_panic() {
        let mut img = RgbImage::new(20, 20);
        let d = Detection::new("cat", ScoredBox::new(BoundingBox::new(-3, -3, 25, 25), 0.9));
        draw_detections(&mut img, &[d], None, &DrawStyle::default());
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));
    }
}
