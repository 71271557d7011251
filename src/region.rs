//! 領域候補 (region proposal) を生成するモジュール

use image::RgbImage;

use crate::config::ProposalConfig;
use crate::detection_result::BoundingBox;

/// 画像から物体がありそうな矩形領域を列挙する
///
/// 同じ画像に対しては常に同じ結果を返す必要があります。
pub trait RegionProposer {
    fn propose(&self, img: &RgbImage) -> Vec<BoundingBox>;
}

/// 複数の大きさの正方形ウィンドウを画像全体にずらしながら並べる領域候補生成器
///
/// 大きいウィンドウから順に、行優先で出力します。
#[derive(Debug, Clone)]
pub struct SlidingWindowProposer {
    scales: Vec<f32>,
    step_ratio: f32,
    min_size: u32,
}

impl SlidingWindowProposer {
    pub fn new(config: &ProposalConfig) -> Self {
        let mut scales = config.scales.clone();
        scales.sort_by(|a, b| b.total_cmp(a));
        Self {
            scales,
            step_ratio: config.step_ratio,
            min_size: config.min_size,
        }
    }
}

impl RegionProposer for SlidingWindowProposer {
    fn propose(&self, img: &RgbImage) -> Vec<BoundingBox> {
        let (w, h) = img.dimensions();
        let short_side = w.min(h);
        let mut regions = Vec::new();

        for &scale in &self.scales {
            let side = (short_side as f32 * scale) as u32;
            if side == 0 || side < self.min_size || side > short_side {
                continue;
            }
            let step = ((side as f32 * self.step_ratio) as u32).max(1);

            for y in (0..=h - side).step_by(step as usize) {
                for x in (0..=w - side).step_by(step as usize) {
                    regions.push(BoundingBox::from_xywh(
                        x as i32,
                        y as i32,
                        side as i32,
                        side as i32,
                    ));
                }
            }
        }
        regions
    }
}
