//! 物体検出の結果を保持するモジュール

use crate::nms::NmsError;

/// 画像のピクセル座標で表されたバウンディングボックス
///
/// 右下の座標もボックスに含まれるピクセルとして扱います。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    /// バウンディングボックス左上のx
    pub x1: i32,
    /// バウンディングボックス左上のy
    pub y1: i32,
    /// バウンディングボックス右下のx
    pub x2: i32,
    /// バウンディングボックス右下のy
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 領域候補の `(x, y, w, h)` から新しいBoundingBoxを作成します。
    ///
    /// # Args
    ///
    /// * `x`, `y` - 左上の座標
    /// * `w`, `h` - 幅と高さ
    ///
    /// # Return
    /// * `(x, y, x + w, y + h)` のBoundingBox。右下の座標は `i32::MAX` で飽和します
    pub const fn from_xywh(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self::new(x, y, x.saturating_add(w), y.saturating_add(h))
    }

    /// 浮動小数点の座標から新しいBoundingBoxを作成します。座標は四捨五入されます。
    ///
    /// # Args
    ///
    /// * `coords` - `[x1, y1, x2, y2]`
    ///
    /// # Return
    /// * 新たなBoundingBox。有限でない座標を含む場合は `NmsError::NonFiniteCoordinate`、
    ///   四捨五入した値が `i32` に収まらない場合は `NmsError::CoordinateOutOfRange`
    pub fn try_from_f32(coords: [f32; 4]) -> Result<Self, NmsError> {
        if let Some(index) = coords.iter().position(|c| !c.is_finite()) {
            return Err(NmsError::NonFiniteCoordinate { index });
        }
        let in_range = |c: &f32| {
            let r = f64::from(c.round());
            r >= f64::from(i32::MIN) && r <= f64::from(i32::MAX)
        };
        if let Some(index) = coords.iter().position(|c| !in_range(c)) {
            return Err(NmsError::CoordinateOutOfRange { index });
        }
        let [x1, y1, x2, y2] = coords.map(|c| c.round() as i32);
        Ok(Self::new(x1, y1, x2, y2))
    }

    /// 面積と重なりの計算に使う右下の座標。
    ///
    /// 右下が左上より手前にある退化したボックスは、左上の1ピクセルとして扱います。
    fn far_corner(&self) -> (i64, i64) {
        (
            i64::from(self.x2.max(self.x1)),
            i64::from(self.y2.max(self.y1)),
        )
    }

    /// 境界ピクセルを含む幅。最小値は1です。
    pub fn width(&self) -> i64 {
        self.far_corner().0 - i64::from(self.x1) + 1
    }

    /// 境界ピクセルを含む高さ。最小値は1です。
    pub fn height(&self) -> i64 {
        self.far_corner().1 - i64::from(self.y1) + 1
    }

    /// 境界ピクセルを含む面積。退化したボックスでも1以上になります。
    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// 2つのボックスが共有するピクセル数
    pub fn intersection_area(&self, other: &BoundingBox) -> i64 {
        let ix1 = i64::from(self.x1.max(other.x1));
        let iy1 = i64::from(self.y1.max(other.y1));
        let (ax2, ay2) = self.far_corner();
        let (bx2, by2) = other.far_corner();
        let ix2 = ax2.min(bx2);
        let iy2 = ay2.min(by2);

        let w = (ix2 - ix1 + 1).max(0);
        let h = (iy2 - iy1 + 1).max(0);
        w * h
    }

    /// `other` の面積のうち、このボックスに覆われている割合
    ///
    /// IoUではなく、候補ボックス自身の面積を分母にします。
    pub fn overlap_ratio_of(&self, other: &BoundingBox) -> f32 {
        (self.intersection_area(other) as f64 / other.area() as f64) as f32
    }
}

/// BoundingBoxと、それが「猫」である確率の組
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBox {
    pub bbox: BoundingBox,
    /// コンフィデンス (0.0 ~ 1.0)
    pub score: f32,
}

impl ScoredBox {
    pub const fn new(bbox: BoundingBox, score: f32) -> Self {
        Self { bbox, score }
    }
}

/// パイプラインが出力する検出結果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// クラス名
    pub label: String,
    pub bbox: BoundingBox,
    pub score: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, scored: ScoredBox) -> Self {
        Self {
            label: label.into(),
            bbox: scored.bbox,
            score: scored.score,
        }
    }
}

/// 1枚の画像に対する検出結果
///
/// `candidates` はNMS前、`detections` はNMS後の結果です。
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    /// 提案された領域の数
    pub proposals: usize,
    pub candidates: Vec<Detection>,
    pub detections: Vec<Detection>,
}
