//! Non-Maximum Suppression (NMS) を行うモジュール
//!
//! 重なり率はIoUではなく、抑制される側のボックスの面積を分母にして計算します。
//! 高スコアのボックスの中に入れ子になった小さな領域候補ほど抑制されやすくなります。

use log::debug;
use thiserror::Error;

use crate::detection_result::{BoundingBox, ScoredBox};

/// NMSに渡された引数が不正な場合のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NmsError {
    #[error("boxes and scores differ in length: {boxes} boxes, {scores} scores")]
    LengthMismatch { boxes: usize, scores: usize },
    #[error("score at index {index} is not finite")]
    NonFiniteScore { index: usize },
    #[error("coordinate at index {index} is not finite")]
    NonFiniteCoordinate { index: usize },
    #[error("coordinate at index {index} does not fit in i32")]
    CoordinateOutOfRange { index: usize },
    #[error("overlap threshold must be in (0, 1), got {0}")]
    ThresholdOutOfRange(f32),
}

fn check_threshold(overlap_thresh: f32) -> Result<(), NmsError> {
    if overlap_thresh > 0.0 && overlap_thresh < 1.0 {
        Ok(())
    } else {
        Err(NmsError::ThresholdOutOfRange(overlap_thresh))
    }
}

/// 貪欲法でNMSを行い、残ったボックスのインデックスを返します。
///
/// # Args
///
/// * `boxes` - バウンディングボックスの配列
/// * `scores` - `boxes` と同じ長さのスコアの配列
/// * `overlap_thresh` - 抑制の閾値 (0, 1)。候補の面積のうちこの割合を超えて
///   採用済みのボックスと重なる候補は捨てられます
///
/// # Return
/// * 採用された順 (スコアの降順) のインデックス
///
/// 同じスコアのボックスは入力順で安定に並べられ、後ろにあるものが先に採用されます。
pub fn suppress_indices(
    boxes: &[BoundingBox],
    scores: &[f32],
    overlap_thresh: f32,
) -> Result<Vec<usize>, NmsError> {
    check_threshold(overlap_thresh)?;
    if boxes.len() != scores.len() {
        return Err(NmsError::LengthMismatch {
            boxes: boxes.len(),
            scores: scores.len(),
        });
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(NmsError::NonFiniteScore { index });
    }
    if boxes.is_empty() {
        return Ok(vec![]);
    }

    // スコアの昇順 (安定ソート)
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut keep = Vec::new();
    while let Some(last) = order.pop() {
        keep.push(last);
        let kept = &boxes[last];
        order.retain(|&i| kept.overlap_ratio_of(&boxes[i]) <= overlap_thresh);
    }

    debug!("nms: {} boxes -> {} kept", boxes.len(), keep.len());
    Ok(keep)
}

/// 貪欲法でNMSを行い、残ったボックスを返します。
///
/// # Args
///
/// * `boxes` - スコア付きバウンディングボックスの配列
/// * `overlap_thresh` - 抑制の閾値 (0, 1)
///
/// # Return
/// * スコアの降順に並んだ、残ったボックス
pub fn suppress(boxes: &[ScoredBox], overlap_thresh: f32) -> Result<Vec<ScoredBox>, NmsError> {
    let (bb, scores): (Vec<BoundingBox>, Vec<f32>) =
        boxes.iter().map(|sb| (sb.bbox, sb.score)).unzip();
    let keep = suppress_indices(&bb, &scores, overlap_thresh)?;
    Ok(keep.into_iter().map(|i| boxes[i]).collect())
}

/// 最小確率でフィルタしてからNMSを適用します。
///
/// # Args
///
/// * `bb` - スコア付きバウンディングボックスの配列
/// * `min_proba` - この値未満のスコアのボックスは捨てられます
/// * `overlap_thresh` - NMSの閾値
///
/// # Return
/// * (フィルタ後の候補, NMS後のボックス)
pub fn nms_process(
    bb: &[ScoredBox],
    min_proba: f32,
    overlap_thresh: f32,
) -> Result<(Vec<ScoredBox>, Vec<ScoredBox>), NmsError> {
    let candidates: Vec<ScoredBox> = bb
        .iter()
        .copied()
        .filter(|sb| sb.score >= min_proba)
        .collect();
    let kept = suppress(&candidates, overlap_thresh)?;
    Ok((candidates, kept))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sb(x1: i32, y1: i32, x2: i32, y2: i32, score: f32) -> ScoredBox {
        ScoredBox::new(BoundingBox::new(x1, y1, x2, y2), score)
    }

    #[test]
    fn near_total_overlap_keeps_best() {
        let input = [sb(0, 0, 10, 10, 0.9), sb(1, 1, 10, 10, 0.8)];
        assert_eq!(suppress(&input, 0.3).unwrap(), vec![input[0]]);
    }

    #[test]
    fn disjoint_boxes_all_survive() {
        let input = [sb(0, 0, 10, 10, 0.9), sb(50, 50, 60, 60, 0.8)];
        assert_eq!(suppress(&input, 0.3).unwrap(), input.to_vec());
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(suppress(&[], 0.3).unwrap().is_empty());
        assert!(suppress(&[], 0.99).unwrap().is_empty());
    }

    #[test]
    fn overlapping_pair_and_disjoint_box() {
        let input = [
            sb(100, 100, 150, 150, 0.7),
            sb(0, 0, 40, 40, 0.95),
            sb(2, 2, 42, 41, 0.85),
        ];
        let kept = suppress(&input, 0.3).unwrap();
        assert_eq!(kept, vec![input[1], input[0]]);
    }

    #[test]
    fn output_is_in_descending_score_order() {
        let input = [
            sb(0, 0, 5, 5, 0.2),
            sb(20, 20, 25, 25, 0.9),
            sb(40, 40, 45, 45, 0.5),
        ];
        let idx = suppress_indices(
            &input.iter().map(|s| s.bbox).collect::<Vec<_>>(),
            &input.iter().map(|s| s.score).collect::<Vec<_>>(),
            0.3,
        )
        .unwrap();
        assert_eq!(idx, vec![1, 2, 0]);
    }

    #[test]
    fn identical_boxes_leave_one() {
        let input = vec![sb(3, 3, 30, 30, 0.5); 6];
        assert_eq!(suppress(&input, 0.3).unwrap().len(), 1);
    }

    #[test]
    fn equal_scores_prefer_later_input() {
        let boxes = [
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(0, 0, 10, 10),
        ];
        let idx = suppress_indices(&boxes, &[0.5, 0.5, 0.5], 0.3).unwrap();
        assert_eq!(idx, vec![2]);

        let apart = [
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(20, 20, 30, 30),
            BoundingBox::new(40, 40, 50, 50),
        ];
        let idx = suppress_indices(&apart, &[0.5, 0.5, 0.5], 0.3).unwrap();
        assert_eq!(idx, vec![2, 1, 0]);
    }

    #[test]
    fn degenerate_boxes_do_not_divide_by_zero() {
        let input = [
            sb(0, 0, 10, 10, 0.9),
            // zero width
            sb(5, 5, 5, 8, 0.8),
            // inverted
            sb(60, 60, 50, 50, 0.7),
        ];
        let kept = suppress(&input, 0.3).unwrap();
        // the zero-width box lies inside the first one, the inverted box counts as a single pixel at (60, 60)
        assert_eq!(kept, vec![input[0], input[2]]);
    }

    #[test]
    fn identical_inverted_boxes_leave_one() {
        let input = vec![sb(60, 60, 50, 50, 0.5); 4];
        let kept = suppress(&input, 0.3).unwrap();
        assert_eq!(kept, vec![input[3]]);
    }

    #[test]
    fn nested_small_box_is_suppressed_but_not_the_container() {
        // the small box is kept first; the container only overlaps it by 4%
        let input = [sb(0, 0, 99, 99, 0.5), sb(10, 10, 29, 29, 0.9)];
        let kept = suppress(&input, 0.3).unwrap();
        assert_eq!(kept, vec![input[1], input[0]]);

        // reversed scores: the small box is fully covered by the container
        let input = [sb(0, 0, 99, 99, 0.9), sb(10, 10, 29, 29, 0.5)];
        assert_eq!(suppress(&input, 0.3).unwrap(), vec![input[0]]);
    }

    #[test]
    fn ratio_equal_to_threshold_survives() {
        // other box area 100, intersection 50 -> ratio exactly 0.5
        let input = [sb(0, 0, 9, 9, 0.9), sb(5, 0, 14, 9, 0.8)];
        assert_eq!(suppress(&input, 0.5).unwrap().len(), 2);
        assert_eq!(suppress(&input, 0.49).unwrap().len(), 1);
    }

    #[test]
    fn tiny_threshold_suppresses_any_touching_box() {
        let input = [sb(0, 0, 9, 9, 0.9), sb(9, 9, 30, 30, 0.8), sb(31, 31, 40, 40, 0.7)];
        let kept = suppress(&input, 1e-6).unwrap();
        // (9,9) is shared with the first box; the third box touches the second only, which was dropped
        assert_eq!(kept, vec![input[0], input[2]]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let boxes = [BoundingBox::new(0, 0, 1, 1)];
        assert_eq!(
            suppress_indices(&boxes, &[0.1, 0.2], 0.3),
            Err(NmsError::LengthMismatch { boxes: 1, scores: 2 })
        );
    }

    #[test]
    fn non_finite_score_is_rejected() {
        let boxes = [BoundingBox::new(0, 0, 1, 1), BoundingBox::new(2, 2, 3, 3)];
        assert_eq!(
            suppress_indices(&boxes, &[0.1, f32::NAN], 0.3),
            Err(NmsError::NonFiniteScore { index: 1 })
        );
    }

    #[test]
    fn threshold_outside_open_interval_is_rejected() {
        for t in [0.0, 1.0, -0.1, 1.5, f32::NAN] {
            assert!(matches!(
                suppress(&[], t),
                Err(NmsError::ThresholdOutOfRange(_))
            ));
        }
    }

    #[test]
    fn nms_process_filters_by_min_proba_first() {
        let input = [
            sb(0, 0, 10, 10, 0.98),
            sb(1, 1, 10, 10, 0.995),
            sb(50, 50, 60, 60, 0.999),
        ];
        let (candidates, kept) = nms_process(&input, 0.99, 0.3).unwrap();
        assert_eq!(candidates, vec![input[1], input[2]]);
        assert_eq!(kept, vec![input[2], input[1]]);
    }
}
