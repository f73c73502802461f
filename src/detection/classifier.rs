//! キーポイントの幾何から「苦しんでいる姿勢」を判定する。
//!
//! 各チェックは独立に計算し、必要なキーポイントが見えていなければ
//! そのチェックは発火しない（欠損から陽性を作らない）。
//! 1つでも発火すれば苦痛フレームとみなす。誤検出は後段の
//! デバウンスで抑える。

use std::fmt;

use crate::config::ClassifierConfig;
use crate::pose::{FrameSize, KeypointIndex, PixelPoint, Pose};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistressCheck {
    /// 頭が腰より下
    Fall,
    /// 胴体が水平に近い
    HorizontalTorso,
    /// 全身が縦より横に広がっている
    BodySpread,
    HandsAboveHead,
    /// 両手で顔を覆っている
    FaceCovering,
    /// うずくまり
    Crouched,
    /// 体がフレームの下の方にある
    LowInFrame,
}

impl DistressCheck {
    pub const ALL: [DistressCheck; 7] = [
        DistressCheck::Fall,
        DistressCheck::HorizontalTorso,
        DistressCheck::BodySpread,
        DistressCheck::HandsAboveHead,
        DistressCheck::FaceCovering,
        DistressCheck::Crouched,
        DistressCheck::LowInFrame,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DistressCheck::Fall => "fall",
            DistressCheck::HorizontalTorso => "horizontal_torso",
            DistressCheck::BodySpread => "body_spread",
            DistressCheck::HandsAboveHead => "hands_above_head",
            DistressCheck::FaceCovering => "face_covering",
            DistressCheck::Crouched => "crouched",
            DistressCheck::LowInFrame => "low_in_frame",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DistressCheck::Fall => "head below hips, possible fall",
            DistressCheck::HorizontalTorso => "torso horizontal, lying down",
            DistressCheck::BodySpread => "body spread horizontal, on the ground",
            DistressCheck::HandsAboveHead => "hands above head, distress posture",
            DistressCheck::FaceCovering => "hands covering face, distress posture",
            DistressCheck::Crouched => "crouched or curled posture",
            DistressCheck::LowInFrame => "body very low in frame, possible collapse",
        }
    }
}

impl fmt::Display for DistressCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 1フレーム分の派生メトリクス（ピクセル単位）。計算できない値は None。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PostureSnapshot {
    /// nose.y - mid_hip.y（正なら頭が腰より下）
    pub head_hip_offset: Option<f32>,
    /// |mid_shoulder - mid_hip| の x 成分
    pub torso_dx: Option<f32>,
    /// |mid_shoulder - mid_hip| の y 成分
    pub torso_dy: Option<f32>,
    /// 可視点のバウンディングボックス 幅/高さ
    pub bbox_aspect: Option<f32>,
    /// nose.y - 最も高い手首の y（正なら手首が鼻より上）
    pub wrist_nose_offset: Option<f32>,
    pub left_hand_face_distance: Option<f32>,
    pub right_hand_face_distance: Option<f32>,
    /// 鼻より上にある手首の数
    pub hands_above_head: usize,
    /// 顔ゾーン内（鼻〜肩のやや下）にある手首の数
    pub hands_near_face: usize,
    /// torso_dy / うずくまり閾値（1未満で圧縮）
    pub torso_compression: Option<f32>,
    /// |nose.y - mid_hip.y|
    pub head_hip_distance: Option<f32>,
    /// 体幹点の平均 y / フレーム高さ
    pub vertical_center: Option<f32>,
}

/// 分類結果。発火したチェックと、その根拠のメトリクス。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistressAssessment {
    pub fired: Vec<DistressCheck>,
    pub snapshot: PostureSnapshot,
}

impl DistressAssessment {
    pub fn is_distress(&self) -> bool {
        !self.fired.is_empty()
    }

    pub fn has(&self, check: DistressCheck) -> bool {
        self.fired.contains(&check)
    }

    pub fn reason(&self) -> String {
        if self.fired.is_empty() {
            return "No distress posture detected".to_string();
        }
        self.fired
            .iter()
            .map(|c| c.description())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct PostureClassifier {
    config: ClassifierConfig,
}

/// 分類に使う可視キーポイント
struct Visible {
    nose: Option<PixelPoint>,
    l_shoulder: Option<PixelPoint>,
    r_shoulder: Option<PixelPoint>,
    l_wrist: Option<PixelPoint>,
    r_wrist: Option<PixelPoint>,
    l_hip: Option<PixelPoint>,
    r_hip: Option<PixelPoint>,
    l_ankle: Option<PixelPoint>,
    r_ankle: Option<PixelPoint>,
}

fn mid(a: Option<PixelPoint>, b: Option<PixelPoint>) -> Option<PixelPoint> {
    Some(PixelPoint::midpoint(a?, b?))
}

impl PostureClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn classify(&self, pose: &Pose, size: FrameSize) -> DistressAssessment {
        use KeypointIndex::*;
        let threshold = self.config.keypoint_confidence;
        let kp = |index| pose.visible(index, size, threshold);
        let v = Visible {
            nose: kp(Nose),
            l_shoulder: kp(LeftShoulder),
            r_shoulder: kp(RightShoulder),
            l_wrist: kp(LeftWrist),
            r_wrist: kp(RightWrist),
            l_hip: kp(LeftHip),
            r_hip: kp(RightHip),
            l_ankle: kp(LeftAnkle),
            r_ankle: kp(RightAnkle),
        };

        let mut fired = Vec::new();
        let mut snapshot = PostureSnapshot::default();
        let mid_shoulder = mid(v.l_shoulder, v.r_shoulder);
        let mid_hip = mid(v.l_hip, v.r_hip);

        if self.check_fall(&v, mid_hip, &mut snapshot) {
            fired.push(DistressCheck::Fall);
        }
        if self.check_horizontal_torso(mid_shoulder, mid_hip, &mut snapshot) {
            fired.push(DistressCheck::HorizontalTorso);
        }
        if self.check_body_spread(&v, &mut snapshot) {
            fired.push(DistressCheck::BodySpread);
        }
        let (above, covering) = self.check_hands(&v, mid_shoulder, &mut snapshot);
        if above {
            fired.push(DistressCheck::HandsAboveHead);
        }
        if covering {
            fired.push(DistressCheck::FaceCovering);
        }
        if self.check_crouched(&v, mid_shoulder, mid_hip, &mut snapshot) {
            fired.push(DistressCheck::Crouched);
        }
        if self.check_low_in_frame(&v, size, &mut snapshot) {
            fired.push(DistressCheck::LowInFrame);
        }

        DistressAssessment { fired, snapshot }
    }

    fn check_fall(&self, v: &Visible, mid_hip: Option<PixelPoint>, snap: &mut PostureSnapshot) -> bool {
        let (Some(nose), Some(hip)) = (v.nose, mid_hip) else {
            return false;
        };
        let offset = nose.y - hip.y;
        snap.head_hip_offset = Some(offset);
        offset > self.config.fall_margin_px
    }

    fn check_horizontal_torso(
        &self,
        mid_shoulder: Option<PixelPoint>,
        mid_hip: Option<PixelPoint>,
        snap: &mut PostureSnapshot,
    ) -> bool {
        let (Some(shoulder), Some(hip)) = (mid_shoulder, mid_hip) else {
            return false;
        };
        let dx = (shoulder.x - hip.x).abs();
        let dy = (shoulder.y - hip.y).abs();
        snap.torso_dx = Some(dx);
        snap.torso_dy = Some(dy);
        dx > dy * self.config.horizontal_torso_ratio && dy < self.config.horizontal_torso_max_dy_px
    }

    fn check_body_spread(&self, v: &Visible, snap: &mut PostureSnapshot) -> bool {
        let points: Vec<PixelPoint> = [
            v.nose, v.l_shoulder, v.r_shoulder, v.l_hip, v.r_hip, v.l_ankle, v.r_ankle, v.l_wrist, v.r_wrist,
        ]
        .into_iter()
        .flatten()
        .collect();
        if points.len() < self.config.body_spread_min_points {
            return false;
        }

        let (min_x, max_x) = extent(points.iter().map(|p| p.x));
        let (min_y, max_y) = extent(points.iter().map(|p| p.y));
        let width = max_x - min_x;
        let height = max_y - min_y;
        if height <= 0.0 {
            return false;
        }
        let aspect = width / height;
        snap.bbox_aspect = Some(aspect);
        aspect > self.config.body_spread_ratio
    }

    /// (手が頭より上, 両手で顔を覆う)
    fn check_hands(&self, v: &Visible, mid_shoulder: Option<PixelPoint>, snap: &mut PostureSnapshot) -> (bool, bool) {
        let Some(nose) = v.nose else {
            return (false, false);
        };
        snap.left_hand_face_distance = v.l_wrist.map(|w| w.distance(nose));
        snap.right_hand_face_distance = v.r_wrist.map(|w| w.distance(nose));
        snap.wrist_nose_offset = [v.l_wrist, v.r_wrist]
            .into_iter()
            .flatten()
            .map(|w| nose.y - w.y)
            .reduce(f32::max);

        let (Some(shoulder), Some(l_shoulder), Some(r_shoulder)) = (mid_shoulder, v.l_shoulder, v.r_shoulder) else {
            return (false, false);
        };
        let zone_bottom = shoulder.y + (shoulder.y - nose.y).abs() * self.config.face_zone_margin;
        // 腕を横に伸ばした姿勢は高さだけだと顔ゾーンに入る
        let max_distance = l_shoulder.distance(r_shoulder) * self.config.face_distance_ratio;

        let mut above = 0;
        let mut near_face = 0;
        for wrist in [v.l_wrist, v.r_wrist].into_iter().flatten() {
            if wrist.y < nose.y {
                above += 1;
            } else if wrist.y < zone_bottom && wrist.distance(nose) <= max_distance {
                near_face += 1;
            }
        }
        snap.hands_above_head = above;
        snap.hands_near_face = near_face;

        // 片手だけ顔の近くにあるのは判定に使わない
        (above >= 1, above == 0 && near_face >= 2)
    }

    fn check_crouched(
        &self,
        v: &Visible,
        mid_shoulder: Option<PixelPoint>,
        mid_hip: Option<PixelPoint>,
        snap: &mut PostureSnapshot,
    ) -> bool {
        let (Some(nose), Some(shoulder), Some(hip)) = (v.nose, mid_shoulder, mid_hip) else {
            return false;
        };
        let torso = (shoulder.y - hip.y).abs();
        let head_to_hip = (nose.y - hip.y).abs();
        if self.config.crouch_torso_px > 0.0 {
            snap.torso_compression = Some(torso / self.config.crouch_torso_px);
        }
        snap.head_hip_distance = Some(head_to_hip);
        torso < self.config.crouch_torso_px && head_to_hip < self.config.crouch_head_hip_px
    }

    fn check_low_in_frame(&self, v: &Visible, size: FrameSize, snap: &mut PostureSnapshot) -> bool {
        let ys: Vec<f32> = [v.nose, v.l_shoulder, v.r_shoulder, v.l_hip, v.r_hip]
            .into_iter()
            .flatten()
            .map(|p| p.y)
            .collect();
        if ys.len() < self.config.low_in_frame_min_points || size.height == 0 {
            return false;
        }
        let avg_y = ys.iter().sum::<f32>() / ys.len() as f32;
        let height = size.height as f32;
        snap.vertical_center = Some(avg_y / height);
        avg_y > height * self.config.low_in_frame_ratio
    }
}

fn extent(values: impl Iterator<Item = f32>) -> (f32, f32) {
    values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}
