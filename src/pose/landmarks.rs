use super::keypoint::{FrameSize, KeypointIndex, PixelPoint, Pose};

/// 応急処置の案内に使う解剖学的ランドマーク（ピクセル座標）
///
/// すべてキーポイントの中点として求める。必要なキーポイントが
/// 見えていない部位は None。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnatomicalLandmarks {
    /// 胸骨 (CPR位置): 両肩の中点
    pub sternum: Option<PixelPoint>,
    /// 胸の中心 (AEDパッド): 胸骨と両腰中点の中点
    pub chest_center: Option<PixelPoint>,
    /// 左大腿外側 (エピペン): 左腰と左膝の中点
    pub left_outer_thigh: Option<PixelPoint>,
    /// 右大腿外側 (エピペン)
    pub right_outer_thigh: Option<PixelPoint>,
    /// 左頸部 (脈拍確認): 左耳と左肩の中点
    pub left_neck: Option<PixelPoint>,
    /// 右頸部 (脈拍確認)
    pub right_neck: Option<PixelPoint>,
}

fn mid(a: Option<PixelPoint>, b: Option<PixelPoint>) -> Option<PixelPoint> {
    Some(PixelPoint::midpoint(a?, b?))
}

impl AnatomicalLandmarks {
    pub fn from_pose(pose: &Pose, size: FrameSize, threshold: f32) -> Self {
        use KeypointIndex::*;
        let kp = |index| pose.visible(index, size, threshold);

        let sternum = mid(kp(LeftShoulder), kp(RightShoulder));
        let mid_hip = mid(kp(LeftHip), kp(RightHip));

        Self {
            sternum,
            chest_center: mid(sternum, mid_hip),
            left_outer_thigh: mid(kp(LeftHip), kp(LeftKnee)),
            right_outer_thigh: mid(kp(RightHip), kp(RightKnee)),
            left_neck: mid(kp(LeftEar), kp(LeftShoulder)),
            right_neck: mid(kp(RightEar), kp(RightShoulder)),
        }
    }

    /// (部位名, 座標) の一覧。見えている部位のみ。
    pub fn sites(&self) -> Vec<(&'static str, PixelPoint)> {
        [
            ("sternum_cpr", self.sternum),
            ("chest_center_aed", self.chest_center),
            ("left_outer_thigh_epipen", self.left_outer_thigh),
            ("right_outer_thigh_epipen", self.right_outer_thigh),
            ("left_neck_pulse", self.left_neck),
            ("right_neck_pulse", self.right_neck),
        ]
        .into_iter()
        .filter_map(|(name, point)| point.map(|p| (name, p)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sites().is_empty()
    }
}
