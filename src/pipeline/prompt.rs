use crate::detection::DistressAssessment;
use crate::pose::AnatomicalLandmarks;

/// 苦痛姿勢が無いときの定型文（シーン解析を省略する）
pub const NO_DISTRESS_RESPONSE: &str = "No distress detected. The scene appears safe.";

/// ランドマーク一覧 "name: (x,y), ..."。無ければ "none identified"
pub fn format_landmarks(landmarks: &AnatomicalLandmarks) -> String {
    let sites = landmarks.sites();
    if sites.is_empty() {
        return "none identified".to_string();
    }
    sites
        .iter()
        .map(|(name, p)| format!("{}: ({:.0},{:.0})", name, p.x, p.y))
        .collect::<Vec<_>>()
        .join(", ")
}

/// シーン解析への指示文
pub fn build_prompt(assessment: &DistressAssessment, landmarks: &AnatomicalLandmarks) -> String {
    format!(
        "You are an emergency medical assistant guiding a bystander through a crisis. \
         A person in the image appears to be in distress. \
         Pose analysis detected: {}. \
         Anatomical landmarks identified: {}. \
         In 2-3 calm, clear sentences: describe what you see, assess the situation, \
         and give the single most important first-aid instruction the bystander should do RIGHT NOW. \
         Be specific about body locations. Speak as if directly guiding someone who is panicking.",
        assessment.reason(),
        format_landmarks(landmarks)
    )
}
