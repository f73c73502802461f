//! 画像1枚でパイプラインを1回だけ実行する
//!
//! 使い方: pipeline_once <image.jpg>

use anyhow::{bail, Context, Result};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;

use guardian_eye::camera::Frame;
use guardian_eye::config::{Config, Credentials};
use guardian_eye::detection::PostureClassifier;
use guardian_eye::monitor::assess;
use guardian_eye::pipeline::{PipelineOrchestrator, PipelineRequest};
use guardian_eye::pose::{MoveNetDetector, PoseEstimator};
use guardian_eye::remote::{OpenSshTransport, RemoteSessionManager};
use guardian_eye::services::elevenlabs::ElevenLabsClient;
use guardian_eye::services::gemini::GeminiClient;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let image_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: pipeline_once <image.jpg>")?;
    let config = Config::load_or_default(CONFIG_PATH)?;
    let credentials = Credentials::from_env()?;

    let (width, height) = image::image_dimensions(&image_path)
        .with_context(|| format!("failed to read image: {}", image_path.display()))?;
    let frame = Frame::from_file(&image_path, width, height).await?;
    println!("Image: {} ({}x{})", image_path.display(), width, height);

    let mut detector = MoveNetDetector::new(&config.pose.model_path, config.pose.min_pose_confidence)?;
    let pose = detector.estimate(&frame)?;
    let classifier = PostureClassifier::new(config.classifier.clone());
    let (assessment, landmarks) = assess(&classifier, pose.as_ref(), frame.size());

    println!("Pose: {}", if pose.is_some() { "detected" } else { "none" });
    println!("Assessment: {}", assessment.reason());
    for (name, point) in landmarks.sites() {
        println!("  {}: ({:.0}, {:.0})", name, point.x, point.y);
    }
    println!();

    // 再生しない場合は接続しない（セッションは遅延接続）
    let transport = OpenSshTransport::new(config.remote.clone());
    let remote = Arc::new(RemoteSessionManager::new(
        Arc::new(transport),
        config.remote.operation_timeout(),
    ));
    let pipeline = PipelineOrchestrator::new(
        config.pipeline.clone(),
        config.alarm.clone(),
        Arc::new(GeminiClient::new(&config.gemini, &credentials.gemini_api_key)?),
        Arc::new(ElevenLabsClient::new(&config.elevenlabs, &credentials.elevenlabs_api_key)?),
        remote.clone(),
    );

    let result = pipeline
        .run(PipelineRequest {
            frame,
            assessment,
            landmarks,
            requested_at: Local::now(),
        })
        .await;
    remote.disconnect().await;

    println!("Outcome: {:?} ({:.1}s)", result.outcome(), result.elapsed.as_secs_f32());
    if let Some(path) = &result.frame_path {
        println!("Frame: {}", path.display());
    }
    if let Some(text) = &result.guidance {
        println!("Guidance: {text}");
    }
    if let Some(path) = &result.audio_path {
        println!("Audio: {}", path.display());
    }
    println!("Played: {}", result.played);

    if let Some(failure) = result.failure {
        bail!("{} failed: {}", failure.step, failure.message);
    }
    Ok(())
}
