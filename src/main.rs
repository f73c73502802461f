use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use guardian_eye::alarm::AlarmController;
use guardian_eye::camera::CameraStream;
use guardian_eye::config::{Config, Credentials};
use guardian_eye::detection::PostureClassifier;
use guardian_eye::monitor::Monitor;
use guardian_eye::pipeline::PipelineOrchestrator;
use guardian_eye::pose::MoveNetDetector;
use guardian_eye::remote::{ButtonListener, OpenSshTransport, RemoteSessionManager};
use guardian_eye::services::elevenlabs::ElevenLabsClient;
use guardian_eye::services::gemini::GeminiClient;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load_or_default(CONFIG_PATH)?;
    // キーが無ければ監視を始めない
    let credentials = Credentials::from_env()?;

    println!("Guardian Eye {}", env!("GIT_VERSION"));
    println!("Device: {}@{}:{}", config.remote.user, config.remote.host, config.remote.port);
    println!(
        "Camera: {}x{} @ {}fps",
        config.camera.width, config.camera.height, config.camera.fps
    );
    println!(
        "Detection: confirm={} frames, trigger cooldown={}s",
        config.detection.confirm_frames, config.detection.trigger_cooldown_secs
    );
    println!(
        "Pipeline: speech={} playback={}",
        if config.pipeline.synthesize { "ON" } else { "OFF" },
        if config.pipeline.play { "ON" } else { "OFF" }
    );
    println!("GPIO button: {}", config.button.pin);
    println!();

    let transport = OpenSshTransport::new(config.remote.clone());
    let remote = Arc::new(RemoteSessionManager::new(
        Arc::new(transport.clone()),
        config.remote.operation_timeout(),
    ));
    remote
        .ensure_connected()
        .await
        .context("failed to connect to the device")?;

    let alarm = Arc::new(AlarmController::new(config.alarm.clone(), remote.clone()));
    if let Err(e) = alarm.prepare().await {
        warn!("alarm upload failed: {e}");
    }

    let analyzer = Arc::new(GeminiClient::new(&config.gemini, &credentials.gemini_api_key)?);
    let synthesizer = Arc::new(ElevenLabsClient::new(&config.elevenlabs, &credentials.elevenlabs_api_key)?);
    let pipeline = Arc::new(PipelineOrchestrator::new(
        config.pipeline.clone(),
        config.alarm.clone(),
        analyzer,
        synthesizer,
        remote.clone(),
    ));

    let detector = MoveNetDetector::new(&config.pose.model_path, config.pose.min_pose_confidence)?;
    let mut monitor = Monitor::new(
        Box::new(detector),
        PostureClassifier::new(config.classifier.clone()),
        &config.detection,
        alarm,
        pipeline,
    );

    let cancel = CancellationToken::new();
    let button = ButtonListener::new(
        config.button.clone(),
        remote.clone(),
        transport.clone(),
        monitor.trigger_handle(),
    )
    .spawn(cancel.clone());

    let mut camera = CameraStream::spawn(&transport, &config.camera)?;
    println!("操作: [ボタン] 警報中に押すと案内開始  [Ctrl-C] 終了");
    println!();

    let result = run(&mut monitor, &mut camera).await;

    // 後片付け（失敗しても続ける）
    cancel.cancel();
    monitor.shutdown().await;
    camera.stop().await;
    let _ = button.await;
    remote.disconnect().await;
    info!("stopped");

    result
}

async fn run(monitor: &mut Monitor, camera: &mut CameraStream) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // FPS計測
    let mut frame_count = 0u32;
    let mut inference_total = Duration::ZERO;
    let mut fps_timer = Instant::now();

    loop {
        let frame = tokio::select! {
            _ = &mut ctrl_c => {
                println!("\n終了します");
                return Ok(());
            }
            frame = camera.next_frame() => frame?,
        };
        let Some(frame) = frame else {
            warn!("camera stream ended");
            return Ok(());
        };

        let report = monitor.process_frame(&frame)?;
        for transition in &report.transitions {
            println!(">>> {transition}");
        }
        if let Some(result) = &report.pipeline_result {
            match &result.guidance {
                Some(text) => println!("Guidance: {text}"),
                None => println!("Guidance: (none)"),
            }
            if let Some(failure) = &result.failure {
                println!("Pipeline {} failed: {}", failure.step, failure.message);
            }
        }

        frame_count += 1;
        inference_total += report.inference_time;

        let elapsed = fps_timer.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = frame_count as f64 / elapsed.as_secs_f64();
            let avg_ms = inference_total.as_secs_f64() * 1000.0 / frame_count as f64;
            let (count, threshold) = monitor.gate().progress();
            println!(
                "FPS: {:.1} | inference: {:.1}ms | state: {} | distress: {}/{} clear: {} | {}",
                fps,
                avg_ms,
                report.state,
                count,
                threshold,
                monitor.gate().clear_streak(),
                report.assessment.reason()
            );
            frame_count = 0;
            inference_total = Duration::ZERO;
            fps_timer = Instant::now();
        }
    }
}
