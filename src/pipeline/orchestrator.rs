use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use tokio::time::Instant;

use super::capture::CaptureStore;
use super::prompt::{build_prompt, NO_DISTRESS_RESPONSE};
use crate::alarm;
use crate::camera::Frame;
use crate::config::{AlarmConfig, PipelineConfig};
use crate::detection::DistressAssessment;
use crate::pose::AnatomicalLandmarks;
use crate::remote::transport::shell_quote;
use crate::remote::{RemoteError, RemoteSessionManager};
use crate::retry::retry;
use crate::services::{SceneAnalyzer, SpeechSynthesizer};

/// トリガー時点のフレームと姿勢コンテキスト。1回の実行で消費される
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub frame: Frame,
    pub assessment: DistressAssessment,
    pub landmarks: AnatomicalLandmarks,
    pub requested_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Analysis,
    Synthesis,
    Playback,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStep::Analysis => "analysis",
            PipelineStep::Synthesis => "synthesis",
            PipelineStep::Playback => "playback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub step: PipelineStep,
    pub message: String,
}

/// 何が得られたか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// 案内文が得られなかった
    NoGuidance,
    /// 案内文はあるが音声なし
    GuidanceOnly,
    /// 案内文と音声の両方
    Complete,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub stem: String,
    pub frame_path: Option<PathBuf>,
    pub guidance: Option<String>,
    pub audio_path: Option<PathBuf>,
    pub played: bool,
    pub failure: Option<PipelineFailure>,
    pub elapsed: Duration,
}

impl PipelineResult {
    fn new(stem: String) -> Self {
        Self {
            stem,
            frame_path: None,
            guidance: None,
            audio_path: None,
            played: false,
            failure: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn outcome(&self) -> PipelineOutcome {
        match (&self.guidance, &self.audio_path) {
            (None, _) => PipelineOutcome::NoGuidance,
            (Some(_), None) => PipelineOutcome::GuidanceOnly,
            (Some(_), Some(_)) => PipelineOutcome::Complete,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// 失敗したことにする（タスクが落ちた場合など）
    pub fn aborted(message: impl Into<String>) -> Self {
        let mut result = Self::new(String::new());
        result.failure = Some(PipelineFailure {
            step: PipelineStep::Analysis,
            message: message.into(),
        });
        result
    }

    fn fail(&mut self, step: PipelineStep, message: impl fmt::Display) {
        error!("[pipeline] {step} failed: {message}");
        self.failure = Some(PipelineFailure {
            step,
            message: message.to_string(),
        });
    }
}

/// シーン解析 → 音声合成 → 端末で再生
///
/// 各ステップは独自のリトライポリシーを持ち、全体の所要時間は有限。
/// どこで失敗しても結果を返す（エラーは PipelineResult に記録）。
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    alarm: AlarmConfig,
    analyzer: Arc<dyn SceneAnalyzer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    remote: Arc<RemoteSessionManager>,
    store: CaptureStore,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        alarm: AlarmConfig,
        analyzer: Arc<dyn SceneAnalyzer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        remote: Arc<RemoteSessionManager>,
    ) -> Self {
        let store = CaptureStore::new(config.capture_dir.clone());
        Self {
            config,
            alarm,
            analyzer,
            synthesizer,
            remote,
            store,
        }
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    /// 残っているアラームを止めてから案内音声を再生する
    fn play_command(&self) -> String {
        format!(
            "{}; sleep 0.3; {} {}",
            alarm::kill_command(&self.alarm),
            self.alarm.player,
            shell_quote(&self.config.remote_audio_path)
        )
    }

    pub async fn run(&self, request: PipelineRequest) -> PipelineResult {
        let start = Instant::now();
        let stem = CaptureStore::stem_for(request.requested_at);
        let mut result = PipelineResult::new(stem.clone());
        info!("[pipeline] start ({stem}): {}", request.assessment.reason());

        // 1. フレーム保存（失敗しても続行）
        match self.store.write_frame(&stem, &request.frame.jpeg).await {
            Ok(path) => {
                info!("[pipeline] frame saved -> {}", path.display());
                result.frame_path = Some(path);
            }
            Err(e) => warn!("[pipeline] could not save frame: {e:#}"),
        }

        self.run_steps(&request, &stem, &mut result).await;

        result.elapsed = start.elapsed();
        match &result.failure {
            None => info!("[pipeline] done in {:.1}s ({:?})", result.elapsed.as_secs_f32(), result.outcome()),
            Some(f) => warn!(
                "[pipeline] finished with {} failure after {:.1}s ({:?})",
                f.step,
                result.elapsed.as_secs_f32(),
                result.outcome()
            ),
        }
        result
    }

    async fn run_steps(&self, request: &PipelineRequest, stem: &str, result: &mut PipelineResult) {
        // 2. シーン解析
        let guidance = if !request.assessment.is_distress() && self.config.skip_analysis_when_clear {
            info!("[pipeline] no distress posture, skipping analysis");
            NO_DISTRESS_RESPONSE.to_string()
        } else {
            let step_start = Instant::now();
            let prompt = build_prompt(&request.assessment, &request.landmarks);
            let analyzer = &self.analyzer;
            let jpeg = &request.frame.jpeg;
            let prompt = prompt.as_str();
            match retry("analysis", &self.config.analysis_retry, |_| async move {
                analyzer.analyze(jpeg, prompt).await
            })
            .await
            {
                Ok(text) => {
                    info!("[pipeline] analysis {:.1}s: {}", step_start.elapsed().as_secs_f32(), text);
                    text
                }
                Err(e) => return result.fail(PipelineStep::Analysis, e),
            }
        };

        if let Err(e) = self.store.write_text(stem, &guidance).await {
            warn!("[pipeline] could not save guidance: {e:#}");
        }
        result.guidance = Some(guidance.clone());

        if !self.config.synthesize {
            info!("[pipeline] text-only mode, skipping speech");
            return;
        }

        // 3. 音声合成
        let step_start = Instant::now();
        let synthesizer = &self.synthesizer;
        let text = guidance.as_str();
        let audio = match retry("synthesis", &self.config.synthesis_retry, |_| async move {
            synthesizer.synthesize(text).await
        })
        .await
        {
            Ok(audio) => audio,
            Err(e) => return result.fail(PipelineStep::Synthesis, e),
        };
        info!(
            "[pipeline] synthesis {:.1}s ({} bytes)",
            step_start.elapsed().as_secs_f32(),
            audio.len()
        );

        let audio_path = match self.store.write_audio(stem, &audio).await {
            Ok(path) => path,
            Err(e) => return result.fail(PipelineStep::Synthesis, format!("{e:#}")),
        };
        result.audio_path = Some(audio_path.clone());

        if !self.config.play {
            info!("[pipeline] playback disabled, audio at {}", audio_path.display());
            return;
        }

        // 4. 端末で再生
        let step_start = Instant::now();
        let remote = &self.remote;
        let local = audio_path.as_path();
        let remote_path = self.config.remote_audio_path.as_str();
        let command = self.play_command();
        let command = command.as_str();
        // 再生は音声の長さだけ戻ってこないので試行タイムアウトで待つ
        let play_timeout = self.config.playback_retry.attempt_timeout();
        match retry("playback", &self.config.playback_retry, |_| async move {
            remote.upload_file(local, remote_path).await?;
            remote.run_command_with_timeout(command, play_timeout).await?;
            Ok::<(), RemoteError>(())
        })
        .await
        {
            Ok(()) => {
                result.played = true;
                info!("[pipeline] guidance played ({:.1}s)", step_start.elapsed().as_secs_f32());
            }
            Err(e) => result.fail(PipelineStep::Playback, e),
        }
    }
}
