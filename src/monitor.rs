use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use anyhow::Result;
use chrono::Local;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::alarm::AlarmController;
use crate::camera::Frame;
use crate::config::DetectionConfig;
use crate::detection::{
    Command, DebounceGate, DetectionState, DetectionStateMachine, DistressAssessment, PostureClassifier, Transition,
};
use crate::pipeline::{PipelineOrchestrator, PipelineRequest, PipelineResult};
use crate::pose::{AnatomicalLandmarks, FrameSize, Pose, PoseEstimator};

/// ボタン押下などの外部トリガー
#[derive(Debug, Clone, Copy)]
pub struct TriggerEvent {
    pub at: Instant,
}

/// どのタスクからでも trigger() できるハンドル
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<TriggerEvent>,
}

impl TriggerHandle {
    /// キューが一杯なら捨てる（false を返す）
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(TriggerEvent { at: Instant::now() }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("[monitor] trigger queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("[monitor] monitor gone, dropping trigger");
                false
            }
        }
    }
}

pub fn trigger_channel(capacity: usize) -> (TriggerHandle, mpsc::Receiver<TriggerEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TriggerHandle { tx }, rx)
}

/// 姿勢 → 判定とランドマーク。人がいなければ異常なし
pub fn assess(
    classifier: &PostureClassifier,
    pose: Option<&Pose>,
    size: FrameSize,
) -> (DistressAssessment, AnatomicalLandmarks) {
    match pose {
        Some(pose) => (
            classifier.classify(pose, size),
            AnatomicalLandmarks::from_pose(pose, size, classifier.config().keypoint_confidence),
        ),
        None => (DistressAssessment::default(), AnatomicalLandmarks::default()),
    }
}

/// 1フレーム分の処理結果
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub pose_present: bool,
    pub assessment: DistressAssessment,
    pub landmarks: AnatomicalLandmarks,
    pub state: DetectionState,
    /// このフレームで起きた遷移（起きた順）
    pub transitions: Vec<Transition>,
    pub inference_time: Duration,
    /// このフレームで回収したパイプライン結果
    pub pipeline_result: Option<PipelineResult>,
}

/// フレームごとの検出ループ本体
///
/// 状態機械はここだけが持つ。副作用（アラーム・パイプライン）は
/// 遷移を決めたあとで別タスクに投げる。アラーム操作は投げた順に
/// 実行され、パイプラインの結果は次以降のフレームで回収する。
pub struct Monitor {
    estimator: Box<dyn PoseEstimator>,
    classifier: PostureClassifier,
    machine: DetectionStateMachine,
    alarm: Arc<AlarmController>,
    pipeline: Arc<PipelineOrchestrator>,
    handle: TriggerHandle,
    triggers: mpsc::Receiver<TriggerEvent>,
    pending: Option<oneshot::Receiver<PipelineResult>>,
    /// 最後に投げたアラーム操作（次の操作はこれの完了を待つ）
    alarm_task: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(
        estimator: Box<dyn PoseEstimator>,
        classifier: PostureClassifier,
        detection: &DetectionConfig,
        alarm: Arc<AlarmController>,
        pipeline: Arc<PipelineOrchestrator>,
    ) -> Self {
        let (handle, triggers) = trigger_channel(detection.trigger_queue);
        Self {
            estimator,
            classifier,
            machine: DetectionStateMachine::new(detection.confirm_frames, detection.trigger_cooldown()),
            alarm,
            pipeline,
            handle,
            triggers,
            pending: None,
            alarm_task: None,
        }
    }

    pub fn trigger_handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    pub fn trigger(&self) -> bool {
        self.handle.trigger()
    }

    pub fn state(&self) -> DetectionState {
        self.machine.state()
    }

    pub fn gate(&self) -> &DebounceGate {
        self.machine.gate()
    }

    pub fn pipeline_running(&self) -> bool {
        self.pending.is_some()
    }

    /// 1フレーム処理する。端末との通信は待たない
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport> {
        // 1. 姿勢推定
        let t0 = StdInstant::now();
        let pose = self.estimator.estimate(frame)?;
        let inference_time = t0.elapsed();

        // 2. 判定
        let (assessment, landmarks) = assess(&self.classifier, pose.as_ref(), frame.size());

        let mut transitions = Vec::new();

        // 3. パイプライン完了
        let pipeline_result = self.poll_pipeline();
        if pipeline_result.is_some() {
            transitions.extend(self.machine.on_pipeline_finished());
        }

        // 4. 溜まったトリガー
        while let Ok(event) = self.triggers.try_recv() {
            match self.machine.on_trigger(event.at) {
                Ok(t) => transitions.push(t),
                Err(rejection) => debug!("[monitor] trigger rejected: {rejection:?}"),
            }
        }

        // 5. デバウンス
        transitions.extend(self.machine.observe(assessment.is_distress()));

        // 6. 副作用
        for transition in &transitions {
            for command in transition.commands() {
                match command {
                    Command::StartAlarm => self.dispatch_alarm(true),
                    Command::StopAlarm => self.dispatch_alarm(false),
                    Command::StartPipeline => self.spawn_pipeline(PipelineRequest {
                        frame: frame.clone(),
                        assessment: assessment.clone(),
                        landmarks,
                        requested_at: Local::now(),
                    }),
                }
            }
        }

        Ok(FrameReport {
            pose_present: pose.is_some(),
            assessment,
            landmarks,
            state: self.machine.state(),
            transitions,
            inference_time,
            pipeline_result,
        })
    }

    fn dispatch_alarm(&mut self, start: bool) {
        let previous = self.alarm_task.take();
        let alarm = self.alarm.clone();
        self.alarm_task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if start {
                alarm.start().await;
            } else {
                alarm.stop().await;
            }
        }));
    }

    /// 投げたアラーム操作が全部終わるまで待つ
    pub async fn flush_alarm(&mut self) {
        if let Some(task) = self.alarm_task.take() {
            if let Err(e) = task.await {
                error!("[monitor] alarm task failed: {e}");
            }
        }
    }

    fn spawn_pipeline(&mut self, request: PipelineRequest) {
        if self.pending.is_some() {
            warn!("[monitor] pipeline already running, ignoring start");
            return;
        }
        info!("[monitor] starting pipeline: {}", request.assessment.reason());
        let (tx, rx) = oneshot::channel();
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let result = pipeline.run(request).await;
            let _ = tx.send(result);
        });
        self.pending = Some(rx);
    }

    fn poll_pipeline(&mut self) -> Option<PipelineResult> {
        let rx = self.pending.as_mut()?;
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => {
                error!("[monitor] pipeline task ended without a result");
                PipelineResult::aborted("pipeline task ended without a result")
            }
        };
        self.pending = None;
        Some(result)
    }

    /// 終了処理。走っているパイプラインは待たない
    pub async fn shutdown(&mut self) {
        if self.pending.take().is_some() {
            warn!("[monitor] shutting down with pipeline in flight");
        }
        self.dispatch_alarm(false);
        self.flush_alarm().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::stop_command;
    use crate::config::{AlarmConfig, ClassifierConfig, PipelineConfig};
    use crate::remote::RemoteSessionManager;
    use crate::services::{SceneAnalyzer, ServiceError};
    use crate::testing::{fallen_pose, test_frame, upright_pose, FakeAnalyzer, FakeSynthesizer, FakeTransport, StubEstimator};
    use async_trait::async_trait;
    use DetectionState::*;

    struct Harness {
        monitor: Monitor,
        estimator: StubEstimator,
        transport: FakeTransport,
        _dir: tempfile::TempDir,
    }

    fn harness(analyzer: Arc<dyn SceneAnalyzer>, cooldown_secs: f64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let remote = Arc::new(RemoteSessionManager::new(Arc::new(transport.clone()), Duration::from_secs(5)));
        let alarm = Arc::new(AlarmController::new(AlarmConfig::default(), remote.clone()));
        let pipeline = Arc::new(PipelineOrchestrator::new(
            PipelineConfig {
                capture_dir: dir.path().to_path_buf(),
                ..PipelineConfig::default()
            },
            AlarmConfig::default(),
            analyzer,
            Arc::new(FakeSynthesizer::new()),
            remote,
        ));
        let estimator = StubEstimator::new(None);
        let detection = DetectionConfig {
            trigger_cooldown_secs: cooldown_secs,
            ..DetectionConfig::default()
        };
        let monitor = Monitor::new(
            Box::new(estimator.clone()),
            PostureClassifier::new(ClassifierConfig::default()),
            &detection,
            alarm,
            pipeline,
        );
        Harness {
            monitor,
            estimator,
            transport,
            _dir: dir,
        }
    }

    impl Harness {
        async fn frame(&mut self) -> FrameReport {
            let report = self.monitor.process_frame(&test_frame()).unwrap();
            self.monitor.flush_alarm().await;
            report
        }

        async fn raise_alarm(&mut self) {
            self.estimator.set(Some(fallen_pose()));
            for _ in 0..5 {
                self.frame().await;
            }
            assert_eq!(self.monitor.state(), Alarm);
        }

        /// パイプライン結果が回収されるまでフレームを回す
        async fn wait_for_pipeline(&mut self) -> FrameReport {
            for _ in 0..500 {
                let report = self.frame().await;
                if report.pipeline_result.is_some() {
                    return report;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("pipeline did not finish");
        }

        fn count_commands(&self, prefix: &str) -> usize {
            self.transport.commands().iter().filter(|c| c.starts_with(prefix)).count()
        }

        /// 再生コマンドも pkill で始まるので停止コマンドは完全一致で数える
        fn count_stops(&self) -> usize {
            let stop = stop_command(&AlarmConfig::default());
            self.transport.commands().iter().filter(|c| **c == stop).count()
        }
    }

    struct PanickingAnalyzer;

    #[async_trait]
    impl SceneAnalyzer for PanickingAnalyzer {
        async fn analyze(&self, _jpeg: &[u8], _prompt: &str) -> Result<String, ServiceError> {
            panic!("analyzer crashed");
        }
    }

    #[tokio::test]
    async fn test_confirm_then_clear() {
        let mut h = harness(Arc::new(FakeAnalyzer::new()), 5.0);
        h.estimator.set(Some(fallen_pose()));

        for _ in 0..4 {
            let report = h.frame().await;
            assert!(report.pose_present);
            assert!(report.assessment.is_distress());
            assert_eq!(report.state, Monitoring);
            assert!(report.transitions.is_empty());
        }
        let report = h.frame().await;
        assert_eq!(report.transitions, vec![Transition { from: Monitoring, to: Alarm }]);
        assert_eq!(h.count_commands("nohup"), 1);

        // 警報中の異常フレームは何も起こさない
        let report = h.frame().await;
        assert!(report.transitions.is_empty());
        assert_eq!(h.count_commands("nohup"), 1);

        h.estimator.set(Some(upright_pose()));
        let report = h.frame().await;
        assert_eq!(report.transitions, vec![Transition { from: Alarm, to: Monitoring }]);
        assert_eq!(h.count_commands("pkill"), 1);
    }

    #[tokio::test]
    async fn test_missing_pose_counts_as_clear() {
        let mut h = harness(Arc::new(FakeAnalyzer::new()), 5.0);
        h.raise_alarm().await;

        h.estimator.set(None);
        let report = h.frame().await;
        assert!(!report.pose_present);
        assert!(!report.assessment.is_distress());
        assert!(report.landmarks.is_empty());
        assert_eq!(report.state, Monitoring);
    }

    #[tokio::test]
    async fn test_trigger_outside_alarm_is_ignored() {
        let analyzer = FakeAnalyzer::new();
        let mut h = harness(Arc::new(analyzer.clone()), 5.0);
        h.estimator.set(Some(upright_pose()));

        assert!(h.monitor.trigger());
        let report = h.frame().await;
        assert_eq!(report.state, Monitoring);
        assert!(report.transitions.is_empty());
        assert!(!h.monitor.pipeline_running());
        assert_eq!(analyzer.calls(), 0);
    }

    #[tokio::test]
    async fn test_trigger_runs_pipeline_and_returns_to_monitoring() {
        let analyzer = FakeAnalyzer::new();
        let mut h = harness(Arc::new(analyzer.clone()), 5.0);
        h.raise_alarm().await;

        h.monitor.trigger_handle().trigger();
        let report = h.frame().await;
        assert_eq!(report.transitions, vec![Transition { from: Alarm, to: Pipeline }]);
        assert_eq!(report.state, Pipeline);
        assert_eq!(h.count_stops(), 1);

        let report = h.wait_for_pipeline().await;
        assert_eq!(report.transitions, vec![Transition { from: Pipeline, to: Monitoring }]);
        assert_eq!(report.state, Monitoring);
        assert!(report.pipeline_result.unwrap().is_success());
        assert_eq!(analyzer.calls(), 1);
        // ゲートはリセット済み。今回のフレームが1つ目
        assert_eq!(h.monitor.gate().progress(), (1, 5));
        assert_eq!(h.monitor.gate().clear_streak(), 0);
    }

    #[tokio::test]
    async fn test_triggers_within_cooldown_start_one_pipeline() {
        let analyzer = FakeAnalyzer::new();
        let mut h = harness(Arc::new(analyzer.clone()), 60.0);
        h.raise_alarm().await;

        h.monitor.trigger();
        h.monitor.trigger();
        let report = h.frame().await;
        assert_eq!(report.transitions, vec![Transition { from: Alarm, to: Pipeline }]);
        h.wait_for_pipeline().await;

        // クールダウン中に再び警報 → トリガーは無視される
        h.raise_alarm().await;
        h.monitor.trigger();
        let report = h.frame().await;
        assert_eq!(report.state, Alarm);
        assert!(report.transitions.is_empty());
        assert!(!h.monitor.pipeline_running());
        assert_eq!(analyzer.calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_pipeline_does_not_block_frames() {
        let analyzer = FakeAnalyzer::new().with_delay(Duration::from_secs(3600));
        let mut h = harness(Arc::new(analyzer), 5.0);
        h.raise_alarm().await;
        h.monitor.trigger();

        for _ in 0..10 {
            let report = h.frame().await;
            assert_eq!(report.state, Pipeline);
            assert!(report.pipeline_result.is_none());
        }
        // PIPELINE 中の判定は無視（アラームは再開しない）
        assert_eq!(h.count_commands("nohup"), 1);
    }

    #[tokio::test]
    async fn test_crashed_pipeline_returns_to_monitoring() {
        let mut h = harness(Arc::new(PanickingAnalyzer), 5.0);
        h.raise_alarm().await;
        h.monitor.trigger();
        h.frame().await;

        let report = h.wait_for_pipeline().await;
        assert_eq!(report.state, Monitoring);
        let result = report.pipeline_result.unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_device_does_not_stall_frames() {
        let mut h = harness(Arc::new(FakeAnalyzer::new()), 5.0);
        h.transport.hang_next_command();

        h.estimator.set(Some(fallen_pose()));
        for _ in 0..5 {
            h.monitor.process_frame(&test_frame()).unwrap();
        }
        assert_eq!(h.monitor.state(), Alarm);
        tokio::task::yield_now().await;

        // 開始コマンドが返らなくてもフレームは進む
        h.estimator.set(Some(upright_pose()));
        let report = h.monitor.process_frame(&test_frame()).unwrap();
        assert_eq!(report.transitions, vec![Transition { from: Alarm, to: Monitoring }]);
        for _ in 0..10 {
            h.monitor.process_frame(&test_frame()).unwrap();
        }
        assert_eq!(h.monitor.gate().clear_streak(), 10);
        assert!(h.transport.commands().is_empty());

        // 開始はタイムアウトし、停止はその後に送られる
        h.monitor.flush_alarm().await;
        let commands = h.transport.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("pkill"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_alarm() {
        let mut h = harness(Arc::new(FakeAnalyzer::new()), 5.0);
        h.raise_alarm().await;
        h.monitor.shutdown().await;
        assert_eq!(h.count_commands("pkill"), 1);
    }

    #[test]
    fn test_full_trigger_queue_drops_events() {
        let (handle, mut rx) = trigger_channel(1);
        assert!(handle.trigger());
        assert!(!handle.trigger());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
