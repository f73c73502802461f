//! テスト用のフェイク実装

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::camera::Frame;
use crate::pose::{FrameSize, Keypoint, KeypointIndex, Pose, PoseEstimator};
use crate::remote::{CommandOutput, RemoteChannel, RemoteError, RemoteTransport};
use crate::services::{SceneAnalyzer, ServiceError, SpeechSynthesizer};

pub const SIZE: FrameSize = FrameSize { width: 1000, height: 1000 };

pub fn pose_with(points: &[(KeypointIndex, f32, f32)]) -> Pose {
    let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
    for &(index, x, y) in points {
        keypoints[index as usize] = Keypoint::new(x, y, 0.9);
    }
    Pose::new(keypoints)
}

/// 頭が腰より下。他のチェックは発火しない
pub fn fallen_pose() -> Pose {
    use KeypointIndex::*;
    pose_with(&[(Nose, 0.5, 0.8), (LeftHip, 0.45, 0.5), (RightHip, 0.55, 0.5)])
}

/// 頭が腰より上。どのチェックも発火しない
pub fn upright_pose() -> Pose {
    use KeypointIndex::*;
    pose_with(&[(Nose, 0.5, 0.2), (LeftHip, 0.45, 0.5), (RightHip, 0.55, 0.5)])
}

pub fn standing_pose() -> Pose {
    use KeypointIndex::*;
    pose_with(&[
        (Nose, 0.5, 0.2),
        (LeftShoulder, 0.4, 0.3),
        (RightShoulder, 0.6, 0.3),
        (LeftHip, 0.42, 0.55),
        (RightHip, 0.58, 0.55),
        (LeftWrist, 0.35, 0.5),
        (RightWrist, 0.65, 0.5),
        (LeftAnkle, 0.43, 0.9),
        (RightAnkle, 0.57, 0.9),
    ])
}

pub fn test_frame() -> Frame {
    Frame::new(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9], SIZE.width, SIZE.height)
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportState {
    connects: usize,
    generation: u64,
    refuse: bool,
    fail_next_transport: Option<String>,
    fail_next_command: Option<(i32, String)>,
    fail_commands_containing: Option<(String, i32)>,
    hang_next: bool,
    lose_next_reply: bool,
    command_delay: Option<(String, Duration)>,
    commands: Vec<String>,
    uploads: Vec<(PathBuf, String)>,
    downloads: Vec<(String, PathBuf)>,
}

/// 呼び出しを記録するだけのリモート
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().uploads.clone()
    }

    pub fn downloads(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().downloads.clone()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    pub fn fail_next_transport(&self, message: &str) {
        self.state.lock().fail_next_transport = Some(message.to_string());
    }

    pub fn fail_next_command(&self, exit_code: i32, stderr: &str) {
        self.state.lock().fail_next_command = Some((exit_code, stderr.to_string()));
    }

    /// `needle` を含むコマンドを常に失敗させる
    pub fn fail_commands_containing(&self, needle: &str, exit_code: i32) {
        self.state.lock().fail_commands_containing = Some((needle.to_string(), exit_code));
    }

    pub fn hang_next_command(&self) {
        self.state.lock().hang_next = true;
    }

    /// 次のコマンドは実行されるが応答が届かない
    pub fn lose_next_reply(&self) {
        self.state.lock().lose_next_reply = true;
    }

    /// `needle` を含むコマンドは完了まで `delay` かかる
    pub fn delay_commands_containing(&self, needle: &str, delay: Duration) {
        self.state.lock().command_delay = Some((needle.to_string(), delay));
    }

    /// 既存チャネルを全て死んだことにする
    pub fn kill_sessions(&self) {
        self.state.lock().generation += 1;
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn connect(&self) -> Result<Box<dyn RemoteChannel>, RemoteError> {
        let mut state = self.state.lock();
        if state.refuse {
            return Err(RemoteError::Connect("connection refused".to_string()));
        }
        state.connects += 1;
        Ok(Box::new(FakeChannel {
            state: self.state.clone(),
            generation: state.generation,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

struct FakeChannel {
    state: Arc<Mutex<TransportState>>,
    generation: u64,
    closed: bool,
}

impl FakeChannel {
    /// 仕込まれた転送エラーを消費する
    fn take_transport_failure(&self) -> Result<(), RemoteError> {
        match self.state.lock().fail_next_transport.take() {
            Some(message) => Err(RemoteError::Transport(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    fn is_alive(&self) -> bool {
        !self.closed && self.state.lock().generation == self.generation
    }

    async fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.take_transport_failure()?;
        let hang = std::mem::take(&mut self.state.lock().hang_next);
        if hang {
            std::future::pending::<()>().await;
        }

        let delay = {
            let mut state = self.state.lock();
            state.commands.push(command.to_string());
            if std::mem::take(&mut state.lose_next_reply) {
                return Err(RemoteError::Transport("connection reset".to_string()));
            }
            state
                .command_delay
                .as_ref()
                .filter(|(needle, _)| command.contains(needle.as_str()))
                .map(|(_, delay)| *delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some((exit_code, stderr)) = state.fail_next_command.take() {
            return Err(RemoteError::CommandFailed { exit_code, stderr });
        }
        if let Some((needle, exit_code)) = &state.fail_commands_containing {
            if command.contains(needle.as_str()) {
                return Err(RemoteError::CommandFailed {
                    exit_code: *exit_code,
                    stderr: "failed".to_string(),
                });
            }
        }
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.take_transport_failure()?;
        self.state.lock().uploads.push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.take_transport_failure()?;
        self.state.lock().downloads.push((remote.to_string(), local.to_path_buf()));
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// 失敗の種類（ServiceError は Clone でないので都度作る）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    RateLimited,
    Transient,
    Rejected,
}

impl Failure {
    fn to_error(self) -> ServiceError {
        match self {
            Failure::RateLimited => ServiceError::RateLimited { retry_after: None },
            Failure::Transient => ServiceError::Transient("connection reset".to_string()),
            Failure::Rejected => ServiceError::Rejected {
                status: 400,
                body: "bad request".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<Failure>,
    always: Option<Failure>,
    calls: Vec<String>,
}

#[derive(Clone, Default)]
struct Script {
    state: Arc<Mutex<ScriptState>>,
    delay: Option<Duration>,
}

impl Script {
    fn next(&self, input: &str) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        state.calls.push(input.to_string());
        if let Some(failure) = state.queue.pop_front() {
            return Err(failure.to_error());
        }
        match state.always {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

pub const GUIDANCE: &str = "The person has collapsed. Call emergency services and start chest compressions now.";

/// 指示文を返すシーン解析。失敗を仕込める
#[derive(Clone, Default)]
pub struct FakeAnalyzer {
    script: Script,
}

impl FakeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_failing(failure: Failure) -> Self {
        let analyzer = Self::default();
        analyzer.script.state.lock().always = Some(failure);
        analyzer
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    /// 次の呼び出しを失敗させる（順に消費）
    pub fn fail_next(&self, failure: Failure) {
        self.script.state.lock().queue.push_back(failure);
    }

    pub fn calls(&self) -> usize {
        self.script.state.lock().calls.len()
    }
}

#[async_trait]
impl SceneAnalyzer for FakeAnalyzer {
    async fn analyze(&self, _jpeg: &[u8], prompt: &str) -> Result<String, ServiceError> {
        self.script.pause().await;
        self.script.next(prompt)?;
        Ok(GUIDANCE.to_string())
    }
}

/// 固定の MP3 バイト列を返す音声合成
#[derive(Clone, Default)]
pub struct FakeSynthesizer {
    script: Script,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_failing(failure: Failure) -> Self {
        let synthesizer = Self::default();
        synthesizer.script.state.lock().always = Some(failure);
        synthesizer
    }

    pub fn calls(&self) -> usize {
        self.script.state.lock().calls.len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.script.state.lock().calls.clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ServiceError> {
        self.script.pause().await;
        self.script.next(text)?;
        Ok(Bytes::from_static(b"ID3fake-mp3"))
    }
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// 外から差し替えられる姿勢を返す推定器
#[derive(Clone, Default)]
pub struct StubEstimator {
    pose: Arc<Mutex<Option<Pose>>>,
}

impl StubEstimator {
    pub fn new(pose: Option<Pose>) -> Self {
        Self {
            pose: Arc::new(Mutex::new(pose)),
        }
    }

    pub fn set(&self, pose: Option<Pose>) {
        *self.pose.lock() = pose;
    }
}

impl PoseEstimator for StubEstimator {
    fn estimate(&mut self, _frame: &Frame) -> Result<Option<Pose>> {
        Ok(self.pose.lock().clone())
    }
}
