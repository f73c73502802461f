use anyhow::{bail, Context, Result};
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub button: ButtonConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// 秒数・比率が Duration や判定に使える値か確認する
    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        for (name, value) in [
            ("classifier.keypoint_confidence", c.keypoint_confidence),
            ("classifier.fall_margin_px", c.fall_margin_px),
            ("classifier.horizontal_torso_ratio", c.horizontal_torso_ratio),
            ("classifier.horizontal_torso_max_dy_px", c.horizontal_torso_max_dy_px),
            ("classifier.body_spread_ratio", c.body_spread_ratio),
            ("classifier.face_zone_margin", c.face_zone_margin),
            ("classifier.face_distance_ratio", c.face_distance_ratio),
            ("classifier.crouch_torso_px", c.crouch_torso_px),
            ("classifier.crouch_head_hip_px", c.crouch_head_hip_px),
            ("classifier.low_in_frame_ratio", c.low_in_frame_ratio),
        ] {
            check_non_negative(name, f64::from(value))?;
        }
        check_seconds("detection.trigger_cooldown_secs", self.detection.trigger_cooldown_secs)?;
        self.pipeline.analysis_retry.validate("pipeline.analysis_retry")?;
        self.pipeline.synthesis_retry.validate("pipeline.synthesis_retry")?;
        self.pipeline.playback_retry.validate("pipeline.playback_retry")?;
        Ok(())
    }

    /// ファイルが無ければデフォルト設定。壊れたファイルはエラー。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found, using default config", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

/// 上限 (1日)。これより長い待機は設定ミスとみなす
const MAX_SECS: f64 = 86_400.0;

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        bail!("{name} must be a finite non-negative number, got {value}");
    }
    Ok(())
}

fn check_seconds(name: &str, value: f64) -> Result<()> {
    check_non_negative(name, value)?;
    if value > MAX_SECS {
        bail!("{name} must be at most {MAX_SECS}s, got {value}");
    }
    Ok(())
}

/// 不正値でも panic しない秒数変換（負数と NaN は 0、過大値は上限に丸める）
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

// ---------------------------------------------------------------------------
// Edge device connection
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_host")]
    pub host: String,
    #[serde(default = "default_remote_user")]
    pub user: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    /// 公開鍵認証の秘密鍵 (省略時は ssh の既定)
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// ControlMaster ソケットを置くディレクトリ
    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 1操作あたりの上限
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_remote_host() -> String { "guardian.local".to_string() }
fn default_remote_user() -> String { "pi".to_string() }
fn default_remote_port() -> u16 { 22 }
fn default_control_dir() -> PathBuf { std::env::temp_dir() }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_operation_timeout_secs() -> u64 { 30 }

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            user: default_remote_user(),
            port: default_remote_port(),
            identity_file: None,
            control_dir: default_control_dir(),
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Camera stream
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_camera_fps() -> u32 { 15 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_camera_width(),
            height: default_camera_height(),
            fps: default_camera_fps(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pose estimation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    /// これ未満の平均信頼度は「人物なし」
    #[serde(default = "default_min_pose_confidence")]
    pub min_pose_confidence: f32,
}

fn default_model_path() -> PathBuf { PathBuf::from("models/movenet_lightning.onnx") }
fn default_min_pose_confidence() -> f32 { 0.1 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            min_pose_confidence: default_min_pose_confidence(),
        }
    }
}

// ---------------------------------------------------------------------------
// Posture classifier thresholds (pixels unless noted)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// キーポイントの可視判定
    #[serde(default = "default_keypoint_confidence")]
    pub keypoint_confidence: f32,
    /// 鼻が腰中点よりこれ以上下なら転倒
    #[serde(default = "default_fall_margin_px")]
    pub fall_margin_px: f32,
    /// 胴体 dx > dy * ratio で水平
    #[serde(default = "default_horizontal_torso_ratio")]
    pub horizontal_torso_ratio: f32,
    #[serde(default = "default_horizontal_torso_max_dy_px")]
    pub horizontal_torso_max_dy_px: f32,
    /// 外接矩形 幅/高さ
    #[serde(default = "default_body_spread_ratio")]
    pub body_spread_ratio: f32,
    #[serde(default = "default_body_spread_min_points")]
    pub body_spread_min_points: usize,
    /// 顔ゾーン下端 = 肩 + |肩 - 鼻| * margin
    #[serde(default = "default_face_zone_margin")]
    pub face_zone_margin: f32,
    /// 手首と鼻の距離の上限（肩幅に対する比率）
    #[serde(default = "default_face_distance_ratio")]
    pub face_distance_ratio: f32,
    /// うずくまり判定の胴体基準長
    #[serde(default = "default_crouch_torso_px")]
    pub crouch_torso_px: f32,
    #[serde(default = "default_crouch_head_hip_px")]
    pub crouch_head_hip_px: f32,
    /// 画面高さに対する比率 (0.0〜1.0)
    #[serde(default = "default_low_in_frame_ratio")]
    pub low_in_frame_ratio: f32,
    #[serde(default = "default_low_in_frame_min_points")]
    pub low_in_frame_min_points: usize,
}

fn default_keypoint_confidence() -> f32 { 0.3 }
fn default_fall_margin_px() -> f32 { 20.0 }
fn default_horizontal_torso_ratio() -> f32 { 1.5 }
fn default_horizontal_torso_max_dy_px() -> f32 { 100.0 }
fn default_body_spread_ratio() -> f32 { 1.8 }
fn default_body_spread_min_points() -> usize { 4 }
fn default_face_zone_margin() -> f32 { 0.5 }
fn default_face_distance_ratio() -> f32 { 0.75 }
fn default_crouch_torso_px() -> f32 { 40.0 }
fn default_crouch_head_hip_px() -> f32 { 60.0 }
fn default_low_in_frame_ratio() -> f32 { 0.75 }
fn default_low_in_frame_min_points() -> usize { 3 }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            keypoint_confidence: default_keypoint_confidence(),
            fall_margin_px: default_fall_margin_px(),
            horizontal_torso_ratio: default_horizontal_torso_ratio(),
            horizontal_torso_max_dy_px: default_horizontal_torso_max_dy_px(),
            body_spread_ratio: default_body_spread_ratio(),
            body_spread_min_points: default_body_spread_min_points(),
            face_zone_margin: default_face_zone_margin(),
            face_distance_ratio: default_face_distance_ratio(),
            crouch_torso_px: default_crouch_torso_px(),
            crouch_head_hip_px: default_crouch_head_hip_px(),
            low_in_frame_ratio: default_low_in_frame_ratio(),
            low_in_frame_min_points: default_low_in_frame_min_points(),
        }
    }
}

// ---------------------------------------------------------------------------
// Debounce / state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// 連続何フレームで警報
    #[serde(default = "default_confirm_frames")]
    pub confirm_frames: u32,
    /// ボタン入力のクールダウン（秒）
    #[serde(default = "default_trigger_cooldown_secs")]
    pub trigger_cooldown_secs: f64,
    /// トリガーキューの容量
    #[serde(default = "default_trigger_queue")]
    pub trigger_queue: usize,
}

fn default_confirm_frames() -> u32 { 5 }
fn default_trigger_cooldown_secs() -> f64 { 5.0 }
fn default_trigger_queue() -> usize { 8 }

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confirm_frames: default_confirm_frames(),
            trigger_cooldown_secs: default_trigger_cooldown_secs(),
            trigger_queue: default_trigger_queue(),
        }
    }
}

impl DetectionConfig {
    pub fn trigger_cooldown(&self) -> Duration {
        secs(self.trigger_cooldown_secs)
    }
}

// ---------------------------------------------------------------------------
// Alarm
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct AlarmConfig {
    /// 事前生成済みの警報音
    #[serde(default = "default_alarm_local_path")]
    pub local_path: PathBuf,
    #[serde(default = "default_alarm_remote_path")]
    pub remote_path: String,
    /// 再生コマンド (末尾にファイルパスが付く)
    #[serde(default = "default_player")]
    pub player: String,
}

fn default_alarm_local_path() -> PathBuf { PathBuf::from("alarm.mp3") }
fn default_alarm_remote_path() -> String { "/tmp/alarm.mp3".to_string() }
fn default_player() -> String { "mpg123 -q -o pulse".to_string() }

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            local_path: default_alarm_local_path(),
            remote_path: default_alarm_remote_path(),
            player: default_player(),
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO button
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ButtonConfig {
    #[serde(default = "default_button_pin")]
    pub pin: u32,
    #[serde(default = "default_button_script_path")]
    pub script_path: String,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_button_pin() -> u32 { 17 }
fn default_button_script_path() -> String { "/tmp/guardian_button.py".to_string() }
fn default_reconnect_delay_secs() -> u64 { 3 }

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: default_button_pin(),
            script_path: default_button_script_path(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Guidance pipeline
// ---------------------------------------------------------------------------

/// リトライ方針: 最大リトライ回数、待機スケジュール、1試行の上限時間
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// n回目のリトライ前の待機（秒）。足りなければ最後の値を使う。
    pub backoff_secs: Vec<f64>,
    pub attempt_timeout_secs: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_secs: Vec<f64>, attempt_timeout_secs: f64) -> Self {
        Self { max_retries, backoff_secs, attempt_timeout_secs }
    }

    pub fn attempt_timeout(&self) -> Duration {
        secs(self.attempt_timeout_secs)
    }

    /// retry 番目 (0始まり) のリトライ前の待機
    pub fn backoff(&self, retry: u32) -> Duration {
        let value = self
            .backoff_secs
            .get(retry as usize)
            .or_else(|| self.backoff_secs.last())
            .copied()
            .unwrap_or(0.0);
        secs(value)
    }

    /// 最悪ケースの所要時間（試行 + 待機、Retry-After 延長は含まない）
    pub fn worst_case(&self) -> Duration {
        let attempts = self.attempt_timeout().saturating_mul(self.max_retries.saturating_add(1));
        (0..self.max_retries)
            .map(|r| self.backoff(r))
            .fold(attempts, |acc, d| acc.saturating_add(d))
    }

    fn validate(&self, name: &str) -> Result<()> {
        check_seconds(&format!("{name}.attempt_timeout_secs"), self.attempt_timeout_secs)?;
        if self.attempt_timeout_secs == 0.0 {
            bail!("{name}.attempt_timeout_secs must be positive");
        }
        for (i, backoff) in self.backoff_secs.iter().enumerate() {
            check_seconds(&format!("{name}.backoff_secs[{i}]"), *backoff)?;
        }
        Ok(())
    }
}

fn default_analysis_retry() -> RetryPolicy { RetryPolicy::new(3, vec![15.0, 30.0, 45.0], 60.0) }
fn default_synthesis_retry() -> RetryPolicy { RetryPolicy::new(1, vec![5.0], 30.0) }
fn default_playback_retry() -> RetryPolicy { RetryPolicy::new(1, vec![1.0], 120.0) }

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
    #[serde(default = "default_remote_audio_path")]
    pub remote_audio_path: String,
    /// 姿勢に異常が無ければ画像解析を省略して定型文を読み上げる
    #[serde(default = "default_true")]
    pub skip_analysis_when_clear: bool,
    /// false: テキストのみ (音声合成しない)
    #[serde(default = "default_true")]
    pub synthesize: bool,
    /// false: 音声を保存するだけで再生しない
    #[serde(default = "default_true")]
    pub play: bool,
    #[serde(default = "default_analysis_retry")]
    pub analysis_retry: RetryPolicy,
    #[serde(default = "default_synthesis_retry")]
    pub synthesis_retry: RetryPolicy,
    #[serde(default = "default_playback_retry")]
    pub playback_retry: RetryPolicy,
}

fn default_capture_dir() -> PathBuf { PathBuf::from("captures") }
fn default_remote_audio_path() -> String { "/tmp/guidance.mp3".to_string() }
fn default_true() -> bool { true }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_dir: default_capture_dir(),
            remote_audio_path: default_remote_audio_path(),
            skip_analysis_when_clear: true,
            synthesize: true,
            play: true,
            analysis_retry: default_analysis_retry(),
            synthesis_retry: default_synthesis_retry(),
            playback_retry: default_playback_retry(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gemini_endpoint() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_gemini_model() -> String { "gemini-2.5-flash".to_string() }
fn default_http_timeout_secs() -> u64 { 30 }

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gemini_endpoint(),
            model: default_gemini_model(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    #[serde(default = "default_elevenlabs_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_elevenlabs_endpoint() -> String { "https://api.elevenlabs.io/v1".to_string() }
fn default_voice_id() -> String { "21m00Tcm4TlvDq8ikWAM".to_string() }
fn default_tts_model() -> String { "eleven_multilingual_v2".to_string() }
fn default_stability() -> f32 { 0.5 }
fn default_similarity_boost() -> f32 { 0.75 }

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_elevenlabs_endpoint(),
            voice_id: default_voice_id(),
            model_id: default_tts_model(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const ELEVENLABS_API_KEY_VAR: &str = "ELEVENLABS_API_KEY";

/// APIキー。起動時に揃っていなければ監視を始めない。
#[derive(Clone)]
pub struct Credentials {
    pub gemini_api_key: String,
    pub elevenlabs_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| -> Result<String> {
            match lookup(name).map(|v| v.trim().to_string()) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => bail!("missing {name}: set it in the environment before starting"),
            }
        };
        Ok(Self {
            gemini_api_key: read(GEMINI_API_KEY_VAR)?,
            elevenlabs_api_key: read(ELEVENLABS_API_KEY_VAR)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.detection.confirm_frames, 5);
        assert_eq!(config.detection.trigger_cooldown(), Duration::from_secs(5));
        assert_eq!(config.classifier.keypoint_confidence, 0.3);
        assert_eq!(config.pipeline.analysis_retry.max_retries, 3);
        assert_eq!(config.pipeline.analysis_retry.backoff_secs, vec![15.0, 30.0, 45.0]);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.button.pin, 17);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [remote]
            host = "edge.lan"

            [pipeline]
            play = false

            [pipeline.synthesis_retry]
            max_retries = 2
            backoff_secs = [1.0, 2.0]
            attempt_timeout_secs = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.host, "edge.lan");
        assert_eq!(config.remote.user, "pi");
        assert!(!config.pipeline.play);
        assert!(config.pipeline.synthesize);
        assert_eq!(config.pipeline.synthesis_retry.max_retries, 2);
        assert_eq!(config.pipeline.analysis_retry.max_retries, 3);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::new(3, vec![15.0, 30.0, 45.0], 60.0);
        assert_eq!(policy.backoff(0), Duration::from_secs(15));
        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(45));
        // スケジュールを超えたら最後の値
        assert_eq!(policy.backoff(7), Duration::from_secs(45));
        // 4試行 * 60s + 15 + 30 + 45
        assert_eq!(policy.worst_case(), Duration::from_secs(330));
    }

    #[test]
    fn test_empty_backoff_is_zero() {
        let policy = RetryPolicy::new(2, vec![], 1.0);
        assert_eq!(policy.backoff(0), Duration::ZERO);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.detection.confirm_frames, 5);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[detection\nconfirm_frames = ").unwrap();
        assert!(Config::load(&path).is_err());
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn test_bundled_config_matches_defaults() {
        let config: Config = toml::from_str(include_str!("../config.toml")).unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(config.pipeline.analysis_retry, defaults.analysis_retry);
        assert_eq!(config.pipeline.synthesis_retry, defaults.synthesis_retry);
        assert_eq!(config.pipeline.playback_retry, defaults.playback_retry);
        assert_eq!(config.detection.confirm_frames, 5);
        assert_eq!(config.alarm.remote_path, "/tmp/alarm.mp3");
        assert!(config.remote.identity_file.is_none());
    }

    #[test]
    fn test_bad_durations_do_not_panic() {
        let policy = RetryPolicy::new(3, vec![f64::NAN, -3.0, f64::INFINITY], f64::INFINITY);
        assert_eq!(policy.attempt_timeout(), Duration::MAX);
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::MAX);
        assert_eq!(policy.worst_case(), Duration::MAX);

        let detection = DetectionConfig {
            trigger_cooldown_secs: -1.0,
            ..DetectionConfig::default()
        };
        assert_eq!(detection.trigger_cooldown(), Duration::ZERO);
    }

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
        let bundled: Config = toml::from_str(include_str!("../config.toml")).unwrap();
        bundled.validate().unwrap();
    }

    #[test]
    fn test_load_rejects_unusable_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        for (body, field) in [
            ("[detection]\ntrigger_cooldown_secs = inf", "trigger_cooldown_secs"),
            ("[detection]\ntrigger_cooldown_secs = -5.0", "trigger_cooldown_secs"),
            ("[classifier]\nface_distance_ratio = nan", "face_distance_ratio"),
            (
                "[pipeline.analysis_retry]\nmax_retries = 3\nbackoff_secs = [15.0, nan]\nattempt_timeout_secs = 60.0",
                "backoff_secs[1]",
            ),
            (
                "[pipeline.playback_retry]\nmax_retries = 1\nbackoff_secs = [1.0]\nattempt_timeout_secs = 1e300",
                "attempt_timeout_secs",
            ),
        ] {
            fs::write(&path, body).unwrap();
            let err = Config::load(&path).unwrap_err();
            assert!(format!("{err:#}").contains(field), "{body}: {err:#}");
        }
    }

    #[test]
    fn test_credentials_require_both_keys() {
        let mut env = HashMap::new();
        env.insert(GEMINI_API_KEY_VAR, " g-key ".to_string());
        let err = Credentials::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ELEVENLABS_API_KEY_VAR));

        env.insert(ELEVENLABS_API_KEY_VAR, "e-key".to_string());
        let creds = Credentials::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(creds.gemini_api_key, "g-key");
        assert_eq!(creds.elevenlabs_api_key, "e-key");
    }

    #[test]
    fn test_blank_key_is_missing() {
        let err = Credentials::from_lookup(|_| Some("   ".to_string())).unwrap_err();
        assert!(err.to_string().contains(GEMINI_API_KEY_VAR));
    }
}
