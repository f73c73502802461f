use std::fmt;
use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

use super::debounce::{DebounceGate, GateSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionState {
    Monitoring,
    Alarm,
    Pipeline,
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectionState::Monitoring => "MONITORING",
            DetectionState::Alarm => "ALARM",
            DetectionState::Pipeline => "PIPELINE",
        })
    }
}

/// 遷移に伴って外側で実行する副作用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartAlarm,
    StopAlarm,
    StartPipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DetectionState,
    pub to: DetectionState,
}

impl Transition {
    pub fn commands(&self) -> &'static [Command] {
        use DetectionState::*;
        match (self.from, self.to) {
            (Monitoring, Alarm) => &[Command::StartAlarm],
            (Alarm, Monitoring) => &[Command::StopAlarm],
            (Alarm, Pipeline) => &[Command::StopAlarm, Command::StartPipeline],
            _ => &[],
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// トリガーを受け付けなかった理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRejection {
    NotInAlarm(DetectionState),
    Cooldown { remaining: Duration },
}

/// MONITORING / ALARM / PIPELINE の唯一の状態
///
/// 遷移の read-modify-write は呼び出し側のロック内で行う。
/// 副作用（アラーム・パイプライン）は返した Transition を見て外側で実行する。
#[derive(Debug)]
pub struct DetectionStateMachine {
    state: DetectionState,
    gate: DebounceGate,
    cooldown: Duration,
    last_trigger: Option<Instant>,
}

impl DetectionStateMachine {
    pub fn new(confirm_frames: u32, cooldown: Duration) -> Self {
        Self {
            state: DetectionState::Monitoring,
            gate: DebounceGate::new(confirm_frames),
            cooldown,
            last_trigger: None,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn gate(&self) -> &DebounceGate {
        &self.gate
    }

    fn transition(&mut self, to: DetectionState) -> Transition {
        let t = Transition { from: self.state, to };
        self.state = to;
        info!("[state] {t}");
        t
    }

    /// フレームごとの判定を入れる。PIPELINE 中は無視。
    pub fn observe(&mut self, is_distress: bool) -> Option<Transition> {
        match self.state {
            DetectionState::Pipeline => None,
            DetectionState::Monitoring => match self.gate.observe(is_distress) {
                GateSignal::Confirmed => Some(self.transition(DetectionState::Alarm)),
                _ => None,
            },
            DetectionState::Alarm => match self.gate.observe(is_distress) {
                GateSignal::Cleared => Some(self.transition(DetectionState::Monitoring)),
                _ => None,
            },
        }
    }

    /// 外部トリガー。ALARM 中かつクールダウン経過後のみ受け付ける。
    pub fn on_trigger(&mut self, at: Instant) -> Result<Transition, TriggerRejection> {
        if self.state != DetectionState::Alarm {
            debug!("[state] trigger ignored in {}", self.state);
            return Err(TriggerRejection::NotInAlarm(self.state));
        }
        if let Some(last) = self.last_trigger {
            let elapsed = at.saturating_duration_since(last);
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                debug!("[state] trigger ignored, cooldown {:.1}s", remaining.as_secs_f32());
                return Err(TriggerRejection::Cooldown { remaining });
            }
        }
        self.last_trigger = Some(at);
        Ok(self.transition(DetectionState::Pipeline))
    }

    /// パイプライン完了（成否を問わず MONITORING に戻る）
    pub fn on_pipeline_finished(&mut self) -> Option<Transition> {
        if self.state != DetectionState::Pipeline {
            return None;
        }
        self.gate.reset();
        Some(self.transition(DetectionState::Monitoring))
    }
}
