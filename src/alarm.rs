use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::AlarmConfig;
use crate::remote::transport::{pkill_pattern, shell_quote};
use crate::remote::{RemoteError, RemoteSessionManager};

/// ループ再生中のアラーム（ALARM 状態の間だけ存在する）
#[derive(Debug)]
pub struct AlarmSession {
    started_at: Instant,
}

impl AlarmSession {
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

/// 端末上で再生するアラーム音の制御。
///
/// 事前に用意した音源をループ再生するだけで、外部 API には一切依存しない。
/// 失敗はログに残して握りつぶす（呼び出し側の状態遷移を止めない）。
pub struct AlarmController {
    config: AlarmConfig,
    remote: Arc<RemoteSessionManager>,
    state: Mutex<AlarmState>,
}

#[derive(Debug, Default)]
struct AlarmState {
    session: Option<AlarmSession>,
    /// 開始コマンドの応答が失われた。端末で鳴っているかもしれない
    unconfirmed: bool,
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// バックグラウンドでアラームをループ再生するコマンド
pub fn start_command(config: &AlarmConfig) -> String {
    let looped = format!(
        "while true; do {} {} >/dev/null 2>&1; done",
        config.player,
        shell_quote(&config.remote_path)
    );
    format!("nohup sh -c {} >/dev/null 2>&1 &", shell_quote(&looped))
}

/// ループとプレイヤーの両方を止める
///
/// ループが次のプレイヤーを起動する隙間があるので2回撃つ。
pub fn kill_command(config: &AlarmConfig) -> String {
    let pattern = shell_quote(&pkill_pattern(file_name(&config.remote_path)));
    format!("pkill -9 -f {pattern} 2>/dev/null; sleep 0.1; pkill -9 -f {pattern} 2>/dev/null")
}

/// 停止コマンド（対象が無くても成功扱い）
pub fn stop_command(config: &AlarmConfig) -> String {
    format!("{}; exit 0", kill_command(config))
}

impl AlarmController {
    pub fn new(config: AlarmConfig, remote: Arc<RemoteSessionManager>) -> Self {
        Self {
            config,
            remote,
            state: Mutex::new(AlarmState::default()),
        }
    }

    /// アラーム音源を端末に置く（起動時に1回）
    pub async fn prepare(&self) -> Result<(), RemoteError> {
        let local = Path::new(&self.config.local_path);
        if !local.exists() {
            warn!("[alarm] {} not found, alarm will be silent", local.display());
            return Ok(());
        }
        self.remote.upload_file(local, &self.config.remote_path).await?;
        info!("[alarm] uploaded alarm sound -> {}", self.config.remote_path);
        Ok(())
    }

    /// 再生開始。再生中なら何もしない
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.session.is_some() {
            debug!("[alarm] already looping");
            return;
        }
        // 前回の開始が届いていた場合に二重ループにならないよう先に止める
        let command = if state.unconfirmed {
            format!("{}; {}", kill_command(&self.config), start_command(&self.config))
        } else {
            start_command(&self.config)
        };
        match self.remote.run_command(&command).await {
            Ok(_) => {
                state.session = Some(AlarmSession {
                    started_at: Instant::now(),
                });
                state.unconfirmed = false;
                info!("[alarm] ALARM STARTED (looping on device)");
            }
            Err(RemoteError::Connect(e)) => warn!("[alarm] failed to start: cannot connect: {e}"),
            Err(e) => {
                state.unconfirmed = true;
                warn!("[alarm] failed to start, device state unknown: {e}");
            }
        }
    }

    /// 停止。止まっていれば何もしない
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let active = state.session.take();
        if active.is_none() && !state.unconfirmed {
            return;
        }
        match self.remote.run_command(&stop_command(&self.config)).await {
            Ok(_) => state.unconfirmed = false,
            Err(e) => warn!("[alarm] failed to stop cleanly: {e}"),
        }
        match active {
            Some(active) => info!("[alarm] ALARM STOPPED after {:.1}s", active.started_at.elapsed().as_secs_f32()),
            None => info!("[alarm] ALARM STOPPED (start was unconfirmed)"),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.session.is_some()
    }
}
