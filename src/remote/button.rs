use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::openssh::OpenSshTransport;
use super::session::RemoteSessionManager;
use super::transport::{pkill_pattern, shell_quote};
use crate::config::ButtonConfig;
use crate::monitor::TriggerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Ready,
    Pressed,
}

/// リスナースクリプトの出力1行を解釈する
pub fn parse_line(line: &str) -> Option<ButtonEvent> {
    let line = line.trim();
    if line == "READY" {
        Some(ButtonEvent::Ready)
    } else if line.contains("PRESSED") {
        Some(ButtonEvent::Pressed)
    } else {
        None
    }
}

/// エッジ端末で動かす GPIO 監視スクリプト（プルアップ、50ms チャタリング除去）
pub fn listener_script(pin: u32) -> String {
    format!(
        "import time\n\
         from gpiozero import Button\n\
         b = Button({pin}, pull_up=True, bounce_time=0.05)\n\
         print('READY', flush=True)\n\
         while True:\n    \
         b.wait_for_press()\n    \
         print('PRESSED', flush=True)\n    \
         time.sleep(0.3)\n"
    )
}

/// 物理ボタン → trigger()
///
/// スクリプトの配置と古いリスナーの掃除は共有セッションで行い、
/// 押下待ちの長時間ストリームだけ専用の ssh プロセスで読む。
pub struct ButtonListener {
    config: ButtonConfig,
    remote: Arc<RemoteSessionManager>,
    transport: OpenSshTransport,
    trigger: TriggerHandle,
}

impl ButtonListener {
    pub fn new(
        config: ButtonConfig,
        remote: Arc<RemoteSessionManager>,
        transport: OpenSshTransport,
        trigger: TriggerHandle,
    ) -> Self {
        Self { config, remote, transport, trigger }
    }

    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("[button] listening on GPIO {}", self.config.pin);
        let delay = Duration::from_secs(self.config.reconnect_delay_secs);
        while !cancel.is_cancelled() {
            match self.listen_once(&cancel).await {
                Ok(()) if cancel.is_cancelled() => break,
                Ok(()) => warn!("[button] listener exited, restarting in {}s", delay.as_secs()),
                Err(e) => warn!("[button] {e:#}, retrying in {}s", delay.as_secs()),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("[button] stopped");
    }

    async fn listen_once(&self, cancel: &CancellationToken) -> Result<()> {
        let script_name = self
            .config
            .script_path
            .rsplit('/')
            .next()
            .unwrap_or(self.config.script_path.as_str());

        // GPIO を掴んだままの古いリスナーを止める
        self.remote
            .run_command(&format!(
                "pkill -f {} 2>/dev/null; sleep 0.5; true",
                shell_quote(&pkill_pattern(script_name))
            ))
            .await
            .context("cleanup of old listeners failed")?;

        self.remote
            .run_command(&format!(
                "cat > {} <<'GUARDIAN_EOF'\n{}GUARDIAN_EOF",
                shell_quote(&self.config.script_path),
                listener_script(self.config.pin)
            ))
            .await
            .context("failed to install listener script")?;

        let mut child = self
            .transport
            .spawn_command(&format!("python3 -u {}", shell_quote(&self.config.script_path)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to launch button listener")?;

        let stdout = child.stdout.take().context("listener stdout unavailable")?;
        let pressed = pump_events(BufReader::new(stdout), &self.trigger, cancel).await?;
        debug!("[button] session ended after {pressed} presses");

        // kill_on_drop で片付くが、終了コードは拾っておく
        let _ = child.start_kill();
        let _ = child.wait().await;
        Ok(())
    }
}

/// 行ストリームを読み、PRESSED ごとに trigger() する。押下回数を返す。
pub async fn pump_events<R>(reader: R, trigger: &TriggerHandle, cancel: &CancellationToken) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut pressed = 0;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(pressed),
            line = lines.next_line() => line.context("listener stream failed")?,
        };
        let Some(line) = line else {
            return Ok(pressed);
        };
        match parse_line(&line) {
            Some(ButtonEvent::Ready) => info!("[button] ready"),
            Some(ButtonEvent::Pressed) => {
                pressed += 1;
                info!("[button] pressed");
                trigger.trigger();
            }
            None => debug!("[button] {}", line.trim()),
        }
    }
}
