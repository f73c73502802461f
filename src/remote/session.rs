use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::Mutex;

use super::transport::{RemoteChannel, RemoteError, RemoteTransport};

/// エッジ端末への永続セッションを1本だけ保持する。
///
/// - 接続は遅延確立、切断を検知したら次の操作で張り直す
/// - 全操作は Mutex で直列化（同一チャネルの並行利用はしない）
/// - 転送レベルの失敗ではセッションを破棄してエラーを返す。リトライは呼び出し側
pub struct RemoteSessionManager {
    transport: Arc<dyn RemoteTransport>,
    session: Mutex<Option<Box<dyn RemoteChannel>>>,
    operation_timeout: Duration,
}

impl RemoteSessionManager {
    pub fn new(transport: Arc<dyn RemoteTransport>, operation_timeout: Duration) -> Self {
        Self {
            transport,
            session: Mutex::new(None),
            operation_timeout,
        }
    }

    /// 未接続・切断済みなら接続する
    pub async fn ensure_connected(&self) -> Result<(), RemoteError> {
        let mut guard = self.session.lock().await;
        Self::connect_if_needed(&self.transport, &mut guard, self.operation_timeout).await
    }

    async fn connect_if_needed(
        transport: &Arc<dyn RemoteTransport>,
        slot: &mut Option<Box<dyn RemoteChannel>>,
        timeout: Duration,
    ) -> Result<(), RemoteError> {
        if let Some(channel) = slot.as_mut() {
            if channel.is_alive() {
                return Ok(());
            }
            warn!("[remote] session to {} is dead, reconnecting", transport.describe());
            channel.close().await;
            *slot = None;
        }

        info!("[remote] connecting to {}", transport.describe());
        let channel = match tokio::time::timeout(timeout, transport.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(RemoteError::Timeout(timeout)),
        };
        *slot = Some(channel);
        info!("[remote] connected (persistent session)");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|c| c.is_alive())
            .unwrap_or(false)
    }

    pub async fn run_command(&self, command: &str) -> Result<String, RemoteError> {
        self.run_command_with_timeout(command, self.operation_timeout).await
    }

    /// 既定の操作タイムアウトより長くかかるコマンド用（音声再生など）
    pub async fn run_command_with_timeout(&self, command: &str, timeout: Duration) -> Result<String, RemoteError> {
        let output = self
            .with_channel(timeout, |channel| {
                let command = command.to_string();
                Box::pin(async move { channel.run(&command).await })
            })
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.with_channel(self.operation_timeout, |channel| {
            let local = local.to_path_buf();
            let remote = remote.to_string();
            Box::pin(async move { channel.upload(&local, &remote).await })
        })
        .await
    }

    pub async fn download_file(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.with_channel(self.operation_timeout, |channel| {
            let local = local.to_path_buf();
            let remote = remote.to_string();
            Box::pin(async move { channel.download(&remote, &local).await })
        })
        .await
    }

    /// セッションを閉じる（次の操作で再接続される）
    pub async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        if let Some(mut channel) = guard.take() {
            channel.close().await;
            info!("[remote] disconnected");
        }
    }

    async fn with_channel<T, F>(&self, timeout: Duration, op: F) -> Result<T, RemoteError>
    where
        F: for<'a> FnOnce(
            &'a mut Box<dyn RemoteChannel>,
        ) -> std::pin::Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>,
    {
        let mut guard = self.session.lock().await;
        Self::connect_if_needed(&self.transport, &mut guard, self.operation_timeout).await?;

        let result = match guard.as_mut() {
            Some(channel) => match tokio::time::timeout(timeout, op(channel)).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout(timeout)),
            },
            None => Err(RemoteError::Transport("no session".to_string())),
        };

        if let Err(err) = &result {
            if err.breaks_session() {
                warn!("[remote] {err}; dropping session");
                if let Some(mut channel) = guard.take() {
                    channel.close().await;
                }
            }
        }
        result
    }
}
