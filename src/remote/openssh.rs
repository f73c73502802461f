use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::transport::{shell_quote, CommandOutput, RemoteChannel, RemoteError, RemoteTransport};
use crate::config::RemoteConfig;

/// ssh が接続レベルの失敗で返す終了コード
const SSH_TRANSPORT_EXIT: i32 = 255;

/// OpenSSH の ControlMaster を使った永続接続。
///
/// 接続時に `ssh -M -fN` でマスターを立て、以降のコマンドとファイル転送は
/// 制御ソケット経由で同じ認証済み接続に相乗りする。
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    config: RemoteConfig,
}

impl OpenSshTransport {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn control_path(&self) -> PathBuf {
        self.config.control_dir.join(format!(
            "guardian-ssh-{}-{}-{}.sock",
            self.config.user,
            self.config.host,
            std::process::id()
        ))
    }

    /// `ssh` 起動の共通部分（制御ソケット未指定）
    pub fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.config.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("ServerAliveInterval=5")
            .arg("-o")
            .arg("ServerAliveCountMax=3");
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// 遠隔でコマンドを実行する独立した ssh プロセス（長時間動くリスナー用）
    pub fn spawn_command(&self, command: &str) -> Command {
        let mut cmd = self.base_command();
        cmd.arg(self.destination()).arg("--").arg(command);
        cmd
    }
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    async fn connect(&self) -> Result<Box<dyn RemoteChannel>, RemoteError> {
        let control_path = self.control_path();
        // 前回のプロセスが残したソケット
        if control_path.exists() {
            let _ = tokio::fs::remove_file(&control_path).await;
        }

        let status = self
            .base_command()
            .arg("-M")
            .arg("-S")
            .arg(&control_path)
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-fN")
            .arg(self.destination())
            // -f で残るマスターがパイプを握り続けるので出力は捨てる
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| RemoteError::Connect(format!("failed to launch ssh: {e}")))?;

        if !status.success() {
            return Err(RemoteError::Connect(format!(
                "ssh master to {} exited with {}",
                self.describe(),
                status
            )));
        }
        if !control_path.exists() {
            return Err(RemoteError::Connect("control socket was not created".to_string()));
        }

        debug!("[ssh] control master at {}", control_path.display());
        Ok(Box::new(OpenSshChannel {
            transport: self.clone(),
            control_path,
        }))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.destination(), self.config.port)
    }
}

pub struct OpenSshChannel {
    transport: OpenSshTransport,
    control_path: PathBuf,
}

impl OpenSshChannel {
    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = self.transport.base_command();
        cmd.arg("-S")
            .arg(&self.control_path)
            .arg("-o")
            .arg("ControlMaster=no")
            .arg(self.transport.destination())
            .arg("--")
            .arg(remote_command);
        cmd
    }

    fn check_status(status: std::process::ExitStatus, stderr: &[u8]) -> Result<(), RemoteError> {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        match status.code() {
            Some(0) => Ok(()),
            Some(SSH_TRANSPORT_EXIT) => Err(RemoteError::Transport(stderr)),
            Some(code) => Err(RemoteError::CommandFailed { exit_code: code, stderr }),
            None => Err(RemoteError::Transport(format!("ssh terminated by signal: {stderr}"))),
        }
    }
}

#[async_trait]
impl RemoteChannel for OpenSshChannel {
    fn is_alive(&self) -> bool {
        self.control_path.exists()
    }

    async fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RemoteError::Transport(format!("failed to launch ssh: {e}")))?;
        Self::check_status(output.status, &output.stderr)?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let data = tokio::fs::read(local).await?;
        let mut child = self
            .command(&format!("cat > {}", shell_quote(remote)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RemoteError::Transport(format!("failed to launch ssh: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&data)
                .await
                .map_err(|e| RemoteError::Transport(format!("upload stream: {e}")))?;
            // stdin を閉じて cat を終わらせる
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Self::check_status(output.status, &output.stderr)?;
        debug!("[ssh] uploaded {} -> {} ({} bytes)", local.display(), remote, data.len());
        Ok(())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let output = self
            .command(&format!("cat {}", shell_quote(remote)))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RemoteError::Transport(format!("failed to launch ssh: {e}")))?;
        Self::check_status(output.status, &output.stderr)?;
        tokio::fs::write(local, &output.stdout).await?;
        debug!("[ssh] downloaded {} -> {} ({} bytes)", remote, local.display(), output.stdout.len());
        Ok(())
    }

    async fn close(&mut self) {
        let result = self
            .transport
            .base_command()
            .arg("-S")
            .arg(&self.control_path)
            .arg("-O")
            .arg("exit")
            .arg(self.transport.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(_) => info!("[ssh] control master closed"),
            Err(e) => warn!("[ssh] failed to close control master: {e}"),
        }
        if self.control_path.exists() {
            let _ = tokio::fs::remove_file(&self.control_path).await;
        }
    }
}

impl Drop for OpenSshChannel {
    fn drop(&mut self) {
        // close() を経ずに捨てられた場合でもマスターを止める
        if self.control_path.exists() {
            let _ = std::process::Command::new("ssh")
                .arg("-S")
                .arg(&self.control_path)
                .arg("-O")
                .arg("exit")
                .arg(self.transport.destination())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}
