use std::process::Stdio;

use anyhow::{Context, Result};
use futures::StreamExt;
use log::info;
use tokio::process::{Child, ChildStdout};
use tokio_util::codec::FramedRead;

use super::frame::Frame;
use super::mjpeg::MjpegDecoder;
use crate::config::CameraConfig;
use crate::remote::OpenSshTransport;

/// エッジ端末のカメラを ssh 越しに MJPEG で受け取る
pub struct CameraStream {
    child: Child,
    frames: FramedRead<ChildStdout, MjpegDecoder>,
    width: u32,
    height: u32,
}

pub fn capture_command(config: &CameraConfig) -> String {
    format!(
        "rpicam-vid -t 0 --width {} --height {} --framerate {} --codec mjpeg --inline -n -o -",
        config.width, config.height, config.fps
    )
}

impl CameraStream {
    pub fn spawn(transport: &OpenSshTransport, config: &CameraConfig) -> Result<Self> {
        let mut child = transport
            .spawn_command(&capture_command(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to launch camera stream")?;
        let stdout = child.stdout.take().context("camera stdout unavailable")?;

        info!(
            "[camera] streaming via ssh ({}x{} @ {}fps)",
            config.width, config.height, config.fps
        );
        Ok(Self {
            child,
            frames: FramedRead::new(stdout, MjpegDecoder::new()),
            width: config.width,
            height: config.height,
        })
    }

    /// 次のフレーム。ストリーム終了で None
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.frames.next().await {
            Some(Ok(jpeg)) => Ok(Some(Frame::new(jpeg, self.width, self.height))),
            Some(Err(e)) => Err(e).context("camera stream read failed"),
            None => Ok(None),
        }
    }

    pub async fn stop(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        info!("[camera] stream stopped");
    }
}
