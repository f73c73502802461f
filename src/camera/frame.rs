use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;

use crate::pose::FrameSize;

/// JPEG エンコード済みの1フレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub jpeg: Bytes,
}

impl Frame {
    pub fn new(jpeg: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            jpeg: jpeg.into(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// JPEG ファイルから読み込む。寸法は呼び出し側が与える。
    pub async fn from_file(path: &Path, width: u32, height: u32) -> Result<Self> {
        let jpeg = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read frame: {}", path.display()))?;
        if !is_jpeg(&jpeg) {
            anyhow::bail!("not a JPEG image: {}", path.display());
        }
        Ok(Self::new(jpeg, width, height))
    }
}

/// SOI/EOI マーカーで挟まれているか
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data.starts_with(&[0xFF, 0xD8]) && data.ends_with(&[0xFF, 0xD9])
}
