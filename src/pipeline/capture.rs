use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

/// パイプライン1回分の成果物（画像・文章・音声）を置くディレクトリ
///
/// ファイル名はタイムスタンプ: `<YYYYmmdd_HHMMSS>.{jpg,txt,mp3}`
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stem_for(at: DateTime<Local>) -> String {
        at.format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn path(&self, stem: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{extension}"))
    }

    async fn write(&self, stem: &str, extension: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path(stem, extension);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub async fn write_frame(&self, stem: &str, jpeg: &[u8]) -> Result<PathBuf> {
        self.write(stem, "jpg", jpeg).await
    }

    pub async fn write_text(&self, stem: &str, text: &str) -> Result<PathBuf> {
        self.write(stem, "txt", text.as_bytes()).await
    }

    pub async fn write_audio(&self, stem: &str, mp3: &[u8]) -> Result<PathBuf> {
        self.write(stem, "mp3", mp3).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stem_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(CaptureStore::stem_for(at), "20240309_070501");
    }

    #[tokio::test]
    async fn test_writes_artifacts_into_new_dir() {
        let root = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(root.path().join("captures"));

        let jpg = store.write_frame("20240309_070501", b"jpeg").await.unwrap();
        let txt = store.write_text("20240309_070501", "Stay calm.").await.unwrap();

        assert_eq!(jpg, root.path().join("captures/20240309_070501.jpg"));
        assert_eq!(std::fs::read_to_string(txt).unwrap(), "Stay calm.");
    }
}
