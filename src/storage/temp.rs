use crate::types::is_valid_id;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::PathBuf;

/// The two file trees the data-fetching script writes and the file-backed
/// endpoints serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempKind {
    ChartData,
    ChartConfigs,
}

impl TempKind {
    fn dir_name(&self) -> &'static str {
        match self {
            TempKind::ChartData => "chart-data",
            TempKind::ChartConfigs => "chart-configs",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TempError {
    #[error("invalid id: {0:?}")]
    InvalidId(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON files under `temp/chart-data` and `temp/chart-configs`, optionally
/// gzip compressed (`<id>.json.gz`).
#[derive(Debug, Clone)]
pub struct TempStore {
    root: PathBuf,
    gzip: bool,
}

impl TempStore {
    pub fn new(root: PathBuf, gzip: bool) -> Self {
        Self { root, gzip }
    }

    fn paths(&self, kind: TempKind, id: &str) -> Result<(PathBuf, PathBuf), TempError> {
        if !is_valid_id(id) {
            return Err(TempError::InvalidId(id.to_string()));
        }
        let dir = self.root.join(kind.dir_name());
        Ok((
            dir.join(format!("{id}.json.gz")),
            dir.join(format!("{id}.json")),
        ))
    }

    /// Raw JSON bytes for `id`, decompressing when only the `.gz` file exists.
    /// The compressed file wins when both are present.
    pub async fn read(&self, kind: TempKind, id: &str) -> Result<Option<Vec<u8>>, TempError> {
        let (gz_path, plain_path) = self.paths(kind, id)?;

        match tokio::fs::read(&gz_path).await {
            Ok(compressed) => {
                let json = tokio::task::spawn_blocking(move || gunzip(&compressed))
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))??;
                return Ok(Some(json));
            }
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            Err(_) => {}
        }

        match tokio::fs::read(&plain_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `json` for `id`, compressed when the store was configured with gzip.
    /// The other variant is removed so reads never see an outdated copy.
    pub async fn write(&self, kind: TempKind, id: &str, json: &[u8]) -> Result<(), TempError> {
        let (gz_path, plain_path) = self.paths(kind, id)?;
        if let Some(parent) = plain_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (target, other) = if self.gzip {
            let bytes = json.to_vec();
            let compressed = tokio::task::spawn_blocking(move || gzip(&bytes))
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
            tokio::fs::write(&gz_path, compressed).await?;
            (gz_path, plain_path)
        } else {
            tokio::fs::write(&plain_path, json).await?;
            (plain_path, gz_path)
        };

        match tokio::fs::remove_file(&other).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(path = %target.display(), "temp file written");
        Ok(())
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gzip_write_replaces_plain_copy() {
        let dir = tempfile::tempdir().unwrap();
        let plain = TempStore::new(dir.path().to_path_buf(), false);
        let compressed = TempStore::new(dir.path().to_path_buf(), true);

        plain
            .write(TempKind::ChartData, "tps", br#"{"v":1}"#)
            .await
            .unwrap();
        compressed
            .write(TempKind::ChartData, "tps", br#"{"v":2}"#)
            .await
            .unwrap();

        assert!(!dir.path().join("chart-data/tps.json").exists());
        assert!(dir.path().join("chart-data/tps.json.gz").exists());
        let bytes = plain.read(TempKind::ChartData, "tps").await.unwrap().unwrap();
        assert_eq!(bytes, br#"{"v":2}"#);
    }

    #[tokio::test]
    async fn test_read_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path().to_path_buf(), false);
        assert!(store
            .read(TempKind::ChartConfigs, "nope")
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            store.read(TempKind::ChartConfigs, "../x").await,
            Err(TempError::InvalidId(_))
        ));
    }
}
