/// On-disk cache of the history store in two encodings
///
/// The binary snapshot (bincode) is compact and fast to load; the JSON one
/// is for inspection and interop. Both encode the same `PackedHistory`.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::data::history::{History, PackedHistory};
use crate::error::{MarketDataError, Result};
use crate::types::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Binary,
    Json,
}

impl Encoding {
    fn other(self) -> Self {
        match self {
            Encoding::Binary => Encoding::Json,
            Encoding::Json => Encoding::Binary,
        }
    }
}

pub struct SnapshotCache {
    dir: PathBuf,
    binary_path: PathBuf,
    json_path: PathBuf,
    // Single writer for both files
    io_lock: Mutex<()>,
}

impl SnapshotCache {
    pub fn new(config: &CacheConfig) -> Self {
        let dir = PathBuf::from(&config.dir);
        SnapshotCache {
            binary_path: dir.join(&config.binary_file),
            json_path: dir.join(&config.json_file),
            dir,
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, encoding: Encoding) -> &Path {
        match encoding {
            Encoding::Binary => &self.binary_path,
            Encoding::Json => &self.json_path,
        }
    }

    /// Load the latest snapshot.
    ///
    /// Returns `Ok(None)` when neither file exists yet. If the preferred
    /// encoding is missing the other one is used.
    pub async fn load(&self, prefer_json: bool) -> Result<Option<History>> {
        let _guard = self.io_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir).await?;

        let preferred = if prefer_json {
            Encoding::Json
        } else {
            Encoding::Binary
        };

        for encoding in [preferred, preferred.other()] {
            let path = self.path(encoding);
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("No snapshot at {}", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if encoding != preferred {
                warn!(
                    "Preferred snapshot missing, falling back to {}",
                    path.display()
                );
            }

            let packed = decode(encoding, &bytes).map_err(|e| {
                MarketDataError::CacheCorrupt(format!("{}: {}", path.display(), e))
            })?;
            let history = packed.unpack()?;

            info!(
                "Loaded snapshot {} ({} tickers, {} rows)",
                path.display(),
                history.tickers().len(),
                history.rows().len()
            );
            return Ok(Some(history));
        }

        info!("No cached snapshot found in {}, starting empty", self.dir.display());
        Ok(None)
    }

    /// Write both encodings, binary first.
    ///
    /// Both writes are attempted; the first failure is returned.
    pub async fn persist(&self, packed: &PackedHistory) -> Result<()> {
        let _guard = self.io_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir).await?;

        let mut first_error = None;
        for encoding in [Encoding::Binary, Encoding::Json] {
            let path = self.path(encoding);
            let written = match encode(encoding, packed) {
                Ok(bytes) => write_atomic(path, &bytes).await,
                Err(e) => Err(e),
            };

            match written {
                Ok(()) => debug!("Wrote snapshot {}", path.display()),
                Err(e) => {
                    warn!("Failed to write snapshot {}: {}", path.display(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    "Persisted snapshot ({} tickers, {} rows)",
                    packed.tickers.len(),
                    packed.rows.len()
                );
                Ok(())
            }
        }
    }
}

fn encode(encoding: Encoding, packed: &PackedHistory) -> Result<Vec<u8>> {
    Ok(match encoding {
        Encoding::Binary => bincode::serialize(packed)?,
        Encoding::Json => serde_json::to_vec(packed)?,
    })
}

fn decode(encoding: Encoding, bytes: &[u8]) -> Result<PackedHistory> {
    Ok(match encoding {
        Encoding::Binary => bincode::deserialize(bytes)?,
        Encoding::Json => serde_json::from_slice(bytes)?,
    })
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}
