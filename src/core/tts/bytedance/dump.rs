//! Per-request PCM dumps for debugging synthesized audio.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info};

/// Location of the dump for `request_id` inside `dump_dir`.
pub fn dump_file_path(dump_dir: impl AsRef<Path>, request_id: &str) -> PathBuf {
    dump_dir
        .as_ref()
        .join(format!("bytedance_dump_{}.pcm", request_id))
}

/// Appends raw PCM to a file, opening it on first write.
pub struct PcmDumper {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl PcmDumper {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            bytes_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(data).await?;
            self.bytes_written += data.len() as u64;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }
}

/// Dumpers keyed by request id. Only the newest request keeps a writer.
pub struct DumpRegistry {
    dump_dir: PathBuf,
    dumpers: HashMap<String, PcmDumper>,
}

impl DumpRegistry {
    pub fn new(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            dumpers: HashMap::new(),
        }
    }

    /// Flush and drop the writers of older requests, then register `request_id`.
    pub async fn begin(&mut self, request_id: &str) {
        let stale: Vec<String> = self
            .dumpers
            .keys()
            .filter(|id| id.as_str() != request_id)
            .cloned()
            .collect();
        for id in stale {
            if let Some(mut dumper) = self.dumpers.remove(&id) {
                match dumper.flush().await {
                    Ok(()) => debug!("Closed PCM dump for request {}", id),
                    Err(e) => error!("Failed to flush PCM dump for request {}: {}", id, e),
                }
            }
        }

        if !self.dumpers.contains_key(request_id) {
            let path = dump_file_path(&self.dump_dir, request_id);
            info!("Dumping audio of request {} to {:?}", request_id, path);
            self.dumpers
                .insert(request_id.to_string(), PcmDumper::new(path));
        }
    }

    pub async fn write(&mut self, request_id: &str, data: &[u8]) {
        if let Some(dumper) = self.dumpers.get_mut(request_id)
            && let Err(e) = dumper.write(data).await
        {
            error!("Failed to write PCM dump {:?}: {}", dumper.path(), e);
        }
    }

    pub async fn flush_all(&mut self) {
        for (id, dumper) in self.dumpers.iter_mut() {
            if let Err(e) = dumper.flush().await {
                error!("Failed to flush PCM dump for request {}: {}", id, e);
            }
        }
    }

    pub fn active_requests(&self) -> Vec<String> {
        self.dumpers.keys().cloned().collect()
    }
}
