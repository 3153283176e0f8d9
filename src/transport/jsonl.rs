//! JSONL file transport
//!
//! - `JsonlSource` reads one trade per line from a file or stdin
//! - `JsonlPublisher` appends one aggregate per line, rotating by size
//! - `JsonlDeadLetterSink` appends dead letters to a side file

use super::{AggregatePublisher, DeadLetter, DeadLetterSink, SourceRecord, TradeSource, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Line-oriented source; the line number is the record offset
pub struct JsonlSource {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    next_offset: u64,
    committed: u64,
    label: String,
}

impl JsonlSource {
    /// Open `path`, or stdin when `path` is `-`
    ///
    /// A missing file is reported as `NotFound` so the caller can refuse to start.
    pub async fn open(path: &str) -> Result<Self, TransportError> {
        if path == "-" {
            return Ok(Self::from_reader(BufReader::new(tokio::io::stdin()), "stdin"));
        }

        let file = tokio::fs::File::open(path).await?;
        Ok(Self::from_reader(BufReader::new(file), path))
    }

    pub fn from_reader<R>(reader: R, label: &str) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            next_offset: 0,
            committed: 0,
            label: label.to_string(),
        }
    }

    pub fn committed_offset(&self) -> u64 {
        self.committed
    }
}

#[async_trait]
impl TradeSource for JsonlSource {
    async fn next_record(&mut self) -> Result<Option<SourceRecord>, TransportError> {
        let mut line = String::new();

        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }

            let offset = self.next_offset;
            self.next_offset += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(SourceRecord {
                offset,
                payload: trimmed.as_bytes().to_vec(),
            }));
        }
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        if self.next_offset > self.committed {
            log::debug!("📌 {} committed through line {}", self.label, self.next_offset);
            self.committed = self.next_offset;
        }
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "JSONL"
    }
}

struct RotatingFile {
    file: BufWriter<File>,
    current_size: u64,
    max_size: u64,
    base_path: PathBuf,
    rotation_count: u32,
    max_rotations: u32,
}

impl RotatingFile {
    fn open(path: &Path, max_size_mb: u64, max_rotations: u32) -> Result<Self, TransportError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            file: BufWriter::new(file),
            current_size,
            max_size: max_size_mb.saturating_mul(1024 * 1024),
            base_path: path.to_path_buf(),
            rotation_count: 0,
            max_rotations,
        })
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), TransportError> {
        self.file.write_all(line)?;
        self.file.write_all(b"\n")?;
        self.current_size += line.len() as u64 + 1;

        if self.max_size > 0 && self.current_size >= self.max_size {
            self.rotate()?;
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.file.flush()?;
        Ok(())
    }

    fn rotated_path(&self, index: u32) -> PathBuf {
        self.base_path.with_extension(format!("jsonl.{}", index))
    }

    fn rotate(&mut self) -> Result<(), TransportError> {
        self.file.flush()?;

        if self.max_rotations > 0 {
            let oldest = self.rotated_path(self.max_rotations);
            if oldest.exists() {
                std::fs::remove_file(&oldest)?;
            }

            for i in (1..self.max_rotations).rev() {
                let old_path = self.rotated_path(i);
                if old_path.exists() {
                    std::fs::rename(&old_path, self.rotated_path(i + 1))?;
                }
            }

            if self.base_path.exists() {
                std::fs::rename(&self.base_path, self.rotated_path(1))?;
            }
        } else if self.base_path.exists() {
            std::fs::remove_file(&self.base_path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.base_path)?;

        self.file = BufWriter::new(file);
        self.current_size = 0;
        self.rotation_count += 1;

        log::info!("📄 Rotated {} (rotation #{})", self.base_path.display(), self.rotation_count);

        Ok(())
    }
}

/// Appends aggregates to `<dir>/<topic>.jsonl`
pub struct JsonlPublisher {
    inner: Mutex<RotatingFile>,
}

impl JsonlPublisher {
    pub fn new(path: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, TransportError> {
        let path = path.as_ref();
        log::info!("📝 Publishing aggregates to: {}", path.display());
        Ok(Self {
            inner: Mutex::new(RotatingFile::open(path, max_size_mb, max_rotations)?),
        })
    }
}

#[async_trait]
impl AggregatePublisher for JsonlPublisher {
    async fn publish(&self, _key: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut file = self.inner.lock();
        file.write_line(payload)?;
        // Each aggregate is durable once publish returns
        file.flush()
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.inner.lock().flush()
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

/// Appends dead letters to `<dir>/<topic>-dlq.jsonl`
pub struct JsonlDeadLetterSink {
    inner: Mutex<RotatingFile>,
}

impl JsonlDeadLetterSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        log::info!("📝 Dead letters go to: {}", path.display());
        Ok(Self {
            inner: Mutex::new(RotatingFile::open(path, 0, 0)?),
        })
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterSink {
    async fn report(&self, letter: DeadLetter) -> Result<(), TransportError> {
        let json = serde_json::to_vec(&letter)?;
        let mut file = self.inner.lock();
        file.write_line(&json)?;
        file.flush()
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.inner.lock().flush()
    }
}

impl Drop for JsonlPublisher {
    fn drop(&mut self) {
        let _ = self.inner.lock().flush();
    }
}
