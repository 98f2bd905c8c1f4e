use super::traits::{check_position, EventSource, SourceError};
use crate::config::types::{ReadConfig, ReadStart, SourceConfig};
use crate::window::event::{EventPosition, RawEvent, StreamKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// How often a followed file is checked for new data
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reads one JSON event per line from a file, optionally following it like
/// `tail -F`.
///
/// The event offset is the byte offset of the line in the file. After the
/// file is replaced (inode change) reading restarts from its beginning.
pub struct FileSource {
    stream_key: StreamKey,
    partition: i32,
    path: PathBuf,
    key_field: Option<String>,
    timestamp_field: Option<String>,
    read_config: ReadConfig,

    file: Option<BufReader<File>>,
    file_inode: Option<u64>,
    current_offset: u64,
    committed_offset: Option<i64>,
}

impl FileSource {
    pub fn new(stream_key: StreamKey, partition: i32, config: &SourceConfig) -> Self {
        Self {
            stream_key,
            partition,
            path: config.path.clone(),
            key_field: config.key_field.clone(),
            timestamp_field: config.timestamp_field.clone(),
            read_config: config.read.clone(),
            file: None,
            file_inode: None,
            current_offset: 0,
            committed_offset: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the last acknowledged line
    pub fn committed_offset(&self) -> Option<i64> {
        self.committed_offset
    }

    /// Byte position the next read starts from
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Open the file and seek according to `start`
    fn open(&mut self, start: ReadStart) -> Result<(), SourceError> {
        let file = File::open(&self.path)?;
        let metadata = file.metadata()?;
        self.file_inode = Some(get_inode(&metadata));

        let mut buf_reader = BufReader::new(file);
        self.current_offset = match start {
            ReadStart::Beginning => buf_reader.seek(SeekFrom::Start(0))?,
            ReadStart::End => buf_reader.seek(SeekFrom::End(0))?,
        };
        self.file = Some(buf_reader);

        debug!(
            stream_key = %self.stream_key,
            path = %self.path.display(),
            offset = self.current_offset,
            "Opened source file"
        );
        Ok(())
    }

    /// Check if the file has been replaced (inode changed)
    fn check_file_rotation(&self) -> Result<bool, SourceError> {
        let Some(original_inode) = self.file_inode else {
            return Ok(false);
        };
        match std::fs::metadata(&self.path) {
            Ok(metadata) => Ok(get_inode(&metadata) != original_inode),
            // Not recreated yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the next complete line as raw bytes, or `None` at EOF.
    ///
    /// Lines are not required to be valid UTF-8; the offset always advances
    /// by the bytes consumed.
    fn read_line(&mut self) -> Result<Option<(u64, Vec<u8>)>, SourceError> {
        if self.file.is_none() {
            self.open(self.read_config.start)?;
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut line = Vec::new();
        let bytes_read = file.read_until(b'\n', &mut line)?;
        if bytes_read == 0 {
            return Ok(None);
        }

        let line_start = self.current_offset;
        if self.read_config.follow && line.last() != Some(&b'\n') {
            // Writer is mid-line; rewind and wait for the rest
            file.seek(SeekFrom::Start(line_start))?;
            return Ok(None);
        }

        self.current_offset += bytes_read as u64;
        Ok(Some((line_start, line)))
    }

    fn build_event(&self, offset: u64, line: &[u8]) -> RawEvent {
        let read_time = Utc::now();
        let mut key = Vec::new();
        let mut timestamp = read_time;

        if self.key_field.is_some() || self.timestamp_field.is_some() {
            if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(line) {
                if let Some(value) = self.key_field.as_ref().and_then(|f| fields.get(f)) {
                    key = match value {
                        Value::String(s) => s.as_bytes().to_vec(),
                        other => other.to_string().into_bytes(),
                    };
                }

                if let Some(value) = self.timestamp_field.as_ref().and_then(|f| fields.get(f)) {
                    match value.as_str().map(DateTime::parse_from_rfc3339) {
                        Some(Ok(ts)) => timestamp = ts.with_timezone(&Utc),
                        _ => warn!(
                            stream_key = %self.stream_key,
                            offset = offset,
                            value = %value,
                            "Event timestamp is not RFC 3339, using read time"
                        ),
                    }
                }
            }
        }

        RawEvent {
            stream_key: self.stream_key.clone(),
            partition: self.partition,
            offset: offset as i64,
            key,
            value: line.to_vec(),
            timestamp,
        }
    }
}

#[async_trait]
impl EventSource for FileSource {
    fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn pull(&mut self) -> Result<Option<RawEvent>, SourceError> {
        loop {
            match self.read_line()? {
                Some((offset, line)) => {
                    let line = trim_line_ending(&line);
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    if std::str::from_utf8(line).is_err() {
                        debug!(
                            stream_key = %self.stream_key,
                            offset = offset,
                            "Line is not valid UTF-8, keeping raw bytes"
                        );
                    }
                    return Ok(Some(self.build_event(offset, line)));
                }
                None if !self.read_config.follow => return Ok(None),
                None => {
                    if self.check_file_rotation()? {
                        info!(
                            stream_key = %self.stream_key,
                            path = %self.path.display(),
                            "Source file rotated, reopening from the beginning"
                        );
                        self.file = None;
                        self.open(ReadStart::Beginning)?;
                        continue;
                    }
                    sleep(FOLLOW_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn acknowledge(&mut self, position: &EventPosition) -> Result<(), SourceError> {
        check_position(&self.stream_key, position)?;
        self.committed_offset = Some(position.offset);
        debug!(stream_key = %self.stream_key, offset = position.offset, "Committed offset");
        Ok(())
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(metadata: &Metadata) -> u64 {
    // Creation time stands in for an inode where there is none
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if let Ok(created) = metadata.created() {
        created.hash(&mut hasher);
    }
    hasher.finish()
}
