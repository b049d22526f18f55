//! Tail readers for log files and long-running log commands.
//!
//! A [`TailReader`] yields lines appended after its attach point: the end of
//! the file at open time, or everything a command prints from the moment it
//! is spawned. Missing files are waited for, truncation and rotation are
//! followed, and exited commands are respawned. Readers never fail; the only
//! way a reader ends is through its cancellation token.
//!
//! A command's stdout and stderr are both tailed, since container runtimes
//! pass the container's stderr through on their own stderr. Lines longer
//! than [`MAX_LINE_BYTES`] are dropped and counted as parse failures.

use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, File};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::event::LogSource;
use crate::stats::{Counter, PipelineStats};

/// Longest line kept, without its terminator.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Where a log stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// An append-only file on disk
    File(PathBuf),

    /// Standard output of a long-running command
    Command { program: String, args: Vec<String> },
}

impl SourceSpec {
    /// Split a command line on whitespace. No shell quoting is applied.
    pub fn command_from_str(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(SourceSpec::Command {
            program,
            args: parts.collect(),
        })
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::File(path) => write!(f, "{}", path.display()),
            SourceSpec::Command { program, args } => {
                write!(f, "`{}", program)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                write!(f, "`")
            }
        }
    }
}

/// Timing of a tail reader.
#[derive(Debug, Clone, Copy)]
pub struct TailSettings {
    /// Suspension when no new line is available
    pub poll_interval: Duration,

    /// Retry interval while the source is missing or its command is down
    pub wait_interval: Duration,
}

impl TailSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            wait_interval: config.file_wait_interval,
        }
    }
}

impl Default for TailSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct TailReader {
    source: LogSource,
    settings: TailSettings,
    cancel: CancellationToken,
    input: Input,
    line: LineBuffer,
}

enum Input {
    File(FileInput),
    Command(CommandInput),
}

impl TailReader {
    /// Attach to a source.
    ///
    /// Files are attached at their current end; a file that does not exist
    /// yet is read from its beginning once it appears. Commands are spawned
    /// here, so nothing they print after `open` returns is missed.
    pub async fn open(
        source: LogSource,
        spec: SourceSpec,
        settings: TailSettings,
        cancel: CancellationToken,
    ) -> Self {
        let input = match spec {
            SourceSpec::File(path) => Input::File(FileInput::attach(source, path).await),
            SourceSpec::Command { program, args } => Input::Command(CommandInput::attach(source, program, args)),
        };

        Self {
            source,
            settings,
            cancel,
            input,
            line: LineBuffer::new(source),
        }
    }

    /// Count dropped oversized lines in `stats`.
    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        if let Input::Command(input) = &mut self.input {
            input.stderr_line.stats = Some(stats.clone());
        }
        self.line.stats = Some(stats);
        self
    }

    pub fn source(&self) -> LogSource {
        self.source
    }

    /// Wait for the next line.
    ///
    /// Returns `None` only once the reader has been cancelled; any file
    /// handle or child process is released before that.
    pub async fn next_line(&mut self) -> Option<String> {
        let line = match &mut self.input {
            Input::File(input) => input.next_line(&self.settings, &self.cancel, &mut self.line).await,
            Input::Command(input) => input.next_line(&self.settings, &self.cancel, &mut self.line).await,
        };
        if line.is_none() {
            self.release().await;
        }
        line
    }

    async fn release(&mut self) {
        match &mut self.input {
            Input::File(input) => input.reader = None,
            Input::Command(input) => input.release().await,
        }
        self.line.clear();
        debug!(source = %self.source, "Tail reader released");
    }
}

/// Sleep for `period` unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(period) => true,
    }
}

/// Bytes of the line currently being assembled.
struct LineBuffer {
    source: LogSource,
    bytes: Vec<u8>,

    /// Discarding the rest of an oversized line
    oversized: bool,

    stats: Option<Arc<PipelineStats>>,
}

impl LineBuffer {
    fn new(source: LogSource) -> Self {
        Self {
            source,
            bytes: Vec::with_capacity(512),
            oversized: false,
            stats: None,
        }
    }

    /// Read up to the next newline, never buffering more than one byte past
    /// the limit. Partial reads stay buffered if the future is dropped.
    async fn read_from<R>(&mut self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let room = (MAX_LINE_BYTES + 1).saturating_sub(self.bytes.len()).max(1) as u64;
        AsyncReadExt::take(reader, room)
            .read_until(b'\n', &mut self.bytes)
            .await
    }

    /// Yield the buffered line once its newline has arrived.
    fn complete(&mut self) -> Option<String> {
        let ended = self.bytes.last() == Some(&b'\n');
        let content_len = self.bytes.len() - usize::from(ended);

        if self.oversized || content_len > MAX_LINE_BYTES {
            self.bytes.clear();
            if ended {
                self.oversized = false;
                warn!(source = %self.source, limit = MAX_LINE_BYTES, "Dropping oversized log line");
                if let Some(stats) = &self.stats {
                    stats.incr(Counter::ParseFailures);
                }
            } else {
                self.oversized = true;
            }
            return None;
        }

        if ended {
            take_line(&mut self.bytes)
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.oversized = false;
    }
}

/// Decode a complete line and reset the buffer. Blank lines yield `None`.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let text = String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    buf.clear();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

type FileIdentity = (u64, u64);

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<FileIdentity> {
    None
}

struct FileInput {
    source: LogSource,
    path: PathBuf,
    reader: Option<BufReader<File>>,
    offset: u64,
    identity: Option<FileIdentity>,
}

impl FileInput {
    async fn attach(source: LogSource, path: PathBuf) -> Self {
        let mut input = Self {
            source,
            path,
            reader: None,
            offset: 0,
            identity: None,
        };

        match input.open_at(SeekFrom::End(0)).await {
            Ok(()) => info!(
                source = %source,
                path = %input.path.display(),
                offset = input.offset,
                "Tailing log file from end"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => info!(
                source = %source,
                path = %input.path.display(),
                "Log file does not exist yet, waiting for it"
            ),
            Err(e) => warn!(
                source = %source,
                path = %input.path.display(),
                error = %e,
                "Failed to open log file, will retry"
            ),
        }
        input
    }

    async fn open_at(&mut self, at: SeekFrom) -> io::Result<()> {
        let mut file = File::open(&self.path).await?;
        let meta = file.metadata().await?;
        self.offset = file.seek(at).await?;
        self.identity = file_identity(&meta);
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    /// Open the path again after the reader was dropped.
    ///
    /// The file last read resumes at the saved offset (or its end, if it
    /// shrank meanwhile); any other file is read from its start.
    async fn reopen(&mut self, line: &mut LineBuffer) -> io::Result<()> {
        let mut file = File::open(&self.path).await?;
        let meta = file.metadata().await?;
        let identity = file_identity(&meta);
        let same_file = identity.is_some() && identity == self.identity;
        let truncated = same_file && meta.len() < self.offset;

        let at = if !same_file {
            SeekFrom::Start(0)
        } else if truncated {
            SeekFrom::End(0)
        } else {
            SeekFrom::Start(self.offset)
        };
        self.offset = file.seek(at).await?;
        self.identity = identity;
        self.reader = Some(BufReader::new(file));

        if same_file && !truncated {
            info!(source = %self.source, path = %self.path.display(), offset = self.offset, "Log file is back, resuming");
        } else {
            line.clear();
            info!(source = %self.source, path = %self.path.display(), offset = self.offset, "Log file appeared, tailing from there");
        }
        Ok(())
    }

    async fn next_line(
        &mut self,
        settings: &TailSettings,
        cancel: &CancellationToken,
        line: &mut LineBuffer,
    ) -> Option<String> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let Some(reader) = self.reader.as_mut() else {
                if self.reopen(line).await.is_err() && !pause(cancel, settings.wait_interval).await {
                    return None;
                }
                continue;
            };

            match line.read_from(reader).await {
                Ok(0) => {
                    if !self.follow_rotation(line).await && !pause(cancel, settings.poll_interval).await {
                        return None;
                    }
                }
                Ok(read) => {
                    self.offset += read as u64;
                    if let Some(text) = line.complete() {
                        return Some(text);
                    }
                }
                Err(e) => {
                    warn!(source = %self.source, path = %self.path.display(), error = %e, "Read failed, reopening log file");
                    self.reader = None;
                    if !pause(cancel, settings.wait_interval).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Check the path at end of file. Returns true when the reader moved.
    async fn follow_rotation(&mut self, line: &mut LineBuffer) -> bool {
        let meta = match fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(_) => {
                info!(source = %self.source, path = %self.path.display(), "Log file disappeared, waiting for it");
                self.reader = None;
                return false;
            }
        };

        let identity = file_identity(&meta);
        if identity.is_some() && identity != self.identity {
            info!(source = %self.source, path = %self.path.display(), "Log file rotated, reopening at end");
            line.clear();
            if let Err(e) = self.open_at(SeekFrom::End(0)).await {
                warn!(source = %self.source, error = %e, "Failed to reopen rotated log file");
                self.reader = None;
            }
            return true;
        }

        if meta.len() < self.offset {
            info!(
                source = %self.source,
                path = %self.path.display(),
                previous_offset = self.offset,
                current_size = meta.len(),
                "Log file truncated, seeking to new end"
            );
            line.clear();
            if let Some(reader) = self.reader.as_mut() {
                match reader.seek(SeekFrom::End(0)).await {
                    Ok(position) => self.offset = position,
                    Err(e) => {
                        warn!(source = %self.source, error = %e, "Failed to seek truncated log file");
                        self.reader = None;
                    }
                }
            }
            return true;
        }

        false
    }
}

struct CommandInput {
    source: LogSource,
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<BufReader<ChildStderr>>,
    stderr_line: LineBuffer,
}

impl CommandInput {
    fn attach(source: LogSource, program: String, args: Vec<String>) -> Self {
        let mut input = Self {
            source,
            program,
            args,
            child: None,
            stdout: None,
            stderr: None,
            stderr_line: LineBuffer::new(source),
        };
        if let Err(e) = input.spawn() {
            warn!(source = %source, program = %input.program, error = %e, "Failed to spawn log command, will retry");
        }
        input
    }

    fn spawn(&mut self) -> io::Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout was not captured"))?;

        info!(source = %self.source, program = %self.program, pid = ?child.id(), "Tailing log command output");
        self.stdout = Some(BufReader::new(stdout));
        self.stderr = child.stderr.take().map(BufReader::new);
        self.stderr_line.clear();
        self.child = Some(child);
        Ok(())
    }

    async fn next_line(
        &mut self,
        settings: &TailSettings,
        cancel: &CancellationToken,
        line: &mut LineBuffer,
    ) -> Option<String> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let Some(stdout) = self.stdout.as_mut() else {
                if let Err(e) = self.spawn() {
                    warn!(source = %self.source, program = %self.program, error = %e, "Failed to spawn log command");
                    if !pause(cancel, settings.wait_interval).await {
                        return None;
                    }
                }
                continue;
            };

            // A command can stay silent indefinitely, so the read races the token
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = line.read_from(stdout) => Stream::Stdout(result),
                result = read_stderr(self.stderr.as_mut(), &mut self.stderr_line) => Stream::Stderr(result),
            };

            let read = match read {
                Stream::Stdout(read) => read,
                Stream::Stderr(Ok(0)) => {
                    self.stderr = None;
                    continue;
                }
                Stream::Stderr(Ok(_)) => {
                    if let Some(text) = self.stderr_line.complete() {
                        return Some(text);
                    }
                    continue;
                }
                Stream::Stderr(Err(e)) => {
                    debug!(source = %self.source, error = %e, "Failed to read log command stderr");
                    self.stderr = None;
                    continue;
                }
            };

            match read {
                Ok(0) => {
                    self.reap().await;
                    line.clear();
                    if !pause(cancel, settings.wait_interval).await {
                        return None;
                    }
                }
                Ok(_) => {
                    if let Some(text) = line.complete() {
                        return Some(text);
                    }
                }
                Err(e) => {
                    warn!(source = %self.source, error = %e, "Failed to read log command output");
                    self.release().await;
                    line.clear();
                    if !pause(cancel, settings.wait_interval).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Collect the exit status of a command whose output has ended.
    async fn reap(&mut self) {
        self.stdout = None;
        self.stderr = None;
        self.stderr_line.clear();
        if let Some(mut child) = self.child.take() {
            match child.wait().await {
                Ok(status) => warn!(source = %self.source, program = %self.program, status = %status, "Log command exited, respawning"),
                Err(e) => warn!(source = %self.source, program = %self.program, error = %e, "Log command ended, respawning"),
            }
        }
    }

    async fn release(&mut self) {
        self.stdout = None;
        self.stderr = None;
        self.stderr_line.clear();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(source = %self.source, error = %e, "Log command already gone");
            }
            let _ = child.wait().await;
        }
    }
}

enum Stream {
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
}

/// Read stderr if the command still has it open; otherwise never resolve.
async fn read_stderr(stderr: Option<&mut BufReader<ChildStderr>>, line: &mut LineBuffer) -> io::Result<usize> {
    match stderr {
        Some(stderr) => line.read_from(stderr).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::time::timeout;

    const LINE_TIMEOUT: Duration = Duration::from_secs(5);

    fn fast() -> TailSettings {
        TailSettings {
            poll_interval: Duration::from_millis(20),
            wait_interval: Duration::from_millis(50),
        }
    }

    fn append(path: &std::path::Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    async fn open_file(path: &std::path::Path, cancel: CancellationToken) -> TailReader {
        TailReader::open(LogSource::Proxy, SourceSpec::File(path.to_path_buf()), fast(), cancel).await
    }

    #[test]
    fn test_command_from_str() {
        let spec = SourceSpec::command_from_str("docker logs -f --tail 0 xray").unwrap();
        assert_eq!(
            spec,
            SourceSpec::Command {
                program: "docker".to_string(),
                args: vec!["logs", "-f", "--tail", "0", "xray"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }
        );
        assert_eq!(spec.to_string(), "`docker logs -f --tail 0 xray`");
        assert!(SourceSpec::command_from_str("   ").is_none());
    }

    #[test]
    fn test_take_line_strips_terminators() {
        let mut buf = b"hello world\r\n".to_vec();
        assert_eq!(take_line(&mut buf).as_deref(), Some("hello world"));
        assert!(buf.is_empty());

        let mut blank = b"  \n".to_vec();
        assert!(take_line(&mut blank).is_none());
    }

    #[tokio::test]
    async fn test_only_lines_after_attach_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "old line\n");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        append(&path, "new line\n");

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("new line"));
    }

    #[tokio::test]
    async fn test_lines_are_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        append(&path, "one\ntwo\nthree\n");

        for expected in ["one", "two", "three"] {
            let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
            assert_eq!(line.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_partial_line_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        append(&path, "par");

        let writer_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            append(&writer_path, "tial\n");
        });

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_waits_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.log");

        let mut reader = open_file(&path, CancellationToken::new()).await;

        let writer_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            append(&writer_path, "first\n");
        });

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_truncation_seeks_to_new_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "a fairly long line that is already there\n");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(0)
            .unwrap();

        let task = tokio::spawn(async move { reader.next_line().await });
        sleep(Duration::from_millis(200)).await;
        append(&path, "after\n");

        let line = timeout(LINE_TIMEOUT, task).await.unwrap().unwrap();
        assert_eq!(line.as_deref(), Some("after"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rotation_reopens_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "before rotation\n");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
        append(&path, "");

        let writer_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            append(&writer_path, "rotated\n");
        });

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("rotated"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_that_comes_back_resumes_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let aside = dir.path().join("access.log.moved");
        append(&path, "");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        append(&path, "a\n");
        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("a"));

        std::fs::rename(&path, &aside).unwrap();
        let (from, to) = (aside.clone(), path.clone());
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            std::fs::rename(&from, &to).unwrap();
            append(&to, "b\n");
        });

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("b"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replacement_file_is_read_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        append(&path, "old\n");
        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("old"));

        std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
        let writer_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            append(&writer_path, "fresh\n");
        });

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "");

        let stats = Arc::new(PipelineStats::new());
        let mut reader = open_file(&path, CancellationToken::new())
            .await
            .with_stats(stats.clone());
        let long = "x".repeat(MAX_LINE_BYTES + 4000);
        append(&path, &format!("{}\nafter\n", long));

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.as_deref(), Some("after"));
        assert_eq!(stats.get(Counter::ParseFailures), 1);
    }

    #[tokio::test]
    async fn test_line_at_limit_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "");

        let mut reader = open_file(&path, CancellationToken::new()).await;
        let exact = "y".repeat(MAX_LINE_BYTES);
        append(&path, &format!("{}\n", exact));

        let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
        assert_eq!(line.map(|l| l.len()), Some(MAX_LINE_BYTES));
    }

    #[tokio::test]
    async fn test_cancel_ends_reader() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut reader = open_file(&dir.path().join("never.log"), cancel.clone()).await;

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let line = timeout(Duration::from_secs(1), reader.next_line()).await.unwrap();
        assert!(line.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_is_tailed() {
        let spec = SourceSpec::Command {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo one; echo two; sleep 5".to_string()],
        };
        let cancel = CancellationToken::new();
        let mut reader = TailReader::open(LogSource::Gateway, spec, fast(), cancel.clone()).await;

        for expected in ["one", "two"] {
            let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
            assert_eq!(line.as_deref(), Some(expected));
        }

        cancel.cancel();
        let line = timeout(Duration::from_secs(1), reader.next_line()).await.unwrap();
        assert!(line.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_stderr_is_tailed() {
        let spec = SourceSpec::Command {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo out; echo err 1>&2; sleep 5".to_string()],
        };
        let cancel = CancellationToken::new();
        let mut reader = TailReader::open(LogSource::Gateway, spec, fast(), cancel.clone()).await;

        let mut lines = Vec::new();
        for _ in 0..2 {
            let line = timeout(LINE_TIMEOUT, reader.next_line()).await.unwrap();
            lines.push(line.unwrap());
        }
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);

        cancel.cancel();
        assert!(timeout(Duration::from_secs(1), reader.next_line()).await.unwrap().is_none());
    }
}
