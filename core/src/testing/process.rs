use std::{
    borrow::Cow,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    string::FromUtf8Error,
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
    sync::Mutex,
    time::Instant,
};

/// Captured result of one bounded execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, with signal deaths reported as `128 + signal`. `None` when timed out.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub execution_time: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Decodes output captured with a cap of `max_bytes`.
/// A multibyte character cut by the cap is dropped; any other invalid byte is an error.
/// ```
/// use grader_core::testing::decode_capped;
///
/// assert_eq!(decode_capped("é é".as_bytes()[..4].to_vec(), 4).unwrap(), "é ");
/// assert!(decode_capped(vec![0xff, b'a'], 4).is_err());
/// ```
pub fn decode_capped(bytes: Vec<u8>, max_bytes: usize) -> Result<String, FromUtf8Error> {
    String::from_utf8(bytes).or_else(|e| {
        let cut_by_cap = e.as_bytes().len() >= max_bytes && e.utf8_error().error_len().is_none();
        if !cut_by_cap {
            return Err(e);
        }
        let valid = e.utf8_error().valid_up_to();
        let mut bytes = e.into_bytes();
        bytes.truncate(valid);
        String::from_utf8(bytes)
    })
}

/// A spawned child that leads its own process group, so that everything it forks
/// can be signalled at once.
#[derive(Debug)]
pub struct ProcessGroupHandle {
    child: Child,
    pgid: Option<u32>,
}

impl ProcessGroupHandle {
    const REAP_GRACE: Duration = Duration::from_millis(500);

    pub fn spawn(mut cmd: std::process::Command) -> io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = Command::from(cmd).kill_on_drop(true).spawn()?;
        let pgid = child.id();
        Ok(Self { child, pgid })
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Waits for the direct child. `Ok(None)` means the timeout elapsed first.
    pub async fn wait(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Kills every process in the group, then reaps the direct child.
    pub async fn terminate_all(&mut self) {
        self.signal_group();
        if let Err(e) = self.child.start_kill() {
            // Already reaped.
            log::trace!("start_kill: {}", e);
        }
        if tokio::time::timeout(Self::REAP_GRACE, self.child.wait())
            .await
            .is_err()
        {
            log::warn!("Process {:?} did not exit after SIGKILL", self.pgid);
        }
    }

    #[cfg(unix)]
    fn signal_group(&self) {
        let Some(pgid) = self.pgid.and_then(|id| libc::pid_t::try_from(id).ok()) else {
            return;
        };
        // SAFETY: kill(2) has no memory-safety preconditions.
        let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if ret != 0 {
            log::trace!(
                "kill(-{}): {}",
                pgid,
                io::Error::last_os_error()
            );
        }
    }

    // Without process groups only the direct child can be reached.
    #[cfg(not(unix))]
    fn signal_group(&self) {}
}

/// Shell command executed with piped stdio under a wall-clock limit.
#[derive(Debug, Clone)]
pub struct BoundedCommand {
    shell: PathBuf,
    command: String,
    cwd: PathBuf,
    stdin: Arc<[u8]>,
    timeout: Duration,
    stdout_max_bytes: usize,
    stderr_max_bytes: usize,
}

impl BoundedCommand {
    const DEFAULT_SHELL: &str = "/bin/sh";
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
    const DEFAULT_CAPTURE_MAX_BYTES: usize = 8 << 20;
    const DRAIN_GRACE: Duration = Duration::from_millis(250);

    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            shell: Self::DEFAULT_SHELL.into(),
            command: command.into(),
            cwd: cwd.into(),
            stdin: Arc::from(Vec::new()),
            timeout: Self::DEFAULT_TIMEOUT,
            stdout_max_bytes: Self::DEFAULT_CAPTURE_MAX_BYTES,
            stderr_max_bytes: Self::DEFAULT_CAPTURE_MAX_BYTES,
        }
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn stdin(mut self, input: impl AsRef<[u8]>) -> Self {
        self.stdin = Arc::from(input.as_ref());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capture_max_bytes(mut self, stdout: usize, stderr: usize) -> Self {
        self.stdout_max_bytes = stdout;
        self.stderr_max_bytes = stderr;
        self
    }

    pub fn get_command(&self) -> &str {
        &self.command
    }

    pub fn get_cwd(&self) -> &Path {
        &self.cwd
    }

    /// Runs the command. Errors only when the process cannot be started;
    /// exit codes and timeouts are reported through [`ProcessOutput`].
    pub async fn run(&self) -> io::Result<ProcessOutput> {
        let mut cmd = std::process::Command::new(&self.shell);
        cmd.args(["-c", &self.command])
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut proc = ProcessGroupHandle::spawn(cmd)?;
        let child = proc.child_mut();
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let feeder = tokio::spawn(feed(stdin, self.stdin.clone()));
        let mut stdout_task = tokio::spawn(drain(stdout, stdout_buf.clone(), self.stdout_max_bytes));
        let mut stderr_task = tokio::spawn(drain(stderr, stderr_buf.clone(), self.stderr_max_bytes));

        let start_at = Instant::now();
        let waited = proc.wait(self.timeout).await;
        let execution_time = start_at.elapsed();

        // Background children must not outlive the run, even after a clean exit.
        proc.terminate_all().await;
        feeder.abort();

        let drained = tokio::time::timeout(Self::DRAIN_GRACE, async {
            let _ = tokio::join!(&mut stdout_task, &mut stderr_task);
        })
        .await;
        if drained.is_err() {
            log::debug!("Output pipes still open after termination: {}", self.command);
            stdout_task.abort();
            stderr_task.abort();
        }

        let status = waited?;
        let stdout = std::mem::take(&mut *stdout_buf.lock().await);
        let stderr = std::mem::take(&mut *stderr_buf.lock().await);

        Ok(ProcessOutput {
            status: status.map(normalized_exit_code),
            stdout,
            stderr,
            timed_out: status.is_none(),
            execution_time,
        })
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("Failed to open {}", name))
}

async fn feed<W>(mut stdin: W, input: Arc<[u8]>)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    // A candidate may exit without reading its input.
    if let Err(e) = stdin.write_all(&input).await {
        log::debug!("Failed to pass input-data to stdin: {}", e);
    }
    drop(stdin);
}

/// Reads `reader` to the end, keeping at most `max_bytes`.
/// Bytes beyond the cap are read and discarded so the writer never blocks.
async fn drain<R>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>, max_bytes: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let mut buf = buf.lock().await;
        let room = max_bytes.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// Exit code with signal deaths mapped to the shell convention `128 + signal`.
pub fn normalized_exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}

/// Human readable description of a non-zero exit code.
/// ```
/// use grader_core::testing::describe_exit_code;
///
/// assert_eq!(describe_exit_code(139), "Segmentation fault (SIGSEGV)");
/// assert_eq!(describe_exit_code(2), "Abnormal exit code 2");
/// ```
pub fn describe_exit_code(code: i32) -> Cow<'static, str> {
    match code {
        132 => "Illegal operation (SIGILL)".into(),
        133 => "Program aborted (SIGTRAP)".into(),
        134 => "Program aborted (SIGABRT)".into(),
        136 => "Program aborted (SIGFPE)".into(),
        137 => "Too much memory".into(),
        138 => "Program aborted (SIGBUS)".into(),
        139 => "Segmentation fault (SIGSEGV)".into(),
        _ => format!("Abnormal exit code {}", code).into(),
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use crate::testutil::TempDir;

    fn sh(script: &str) -> BoundedCommand {
        BoundedCommand::new(script, std::env::temp_dir()).timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn pipes_stdin_to_stdout() {
        let out = sh("cat").stdin("hello\nworld\n").run().await.unwrap();
        assert!(out.success());
        assert!(!out.timed_out);
        assert_eq!(out.stdout, b"hello\nworld\n");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        let out = sh("echo out; echo err >&2").run().await.unwrap();
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr_lossy(), "err\n");
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let out = sh("echo partial; exit 42").run().await.unwrap();
        assert_eq!(out.status, Some(42));
        assert!(!out.success());
        assert_eq!(out.stdout, b"partial\n");
    }

    #[tokio::test]
    async fn signal_death_uses_shell_convention() {
        let out = sh("kill -SEGV $$").run().await.unwrap();
        assert_eq!(out.status, Some(139));
        assert_eq!(describe_exit_code(139), "Segmentation fault (SIGSEGV)");
    }

    #[tokio::test]
    async fn timeout_keeps_partial_output() {
        let out = sh("echo partial; sleep 10")
            .timeout(Duration::from_millis(300))
            .run()
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.status, None);
        assert_eq!(out.stdout, b"partial\n");
        assert!(out.execution_time < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn timeout_kills_the_whole_process_group() {
        let dir = TempDir::new("pgroup");
        let marker = dir.path().join("leaked");
        let script = format!("(sleep 1; echo leaked > {}) & sleep 10", marker.display());
        let out = sh(&script)
            .timeout(Duration::from_millis(300))
            .run()
            .await
            .unwrap();
        assert!(out.timed_out);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child survived the timeout");
    }

    #[tokio::test]
    async fn background_children_die_after_normal_exit() {
        let dir = TempDir::new("pgroup");
        let marker = dir.path().join("leaked");
        let script = format!("(sleep 1; echo leaked > {}) & echo done", marker.display());
        let out = sh(&script).run().await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, b"done\n");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the run");
    }

    #[tokio::test]
    async fn unread_stdin_does_not_block() {
        let input = vec![b'x'; 1 << 20];
        let out = sh("echo done").stdin(&input).run().await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, b"done\n");
    }

    #[tokio::test]
    async fn capture_is_capped() {
        let out = sh("i=0; while [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done")
            .capture_max_bytes(100, 100)
            .run()
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.len(), 100);
    }

    #[tokio::test]
    async fn capped_multibyte_output_still_decodes() {
        let out = sh("printf 'é é é é'").capture_max_bytes(4, 4).run().await.unwrap();
        assert_eq!(out.stdout, [0xc3, 0xa9, b' ', 0xc3]);
        assert_eq!(decode_capped(out.stdout, 4).unwrap(), "é ");
    }

    #[test]
    fn invalid_bytes_below_the_cap_are_an_error() {
        assert!(decode_capped(vec![b'a', 0xc3], 100).is_err());
        assert!(decode_capped(vec![0xff, b'a', b'b', b'c'], 4).is_err());
        assert_eq!(decode_capped(b"abcd".to_vec(), 4).unwrap(), "abcd");
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let res = BoundedCommand::new("true", "/nonexistent/dir/for/grader")
            .run()
            .await;
        assert!(res.is_err());
    }

    #[test]
    fn exit_code_table() {
        assert_eq!(describe_exit_code(132), "Illegal operation (SIGILL)");
        assert_eq!(describe_exit_code(134), "Program aborted (SIGABRT)");
        assert_eq!(describe_exit_code(136), "Program aborted (SIGFPE)");
        assert_eq!(describe_exit_code(137), "Too much memory");
        assert_eq!(describe_exit_code(138), "Program aborted (SIGBUS)");
        assert_eq!(describe_exit_code(1), "Abnormal exit code 1");
    }
}
