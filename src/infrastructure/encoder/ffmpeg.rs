use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub type EncoderResult<T> = Result<T, EncoderError>;

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    /// The binary could not be launched at all (missing, not executable, ...).
    #[error("encoder '{program}' could not be started: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with {}", describe_code(.code))]
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("encoder did not finish within {}s", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("encoder i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// What a successful run leaves behind: the full stderr text.
#[derive(Debug, Default)]
pub struct EncoderOutput {
    pub diagnostics: String,
}

/// Supervises the external `ffmpeg` binary.
///
/// Every run gets a null stdin, a discarded stdout and a piped stderr that is
/// logged line by line and kept in full for error reporting. The child is
/// killed when the run future is dropped, which covers both the deadline and a
/// client that goes away mid-request.
#[derive(Clone, Debug)]
pub struct Encoder {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Encoder {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `ffmpeg -version` once. Used at boot to warn early about a broken install.
    pub async fn probe(&self) -> bool {
        let status = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("encoder probe failed: {}", e);
                false
            }
        }
    }

    pub async fn run(&self, args: &[OsString]) -> EncoderResult<EncoderOutput> {
        let program = self.program.display().to_string();
        info!(program = %program, argc = args.len(), "spawning encoder");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncoderError::Unavailable {
                program: program.clone(),
                source,
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("encoder stderr was not captured"))?;

        let supervised = async {
            let diagnostics = drain_lines(stderr).await?;
            let status = child.wait().await?;
            Ok::<(ExitStatus, String), std::io::Error>((status, diagnostics))
        };

        let (status, diagnostics) = match self.timeout {
            Some(after) => {
                let outcome = tokio::time::timeout(after, supervised).await;
                match outcome {
                    Ok(res) => res?,
                    Err(_) => {
                        warn!(program = %program, "encoder deadline of {}s expired, killing it", after.as_secs());
                        // The wait future is gone; kill explicitly instead of relying on drop order.
                        let _ = child.start_kill();
                        return Err(EncoderError::TimedOut { after });
                    }
                }
            }
            None => supervised.await?,
        };

        if status.success() {
            Ok(EncoderOutput { diagnostics })
        } else {
            Err(EncoderError::Failed {
                code: status.code(),
                diagnostics,
            })
        }
    }
}

/// Reads stderr to the end, logging each line. Bytes are decoded lossily since
/// ffmpeg echoes file names verbatim.
async fn drain_lines<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<String> {
    let mut reader = BufReader::new(reader);
    let mut diagnostics = String::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        debug!(target: "encoder", "{}", text.trim_end());
        diagnostics.push_str(&text);
    }

    Ok(diagnostics)
}


#[cfg(all(test, unix))]
mod tests {
    use super::testing::{fake_encoder, WRITES_LAST_ARG};
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[tokio::test]
    async fn zero_exit_is_success_and_keeps_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_encoder(dir.path(), "ok.sh", "echo 'frame= 2' >&2\nexit 0");

        let out = Encoder::new(bin, None).run(&[]).await.unwrap();
        assert_eq!(out.diagnostics, "frame= 2\n");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_full_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_encoder(
            dir.path(),
            "fail.sh",
            "echo 'first line' >&2\necho 'Invalid argument' >&2\nexit 3",
        );

        match Encoder::new(bin, None).run(&[]).await {
            Err(EncoderError::Failed { code, diagnostics }) => {
                assert_eq!(code, Some(3));
                assert_eq!(diagnostics, "first line\nInvalid argument\n");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Encoder::new(dir.path().join("no-such-ffmpeg"), None);

        let err = encoder.run(&args(&["-version"])).await.unwrap_err();
        assert!(matches!(err, EncoderError::Unavailable { .. }), "{err:?}");
        assert!(!encoder.probe().await);
    }

    #[tokio::test]
    async fn arguments_are_passed_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_encoder(dir.path(), "echo.sh", WRITES_LAST_ARG);
        let target = dir.path().join("out file.mp4");

        Encoder::new(bin, None)
            .run(&[OsString::from("-y"), target.clone().into_os_string()])
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(target).unwrap(), "fake");
    }

    #[tokio::test]
    async fn deadline_kills_slow_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_encoder(dir.path(), "slow.sh", "exec sleep 30");

        let started = std::time::Instant::now();
        let err = Encoder::new(bin, Some(Duration::from_millis(200)))
            .run(&[])
            .await
            .unwrap_err();

        assert!(matches!(err, EncoderError::TimedOut { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
