use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::core::error::ProviderError;

/// Runs `program` with `args` and returns its stdout as UTF-8 (lossy).
///
/// The child is killed once `timeout` elapses. A non-zero exit status is
/// reported with the captured stderr.
pub fn run_captured(program: &str, args: &[String], timeout: Duration) -> Result<String, ProviderError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // both pipes are drained while waiting, a full pipe would stall the child
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let waited = child.wait_timeout(timeout);
    let status = match waited {
        Ok(Some(status)) => Ok(status),
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ProviderError::Timeout(timeout))
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ProviderError::Io(err))
        }
    };

    // the child is reaped on every path, so its pipes close and the readers end
    let stdout = join_output(stdout);
    let stderr = join_output(stderr);
    let status = status?;

    if !status.success() {
        return Err(ProviderError::Process {
            program: program.to_string(),
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(stdout)
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_output(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_stdout() -> Result<(), ProviderError> {
        let out = run_captured("sh", &sh("printf 'hello world'"), Duration::from_secs(5))?;
        assert_eq!(out, "hello world");
        Ok(())
    }

    #[test]
    fn reports_failure_with_stderr() {
        let err = run_captured("sh", &sh("echo boom >&2; exit 3"), Duration::from_secs(5))
            .unwrap_err();
        match err {
            ProviderError::Process { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn kills_child_after_timeout() {
        let err = run_captured("sh", &sh("exec sleep 5"), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[test]
    fn timeout_returns_once_the_child_is_gone() {
        let started = std::time::Instant::now();
        let err = run_captured(
            "sh",
            &sh("printf partial; exec sleep 30"),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        // readers were joined after the kill, well before the sleep would end
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let err = run_captured("definitely-not-a-real-binary-ocracle", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Io(_)));
    }
}
