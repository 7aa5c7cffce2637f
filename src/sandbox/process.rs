use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Termination {
    Exited(ExitStatus),
    /// The deadline elapsed; the process was killed.
    TimedOut,
    /// The cancellation token fired; the process was killed.
    Cancelled,
}

/// Reads a child's stdout line by line until it exits, the deadline
/// elapses, or `cancel` fires.
///
/// `on_line` runs synchronously for every stdout line (trailing newline
/// stripped, invalid UTF-8 replaced). Stderr is only logged at debug level.
/// On timeout or cancellation the child is killed; lines seen so far have
/// already been delivered.
pub async fn run_lines<F>(
    mut child: Child,
    label: &str,
    deadline: Duration,
    cancel: &CancellationToken,
    mut on_line: F,
) -> io::Result<Termination>
where
    F: FnMut(&str),
{
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other(format!("{label}: stdout not captured")))?;

    let stderr_handle = child.stderr.take().map(|stderr| {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("{label} stderr: {line}");
            }
        })
    });

    let read_to_exit = async {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            on_line(line.trim_end_matches(['\n', '\r']));
        }
        child.wait().await
    };

    let termination = tokio::select! {
        result = tokio::time::timeout(deadline, read_to_exit) => match result {
            Ok(status) => Termination::Exited(status?),
            Err(_) => Termination::TimedOut,
        },
        _ = cancel.cancelled() => Termination::Cancelled,
    };

    match termination {
        Termination::Exited(_) => {
            if let Some(handle) = stderr_handle {
                let _ = handle.await;
            }
        }
        Termination::TimedOut | Termination::Cancelled => {
            if let Err(e) = child.kill().await {
                warn!("{label}: failed to kill process: {e}");
            }
            if let Some(handle) = stderr_handle {
                handle.abort();
            }
        }
    }

    Ok(termination)
}
