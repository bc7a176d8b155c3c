//! The transfer pipeline: `send | receive` with throughput sampling.
//!
//! Lifecycle: when `from` exits cleanly its pipe end closes, signalling
//! `to`; when `to` exits the group is torn down. If either side fails,
//! the other is killed so no orphan is left holding a pipe.
//! Cancellation kills both.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam::channel;
use crossbeam::select;

use crate::daemon::CancelToken;
use crate::logs::Logbook;
use crate::model::humanize_bytes;
use crate::zfs::DriverError;
use crate::{Error, Result};

const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(60);
const REAP_POLL: Duration = Duration::from_millis(200);
const COPY_BUF: usize = 128 * 1024;

/// Run `from | to` to completion. Expected to take hours; logs
/// throughput once a minute while it runs.
pub(crate) fn pipe(
    cancel: &CancelToken,
    logs: &Logbook,
    from: (Command, String),
    to: (Command, String),
) -> Result<()> {
    let (mut from_cmd, from_desc) = from;
    let (mut to_cmd, to_desc) = to;
    logs.log(format!("{from_desc} | {to_desc}"));

    from_cmd.stdin(Stdio::null()).stdout(Stdio::piped());
    to_cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut to_child = to_cmd.spawn().map_err(|source| DriverError::Spawn {
        command: to_desc.clone(),
        source,
    })?;
    let mut from_child = match from_cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            let _ = to_child.kill();
            let _ = to_child.wait();
            return Err(DriverError::Spawn {
                command: from_desc.clone(),
                source,
            }
            .into());
        }
    };

    let mut from_out = from_child.stdout.take().expect("from stdout is piped");
    let mut to_in = to_child.stdin.take().expect("to stdin is piped");
    let mut to_out = to_child.stdout.take().expect("to stdout is piped");
    let mut to_err = to_child.stderr.take().expect("to stderr is piped");

    let stat = ThroughputStat::new();
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);

    let (cancelled, from_status, to_status, to_output) = std::thread::scope(|scope| {
        // Copy send output into the receiver, counting bytes. Dropping
        // `to_in` at the end closes the pipe and signals EOF.
        let stat_ref = &stat;
        scope.spawn(move || {
            let mut buf = vec![0u8; COPY_BUF];
            loop {
                let n = match from_out.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if to_in.write_all(&buf[..n]).is_err() {
                    break;
                }
                stat_ref.record(n as u64);
            }
        });

        // Drain the receiver's output so it can never block on a full
        // pipe; it becomes the error text on failure.
        let out_handle = scope.spawn(move || {
            let mut text = String::new();
            let _ = to_out.read_to_string(&mut text);
            text
        });
        let err_handle = scope.spawn(move || {
            let mut text = String::new();
            let _ = to_err.read_to_string(&mut text);
            text
        });

        // Periodic throughput logging until the pipeline ends.
        scope.spawn(|| {
            let ticker = channel::tick(THROUGHPUT_LOG_INTERVAL);
            loop {
                select! {
                    recv(ticker) -> _ => stat_ref.log(logs),
                    recv(stop_rx) -> _ => break,
                }
            }
        });

        // Reap both children, killing the peer when one fails and both
        // on cancellation.
        let mut cancelled = false;
        let mut from_status: Option<ExitStatus> = None;
        let mut to_status: Option<ExitStatus> = None;
        while from_status.is_none() || to_status.is_none() {
            if cancel.is_cancelled() && !cancelled {
                cancelled = true;
                let _ = from_child.kill();
                let _ = to_child.kill();
            }
            if from_status.is_none() {
                if let Some(status) = reap(&mut from_child) {
                    from_status = Some(status);
                    if !status.success() && to_status.is_none() && !cancelled {
                        let _ = to_child.kill();
                    }
                }
            }
            if to_status.is_none() {
                if let Some(status) = reap(&mut to_child) {
                    to_status = Some(status);
                    if !status.success() && from_status.is_none() && !cancelled {
                        let _ = from_child.kill();
                    }
                }
            }
            if from_status.is_none() || to_status.is_none() {
                std::thread::sleep(REAP_POLL);
            }
        }

        drop(stop_tx);
        let mut output = out_handle.join().unwrap_or_default();
        let err_text = err_handle.join().unwrap_or_default();
        if !err_text.trim().is_empty() {
            if !output.trim().is_empty() {
                output.push_str("; ");
            }
            output.push_str(err_text.trim());
        }

        (
            cancelled,
            from_status.expect("from was reaped"),
            to_status.expect("to was reaped"),
            output.trim().replace('\n', "; "),
        )
    });

    stat.log(logs);

    if cancelled {
        return Err(Error::Cancelled);
    }
    if !to_status.success() {
        return Err(DriverError::from_status(&to_desc, to_status, to_output).into());
    }
    if !from_status.success() {
        return Err(DriverError::from_status(&from_desc, from_status, String::new()).into());
    }
    Ok(())
}

fn reap(child: &mut Child) -> Option<ExitStatus> {
    child.try_wait().ok().flatten()
}

/// Sliding-window byte counter: total since start plus one hour of
/// (instant, bytes) points for the 1 m / 10 m / 1 h rates.
struct ThroughputStat {
    inner: Mutex<StatInner>,
}

struct StatInner {
    total: u64,
    points: VecDeque<(Instant, u64)>,
}

impl ThroughputStat {
    fn new() -> Self {
        ThroughputStat {
            inner: Mutex::new(StatInner {
                total: 0,
                points: VecDeque::new(),
            }),
        }
    }

    fn record(&self, bytes: u64) {
        let mut inner = self.inner.lock().expect("throughput lock poisoned");
        inner.total += bytes;
        let now = Instant::now();
        inner.points.push_back((now, bytes));
        while let Some(&(at, _)) = inner.points.front() {
            if now.duration_since(at) > Duration::from_secs(3600) {
                inner.points.pop_front();
            } else {
                break;
            }
        }
    }

    fn log(&self, logs: &Logbook) {
        let inner = self.inner.lock().expect("throughput lock poisoned");
        let now = Instant::now();
        let minute = window_rate(&inner.points, now, 60);
        let ten = window_rate(&inner.points, now, 600);
        let hour = window_rate(&inner.points, now, 3600);
        logs.log(format!(
            "throughput: total {}, last minute {}/s, 10 min {}/s, hour {}/s",
            humanize_bytes(inner.total),
            humanize_bytes(minute),
            humanize_bytes(ten),
            humanize_bytes(hour),
        ));
    }
}

/// Bytes per second over the trailing window. The denominator is the
/// observed span when it is shorter than the window, so a fresh
/// transfer reports its real rate.
fn window_rate(points: &VecDeque<(Instant, u64)>, now: Instant, window_secs: u64) -> u64 {
    let window = Duration::from_secs(window_secs);
    let mut bytes = 0_u64;
    let mut first: Option<Instant> = None;
    for &(at, n) in points {
        if now.duration_since(at) <= window {
            bytes += n;
            if first.is_none() {
                first = Some(at);
            }
        }
    }
    let elapsed = match first {
        Some(at) => now.duration_since(at).as_secs().clamp(1, window_secs),
        None => window_secs,
    };
    bytes / elapsed
}
