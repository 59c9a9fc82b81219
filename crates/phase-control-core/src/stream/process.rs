//! Acquisition process client
//!
//! Launches the acquisition program as a child process and decodes its
//! stdout as a frame stream. The child is killed when the client is stopped
//! or dropped.

use super::protocol::{StreamMeta, StreamReader};
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::io::BufReader;
use std::process::{Child, ChildStdout, Command, Stdio};

/// Reader type produced by a spawned acquisition process
pub type ProcessReader = StreamReader<BufReader<ChildStdout>>;

/// Handle on a running acquisition process
pub struct StreamClient {
    child: Child,
    reader: Option<ProcessReader>,
}

impl StreamClient {
    /// Start the acquisition program and read its meta record
    ///
    /// # Arguments
    /// * `program` - Executable to launch
    /// * `args` - Command-line arguments
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to launch acquisition process {:?}", program))?;

        tracing::info!("Acquisition process started (pid {})", child.id());

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                kill(&mut child);
                anyhow::bail!("Acquisition process has no stdout pipe");
            }
        };

        let reader = match StreamReader::open(BufReader::new(stdout)) {
            Ok(reader) => reader,
            Err(e) => {
                kill(&mut child);
                return Err(e).context("Acquisition process did not send a meta record");
            }
        };

        Ok(Self {
            child,
            reader: Some(reader),
        })
    }

    /// Session header sent by the process, if the reader has not been taken
    pub fn meta(&self) -> Option<&StreamMeta> {
        self.reader.as_ref().map(|r| r.meta())
    }

    /// Move the frame reader out, e.g. into a producer thread
    pub fn take_reader(&mut self) -> Option<ProcessReader> {
        self.reader.take()
    }

    /// Kill the process and reap it
    pub fn stop(&mut self) {
        kill(&mut self.child);
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn kill(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!("Acquisition process already exited: {}", status);
        }
        _ => {
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill acquisition process: {}", e);
            }
            match child.wait() {
                Ok(status) => tracing::info!("Acquisition process stopped: {}", status),
                Err(e) => tracing::warn!("Failed to reap acquisition process: {}", e),
            }
        }
    }
}
