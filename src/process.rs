// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::CONFIG_FILE_KEY,
    error::{Error, Result},
};
use log::{debug, warn};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    os::unix::io::OwnedFd,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
};

/// A launched node process. If it is still running when dropped, it is killed.
#[derive(Debug)]
pub struct Process {
    name: String,
    child: Child,
}

impl Process {
    /// Starts `binary --config-file=<config_file>`, sending stdout and stderr
    /// through one pipe whose lines are logged tagged with `name`.
    pub fn launch(name: &str, binary: &Path, config_file: &Path) -> Result<Self> {
        let launch_error = |source: io::Error| Error::Launch {
            node: name.to_string(),
            binary: binary.to_path_buf(),
            source,
        };

        let (read, write) = output_pipe().map_err(|e| launch_error(e.into()))?;
        let reader = File::from(read);

        let mut command = Command::new(binary);
        command
            .arg(format!("--{}={}", CONFIG_FILE_KEY, config_file.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::from(write.try_clone().map_err(launch_error)?))
            .stderr(Stdio::from(write));
        let child = command.spawn().map_err(launch_error)?;
        // The command holds our copies of the write end; the relay only sees
        // EOF once they are closed.
        drop(command);

        let label = name.to_string();
        thread::Builder::new()
            .name(format!("{}-output", name))
            .spawn(move || relay_lines(reader, |line| debug!("[{}] - {}", label, line)))
            .map_err(launch_error)?;

        debug!("[{}] started process {}", name, child.id());
        Ok(Self {
            name: name.to_string(),
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Reaps the process if it exited.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        match self.child.try_wait() {
            // Already exited, maybe after teardown or a crash
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = self.child.kill() {
                    warn!("[{}] process could not be killed: {}", self.name, e);
                    return;
                }
                if let Err(e) = self.child.wait() {
                    warn!("[{}] process could not be reaped: {}", self.name, e);
                }
            }
        }
    }
}

/// Both ends are close-on-exec, so no node inherits another node's pipe.
/// `Command` clears the flag on the copies it installs as stdout and stderr.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn output_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn output_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::unix::io::AsRawFd;

    let (read, write) = nix::unistd::pipe()?;
    fcntl(read.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    fcntl(write.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok((read, write))
}

/// Forwards each line of `reader` until EOF. Invalid UTF-8 is replaced
/// rather than ending the relay.
pub(crate) fn relay_lines<R: Read, F: FnMut(&str)>(reader: R, mut forward: F) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                forward(line.trim_end_matches(|c| c == '\n' || c == '\r'));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return,
        }
    }
}
