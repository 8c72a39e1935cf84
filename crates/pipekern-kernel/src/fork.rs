//! Session forking: duplicate the process and re-wire the child's streams.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use nix::unistd::{dup2, fork, ForkResult};

use crate::error::KernelResult;
use crate::protocol::PipeSet;

/// Which side of a fork this process ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Still the original kernel; carries the child's process id.
    Parent(u32),
    /// The new kernel. Standard streams already point at the pipe set.
    Child,
}

/// Capability to spawn a child session.
pub trait Forker {
    fn fork_session(&mut self, pipes: &PipeSet) -> KernelResult<ForkOutcome>;
}

/// Forks the real OS process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessForker;

impl Forker for ProcessForker {
    fn fork_session(&mut self, pipes: &PipeSet) -> KernelResult<ForkOutcome> {
        // SAFETY: the kernel is single-threaded, and the child only opens
        // files and duplicates descriptors before resuming the task loop.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                let pid = child.as_raw() as u32;
                tracing::info!(pid, "forked session");
                Ok(ForkOutcome::Parent(pid))
            }
            ForkResult::Child => {
                if let Err(err) = redirect_stdio(&pipes.stdin, &pipes.stdout, &pipes.stderr, false) {
                    tracing::error!(error = %err, "could not attach forked session to its pipes");
                    std::process::exit(1);
                }
                Ok(ForkOutcome::Child)
            }
        }
    }
}

fn open_output(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options.open(path)
}

/// Point fds 0, 1 and 2 at the given files.
///
/// The input is opened first: when it is a FIFO, the opener on the other
/// end has to be connected before the outputs are.
pub fn redirect_stdio(stdin: &Path, stdout: &Path, stderr: &Path, append: bool) -> io::Result<()> {
    let input = File::open(stdin)?;
    let output = open_output(stdout, append)?;
    let error = open_output(stderr, append)?;

    for (file, target) in [(&input, 0), (&output, 1), (&error, 2)] {
        dup2(file.as_raw_fd(), target).map_err(io::Error::from)?;
    }
    // The originals close on drop; 0/1/2 keep the descriptions open.
    Ok(())
}
