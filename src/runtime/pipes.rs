//! Named pipes of a sandbox session.
//!
//! Opening a FIFO blocks until its other end is opened too, so both sides
//! open the pipes they share in the same order: control request before
//! control response, downward before upward.

use std::fs::{File, OpenOptions};
use std::io;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tempfile::TempDir;

use crate::common::*;
use crate::runtime::errors::SandboxError;

pub const CONTROL_REQUEST: &str = "control_request.pipe";
pub const CONTROL_RESPONSE: &str = "control_response.pipe";
pub const DOWNWARD: &str = "downward.pipe";
pub const UPWARD: &str = "upward.pipe";

/// A temporary directory holding the four pipes of one session.
/// Removed when dropped.
#[derive(Debug)]
pub struct SessionDir {
    dir: TempDir,
}

pub fn make_fifo(path: &Path) -> Result<(), SandboxError> {
    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)?;
    Ok(())
}

pub fn open_read(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

pub fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

impl SessionDir {
    pub fn create(root: &Path) -> Result<SessionDir, SandboxError> {
        let dir = tempfile::Builder::new().prefix("sandbox_process_").tempdir_in(root)?;
        for name in &[CONTROL_REQUEST, CONTROL_RESPONSE, DOWNWARD, UPWARD] {
            make_fifo(&dir.path().join(name))?;
        }
        log::debug!("session directory {}", dir.path().display());
        Ok(SessionDir { dir })
    }
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
    pub fn pipe(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::fs::FileTypeExt;

    #[test]
    fn creates_fifos() {
        let root = tempfile::tempdir().unwrap();
        let session = SessionDir::create(root.path()).unwrap();
        for name in &[CONTROL_REQUEST, CONTROL_RESPONSE, DOWNWARD, UPWARD] {
            let meta = std::fs::metadata(session.pipe(name)).unwrap();
            assert!(meta.file_type().is_fifo(), "{}", name);
        }
        let path = session.path().to_owned();
        drop(session);
        assert!(!path.exists());
    }

    #[test]
    fn fifo_rendezvous() {
        let root = tempfile::tempdir().unwrap();
        let session = SessionDir::create(root.path()).unwrap();
        let path = session.pipe(DOWNWARD);
        crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| {
                let mut writer = open_write(&path).unwrap();
                writeln!(writer, "3 1 4").unwrap();
            });
            let mut line = String::new();
            BufReader::new(open_read(&path).unwrap()).read_line(&mut line).unwrap();
            assert_eq!(line, "3 1 4\n");
        })
        .unwrap();
    }
}
