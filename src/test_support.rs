//! Test helpers shared by the `#[cfg(test)]` modules throughout the crate.

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use tempfile::{NamedTempFile, TempDir};

/// A convenient alias to use `?` in tests.
///
/// There is a blanket `impl From<E: Error> for Box<dyn Error>`, meaning anything that implements
/// [`std::error::Error`] can be propagated using `?`.
pub type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// A pipe whose read end is suitable for an `Fd` watch, along with a write end for driving it
/// from a test.
pub fn pipe() -> io::Result<(RawFd, File)> {
    let mut fds = [0; 2];
    // SAFETY: `fds` is a valid 2-element out-parameter for `pipe(2)`.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    use std::os::unix::io::FromRawFd;
    // SAFETY: `fds[1]` was just returned by a successful `pipe(2)` call and is owned here.
    let writer = unsafe { File::from_raw_fd(fds[1]) };
    Ok((fds[0], writer))
}

/// An empty directory in a fresh temporary location, plus the guard that removes it on drop.
pub fn temp_dir() -> io::Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().to_path_buf();
    Ok((dir, path))
}

/// A temporary file pre-populated with `contents`.
pub fn temp_file(contents: &[u8]) -> io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}
