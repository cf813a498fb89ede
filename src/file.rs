//! Asynchronous whole-file reads.
//!
//! Regular files are always "ready" under epoll/kqueue, so there is
//! nothing to register with the reactor; instead a read runs on a spawned
//! thread and its result crosses back to the loop through the same
//! [`promise::bridge`](crate::promise::bridge) mechanism a `QueueStream`
//! producer uses.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::promise::Future;
use crate::reactor::Loop;

/// Reads the entire contents of `path` and resolves on `event_loop`'s
/// thread once the read completes.
pub fn read_to_vec(path: impl AsRef<Path>, event_loop: &Loop) -> Result<Future<Arc<Vec<u8>>>> {
    let (sender, future) = crate::promise::bridge(event_loop)?;
    let path: PathBuf = path.as_ref().to_path_buf();

    std::thread::spawn(move || match fs::read(&path) {
        Ok(bytes) => sender.send(Arc::new(bytes)),
        Err(e) => sender.send_error(Error::Io(e)),
    });

    Ok(future)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn reads_file_contents_asynchronously() {
        let mut path = std::env::temp_dir();
        path.push(format!("streamloop-file-test-{}", std::process::id()));
        {
            let mut f = fs::File::create(&path).unwrap();
            f.write_all(b"hello, file").unwrap();
        }

        let event_loop = Loop::new("file-test").unwrap();
        let future = read_to_vec(&path, &event_loop).unwrap();
        let outcome = future.blocking_await(Some(Duration::from_secs(2))).unwrap();

        assert_eq!(outcome.as_slice(), b"hello, file");
        let _ = fs::remove_file(&path);
    }
}
