use std::io::{self, Read};
use std::time::{Duration, Instant};

/// Per-connection accumulator for incoming request bytes.
///
/// A buffer is created on a connection's first readiness and lives until
/// the request completes or the connection is cut. It tracks everything
/// the event loop needs to bound a connection: how much has arrived, how
/// long the request has been in flight, and how many read attempts it has
/// consumed.
#[derive(Debug)]
pub struct Buffer {
    contents: Vec<u8>,
    started_at: Instant,
    tries: u32,
    found_terminator: bool,
}

/// What a single read pass observed on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The socket has no more bytes available right now.
    Progress,
    /// The peer closed, or the read failed; either way the connection is done.
    Eof,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    #[must_use]
    pub fn new() -> Self {
        Buffer {
            contents: Vec::new(),
            started_at: Instant::now(),
            tries: 0,
            found_terminator: false,
        }
    }

    /// Drain every byte currently available on `stream` without blocking.
    ///
    /// Counts as one read attempt. The header terminator check runs after
    /// each byte so `found_terminator` flips exactly once, and reading
    /// continues past the terminator so a form body arriving in the same
    /// readiness event lands in the buffer too. Returns early once the
    /// size bound is crossed; the caller classifies that as an oversize
    /// request. Read errors are indistinguishable from a dead peer here,
    /// so they map to [`ReadOutcome::Eof`].
    pub fn read_from<R: Read>(&mut self, stream: &mut R, max_size: usize) -> ReadOutcome {
        self.tries += 1;
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => {
                    self.push(&chunk[..n]);
                    if self.contents.len() > max_size {
                        return ReadOutcome::Progress;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return ReadOutcome::Progress
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return ReadOutcome::Eof,
            }
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.contents.push(byte);
            if !self.found_terminator && self.contents.ends_with(b"\r\n\r\n") {
                self.found_terminator = true;
            }
        }
    }

    #[must_use]
    pub fn content_size(&self) -> usize {
        self.contents.len()
    }

    #[must_use]
    pub fn tries(&self) -> u32 {
        self.tries
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The header terminator has been observed; the request can be parsed.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.found_terminator
    }

    #[must_use]
    pub fn too_big(&self, max_size: usize) -> bool {
        self.contents.len() > max_size
    }

    #[must_use]
    pub fn too_old(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    #[must_use]
    pub fn too_needy(&self, max_tries: u32) -> bool {
        self.tries > max_tries
    }

    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    #[must_use]
    pub fn into_contents(self) -> Vec<u8> {
        self.contents
    }
}
