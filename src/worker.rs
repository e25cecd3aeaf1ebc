//! Client workers.
//!
//! A worker owns one connection and runs its share of probes strictly
//! half-duplex: write the probe, read one response line, repeat. The first
//! I/O failure is logged and ends the worker; nothing is retried.
//!
//! Two flavors share the same contract:
//! - `run_blocking`: std sockets, meant to run on its own OS thread
//! - `run_async`: tokio sockets, meant to run as a spawned task

use crate::protocol::{find_line_end, probe};
use std::io::{self, BufRead, BufReader, Read, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::error;

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Why a worker stopped early
#[derive(Debug)]
pub enum WorkerError {
    Connect { addr: String, source: io::Error },
    Write(io::Error),
    Read(io::Error),
    /// The worker thread or task could not be started
    Spawn(io::Error),
    /// The worker thread or task panicked
    Panicked,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Connect { addr, source } => {
                write!(f, "Error connecting to {addr}: {source}")
            }
            WorkerError::Write(e) => write!(f, "Write error: {e}"),
            WorkerError::Read(e) => write!(f, "Read error: {e}"),
            WorkerError::Spawn(e) => write!(f, "Failed to start worker: {e}"),
            WorkerError::Panicked => write!(f, "Worker panicked"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Connect { source, .. } => Some(source),
            WorkerError::Write(e) | WorkerError::Read(e) | WorkerError::Spawn(e) => Some(e),
            WorkerError::Panicked => None,
        }
    }
}

/// What a worker got through before it returned
#[derive(Debug)]
pub struct WorkerOutcome {
    pub assigned: usize,
    pub completed: usize,
    pub error: Option<WorkerError>,
}

impl WorkerOutcome {
    /// Outcome for a worker that never ran to completion on its own.
    pub fn failed(assigned: usize, error: WorkerError) -> Self {
        WorkerOutcome {
            assigned,
            completed: 0,
            error: Some(error),
        }
    }

    fn finished(assigned: usize, completed: usize, error: Option<WorkerError>) -> Self {
        if let Some(ref e) = error {
            error!("{e}");
        }
        WorkerOutcome {
            assigned,
            completed,
            error,
        }
    }
}

/// Connect to `addr` and run `n` probes over blocking std sockets.
pub fn run_blocking(addr: &str, n: usize) -> WorkerOutcome {
    if n == 0 {
        return WorkerOutcome::finished(0, 0, None);
    }

    let stream = match std::net::TcpStream::connect(addr) {
        Ok(stream) => stream,
        Err(source) => {
            let error = WorkerError::Connect {
                addr: addr.to_string(),
                source,
            };
            return WorkerOutcome::finished(n, 0, Some(error));
        }
    };
    let _ = stream.set_nodelay(true);

    // The stream is dropped, and the connection closed, on every return path.
    let (completed, error) = probe_loop(stream, n);
    WorkerOutcome::finished(n, completed, error)
}

/// Drive `n` probe cycles over a blocking stream.
///
/// Returns the number of completed cycles and the failure that stopped the
/// loop early, if any.
pub fn probe_loop<S: Read + Write>(stream: S, n: usize) -> (usize, Option<WorkerError>) {
    let request = probe();
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, stream);

    for completed in 0..n {
        if let Err(e) = reader.get_mut().write_all(&request) {
            return (completed, Some(WorkerError::Write(e)));
        }
        if let Err(e) = skip_line(&mut reader) {
            return (completed, Some(WorkerError::Read(e)));
        }
    }

    (n, None)
}

/// Consume bytes up to and including the next line terminator.
fn skip_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if buf.is_empty() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }

        match find_line_end(buf) {
            Some(end) => {
                reader.consume(end);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Connect to `addr` and run `n` probes over tokio sockets.
pub async fn run_async(addr: String, n: usize) -> WorkerOutcome {
    if n == 0 {
        return WorkerOutcome::finished(0, 0, None);
    }

    let stream = match tokio::net::TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(source) => {
            let error = WorkerError::Connect { addr, source };
            return WorkerOutcome::finished(n, 0, Some(error));
        }
    };
    let _ = stream.set_nodelay(true);

    let (completed, error) = probe_loop_async(stream, n).await;
    WorkerOutcome::finished(n, completed, error)
}

/// Async counterpart of [`probe_loop`].
pub async fn probe_loop_async<S>(stream: S, n: usize) -> (usize, Option<WorkerError>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = probe();
    let mut reader = tokio::io::BufReader::with_capacity(BUFFER_SIZE, stream);

    for completed in 0..n {
        if let Err(e) = reader.get_mut().write_all(&request).await {
            return (completed, Some(WorkerError::Write(e)));
        }
        if let Err(e) = skip_line_async(&mut reader).await {
            return (completed, Some(WorkerError::Read(e)));
        }
    }

    (n, None)
}

async fn skip_line_async<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let (consumed, done) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            match find_line_end(buf) {
                Some(end) => (end, true),
                None => (buf.len(), false),
            }
        };

        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::TcpListener;

    const PONG: &[u8] = b"+PONG\r\n";

    #[derive(Debug, PartialEq)]
    enum Op {
        Write(Vec<u8>),
        Read,
    }

    /// In-memory peer that answers one line per probe and records the order
    /// in which the worker touched it.
    struct ScriptedPeer {
        ops: Vec<Op>,
        pending: VecDeque<u8>,
        reply: &'static [u8],
        fail_write_at: Option<usize>,
        writes: usize,
    }

    impl ScriptedPeer {
        fn new(reply: &'static [u8]) -> Self {
            ScriptedPeer {
                ops: Vec::new(),
                pending: VecDeque::new(),
                reply,
                fail_write_at: None,
                writes: 0,
            }
        }
    }

    impl Write for ScriptedPeer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_write_at == Some(self.writes) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.writes += 1;
            self.ops.push(Op::Write(buf.to_vec()));
            self.pending.extend(self.reply);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedPeer {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.ops.push(Op::Read);
            let n = buf.len().min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    #[test]
    fn test_strict_alternation() {
        let mut peer = ScriptedPeer::new(PONG);
        let (completed, error) = probe_loop(&mut peer, 3);

        assert_eq!(completed, 3);
        assert!(error.is_none());

        let expected: Vec<Op> = (0..3)
            .flat_map(|_| [Op::Write(probe().to_vec()), Op::Read])
            .collect();
        assert_eq!(peer.ops, expected);
    }

    #[test]
    fn test_multi_line_reply_only_consumes_first_line() {
        // The second line stays buffered and answers the second probe.
        let mut peer = ScriptedPeer::new(b"+PONG\r\n+PONG\r\n");
        let (completed, error) = probe_loop(&mut peer, 2);

        assert_eq!(completed, 2);
        assert!(error.is_none());
        assert_eq!(
            peer.ops,
            vec![Op::Write(probe().to_vec()), Op::Read, Op::Write(probe().to_vec())]
        );
    }

    #[test]
    fn test_zero_iterations_touch_nothing() {
        let mut peer = ScriptedPeer::new(PONG);
        let (completed, error) = probe_loop(&mut peer, 0);

        assert_eq!(completed, 0);
        assert!(error.is_none());
        assert!(peer.ops.is_empty());
    }

    #[test]
    fn test_eof_before_terminator_is_read_error() {
        let mut peer = ScriptedPeer::new(b"+PON");
        let (completed, error) = probe_loop(&mut peer, 2);

        assert_eq!(completed, 0);
        match error {
            Some(WorkerError::Read(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_write_failure_stops_worker() {
        let mut peer = ScriptedPeer::new(PONG);
        peer.fail_write_at = Some(2);
        let (completed, error) = probe_loop(&mut peer, 5);

        assert_eq!(completed, 2);
        assert!(matches!(error, Some(WorkerError::Write(_))));
        assert_eq!(peer.writes, 2);
    }

    #[test]
    fn test_zero_assigned_does_not_connect() {
        // Nothing listens on port 1; a connection attempt would fail.
        let outcome = run_blocking("127.0.0.1:1", 0);
        assert_eq!(outcome.completed, 0);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_connect_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let outcome = run_blocking(&addr, 4);
        assert_eq!(outcome.assigned, 4);
        assert_eq!(outcome.completed, 0);
        match outcome.error {
            Some(ref e @ WorkerError::Connect { .. }) => {
                assert!(e.to_string().starts_with(&format!("Error connecting to {addr}: ")));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let write = WorkerError::Write(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(write.to_string().starts_with("Write error: "));

        let read = WorkerError::Read(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(read.to_string().starts_with("Read error: "));
    }

    #[tokio::test]
    async fn test_async_strict_alternation() {
        let request = probe();
        let mock = tokio_test::io::Builder::new()
            .write(&request)
            .read(PONG)
            .write(&request)
            .read(b"+PO")
            .read(b"NG\r\n")
            .write(&request)
            .read(PONG)
            .build();

        let (completed, error) = probe_loop_async(mock, 3).await;
        assert_eq!(completed, 3);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_async_read_error_stops_worker() {
        let request = probe();
        let mock = tokio_test::io::Builder::new()
            .write(&request)
            .read(PONG)
            .write(&request)
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();

        let (completed, error) = probe_loop_async(mock, 5).await;
        assert_eq!(completed, 1);
        match error {
            Some(WorkerError::Read(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_async_zero_assigned_does_not_connect() {
        let outcome = run_async("127.0.0.1:1".to_string(), 0).await;
        assert_eq!(outcome.assigned, 0);
        assert!(outcome.error.is_none());
    }
}
