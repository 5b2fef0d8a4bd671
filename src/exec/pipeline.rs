//! Query pipeline plumbing: deadlines, cancellation, bounded solution
//! transport, and the blocking-I/O thread pool.
//!
//! Solutions travel over a bounded crossbeam channel (capacity 1) so a slow
//! consumer exerts backpressure on scans. Errors travel on a dedicated
//! channel beside the solutions; consumers must check both. Closing the
//! solution receiver makes the next upstream send fail, which cancels the
//! scan cascade.

use crate::error::{VgError, VgResult};
use crate::term::Solution;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Deadline and cancellation controller for one query.
///
/// Shared across scan threads; execution code calls [`check`] at every
/// suspension point (scan row, channel write, probe).
///
/// [`check`]: QueryDeadline::check
#[derive(Clone)]
pub struct QueryDeadline {
    cancelled: Arc<AtomicBool>,
    start: Instant,
    timeout: Option<Duration>,
}

impl QueryDeadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        QueryDeadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
            timeout,
        }
    }

    /// No deadline; cancellation only
    pub fn unbounded() -> Self {
        QueryDeadline::new(None)
    }

    /// Ok to continue, or the terminal error to propagate
    pub fn check(&self) -> VgResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(VgError::Cancelled);
        }
        if let Some(timeout) = self.timeout {
            let elapsed = self.start.elapsed();
            if elapsed > timeout {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(VgError::QueryTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl Default for QueryDeadline {
    fn default() -> Self {
        QueryDeadline::new(Some(Duration::from_secs(60)))
    }
}

/// Cancels the associated query from another thread
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Fixed thread pool for blocking Iceberg I/O.
///
/// Scans must not run on the consumer's thread: parquet reads block, and a
/// single slow table would starve other queries sharing the process.
pub struct IoPool {
    tx: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

impl IoPool {
    /// At least two workers, so a build-side scan cannot deadlock a
    /// probe-side scan waiting on channel capacity.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(2);
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let handles = (0..workers)
            .map(|i| {
                let rx: Receiver<Job> = rx.clone();
                thread::Builder::new()
                    .name(format!("vgraph-io-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn I/O worker")
            })
            .collect();
        IoPool {
            tx: Some(tx),
            workers: handles,
        }
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            // receiver outlives senders; only fails after shutdown
            let _ = tx.send(Box::new(job));
        }
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Producer side of a solution pipeline
pub struct SolutionSink {
    tx: Sender<Solution>,
    deadline: QueryDeadline,
}

impl SolutionSink {
    /// Blocking send with backpressure. Fails with `Cancelled` when the
    /// consumer has gone away, which terminates the producing scan.
    pub fn send(&self, solution: Solution) -> VgResult<()> {
        let mut pending = solution;
        loop {
            self.deadline.check()?;
            match self.tx.send_timeout(pending, Duration::from_millis(50)) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(_)) => return Err(VgError::Cancelled),
                Err(SendTimeoutError::Timeout(back)) => pending = back,
            }
        }
    }
}

/// Consumer side of a streaming query.
///
/// Solutions and errors arrive on separate channels; [`collect`] drains
/// both and surfaces the first error. Dropping the stream cancels the
/// producer.
///
/// [`collect`]: SolutionStream::collect
pub struct SolutionStream {
    solutions: Receiver<Solution>,
    errors: Receiver<VgError>,
    cancel: CancelHandle,
}

impl SolutionStream {
    /// Run a producer on its own thread with bounded-capacity transport
    pub fn spawn<F>(deadline: QueryDeadline, producer: F) -> Self
    where
        F: FnOnce(&SolutionSink) -> VgResult<()> + Send + 'static,
    {
        let (stream, job) = Self::prepare(deadline, producer);
        thread::Builder::new()
            .name("vgraph-query".to_string())
            .spawn(job)
            .expect("failed to spawn query thread");
        stream
    }

    /// Run a producer on the blocking-I/O pool instead of a fresh thread
    pub fn spawn_on<F>(pool: &IoPool, deadline: QueryDeadline, producer: F) -> Self
    where
        F: FnOnce(&SolutionSink) -> VgResult<()> + Send + 'static,
    {
        let (stream, job) = Self::prepare(deadline, producer);
        pool.execute(job);
        stream
    }

    fn prepare<F>(deadline: QueryDeadline, producer: F) -> (Self, impl FnOnce() + Send + 'static)
    where
        F: FnOnce(&SolutionSink) -> VgResult<()> + Send + 'static,
    {
        let (sol_tx, sol_rx) = bounded::<Solution>(1);
        let (err_tx, err_rx) = bounded::<VgError>(1);
        let cancel = deadline.cancel_handle();

        let sink = SolutionSink {
            tx: sol_tx,
            deadline,
        };
        let job = move || {
            if let Err(e) = producer(&sink) {
                // consumer gone is not an error to report
                if !matches!(e, VgError::Cancelled) {
                    let _ = err_tx.send(e);
                }
            }
        };

        (
            SolutionStream {
                solutions: sol_rx,
                errors: err_rx,
                cancel,
            },
            job,
        )
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain every solution, then surface any producer error
    pub fn collect(self) -> VgResult<Vec<Solution>> {
        let mut out = Vec::new();
        for solution in self.solutions.iter() {
            out.push(solution);
        }
        match self.errors.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(out),
        }
    }

    /// Streaming access; the caller must still check [`take_error`]
    /// after the iterator ends.
    ///
    /// [`take_error`]: SolutionStream::take_error
    pub fn iter(&self) -> impl Iterator<Item = Solution> + '_ {
        self.solutions.iter()
    }

    pub fn take_error(&self) -> Option<VgError> {
        self.errors.try_recv().ok()
    }
}

impl Drop for SolutionStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{Scalar, Term};

    fn solution(n: i64) -> Solution {
        let mut s = Solution::new();
        s.bind("n", Term::Literal(Scalar::Long(n)));
        s
    }

    #[test]
    fn test_deadline_not_exceeded() {
        let deadline = QueryDeadline::new(Some(Duration::from_secs(10)));
        assert!(deadline.check().is_ok());
    }

    #[test]
    fn test_deadline_exceeded() {
        let deadline = QueryDeadline::new(Some(Duration::from_millis(5)));
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            deadline.check(),
            Err(VgError::QueryTimeout { .. })
        ));
    }

    #[test]
    fn test_cancel_handle() {
        let deadline = QueryDeadline::unbounded();
        let handle = deadline.cancel_handle();
        assert!(deadline.check().is_ok());
        handle.cancel();
        assert!(matches!(deadline.check(), Err(VgError::Cancelled)));
    }

    #[test]
    fn test_stream_collects_solutions() {
        let stream = SolutionStream::spawn(QueryDeadline::unbounded(), |sink| {
            for i in 0..5 {
                sink.send(solution(i))?;
            }
            Ok(())
        });
        let solutions = stream.collect().unwrap();
        assert_eq!(solutions.len(), 5);
    }

    #[test]
    fn test_stream_surfaces_error() {
        let stream = SolutionStream::spawn(QueryDeadline::unbounded(), |sink| {
            sink.send(solution(1))?;
            Err(VgError::NotFound("boom".to_string()))
        });
        assert!(matches!(stream.collect(), Err(VgError::NotFound(_))));
    }

    #[test]
    fn test_dropping_stream_cancels_producer() {
        let (done_tx, done_rx) = bounded::<VgResult<()>>(1);
        let stream = SolutionStream::spawn(QueryDeadline::unbounded(), move |sink| {
            let mut result = Ok(());
            for i in 0..1_000_000 {
                if let Err(e) = sink.send(solution(i)) {
                    result = Err(e);
                    break;
                }
            }
            let _ = done_tx.send(result);
            Ok(())
        });

        // consume one solution then drop the stream
        let first = stream.solutions.recv().unwrap();
        assert_eq!(first, solution(0));
        drop(stream);

        let producer_result = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("producer should finish");
        assert!(matches!(producer_result, Err(VgError::Cancelled)));
    }

    #[test]
    fn test_io_pool_runs_jobs() {
        let pool = IoPool::new(2);
        let (tx, rx) = bounded(4);
        for i in 0..4 {
            let tx = tx.clone();
            pool.execute(move || {
                let _ = tx.send(i);
            });
        }
        let mut seen: Vec<i32> = (0..4).map(|_| rx.recv().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
