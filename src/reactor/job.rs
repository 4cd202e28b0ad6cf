use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

/// The readiness direction a job is interested in (§3 Intent direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub(crate) const ALL: [Direction; 2] = [Direction::Read, Direction::Write];

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Read => 0,
            Direction::Write => 1,
        }
    }
}

/// Identity handle returned by [`crate::Reactor::post`], used by
/// [`crate::Reactor::remove`] to cancel exactly the job it names.
///
/// The original C `io_service_remove_job` matches on the raw `(job_fn, ctx)`
/// function-pointer pair; Rust closures have no such portable identity, so
/// `post` hands back this monotonic id instead (see DESIGN.md, Open
/// Question 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

impl JobId {
    pub(crate) fn next() -> JobId {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One intent: a callback to invoke for `(fd, direction)`, oneshot or
/// persistent (§3 Job entity).
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) oneshot: bool,
    pub(crate) callback: Box<dyn FnMut(RawFd, Direction) + Send>,
}

impl Job {
    pub(crate) fn new<F>(id: JobId, oneshot: bool, callback: F) -> Job
    where
        F: FnMut(RawFd, Direction) + Send + 'static,
    {
        Job {
            id,
            oneshot,
            callback: Box::new(callback),
        }
    }
}
