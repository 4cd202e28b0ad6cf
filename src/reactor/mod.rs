//! The I/O service (§4.1): a single-threaded readiness reactor. Grounded
//! directly on `original_source/io-service/io-service.c`
//! (`io_service_init`/`post_job`/`remove_job`/`run`/`stop`/`deinit`), with
//! the descriptor table reshaped from an intrusive list into an fd-keyed
//! map per §9 Design Notes, and the teacher's `Poll`/`Registry` split
//! (`src/poll.rs`) as the model for "fallible construction, infallible
//! runtime operations".

mod job;
mod selector;
mod table;
mod waker;

pub use job::{Direction, JobId};

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;

use job::Job;
use selector::Selector;
use table::DescriptorTable;
use waker::Waker;

/// Initial capacity hint for the descriptor table (§ SPEC_FULL.md
/// Configuration). The reactor dispatches at most one event per wake by
/// design (§4.1), so there is no events buffer to size the way the
/// teacher's `Events::with_capacity` does; this instead pre-sizes the
/// fd-keyed map to avoid early rehashing for typical workloads.
pub const DEFAULT_TABLE_CAPACITY: usize = 128;

struct Inner {
    allow_new: bool,
    running: bool,
    table: DescriptorTable,
    /// Persistent jobs currently out of `table` for the duration of their own
    /// callback invocation, keyed by the slot they'll return to. Lets
    /// `remove` reach a job that a concurrent dispatch already took out.
    in_flight: HashMap<(RawFd, Direction), JobId>,
    /// `(fd, direction, id)` triples that `remove` matched against
    /// `in_flight` rather than the table; checked by `dispatch_direction`
    /// after the callback returns to decide whether to skip reinsertion.
    cancelled_in_flight: HashSet<(RawFd, Direction, JobId)>,
}

/// A single-threaded epoll reactor (§4.1). Safe to share across threads:
/// [`Reactor::post`], [`Reactor::remove`], and [`Reactor::stop`] may be
/// called from any thread; [`Reactor::run`] must be called from exactly one
/// thread at a time (§4.1, §5).
pub struct Reactor {
    inner: Mutex<Inner>,
    selector: Selector,
    waker: Waker,
}

impl Reactor {
    /// Creates the wait-set, the notification channel, and an empty
    /// descriptor table; registers the notification channel for
    /// read-readiness. Corresponds to `io_service_init`.
    ///
    /// Construction failures roll back what was already created, in reverse
    /// acquisition order, per §7.
    pub fn new() -> io::Result<Reactor> {
        Reactor::with_capacity(DEFAULT_TABLE_CAPACITY)
    }

    pub fn with_capacity(table_capacity: usize) -> io::Result<Reactor> {
        let selector = Selector::new()?;
        let waker = match Waker::new() {
            Ok(w) => w,
            Err(e) => return Err(e),
        };

        if let Err(e) = selector.add(waker.as_raw_fd(), libc::EPOLLIN as u32) {
            // selector is dropped here, closing the epoll fd; waker drops too.
            return Err(e);
        }

        log::debug!("reactor initialized (table capacity hint {table_capacity})");

        Ok(Reactor {
            inner: Mutex::new(Inner {
                allow_new: true,
                running: false,
                table: DescriptorTable::with_capacity(table_capacity),
                in_flight: HashMap::new(),
                cancelled_in_flight: HashSet::new(),
            }),
            selector,
            waker,
        })
    }

    /// Adds an intent for `(fd, direction)`. A silent no-op if the reactor
    /// has stopped accepting new work, or if a job is already registered for
    /// that `(fd, direction)` pair (§4.1 `post`; the original never
    /// overwrites an occupied slot — see DESIGN.md Open Question 4 for how
    /// this crate exposes cancellation instead of raw function-pointer
    /// identity).
    pub fn post<F>(&self, fd: RawFd, direction: Direction, oneshot: bool, job: F) -> JobId
    where
        F: FnMut(RawFd, Direction) + Send + 'static,
    {
        let id = JobId::next();
        let mut guard = self.inner.lock().unwrap();

        if !guard.allow_new {
            log::trace!("post({fd}, {direction:?}) refused: reactor no longer accepts new work");
            return id;
        }

        let entry = guard.table.entry(fd);
        let filled = entry.fill_if_empty(direction, Job::new(id, oneshot, job));

        if filled {
            log::trace!("posted job {id:?} on fd {fd} for {direction:?} (oneshot={oneshot})");
            if guard.running {
                let _ = self.waker.wake();
            }
        } else {
            log::trace!("post({fd}, {direction:?}) refused: slot already occupied");
        }

        id
    }

    /// Cancels the intent `id` previously returned by [`Reactor::post`] for
    /// `(fd, direction)`, if it is still pending. A silent no-op otherwise
    /// (§4.1 `remove`). This also reaches a persistent job whose own
    /// callback is executing right now: such a job is briefly out of the
    /// table (see `dispatch_direction`), so the match falls through to
    /// `in_flight` and the cancellation is recorded for `dispatch_direction`
    /// to honor once the callback returns, instead of being silently lost.
    pub fn remove(&self, fd: RawFd, direction: Direction, id: JobId) {
        let mut guard = self.inner.lock().unwrap();

        let matched_in_table = guard
            .table
            .get_mut(fd)
            .and_then(|entry| {
                if entry.job(direction).map(|j| j.id) == Some(id) {
                    entry.take(direction);
                    Some(())
                } else {
                    None
                }
            })
            .is_some();

        let matched_in_flight = !matched_in_table
            && guard.in_flight.get(&(fd, direction)) == Some(&id)
            && guard.cancelled_in_flight.insert((fd, direction, id));

        if matched_in_table || matched_in_flight {
            log::trace!("removed job {id:?} on fd {fd} for {direction:?}");
            if guard.running {
                let _ = self.waker.wake();
            }
        }
    }

    /// Requests shutdown (§4.1 `stop`). If `wait_pending` is true, the
    /// reactor refuses new work but drains existing oneshots until the
    /// descriptor table is empty before `run` returns; if false, `run`
    /// returns at the next loop iteration regardless of pending work.
    pub fn stop(&self, wait_pending: bool) {
        let mut guard = self.inner.lock().unwrap();
        guard.allow_new = false;
        guard.running = wait_pending;
        log::debug!("stop requested (wait_pending={wait_pending})");
        let _ = self.waker.wake();
    }

    /// Runs the reactor loop until it terminates (§4.1). Must be called
    /// from exactly one thread at a time; this is a logic contract, not one
    /// this type enforces at runtime (the original does not either).
    pub fn run(&self) -> io::Result<()> {
        {
            let mut guard = self.inner.lock().unwrap();
            for fd in guard.table.fds() {
                let mask = guard.table.get_mut(fd).expect("fd from fds() always present").readiness_mask();
                let _ = self.selector.add(fd, mask);
            }
            guard.running = true;
        }

        log::debug!("reactor loop starting");

        loop {
            if !self.inner.lock().unwrap().running {
                break;
            }

            let event = match self.selector.wait_one(None) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(_) => continue,
            };

            if event.fd == self.waker.as_raw_fd() {
                let mut guard = self.inner.lock().unwrap();
                self.handle_notification(&mut guard);
                continue;
            }

            for direction in Direction::ALL {
                self.dispatch_direction(event, direction);
            }
        }

        log::debug!("reactor loop exited");
        Ok(())
    }

    fn handle_notification(&self, guard: &mut Inner) {
        let _ = self.waker.drain_one();

        if !guard.allow_new && guard.table.is_empty() {
            guard.running = false;
        }

        for fd in guard.table.fds() {
            let empty = guard.table.get_mut(fd).expect("fd from fds() always present").is_empty();
            if empty {
                self.selector.remove(fd);
                guard.table.remove(fd);
            } else {
                let mask = guard.table.get_mut(fd).expect("fd from fds() always present").readiness_mask();
                if let Err(e) = self.selector.modify_or_add(fd, mask) {
                    log::trace!("subscription update for fd {fd} failed: {e}");
                }
            }
        }
    }

    /// Locates, dispatches, and (for persistent jobs) restores the intent
    /// for `(event.fd, direction)`, if the event carries that direction and
    /// a job is registered for it (§4.1 step 4). Each call takes the mutex
    /// twice — once to take the job out, once to restore it if persistent —
    /// releasing it for the callback invocation in between, so a callback is
    /// free to call [`Reactor::post`]/[`Reactor::remove`]/[`Reactor::stop`]
    /// on its own reactor.
    ///
    /// A persistent job is recorded in `in_flight` while its own invocation
    /// runs, so a [`Reactor::remove`] racing against that exact window (even
    /// from inside the callback itself) still cancels it: the job is simply
    /// not reinserted once the callback returns. See DESIGN.md.
    fn dispatch_direction(&self, event: selector::RawEvent, direction: Direction) {
        let interested = match direction {
            Direction::Read => event.is_readable(),
            Direction::Write => event.is_writable(),
        };
        if !interested {
            return;
        }

        let job = {
            let mut guard = self.inner.lock().unwrap();
            let job = match guard.table.get_mut(event.fd).and_then(|entry| entry.take(direction)) {
                Some(job) => job,
                None => return,
            };

            if job.oneshot {
                let should_remove = guard
                    .table
                    .get_mut(event.fd)
                    .map(|entry| entry.is_empty())
                    .unwrap_or(false);
                if should_remove {
                    self.selector.remove(event.fd);
                    guard.table.remove(event.fd);
                }
            } else {
                guard.in_flight.insert((event.fd, direction), job.id);
            }

            job
        };

        let Job { id, oneshot, mut callback } = job;
        callback(event.fd, direction);

        if !oneshot {
            let mut guard = self.inner.lock().unwrap();
            guard.in_flight.remove(&(event.fd, direction));
            let cancelled = guard.cancelled_in_flight.remove(&(event.fd, direction, id));
            if !cancelled {
                guard
                    .table
                    .entry(event.fd)
                    .fill_if_empty(direction, Job { id, oneshot, callback });
            } else {
                log::trace!(
                    "persistent job {id:?} on fd {} for {direction:?} cancelled mid-dispatch, not reinserted",
                    event.fd
                );
            }
        }
    }
}
