use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;
use std::ptr;
use std::time::Duration;

use pktwire_transport::{default_sink, Diagnostic, DiagnosticCode, Endpoint, SharedSink};
use tracing::{debug, trace};

use crate::error::{Result, SelectError};

/// Caller-owned output sinks for [`Selector::poll`].
///
/// A disabled (`None`) classification is neither watched nor written.
/// Enabled sinks are cleared at the start of every poll result, including
/// timeouts and failures, so they never hold stale endpoints.
#[derive(Debug, Clone, Default)]
pub struct ReadySets {
    readable: Option<Vec<Endpoint>>,
    writable: Option<Vec<Endpoint>>,
    faulty: Option<Vec<Endpoint>>,
}

impl ReadySets {
    pub fn new(readable: bool, writable: bool, faulty: bool) -> Self {
        let sink = |enabled: bool| enabled.then(Vec::new);
        Self {
            readable: sink(readable),
            writable: sink(writable),
            faulty: sink(faulty),
        }
    }

    pub fn readable_only() -> Self {
        Self::new(true, false, false)
    }

    /// Endpoints found readable by the last poll. Empty when disabled.
    pub fn readable(&self) -> &[Endpoint] {
        self.readable.as_deref().unwrap_or_default()
    }

    pub fn writable(&self) -> &[Endpoint] {
        self.writable.as_deref().unwrap_or_default()
    }

    pub fn faulty(&self) -> &[Endpoint] {
        self.faulty.as_deref().unwrap_or_default()
    }

    pub fn watches_readable(&self) -> bool {
        self.readable.is_some()
    }

    pub fn watches_writable(&self) -> bool {
        self.writable.is_some()
    }

    pub fn watches_faulty(&self) -> bool {
        self.faulty.is_some()
    }

    /// True if at least one classification is enabled.
    pub fn has_target(&self) -> bool {
        self.readable.is_some() || self.writable.is_some() || self.faulty.is_some()
    }

    /// Empty every enabled sink. Disabled sinks stay disabled.
    pub fn clear(&mut self) {
        for sink in [&mut self.readable, &mut self.writable, &mut self.faulty]
            .into_iter()
            .flatten()
        {
            sink.clear();
        }
    }
}

/// Result of a successful [`Selector::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The OS reported this many ready (descriptor, classification) pairs.
    Ready(usize),
    /// The timeout elapsed with nothing ready.
    TimedOut,
}

/// Configuration for a [`Selector`].
#[derive(Debug, Clone, Default)]
pub struct SelectorConfig {
    /// How long `poll` may wait. Zero polls without blocking. Default: zero.
    pub timeout: Duration,
}

/// Readiness multiplexer over tracked endpoints.
///
/// The selector holds a clone of every tracked endpoint, so a descriptor stays
/// open at least until it is removed. Single-threaded; share it behind a lock
/// if needed.
pub struct Selector {
    tracked: Vec<Endpoint>,
    master: libc::fd_set,
    highest_descriptor: Option<RawFd>,
    timeout: Duration,
    sink: SharedSink,
}

impl Selector {
    /// An empty selector with a zero timeout.
    pub fn new() -> Self {
        Self::with_config(SelectorConfig::default(), default_sink())
    }

    pub fn with_config(config: SelectorConfig, sink: SharedSink) -> Self {
        Self {
            tracked: Vec::new(),
            master: empty_set(),
            highest_descriptor: None,
            timeout: config.timeout,
            sink,
        }
    }

    /// Start tracking `endpoint`.
    ///
    /// Rejects an endpoint already tracked and descriptors `select` cannot
    /// represent. Both are reported to the sink.
    pub fn add(&mut self, endpoint: &Endpoint) -> Result<()> {
        let fd = endpoint.descriptor();
        if self.contains(endpoint) {
            return Err(self.reject(endpoint, SelectError::AlreadyTracked { descriptor: fd }));
        }
        if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
            return Err(self.reject(
                endpoint,
                SelectError::DescriptorOutOfRange {
                    descriptor: fd,
                    limit: libc::FD_SETSIZE as usize,
                },
            ));
        }

        // SAFETY: `fd` is in 0..FD_SETSIZE and `master` was initialised by FD_ZERO.
        unsafe { libc::FD_SET(fd, &mut self.master) };
        self.highest_descriptor = Some(self.highest_descriptor.map_or(fd, |h| h.max(fd)));
        self.tracked.push(endpoint.clone());
        trace!(descriptor = fd, tracked = self.tracked.len(), "tracking endpoint");
        Ok(())
    }

    /// Stop tracking `endpoint` and drop the selector's clone of it.
    ///
    /// Returns false if it was not tracked.
    pub fn remove(&mut self, endpoint: &Endpoint) -> bool {
        let Some(index) = self.tracked.iter().position(|e| e == endpoint) else {
            return false;
        };
        let removed = self.tracked.remove(index);
        let fd = removed.descriptor();

        // SAFETY: `fd` passed the range check in `add`.
        unsafe { libc::FD_CLR(fd, &mut self.master) };
        if self.highest_descriptor == Some(fd) {
            self.highest_descriptor = self.tracked.iter().map(Endpoint::descriptor).max();
        }
        trace!(descriptor = fd, tracked = self.tracked.len(), "untracked endpoint");
        true
    }

    /// Stop tracking everything.
    pub fn remove_all(&mut self) {
        self.tracked.clear();
        self.master = empty_set();
        self.highest_descriptor = None;
    }

    /// Wait up to the configured timeout for any tracked endpoint to become
    /// ready, then fill the enabled sinks of `sets` in tracking order.
    pub fn poll(&mut self, sets: &mut ReadySets) -> Result<PollOutcome> {
        if !sets.has_target() {
            self.sink.report(&Diagnostic::new(
                DiagnosticCode::SelectorNoTarget,
                "poll called with no readiness sink configured",
            ));
            return Err(SelectError::NoTarget);
        }

        let mut read = sets.watches_readable().then_some(self.master);
        let mut write = sets.watches_writable().then_some(self.master);
        let mut except = sets.watches_faulty().then_some(self.master);
        let mut timeout = to_timeval(self.timeout);
        let nfds = self.highest_descriptor.map_or(0, |fd| fd + 1);

        // SAFETY: every non-null pointer refers to a live, initialised fd_set
        // on this stack frame, and `nfds` covers only descriptors set by `add`.
        let rc = unsafe {
            libc::select(
                nfds,
                set_ptr(&mut read),
                set_ptr(&mut write),
                set_ptr(&mut except),
                &mut timeout,
            )
        };
        let os_error = (rc < 0).then(io::Error::last_os_error);
        sets.clear();

        if let Some(err) = os_error {
            self.sink.report(&Diagnostic::from_io(DiagnosticCode::SelectorFail, &err));
            return Err(SelectError::Poll(err));
        }
        if rc == 0 {
            self.sink.report(&Diagnostic::new(
                DiagnosticCode::SelectorTimeout,
                format!("no endpoint ready within {:?}", self.timeout),
            ));
            return Ok(PollOutcome::TimedOut);
        }

        collect(&self.tracked, read.as_ref(), &mut sets.readable);
        collect(&self.tracked, write.as_ref(), &mut sets.writable);
        collect(&self.tracked, except.as_ref(), &mut sets.faulty);
        debug!(
            ready = rc,
            readable = sets.readable().len(),
            writable = sets.writable().len(),
            faulty = sets.faulty().len(),
            "poll complete"
        );
        Ok(PollOutcome::Ready(rc as usize))
    }

    /// Zero polls without blocking. There is no "forever"; use a long duration.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Tracked endpoints in insertion order.
    pub fn tracked(&self) -> &[Endpoint] {
        &self.tracked
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.tracked.iter().any(|e| e == endpoint)
    }

    /// Highest tracked descriptor, or `None` when nothing is tracked.
    pub fn highest_descriptor(&self) -> Option<RawFd> {
        self.highest_descriptor
    }

    fn reject(&self, endpoint: &Endpoint, err: SelectError) -> SelectError {
        self.sink.report(
            &Diagnostic::new(DiagnosticCode::SelectorFail, err.to_string())
                .with_endpoint(endpoint.label()),
        );
        err
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("tracked", &self.tracked)
            .field("highest_descriptor", &self.highest_descriptor)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn empty_set() -> libc::fd_set {
    let mut set = MaybeUninit::<libc::fd_set>::uninit();
    // SAFETY: FD_ZERO fully initialises the set before it is read.
    unsafe {
        libc::FD_ZERO(set.as_mut_ptr());
        set.assume_init()
    }
}

fn set_ptr(set: &mut Option<libc::fd_set>) -> *mut libc::fd_set {
    set.as_mut().map_or(ptr::null_mut(), |s| s as *mut libc::fd_set)
}

fn to_timeval(timeout: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    }
}

fn collect(tracked: &[Endpoint], ready: Option<&libc::fd_set>, sink: &mut Option<Vec<Endpoint>>) {
    let (Some(ready), Some(sink)) = (ready, sink.as_mut()) else {
        return;
    };
    for endpoint in tracked {
        // SAFETY: tracked descriptors are all within 0..FD_SETSIZE.
        if unsafe { libc::FD_ISSET(endpoint.descriptor(), ready) } {
            sink.push(endpoint.clone());
        }
    }
}
