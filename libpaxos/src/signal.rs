//! Termination signals for the learner loop.
//!
//! A [`SignalSource`] is armed once the learner handle exists and yields a
//! [`TerminationSignal`] that the loop polls next to the engine. Receiving a
//! signal only requests a stop; the loop itself decides when to exit.
//!
//! Three sources are provided:
//!
//! | Source | Fires on |
//! |--------|----------|
//! | [`Interrupt`] | Process interrupt (`SIGINT`, ctrl-c on non-unix) |
//! | [`ManualSignal`] | [`SignalTrigger::raise`], from any thread |
//! | [`NoSignal`] | Never |
//!
//! The process interrupt is process-global, so at most one
//! [`InterruptSignal`] may be armed at a time. Concurrent lifecycle runs in
//! the same process have to coordinate which one owns it; the others should
//! use [`ManualSignal`] or [`NoSignal`].
//!
//! Process dispositions touched here (`SIGINT` while an [`InterruptSignal`]
//! is armed, `SIGPIPE` while a [`BrokenPipeGuard`] lives) are put back to
//! what they were before once the owner is dropped.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SignalError;

/// A termination signal bound to a running loop.
#[async_trait(?Send)]
pub trait TerminationSignal {
    /// Wait for the next signal.
    ///
    /// Returns `None` once the source can no longer fire.
    async fn recv(&mut self) -> Option<()>;
}

/// Something that can be armed into a [`TerminationSignal`].
pub trait SignalSource {
    /// The armed signal type.
    type Signal: TerminationSignal;

    /// Register interest in the signal.
    ///
    /// Must be called from within the reactor's runtime context.
    ///
    /// # Errors
    ///
    /// Returns `SignalError` if the signal cannot be registered.
    fn arm(self) -> Result<Self::Signal, SignalError>;
}

/// Process-wide slot held by the armed [`InterruptSignal`].
static INTERRUPT_SUBSCRIBED: AtomicBool = AtomicBool::new(false);

/// Source for the process interrupt signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interrupt;

impl SignalSource for Interrupt {
    type Signal = InterruptSignal;

    fn arm(self) -> Result<InterruptSignal, SignalError> {
        InterruptSignal::subscribe()
    }
}

/// The armed process interrupt.
///
/// Holds the process-wide subscription slot until dropped, then restores
/// the `SIGINT` disposition found when it was armed.
#[derive(Debug)]
pub struct InterruptSignal {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
    #[cfg(unix)]
    previous: Disposition,
}

/// Tokio's `SIGINT` action, captured after its first registration.
///
/// Tokio installs its handler once per process, so later arms reinstall it
/// from here after a previous release put the old disposition back.
#[cfg(unix)]
static TOKIO_INTERRUPT_ACTION: std::sync::Mutex<Option<Disposition>> =
    std::sync::Mutex::new(None);

impl InterruptSignal {
    /// Take the process interrupt subscription.
    ///
    /// # Errors
    ///
    /// Returns `AlreadySubscribed` if another `InterruptSignal` is alive, or
    /// `Register` if the OS registration fails.
    pub fn subscribe() -> Result<Self, SignalError> {
        if INTERRUPT_SUBSCRIBED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SignalError::AlreadySubscribed);
        }

        #[cfg(unix)]
        {
            match Self::register() {
                Ok(signal) => {
                    debug!("interrupt signal armed");
                    Ok(signal)
                }
                Err(e) => {
                    INTERRUPT_SUBSCRIBED.store(false, Ordering::Release);
                    Err(SignalError::Register(e))
                }
            }
        }

        #[cfg(not(unix))]
        {
            debug!("interrupt signal armed");
            Ok(Self {})
        }
    }

    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        use std::sync::PoisonError;
        use tokio::signal::unix::{SignalKind, signal};

        let previous = Disposition::current(libc::SIGINT)?;
        let inner = signal(SignalKind::interrupt())?;

        let mut tokio_action = TOKIO_INTERRUPT_ACTION
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let captured = *tokio_action;
        match captured {
            Some(action) => action.install()?,
            None => *tokio_action = Some(Disposition::current(libc::SIGINT)?),
        }

        Ok(Self { inner, previous })
    }

    /// Whether some `InterruptSignal` currently owns the process interrupt.
    pub fn is_subscribed() -> bool {
        INTERRUPT_SUBSCRIBED.load(Ordering::Acquire)
    }
}

impl Drop for InterruptSignal {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Err(e) = self.previous.install() {
            warn!(error = %e, "could not restore the interrupt disposition");
        }
        INTERRUPT_SUBSCRIBED.store(false, Ordering::Release);
        debug!("interrupt signal released");
    }
}

#[async_trait(?Send)]
impl TerminationSignal for InterruptSignal {
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<()> {
        self.inner.recv().await
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<()> {
        tokio::signal::ctrl_c().await.ok()
    }
}

/// A signal raised programmatically through a [`SignalTrigger`].
#[derive(Debug)]
pub struct ManualSignal {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Raises a [`ManualSignal`]. Cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct SignalTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualSignal {
    /// Create a signal and its trigger.
    pub fn new() -> (Self, SignalTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, SignalTrigger { tx })
    }
}

impl SignalTrigger {
    /// Raise the signal.
    ///
    /// Returns `false` if the signal has already been released.
    pub fn raise(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl SignalSource for ManualSignal {
    type Signal = ManualSignal;

    fn arm(self) -> Result<ManualSignal, SignalError> {
        Ok(self)
    }
}

#[async_trait(?Send)]
impl TerminationSignal for ManualSignal {
    async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// A source that never fires. Stops must come from a [`crate::StopHandle`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignal;

impl SignalSource for NoSignal {
    type Signal = NoSignal;

    fn arm(self) -> Result<NoSignal, SignalError> {
        Ok(self)
    }
}

#[async_trait(?Send)]
impl TerminationSignal for NoSignal {
    async fn recv(&mut self) -> Option<()> {
        None
    }
}

/// Ignores `SIGPIPE` while alive, restoring the previous disposition on drop.
///
/// A peer disconnect then surfaces as an `EPIPE` write error instead of
/// killing the process.
#[derive(Debug)]
pub struct BrokenPipeGuard {
    #[cfg(unix)]
    previous: Option<Disposition>,
}

impl BrokenPipeGuard {
    /// Install the ignore disposition.
    pub fn install() -> Self {
        #[cfg(unix)]
        {
            let installed = Disposition::current(libc::SIGPIPE).and_then(|previous| {
                Disposition::ignore(libc::SIGPIPE).install()?;
                Ok(previous)
            });
            match installed {
                Ok(previous) => {
                    debug!("broken-pipe signal ignored");
                    Self {
                        previous: Some(previous),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "could not ignore the broken-pipe signal");
                    Self { previous: None }
                }
            }
        }

        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for BrokenPipeGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(previous) = &self.previous {
            if let Err(e) = previous.install() {
                warn!(error = %e, "could not restore the broken-pipe disposition");
            }
        }
    }
}

/// Snapshot of one signal's `sigaction`.
#[cfg(unix)]
#[derive(Clone, Copy)]
struct Disposition {
    signum: libc::c_int,
    action: libc::sigaction,
}

#[cfg(unix)]
impl Disposition {
    fn current(signum: libc::c_int) -> std::io::Result<Self> {
        // SAFETY: `sigaction` is plain data; all-zero is a valid value to
        // be overwritten by the query below.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        // SAFETY: a null new action only reads the current one.
        let rc = unsafe { libc::sigaction(signum, std::ptr::null(), &mut action) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { signum, action })
    }

    fn ignore(signum: libc::c_int) -> Self {
        // SAFETY: as above; an empty mask with SIG_IGN is a complete action.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = libc::SIG_IGN;
        // SAFETY: `sa_mask` is a valid, owned sigset.
        unsafe { libc::sigemptyset(&mut action.sa_mask) };
        Self { signum, action }
    }

    fn install(&self) -> std::io::Result<()> {
        // SAFETY: `action` was read back from the kernel or built by `ignore`.
        let rc = unsafe { libc::sigaction(self.signum, &self.action, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(unix)]
impl std::fmt::Debug for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposition")
            .field("signum", &self.signum)
            .field("handler", &self.action.sa_sigaction)
            .finish()
    }
}
