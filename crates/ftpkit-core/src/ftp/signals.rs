//! Interrupt escalation, hangup handling and deadlines.
//!
//! An [`InterruptHandle`] is shared between the OS signal listener and the
//! session. Interrupts only bump a counter and wake waiters; whoever is
//! blocked (a reply read, a data-channel wait) notices and unwinds with an
//! ordinary `Err`. The outer command loop maps that to a restart.

use crate::ftp::error::{FtpError, FtpResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// What a burst of interrupts does while a given operation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptPolicy {
    /// Waiting for a command reply: warn at 2, cancel at 3.
    Abort,
    /// Transferring: the first interrupt aborts the transfer gracefully,
    /// warn at 3, close the connection at 4.
    Close,
    /// Cancel on the first interrupt.
    Jump,
}

impl InterruptPolicy {
    fn warn_at(self) -> Option<usize> {
        match self {
            Self::Abort => Some(2),
            Self::Close => Some(3),
            Self::Jump => None,
        }
    }

    fn escalate_at(self) -> usize {
        match self {
            Self::Abort => 3,
            Self::Close => 4,
            Self::Jump => 1,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Abort => 0,
            Self::Close => 1,
            Self::Jump => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Close,
            2 => Self::Jump,
            _ => Self::Abort,
        }
    }
}

/// Outcome of delivering one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Hangup already received; interrupts no longer count.
    Ignored,
    Counted(usize),
    /// One short of escalation.
    Warned(usize),
    /// The blocked operation must unwind to the command loop.
    Restart(InterruptPolicy),
    /// Hangup during a transfer: keep going without a terminal.
    Background,
    /// No restart point (or hangup while idle): the process should exit.
    Exit,
}

#[derive(Debug)]
struct Inner {
    count: AtomicUsize,
    policy: AtomicU8,
    hangup: AtomicBool,
    in_transfer: AtomicBool,
    restart_point: AtomicBool,
    escalated: AtomicBool,
    notify: Notify,
}

/// Shared interrupt state; cheap to clone.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    inner: Arc<Inner>,
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                count: AtomicUsize::new(0),
                policy: AtomicU8::new(InterruptPolicy::Abort.to_u8()),
                hangup: AtomicBool::new(false),
                in_transfer: AtomicBool::new(false),
                restart_point: AtomicBool::new(true),
                escalated: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn policy(&self) -> InterruptPolicy {
        InterruptPolicy::from_u8(self.inner.policy.load(Ordering::SeqCst))
    }

    /// Install `policy`, returning the previous one.
    pub fn set_policy(&self, policy: InterruptPolicy) -> InterruptPolicy {
        InterruptPolicy::from_u8(self.inner.policy.swap(policy.to_u8(), Ordering::SeqCst))
    }

    /// Whether a command loop exists to unwind to.
    pub fn set_restart_point(&self, present: bool) {
        self.inner.restart_point.store(present, Ordering::SeqCst);
    }

    pub fn set_in_transfer(&self, on: bool) {
        self.inner.in_transfer.store(on, Ordering::SeqCst);
    }

    pub fn in_transfer(&self) -> bool {
        self.inner.in_transfer.load(Ordering::SeqCst)
    }

    /// Deliver one interrupt.
    pub fn interrupt(&self) -> Escalation {
        if self.hangup_received() {
            return Escalation::Ignored;
        }
        let n = self.inner.count.fetch_add(1, Ordering::SeqCst) + 1;
        let policy = self.policy();
        log::debug!("interrupt #{} under {:?} policy", n, policy);

        let outcome = if n >= policy.escalate_at() {
            if self.inner.restart_point.load(Ordering::SeqCst) {
                self.inner.escalated.store(true, Ordering::SeqCst);
                Escalation::Restart(policy)
            } else {
                Escalation::Exit
            }
        } else if policy.warn_at() == Some(n) {
            match policy {
                InterruptPolicy::Close => {
                    log::warn!("Interrupt received again, one more to close connection")
                }
                _ => log::warn!("Interrupt received again, one more to abort command"),
            }
            Escalation::Warned(n)
        } else {
            Escalation::Counted(n)
        };
        self.inner.notify.notify_waiters();
        outcome
    }

    /// Deliver a hangup.
    pub fn hangup(&self) -> Escalation {
        self.inner.hangup.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        if self.in_transfer() {
            log::warn!("Hangup received, continuing transfer in background...");
            Escalation::Background
        } else {
            Escalation::Exit
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.count() > 0
    }

    pub fn hangup_received(&self) -> bool {
        self.inner.hangup.load(Ordering::SeqCst)
    }

    /// An escalation asked the blocked operation to unwind.
    pub fn escalation_pending(&self) -> bool {
        self.inner.escalated.load(Ordering::SeqCst)
    }

    /// Clear the counter; done once per command-loop iteration.
    pub fn reset(&self) {
        self.inner.count.store(0, Ordering::SeqCst);
        self.inner.escalated.store(false, Ordering::SeqCst);
    }

    /// Resolves on the next interrupt or hangup.
    pub async fn notified(&self) {
        self.inner.notify.notified().await
    }

    /// Resolves once an escalation is pending. Never resolves otherwise.
    pub async fn escalated(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.escalation_pending() {
                return;
            }
            notified.await;
        }
    }
}

/// Run `fut` under an optional deadline; `what` names it in the error.
pub async fn with_deadline<F, T>(limit: Option<Duration>, what: &str, fut: F) -> FtpResult<T>
where
    F: Future<Output = FtpResult<T>>,
{
    match limit {
        None => fut.await,
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(r) => r,
            Err(_) => Err(FtpError::timeout(format!(
                "{} timed out after {} seconds",
                what,
                d.as_secs()
            ))),
        },
    }
}

/// Forward SIGINT (and SIGHUP on unix) to `handle`. The task finishes with
/// `Ok(())` once an escalation asks for the process to exit.
pub fn spawn_signal_listener(handle: InterruptHandle) -> tokio::task::JoinHandle<FtpResult<()>> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut hup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .map_err(|e| FtpError::io_error(format!("cannot listen for SIGHUP: {}", e)))?;

        loop {
            #[cfg(unix)]
            let escalation = tokio::select! {
                r = tokio::signal::ctrl_c() => {
                    r.map_err(|e| FtpError::io_error(format!("cannot listen for SIGINT: {}", e)))?;
                    handle.interrupt()
                }
                _ = hup.recv() => handle.hangup(),
            };
            #[cfg(not(unix))]
            let escalation = {
                tokio::signal::ctrl_c()
                    .await
                    .map_err(|e| FtpError::io_error(format!("cannot listen for SIGINT: {}", e)))?;
                handle.interrupt()
            };

            if escalation == Escalation::Exit {
                log::info!("exit requested by signal");
                return Ok(());
            }
        }
    })
}
