//! Exit trap for the embedded engine
//!
//! The engine expects to end the host process when it is done. Instead of
//! letting it do that, the engine is handed an [`ExitHandle`] whose exit
//! request is recorded as an [`ExitSignal`] on the owning [`ExitTrap`]. While
//! a trap is installed, a process-wide panic hook swallows the benign unwinds
//! that engine threads raise when they stop through [`ExitHandle::terminate`]
//! with status `0`, and logs every other fault.

use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};

type FaultHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// Set while any trap in the process is installed. The panic hook is global,
/// so only one install may be outstanding at a time.
static TRAP_SLOT: AtomicBool = AtomicBool::new(false);

/// Hook saved by a fault handler that could not be uninstalled because it
/// was released on a panicking thread. The next install puts it back.
static STRANDED_HOOK: Mutex<Option<SavedHook>> = Mutex::new(None);

type SavedHook = Arc<Mutex<Option<FaultHook>>>;

/// Exit trap errors
#[derive(Error, Debug)]
pub enum TrapError {
    #[error("An exit trap is already installed in this process")]
    AlreadyInstalled,
}

/// A termination request intercepted from the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitSignal {
    code: i32,
}

impl ExitSignal {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    /// Status code the engine asked the process to exit with
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Whether this is a normal, expected completion
    pub fn is_normal(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit({})", self.code)
    }
}

struct TrapState {
    armed: AtomicBool,
    generation: AtomicU64,
    signal: watch::Sender<Option<ExitSignal>>,
    installs: AtomicUsize,
    restores: AtomicUsize,
}

/// Context object owning the exit interception state for a batch.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct ExitTrap {
    state: Arc<TrapState>,
}

impl Default for ExitTrap {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitTrap {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TrapState {
                armed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                signal: watch::channel(None).0,
                installs: AtomicUsize::new(0),
                restores: AtomicUsize::new(0),
            }),
        }
    }

    /// Install the trap and the fault handler.
    ///
    /// The returned guard restores the previous fault handler when dropped,
    /// on every exit path.
    pub fn install(&self) -> Result<TrapGuard<'_>, TrapError> {
        if TRAP_SLOT
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TrapError::AlreadyInstalled);
        }

        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.signal.send_replace(None);
        let receiver = self.state.signal.subscribe();
        self.state.armed.store(true, Ordering::SeqCst);

        let fault_handler = FaultHandler::install();
        self.state.installs.fetch_add(1, Ordering::SeqCst);
        debug!("Exit trap installed (generation {})", generation);

        Ok(TrapGuard {
            trap: self,
            generation,
            receiver,
            fault_handler,
        })
    }

    /// Whether this trap is currently installed
    pub fn is_installed(&self) -> bool {
        self.state.armed.load(Ordering::SeqCst)
    }

    /// Number of completed installs
    pub fn installs(&self) -> usize {
        self.state.installs.load(Ordering::SeqCst)
    }

    /// Number of completed restores
    pub fn restores(&self) -> usize {
        self.state.restores.load(Ordering::SeqCst)
    }
}

/// Scoped installation of an [`ExitTrap`]
pub struct TrapGuard<'a> {
    trap: &'a ExitTrap,
    generation: u64,
    receiver: watch::Receiver<Option<ExitSignal>>,
    fault_handler: FaultHandler,
}

impl TrapGuard<'_> {
    /// Handle to give to the engine for this installation
    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            state: self.trap.state.clone(),
            generation: self.generation,
        }
    }

    /// Signal recorded so far, if any
    pub fn signal(&self) -> Option<ExitSignal> {
        *self.receiver.borrow()
    }

    /// Wait until the engine requests termination.
    ///
    /// Cancel safe: dropping the future before it completes loses nothing.
    pub async fn terminated(&mut self) -> ExitSignal {
        let signal = match self.receiver.wait_for(Option::is_some).await {
            Ok(signal) => *signal,
            Err(_) => None,
        };
        match signal {
            Some(signal) => signal,
            None => std::future::pending().await,
        }
    }
}

impl Drop for TrapGuard<'_> {
    fn drop(&mut self) {
        self.trap.state.armed.store(false, Ordering::SeqCst);
        self.fault_handler.restore();
        self.trap.state.restores.fetch_add(1, Ordering::SeqCst);
        TRAP_SLOT.store(false, Ordering::SeqCst);
        debug!("Exit trap restored (generation {})", self.generation);
    }
}

/// Handed to the engine in place of a process exit
#[derive(Clone)]
pub struct ExitHandle {
    state: Arc<TrapState>,
    generation: u64,
}

impl ExitHandle {
    /// Request termination with `code`.
    ///
    /// Only the first request of an installation is recorded. Requests made
    /// after the trap was restored are logged and dropped; the process is
    /// never terminated. A late `exit(0)` is routine, the run having already
    /// ended through the log.
    pub fn exit(&self, code: i32) -> ExitSignal {
        let signal = ExitSignal::new(code);

        let current = self.state.generation.load(Ordering::SeqCst);
        if !self.state.armed.load(Ordering::SeqCst) || current != self.generation {
            if signal.is_normal() {
                debug!("Engine requested {} after its run ended, ignoring", signal);
            } else {
                warn!("Engine requested {} outside of an installed exit trap, ignoring", signal);
            }
            return signal;
        }

        let recorded = self.state.signal.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(signal);
                true
            } else {
                false
            }
        });
        if recorded {
            debug!("Trapped engine {}", signal);
        }

        signal
    }

    /// Request termination and unwind the calling thread, the way a real
    /// process exit would stop it.
    pub fn terminate(&self, code: i32) -> ! {
        let signal = self.exit(code);
        panic::panic_any(signal)
    }
}

/// Process-wide panic hook active while a trap is installed.
///
/// Released on a panicking thread, it stays installed in passthrough mode
/// until the next install replaces it, so hooks never stack up.
struct FaultHandler {
    armed: Arc<AtomicBool>,
    previous: SavedHook,
}

impl FaultHandler {
    fn install() -> Self {
        let current = panic::take_hook();
        let stranded = STRANDED_HOOK.lock().take().and_then(|saved| saved.lock().take());
        let previous = match stranded {
            Some(original) => {
                debug!("Dropping fault handler left in passthrough mode");
                drop(current);
                original
            }
            None => current,
        };

        let armed = Arc::new(AtomicBool::new(true));
        let previous = Arc::new(Mutex::new(Some(previous)));

        let hook_armed = armed.clone();
        let hook_previous = previous.clone();
        panic::set_hook(Box::new(move |info| {
            if !hook_armed.load(Ordering::SeqCst) {
                if let Some(previous) = hook_previous.lock().as_ref() {
                    previous(info);
                }
                return;
            }

            let thread = std::thread::current();
            let name = thread.name().unwrap_or("<unnamed>");
            match info.payload().downcast_ref::<ExitSignal>() {
                Some(signal) if signal.is_normal() => {}
                Some(signal) => error!("Error in thread {}: engine requested {}", name, signal),
                None => error!("Error in thread {}: {}", name, describe_fault(info)),
            }
        }));

        Self { armed, previous }
    }

    fn restore(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        if std::thread::panicking() {
            // set_hook panics on a panicking thread; the disarmed hook forwards instead.
            warn!("Exit trap released while panicking, fault handler left in passthrough mode");
            *STRANDED_HOOK.lock() = Some(self.previous.clone());
            return;
        }
        if let Some(previous) = self.previous.lock().take() {
            panic::set_hook(previous);
        }
    }
}

fn describe_fault(info: &PanicHookInfo<'_>) -> String {
    let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown fault".to_string()
    };

    match info.location() {
        Some(location) => format!("{message} at {location}"),
        None => message,
    }
}

/// Serialises tests that install a trap
#[cfg(test)]
pub(crate) fn serial() -> parking_lot::MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_signal() {
        assert!(ExitSignal::new(0).is_normal());
        assert!(!ExitSignal::new(2).is_normal());
        assert_eq!(ExitSignal::new(2).to_string(), "exit(2)");
    }

    #[test]
    fn test_install_restore_paired() {
        let _serial = serial();
        let trap = ExitTrap::new();

        {
            let _guard = trap.install().unwrap();
            assert!(trap.is_installed());
            assert_eq!(trap.installs(), 1);
            assert_eq!(trap.restores(), 0);
        }

        assert!(!trap.is_installed());
        assert_eq!(trap.restores(), 1);
    }

    #[test]
    fn test_single_install_outstanding() {
        let _serial = serial();
        let first = ExitTrap::new();
        let second = ExitTrap::new();

        let guard = first.install().unwrap();
        assert!(matches!(second.install(), Err(TrapError::AlreadyInstalled)));
        assert!(matches!(first.install(), Err(TrapError::AlreadyInstalled)));
        drop(guard);

        assert!(second.install().is_ok());
    }

    #[test]
    fn test_first_exit_is_recorded() {
        let _serial = serial();
        let trap = ExitTrap::new();
        let guard = trap.install().unwrap();
        let handle = guard.exit_handle();

        handle.exit(3);
        handle.exit(0);

        assert_eq!(guard.signal(), Some(ExitSignal::new(3)));
    }

    #[test]
    fn test_exit_after_restore_is_ignored() {
        let _serial = serial();
        let trap = ExitTrap::new();
        let stale = {
            let guard = trap.install().unwrap();
            guard.exit_handle()
        };

        let guard = trap.install().unwrap();
        stale.exit(9);
        assert_eq!(guard.signal(), None);
    }

    #[test]
    fn test_terminate_unwinds_thread() {
        let _serial = serial();
        let trap = ExitTrap::new();
        let guard = trap.install().unwrap();
        let handle = guard.exit_handle();

        let joined = std::thread::Builder::new()
            .name("engine-worker".to_string())
            .spawn(move || -> () { handle.terminate(0) })
            .unwrap()
            .join();

        let payload = joined.unwrap_err();
        assert_eq!(payload.downcast_ref::<ExitSignal>(), Some(&ExitSignal::new(0)));
        assert_eq!(guard.signal(), Some(ExitSignal::new(0)));
    }

    #[test]
    fn test_restored_after_unrelated_fault() {
        let _serial = serial();
        let trap = ExitTrap::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = trap.install().unwrap();
            panic!("engine blew up");
        }));

        assert!(result.is_err());
        assert!(!trap.is_installed());
        assert_eq!(trap.installs(), trap.restores());
        assert!(STRANDED_HOOK.lock().is_some());

        drop(trap.install().unwrap());
        assert!(STRANDED_HOOK.lock().is_none());
        assert_eq!(trap.installs(), trap.restores());
    }

    #[test]
    fn test_late_exit_after_restore_is_dropped() {
        let _serial = serial();
        let trap = ExitTrap::new();
        let late = {
            let guard = trap.install().unwrap();
            guard.exit_handle()
        };

        assert_eq!(late.exit(0), ExitSignal::new(0));
        assert!(!trap.is_installed());
        let guard = trap.install().unwrap();
        assert_eq!(guard.signal(), None);
    }

    #[tokio::test]
    async fn test_terminated_resolves() {
        let _serial = serial();
        let trap = ExitTrap::new();
        let mut guard = trap.install().unwrap();
        let handle = guard.exit_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.exit(2);
        });

        let signal = tokio::time::timeout(Duration::from_secs(5), guard.terminated())
            .await
            .unwrap();
        assert_eq!(signal.code(), 2);
    }
}
