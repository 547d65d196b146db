use std::{
    io,
    os::raw::c_int,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use log::debug;
use signal_hook::{
    SigId,
    consts::signal::{SIGABRT, SIGALRM, SIGHUP, SIGINT, SIGTERM, SIGTSTP},
    flag,
    low_level,
};

/// Signals that make a running server shut down gracefully.
pub const SHUTDOWN_SIGNALS: [c_int; 6] = [SIGHUP, SIGINT, SIGABRT, SIGTERM, SIGTSTP, SIGALRM];

/// Signals whose fallback action is already installed in this process.
static FALLBACKS: Mutex<Vec<c_int>> = Mutex::new(Vec::new());
/// Number of live [`Signals`] guards.
static ACTIVE: AtomicUsize = AtomicUsize::new(0);

/// Runs in signal context, only async-signal-safe calls allowed.
fn fallback(signal: c_int) {
    if ACTIVE.load(Ordering::SeqCst) == 0 {
        let _ = low_level::emulate_default_handler(signal);
    }
}

/// Install, once per signal, the action applying the default disposition
/// while no guard is alive.
fn install_fallbacks() -> io::Result<()> {
    let mut installed = FALLBACKS
        .lock()
        .map_err(|_| io::Error::other("signal registry poisoned"))?;

    for signal in SHUTDOWN_SIGNALS {
        if installed.contains(&signal) {
            continue;
        }
        // SAFETY: `fallback` only reads an atomic and emulates the default action.
        unsafe { low_level::register(signal, move || fallback(signal)) }?;
        installed.push(signal);
    }
    Ok(())
}

/// Shutdown request flag raised by termination signals.
///
/// Handlers only flip an atomic flag; the server reads and clears it at the
/// top of each iteration. Dropping the guard unregisters its handlers, and
/// once no guard is left the signals get their default action back.
#[derive(Debug)]
pub struct Signals {
    requested: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl Signals {
    pub fn register() -> io::Result<Self> {
        install_fallbacks()?;

        ACTIVE.fetch_add(1, Ordering::SeqCst);
        let mut signals = Self {
            requested: Arc::new(AtomicBool::new(false)),
            ids: Vec::with_capacity(SHUTDOWN_SIGNALS.len()),
        };

        for signal in SHUTDOWN_SIGNALS {
            // on failure the guard unregisters what was already installed
            let id = flag::register(signal, Arc::clone(&signals.requested))?;
            signals.ids.push(id);
        }
        debug!("registered shutdown signal handlers");

        Ok(signals)
    }

    /// Whether a signal arrived since the last call.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

impl Drop for Signals {
    fn drop(&mut self) {
        ACTIVE.fetch_sub(1, Ordering::SeqCst);
        for id in self.ids.drain(..) {
            low_level::unregister(id);
        }
        debug!("unregistered shutdown signal handlers");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        os::unix::process::ExitStatusExt,
        process::Command,
        thread,
        time::Duration,
    };

    use super::*;

    const CHILD: &str = "NAMEDIPC_SIGNAL_CHILD";

    #[test]
    fn starts_without_request() {
        let signals = Signals::register().unwrap();

        assert!(!signals.take());
    }

    #[test]
    fn flag_is_cleared_once_read() {
        let signals = Signals::register().unwrap();
        signals.requested.store(true, Ordering::SeqCst);

        assert!(signals.take());
        assert!(!signals.take());
    }

    #[test]
    fn dropping_unregisters_handlers() {
        let signals = Signals::register().unwrap();
        let ids = signals.ids.clone();
        drop(signals);

        for id in ids {
            assert!(!low_level::unregister(id));
        }
    }

    /// Run in a child process by `default_action_is_back_after_drop`.
    #[test]
    fn raise_after_drop() {
        if env::var_os(CHILD).is_none() {
            return;
        }

        drop(Signals::register().unwrap());
        low_level::raise(SIGTERM).unwrap();
        thread::sleep(Duration::from_secs(5));
    }

    #[test]
    fn default_action_is_back_after_drop() {
        let status = Command::new(env::current_exe().unwrap())
            .args(["--exact", "protocol::signals::tests::raise_after_drop"])
            .env(CHILD, "1")
            .output()
            .unwrap()
            .status;

        assert_eq!(status.signal(), Some(SIGTERM));
    }
}
