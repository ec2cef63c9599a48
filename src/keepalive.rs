use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::session::{lock_session, Session};
use crate::POP3State;

/// Background thread sending NOOP while the session sits idle.
///
/// The probe runs under the session lock, so it can never land in the middle
/// of a foreground response. Dropping or stopping the handle wakes the thread
/// immediately.
pub struct KeepAlive {
    cancelled: Arc<AtomicBool>,
    wakeup: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn start(session: Arc<Mutex<Session>>, interval: Duration) -> KeepAlive {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (wakeup, sleeper) = channel::bounded::<()>(1);
        let token = cancelled.clone();
        let spawned = thread::Builder::new()
            .name("pop3-keepalive".to_owned())
            .spawn(move || {
                loop {
                    match sleeper.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => (),
                        _ => break,
                    }
                    if !probe(&session, interval, &token) {
                        break;
                    }
                }
                trace!("Keep-alive stopped");
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start the keep-alive thread: {}", e);
                None
            }
        };
        KeepAlive {
            cancelled: cancelled,
            wakeup: Some(wakeup),
            handle: handle,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
            && self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Cancel and wait for the thread. Must not be called with the session
    /// lock held.
    pub fn stop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wakeup.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Keep-alive thread panicked");
            }
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One keep-alive tick. Returns whether the thread should keep running.
fn probe(session: &Mutex<Session>, interval: Duration, cancelled: &AtomicBool) -> bool {
    if cancelled.load(Ordering::SeqCst) {
        return false;
    }
    let mut session = lock_session(session);
    // A foreground command may have ended the session while we waited.
    if cancelled.load(Ordering::SeqCst) || session.state() != POP3State::Authenticated {
        return false;
    }
    if session.idle_for() < interval {
        return true;
    }
    trace!("Cmd: NOOP (keep-alive)");
    match session.send_command("NOOP", None) {
        Ok(_) => true,
        Err(e) => {
            warn!("Keep-alive probe failed, dropping the connection: {}", e);
            cancelled.store(true, Ordering::SeqCst);
            session.disconnect();
            false
        }
    }
}
