//! Background Scheduler
//!
//! One dedicated thread wakes on a fixed interval and performs, in order:
//! the session-guard check, a compaction sweep over all partitions, and
//! the asynchronous metadata flush. A failing step is logged and the tick
//! loop keeps running; only shutdown or a session conflict stops it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, tick, Sender};
use crossbeam::select;
use tracing::{error, warn};

use crate::combine::Combinator;
use crate::error::Result;
use crate::record::ValueCodec;

use super::{compactor, StoreInner};

/// Handle to the background tick thread
pub(crate) struct Scheduler {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn spawn<C, M>(inner: Arc<StoreInner<C, M>>) -> Result<Self>
    where
        C: ValueCodec,
        M: Combinator<C::Value>,
    {
        let (shutdown, rx) = bounded::<()>(1);
        let ticker = tick(inner.config.tick_interval);
        let handle = thread::Builder::new()
            .name("stratakv-tick".to_string())
            .spawn(move || loop {
                select! {
                    recv(rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if !run_tick(&inner) {
                            break;
                        }
                    }
                }
            })?;
        Ok(Self { shutdown, handle })
    }

    /// Signal the thread and wait for the in-flight tick to finish
    pub fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.join();
    }
}

/// One tick of background work; returns false when the loop must stop.
fn run_tick<C, M>(inner: &StoreInner<C, M>) -> bool
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    if inner.closed.load(Ordering::SeqCst) {
        return false;
    }

    // another process overwrote the lock file: stop before we can corrupt
    // state that now belongs to it
    match inner.guard.still_owned() {
        Ok(true) => {}
        Ok(false) => {
            error!(
                session = inner.guard.session_id(),
                "storage directory was claimed by another session; closing"
            );
            inner.conflicted.store(true, Ordering::SeqCst);
            inner.closed.store(true, Ordering::SeqCst);
            return false;
        }
        Err(e) => warn!(error = %e, "session lock file unreadable"),
    }

    compactor::background_pass(inner);

    if inner.meta_dirty.swap(false, Ordering::SeqCst) {
        if let Err(e) = inner.persist_metadata() {
            inner.meta_dirty.store(true, Ordering::SeqCst);
            error!(error = %e, "metadata flush failed");
        }
    }
    true
}
