use std::time::Duration;

use crossbeam::channel::{self, Receiver, Select, Sender};

/// Cooperative cancellation signal threaded through a [`crate::recover::MountRecoverer::recover`]
/// call. Cancellation is observed at suspension-point boundaries (backoff
/// sleeps, unmount polling); an in-flight child process is never killed.
///
/// Obtained paired with a [`Canceller`] via [`pair`]; the token itself holds
/// no sender, so it cannot cancel itself.
#[derive(Clone)]
pub struct CancellationToken {
    rx: Receiver<()>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.rx.try_recv(),
            Err(channel::TryRecvError::Disconnected)
        )
    }

    /// Sleep for `d`, returning early with `true` if cancelled mid-sleep.
    pub fn sleep(&self, d: Duration) -> bool {
        let timer = channel::after(d);
        let mut select = Select::new();
        let cancel_idx = select.recv(&self.rx);
        let timer_idx = select.recv(&timer);
        let op = select.select();
        match op.index() {
            i if i == cancel_idx => {
                let _ = op.recv(&self.rx);
                true
            }
            i if i == timer_idx => {
                let _ = op.recv(&timer);
                self.is_cancelled()
            }
            _ => unreachable!(),
        }
    }
}

/// A handle that cancels its paired [`CancellationToken`] when dropped or
/// explicitly triggered, by closing the shared channel.
pub struct Canceller {
    _tx: Sender<()>,
}

/// Construct a linked (token, canceller) pair: dropping or triggering the
/// canceller closes the channel the token observes.
pub fn pair() -> (CancellationToken, Canceller) {
    let (tx, rx) = channel::bounded(0);
    (CancellationToken { rx }, Canceller { _tx: tx })
}

impl Canceller {
    pub fn trigger(self) {
        drop(self);
    }
}
