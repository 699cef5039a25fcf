//! One-shot broadcast signal.
//!
//! A [`Signal`] fires at most once and releases every [`Listener`] taken from it,
//! including listeners taken after it fired. A spent signal is never re-armed; the
//! owner replaces it with a fresh one.

use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct Signal {
    fired: watch::Sender<bool>,
}

impl Signal {
    pub(crate) fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self { fired }
    }

    /// Release all current and future listeners.
    pub(crate) fn fire(&self) {
        self.fired.send_replace(true);
    }

    pub(crate) fn is_fired(&self) -> bool {
        *self.fired.borrow()
    }

    pub(crate) fn listen(&self) -> Listener {
        Listener {
            fired: self.fired.subscribe(),
        }
    }

    /// Number of listeners still attached.
    pub(crate) fn listener_count(&self) -> usize {
        self.fired.receiver_count()
    }
}

#[derive(Debug)]
pub(crate) struct Listener {
    fired: watch::Receiver<bool>,
}

impl Listener {
    /// Resolves once the signal fired, or once the signal was dropped.
    pub(crate) async fn fired(&mut self) {
        // An error means the signal was dropped; callers re-check state either way.
        let _ = self.fired.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_fire_releases_every_listener() {
        let signal = Signal::new();
        let mut first_listener = signal.listen();
        let mut second_listener = signal.listen();
        let mut first = task::spawn(first_listener.fired());
        let mut second = task::spawn(second_listener.fired());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        signal.fire();

        assert!(first.is_woken());
        assert!(second.is_woken());
        assert_ready!(first.poll());
        assert_ready!(second.poll());
    }

    #[test]
    fn test_listener_taken_after_firing_resolves_immediately() {
        let signal = Signal::new();
        signal.fire();
        assert!(signal.is_fired());

        let mut late_listener = signal.listen();
        let mut late = task::spawn(late_listener.fired());
        assert_ready!(late.poll());
    }

    #[test]
    fn test_dropped_signal_releases_listener() {
        let signal = Signal::new();
        let mut listener = signal.listen();
        let mut waiting = task::spawn(listener.fired());
        assert_pending!(waiting.poll());

        drop(signal);

        assert_ready!(waiting.poll());
    }

    #[test]
    fn test_listener_count_tracks_detached_listeners() {
        let signal = Signal::new();
        let first = signal.listen();
        let second = signal.listen();
        assert_eq!(signal.listener_count(), 2);

        drop(first);
        assert_eq!(signal.listener_count(), 1);
        drop(second);
        assert_eq!(signal.listener_count(), 0);
    }
}
