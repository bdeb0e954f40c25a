//! One-shot shutdown signal shared by the dispatch loop and handlers.
//!
//! Thin wrapper over `tokio::sync::watch`: the trigger fires at most one
//! edge, every `Shutdown` clone observes it, and `recv` returns
//! immediately once the signal has been seen.

use tokio::sync::watch;

/// Create a connected trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(());
    (
        ShutdownTrigger { sender },
        Shutdown {
            receiver,
            fired: false,
        },
    )
}

/// Sending side of the shutdown signal, held by the entry point.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<()>,
}

impl ShutdownTrigger {
    /// Request shutdown. Firing more than once has no further effect.
    pub fn fire(&self) {
        // Send fails only when every receiver is already gone
        let _ = self.sender.send(());
    }
}

/// Receiving side, cloneable so in-flight handlers can watch it too.
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<()>,
    fired: bool,
}

impl Shutdown {
    /// Wait until the signal fires. Returns immediately if it already has.
    ///
    /// A dropped trigger counts as a fired signal.
    pub async fn recv(&mut self) {
        if self.fired {
            return;
        }
        let _ = self.receiver.changed().await;
        self.fired = true;
    }
}
