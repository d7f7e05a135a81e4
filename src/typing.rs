//! Debounce for outbound typing presence.
//!
//! Raw keystroke activity is far too chatty to put on the wire. The
//! [`TypingDebouncer`] collapses it into discrete transitions: the first
//! keystroke of a burst sends `typing=true`, and a single-slot timer sends
//! `typing=false` once the input has been quiet for the debounce window.
//! Every new keystroke replaces the outstanding timer, so at most one timer
//! is ever live.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::Command;

/// Converts input-field activity into `typing=true` / `typing=false`
/// transitions on the controller's command channel.
///
/// Obtain one via [`ParlorClient::typing_debouncer`](crate::ParlorClient::typing_debouncer)
/// and feed it every change of the message input field. Dropping the
/// debouncer cancels the timer and, when the user was still marked typing,
/// sends a final `typing=false` so the server-visible presence is never left
/// stuck after the input is torn down.
#[derive(Debug)]
pub struct TypingDebouncer {
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Shared with the timer task so a firing timer can clear the mark.
    is_typing: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
    window: Duration,
}

impl TypingDebouncer {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<Command>, window: Duration) -> Self {
        Self {
            cmd_tx,
            is_typing: Arc::new(AtomicBool::new(false)),
            timer: None,
            window,
        }
    }

    /// Feed the current full text of the input field after a change.
    ///
    /// Non-empty text sends `typing=true` at most once per burst and
    /// (re)starts the quiet-window timer. Empty text means the user deleted
    /// everything: `typing=false` goes out immediately and the timer is
    /// cancelled.
    pub fn on_input_changed(&mut self, text: &str) {
        if text.is_empty() {
            self.cancel_timer();
            self.send_stopped();
            return;
        }

        if !self.is_typing.swap(true, Ordering::AcqRel) {
            let _ = self.cmd_tx.send(Command::SetTyping { typing: true });
        }
        self.restart_timer();
    }

    /// The message was submitted: the input clears, so typing has ended.
    pub fn on_message_submitted(&mut self) {
        self.cancel_timer();
        self.send_stopped();
    }

    /// Whether the local user is currently marked as typing.
    pub fn is_typing(&self) -> bool {
        self.is_typing.load(Ordering::Acquire)
    }

    fn restart_timer(&mut self) {
        self.cancel_timer();
        let tx = self.cmd_tx.clone();
        let flag = Arc::clone(&self.is_typing);
        let window = self.window;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if flag.swap(false, Ordering::AcqRel) {
                let _ = tx.send(Command::SetTyping { typing: false });
            }
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn send_stopped(&self) {
        if self.is_typing.swap(false, Ordering::AcqRel) {
            let _ = self.cmd_tx.send(Command::SetTyping { typing: false });
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.cancel_timer();
        self.send_stopped();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(3);

    fn debouncer() -> (TypingDebouncer, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TypingDebouncer::new(tx, WINDOW), rx)
    }

    fn typing_value(cmd: Command) -> bool {
        match cmd {
            Command::SetTyping { typing } => typing,
            other => panic!("expected SetTyping, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_keystroke_sends_typing_true_once() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("h");
        debouncer.on_input_changed("he");
        debouncer.on_input_changed("hey");

        assert!(typing_value(rx.try_recv().unwrap()));
        // Further keystrokes within the window send nothing.
        assert!(rx.try_recv().is_err());
        assert!(debouncer.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_window_sends_typing_false() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("hi");
        assert!(typing_value(rx.recv().await.unwrap()));

        // No further input: the timer fires after the window elapses.
        let stopped = rx.recv().await.unwrap();
        assert!(!typing_value(stopped));
        assert!(!debouncer.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_keep_replacing_the_timer() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("h");
        assert!(typing_value(rx.recv().await.unwrap()));

        // Keep typing just inside the window; the timer must never fire.
        for _ in 0..5 {
            tokio::time::advance(WINDOW - Duration::from_millis(1)).await;
            debouncer.on_input_changed("more");
            // Let the replacement timer task register its deadline.
            tokio::task::yield_now().await;
            assert!(rx.try_recv().is_err(), "timer fired despite activity");
        }

        // Now go quiet for the full window.
        tokio::time::advance(WINDOW).await;
        tokio::task::yield_now().await;
        assert!(!typing_value(rx.try_recv().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_input_stops_typing_immediately() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("draft");
        assert!(typing_value(rx.recv().await.unwrap()));

        debouncer.on_input_changed("");
        assert!(!typing_value(rx.try_recv().unwrap()));

        // The cancelled timer must not fire later.
        tokio::time::advance(WINDOW * 2).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_while_not_typing_sends_nothing() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_forces_typing_false_and_cancels_timer() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("hello");
        assert!(typing_value(rx.recv().await.unwrap()));

        debouncer.on_message_submitted();
        assert!(!typing_value(rx.try_recv().unwrap()));
        assert!(!debouncer.is_typing());

        tokio::time::advance(WINDOW * 2).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_while_typing_sends_final_typing_false() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("unsent draft");
        assert!(typing_value(rx.recv().await.unwrap()));

        drop(debouncer);
        assert!(!typing_value(rx.try_recv().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn drop_while_idle_sends_nothing() {
        let (debouncer, mut rx) = debouncer();
        drop(debouncer);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn new_burst_after_window_sends_typing_true_again() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.on_input_changed("first");
        assert!(typing_value(rx.recv().await.unwrap()));
        assert!(!typing_value(rx.recv().await.unwrap())); // window elapsed

        debouncer.on_input_changed("second");
        assert!(typing_value(rx.recv().await.unwrap()));
    }
}
