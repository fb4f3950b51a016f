//! Completion callbacks for submitted GPU work.
//!
//! Vulkan reports completion through fences rather than callbacks, so a
//! background thread waits on each submitted frame's fence in submission order
//! and completes the frame's [`FrameTicket`] once the GPU is done with it.

use std::fmt::Debug;
use std::thread::{self, JoinHandle};

use color_eyre::{eyre::eyre, Result};
use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error};

use crate::pacing::FrameTicket;

/// Something that can block until a piece of submitted GPU work finishes.
pub trait CompletionSource: Send + 'static {
    /// Identifies one submission, e.g. the fence it will signal.
    type Token: Debug + Send + 'static;
    type Error: std::error::Error + Send + 'static;

    /// Block until the submission identified by `token` has finished.
    fn wait(&self, token: &Self::Token) -> Result<(), Self::Error>;
}

struct PendingFrame<T> {
    token: T,
    ticket: FrameTicket,
}

/// Owns the thread that turns GPU completion into [`FrameTicket::complete()`]
/// calls.
pub struct CompletionWatcher<S: CompletionSource> {
    sender: Option<Sender<PendingFrame<S::Token>>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: CompletionSource> CompletionWatcher<S> {
    /// Start the watcher thread.
    #[tracing::instrument(level = "DEBUG", name = "CompletionWatcher::spawn", skip_all)]
    pub fn spawn(source: S) -> Result<Self> {
        let (sender, receiver) = unbounded::<PendingFrame<S::Token>>();

        let thread = thread::Builder::new()
            .name("gpu-completion".to_owned())
            .spawn(move || {
                for PendingFrame { token, ticket } in receiver {
                    match source.wait(&token) {
                        Ok(()) => ticket.complete(),
                        Err(err) => {
                            // The ticket is dropped here, which still hands
                            // its permit back so the render thread can't hang.
                            error!(?token, frame_index = ticket.frame_index(), %err,
                                "Failed waiting for frame to complete");
                        }
                    }
                }
                debug!("Completion watcher exiting");
            })?;

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    /// Register the completion callback for a frame that has just been
    /// submitted. The ticket completes once `token`'s work finishes.
    pub fn watch(&self, token: S::Token, ticket: FrameTicket) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| eyre!("Completion watcher has already been shut down"))?;

        sender
            .send(PendingFrame { token, ticket })
            .map_err(|_| eyre!("Completion watcher thread has exited"))
    }

    /// Stop accepting frames, wait for every pending frame to complete, and
    /// join the watcher thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        // Closing the channel ends the thread's receive loop once it drains.
        self.sender.take();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Completion watcher thread panicked");
            }
        }
    }
}

impl<S: CompletionSource> Drop for CompletionWatcher<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::FramePacer;
    use crossbeam_channel::Receiver;
    use std::sync::{Arc, Mutex};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("the fake GPU was lost")]
    struct DeviceLost;

    /// A fake GPU that finishes submission `n` when told to via a channel,
    /// and records the order it was waited on in.
    struct FakeGpu {
        finished: Receiver<u32>,
        waited: Arc<Mutex<Vec<u32>>>,
    }

    impl CompletionSource for FakeGpu {
        type Token = u32;
        type Error = DeviceLost;

        fn wait(&self, token: &u32) -> Result<(), DeviceLost> {
            let finished = self.finished.recv().map_err(|_| DeviceLost)?;
            assert_eq!(finished, *token, "GPU work finished out of order");
            self.waited.lock().unwrap().push(*token);
            Ok(())
        }
    }

    fn fake_gpu() -> (FakeGpu, Sender<u32>, Arc<Mutex<Vec<u32>>>) {
        let (tx, rx) = unbounded();
        let waited = Arc::new(Mutex::new(Vec::new()));
        let gpu = FakeGpu {
            finished: rx,
            waited: Arc::clone(&waited),
        };
        (gpu, tx, waited)
    }

    #[test]
    fn tickets_complete_once_the_gpu_finishes() {
        let (gpu, finish, waited) = fake_gpu();
        let mut pacer = FramePacer::new(3);
        let mut watcher = CompletionWatcher::spawn(gpu).unwrap();

        for token in 0..3 {
            watcher.watch(token, pacer.begin_frame()).unwrap();
        }
        assert_eq!(pacer.in_flight(), 3);

        for token in 0..3 {
            finish.send(token).unwrap();
        }
        pacer.wait_idle();

        assert_eq!(pacer.frames_completed(), 3);
        assert_eq!(*waited.lock().unwrap(), vec![0, 1, 2]);

        watcher.shutdown();
    }

    #[test]
    fn lost_device_still_returns_permits() {
        let (gpu, finish, _) = fake_gpu();
        let mut pacer = FramePacer::new(2);
        let mut watcher = CompletionWatcher::spawn(gpu).unwrap();

        watcher.watch(0, pacer.begin_frame()).unwrap();
        watcher.watch(1, pacer.begin_frame()).unwrap();

        // Every pending wait now fails.
        drop(finish);
        pacer.wait_idle();

        assert_eq!(pacer.in_flight(), 0);
        assert_eq!(pacer.frames_completed(), 0);

        watcher.shutdown();
    }

    #[test]
    fn watch_after_shutdown_is_an_error() {
        let (gpu, _finish, _) = fake_gpu();
        let mut pacer = FramePacer::new(1);
        let mut watcher = CompletionWatcher::spawn(gpu).unwrap();

        watcher.shutdown();

        assert!(watcher.watch(0, pacer.begin_frame()).is_err());
        // The rejected ticket was dropped, so the slot is free again.
        assert_eq!(pacer.in_flight(), 0);
    }
}
