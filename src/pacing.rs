//! Frame pacing: bounds how many frames the CPU may have submitted to the GPU
//! without hearing back, and picks which uniform slot each frame may write.
//!
//! Every frame begins by taking a permit from an [`InFlightSemaphore`] holding
//! one permit per in-flight frame. The permit is represented by a
//! [`FrameTicket`], which travels alongside the submitted GPU work and gives
//! the permit back once that work has completed.
//!
//! Tick `k` always writes slot `k mod N`. A permit alone doesn't prove that
//! slot is free: a ticket abandoned out of turn returns its permit while an
//! older frame still owns the slot the next tick maps to. So the pacer also
//! records which slots are owned, and `begin_frame` waits for its own slot.
//! Holding the ticket for tick `k` therefore means no other outstanding frame
//! is reading slot `k mod N`, and the slot can be overwritten.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// A counting semaphore. Waits forever; there is no timeout.
#[derive(Debug)]
pub struct InFlightSemaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl InFlightSemaphore {
    /// Create a semaphore holding `permits` permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Take one permit, blocking the calling thread until one is available.
    pub fn acquire(&self) {
        let mut permits = self.lock();
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    /// Give one permit back and wake up a single waiter.
    pub fn release(&self) {
        *self.lock() += 1;
        self.available.notify_one();
    }

    /// The number of permits that could be acquired without blocking.
    pub fn available(&self) -> usize {
        *self.lock()
    }

    // The counter is a plain integer, so a panic while holding the lock can't
    // leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State shared between the pacer and every outstanding ticket.
#[derive(Debug)]
struct PacerShared {
    semaphore: InFlightSemaphore,
    capacity: usize,
    completed: AtomicU64,
    /// `owned[i]` is set while some ticket holds slot `i`.
    owned: Mutex<Vec<bool>>,
    slot_freed: Condvar,
}

impl PacerShared {
    fn owned(&self) -> MutexGuard<'_, Vec<bool>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `slot` has no owner, then take it.
    fn claim_slot(&self, slot: usize) {
        let mut owned = self.owned();
        while owned[slot] {
            owned = self
                .slot_freed
                .wait(owned)
                .unwrap_or_else(PoisonError::into_inner);
        }
        owned[slot] = true;
    }

    /// Give `slot` and one permit back.
    fn release_slot(&self, slot: usize) {
        self.owned()[slot] = false;
        self.slot_freed.notify_all();
        self.semaphore.release();
    }
}

/// Hands out [`FrameTicket`]s, never more than `capacity` at a time.
///
/// The pacer itself lives on the thread issuing frames. Tickets may be sent to
/// (and completed on) any other thread.
#[derive(Debug)]
pub struct FramePacer {
    shared: Arc<PacerShared>,
    frame_count: u64,
}

impl FramePacer {
    /// Create a pacer allowing `capacity` frames in flight.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, since no frame could ever begin.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a frame pacer needs at least one slot");

        Self {
            shared: Arc::new(PacerShared {
                semaphore: InFlightSemaphore::new(capacity),
                capacity,
                completed: AtomicU64::new(0),
                owned: Mutex::new(vec![false; capacity]),
                slot_freed: Condvar::new(),
            }),
            frame_count: 0,
        }
    }

    /// Begin the next frame, blocking while `capacity` frames are already in
    /// flight or while an older frame still owns this frame's slot.
    pub fn begin_frame(&mut self) -> FrameTicket {
        self.shared.semaphore.acquire();

        let frame_index = self.frame_count;
        let slot = (frame_index % self.shared.capacity as u64) as usize;
        self.shared.claim_slot(slot);
        self.frame_count += 1;

        trace!(frame_index, slot, in_flight = self.in_flight(), "Began frame");

        FrameTicket {
            frame_index,
            slot,
            shared: Some(Arc::clone(&self.shared)),
        }
    }

    /// Block until every ticket handed out so far has been completed or
    /// dropped. Call this before touching anything the GPU might be reading.
    pub fn wait_idle(&self) {
        for _ in 0..self.shared.capacity {
            self.shared.semaphore.acquire();
        }
        for _ in 0..self.shared.capacity {
            self.shared.semaphore.release();
        }
    }

    /// Maximum number of frames in flight.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of tickets currently held.
    pub fn in_flight(&self) -> usize {
        self.shared.capacity - self.shared.semaphore.available()
    }

    /// Number of frames begun so far.
    #[inline]
    pub fn frames_begun(&self) -> u64 {
        self.frame_count
    }

    /// Number of frames whose ticket was completed (not merely dropped).
    pub fn frames_completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }
}

/// A held in-flight permit for one frame.
///
/// Completing the ticket, or dropping it, returns the permit exactly once.
#[derive(Debug)]
#[must_use = "dropping a ticket immediately gives its frame slot back"]
pub struct FrameTicket {
    frame_index: u64,
    slot: usize,
    shared: Option<Arc<PacerShared>>,
}

impl FrameTicket {
    /// The tick this ticket was issued for, counting from zero.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The uniform slot this frame owns: `frame_index mod capacity`.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Mark the frame's GPU work as finished, returning its permit.
    pub fn complete(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.completed.fetch_add(1, Ordering::AcqRel);
            shared.release_slot(self.slot);
            trace!(frame_index = self.frame_index, "Completed frame");
        }
    }
}

impl Drop for FrameTicket {
    fn drop(&mut self) {
        // Abandoned before its work completed (or was ever submitted).
        if let Some(shared) = self.shared.take() {
            shared.release_slot(self.slot);
            trace!(frame_index = self.frame_index, "Abandoned frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, RecvTimeoutError};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn slot_is_tick_count_modulo_capacity() {
        let mut pacer = FramePacer::new(3);

        for k in 0..20u64 {
            let ticket = pacer.begin_frame();
            assert_eq!(ticket.frame_index(), k);
            assert_eq!(ticket.slot(), (k % 3) as usize);
            ticket.complete();
        }

        assert_eq!(pacer.frames_begun(), 20);
        assert_eq!(pacer.frames_completed(), 20);
    }

    #[test]
    fn outstanding_slots_are_distinct() {
        let mut pacer = FramePacer::new(3);
        let tickets = (0..3).map(|_| pacer.begin_frame()).collect::<Vec<_>>();

        let mut slots = tickets.iter().map(FrameTicket::slot).collect::<Vec<_>>();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(pacer.in_flight(), 3);
    }

    #[test]
    fn begin_frame_blocks_until_a_frame_completes() {
        let mut pacer = FramePacer::new(3);
        let mut held = (0..3).map(|_| pacer.begin_frame()).collect::<Vec<_>>();

        let (tx, rx) = unbounded();
        let issuer = thread::spawn(move || {
            let ticket = pacer.begin_frame();
            tx.send(ticket.slot()).unwrap();
            ticket.complete();
            pacer
        });

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout),
            "a fourth frame began while three were in flight"
        );

        held.remove(0).complete();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(0));

        let pacer = issuer.join().unwrap();
        drop(held);
        assert_eq!(pacer.in_flight(), 0);
        assert_eq!(pacer.frames_completed(), 2);
    }

    #[test]
    fn completion_returns_exactly_one_permit() {
        let mut pacer = FramePacer::new(3);

        let first = pacer.begin_frame();
        let second = pacer.begin_frame();
        assert_eq!(pacer.in_flight(), 2);

        first.complete();
        assert_eq!(pacer.in_flight(), 1);

        // Completing consumes the ticket, so its drop must not release again.
        second.complete();
        assert_eq!(pacer.in_flight(), 0);
        assert_eq!(pacer.shared.semaphore.available(), 3);
    }

    #[test]
    fn dropped_ticket_returns_its_permit_without_counting_as_completed() {
        let mut pacer = FramePacer::new(2);

        drop(pacer.begin_frame());

        assert_eq!(pacer.in_flight(), 0);
        assert_eq!(pacer.frames_begun(), 1);
        assert_eq!(pacer.frames_completed(), 0);
    }

    #[test]
    fn never_more_than_capacity_in_flight_across_threads() {
        const FRAMES: u64 = 500;

        let mut pacer = FramePacer::new(3);
        let (tx, rx) = unbounded::<FrameTicket>();

        // Stands in for the GPU: finishes frames in submission order.
        let gpu = thread::spawn(move || {
            let mut expected = 0;
            for ticket in rx {
                assert_eq!(ticket.frame_index(), expected);
                expected += 1;
                ticket.complete();
            }
            expected
        });

        for k in 0..FRAMES {
            let ticket = pacer.begin_frame();
            assert!(pacer.in_flight() <= 3);
            assert_eq!(ticket.slot(), (k % 3) as usize);
            tx.send(ticket).unwrap();
        }
        drop(tx);

        assert_eq!(gpu.join().unwrap(), FRAMES);
        pacer.wait_idle();
        assert_eq!(pacer.in_flight(), 0);
        assert_eq!(pacer.frames_completed(), FRAMES);
    }

    #[test]
    fn wait_idle_waits_for_outstanding_frames() {
        let mut pacer = FramePacer::new(3);
        let ticket = pacer.begin_frame();

        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            ticket.complete();
        });

        pacer.wait_idle();
        assert_eq!(pacer.frames_completed(), 1);
        finisher.join().unwrap();
    }

    #[test]
    fn abandoned_ticket_does_not_hand_out_a_slot_still_in_flight() {
        let mut pacer = FramePacer::new(3);
        let first = pacer.begin_frame();
        let second = pacer.begin_frame();
        drop(pacer.begin_frame());
        assert_eq!(pacer.in_flight(), 2);

        // Tick 3 maps to slot 0, which `first` still owns.
        let (tx, rx) = unbounded();
        let issuer = thread::spawn(move || {
            let ticket = pacer.begin_frame();
            tx.send((ticket.frame_index(), ticket.slot())).unwrap();
            (pacer, ticket)
        });

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout),
            "a frame was handed slot 0 while the frame using it was in flight"
        );

        assert_eq!(first.slot(), 0);
        first.complete();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok((3, 0)));

        let (pacer, fourth) = issuer.join().unwrap();
        assert_ne!(fourth.slot(), second.slot());
        assert_eq!(pacer.in_flight(), 2);

        second.complete();
        fourth.complete();
        pacer.wait_idle();
        assert_eq!(pacer.in_flight(), 0);
    }

    #[test]
    fn semaphore_counts_permits() {
        let semaphore = InFlightSemaphore::new(2);

        semaphore.acquire();
        semaphore.acquire();
        assert_eq!(semaphore.available(), 0);

        semaphore.release();
        assert_eq!(semaphore.available(), 1);
    }

    #[test]
    #[should_panic]
    fn zero_capacity_is_rejected() {
        let _ = FramePacer::new(0);
    }
}
