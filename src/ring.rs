//! Descriptor ring.
//!
//! Fixed-capacity circular array of per-frame feature slots. Sequence number `s`
//! lives in slot `s mod capacity`.
//!
//! Every slot is guarded by its own mutex, held only while its fields are read or
//! written. Feature payloads are published as `Arc<SlotFeatures>`, so neighbours
//! match outside the lock.
//!
//! Slot lifecycle:
//!
//! ```text
//!   Vacant --arm(s)--> Pending --publish--> Ready --arm(s + N)--> Pending ...
//! ```
//!
//! `arm` is the driver's reset-before-reuse step. It refuses to touch a slot
//! while the previous occupant still holds its [`SlotLease`]; the driver waits
//! for the lease to be released instead of silently overwriting live state.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detect::{Descriptors, Keypoint};
use crate::CancelToken;

/// Default number of slots.
pub const DEFAULT_RING_CAPACITY: usize = 50;

/// How long `arm` sleeps between cancellation checks while waiting on a lease.
const ARM_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotPhase {
    /// Never armed.
    Vacant,
    /// Armed for a sequence number; detection/description in progress.
    Pending,
    /// Features published; neighbours may read them.
    Ready,
}

/// Feature payload a work unit publishes into its slot.
#[derive(Debug, Default)]
pub struct SlotFeatures {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl SlotFeatures {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Self {
        Self {
            keypoints,
            descriptors,
        }
    }

    /// At least one usable feature.
    pub fn is_valid(&self) -> bool {
        !self.descriptors.is_empty()
    }
}

/// Point-in-time copy of a slot's fields.
#[derive(Clone, Debug)]
pub struct SlotView {
    pub index: usize,
    pub sequence: Option<u64>,
    pub phase: SlotPhase,
    pub frame_index: u64,
    pub features: Arc<SlotFeatures>,
}

impl SlotView {
    pub fn is_ready(&self) -> bool {
        self.phase == SlotPhase::Ready
    }

    pub fn is_valid(&self) -> bool {
        self.features.is_valid()
    }
}

/// Result of trying to claim the pair `(s, s + 1)` on the slot of `s`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the computation of this pair.
    Granted,
    /// Another work unit already claimed it.
    AlreadyClaimed,
    /// The slot no longer holds `s`; it now holds the given sequence (if any).
    Superseded(Option<u64>),
}

struct SlotState {
    sequence: Option<u64>,
    frame_index: u64,
    phase: SlotPhase,
    features: Arc<SlotFeatures>,
    forward_claimed: bool,
    in_flight: bool,
}

impl SlotState {
    fn vacant() -> Self {
        Self {
            sequence: None,
            frame_index: 0,
            phase: SlotPhase::Vacant,
            features: Arc::new(SlotFeatures::default()),
            forward_claimed: false,
            in_flight: false,
        }
    }
}

struct DescriptorSlot {
    state: Mutex<SlotState>,
    released: Condvar,
}

/// Fixed-capacity ring of descriptor slots.
pub struct DescriptorRing {
    slots: Vec<DescriptorSlot>,
}

impl DescriptorRing {
    /// Ring with `capacity` vacant slots. Capacity must be at least 2 so that a
    /// slot is never its own neighbour.
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity >= 2, "ring capacity must be at least 2");
        Arc::new(Self {
            slots: (0..capacity)
                .map(|_| DescriptorSlot {
                    state: Mutex::new(SlotState::vacant()),
                    released: Condvar::new(),
                })
                .collect(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn index_of(&self, sequence: u64) -> usize {
        (sequence % self.slots.len() as u64) as usize
    }

    pub fn previous_index(&self, index: usize) -> usize {
        (index + self.slots.len() - 1) % self.slots.len()
    }

    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    /// Reset slot `index` and arm it for `sequence`.
    ///
    /// Blocks while the previous occupant's lease is alive, logging the overrun.
    /// Returns `None` if `cancel` fires while waiting.
    pub fn arm(
        self: &Arc<Self>,
        index: usize,
        sequence: u64,
        frame_index: u64,
        cancel: &CancelToken,
    ) -> Option<SlotLease> {
        let slot = &self.slots[index];
        let mut state = slot.state.lock();
        let mut waited = false;
        if state.in_flight {
            waited = true;
            log::warn!(
                "slot {} still owned by sequence {:?} while arming sequence {}; waiting",
                index,
                state.sequence,
                sequence
            );
            let started = Instant::now();
            while state.in_flight {
                if cancel.is_cancelled() {
                    return None;
                }
                slot.released.wait_for(&mut state, ARM_POLL);
            }
            log::warn!(
                "slot {} released after {} ms",
                index,
                started.elapsed().as_millis()
            );
        }

        state.sequence = Some(sequence);
        state.frame_index = frame_index;
        state.phase = SlotPhase::Pending;
        state.features = Arc::new(SlotFeatures::default());
        state.forward_claimed = false;
        state.in_flight = true;

        Some(SlotLease {
            ring: Arc::clone(self),
            index,
            sequence,
            waited,
        })
    }

    /// Publish the lease holder's features and mark the slot Ready.
    pub fn publish(&self, lease: &SlotLease, features: SlotFeatures) -> Arc<SlotFeatures> {
        let features = Arc::new(features);
        let mut state = self.slots[lease.index].state.lock();
        debug_assert_eq!(state.sequence, Some(lease.sequence));
        state.features = Arc::clone(&features);
        state.phase = SlotPhase::Ready;
        features
    }

    pub fn inspect(&self, index: usize) -> SlotView {
        let state = self.slots[index].state.lock();
        SlotView {
            index,
            sequence: state.sequence,
            phase: state.phase,
            frame_index: state.frame_index,
            features: Arc::clone(&state.features),
        }
    }

    /// Claim the pair `(sequence, sequence + 1)`. The claim lives on the slot of
    /// `sequence`, so both work units of a pair race on the same flag.
    pub fn try_claim_pair(&self, index: usize, sequence: u64) -> Claim {
        let mut state = self.slots[index].state.lock();
        if state.sequence != Some(sequence) {
            return Claim::Superseded(state.sequence);
        }
        if state.forward_claimed {
            return Claim::AlreadyClaimed;
        }
        state.forward_claimed = true;
        Claim::Granted
    }

    fn release(&self, index: usize) {
        let slot = &self.slots[index];
        slot.state.lock().in_flight = false;
        slot.released.notify_all();
    }
}

/// Completion token for one occupant of a slot.
///
/// Held by the work unit for its whole run; dropping it (also during unwinding)
/// lets the driver reuse the slot.
pub struct SlotLease {
    ring: Arc<DescriptorRing>,
    index: usize,
    sequence: u64,
    waited: bool,
}

impl SlotLease {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// True when arming had to wait for the previous occupant.
    pub fn waited_for_reuse(&self) -> bool {
        self.waited
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.ring.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn features(rows: usize) -> SlotFeatures {
        let mut descriptors = Descriptors::new(1);
        for i in 0..rows {
            descriptors.push_row(&[i as f32]).unwrap();
        }
        let keypoints = (0..rows).map(|i| Keypoint::new(i as f32, 0.0, 1.0)).collect();
        SlotFeatures::new(keypoints, descriptors)
    }

    #[test]
    fn neighbour_indices_wrap() {
        let ring = DescriptorRing::new(5);
        assert_eq!(ring.previous_index(0), 4);
        assert_eq!(ring.next_index(4), 0);
        assert_eq!(ring.index_of(12), 2);
    }

    #[test]
    fn arm_resets_slot_and_publish_makes_it_ready() {
        let ring = DescriptorRing::new(3);
        let cancel = CancelToken::new();
        assert_eq!(ring.inspect(0).phase, SlotPhase::Vacant);

        let lease = ring.arm(0, 0, 1, &cancel).unwrap();
        let view = ring.inspect(0);
        assert_eq!(view.sequence, Some(0));
        assert_eq!(view.phase, SlotPhase::Pending);
        assert!(!view.is_valid());

        ring.publish(&lease, features(2));
        let view = ring.inspect(0);
        assert!(view.is_ready());
        assert!(view.is_valid());
        assert_eq!(view.features.keypoints.len(), 2);
        drop(lease);

        let _lease = ring.arm(0, 3, 4, &cancel).unwrap();
        let view = ring.inspect(0);
        assert_eq!(view.sequence, Some(3));
        assert_eq!(view.frame_index, 4);
        assert_eq!(view.phase, SlotPhase::Pending);
        assert!(view.features.keypoints.is_empty());
    }

    #[test]
    fn pair_is_claimed_once() {
        let ring = DescriptorRing::new(4);
        let _lease = ring.arm(1, 5, 6, &CancelToken::new()).unwrap();
        assert_eq!(ring.try_claim_pair(1, 5), Claim::Granted);
        assert_eq!(ring.try_claim_pair(1, 5), Claim::AlreadyClaimed);
        assert_eq!(ring.try_claim_pair(1, 1), Claim::Superseded(Some(5)));
        assert_eq!(ring.try_claim_pair(2, 6), Claim::Superseded(None));
    }

    #[test]
    fn concurrent_claims_grant_exactly_one() {
        let ring = DescriptorRing::new(4);
        let _lease = ring.arm(0, 0, 1, &CancelToken::new()).unwrap();
        let granted: usize = (0..8)
            .map(|_| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || ring.try_claim_pair(0, 0) == Claim::Granted)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(granted, 1);
    }

    #[test]
    fn arm_waits_for_previous_lease() {
        let ring = DescriptorRing::new(2);
        let cancel = CancelToken::new();
        let lease = ring.arm(0, 0, 1, &cancel).unwrap();
        assert!(!lease.waited_for_reuse());

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(lease);
        });
        let next = ring.arm(0, 2, 3, &cancel).unwrap();
        releaser.join().unwrap();
        assert!(next.waited_for_reuse());
        assert_eq!(ring.inspect(0).sequence, Some(2));
    }

    #[test]
    fn arm_gives_up_when_cancelled() {
        let ring = DescriptorRing::new(2);
        let cancel = CancelToken::new();
        let _lease = ring.arm(1, 1, 2, &cancel).unwrap();
        cancel.cancel();
        assert!(ring.arm(1, 3, 4, &cancel).is_none());
        assert_eq!(ring.inspect(1).sequence, Some(1));
    }
}
