use std::collections::VecDeque;

use super::error::TssError;
use super::snapshot::{OwnedSnapshot, SnapshotRef};
use crate::codec;
use crate::command::{Command, FrameCommandBuffer, InsertOutcome};
use crate::state::{SimulationState, StateHasher, Steppable};
use crate::{EntityId, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TssEvent {
    /// Local history could not absorb an operation; a full snapshot is required.
    Invalidated { frame: Frame },
    /// A full snapshot was applied.
    Synchronized { frame: Frame },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Scheduled for a frame no copy has reached yet.
    Buffered,
    /// Copies newer than `from` were regenerated by forward replay.
    Replayed { from: Frame, regenerated: usize },
    /// A tentative command was confirmed without changing state.
    Confirmed,
    Duplicate,
}

/// Trailing state synchronization container.
///
/// Keeps one [`SimulationState`] per delay, index 0 being the leading (most speculative) copy and
/// the last index the trailing copy. Every copy advances in lock-step, so their frame distances
/// stay fixed; late input is absorbed by replaying forward from the newest copy that has not yet
/// passed the input's frame.
pub struct Tss<E: Steppable> {
    delays: Vec<Frame>,
    states: Vec<SimulationState<E>>,
    buffer: FrameCommandBuffer<E>,
    next_entity_id: EntityId,
    waiting_for_synchronization: bool,
    events: VecDeque<TssEvent>,
}

impl<E: Steppable> Tss<E> {
    /// Creates empty copies for `delays` (in frames, strictly ascending).
    ///
    /// The leading copy starts at the largest relative delay so the trailing copy starts at 0.
    pub fn new(delays: &[Frame]) -> Result<Self, TssError> {
        if delays.is_empty() || !delays.windows(2).all(|w| w[0] < w[1]) {
            return Err(TssError::InvalidDelays(delays.to_vec()));
        }

        let offsets: Vec<Frame> = delays.iter().map(|d| d - delays[0]).collect();
        let span = offsets[offsets.len() - 1];
        let states = offsets
            .iter()
            .map(|offset| SimulationState::new(span - offset))
            .collect();

        Ok(Self {
            delays: offsets,
            states,
            buffer: FrameCommandBuffer::new(),
            next_entity_id: 1,
            waiting_for_synchronization: false,
            events: VecDeque::new(),
        })
    }

    pub fn from_packet(data: &[u8]) -> Result<Self, TssError> {
        let snapshot: OwnedSnapshot<E> = codec::decode(data)?;
        snapshot.validate().map_err(TssError::MalformedSnapshot)?;

        Ok(Self {
            delays: snapshot.delays,
            states: snapshot.states,
            buffer: snapshot.buffer,
            next_entity_id: snapshot.next_entity_id,
            waiting_for_synchronization: false,
            events: VecDeque::new(),
        })
    }

    pub fn current_frame(&self) -> Frame {
        self.states[0].frame()
    }

    pub fn trailing_frame(&self) -> Frame {
        self.trailing_state().frame()
    }

    /// Frame distance between the leading and the trailing copy.
    pub fn max_delay(&self) -> Frame {
        self.delays[self.delays.len() - 1]
    }

    /// Delays relative to the leading copy; the first entry is always 0.
    pub fn delays(&self) -> &[Frame] {
        &self.delays
    }

    pub fn states(&self) -> &[SimulationState<E>] {
        &self.states
    }

    pub fn leading_state(&self) -> &SimulationState<E> {
        &self.states[0]
    }

    pub fn trailing_state(&self) -> &SimulationState<E> {
        &self.states[self.states.len() - 1]
    }

    pub fn buffer(&self) -> &FrameCommandBuffer<E> {
        &self.buffer
    }

    pub fn is_waiting_for_synchronization(&self) -> bool {
        self.waiting_for_synchronization
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = TssEvent> + '_ {
        self.events.drain(..)
    }

    /// Advances every copy by one frame, trailing copy first.
    pub fn update(&mut self) {
        for state in self.states.iter_mut().rev() {
            self.buffer.apply(state);
            state.step();
        }

        let trailing = self.trailing_frame();
        self.buffer.purge_before(trailing);
    }

    /// Steps forward until the leading copy reaches `target`. Returns the number of frames run.
    pub fn run_to_frame(&mut self, target: Frame) -> Frame {
        let current = self.current_frame();
        if target < current {
            log::debug!("Ignoring rewind from frame {} to {}", current, target);
            return 0;
        }

        for _ in current..target {
            self.update();
        }
        target - current
    }

    pub fn push_command(&mut self, command: Command<E::Command>) -> Result<PushOutcome, TssError> {
        let frame = command.frame;
        self.admit(frame)?;
        let outcome = self.buffer.insert_command(command);
        Ok(self.settle(frame, outcome))
    }

    /// Schedules `entity` to appear at `frame`. An entity with id 0 gets a fresh id.
    pub fn add_steppable(&mut self, mut entity: E, frame: Frame) -> Result<EntityId, TssError> {
        self.admit(frame)?;

        if entity.id() == 0 {
            entity.set_id(self.allocate_entity_id());
        } else if entity.id() >= self.next_entity_id {
            self.next_entity_id = entity.id() + 1;
        }

        let id = entity.id();
        let outcome = self.buffer.insert_add(frame, entity);
        self.settle(frame, outcome);
        Ok(id)
    }

    pub fn remove_steppable(&mut self, id: EntityId, frame: Frame) -> Result<PushOutcome, TssError> {
        self.admit(frame)?;
        let outcome = self.buffer.insert_remove(frame, id);
        Ok(self.settle(frame, outcome))
    }

    pub fn allocate_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Folds the trailing copy's content into `hasher`.
    pub fn hash(&self, hasher: &mut StateHasher) {
        self.trailing_state().hash(hasher);
    }

    pub fn trailing_hash(&self) -> u64 {
        let mut hasher = StateHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Forces a full resynchronization. Returns false if one was already pending.
    pub fn invalidate(&mut self) -> bool {
        let frame = self.current_frame();
        self.invalidate_at(frame)
    }

    pub fn packetize(&self) -> Result<Vec<u8>, TssError> {
        let snapshot = SnapshotRef {
            delays: &self.delays,
            states: &self.states,
            buffer: &self.buffer,
            next_entity_id: self.next_entity_id,
        };
        Ok(codec::encode(&snapshot)?)
    }

    /// Replaces all copies, delays and buffered operations with a received snapshot.
    pub fn depacketize(&mut self, data: &[u8]) -> Result<(), TssError> {
        let restored = Self::from_packet(data)?;
        let events = std::mem::take(&mut self.events);

        *self = restored;
        self.events = events;
        self.events.push_back(TssEvent::Synchronized {
            frame: self.current_frame(),
        });
        Ok(())
    }

    fn admit(&mut self, frame: Frame) -> Result<(), TssError> {
        if self.waiting_for_synchronization {
            return Err(TssError::AwaitingSnapshot);
        }

        let trailing = self.trailing_frame();
        if frame < trailing {
            self.invalidate_at(frame);
            return Err(TssError::Stale { frame, trailing });
        }
        Ok(())
    }

    fn settle(&mut self, frame: Frame, outcome: InsertOutcome) -> PushOutcome {
        if !outcome.changes_state() {
            return match outcome {
                InsertOutcome::Upgraded => PushOutcome::Confirmed,
                _ => PushOutcome::Duplicate,
            };
        }

        if frame >= self.current_frame() {
            PushOutcome::Buffered
        } else {
            let regenerated = self.replay_from(frame);
            PushOutcome::Replayed {
                from: frame,
                regenerated,
            }
        }
    }

    /// Regenerates every copy that already passed `frame`.
    fn replay_from(&mut self, frame: Frame) -> usize {
        let Some(source) = self.states.iter().position(|s| s.frame() <= frame) else {
            return 0;
        };

        let mut scratch = self.states[source].clone();
        for target in (0..source).rev() {
            let target_frame = self.states[target].frame();
            while scratch.frame() < target_frame {
                self.buffer.apply(&mut scratch);
                scratch.step();
            }
            self.states[target] = scratch.clone();
        }

        log::debug!(
            "Replayed {} copies from frame {} (input at frame {})",
            source,
            self.states[source].frame(),
            frame
        );
        source
    }

    fn invalidate_at(&mut self, frame: Frame) -> bool {
        if self.waiting_for_synchronization {
            return false;
        }

        log::warn!(
            "State invalidated at frame {} (trailing frame {})",
            frame,
            self.trailing_frame()
        );
        self.waiting_for_synchronization = true;
        self.events.push_back(TssEvent::Invalidated { frame });
        true
    }
}
