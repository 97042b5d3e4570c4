use serde::{Deserialize, Serialize};

use crate::command::FrameCommandBuffer;
use crate::state::{SimulationState, Steppable};
use crate::{EntityId, Frame};

/// Borrowed view written by `Tss::packetize`; field order must match [`OwnedSnapshot`].
#[derive(Serialize)]
#[serde(bound = "")]
pub(super) struct SnapshotRef<'a, E: Steppable> {
    pub delays: &'a [Frame],
    pub states: &'a [SimulationState<E>],
    pub buffer: &'a FrameCommandBuffer<E>,
    pub next_entity_id: EntityId,
}

#[derive(Deserialize)]
#[serde(bound = "")]
pub(super) struct OwnedSnapshot<E: Steppable> {
    pub delays: Vec<Frame>,
    pub states: Vec<SimulationState<E>>,
    pub buffer: FrameCommandBuffer<E>,
    pub next_entity_id: EntityId,
}

impl<E: Steppable> OwnedSnapshot<E> {
    pub fn validate(&self) -> Result<(), String> {
        if self.delays.is_empty() || self.delays[0] != 0 {
            return Err(format!("bad delay offsets {:?}", self.delays));
        }
        if !self.delays.windows(2).all(|w| w[0] < w[1]) {
            return Err(format!("delays not ascending {:?}", self.delays));
        }
        if self.states.len() != self.delays.len() {
            return Err(format!(
                "{} states for {} delays",
                self.states.len(),
                self.delays.len()
            ));
        }

        let leading = self.states[0].frame();
        for (state, delay) in self.states.iter().zip(&self.delays) {
            if leading.checked_sub(*delay) != Some(state.frame()) {
                return Err(format!(
                    "copy at delay {} is at frame {}, leading frame is {}",
                    delay,
                    state.frame(),
                    leading
                ));
            }
        }

        if self.next_entity_id == 0 {
            return Err(String::from("entity id allocator at zero"));
        }
        Ok(())
    }
}
