use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::state::Steppable;
use crate::{EntityId, Frame, PlayerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub id: EntityId,
    pub owner: PlayerId,
    pub value: i64,
    pub rate: i64,
}

impl Counter {
    pub fn new(owner: PlayerId) -> Self {
        Self {
            id: 0,
            owner,
            value: 0,
            rate: 1,
        }
    }

    pub fn with_id(id: EntityId, owner: PlayerId) -> Self {
        Self {
            id,
            ..Self::new(owner)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CounterCommand {
    Add(i64),
    Double,
    SetRate(i64),
}

impl Steppable for Counter {
    type Command = CounterCommand;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn step(&mut self, _frame: Frame) {
        self.value = self.value.wrapping_add(self.rate);
    }

    fn apply_command(&mut self, command: &Command<CounterCommand>) {
        if command.player != self.owner {
            return;
        }
        match command.payload {
            CounterCommand::Add(amount) => self.value = self.value.wrapping_add(amount),
            CounterCommand::Double => self.value = self.value.wrapping_mul(2),
            CounterCommand::SetRate(rate) => self.rate = rate,
        }
    }
}

pub fn command(
    player: PlayerId,
    id: u32,
    frame: Frame,
    payload: CounterCommand,
) -> Command<CounterCommand> {
    Command::new(player, id, frame, payload)
}
