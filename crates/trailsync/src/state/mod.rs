mod simulation;
mod steppable;

pub use simulation::SimulationState;
pub use steppable::{StateHasher, Steppable};
