use crate::zone::StateBlock;

/// All zone blocks for one global frame time, as assembled by the zone
/// manager's purge.
#[derive(Debug)]
pub struct StateFrame {
    time: i64,
    blocks: Vec<StateBlock>,
}

impl StateFrame {
    pub fn new(time: i64, capacity: usize) -> Self {
        Self {
            time,
            blocks: Vec::with_capacity(capacity),
        }
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn add(&mut self, block: StateBlock) {
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[StateBlock] {
        &self.blocks
    }
}
