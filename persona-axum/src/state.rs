use persona_ledger::LedgerEngine;

/// Router state: the engine is cheap to clone and shares its backend
#[derive(Clone)]
pub struct PersonaState {
    pub engine: LedgerEngine,
}

impl PersonaState {
    pub fn new(engine: LedgerEngine) -> Self {
        Self { engine }
    }
}
