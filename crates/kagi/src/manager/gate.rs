/// Single-slot gate pausing the intake of initialization data while a
/// session negotiation covering a whole content is in progress.
#[derive(Debug, Default)]
pub(crate) struct InitDataGate {
    locked: bool,
}

/// Proof of holding the gate. Only its holder can open the gate again.
#[derive(Debug)]
#[must_use = "the gate stays closed until the ticket is released"]
pub(crate) struct GateTicket(());

impl InitDataGate {
    pub fn is_open(&self) -> bool {
        !self.locked
    }

    /// Close the gate, returning `None` if it already was.
    pub fn acquire(&mut self) -> Option<GateTicket> {
        if self.locked {
            return None;
        }
        tracing::debug!("EME: Locking init data intake");
        self.locked = true;
        Some(GateTicket(()))
    }

    pub fn release(&mut self, ticket: GateTicket) {
        let GateTicket(()) = ticket;
        tracing::debug!("EME: Unlocking init data intake");
        self.locked = false;
    }
}
