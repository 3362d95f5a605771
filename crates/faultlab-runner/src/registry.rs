//! Single-slot record of the active fault-injection handle. The runner treats
//! this as the only source of truth for "is there a fault to destroy" --
//! cleanup never infers fault state from process lists.

/// Opaque identifier for a created fault, plus whether destroying it needs
/// elevated privilege.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultHandle {
    pub id: String,
    pub requires_elevated_destroy: bool,
}

#[derive(Debug, Default)]
pub struct FaultHandleRegistry {
    active: Option<FaultHandle>,
}

impl FaultHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the single active handle. Only called after `clear`; the
    /// controller never injects a second anomaly before cleaning up the first.
    pub fn record(&mut self, handle: FaultHandle) {
        self.active = Some(handle);
    }

    /// Empties the slot. Idempotent: both the teardown guard path and the
    /// explicit cleanup step may call this.
    pub fn clear(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&FaultHandle> {
        self.active.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> FaultHandle {
        FaultHandle {
            id: id.to_string(),
            requires_elevated_destroy: false,
        }
    }

    #[test]
    fn record_then_clear_leaves_slot_empty() {
        let mut reg = FaultHandleRegistry::new();
        assert!(reg.active().is_none());
        reg.record(handle("f-1"));
        assert_eq!(reg.active().map(|h| h.id.as_str()), Some("f-1"));
        reg.clear();
        assert!(reg.active().is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let mut reg = FaultHandleRegistry::new();
        reg.record(handle("f-2"));
        reg.clear();
        reg.clear();
        assert!(reg.active().is_none());
    }

    #[test]
    fn record_replaces_prior_handle() {
        let mut reg = FaultHandleRegistry::new();
        reg.record(handle("old"));
        reg.record(handle("new"));
        assert_eq!(reg.active().map(|h| h.id.as_str()), Some("new"));
    }
}
