use std::sync::{Arc, RwLock};

use crate::windowing::SurfaceId;

/// Who currently holds the systemwide grab, as far as this process knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabEntry {
    pub owner: String,
    pub surface: SurfaceId,
}

#[derive(Default)]
pub struct GrabLedger {
    inner: RwLock<Option<GrabEntry>>,
}

impl GrabLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `owner` as the holder. Returns the previous entry if it belonged
    /// to a different owner, which means ownership moved without a release.
    pub fn set_owner(&self, owner: impl Into<String>, surface: SurfaceId) -> Option<GrabEntry> {
        let entry = GrabEntry {
            owner: owner.into(),
            surface,
        };
        let Ok(mut guard) = self.inner.write() else {
            return None;
        };
        let previous = guard.replace(entry.clone());
        previous.filter(|prev| prev.owner != entry.owner)
    }

    pub fn clear_owner(&self, owner: &str) {
        if let Ok(mut guard) = self.inner.write() {
            if guard.as_ref().map(|e| e.owner.as_str()) == Some(owner) {
                *guard = None;
            }
        }
    }

    /// Forget any holder. Used after a systemwide ungrab.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }

    pub fn current(&self) -> Option<GrabEntry> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }

    pub fn is_held_by(&self, owner: &str) -> bool {
        self.current().is_some_and(|entry| entry.owner == owner)
    }
}

pub type SharedGrabLedger = Arc<GrabLedger>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_owner() {
        let ledger = GrabLedger::new();
        assert!(ledger.set_owner("gp_tklock", SurfaceId::new(1)).is_none());
        let entry = ledger.current().unwrap();
        assert_eq!(entry.owner, "gp_tklock");
        assert_eq!(entry.surface, SurfaceId::new(1));
    }

    #[test]
    fn clear_by_owner() {
        let ledger = GrabLedger::new();
        ledger.set_owner("event_eater", SurfaceId::new(2));
        ledger.clear_owner("event_eater");
        assert!(ledger.current().is_none());
    }

    #[test]
    fn clear_other_owner_noop() {
        let ledger = GrabLedger::new();
        ledger.set_owner("visual_tklock", SurfaceId::new(3));
        ledger.clear_owner("gp_tklock");
        assert!(ledger.is_held_by("visual_tklock"));
    }

    #[test]
    fn takeover_without_release_reports_previous() {
        let ledger = GrabLedger::new();
        ledger.set_owner("gp_tklock", SurfaceId::new(1));
        let displaced = ledger.set_owner("event_eater", SurfaceId::new(2)).unwrap();
        assert_eq!(displaced.owner, "gp_tklock");
        assert!(ledger.set_owner("event_eater", SurfaceId::new(2)).is_none());
    }
}
