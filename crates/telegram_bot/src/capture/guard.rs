/// Who is asking to finalize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    User,
    /// Auto-finalize timer armed at this generation.
    Timer(u64),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Open,
    InProgress,
    Done,
}

/// At-most-once gate in front of the finalize routine.
///
/// Both the confirm button and the auto-finalize timer must win
/// [`FinalizeGuard::try_claim`] before writing anything. The guard lives
/// behind the conversation lock, so claims are serialized. Each arm bumps a
/// generation: a timer armed before an edit cannot claim after it.
#[derive(Clone, Debug, Default)]
pub struct FinalizeGuard {
    generation: u64,
    armed: bool,
    phase: Phase,
}

impl FinalizeGuard {
    /// Arm the timer; returns the generation the timer must present.
    pub fn arm(&mut self) -> Option<u64> {
        if self.phase != Phase::Open {
            return None;
        }
        self.generation += 1;
        self.armed = true;
        Some(self.generation)
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn try_claim(&mut self, claim: Claim) -> bool {
        if self.phase != Phase::Open {
            return false;
        }
        if let Claim::Timer(generation) = claim
            && (!self.armed || generation != self.generation)
        {
            return false;
        }
        self.phase = Phase::InProgress;
        self.armed = false;
        true
    }

    pub fn finish(&mut self) {
        self.phase = Phase::Done;
        self.armed = false;
    }

    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let mut guard = FinalizeGuard::default();
        let generation = guard.arm().unwrap();
        assert!(guard.try_claim(Claim::User));
        assert!(!guard.try_claim(Claim::Timer(generation)));
        assert!(!guard.try_claim(Claim::User));
        guard.finish();
        assert!(guard.is_done());
        assert_eq!(guard.arm(), None);
    }

    #[test]
    fn timer_wins_over_late_user() {
        let mut guard = FinalizeGuard::default();
        let generation = guard.arm().unwrap();
        assert!(guard.try_claim(Claim::Timer(generation)));
        assert!(!guard.try_claim(Claim::User));
        assert!(!guard.is_open());
    }

    #[test]
    fn disarmed_timer_cannot_claim() {
        let mut guard = FinalizeGuard::default();
        let generation = guard.arm().unwrap();
        guard.disarm();
        assert!(!guard.try_claim(Claim::Timer(generation)));
        assert!(guard.is_open());
    }

    #[test]
    fn stale_generation_cannot_claim_after_rearm() {
        let mut guard = FinalizeGuard::default();
        let first = guard.arm().unwrap();
        guard.disarm();
        let second = guard.arm().unwrap();
        assert_ne!(first, second);
        assert!(!guard.try_claim(Claim::Timer(first)));
        assert!(guard.try_claim(Claim::Timer(second)));
    }
}
