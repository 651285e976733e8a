use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    NoSource,
    ProbePending,
    /// The element streams straight from the origin.
    DirectPlay,
    FullFetchPending,
    /// Served from the bucket without touching the network.
    Cached,
    /// Backed by a fully fetched blob.
    Ready,
    Errored,
}

impl SessionState {
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, NoSource)
                | (Idle, ProbePending)
                | (Idle, Cached)
                | (ProbePending, ProbePending)
                | (ProbePending, DirectPlay)
                | (ProbePending, FullFetchPending)
                | (ProbePending, Errored)
                | (FullFetchPending, Ready)
                | (FullFetchPending, DirectPlay)
                | (DirectPlay, ProbePending)
                | (DirectPlay, Cached)
                | (Ready, ProbePending)
                | (Ready, Cached)
                | (Cached, ProbePending)
                | (Cached, Cached)
                | (Errored, ProbePending)
                | (Errored, Cached)
        )
    }

    /// A load has finished with this session, successfully or not.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            Self::NoSource | Self::DirectPlay | Self::Cached | Self::Ready | Self::Errored
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::NoSource => write!(f, "no_source"),
            Self::ProbePending => write!(f, "probe_pending"),
            Self::DirectPlay => write!(f, "direct_play"),
            Self::FullFetchPending => write!(f, "full_fetch_pending"),
            Self::Cached => write!(f, "cached"),
            Self::Ready => write!(f, "ready"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn probe_outcomes() {
        assert!(ProbePending.can_transition_to(DirectPlay));
        assert!(ProbePending.can_transition_to(FullFetchPending));
        assert!(ProbePending.can_transition_to(Errored));
        assert!(!ProbePending.can_transition_to(Ready));
    }

    #[test]
    fn full_fetch_degrades_to_direct_play() {
        assert!(FullFetchPending.can_transition_to(Ready));
        assert!(FullFetchPending.can_transition_to(DirectPlay));
        assert!(!FullFetchPending.can_transition_to(Cached));
    }

    #[test]
    fn no_source_is_terminal() {
        for target in [Idle, ProbePending, DirectPlay, FullFetchPending, Cached, Ready, Errored] {
            assert!(!NoSource.can_transition_to(target));
        }
    }

    #[test]
    fn settled_states_can_reload() {
        for state in [DirectPlay, Ready, Cached, Errored] {
            assert!(state.is_settled());
            assert!(state.can_transition_to(ProbePending));
        }
        assert!(!FullFetchPending.is_settled());
    }
}
