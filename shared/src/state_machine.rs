//! Mission Phase State Machine
//!
//! Defines the mission lifecycle and which transitions between phases are valid.
//! Phases only move forward. `Failed` is reachable from anywhere and is terminal;
//! `Terminated` is reachable only from `Landing`.

/// Why a mission was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    ConnectionTimeout,
    HealthTimeout,
    ArmRejected,
    TakeoffTimeout,
    OffboardTransitionFailure,
    TelemetryStale,
    FlightController,
}

/// Mission lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissionPhase {
    Disconnected,
    Connecting,
    AwaitingHealth,
    Armed,
    TakingOff,
    Holding,
    OffboardTransition,
    Active,
    Landing,
    Terminated,
    Failed(FailureReason),
}

impl MissionPhase {
    /// Position along the lifecycle, used to enforce forward-only movement
    fn rank(&self) -> u8 {
        match self {
            MissionPhase::Disconnected => 0,
            MissionPhase::Connecting => 1,
            MissionPhase::AwaitingHealth => 2,
            MissionPhase::Armed => 3,
            MissionPhase::TakingOff => 4,
            MissionPhase::Holding => 5,
            MissionPhase::OffboardTransition => 6,
            MissionPhase::Active => 7,
            MissionPhase::Landing => 8,
            MissionPhase::Terminated => 9,
            MissionPhase::Failed(_) => 10,
        }
    }

    /// The mission is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionPhase::Terminated | MissionPhase::Failed(_))
    }

    /// The vehicle may be off the ground in this phase
    pub fn is_airborne(&self) -> bool {
        matches!(
            self,
            MissionPhase::TakingOff
                | MissionPhase::Holding
                | MissionPhase::OffboardTransition
                | MissionPhase::Active
                | MissionPhase::Landing
        )
    }
}

/// Events that can trigger phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionEvent {
    /// Flight controller link requested
    ConnectStarted,
    /// Flight controller link reported connected
    LinkUp,
    /// Arm accepted (health already confirmed)
    Armed,
    /// Takeoff command accepted
    TakeoffStarted,
    /// Takeoff altitude reached and autopilot hold engaged
    TakeoffComplete,
    /// Offboard handover started
    OffboardRequested,
    /// Offboard mode accepted
    OffboardStarted,
    /// Land commanded
    LandingStarted,
    /// Teardown finished
    Landed,
    /// Unrecoverable failure
    Fault(FailureReason),
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and the phase changed
    Success(MissionPhase),
    /// Transition was invalid from the current phase
    Invalid {
        from: MissionPhase,
        event: MissionEvent,
    },
    /// The mission failed
    Failed {
        from: MissionPhase,
        reason: FailureReason,
    },
}

/// The mission lifecycle state machine
#[derive(Debug)]
pub struct MissionStateMachine {
    current_phase: MissionPhase,
}

impl Default for MissionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MissionStateMachine {
    /// Create a new state machine in Disconnected phase
    pub fn new() -> Self {
        Self {
            current_phase: MissionPhase::Disconnected,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> MissionPhase {
        self.current_phase
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: MissionEvent) -> TransitionResult {
        if let MissionEvent::Fault(reason) = event {
            let from = self.current_phase;
            if matches!(from, MissionPhase::Failed(_)) {
                return TransitionResult::Invalid { from, event };
            }
            debug_assert!(is_valid_transition(from, MissionPhase::Failed(reason)));
            self.current_phase = MissionPhase::Failed(reason);
            return TransitionResult::Failed { from, reason };
        }

        match self.get_next_phase(&event) {
            Some(phase) => {
                debug_assert!(is_valid_transition(self.current_phase, phase));
                self.current_phase = phase;
                TransitionResult::Success(phase)
            }
            None => TransitionResult::Invalid {
                from: self.current_phase,
                event,
            },
        }
    }

    /// Get the next phase for a given event, if the transition is valid
    fn get_next_phase(&self, event: &MissionEvent) -> Option<MissionPhase> {
        use MissionEvent::*;
        use MissionPhase as P;

        match (self.current_phase, event) {
            (P::Disconnected, ConnectStarted) => Some(P::Connecting),
            (P::Connecting, LinkUp) => Some(P::AwaitingHealth),
            (P::AwaitingHealth, Armed) => Some(P::Armed),
            (P::Armed, TakeoffStarted) => Some(P::TakingOff),
            (P::TakingOff, TakeoffComplete) => Some(P::Holding),
            (P::Holding, OffboardRequested) => Some(P::OffboardTransition),
            (P::OffboardTransition, OffboardStarted) => Some(P::Active),

            // Landing can be commanded from any phase where the vehicle is armed
            (
                P::Armed | P::TakingOff | P::Holding | P::OffboardTransition | P::Active,
                LandingStarted,
            ) => Some(P::Landing),

            (P::Landing, Landed) => Some(P::Terminated),

            _ => None,
        }
    }
}

/// Check if a transition from one phase to another is generally valid
pub fn is_valid_transition(from: MissionPhase, to: MissionPhase) -> bool {
    match (from, to) {
        (MissionPhase::Failed(_), _) => false,
        (_, MissionPhase::Failed(_)) => true,
        (MissionPhase::Terminated, _) => false,
        (_, MissionPhase::Terminated) => from == MissionPhase::Landing,
        (_, MissionPhase::Landing) => from.rank() >= MissionPhase::Armed.rank() && from != to,
        _ => to.rank() == from.rank() + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_active(fsm: &mut MissionStateMachine) {
        for event in [
            MissionEvent::ConnectStarted,
            MissionEvent::LinkUp,
            MissionEvent::Armed,
            MissionEvent::TakeoffStarted,
            MissionEvent::TakeoffComplete,
            MissionEvent::OffboardRequested,
            MissionEvent::OffboardStarted,
        ] {
            let result = fsm.process_event(event);
            assert!(matches!(result, TransitionResult::Success(_)), "{:?}", event);
        }
    }

    #[test]
    fn test_initial_phase() {
        let fsm = MissionStateMachine::new();
        assert_eq!(fsm.phase(), MissionPhase::Disconnected);
    }

    #[test]
    fn test_normal_mission_flow() {
        let mut fsm = MissionStateMachine::new();
        run_to_active(&mut fsm);
        assert_eq!(fsm.phase(), MissionPhase::Active);

        let result = fsm.process_event(MissionEvent::LandingStarted);
        assert_eq!(result, TransitionResult::Success(MissionPhase::Landing));

        let result = fsm.process_event(MissionEvent::Landed);
        assert_eq!(result, TransitionResult::Success(MissionPhase::Terminated));
        assert!(fsm.phase().is_terminal());
    }

    #[test]
    fn test_cannot_skip_phases() {
        let mut fsm = MissionStateMachine::new();

        // Can't arm before the link is up
        let result = fsm.process_event(MissionEvent::Armed);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.phase(), MissionPhase::Disconnected);

        // Can't finish a landing that never started
        let result = fsm.process_event(MissionEvent::Landed);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn test_landing_before_active() {
        let mut fsm = MissionStateMachine::new();
        fsm.process_event(MissionEvent::ConnectStarted);
        fsm.process_event(MissionEvent::LinkUp);
        fsm.process_event(MissionEvent::Armed);
        fsm.process_event(MissionEvent::TakeoffStarted);

        let result = fsm.process_event(MissionEvent::LandingStarted);
        assert_eq!(result, TransitionResult::Success(MissionPhase::Landing));
    }

    #[test]
    fn test_failure_from_any_phase_is_terminal() {
        let mut fsm = MissionStateMachine::new();
        fsm.process_event(MissionEvent::ConnectStarted);

        let result = fsm.process_event(MissionEvent::Fault(FailureReason::ConnectionTimeout));
        assert_eq!(
            result,
            TransitionResult::Failed {
                from: MissionPhase::Connecting,
                reason: FailureReason::ConnectionTimeout,
            }
        );

        // Nothing leaves Failed, not even another fault
        let result = fsm.process_event(MissionEvent::LandingStarted);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        let result = fsm.process_event(MissionEvent::Fault(FailureReason::TakeoffTimeout));
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(
            fsm.phase(),
            MissionPhase::Failed(FailureReason::ConnectionTimeout)
        );
    }

    #[test]
    fn test_is_valid_transition() {
        use MissionPhase::*;

        assert!(is_valid_transition(Disconnected, Connecting));
        assert!(is_valid_transition(Active, Landing));
        assert!(is_valid_transition(Holding, Landing));
        assert!(is_valid_transition(Landing, Terminated));
        assert!(is_valid_transition(Connecting, Failed(FailureReason::HealthTimeout)));

        assert!(!is_valid_transition(Active, Holding));
        assert!(!is_valid_transition(Active, Terminated));
        assert!(!is_valid_transition(Connecting, Landing));
        assert!(!is_valid_transition(Terminated, Landing));
        assert!(!is_valid_transition(Failed(FailureReason::ArmRejected), Landing));
    }

    #[test]
    fn test_airborne_phases() {
        assert!(!MissionPhase::Armed.is_airborne());
        assert!(MissionPhase::TakingOff.is_airborne());
        assert!(MissionPhase::Active.is_airborne());
        assert!(!MissionPhase::Terminated.is_airborne());
    }
}
