use backtrace::Backtrace;
use std::fmt::{Display, Formatter};

/// Raised when a recompute cannot safely continue.
///
/// Mirrors the intent of the teacher's `BrainFailure`: carry a description,
/// a captured backtrace for postmortem logging, and a flag for whether the
/// valve/heating hardware may now be in an unknown state, so the caller
/// knows whether a defensive shutdown is required.
#[derive(Debug)]
pub struct ControllerFailure {
    description: String,
    trace: Backtrace,
    actions: CorrectiveActions,
}

impl ControllerFailure {
    pub fn new(description: String, actions: CorrectiveActions) -> Self {
        ControllerFailure {
            description,
            trace: Backtrace::new(),
            actions,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn corrective_actions(&self) -> &CorrectiveActions {
        &self.actions
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.trace
    }
}

impl Display for ControllerFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description)
    }
}

impl std::error::Error for ControllerFailure {}

#[derive(Debug, Default)]
pub struct CorrectiveActions {
    valve_state_unknown: bool,
    boiler_state_unknown: bool,
}

impl CorrectiveActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unknown_valve_state() -> Self {
        CorrectiveActions::new().with_unknown_valve_state()
    }

    pub fn unknown_boiler_state() -> Self {
        CorrectiveActions::new().with_unknown_boiler_state()
    }

    pub fn with_unknown_valve_state(mut self) -> Self {
        self.valve_state_unknown = true;
        self
    }

    pub fn with_unknown_boiler_state(mut self) -> Self {
        self.boiler_state_unknown = true;
        self
    }

    pub fn is_valve_state_unknown(&self) -> bool {
        self.valve_state_unknown
    }

    pub fn is_boiler_state_unknown(&self) -> bool {
        self.boiler_state_unknown
    }
}

/// Construct a [`ControllerFailure`] with a formatted description, the way the
/// teacher's `brain_fail!` macro wraps `BrainFailure::new`.
#[macro_export]
macro_rules! controller_fail {
    ($msg:expr) => {
        $crate::error::ControllerFailure::new($msg, $crate::error::CorrectiveActions::new())
    };
    ($msg:expr, $actions:expr) => {
        $crate::error::ControllerFailure::new($msg, $actions)
    };
}
