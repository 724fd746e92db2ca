//! Status returned from each control loop step.

use crate::fault::Fault;
use crate::state::MeasurementState;

#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    /// Stayed in the current state.
    Running,
    /// Entered the given state this step.
    Transition(MeasurementState),
    /// Entered ERROR_STATE with this fault.
    Faulted(Fault),
    /// Entered POWER_OFF; further steps are an error.
    PoweredOff,
}
