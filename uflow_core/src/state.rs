//! The closed set of measurement states and the transition table.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementState {
    PowerOn,
    ErrorState,
    Standby,
    WifiConnect,
    Xfer,
    Tare,
    WaitFor10ml,
    Acquire,
    VolumeCheck,
    ComputeQmax,
    WaitForCal,
    RecalState,
    PowerOff,
}

impl MeasurementState {
    pub const ALL: [Self; 13] = [
        Self::PowerOn,
        Self::ErrorState,
        Self::Standby,
        Self::WifiConnect,
        Self::Xfer,
        Self::Tare,
        Self::WaitFor10ml,
        Self::Acquire,
        Self::VolumeCheck,
        Self::ComputeQmax,
        Self::WaitForCal,
        Self::RecalState,
        Self::PowerOff,
    ];

    /// Transition table. POWER_OFF is reachable from every other state;
    /// ERROR_STATE from every state except itself and POWER_OFF.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MeasurementState::*;
        match (self, next) {
            (PowerOff, _) => false,
            (_, PowerOff) => true,
            (ErrorState, Standby) => true,
            (ErrorState, _) => false,
            (_, ErrorState) => true,
            (PowerOn, Standby)
            | (Standby, Tare | WaitForCal)
            | (Tare, WaitFor10ml)
            | (WaitFor10ml, Acquire)
            | (Acquire, VolumeCheck)
            | (VolumeCheck, ComputeQmax)
            | (ComputeQmax, WifiConnect)
            | (WifiConnect, Xfer)
            | (Xfer, Standby)
            | (WaitForCal, RecalState)
            | (RecalState, Standby) => true,
            _ => false,
        }
    }

    /// States that expect a steady stream of samples (sensor watchdog armed).
    pub fn consumes_samples(self) -> bool {
        matches!(
            self,
            Self::PowerOn
                | Self::Tare
                | Self::WaitFor10ml
                | Self::Acquire
                | Self::WaitForCal
                | Self::RecalState
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PowerOn => "POWERON",
            Self::ErrorState => "ERROR_STATE",
            Self::Standby => "STANDBY",
            Self::WifiConnect => "WIFI_CONNECT",
            Self::Xfer => "XFER",
            Self::Tare => "TARE",
            Self::WaitFor10ml => "WAIT_FOR_10ML",
            Self::Acquire => "ACQUIRE",
            Self::VolumeCheck => "VOLUME_CHECK",
            Self::ComputeQmax => "COMPUTE_QMAX",
            Self::WaitForCal => "WAIT_FOR_CAL",
            Self::RecalState => "RECAL_STATE",
            Self::PowerOff => "POWER_OFF",
        }
    }
}

impl fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
