pub mod analysis;
pub mod axis;
pub mod controller;
pub mod error;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod ramp;
pub mod result;
pub mod safety;
pub mod sampling;
pub mod session;
pub mod tags;
pub mod timebase;

pub use axis::{AxisSpacing, SweepAxis, MAX_AXIS_POINTS};
pub use controller::{SweepConfig, SweepController};
pub use error::{ConfigurationError, InstrumentError, SweepError};
pub use hal::{
    Actuator, ChannelId, Claimed, InstrumentHandle, Reading, Sampler, SpectroscopyRecord,
    SpectroscopySampler, Trace,
};
#[cfg(feature = "simulation")]
pub use hal_sim::{GrapheneModel, SimulatedDevice};
pub use ramp::{RampConfig, RampPath, MAX_RAMP_WRITES};
pub use result::{SamplePoint, SweepAbort, SweepResult, SweepStats};
pub use safety::{OutputLimits, SafetyViolation, Setpoint, Unvalidated, Validated};
pub use sampling::{sample_averaged, Channel, ChannelSpec, Derived, Measurement, NamedReading};
pub use session::SafeShutdown;
pub use timebase::{Clock, SystemClock, TimeBase, VirtualClock};
