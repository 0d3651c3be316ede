pub mod record;
pub mod store;

pub use record::{
    RecordError, RecordVersion, RunInfo, SweepMode, SweepRecord, TransportColumns, RECORD_FORMAT,
};
pub use store::{RunStore, StoreError};
