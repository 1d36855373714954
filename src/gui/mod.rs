mod device_selector;
mod dispatcher;
mod error;
mod monitor;

pub use device_selector::{device_selector, rig_choices, RigDevice};
pub use dispatcher::{describe, Command, Dispatcher, MonitorStatus, MonitorSummary};
pub use error::MonitorError;
pub use monitor::{tracking_monitor, RoiCursor};
