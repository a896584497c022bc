//! Device automation adapters.

pub mod dispatcher;
pub mod mock;
pub mod process;

pub use dispatcher::DeviceDispatcher;
pub use mock::MockDeviceAutomation;
pub use process::ProcessDeviceAutomation;
