pub mod devices;
pub mod service;

pub use devices::{DeviceCapture, DevicePlayer, ServiceLookup};
pub use service::{CallHandle, CallService, user_facing_call_error};
