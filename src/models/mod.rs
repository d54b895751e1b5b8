// Domain models

mod sample;
mod status;

pub use sample::Sample;
pub use status::{HealthState, ServiceStatus, StatusSubmission, flatten_details};
