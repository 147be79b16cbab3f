pub mod sleep;
pub mod time_entry;
pub mod token;

pub use sleep::{SleepSession, SleepSessionsResponse};
pub use time_entry::{
  ClockifyProject, ClockifyUser, ClockifyWorkspace, CreateProjectRequest, CreateTimeEntryRequest,
  TimeEntry, TimeInterval,
};
pub use token::{TokenRecord, TokenResponse};
