mod field;
mod settings;

pub use self::field::Field;
pub use self::settings::{FinishOpts, KeepJobs, RateLimit, Settings, DEFAULT_MAX_EVENTS_LEN};
