pub mod dispatcher;
pub mod format;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use format::{format_notification, FormattedBody, FormattedNotification};
