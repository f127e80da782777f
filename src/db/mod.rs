pub mod catalog;
pub mod certificates;
pub mod enrollments;
pub mod live_sessions;
pub mod notifications;
pub mod payments;
pub mod sessions;
pub mod users;

pub use catalog::*;
pub use certificates::*;
pub use enrollments::*;
pub use live_sessions::*;
pub use notifications::*;
pub use payments::*;
pub use sessions::*;
pub use users::*;
