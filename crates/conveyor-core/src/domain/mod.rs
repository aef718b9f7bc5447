//! Domain model: tasks, their lifecycle states, outcome notifications and ids.

pub mod ids;
pub mod notification;
pub mod state;
pub mod task;

pub use ids::{Id, IdMarker, NotificationId, TaskId};
pub use notification::{Notification, NotificationKind};
pub use state::TaskStatus;
pub use task::{Task, TaskType};
