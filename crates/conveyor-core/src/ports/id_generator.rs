//! IdGenerator port.
//!
//! IDs keep the plain-string shape `{prefix}_{suffix}` (`image_recognition_01HZX...`)
//! but the suffix is a ULID: time-ordered, 80 random bits, no coordination
//! needed between producers.

use crate::domain::{NotificationId, NotificationKind, TaskId, TaskType};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator hands out task and notification ids.
///
/// `Send + Sync` so one generator can be shared by every producer and worker.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self, task_type: &TaskType) -> TaskId;

    fn generate_notification_id(&self, kind: NotificationKind) -> NotificationId;
}

/// ULID based generator.
///
/// The timestamp part comes from `C`, so a FixedClock gives a fixed prefix while
/// the random part still keeps ids unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self, task_type: &TaskType) -> TaskId {
        TaskId::new(format!("{}_{}", task_type, self.next_ulid()))
    }

    fn generate_notification_id(&self, kind: NotificationKind) -> NotificationId {
        NotificationId::new(format!("{}_{}", kind, self.next_ulid()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn task_ids_are_unique_under_a_frozen_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));
        let task_type = TaskType::new("image_recognition");

        let ids: HashSet<TaskId> = (0..10_000)
            .map(|_| id_gen.generate_task_id(&task_type))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn ids_carry_their_prefix() {
        let id_gen = UlidGenerator::new(SystemClock);

        let task_id = id_gen.generate_task_id(&TaskType::new("model_training"));
        let notification_id = id_gen.generate_notification_id(NotificationKind::TaskFailed);

        assert!(task_id.as_str().starts_with("model_training_"));
        assert!(notification_id.as_str().starts_with("task_failed_"));
    }

    #[test]
    fn ulid_suffix_encodes_clock_time() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let task_id = id_gen.generate_task_id(&TaskType::new("t"));
        let suffix = task_id.as_str().strip_prefix("t_").unwrap();
        let ulid = Ulid::from_string(suffix).unwrap();
        assert_eq!(ulid.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
