//! Domain identifiers (strongly-typed string IDs).
//!
//! IDs travel over the wire as plain strings (`image_recognition_01J...`), but in
//! code `TaskId` and `NotificationId` are distinct types. The marker type `T`
//! only exists at compile time (PhantomData), so `Id<T>` is exactly as large as
//! the `String` it wraps.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Marker trait for each identifier kind.
pub trait IdMarker: Send + Sync + 'static {
    /// Human readable kind, used in debug output.
    fn kind() -> &'static str;
}

/// Generic string identifier.
///
/// ```ignore
/// let task_id = TaskId::new("image_recognition_01HZX...");
/// let notification_id = NotificationId::new("task_complete_01HZX...");
/// // let _: TaskId = notification_id; // <- does not compile
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::kind(), self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> AsRef<str> for Id<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

// Hand-written so the marker type never picks up serde bounds.
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskTag {}

impl IdMarker for TaskTag {
    fn kind() -> &'static str {
        "TaskId"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationTag {}

impl IdMarker for NotificationTag {
    fn kind() -> &'static str {
        "NotificationId"
    }
}

/// Identifier of a Task. Assigned at push time, never reused.
pub type TaskId = Id<TaskTag>;

/// Identifier of a Notification.
pub type NotificationId = Id<NotificationTag>;
