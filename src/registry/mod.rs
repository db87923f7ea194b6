//! Subject Registry
//!
//! Maps MQTT topics to the bus subjects allocated for them. A topic can be
//! registered any number of times; each registration gets its own subject of
//! the form `<basename>.<uuid>`.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{BridgeError, Result};


/// Thread-safe topic → subjects mapping
pub struct SubjectRegistry {
    /// Prefix for generated subjects
    basename: String,
    /// Subjects per topic. Order carries no meaning.
    subjects: Mutex<HashMap<String, Vec<String>>>,
}

impl SubjectRegistry {
    pub fn new(basename: impl Into<String>) -> Self {
        Self {
            basename: basename.into(),
            subjects: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh subject for `topic`
    pub fn register_sub(&self, topic: &str) -> String {
        let subject = format!("{}.{}", self.basename, Uuid::new_v4());
        self.subjects
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(subject.clone());
        subject
    }

    /// Subjects currently registered for `topic` (empty if unknown)
    pub fn get(&self, topic: &str) -> Vec<String> {
        self.subjects.lock().get(topic).cloned().unwrap_or_default()
    }

    /// Topic a subject was registered for
    pub fn get_topic(&self, subject: &str) -> Result<String> {
        self.subjects
            .lock()
            .iter()
            .find(|(_, subjects)| subjects.iter().any(|s| s == subject))
            .map(|(topic, _)| topic.clone())
            .ok_or_else(|| BridgeError::NotFound(subject.to_string()))
    }

    /// Remove a subject, returning the topic it belonged to
    pub fn unregister_sub(&self, subject: &str) -> Result<String> {
        let mut subjects = self.subjects.lock();

        let found = subjects.iter().find_map(|(topic, list)| {
            list.iter()
                .position(|s| s == subject)
                .map(|index| (topic.clone(), index))
        });

        let (topic, index) = found.ok_or_else(|| BridgeError::NotFound(subject.to_string()))?;
        if let Some(list) = subjects.get_mut(&topic) {
            list.swap_remove(index);
            if list.is_empty() {
                subjects.remove(&topic);
            }
        }
        Ok(topic)
    }

    /// Number of topics with at least one subject
    pub fn topic_count(&self) -> usize {
        self.subjects.lock().len()
    }

    /// Total number of registered subjects
    pub fn subject_count(&self) -> usize {
        self.subjects.lock().values().map(Vec::len).sum()
    }
}
