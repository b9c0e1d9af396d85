use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StateError;
use crate::Address;

/// The state replicated by the agents of a period and handed from one round to
/// the next.
///
/// A `SynchronizedData` is an immutable value: the only way to change it is
/// [`SynchronizedData::update`], which produces a new value and leaves every
/// existing snapshot untouched. Maps are shared between snapshots until one of
/// them is updated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynchronizedData {
    participants: Option<Arc<BTreeSet<Address>>>,
    period_count: u64,
    /// Application-defined fields
    db: Arc<BTreeMap<String, Value>>,
}

impl SynchronizedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty participant set is the same as none at all.
    pub fn with_participants(participants: impl IntoIterator<Item = Address>) -> Self {
        SynchronizedData {
            participants: participant_set(participants),
            ..Default::default()
        }
    }

    pub fn participants(&self) -> Result<&BTreeSet<Address>, StateError> {
        self.participants.as_deref().ok_or(StateError::ParticipantsNotSet)
    }

    pub fn nb_participants(&self) -> Result<usize, StateError> {
        self.participants().map(BTreeSet::len)
    }

    pub fn period_count(&self) -> u64 {
        self.period_count
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.db.get(key).filter(|value| !value.is_null())
    }

    /// Read a field, failing if it was never set (or was reset to `null`).
    pub fn get_strict<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        let value = self.get(key).ok_or_else(|| StateError::MissingField(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|e| StateError::InvalidField {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read a field, falling back to `default` if it is not set.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StateError> {
        match self.get(key) {
            None => Ok(default),
            Some(_) => self.get_strict(key),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.db.keys().map(String::as_str)
    }

    /// Start building a new state from this one.
    pub fn update(&self) -> SynchronizedDataUpdate {
        SynchronizedDataUpdate {
            participants: self.participants.clone(),
            period_count: self.period_count,
            db: self.db.clone(),
        }
    }

    /// Build the starting state of the next period: the participants are kept,
    /// and of the application fields only the `cross_period_keys` survive.
    pub fn new_period(&self, period_count: u64, cross_period_keys: &[&str]) -> SynchronizedData {
        let db = cross_period_keys
            .iter()
            .filter_map(|key| self.db.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect();

        SynchronizedData {
            participants: self.participants.clone(),
            period_count,
            db: Arc::new(db),
        }
    }
}

fn participant_set(participants: impl IntoIterator<Item = Address>) -> Option<Arc<BTreeSet<Address>>> {
    let participants: BTreeSet<Address> = participants.into_iter().collect();
    (!participants.is_empty()).then(|| Arc::new(participants))
}

/// Pending changes to a [`SynchronizedData`].
#[must_use]
pub struct SynchronizedDataUpdate {
    participants: Option<Arc<BTreeSet<Address>>>,
    period_count: u64,
    db: Arc<BTreeMap<String, Value>>,
}

impl SynchronizedDataUpdate {
    pub fn participants(mut self, participants: impl IntoIterator<Item = Address>) -> Self {
        self.participants = participant_set(participants);
        self
    }

    pub fn period_count(mut self, period_count: u64) -> Self {
        self.period_count = period_count;
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.db).insert(key.into(), value.into());
        self
    }

    pub fn set_serialized<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self, StateError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| StateError::InvalidField {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.set(key, value))
    }

    pub fn remove(mut self, key: &str) -> Self {
        if self.db.contains_key(key) {
            Arc::make_mut(&mut self.db).remove(key);
        }
        self
    }

    pub fn build(self) -> SynchronizedData {
        SynchronizedData {
            participants: self.participants,
            period_count: self.period_count,
            db: self.db,
        }
    }
}
