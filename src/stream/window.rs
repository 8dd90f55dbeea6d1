//! Loaded message window: ordered by creation, unique by name, with date
//! separators derived on demand.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime};

use crate::models::Message;

/// One row of the visible stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEntry {
    /// Synthetic marker before the first message of a calendar day.
    DateSeparator(NaiveDate),
    Message(Message),
}

impl StreamEntry {
    pub fn key(&self) -> EntryKey {
        match self {
            StreamEntry::DateSeparator(day) => EntryKey::Date(*day),
            StreamEntry::Message(msg) => EntryKey::Message(msg.name.clone()),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            StreamEntry::Message(msg) => Some(msg),
            StreamEntry::DateSeparator(_) => None,
        }
    }
}

/// Identity of a stream entry, used as a scroll anchor by the view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Date(NaiveDate),
    Message(String),
}

/// Ordered, de-duplicated set of loaded messages.
#[derive(Debug, Default, Clone)]
pub struct MessageWindow {
    ordered: BTreeMap<(NaiveDateTime, String), Message>,
    index: HashMap<String, NaiveDateTime>,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut window = Self::new();
        window.extend(messages);
        window
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Message> {
        let creation = self.index.get(name)?;
        self.ordered.get(&(*creation, name.to_string()))
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.ordered.values().next()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.ordered.values().next_back()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.ordered.values()
    }

    /// Insert or replace by `name`. Returns `true` if the name was new.
    pub fn insert(&mut self, msg: Message) -> bool {
        let is_new = match self.index.insert(msg.name.clone(), msg.creation) {
            Some(previous) => {
                self.ordered.remove(&(previous, msg.name.clone()));
                false
            }
            None => true,
        };
        self.ordered.insert((msg.creation, msg.name.clone()), msg);
        is_new
    }

    /// Insert every message; returns how many names were new.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages
            .into_iter()
            .map(|m| self.insert(m))
            .filter(|is_new| *is_new)
            .count()
    }

    /// Replace a message only if it is already loaded.
    pub fn replace_if_loaded(&mut self, msg: Message) -> bool {
        if !self.contains(&msg.name) {
            return false;
        }
        self.insert(msg);
        true
    }

    /// Apply a change to a loaded message in place.
    pub fn modify(&mut self, name: &str, f: impl FnOnce(&mut Message)) -> bool {
        let Some(creation) = self.index.get(name).copied() else {
            return false;
        };
        match self.ordered.get_mut(&(creation, name.to_string())) {
            Some(msg) => {
                f(msg);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Message> {
        let creation = self.index.remove(name)?;
        self.ordered.remove(&(creation, name.to_string()))
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.index.clear();
    }

    /// Messages interleaved with a separator before each day's first message.
    pub fn entries(&self) -> Vec<StreamEntry> {
        let mut entries = Vec::with_capacity(self.ordered.len() + 4);
        let mut current_day: Option<NaiveDate> = None;
        for msg in self.ordered.values() {
            let day = msg.day();
            if current_day != Some(day) {
                entries.push(StreamEntry::DateSeparator(day));
                current_day = Some(day);
            }
            entries.push(StreamEntry::Message(msg.clone()));
        }
        entries
    }
}
