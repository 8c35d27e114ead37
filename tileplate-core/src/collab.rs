//! Boundaries to collaborators that live outside the core: the status line
//! of the UI overlay and the persistent key-value store.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::Result;

/// Key under which the template document is persisted.
pub const STORAGE_KEY: &str = "tileplateTemplates";

/// Single sink for user-visible outcomes.
pub trait StatusSink {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Routes status messages to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn success(&self, message: &str) {
        log::info!("{}", message);
    }

    fn error(&self, message: &str) {
        log::error!("{}", message);
    }
}

/// Keeps every message; handy for front ends that render a history.
#[derive(Debug, Default)]
pub struct StatusLog {
    entries: RefCell<Vec<(bool, String)>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in arrival order, `true` marking the success channel.
    pub fn entries(&self) -> Vec<(bool, String)> {
        self.entries.borrow().clone()
    }

    pub fn last(&self) -> Option<(bool, String)> {
        self.entries.borrow().last().cloned()
    }
}

impl StatusSink for StatusLog {
    fn success(&self, message: &str) {
        self.entries.borrow_mut().push((true, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.entries.borrow_mut().push((false, message.to_string()));
    }
}

impl<S: StatusSink + ?Sized> StatusSink for std::rc::Rc<S> {
    fn success(&self, message: &str) {
        (**self).success(message)
    }

    fn error(&self, message: &str) {
        (**self).error(message)
    }
}

/// Persistent string key-value storage.
pub trait TemplateStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}
