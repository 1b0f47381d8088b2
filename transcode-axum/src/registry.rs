//! Schema registry.
//!
//! Indexes every message reachable from the transcoded services' files, so
//! `Any` error details can be rendered by type URL. Enum values are resolved
//! by `prost-reflect` through the descriptors themselves. Built once when the
//! gateway is built and read-only afterwards.

use std::collections::{HashMap, HashSet};

use prost_reflect::{DescriptorPool, FileDescriptor, MessageDescriptor};

/// Messages reachable from a set of schema files.
#[derive(Clone, Debug)]
pub struct SchemaRegistry {
    pool: DescriptorPool,
    files: HashSet<String>,
    messages: HashMap<String, MessageDescriptor>,
}

impl SchemaRegistry {
    /// Create an empty registry backed by `pool`.
    pub fn new(pool: DescriptorPool) -> Self {
        Self {
            pool,
            files: HashSet::new(),
            messages: HashMap::new(),
        }
    }

    /// Register `file` and everything it imports, transitively.
    ///
    /// Files already registered are skipped, so shared and repeated imports
    /// are visited once.
    pub fn add_file(&mut self, file: FileDescriptor) {
        let mut pending = vec![file];

        while let Some(file) = pending.pop() {
            if !self.files.insert(file.name().to_string()) {
                continue;
            }

            tracing::trace!(file = file.name(), "Registering schema file");

            let mut messages: Vec<MessageDescriptor> = file.messages().collect();

            while let Some(message) = messages.pop() {
                if self
                    .messages
                    .insert(message.full_name().to_string(), message.clone())
                    .is_some()
                {
                    continue;
                }
                messages.extend(message.child_messages());
            }

            pending.extend(
                file.dependencies()
                    .filter(|dependency| !self.contains_file(dependency.name())),
            );
        }
    }

    /// Returns true if the file was registered.
    pub fn contains_file(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    /// Look up a registered message by full name.
    pub fn find_message(&self, full_name: &str) -> Option<&MessageDescriptor> {
        self.messages.get(full_name)
    }

    /// Resolve the message type named by an `Any` type URL.
    ///
    /// Registered messages are preferred; otherwise the whole pool is searched.
    pub fn resolve_type_url(&self, type_url: &str) -> Option<MessageDescriptor> {
        let full_name = type_url.rsplit('/').next().unwrap_or(type_url);
        self.find_message(full_name)
            .cloned()
            .or_else(|| self.pool.get_message_by_name(full_name))
    }

    /// Number of registered messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
