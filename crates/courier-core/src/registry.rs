//! Command registry: `category -> {access, command -> handler}`.
//!
//! Registration happens before `start()` and is append-only; the registry
//! is frozen into an `Arc` at startup and read without locking thereafter.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{Access, AuthLevel, allowed};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::wire::{TARGET_SEPARATOR, split_target};

/// A registered command handler.
///
/// Handlers run on worker threads, never on the proxy task. A handler for
/// a request-capable command replies through [`Message::send_reply`] or a
/// detached [`crate::message::ReplyTicket`].
pub type Handler = Arc<dyn Fn(Message) + Send + Sync>;

/// One registered command.
pub(crate) struct CommandEntry {
    pub handler: Handler,
    /// Stricter minimum than the category's, if any.
    pub min_level: Option<AuthLevel>,
    /// Whether the command was registered via `add_request_command` and
    /// may reply through a ticket.
    pub is_request: bool,
}

struct Category {
    access: Access,
    commands: HashMap<String, CommandEntry>,
}

/// The command registry.
#[derive(Default)]
pub struct Registry {
    categories: HashMap<String, Category>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category.
    ///
    /// # Errors
    ///
    /// `InvalidName` for an empty name or one containing the separator;
    /// `DuplicateCategory` if already registered.
    pub fn add_category(&mut self, name: &str, access: Access) -> Result<()> {
        validate_name(name)?;
        if self.categories.contains_key(name) {
            return Err(Error::DuplicateCategory(name.to_string()));
        }
        self.categories.insert(
            name.to_string(),
            Category {
                access,
                commands: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Register a fire-and-forget command in an existing category.
    pub fn add_command(
        &mut self,
        category: &str,
        name: &str,
        handler: Handler,
        min_level: Option<AuthLevel>,
    ) -> Result<()> {
        self.insert_command(category, name, handler, min_level, false)
    }

    /// Register a reply-capable command in an existing category.
    pub fn add_request_command(
        &mut self,
        category: &str,
        name: &str,
        handler: Handler,
        min_level: Option<AuthLevel>,
    ) -> Result<()> {
        self.insert_command(category, name, handler, min_level, true)
    }

    fn insert_command(
        &mut self,
        category: &str,
        name: &str,
        handler: Handler,
        min_level: Option<AuthLevel>,
        is_request: bool,
    ) -> Result<()> {
        validate_name(name)?;
        let cat = self
            .categories
            .get_mut(category)
            .ok_or_else(|| Error::UnknownCategory(category.to_string()))?;
        if cat.commands.contains_key(name) {
            return Err(Error::DuplicateCommand(format!(
                "{category}{TARGET_SEPARATOR}{name}"
            )));
        }
        cat.commands.insert(
            name.to_string(),
            CommandEntry {
                handler,
                min_level,
                is_request,
            },
        );
        Ok(())
    }

    /// Resolve a dispatch target and apply the access check.
    ///
    /// # Errors
    ///
    /// `UnknownCategory`, `UnknownCommand` or `AccessDenied`; all three map
    /// to synthetic failure replies for request-tagged messages.
    pub(crate) fn lookup(&self, target: &str, conn_level: AuthLevel) -> Result<&CommandEntry> {
        let (category, command) = split_target(target);
        let cat = self
            .categories
            .get(category)
            .ok_or_else(|| Error::UnknownCategory(category.to_string()))?;
        let entry = cat
            .commands
            .get(command)
            .ok_or_else(|| Error::UnknownCommand(target.to_string()))?;
        if !allowed(cat.access, entry.min_level, conn_level) {
            return Err(Error::AccessDenied);
        }
        Ok(entry)
    }

    /// Number of registered categories.
    #[must_use]
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(TARGET_SEPARATOR) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        Arc::new(|_msg| {})
    }

    #[test]
    fn test_add_category() {
        let mut registry = Registry::new();
        registry.add_category("public", Access::open()).unwrap();
        assert_eq!(registry.category_count(), 1);
        assert!(matches!(
            registry.add_category("public", Access::open()),
            Err(Error::DuplicateCategory(_))
        ));
    }

    #[test]
    fn test_invalid_names() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.add_category("", Access::open()),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            registry.add_category("a.b", Access::open()),
            Err(Error::InvalidName(_))
        ));
        registry.add_category("ok", Access::open()).unwrap();
        assert!(matches!(
            registry.add_command("ok", "x.y", noop(), None),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_command_registration() {
        let mut registry = Registry::new();
        registry.add_category("public", Access::open()).unwrap();
        registry.add_command("public", "ping", noop(), None).unwrap();
        assert!(matches!(
            registry.add_command("public", "ping", noop(), None),
            Err(Error::DuplicateCommand(_))
        ));
        assert!(matches!(
            registry.add_command("nope", "ping", noop(), None),
            Err(Error::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_lookup_and_access() {
        let mut registry = Registry::new();
        registry.add_category("admin", Access::admin()).unwrap();
        registry
            .add_request_command("admin", "restart", noop(), None)
            .unwrap();

        assert!(registry.lookup("admin.restart", AuthLevel::Admin).is_ok());
        assert!(matches!(
            registry.lookup("admin.restart", AuthLevel::Basic),
            Err(Error::AccessDenied)
        ));
        assert!(matches!(
            registry.lookup("other.restart", AuthLevel::Admin),
            Err(Error::UnknownCategory(_))
        ));
        assert!(matches!(
            registry.lookup("admin.stop", AuthLevel::Admin),
            Err(Error::UnknownCommand(_))
        ));
        // No separator: whole string is the category, command is empty.
        assert!(matches!(
            registry.lookup("admin", AuthLevel::Admin),
            Err(Error::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_request_marker() {
        let mut registry = Registry::new();
        registry.add_category("public", Access::open()).unwrap();
        registry.add_command("public", "notify", noop(), None).unwrap();
        registry
            .add_request_command("public", "fetch", noop(), None)
            .unwrap();

        assert!(!registry.lookup("public.notify", AuthLevel::None).unwrap().is_request);
        assert!(registry.lookup("public.fetch", AuthLevel::None).unwrap().is_request);
    }

    #[test]
    fn test_command_override() {
        let mut registry = Registry::new();
        registry.add_category("mixed", Access::open()).unwrap();
        registry
            .add_command("mixed", "secret", noop(), Some(AuthLevel::Admin))
            .unwrap();
        assert!(matches!(
            registry.lookup("mixed.secret", AuthLevel::Basic),
            Err(Error::AccessDenied)
        ));
        assert!(registry.lookup("mixed.secret", AuthLevel::Admin).is_ok());
    }
}
