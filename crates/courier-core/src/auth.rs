//! Authentication levels and per-category access control.
//!
//! Every connection resolves to exactly one [`AuthLevel`] at handshake
//! time, via the node's auth resolver callback. Categories carry a minimum
//! level; individual commands may override it with a stricter one.

use std::sync::Arc;

use courier_crypto::PublicKey;

/// Ordered trust tier resolved per connection.
///
/// The total order `None < Basic < Admin` is what the access check
/// compares against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthLevel {
    /// Unprivileged peer
    #[default]
    None,
    /// Authenticated peer with ordinary privileges
    Basic,
    /// Fully trusted peer
    Admin,
}

impl std::fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthLevel::None => "none",
            AuthLevel::Basic => "basic",
            AuthLevel::Admin => "admin",
        })
    }
}

/// Access policy attached to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// Minimum level a connection needs to reach the category's commands.
    pub min_level: AuthLevel,
}

impl Access {
    /// Access requiring at least the given level.
    #[must_use]
    pub const fn new(min_level: AuthLevel) -> Self {
        Self { min_level }
    }

    /// Open to every connection.
    #[must_use]
    pub const fn open() -> Self {
        Self::new(AuthLevel::None)
    }

    /// Restricted to basic-or-better connections.
    #[must_use]
    pub const fn basic() -> Self {
        Self::new(AuthLevel::Basic)
    }

    /// Restricted to admin connections.
    #[must_use]
    pub const fn admin() -> Self {
        Self::new(AuthLevel::Admin)
    }
}

/// User-supplied callback resolving a remote public key to a trust tier.
///
/// Invoked exactly once per connection, on the proxy task, at handshake
/// completion. It must not block.
pub type AuthResolver = Arc<dyn Fn(&PublicKey) -> AuthLevel + Send + Sync>;

/// The access check: a connection may invoke a command when its level
/// meets the stricter of the category minimum and the command override.
#[must_use]
pub fn allowed(category: Access, command_override: Option<AuthLevel>, conn_level: AuthLevel) -> bool {
    let required = match command_override {
        Some(level) => category.min_level.max(level),
        None => category.min_level,
    };
    conn_level >= required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AuthLevel::None < AuthLevel::Basic);
        assert!(AuthLevel::Basic < AuthLevel::Admin);
        assert_eq!(AuthLevel::default(), AuthLevel::None);
    }

    #[test]
    fn test_allowed_category_minimum() {
        assert!(allowed(Access::open(), None, AuthLevel::None));
        assert!(allowed(Access::basic(), None, AuthLevel::Basic));
        assert!(allowed(Access::basic(), None, AuthLevel::Admin));
        assert!(!allowed(Access::basic(), None, AuthLevel::None));
        assert!(!allowed(Access::admin(), None, AuthLevel::Basic));
    }

    #[test]
    fn test_command_override_is_stricter_only() {
        // A stricter override raises the bar.
        assert!(!allowed(Access::open(), Some(AuthLevel::Admin), AuthLevel::Basic));
        assert!(allowed(Access::open(), Some(AuthLevel::Admin), AuthLevel::Admin));
        // A looser override cannot lower the category minimum.
        assert!(!allowed(Access::admin(), Some(AuthLevel::None), AuthLevel::Basic));
    }

    #[test]
    fn test_display() {
        assert_eq!(AuthLevel::None.to_string(), "none");
        assert_eq!(AuthLevel::Basic.to_string(), "basic");
        assert_eq!(AuthLevel::Admin.to_string(), "admin");
    }
}
