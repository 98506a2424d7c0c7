//! Author identity mapping
//!
//! Source backends often record bare usernames. Targets that need an email
//! get one from a template or from an explicit users file.

use crate::mapping::format::parse_properties;
use crate::types::UserInfo;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const DEFAULT_EMAIL_TEMPLATE: &str = "{username}@example.com";
pub const DEFAULT_DISPLAY_NAME_TEMPLATE: &str = "{username}";

const USERNAME_PLACEHOLDER: &str = "{username}";

#[derive(Debug, Clone, PartialEq, Eq)]
struct KnownUser {
    email: String,
    display_name: Option<String>,
}

/// Maps source authors to target identities
#[derive(Debug, Clone)]
pub struct UserMapper {
    email_template: String,
    display_name_template: String,
    users: BTreeMap<String, KnownUser>,
}

impl Default for UserMapper {
    fn default() -> Self {
        Self::new(DEFAULT_EMAIL_TEMPLATE, DEFAULT_DISPLAY_NAME_TEMPLATE)
    }
}

impl UserMapper {
    pub fn new(email_template: impl Into<String>, display_name_template: impl Into<String>) -> Self {
        Self {
            email_template: email_template.into(),
            display_name_template: display_name_template.into(),
            users: BTreeMap::new(),
        }
    }

    /// Add explicit users from `.properties` text: `username = email[, Display Name]`
    pub fn with_users(mut self, text: &str) -> Self {
        for (username, value) in parse_properties(text) {
            let (email, display_name) = match value.split_once(',') {
                Some((email, name)) => (email.trim().to_string(), Some(name.trim().to_string())),
                None => (value.trim().to_string(), None),
            };
            self.users.insert(username, KnownUser { email, display_name });
        }
        self
    }

    /// Load explicit users from a file
    pub fn with_users_file(self, path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mapper = self.with_users(&text);
        info!("'{}' users have been loaded.", path.display());
        Ok(mapper)
    }

    pub fn known_users(&self) -> usize {
        self.users.len()
    }

    /// Target identity for `author`. Authors that already carry an email are kept.
    pub fn map(&self, author: &UserInfo) -> UserInfo {
        if author.email.is_some() {
            return author.clone();
        }
        let username = author.username.as_str();
        let mut email = self.email_template.replace(USERNAME_PLACEHOLDER, username);
        let mut display_name = self
            .display_name_template
            .replace(USERNAME_PLACEHOLDER, username);

        if let Some(known) = self.users.get(username) {
            email = known.email.clone();
            if let Some(name) = &known.display_name {
                display_name = name.clone();
            }
        }

        UserInfo::new(username)
            .with_email(email)
            .with_display_name(display_name)
    }
}
