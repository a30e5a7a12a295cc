use tracing::debug;

/// Ordered archive passwords to try
///
/// The configured mirror password comes first, the empty password last when
/// the empty fallback is enabled. Duplicates are dropped.
#[derive(Clone, Debug)]
pub struct PasswordList {
    passwords: Vec<String>,
}

impl PasswordList {
    /// Collect passwords in priority order
    pub fn collect(configured: Option<&str>, try_empty: bool) -> Self {
        let mut passwords = Vec::new();

        if let Some(pw) = configured {
            passwords.push(pw.to_string());
        }

        if try_empty && !passwords.iter().any(|p| p.is_empty()) {
            passwords.push(String::new());
        }

        debug!(count = passwords.len(), "collected archive passwords");

        Self { passwords }
    }

    /// Iterate passwords in priority order
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.passwords.iter()
    }

    /// Check if there are any passwords to try
    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    /// Get the number of passwords
    pub fn len(&self) -> usize {
        self.passwords.len()
    }
}
