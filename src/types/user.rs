//! Backend identity.

use serde::{Deserialize, Serialize};

/// Identity presented to a cluster server: the user name plus the groups
/// its authorizer evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: name.clone(),
            name,
            groups: Vec::new(),
        }
    }

    /// Built-in privileged identity used for internal reads.
    pub fn admin() -> Self {
        Self {
            name: "admin".to_string(),
            uid: "admin".to_string(),
            groups: vec![
                "system:masters".to_string(),
                "system:authenticated".to_string(),
            ],
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }
}
