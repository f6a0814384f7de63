use crate::constants::ANONYMOUS_USER;
use serde::{Deserialize, Serialize};

/// Who triggered an execution; carried through opaquely
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub allowed_accounts: Vec<String>,
}

/// Caller identity passed explicitly into launch and restart operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub user: Option<String>,
    pub allowed_accounts: Vec<String>,
}

impl InvocationContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            allowed_accounts: Vec::new(),
        }
    }

    pub fn with_allowed_accounts(mut self, accounts: Vec<String>) -> Self {
        self.allowed_accounts = accounts;
        self
    }

    pub fn user_or_anonymous(&self) -> &str {
        self.user.as_deref().unwrap_or(ANONYMOUS_USER)
    }

    pub fn authentication(&self) -> Authentication {
        Authentication {
            user: self.user.clone(),
            allowed_accounts: self.allowed_accounts.clone(),
        }
    }
}
