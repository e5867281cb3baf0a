use serde::{Deserialize, Serialize};

use crate::core::{DbError, Result};

/// Service-account credentials as issued by the managed platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

/// Credential sources, in priority order: an explicit service-account
/// object beats discrete fields, which beat ambient environment defaults.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    ServiceAccount(ServiceAccount),
    Discrete {
        project_id: String,
        client_email: String,
        /// May carry `\n` escaped as two characters (the usual shape when
        /// the key travels through an environment variable).
        private_key: String,
    },
    #[default]
    Ambient,
}

/// Credentials after resolution and private-key normalization. All fields
/// `None` means "let the client discover ambient defaults".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub project_id: Option<String>,
    pub client_email: Option<String>,
    pub private_key: Option<String>,
}

impl ResolvedCredentials {
    pub fn ambient() -> Self {
        Self {
            project_id: None,
            client_email: None,
            private_key: None,
        }
    }
}

/// Environment variables can only carry literal `\n`; the client needs
/// real line breaks.
fn normalize_private_key(key: &str) -> String {
    key.replace("\\n", "\n")
}

impl Credentials {
    pub fn resolve(&self) -> Result<ResolvedCredentials> {
        match self {
            Self::ServiceAccount(account) => {
                if account.project_id.is_empty()
                    || account.client_email.is_empty()
                    || account.private_key.is_empty()
                {
                    return Err(DbError::Config(
                        "Service account requires project_id, client_email and private_key".into(),
                    ));
                }
                Ok(ResolvedCredentials {
                    project_id: Some(account.project_id.clone()),
                    client_email: Some(account.client_email.clone()),
                    private_key: Some(normalize_private_key(&account.private_key)),
                })
            }
            Self::Discrete {
                project_id,
                client_email,
                private_key,
            } => {
                if project_id.is_empty() || client_email.is_empty() || private_key.is_empty() {
                    return Err(DbError::Config(
                        "Discrete credentials require project_id, client_email and private_key"
                            .into(),
                    ));
                }
                Ok(ResolvedCredentials {
                    project_id: Some(project_id.clone()),
                    client_email: Some(client_email.clone()),
                    private_key: Some(normalize_private_key(private_key)),
                })
            }
            Self::Ambient => Ok(ResolvedCredentials::ambient()),
        }
    }
}
