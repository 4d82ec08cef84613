use anyhow::Error as AnyhowError;
use serde::Serialize;
use types::PublicKeyBytes;
use validator_registry::RegistryError;

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Deleted,
    Error,
    Imported,
    NotFound,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct OperationStatus {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<AnyhowError> for OperationStatus {
    fn from(error: AnyhowError) -> Self {
        Self {
            status: Status::Error,
            message: Some(format!("{error}")),
        }
    }
}

impl From<RegistryError> for OperationStatus {
    fn from(error: RegistryError) -> Self {
        let status = match error {
            RegistryError::NotFound { .. } => Status::NotFound,
            RegistryError::Duplicate { .. } => Status::Error,
        };

        Self {
            status,
            message: Some(format!("{error}")),
        }
    }
}

impl From<Status> for OperationStatus {
    fn from(status: Status) -> Self {
        Self {
            status,
            message: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ValidatingPubkey {
    pub pubkey: PublicKeyBytes,
    pub url: String,
    pub readonly: bool,
}
