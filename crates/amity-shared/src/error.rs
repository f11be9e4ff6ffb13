use thiserror::Error;

use crate::types::UserId;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("User {0} cannot open a dialog with themself")]
    SelfDialog(UserId),

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
