// ABOUTME: Pluggable credential check consulted on every bind request
// ABOUTME: Ships an allow-all default and a static system_id/password table

use crate::datatypes::{BindRequest, BindType, CommandStatus};
use std::collections::HashMap;

/// Decides whether a bind may proceed.
///
/// Called synchronously on the session's task, so implementations must not
/// block. A rejection carries the status returned in the `bind_*_resp`.
pub trait BindAuthorizer: Send + Sync {
    fn authorize(&self, bind_type: BindType, request: &BindRequest) -> Result<(), CommandStatus>;
}

/// Accepts every bind. Credential validation is left to the deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl BindAuthorizer for AllowAll {
    fn authorize(&self, _bind_type: BindType, _request: &BindRequest) -> Result<(), CommandStatus> {
        Ok(())
    }
}

/// In-memory system_id to password table.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, system_id: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.insert(system_id.into(), password.into());
        self
    }
}

impl BindAuthorizer for StaticCredentials {
    fn authorize(&self, _bind_type: BindType, request: &BindRequest) -> Result<(), CommandStatus> {
        match self.credentials.get(&request.system_id) {
            None => Err(CommandStatus::InvalidSystemId),
            Some(password) if *password != request.password => Err(CommandStatus::InvalidPassword),
            Some(_) => Ok(()),
        }
    }
}
