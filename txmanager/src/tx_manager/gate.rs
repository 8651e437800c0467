use crate::{AccountState, ServerInfo};

/// Live view of the transport, server and account, as last reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StatusSnapshot {
    pub(crate) connected: bool,
    pub(crate) server: Option<ServerInfo>,
    pub(crate) account: Option<AccountState>,
}

/// Decides whether a submit may be issued right now.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubmissionGate {
    max_load_factor: u32,
}

impl SubmissionGate {
    pub(crate) fn new(max_load_factor: u32) -> Self {
        Self { max_load_factor }
    }

    pub(crate) fn can_submit(&self, status: &StatusSnapshot) -> bool {
        let Some(server) = status.server else {
            return false;
        };
        status.connected && server.load_factor < self.max_load_factor && status.account.is_some()
    }
}
