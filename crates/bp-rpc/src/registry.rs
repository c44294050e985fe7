use std::{collections::HashMap, panic::AssertUnwindSafe};

use bp_net::{CallerContext, ClientId, set_current_caller};
use tracing::{error, warn};

use crate::wire::{ProcedureId, Status};

pub enum ProcedureOutcome {
    Void,
    Value(Vec<u8>),
    Error(Status),
}

type Handler = Box<dyn Fn(CallerContext, &[u8]) -> ProcedureOutcome + Send + Sync>;

pub struct ProcedureEntry {
    pub name: &'static str,
    pub permission: &'static str,
    handler: Handler,
}

/// External permission-check collaborator: given the caller and a
/// procedure's permission tag, decide whether the call may proceed.
pub type PermissionCheck = Box<dyn Fn(ClientId, &str) -> bool + Send + Sync>;

/// Table built at server startup by explicit registration; dispatches
/// incoming requests to the registered handler, isolating each call in a
/// failure boundary so a misbehaving procedure cannot take down the worker
/// loop.
#[derive(Default)]
pub struct RpcRegistry {
    procedures: HashMap<ProcedureId, ProcedureEntry>,
    permission_check: Option<PermissionCheck>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_permission_check(&mut self, check: PermissionCheck) {
        self.permission_check = Some(check);
    }

    pub fn register<F>(&mut self, id: ProcedureId, name: &'static str, permission: &'static str, handler: F)
    where
        F: Fn(CallerContext, &[u8]) -> ProcedureOutcome + Send + Sync + 'static,
    {
        self.procedures.insert(id, ProcedureEntry { name, permission, handler: Box::new(handler) });
    }

    pub fn name_of(&self, id: ProcedureId) -> Option<&'static str> {
        self.procedures.get(&id).map(|e| e.name)
    }

    /// Looks up and invokes `procedure`. Never panics: failures inside the
    /// handler are caught, logged, and reported as a status.
    pub fn dispatch(&self, caller: ClientId, procedure: ProcedureId, payload: &[u8]) -> (Status, Vec<u8>) {
        let Some(entry) = self.procedures.get(&procedure) else {
            warn!(procedure, "rpc: unknown procedure id");
            return (Status::WrongArgs, Vec::new());
        };

        if let Some(check) = &self.permission_check {
            if !check(caller, entry.permission) {
                warn!(procedure, %caller, permission = entry.permission, "rpc: permission denied");
                return (Status::PermissionDenied, Vec::new());
            }
        }

        let _caller_guard = set_current_caller(caller);
        let ctx = CallerContext { caller };
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(ctx, payload)));

        match outcome {
            Ok(ProcedureOutcome::Void) => (Status::Ok, Vec::new()),
            Ok(ProcedureOutcome::Value(bytes)) => (Status::Ok, bytes),
            Ok(ProcedureOutcome::Error(status)) => (status, Vec::new()),
            Err(_) => {
                error!(procedure, name = entry.name, "rpc: procedure panicked, isolating failure");
                (Status::Protocol, Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_registered_procedure() {
        let mut reg = RpcRegistry::new();
        reg.register(1, "echo_u32", "public", |_ctx, payload| {
            ProcedureOutcome::Value(payload.to_vec())
        });

        let (status, body) = reg.dispatch(ClientId(1), 1, &42u32.to_le_bytes());
        assert_eq!(status, Status::Ok);
        assert_eq!(body, 42u32.to_le_bytes());
    }

    #[test]
    fn unknown_procedure_is_wrong_args() {
        let reg = RpcRegistry::new();
        let (status, body) = reg.dispatch(ClientId(1), 99, &[]);
        assert_eq!(status, Status::WrongArgs);
        assert!(body.is_empty());
    }

    #[test]
    fn permission_check_can_deny() {
        let mut reg = RpcRegistry::new();
        reg.register(1, "restricted", "admin", |_ctx, _payload| ProcedureOutcome::Void);
        reg.set_permission_check(Box::new(|_caller, tag| tag != "admin"));

        let (status, _) = reg.dispatch(ClientId(1), 1, &[]);
        assert_eq!(status, Status::PermissionDenied);
    }

    #[test]
    fn panicking_procedure_is_isolated() {
        let mut reg = RpcRegistry::new();
        reg.register(1, "boom", "public", |_ctx, _payload| panic!("boom"));

        let (status, body) = reg.dispatch(ClientId(1), 1, &[]);
        assert_eq!(status, Status::Protocol);
        assert!(body.is_empty());
    }
}
