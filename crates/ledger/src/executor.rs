//! Script execution hook.
//!
//! The virtual machine is a collaborator. The ledger hands it a script, the
//! invoking transaction and a scratch snapshot, and reads back the final
//! state, the gas used, the result stack and any app chain notifications the
//! script raised.

use crate::app_chain::AppChainNotification;
use crate::store::Snapshot;
use appchain_core::{Fixed8, Transaction};

/// Final VM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Halt,
    Fault,
}

/// A value left on the result stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackItem {
    Boolean(bool),
    Integer(i64),
    ByteArray(Vec<u8>),
    Array(Vec<StackItem>),
}

impl StackItem {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::ByteArray(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub state: VmState,
    pub gas_consumed: Fixed8,
    pub result_stack: Vec<StackItem>,
    pub app_chain_notifications: Vec<AppChainNotification>,
}

impl ExecutionResult {
    pub fn halt(result_stack: Vec<StackItem>) -> Self {
        Self {
            state: VmState::Halt,
            gas_consumed: Fixed8::ZERO,
            result_stack,
            app_chain_notifications: Vec::new(),
        }
    }

    pub fn fault() -> Self {
        Self {
            state: VmState::Fault,
            gas_consumed: Fixed8::ZERO,
            result_stack: Vec::new(),
            app_chain_notifications: Vec::new(),
        }
    }

    pub fn is_halt(&self) -> bool {
        self.state == VmState::Halt
    }
}

/// Runs invocation scripts.
///
/// `snapshot` is a scratch copy; callers merge it back only when the result
/// is `Halt`.
pub trait ScriptExecutor: Send + Sync {
    fn execute(
        &self,
        script: &[u8],
        transaction: &Transaction,
        snapshot: &mut Snapshot,
        gas_limit: Fixed8,
    ) -> ExecutionResult;
}

/// Halts immediately with an empty stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl ScriptExecutor for NoopExecutor {
    fn execute(
        &self,
        _script: &[u8],
        _transaction: &Transaction,
        _snapshot: &mut Snapshot,
        _gas_limit: Fixed8,
    ) -> ExecutionResult {
        ExecutionResult::halt(Vec::new())
    }
}
