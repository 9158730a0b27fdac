use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{MonovmError, MonovmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle state of a sandbox VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmState {
    /// No VM has been created yet.
    #[default]
    NotCreated,

    /// The VM is configured but not running.
    Created {
        /// Whether the VM restores from a template instead of booting.
        from_template: bool,
    },

    /// The VM is running.
    Started,

    /// The VM vCPUs are paused.
    Paused,

    /// The VM has been stopped.
    Stopped,
}

/// An operation that moves a VM between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmOperation {
    /// Configure the VM.
    Create {
        /// Whether the VM restores from a template.
        from_template: bool,
    },

    /// Boot or restore the VM.
    Start,

    /// Pause the vCPUs.
    Pause,

    /// Resume paused vCPUs.
    Resume,

    /// Snapshot a paused VM so it can act as a template.
    Save,

    /// Stop the VM.
    Stop,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VmState {
    /// Returns the state reached by applying `operation`.
    ///
    /// ## Errors
    ///
    /// Returns `InvalidStateTransition` when the operation is not allowed from this state.
    ///
    /// ## Examples
    ///
    /// ```
    /// use monovm::hypervisor::{VmOperation, VmState};
    ///
    /// let state = VmState::NotCreated
    ///     .transition(VmOperation::Create { from_template: false })?
    ///     .transition(VmOperation::Start)?
    ///     .transition(VmOperation::Pause)?;
    ///
    /// assert_eq!(state, VmState::Paused);
    /// assert!(state.transition(VmOperation::Start).is_err());
    /// # Ok::<(), monovm::MonovmError>(())
    /// ```
    pub fn transition(self, operation: VmOperation) -> MonovmResult<VmState> {
        let next = match (self, operation) {
            (VmState::NotCreated, VmOperation::Create { from_template }) => {
                VmState::Created { from_template }
            }
            (VmState::Created { .. }, VmOperation::Start) => VmState::Started,
            (VmState::Started, VmOperation::Pause) => VmState::Paused,
            (VmState::Paused, VmOperation::Resume) => VmState::Started,
            (VmState::Paused, VmOperation::Save) => VmState::Paused,
            (VmState::Created { .. } | VmState::Started | VmState::Paused, VmOperation::Stop) => {
                VmState::Stopped
            }
            (state, operation) => {
                return Err(MonovmError::InvalidStateTransition {
                    operation: operation.to_string(),
                    state: state.to_string(),
                })
            }
        };

        Ok(next)
    }

    /// Whether the VM is up, running or paused.
    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Started | VmState::Paused)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::NotCreated => write!(f, "not created"),
            VmState::Created {
                from_template: true,
            } => write!(f, "created from template"),
            VmState::Created { .. } => write!(f, "created"),
            VmState::Started => write!(f, "started"),
            VmState::Paused => write!(f, "paused"),
            VmState::Stopped => write!(f, "stopped"),
        }
    }
}

impl Display for VmOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmOperation::Create { .. } => "create",
            VmOperation::Start => "start",
            VmOperation::Pause => "pause",
            VmOperation::Resume => "resume",
            VmOperation::Save => "save",
            VmOperation::Stop => "stop",
        };

        write!(f, "{name}")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_state_lifecycle() -> anyhow::Result<()> {
        let mut state = VmState::default();

        for (operation, expected) in [
            (
                VmOperation::Create {
                    from_template: true,
                },
                VmState::Created {
                    from_template: true,
                },
            ),
            (VmOperation::Start, VmState::Started),
            (VmOperation::Pause, VmState::Paused),
            (VmOperation::Save, VmState::Paused),
            (VmOperation::Resume, VmState::Started),
            (VmOperation::Pause, VmState::Paused),
            (VmOperation::Resume, VmState::Started),
            (VmOperation::Stop, VmState::Stopped),
        ] {
            state = state.transition(operation)?;
            assert_eq!(state, expected);
        }

        Ok(())
    }

    #[test]
    fn test_vm_state_rejects_invalid_transitions() {
        let invalid = [
            (VmState::NotCreated, VmOperation::Start),
            (
                VmState::Started,
                VmOperation::Create {
                    from_template: false,
                },
            ),
            (VmState::Started, VmOperation::Resume),
            (VmState::Started, VmOperation::Save),
            (VmState::Paused, VmOperation::Pause),
            (VmState::Stopped, VmOperation::Start),
            (VmState::Stopped, VmOperation::Stop),
        ];

        for (state, operation) in invalid {
            assert!(
                matches!(
                    state.transition(operation),
                    Err(MonovmError::InvalidStateTransition { .. })
                ),
                "{operation} from {state} should fail"
            );
        }
    }
}
