//! Outbound commands for the simulation-control side.

use sb_core::Action;

/// Consumed by whatever drives the simulation (input injection, scene
/// reload). The orchestrator never touches the simulation directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    /// Hold these inputs until the next command.
    ApplyAction(Action),
    /// Release every held input.
    ReleaseControls,
    /// Restart the encounter. May be reissued if not confirmed in time.
    RequestReset,
    /// A fresh episode was observed; the previous reset is done.
    ResetComplete,
}
