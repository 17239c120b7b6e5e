use crate::automation_config::TlsMode;

/// Maps the desired TLS settings and the rollout marker to the mode every member must run.
///
/// Enabling TLS is split in two phases. While the marker is unset the material
/// is only staged (mounted everywhere) and members keep running `disabled`;
/// once it is set they switch to `preferTLS` or `requireTLS` together.
pub fn resolve(enabled: bool, optional: bool, rollout_complete: bool) -> TlsMode {
    if !enabled || !rollout_complete {
        TlsMode::Disabled
    } else if optional {
        TlsMode::Preferred
    } else {
        TlsMode::Required
    }
}

/// What the reconciler should do with the rollout marker annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerTransition {
    Keep,
    Set,
    Clear,
}

/// Decides whether the rollout marker advances.
///
/// `members_carry_material` must only be true once every member has been
/// restarted with the TLS volumes mounted.
pub fn marker_transition(enabled: bool, rollout_complete: bool, members_carry_material: bool) -> MarkerTransition {
    match (enabled, rollout_complete) {
        (true, false) if members_carry_material => MarkerTransition::Set,
        (false, true) => MarkerTransition::Clear,
        _ => MarkerTransition::Keep,
    }
}
