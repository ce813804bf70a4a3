//! Capability sets the external CSI gRPC adapter advertises.

/// CSI driver name registered with the orchestrator.
pub const DRIVER_NAME: &str = "csi.truenas.io";

/// Controller-side capabilities this engine backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCapability {
    /// CreateVolume / DeleteVolume.
    CreateDeleteVolume,
    /// CreateSnapshot / DeleteSnapshot.
    CreateDeleteSnapshot,
    /// Volume cloning from volumes and snapshots.
    CloneVolume,
    /// ControllerExpandVolume.
    ExpandVolume,
    /// ListVolumes.
    ListVolumes,
    /// GetCapacity.
    GetCapacity,
}

/// Node-side capabilities this engine backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCapability {
    /// NodeStageVolume / NodeUnstageVolume.
    StageUnstageVolume,
    /// NodeGetVolumeStats.
    GetVolumeStats,
    /// NodeExpandVolume.
    ExpandVolume,
}

/// All supported controller capabilities.
pub fn controller_capabilities() -> &'static [ControllerCapability] {
    &[
        ControllerCapability::CreateDeleteVolume,
        ControllerCapability::CreateDeleteSnapshot,
        ControllerCapability::CloneVolume,
        ControllerCapability::ExpandVolume,
        ControllerCapability::ListVolumes,
        ControllerCapability::GetCapacity,
    ]
}

/// All supported node capabilities.
pub fn node_capabilities() -> &'static [NodeCapability] {
    &[
        NodeCapability::StageUnstageVolume,
        NodeCapability::GetVolumeStats,
        NodeCapability::ExpandVolume,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_sets() {
        assert_eq!(controller_capabilities().len(), 6);
        assert_eq!(node_capabilities().len(), 3);
        assert!(controller_capabilities().contains(&ControllerCapability::CloneVolume));
    }
}
