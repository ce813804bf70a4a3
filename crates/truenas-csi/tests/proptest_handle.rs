//! Property-based tests for volume handle encoding.

use proptest::prelude::*;
use truenas_csi::VolumeHandle;

/// Names and paths the orchestrator can actually produce: no NUL bytes,
/// but otherwise arbitrary UTF-8 (appliance identifiers are not limited
/// to ASCII).
fn any_ident() -> impl Strategy<Value = String> {
    "[^\u{0}]{1,64}"
}

proptest! {
    /// Handle encode/decode is total and lossless for NFS volumes.
    #[test]
    fn test_nfs_handle_round_trip(
        dataset in any_ident(),
        mountpoint in any_ident(),
        server in any_ident(),
    ) {
        let handle = VolumeHandle::Nfs { dataset, mountpoint, server };
        let decoded = VolumeHandle::decode(&handle.encode()).unwrap();
        prop_assert_eq!(decoded, handle);
    }

    /// Handle encode/decode is total and lossless for iSCSI volumes.
    #[test]
    fn test_iscsi_handle_round_trip(
        dataset in any_ident(),
        iqn in any_ident(),
        portal in any_ident(),
        lun in 0i64..=255,
    ) {
        let handle = VolumeHandle::Iscsi { dataset, iqn, portal, lun };
        let decoded = VolumeHandle::decode(&handle.encode()).unwrap();
        prop_assert_eq!(decoded, handle);
    }
}
