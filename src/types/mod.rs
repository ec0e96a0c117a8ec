//! Core data types.
//!
//! - [`DeviceHandle`] / [`DeviceDescriptor`] describe devices found by discovery
//! - [`ConnectionState`] is the two-state connection lifecycle
//! - [`IntrinsicMatrixCoeffs`] is the per-frame camera calibration record
//! - [`Frame`] is a borrowed view into the session's reusable frame buffers
//! - [`FramePacket`] is an owned, `Arc`-shared copy for async subscribers
//! - [`UpdateRate`] controls subscription throttling

mod device;
mod frame;
mod intrinsics;
mod state;
mod update_rate;

pub use device::{ConnectionType, DeviceDescriptor, DeviceHandle};
pub use frame::{Frame, FramePacket};
pub use intrinsics::IntrinsicMatrixCoeffs;
pub use state::ConnectionState;
pub use update_rate::UpdateRate;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    proptest! {
        #[test]
        fn prop_intrinsics_wire_round_trip(values in prop::array::uniform16(-1.0e6f32..1.0e6f32)) {
            let intrinsics = IntrinsicMatrixCoeffs { coefficients: values };
            let bytes = intrinsics.to_le_bytes();
            prop_assert_eq!(bytes.len(), IntrinsicMatrixCoeffs::WIRE_SIZE);
            let parsed = IntrinsicMatrixCoeffs::from_le_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed, intrinsics);
        }

        #[test]
        fn prop_intrinsics_reject_wrong_length(len in 0usize..128) {
            prop_assume!(len != IntrinsicMatrixCoeffs::WIRE_SIZE);
            let bytes = vec![0u8; len];
            prop_assert!(IntrinsicMatrixCoeffs::from_le_bytes(&bytes).is_none());
        }

        #[test]
        fn prop_update_rate_never_exceeds_source(hz in 0u32..240, source in 1.0f64..120.0) {
            match UpdateRate::Max(hz).normalize(source) {
                UpdateRate::Native => prop_assert!(hz == 0 || hz as f64 >= source),
                UpdateRate::Max(n) => prop_assert!((n as f64) < source),
            }
        }
    }

    #[test]
    fn intrinsics_accessors_follow_matrix_layout() {
        let k = IntrinsicMatrixCoeffs::from_pinhole(593.2, 594.1, 241.5, 319.8);
        assert_eq!(k.fx(), 593.2);
        assert_eq!(k.fy(), 594.1);
        assert_eq!(k.tx(), 241.5);
        assert_eq!(k.ty(), 319.8);
        assert_eq!(IntrinsicMatrixCoeffs::WIRE_SIZE, 64);
    }

    #[test]
    fn frame_accessors_index_row_major() {
        let width = 3;
        let height = 2;
        let rgb: Vec<u8> = (0..(width * height * 3) as u8).collect();
        let depth: Vec<u8> =
            (0..width * height).flat_map(|i| (i as f32 * 0.5).to_ne_bytes()).collect();
        let frame = Frame {
            rgb: &rgb,
            depth: &depth,
            width,
            height,
            intrinsics: IntrinsicMatrixCoeffs::default(),
        };

        assert_eq!(frame.rgb_at(0, 0), Some([0, 1, 2]));
        assert_eq!(frame.rgb_at(1, 1), Some([12, 13, 14]));
        assert_eq!(frame.rgb_at(3, 0), None);
        assert_eq!(frame.depth_at(2, 1), Some(2.5));
        assert_eq!(frame.depth_at(0, 2), None);
        assert_eq!(frame.depth_samples().count(), 6);

        let packet = frame.to_packet(7);
        assert_eq!(packet.sequence, 7);
        assert_eq!(&packet.rgb[..], &rgb[..]);
        assert_eq!(packet.as_frame().depth_at(2, 1), Some(2.5));
    }

    #[test]
    fn usb_filter_on_descriptors() {
        let usb = DeviceDescriptor::new(DeviceHandle::new(1, 0x12a8, "abc"), ConnectionType::Usb);
        let net =
            DeviceDescriptor::new(DeviceHandle::new(2, 0x12a8, "def"), ConnectionType::Network);
        assert!(usb.is_usb());
        assert!(!net.is_usb());
        assert!(usb.device.to_string().contains("abc"));
    }

    #[test]
    fn update_rate_intervals() {
        assert_eq!(UpdateRate::Native.throttle_interval(30.0), None);
        assert_eq!(UpdateRate::Max(60).throttle_interval(30.0), None);
        assert_eq!(UpdateRate::Max(10).throttle_interval(30.0), Some(Duration::from_millis(100)));
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Streaming.is_streaming());
    }
}
