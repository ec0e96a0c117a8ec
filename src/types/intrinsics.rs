//! Camera intrinsics carried with every frame.

use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics as sent by the device.
///
/// The wire record is sixteen little-endian `f32` values forming a 4×4
/// column-major matrix whose upper-left 3×3 block is the usual `K` matrix:
///
/// ```text
/// | fx  0  tx |
/// |  0 fy  ty |
/// |  0  0   1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicMatrixCoeffs {
    pub coefficients: [f32; 16],
}

impl IntrinsicMatrixCoeffs {
    /// Size of the record on the wire.
    pub const WIRE_SIZE: usize = 16 * std::mem::size_of::<f32>();

    /// Build intrinsics from focal lengths and principal point.
    pub fn from_pinhole(fx: f32, fy: f32, tx: f32, ty: f32) -> Self {
        let mut coefficients = [0.0; 16];
        coefficients[0] = fx;
        coefficients[5] = fy;
        coefficients[8] = tx;
        coefficients[9] = ty;
        coefficients[10] = 1.0;
        coefficients[15] = 1.0;
        Self { coefficients }
    }

    /// Parse the record from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// Returns `None` if `bytes` has the wrong length.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::WIRE_SIZE {
            return None;
        }
        let mut coefficients = [0.0f32; 16];
        for (value, chunk) in coefficients.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(Self { coefficients })
    }

    /// Serialize the record in wire order.
    pub fn to_le_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.coefficients.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn fx(&self) -> f32 {
        self.coefficients[0]
    }

    pub fn fy(&self) -> f32 {
        self.coefficients[5]
    }

    pub fn tx(&self) -> f32 {
        self.coefficients[8]
    }

    pub fn ty(&self) -> f32 {
        self.coefficients[9]
    }
}

impl Default for IntrinsicMatrixCoeffs {
    fn default() -> Self {
        Self::from_pinhole(1.0, 1.0, 0.0, 0.0)
    }
}
