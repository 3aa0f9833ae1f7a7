//! Structural object-size estimation.
//!
//! Used when the event source cannot supply a size. An estimator receives
//! the shape of the allocated class and returns a conservative upper bound;
//! the core treats the output as authoritative.

use serde::{Deserialize, Serialize};

/// The shape of a class as the adapter observed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLayout {
    /// Object header bytes the runtime charges per instance.
    pub header_bytes: u64,
    /// Widths of the declared primitive fields, in bytes.
    pub primitive_field_bytes: Vec<u32>,
    /// Number of reference-typed fields.
    pub reference_fields: u32,
    /// Instance alignment in bytes.
    pub alignment: u64,
}

impl ClassLayout {
    /// Layout for a class the adapter knows nothing about: header only.
    pub fn opaque() -> Self {
        Self {
            header_bytes: StructuralSizeEstimator::DEFAULT_HEADER_BYTES,
            primitive_field_bytes: Vec::new(),
            reference_fields: 0,
            alignment: StructuralSizeEstimator::DEFAULT_ALIGNMENT,
        }
    }
}

pub trait SizeEstimator: Send + Sync {
    /// Estimate instance bytes for the given layout.
    fn estimate(&self, layout: &ClassLayout) -> u64;
}

/// Default estimator: header plus field widths plus reference slots,
/// rounded up to the alignment.
#[derive(Debug, Clone, Copy)]
pub struct StructuralSizeEstimator {
    pub reference_width: u64,
}

impl StructuralSizeEstimator {
    pub const DEFAULT_HEADER_BYTES: u64 = 16;
    pub const DEFAULT_ALIGNMENT: u64 = 8;

    pub fn new(reference_width: u64) -> Self {
        Self { reference_width }
    }
}

impl Default for StructuralSizeEstimator {
    fn default() -> Self {
        Self { reference_width: 8 }
    }
}

impl SizeEstimator for StructuralSizeEstimator {
    fn estimate(&self, layout: &ClassLayout) -> u64 {
        let primitives: u64 = layout
            .primitive_field_bytes
            .iter()
            .map(|width| *width as u64)
            .sum();
        let references = layout.reference_fields as u64 * self.reference_width;
        let raw = layout.header_bytes + primitives + references;
        let alignment = layout.alignment.max(1);
        raw.div_ceil(alignment) * alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_aligns_up() {
        let estimator = StructuralSizeEstimator::default();
        let layout = ClassLayout {
            header_bytes: 16,
            primitive_field_bytes: vec![4, 1],
            reference_fields: 1,
            alignment: 8,
        };
        // 16 + 5 + 8 = 29, aligned to 32.
        assert_eq!(estimator.estimate(&layout), 32);
    }

    #[test]
    fn opaque_layout_is_header_sized() {
        let estimator = StructuralSizeEstimator::default();
        assert_eq!(estimator.estimate(&ClassLayout::opaque()), 16);
    }

    #[test]
    fn zero_alignment_does_not_divide_by_zero() {
        let estimator = StructuralSizeEstimator::default();
        let layout = ClassLayout {
            header_bytes: 12,
            primitive_field_bytes: vec![],
            reference_fields: 0,
            alignment: 0,
        };
        assert_eq!(estimator.estimate(&layout), 12);
    }
}
