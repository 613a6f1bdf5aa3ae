//! Error types for scan operations.

use thiserror::Error;

/// Errors that can occur while building or querying a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A query that needs the spatial index was issued before it was built.
    #[error("spatial index has not been built; call build_index() before querying points")]
    IndexNotBuilt,

    /// A query that compares normals was issued before normals were computed.
    #[error("scan has no normals; call calculate_normals() first")]
    NormalsNotComputed,

    /// A triangle references a vertex that does not exist.
    #[error("face {face} references vertex {index}, but the scan has {vertex_count} points")]
    FaceIndexOutOfBounds {
        /// Index of the offending face.
        face: usize,
        /// The invalid vertex index.
        index: u32,
        /// Number of points in the scan.
        vertex_count: usize,
    },

    /// A per-point attribute array does not match the number of positions.
    #[error("{attribute} has {actual} entries, expected {expected} (one per point)")]
    AttributeLengthMismatch {
        /// Name of the attribute ("normals", "colors").
        attribute: &'static str,
        /// Number of points in the scan.
        expected: usize,
        /// Number of entries provided.
        actual: usize,
    },

    /// The placement transform cannot be inverted.
    #[error("scan transform is not invertible")]
    SingularTransform,

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_not_built_message() {
        let err = ScanError::IndexNotBuilt;
        assert!(format!("{err}").starts_with("spatial index has not been built"));
    }

    #[test]
    fn test_face_index_out_of_bounds_message() {
        let err = ScanError::FaceIndexOutOfBounds {
            face: 2,
            index: 7,
            vertex_count: 5,
        };
        assert_eq!(
            format!("{err}"),
            "face 2 references vertex 7, but the scan has 5 points"
        );
    }

    #[test]
    fn test_attribute_length_mismatch_message() {
        let err = ScanError::AttributeLengthMismatch {
            attribute: "normals",
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            format!("{err}"),
            "normals has 2 entries, expected 3 (one per point)"
        );
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = ScanError::InvalidParameter("radius must be positive".to_string());
        assert_eq!(format!("{err}"), "invalid parameter: radius must be positive");
    }
}
