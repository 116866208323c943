use std::collections::TryReserveError;

/// Errors from constructing or running the engine.
///
/// Numerical trouble inside kernels (NaN or negative densities, budget exhaustion) is
/// never reported here; it is clamped locally and reported through
/// [`TraceFlaws`](crate::TraceFlaws) and the step metrics.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NerfError {
    /// The training dataset contains no images.
    #[error("the training dataset contains no images")]
    EmptyDataset,

    /// A batch size or ray count of zero was requested.
    #[error("batch size must be nonzero")]
    ZeroBatchSize,

    /// A training image is unusable.
    #[error("training image {index} is invalid: {reason}")]
    InvalidImage {
        /// Index of the image in the dataset.
        index: usize,
        /// Description of the problem.
        reason: String,
    },

    /// The scene bounds scale is not a power of two in the supported range.
    #[error("aabb_scale {0} must be a power of two no greater than 128")]
    InvalidAabbScale(u32),

    /// The occupancy grid resolution is not a supported power of two.
    #[error("occupancy grid size {0} must be a power of two between 2 and 512")]
    InvalidGridSize(u32),

    /// The error map has no cells.
    #[error("error map resolution {0} must be at least 1")]
    InvalidErrorMapResolution(u32),

    /// An environment map's size or contents are unusable.
    #[error("invalid environment map: {0}")]
    InvalidEnvironmentMap(String),

    /// A loss function name was not recognized.
    #[error("unknown loss kind {0:?}")]
    UnknownLossKind(String),

    /// An activation function name was not recognized.
    #[error("unknown activation {0:?}")]
    UnknownActivation(String),

    /// Configuration text could not be parsed.
    #[error("invalid configuration")]
    InvalidConfig(#[from] serde_json::Error),

    /// A buffer could not be enlarged.
    #[error("failed to allocate a buffer of {requested} elements")]
    OutOfMemory {
        /// Number of elements that were requested.
        requested: usize,
        /// Error from the allocator.
        #[source]
        source: TryReserveError,
    },
}

/// Grows `buffer` to exactly `len` elements, filled with `value`, reporting allocation failure
/// as [`NerfError::OutOfMemory`] instead of aborting.
pub(crate) fn resize_buffer<T: Clone>(buffer: &mut Vec<T>, len: usize, value: T) -> crate::Result<()> {
    if let Some(additional) = len.checked_sub(buffer.len()) {
        buffer
            .try_reserve(additional)
            .map_err(|source| NerfError::OutOfMemory {
                requested: len,
                source,
            })?;
    }
    buffer.clear();
    buffer.resize(len, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            NerfError::InvalidImage {
                index: 3,
                reason: "pixel buffer is empty".into()
            }
            .to_string(),
            "training image 3 is invalid: pixel buffer is empty"
        );
        assert_eq!(
            NerfError::UnknownLossKind("l3".into()).to_string(),
            "unknown loss kind \"l3\""
        );
    }

    #[test]
    fn resize_buffer_fills() {
        let mut buffer = vec![1u8, 2, 3];
        resize_buffer(&mut buffer, 5, 0).unwrap();
        assert_eq!(buffer, vec![0, 0, 0, 0, 0]);
        resize_buffer(&mut buffer, 2, 7).unwrap();
        assert_eq!(buffer, vec![7, 7]);
    }

    #[test]
    fn resize_buffer_reports_failure() {
        let mut buffer: Vec<u64> = Vec::new();
        let error = resize_buffer(&mut buffer, usize::MAX / 4, 0).unwrap_err();
        assert!(matches!(error, NerfError::OutOfMemory { .. }), "{error:?}");
    }
}
