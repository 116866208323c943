/// Provides the recommended log filter for programs which want to exclude particularly noisy
/// details of nerf-march's dependencies.
///
/// The guiding principle for this filtering is that at [`log::Level::Debug`] or lower level,
/// there should be no messages produced every training step unless something is wrong.
/// Per-step diagnostics from the engine itself are logged at [`log::Level::Trace`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn standard_filter(metadata: &log::Metadata<'_>) -> bool {
    let target = metadata.target();

    !(target.starts_with("rayon") // thread pool lifecycle
        || (target.starts_with("nerf_march::tracer") && metadata.level() >= log::Level::Trace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter() {
        assert!(!standard_filter(
            &log::Metadata::builder().target("rayon_core::registry").build()
        ));
        assert!(!standard_filter(
            &log::Metadata::builder()
                .target("nerf_march::tracer")
                .level(log::Level::Trace)
                .build()
        ));
        assert!(standard_filter(
            &log::Metadata::builder()
                .target("nerf_march::tracer")
                .level(log::Level::Info)
                .build()
        ));
        assert!(standard_filter(
            &log::Metadata::builder().target("some_random_crate").build()
        ));
    }
}
