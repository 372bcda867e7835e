//! Series to image catalog for the Scaleway provider.

use scaleway_rs::ScalewayImage;

use crate::provider::ProviderError;

/// Image labels published by Scaleway for each supported OS series.
const SERIES_IMAGE_LABELS: &[(&str, &str)] = &[
    ("focal", "Ubuntu 20.04 Focal Fossa"),
    ("jammy", "Ubuntu 22.04 Jammy Jellyfish"),
    ("noble", "Ubuntu 24.04 Noble Numbat"),
];

/// Maps an OS series to the catalog image label, when one is known.
pub(crate) fn image_label(series: &str) -> Option<&'static str> {
    SERIES_IMAGE_LABELS
        .iter()
        .find(|(known, _)| *known == series)
        .map(|(_, label)| *label)
}

/// Picks the newest available image for the requested architecture.
pub(crate) fn select_image_id(
    candidates: Vec<ScalewayImage>,
    label: &str,
    arch: &str,
    zone: &str,
) -> Result<String, ProviderError> {
    let mut usable: Vec<ScalewayImage> = candidates
        .into_iter()
        .filter(|image| image.arch == arch)
        .filter(|image| image.state == "available")
        .collect();

    if usable.is_empty() {
        return Err(ProviderError::ImageNotFound {
            label: label.to_owned(),
            arch: arch.to_owned(),
            zone: zone.to_owned(),
        });
    }
    usable.sort_by(|lhs, rhs| rhs.creation_date.cmp(&lhs.creation_date));
    Ok(usable.remove(0).id)
}
