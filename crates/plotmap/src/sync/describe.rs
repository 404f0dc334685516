use crate::parcel::{OwnerId, PlotId, PlotProvider};

/// Label and hover detail shared by point and region markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MarkerText {
    pub label: String,
    pub detail: String,
}

/// Builds the marker texts the way the overlay presents them: the owner's
/// display name as the label, and name / plot id / first seen / last seen as
/// the detail lines. A player never seen before reports the first-seen date
/// for both; a missing profile falls back to the raw owner id.
pub(crate) fn marker_text(
    provider: &dyn PlotProvider,
    owner: &OwnerId,
    id: PlotId,
    date_format: &str,
) -> MarkerText {
    let profile = provider.owner_profile(owner);
    let label = profile
        .as_ref()
        .and_then(|profile| profile.name.clone())
        .unwrap_or_else(|| owner.to_string());

    let mut lines = vec![label.clone(), id.to_string()];
    if let Some(profile) = profile {
        let first_seen = profile.first_seen.format(date_format).to_string();
        let last_seen = profile
            .last_seen
            .map(|seen| seen.format(date_format).to_string())
            .unwrap_or_else(|| first_seen.clone());
        lines.push(first_seen);
        lines.push(last_seen);
    }

    MarkerText {
        label,
        detail: lines.join("<br>"),
    }
}
