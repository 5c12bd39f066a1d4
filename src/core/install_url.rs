use crate::domain::model::{InstallUrl, ProvisioningProfile};

/// Payload prefixes that a device can open directly as an eSIM install link.
const INSTALLABLE_PREFIXES: &[&str] = &[
    "lpa:",
    "https://esimsetup.apple.com/",
];

fn is_installable(payload: &str) -> bool {
    let lowered = payload.trim().to_ascii_lowercase();
    INSTALLABLE_PREFIXES.iter().any(|p| lowered.starts_with(p))
}

/// Picks or builds an install URL for a profile. Pure, no I/O.
///
/// A payload that is already an install link is returned unchanged. Otherwise
/// the activation code `LPA:1$<smdp>$<matching id>` is built when both fields
/// are present. Fields are trimmed, and a field containing `$` yields `None`
/// so [`InstallUrl::parse`] always recovers the trimmed fields exactly.
/// `None` means the caller must show manual-entry instructions.
pub fn synthesize(profile: &ProvisioningProfile) -> Option<InstallUrl> {
    if let Some(payload) = profile.qr_code_payload.as_deref() {
        if is_installable(payload) {
            return Some(InstallUrl(payload.trim().to_string()));
        }
    }

    let smdp = activation_field(profile.smdp_address.as_deref())?;
    let matching_id = activation_field(profile.matching_id.as_deref())?;
    Some(InstallUrl(format!("LPA:1${}${}", smdp, matching_id)))
}

/// A trimmed, non-empty field that cannot contain the `$` separator.
fn activation_field(value: Option<&str>) -> Option<&str> {
    let value = value.map(str::trim).filter(|s| !s.is_empty())?;
    if value.contains('$') {
        tracing::warn!("Activation field '{}' contains '$', cannot build an install URL", value);
        return None;
    }
    Some(value)
}

impl InstallUrl {
    /// Splits an `LPA:1$<smdp>$<matching id>[$...]` activation code into its
    /// SM-DP+ address and matching ID. Trailing optional fields are ignored.
    pub fn parse(value: &str) -> Option<(String, String)> {
        let value = value.trim();
        let scheme = value.get(..4)?;
        if !scheme.eq_ignore_ascii_case("lpa:") {
            return None;
        }
        let rest = &value[4..];

        let mut parts = rest.split('$');
        if parts.next()? != "1" {
            return None;
        }
        let smdp = parts.next().filter(|s| !s.is_empty())?;
        let matching_id = parts.next().filter(|s| !s.is_empty())?;
        Some((smdp.to_string(), matching_id.to_string()))
    }

    pub fn components(&self) -> Option<(String, String)> {
        Self::parse(&self.0)
    }
}
