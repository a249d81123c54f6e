//! Variant ranking.
//!
//! `rank` turns client hints into an ordered list of variants. The first
//! element of the result is the recommended default: with no per-request
//! selector, every routed request on the session targets it.

use crate::registry::{VariantDescriptor, VariantHints, VariantStatus};

/// A ranking function. Receives the client's hints and the registered
/// descriptors (registration order) and returns a new ordering; the result
/// never aliases the input slice.
pub type RankFn =
    dyn Fn(&VariantHints, &[VariantDescriptor]) -> Vec<VariantDescriptor> + Send + Sync;

/// The default ranker: stable sort by `(priority, status weight)`.
///
/// Hints are ignored; deployments that want hint-driven ordering install a
/// custom [`RankFn`].
pub fn default_rank(
    _hints: &VariantHints,
    descriptors: &[VariantDescriptor],
) -> Vec<VariantDescriptor> {
    let mut ranked = descriptors.to_vec();
    ranked.sort_by_key(|d| (d.priority, VariantStatus::weight(d.status)));
    ranked
}

/// Move the first stable variant to the front unless the leading variant's
/// status was explicitly requested through the `status` hint.
///
/// Applied after every ranking (default or custom) so that a variant-unaware
/// client lands on a stable variant even when a custom ranker prefers an
/// experimental one.
pub fn promote_stable_first(
    hints: &VariantHints,
    mut ranked: Vec<VariantDescriptor>,
) -> Vec<VariantDescriptor> {
    let Some(first) = ranked.first() else {
        return ranked;
    };
    if first.status == Some(VariantStatus::Stable) {
        return ranked;
    }

    // An explicit status hint naming the leading status keeps the order.
    let requested = first
        .status
        .map(|status| status.as_str())
        .zip(hints.get("status"))
        .map(|(status, hint)| hint.contains(status))
        .unwrap_or(false);
    if requested {
        return ranked;
    }

    if let Some(index) = ranked
        .iter()
        .position(|d| d.status == Some(VariantStatus::Stable))
    {
        let stable = ranked.remove(index);
        ranked.insert(0, stable);
    }
    ranked
}
