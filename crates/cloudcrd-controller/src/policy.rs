//! Which provider lookup failures mean "the resource does not exist"

use cloudcrd_gcp::{ErrorClass, ProviderError};
use tracing::warn;

/// Absence interpretation for one provider API.
///
/// NotFound always means absent. Some APIs also answer Forbidden for a
/// resource that does not exist; `forbidden_means_absent` opts into treating
/// that as absence too. Every such decision is logged at warn so a real
/// permission problem that ends in a create attempt stays visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbsencePolicy {
    /// Treat HTTP 403 on lookup as "does not exist"
    pub forbidden_means_absent: bool,
}

impl AbsencePolicy {
    /// Only NotFound means absent
    pub const STRICT: AbsencePolicy = AbsencePolicy {
        forbidden_means_absent: false,
    };

    /// NotFound and Forbidden both mean absent
    pub const FORBIDDEN_IS_ABSENT: AbsencePolicy = AbsencePolicy {
        forbidden_means_absent: true,
    };

    /// Whether a failed lookup of `resource` means it does not exist
    pub fn is_absent(&self, err: &ProviderError, resource: &str) -> bool {
        match err.class() {
            ErrorClass::NotFound => true,
            ErrorClass::Forbidden if self.forbidden_means_absent => {
                warn!(
                    resource,
                    error = %err,
                    "treating forbidden lookup as absent"
                );
                true
            }
            ErrorClass::Forbidden | ErrorClass::Other => false,
        }
    }
}

/// Absence policies per provider kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbsencePolicies {
    /// Compute Engine instance lookups
    pub instance: AbsencePolicy,
    /// Cloud SQL instance lookups
    pub database: AbsencePolicy,
}

impl Default for AbsencePolicies {
    /// Cloud SQL reports missing instances as 403; Compute Engine does not
    fn default() -> Self {
        Self {
            instance: AbsencePolicy::STRICT,
            database: AbsencePolicy::FORBIDDEN_IS_ABSENT,
        }
    }
}
