/*!
 * Record normalization
 *
 * Turns one raw Medicare utilization row into a `CanonicalClaim` with stable
 * field names: provider identifier, display name, 5-digit zip, specialty,
 * and revenue = services x average submitted charge.
 *
 * Two deliberate lenient behaviors:
 * - a missing services or charge field yields revenue 0.0, not an error;
 * - an NPI that fails validation is kept as an empty identifier so the row
 *   still aggregates under an "unknown provider" bucket instead of being
 *   silently dropped. Non-empty fields that fail numeric parsing are real
 *   malformed records and surface as `DataValidation` errors.
 */

use std::collections::HashMap;

use crate::{Result, ReferralGuardError};
use crate::data_types::{CanonicalClaim, Npi, ZipCode};
use crate::schema::BillingSchema;

/// NPI -> display name, built from the NPPES main file
pub type ProviderNameMap = HashMap<String, String>;

/// Display name used when no source carries a name for the provider
pub const UNKNOWN_PROVIDER: &str = "Unknown Provider";

/// Normalizer from raw billing rows to canonical claims
pub struct RecordNormalizer {
    schema: BillingSchema,
}

impl RecordNormalizer {
    /// Create a normalizer for a resolved billing schema
    pub fn new(schema: BillingSchema) -> Self {
        Self { schema }
    }

    /// Normalize one raw billing row
    pub fn normalize(
        &self,
        record: &csv::StringRecord,
        names: &ProviderNameMap,
        line_number: usize,
    ) -> Result<CanonicalClaim> {
        let get_field = |index: usize| -> Option<&str> {
            record.get(index)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        let raw_npi = get_field(self.schema.npi).unwrap_or("");
        let npi = match Npi::new(raw_npi.to_string()) {
            Ok(npi) => npi.0,
            // Kept, not dropped: revenue still counts in the market
            Err(_) => String::new(),
        };

        let zip_code = ZipCode::normalize(get_field(self.schema.zip).unwrap_or(""));
        let specialty = get_field(self.schema.specialty).unwrap_or("Unknown").to_string();

        let services = self.parse_numeric_field(
            record, self.schema.services, BillingSchema::SERVICES, line_number,
        )?;
        let avg_charge = self.parse_numeric_field(
            record, self.schema.avg_submitted_charge, BillingSchema::AVG_SUBMITTED_CHARGE,
            line_number,
        )?;

        let provider_name = self.resolve_name(&npi, record, names);

        Ok(CanonicalClaim {
            npi,
            provider_name,
            zip_code,
            specialty,
            services,
            avg_charge,
            revenue: services * avg_charge,
        })
    }

    /// Parse a numeric field; absent -> 0.0, present-but-unparseable -> error
    fn parse_numeric_field(
        &self,
        record: &csv::StringRecord,
        index: usize,
        field_name: &str,
        line_number: usize,
    ) -> Result<f64> {
        let raw = record.get(index).map(|s| s.trim()).unwrap_or("");
        if raw.is_empty() {
            return Ok(0.0);
        }
        raw.parse::<f64>()
            .map_err(|_| ReferralGuardError::malformed_numeric(field_name, raw, Some(line_number)))
    }

    /// Resolve the provider display name: NPPES name map first, then the
    /// billing file's own name columns, then the unknown-provider marker
    fn resolve_name(
        &self,
        npi: &str,
        record: &csv::StringRecord,
        names: &ProviderNameMap,
    ) -> String {
        if !npi.is_empty() {
            if let Some(name) = names.get(npi) {
                return name.clone();
            }
        }

        let get_field = |index: Option<usize>| -> Option<&str> {
            index.and_then(|i| record.get(i))
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        let last = get_field(self.schema.last_org_name);
        let first = get_field(self.schema.first_name);
        match (last, first) {
            (Some(last), Some(first)) => format!("{}, {}", last, first),
            (Some(last), None) => last.to_string(),
            _ => UNKNOWN_PROVIDER.to_string(),
        }
    }
}

/// Format an NPPES name-map entry the same way the insights file reports
/// providers: "Last, First" for individuals, legal business name for
/// organizations
pub fn format_display_name(
    last_name: Option<&str>,
    first_name: Option<&str>,
    organization_name: Option<&str>,
) -> Option<String> {
    if let Some(org) = organization_name.filter(|s| !s.trim().is_empty()) {
        return Some(org.trim().to_string());
    }
    match (
        last_name.map(str::trim).filter(|s| !s.is_empty()),
        first_name.map(str::trim).filter(|s| !s.is_empty()),
    ) {
        (Some(last), Some(first)) => Some(format!("{}, {}", last, first)),
        (Some(last), None) => Some(last.to_string()),
        _ => None,
    }
}
