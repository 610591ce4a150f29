/*!
 * Schema definitions for the raw source files
 *
 * Each source file carries its own column naming convention; this module
 * resolves the handful of columns the pipeline actually consumes by header
 * name, so column reordering or trailing additions in new file vintages do
 * not break ingestion.
 */

use crate::{Result, ReferralGuardError};

/// Resolve a required column index by header name
fn require_column(headers: &[String], name: &str) -> Result<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| {
        ReferralGuardError::SchemaMismatch {
            message: format!("Required column '{}' not found in header row", name),
            expected_columns: None,
            found_columns: Some(headers.len()),
            mismatched_column: None,
        }
    })
}

/// Resolve an optional column index by header name
fn optional_column(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

/// Medicare Physician & Other Practitioners (by Provider and Service) file
///
/// Column names follow the CMS "MUP_PHY" data dictionary.
#[derive(Debug, Clone)]
pub struct BillingSchema {
    pub npi: usize,
    pub zip: usize,
    pub specialty: usize,
    pub services: usize,
    pub avg_submitted_charge: usize,
    pub last_org_name: Option<usize>,
    pub first_name: Option<usize>,
}

impl BillingSchema {
    pub const NPI: &'static str = "Rndrng_NPI";
    pub const ZIP: &'static str = "Rndrng_Prvdr_Zip5";
    pub const SPECIALTY: &'static str = "Rndrng_Prvdr_Type";
    pub const SERVICES: &'static str = "Tot_Srvcs";
    pub const AVG_SUBMITTED_CHARGE: &'static str = "Avg_Sbmtd_Chrg";
    pub const LAST_ORG_NAME: &'static str = "Rndrng_Prvdr_Last_Org_Name";
    pub const FIRST_NAME: &'static str = "Rndrng_Prvdr_First_Name";

    /// Resolve column positions from the header row
    pub fn resolve(headers: &[String]) -> Result<Self> {
        Ok(Self {
            npi: require_column(headers, Self::NPI)?,
            zip: require_column(headers, Self::ZIP)?,
            specialty: require_column(headers, Self::SPECIALTY)?,
            services: require_column(headers, Self::SERVICES)?,
            avg_submitted_charge: require_column(headers, Self::AVG_SUBMITTED_CHARGE)?,
            last_org_name: optional_column(headers, Self::LAST_ORG_NAME),
            first_name: optional_column(headers, Self::FIRST_NAME),
        })
    }
}

/// NPPES main data file, reduced to the name-map columns
///
/// Only the identifier and display-name columns are read; the remaining
/// 300+ NPPES columns are ignored.
#[derive(Debug, Clone)]
pub struct ProviderNameSchema {
    pub npi: usize,
    pub last_name: Option<usize>,
    pub first_name: Option<usize>,
    pub organization_name: Option<usize>,
}

impl ProviderNameSchema {
    pub const NPI: &'static str = "NPI";
    pub const LAST_NAME: &'static str = "Provider Last Name (Legal Name)";
    pub const FIRST_NAME: &'static str = "Provider First Name";
    pub const ORGANIZATION_NAME: &'static str = "Provider Organization Name (Legal Business Name)";

    /// Resolve column positions from the header row
    pub fn resolve(headers: &[String]) -> Result<Self> {
        Ok(Self {
            npi: require_column(headers, Self::NPI)?,
            last_name: optional_column(headers, Self::LAST_NAME),
            first_name: optional_column(headers, Self::FIRST_NAME),
            organization_name: optional_column(headers, Self::ORGANIZATION_NAME),
        })
    }
}

/// NPPES endpoint file, reduced to the affiliation columns used by the
/// provider-network analysis
#[derive(Debug, Clone)]
pub struct EndpointSchema {
    pub npi: usize,
    pub endpoint: Option<usize>,
    pub affiliation_lbn: Option<usize>,
}

impl EndpointSchema {
    pub const NPI: &'static str = "NPI";
    pub const ENDPOINT: &'static str = "Endpoint";
    pub const AFFILIATION_LBN: &'static str = "Affiliation Legal Business Name";

    /// Resolve column positions from the header row
    pub fn resolve(headers: &[String]) -> Result<Self> {
        Ok(Self {
            npi: require_column(headers, Self::NPI)?,
            endpoint: optional_column(headers, Self::ENDPOINT),
            affiliation_lbn: optional_column(headers, Self::AFFILIATION_LBN),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_billing_schema_resolution() {
        let hdrs = headers(&[
            "Rndrng_NPI",
            "Rndrng_Prvdr_Last_Org_Name",
            "Rndrng_Prvdr_First_Name",
            "Rndrng_Prvdr_Zip5",
            "Rndrng_Prvdr_Type",
            "HCPCS_Cd",
            "Tot_Srvcs",
            "Avg_Sbmtd_Chrg",
        ]);
        let schema = BillingSchema::resolve(&hdrs).unwrap();
        assert_eq!(schema.npi, 0);
        assert_eq!(schema.zip, 3);
        assert_eq!(schema.specialty, 4);
        assert_eq!(schema.services, 6);
        assert_eq!(schema.avg_submitted_charge, 7);
        assert_eq!(schema.last_org_name, Some(1));
    }

    #[test]
    fn test_billing_schema_missing_column() {
        let hdrs = headers(&["Rndrng_NPI", "Tot_Srvcs"]);
        let err = BillingSchema::resolve(&hdrs).unwrap_err();
        assert!(err.to_string().contains("Rndrng_Prvdr_Zip5"));
    }

    #[test]
    fn test_endpoint_schema_optional_columns() {
        let hdrs = headers(&["NPI", "Endpoint Type", "Endpoint"]);
        let schema = EndpointSchema::resolve(&hdrs).unwrap();
        assert_eq!(schema.npi, 0);
        assert_eq!(schema.endpoint, Some(2));
        assert_eq!(schema.affiliation_lbn, None);
    }
}
