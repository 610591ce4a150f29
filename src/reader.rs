/*!
 * CSV readers for the raw source files
 *
 * Reads the Medicare utilization file into canonical claims, the NPPES main
 * file into an NPI -> name map, and the NPPES endpoint file into affiliation
 * records, with progress reporting, malformed-row counting, and memory
 * usage estimation.
 */

use std::path::Path;
use std::fs::File;
use std::time::{Duration, Instant};
use csv::ReaderBuilder;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{Result, ReferralGuardError, ErrorContext};
use crate::data_types::{AffiliationRecord, CanonicalClaim};
use crate::normalize::{format_display_name, ProviderNameMap, RecordNormalizer};
use crate::schema::{BillingSchema, EndpointSchema, ProviderNameSchema};

/// Progress information for long-running operations
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Number of records processed so far
    pub current_records: usize,
    /// Number of bytes processed (estimated)
    pub bytes_processed: usize,
    /// Time elapsed since operation started
    pub elapsed_time: Duration,
    /// Current processing rate (records per second)
    pub records_per_second: f64,
}

/// Memory usage estimation
#[derive(Debug, Clone)]
pub struct MemoryEstimate {
    /// Size of the source file in bytes
    pub file_size: u64,
    /// Estimated number of records
    pub estimated_records: u64,
    /// Estimated memory needed in bytes
    pub estimated_memory_bytes: usize,
    /// Human-readable memory estimate
    pub estimated_memory_human: String,
}

/// Billing-file load output: claims plus the malformed-row count
#[derive(Debug, Default)]
pub struct BillingLoadResult {
    pub claims: Vec<CanonicalClaim>,
    pub skipped_records: usize,
}

/// Reader for the raw pipeline source files
pub struct ClaimsReader {
    /// Whether to skip malformed records (true) or fail on first error (false)
    skip_invalid_records: bool,
    /// Progress callback function
    #[cfg(feature = "progress")]
    progress_callback: Option<Box<dyn Fn(ProgressInfo) + Send + Sync>>,
    /// Whether to show progress bar
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl Default for ClaimsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimsReader {
    /// Create a new reader with default settings
    pub fn new() -> Self {
        Self {
            skip_invalid_records: false,
            #[cfg(feature = "progress")]
            progress_callback: None,
            #[cfg(feature = "progress")]
            show_progress_bar: true,
        }
    }

    /// Enable or disable skipping malformed records
    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    #[cfg(feature = "progress")]
    /// Set a progress callback function
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    /// Estimate memory usage for a billing file
    pub fn estimate_memory_usage<P: AsRef<Path>>(path: P) -> Result<MemoryEstimate> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let file_size = metadata.len();

        // Utilization rows average about 300 bytes in CSV, 160 in memory
        let estimated_records = file_size / 300;
        let estimated_memory_bytes = (estimated_records as usize) * 160;

        let estimated_memory_human = format_bytes(estimated_memory_bytes);

        Ok(MemoryEstimate {
            file_size,
            estimated_records,
            estimated_memory_bytes,
            estimated_memory_human,
        })
    }

    /// Load the Medicare utilization file into canonical claims
    pub fn load_billing_claims<P: AsRef<Path>>(
        &self,
        path: P,
        names: &ProviderNameMap,
    ) -> Result<BillingLoadResult> {
        let mut result = BillingLoadResult::default();
        let claims = &mut result.claims;
        let skipped = self.fold_billing_claims(path, names, usize::MAX, |chunk| {
            claims.extend(chunk);
        })?;
        result.skipped_records = skipped;
        Ok(result)
    }

    /// Stream the Medicare utilization file in bounded chunks
    ///
    /// Chunks bound peak memory over multi-gigabyte raw files; each chunk is
    /// handed to `consume` as soon as it fills. Returns the malformed-row
    /// count.
    pub fn fold_billing_claims<P, F>(
        &self,
        path: P,
        names: &ProviderNameMap,
        chunk_size: usize,
        mut consume: F,
    ) -> Result<usize>
    where
        P: AsRef<Path>,
        F: FnMut(Vec<CanonicalClaim>),
    {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ReferralGuardError::file_not_found_with_suggestion(path.to_path_buf()));
        }

        let memory_estimate = Self::estimate_memory_usage(path)?;
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let schema = BillingSchema::resolve(&headers)?;
        let normalizer = RecordNormalizer::new(schema);

        let chunk_capacity = chunk_size.min(memory_estimate.estimated_records as usize + 1);
        let mut chunk: Vec<CanonicalClaim> = Vec::with_capacity(chunk_capacity.min(65_536));
        let mut record_count = 0usize;
        let mut loaded_count = 0usize;
        let mut invalid_count = 0usize;
        let start_time = Instant::now();

        #[cfg(feature = "progress")]
        let progress_bar = if self.show_progress_bar {
            let pb = ProgressBar::new(file_size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .unwrap()
                    .progress_chars("#>-")
            );
            Some(pb)
        } else {
            None
        };

        for result in reader.records() {
            record_count += 1;

            // Estimate bytes processed (rough approximation)
            let bytes_processed = (record_count * 300).min(file_size as usize);

            #[cfg(feature = "progress")]
            {
                if let Some(ref pb) = progress_bar {
                    pb.set_position(bytes_processed as u64);
                }

                if let Some(ref callback) = self.progress_callback {
                    if record_count % 1000 == 0 {
                        let elapsed = start_time.elapsed();
                        let records_per_second = if elapsed.as_secs() > 0 {
                            record_count as f64 / elapsed.as_secs_f64()
                        } else {
                            0.0
                        };
                        callback(ProgressInfo {
                            current_records: record_count,
                            bytes_processed,
                            elapsed_time: elapsed,
                            records_per_second,
                        });
                    }
                }
            }
            #[cfg(not(feature = "progress"))]
            let _ = bytes_processed;

            match result {
                Ok(csv_record) => {
                    match normalizer.normalize(&csv_record, names, record_count) {
                        Ok(claim) => {
                            chunk.push(claim);
                            loaded_count += 1;
                            if chunk.len() >= chunk_size {
                                consume(std::mem::take(&mut chunk));
                            }
                        }
                        Err(e) => {
                            invalid_count += 1;
                            if self.skip_invalid_records {
                                if invalid_count <= 10 {
                                    eprintln!("Warning: Skipping invalid record {}: {}", record_count, e);
                                }
                            } else {
                                return Err(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    let error = ReferralGuardError::CsvParse {
                        message: format!("CSV error: {}", e),
                        line: Some(record_count),
                        column: None,
                        context: ErrorContext {
                            file_path: Some(path.to_path_buf()),
                            line_number: Some(record_count),
                            ..Default::default()
                        },
                    };

                    if self.skip_invalid_records {
                        invalid_count += 1;
                        if invalid_count <= 10 {
                            eprintln!("Warning: {}", error);
                        }
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        if !chunk.is_empty() {
            consume(chunk);
        }

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_with_message("Loading complete");
        }

        let elapsed = start_time.elapsed();
        println!(
            "Successfully loaded {} billing claims in {:.2}s ({:.0} records/sec)",
            loaded_count,
            elapsed.as_secs_f64(),
            loaded_count as f64 / elapsed.as_secs_f64().max(1e-9)
        );

        if invalid_count > 0 {
            println!("Skipped {} invalid records", invalid_count);
        }

        Ok(invalid_count)
    }

    /// Load the NPPES main file into an NPI -> display-name map
    ///
    /// Rows with an unusable NPI or no name columns are skipped with a
    /// count; a missing name only degrades display output downstream.
    pub fn load_provider_names<P: AsRef<Path>>(&self, path: P) -> Result<ProviderNameMap> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ReferralGuardError::file_not_found_with_suggestion(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            // NPPES vintages occasionally differ in trailing columns
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let schema = ProviderNameSchema::resolve(&headers)?;

        let mut names = ProviderNameMap::new();
        let mut unnamed_count = 0usize;
        let start_time = Instant::now();

        for (idx, result) in reader.records().enumerate() {
            let csv_record = result.map_err(|e| ReferralGuardError::CsvParse {
                message: e.to_string(),
                line: Some(idx + 2), // +2 for header and 0-based index
                column: None,
                context: ErrorContext {
                    file_path: Some(path.to_path_buf()),
                    line_number: Some(idx + 2),
                    ..Default::default()
                },
            })?;

            let get_field = |index: Option<usize>| -> Option<&str> {
                index.and_then(|i| csv_record.get(i))
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
            };

            let npi = match csv_record.get(schema.npi).map(str::trim) {
                Some(npi) if !npi.is_empty() => npi.to_string(),
                _ => continue,
            };

            match format_display_name(
                get_field(schema.last_name),
                get_field(schema.first_name),
                get_field(schema.organization_name),
            ) {
                Some(name) => {
                    names.insert(npi, name);
                }
                None => unnamed_count += 1,
            }
        }

        let elapsed = start_time.elapsed();
        println!(
            "Successfully loaded {} provider names in {:.2}s",
            names.len(),
            elapsed.as_secs_f64()
        );
        if unnamed_count > 0 {
            println!("Skipped {} rows without usable name fields", unnamed_count);
        }

        Ok(names)
    }

    /// Load the NPPES endpoint file into affiliation records
    pub fn load_endpoint_records<P: AsRef<Path>>(&self, path: P) -> Result<Vec<AffiliationRecord>> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ReferralGuardError::file_not_found_with_suggestion(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let schema = EndpointSchema::resolve(&headers)?;

        let mut records = Vec::new();
        let start_time = Instant::now();

        for (idx, result) in reader.records().enumerate() {
            let csv_record = result.map_err(|e| ReferralGuardError::CsvParse {
                message: e.to_string(),
                line: Some(idx + 2),
                column: None,
                context: ErrorContext {
                    file_path: Some(path.to_path_buf()),
                    line_number: Some(idx + 2),
                    ..Default::default()
                },
            })?;

            let get_field = |index: Option<usize>| -> Option<String> {
                index.and_then(|i| csv_record.get(i))
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
            };

            let npi = match csv_record.get(schema.npi).map(str::trim) {
                Some(npi) if !npi.is_empty() => npi.to_string(),
                _ => continue,
            };

            records.push(AffiliationRecord {
                npi,
                endpoint: get_field(schema.endpoint),
                affiliation_legal_business_name: get_field(schema.affiliation_lbn),
            });
        }

        let elapsed = start_time.elapsed();
        println!(
            "Successfully loaded {} endpoint records in {:.2}s",
            records.len(),
            elapsed.as_secs_f64()
        );

        Ok(records)
    }
}

// Helper functions

/// Format bytes into human-readable string
fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const BILLING_HEADER: &str =
        "Rndrng_NPI,Rndrng_Prvdr_Last_Org_Name,Rndrng_Prvdr_First_Name,Rndrng_Prvdr_Zip5,Rndrng_Prvdr_Type,Tot_Srvcs,Avg_Sbmtd_Chrg\n";

    #[test]
    fn test_load_billing_claims() {
        let file = write_temp_csv(&format!(
            "{}1234567890,SMITH,JANE,90210,Cardiology,100,250.5\n1234567891,JONES,AMY,90210,Cardiology,50,100\n",
            BILLING_HEADER
        ));

        let reader = make_reader();
        let result = reader.load_billing_claims(file.path(), &ProviderNameMap::new()).unwrap();
        assert_eq!(result.claims.len(), 2);
        assert_eq!(result.skipped_records, 0);
        assert!((result.claims[0].revenue - 25050.0).abs() < 1e-9);
    }

    #[test]
    fn test_skip_invalid_counts_malformed_rows() {
        let file = write_temp_csv(&format!(
            "{}1234567890,SMITH,JANE,90210,Cardiology,ten,250.5\n1234567891,JONES,AMY,90210,Cardiology,50,100\n",
            BILLING_HEADER
        ));

        let reader = make_reader().with_skip_invalid_records(true);
        let result = reader.load_billing_claims(file.path(), &ProviderNameMap::new()).unwrap();
        assert_eq!(result.claims.len(), 1);
        assert_eq!(result.skipped_records, 1);
    }

    #[test]
    fn test_strict_mode_fails_on_malformed_row() {
        let file = write_temp_csv(&format!(
            "{}1234567890,SMITH,JANE,90210,Cardiology,ten,250.5\n",
            BILLING_HEADER
        ));

        let reader = make_reader();
        assert!(reader.load_billing_claims(file.path(), &ProviderNameMap::new()).is_err());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let reader = make_reader();
        let err = reader
            .load_billing_claims("/nonexistent/billing.csv", &ProviderNameMap::new())
            .unwrap_err();
        assert!(matches!(err, ReferralGuardError::FileNotFound { .. }));
    }

    #[test]
    fn test_chunked_folding() {
        let mut contents = BILLING_HEADER.to_string();
        for i in 0..10 {
            contents.push_str(&format!("12345678{:02},SMITH,JANE,90210,Cardiology,1,10\n", i));
        }
        let file = write_temp_csv(&contents);

        let reader = make_reader();
        let mut chunks = Vec::new();
        reader.fold_billing_claims(file.path(), &ProviderNameMap::new(), 4, |chunk| {
            chunks.push(chunk.len());
        }).unwrap();
        assert_eq!(chunks, vec![4, 4, 2]);
    }

    #[test]
    fn test_load_provider_names() {
        let file = write_temp_csv(
            "NPI,Provider Last Name (Legal Name),Provider First Name,Provider Organization Name (Legal Business Name)\n\
             1234567890,SMITH,JANE,\n\
             1234567891,,,ACME HEALTH LLC\n\
             1234567892,,,\n",
        );

        let reader = make_reader();
        let names = reader.load_provider_names(file.path()).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names["1234567890"], "SMITH, JANE");
        assert_eq!(names["1234567891"], "ACME HEALTH LLC");
    }

    #[test]
    fn test_load_endpoint_records() {
        let file = write_temp_csv(
            "NPI,Endpoint Type,Endpoint,Affiliation Legal Business Name\n\
             1234567890,FHIR,https://fhir.example.org,ACME HEALTH LLC\n\
             1234567891,FHIR,https://fhir.example.org,ACME HEALTH LLC\n",
        );

        let reader = make_reader();
        let records = reader.load_endpoint_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].affiliation_legal_business_name.as_deref(),
            Some("ACME HEALTH LLC")
        );
    }

    fn make_reader() -> ClaimsReader {
        #[cfg(feature = "progress")]
        { ClaimsReader::new().with_progress_bar(false) }
        #[cfg(not(feature = "progress"))]
        { ClaimsReader::new() }
    }
}
