//! Aggregation of cached cases into one flat CSV feature table.
//!
//! Windowed feature series are summarized here into four scalars each;
//! the whole-record HRV metrics are recomputed from the cached RR
//! sequences so a cache built in any analysis mode still aggregates.

use crate::analysis::measures::{hurst_exponent, sample_entropy, spectral_entropy};
use crate::analysis::stats::describe;
use crate::case::ProcessedCase;
use crate::error::CacheError;
use crate::metrics::hrv::{freq_domain, poincare_summary, time_domain};
use crate::signal::WindowSeries;
use csv::WriterBuilder;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Resampling rate of the RR signal for the Welch periodogram, in Hz.
const INTERP_RATE: f64 = 4.0;

/// Fixed output schema. Rows are validated against this width before
/// anything is written.
pub const TABLE_COLUMNS: &[&str] = &[
    "case",
    "record",
    "condition",
    "cond_id",
    "hurst",
    "cvnni",
    "cvsd",
    "mean_nni",
    "lf_hf_ratio",
    "total_power",
    "ratio_sd2_sd1",
    "sampen",
    "app_ent_mean",
    "app_ent_variance",
    "app_ent_skewness",
    "app_ent_spectral_entropy",
    "samp_ent_mean",
    "samp_ent_variance",
    "samp_ent_skewness",
    "samp_ent_spectral_entropy",
    "hfd_mean",
    "hfd_variance",
    "hfd_skewness",
    "hfd_spectral_entropy",
    "dfa_mean",
    "dfa_variance",
    "dfa_skewness",
    "dfa_spectral_entropy",
];

/// Pathology labels with fixed numeric ids.
pub const CONDITION_IDS: &[(&str, u32)] = &[
    ("atrial_fibrillation", 0),
    ("congestive_heartfailure", 1),
    ("myocardial_infarction", 2),
];

/// Distribution summary of one windowed feature series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesSummary {
    pub mean: f64,
    pub variance: f64,
    pub skewness: f64,
    pub spectral_entropy: f64,
}

impl SeriesSummary {
    pub fn of(series: &WindowSeries) -> Self {
        let moments = describe(&series.values);
        Self {
            mean: moments.mean,
            variance: moments.variance,
            skewness: moments.skewness,
            spectral_entropy: spectral_entropy(&series.values),
        }
    }
}

/// One output row, one per (case, record).
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub case: String,
    pub record: String,
    pub condition: String,
    pub cond_id: u32,
    pub hurst: f64,
    pub cvnni: f64,
    pub cvsd: f64,
    pub mean_nni: f64,
    pub lf_hf_ratio: f64,
    pub total_power: f64,
    pub ratio_sd2_sd1: f64,
    pub sampen: f64,
    pub app_ent: SeriesSummary,
    pub samp_ent: SeriesSummary,
    pub hfd: SeriesSummary,
    pub dfa: SeriesSummary,
}

impl FeatureRow {
    /// Field values in `TABLE_COLUMNS` order.
    pub fn values(&self) -> Vec<String> {
        let mut out = vec![
            self.case.clone(),
            self.record.clone(),
            self.condition.clone(),
            self.cond_id.to_string(),
        ];
        let scalars = [
            self.hurst,
            self.cvnni,
            self.cvsd,
            self.mean_nni,
            self.lf_hf_ratio,
            self.total_power,
            self.ratio_sd2_sd1,
            self.sampen,
        ];
        out.extend(scalars.iter().map(|v| v.to_string()));
        for summary in [&self.app_ent, &self.samp_ent, &self.hfd, &self.dfa] {
            out.push(summary.mean.to_string());
            out.push(summary.variance.to_string());
            out.push(summary.skewness.to_string());
            out.push(summary.spectral_entropy.to_string());
        }
        out
    }
}

/// Numeric id per pathology label: the fixed registry first, labels
/// outside it sorted and numbered after the registry. Dataset splits
/// with unexpected labels still aggregate deterministically.
pub fn condition_ids(cases: &[ProcessedCase]) -> BTreeMap<String, u32> {
    let mut ids: BTreeMap<String, u32> =
        CONDITION_IDS.iter().map(|(label, id)| (label.to_string(), *id)).collect();
    let mut extra: Vec<&str> = cases
        .iter()
        .map(|c| c.case.pathology.as_str())
        .filter(|label| !ids.contains_key(*label))
        .collect();
    extra.sort_unstable();
    extra.dedup();
    let base = CONDITION_IDS.len() as u32;
    for (offset, label) in extra.into_iter().enumerate() {
        ids.insert(label.to_string(), base + offset as u32);
    }
    ids
}

/// One row per record bundle. A record without a nonempty windowed
/// complexity battery, or with an empty RR sequence, is skipped with a
/// warning.
pub fn build_table(cases: &[ProcessedCase]) -> Vec<FeatureRow> {
    let ids = condition_ids(cases);
    let mut rows = Vec::new();
    for case in cases {
        let cond_id = ids[&case.case.pathology];
        for (name, bundle) in &case.bundles {
            let nonlinear = match &bundle.nonlinear {
                Some(nl) if !nl.app_entropy.is_empty() => nl,
                _ => {
                    warn!(
                        "case {}: record {name} has no windowed features, skipped",
                        case.case.id
                    );
                    continue;
                }
            };
            if bundle.rr.is_empty() {
                warn!("case {}: record {name} has an empty RR sequence, skipped", case.case.id);
                continue;
            }
            let time = time_domain(&bundle.rr);
            let freq = freq_domain(&bundle.rr, INTERP_RATE);
            let poincare = poincare_summary(&bundle.rr);
            rows.push(FeatureRow {
                case: case.case.id.clone(),
                record: name.clone(),
                condition: case.case.pathology.clone(),
                cond_id,
                hurst: hurst_exponent(&bundle.rr.rr),
                cvnni: time.cvnni,
                cvsd: time.cvsd,
                mean_nni: time.mean_nni,
                lf_hf_ratio: freq.lf_hf_ratio,
                total_power: freq.total_power,
                ratio_sd2_sd1: poincare.sd_ratio,
                sampen: sample_entropy(&bundle.rr.rr, 2),
                app_ent: SeriesSummary::of(&nonlinear.app_entropy),
                samp_ent: SeriesSummary::of(&nonlinear.sample_entropy),
                hfd: SeriesSummary::of(&nonlinear.higuchi_fd),
                dfa: SeriesSummary::of(&nonlinear.dfa),
            });
        }
    }
    info!("table built: {} rows from {} cases", rows.len(), cases.len());
    rows
}

/// Write rows as CSV under the fixed schema.
pub fn write_table(path: &Path, rows: &[FeatureRow]) -> Result<(), CacheError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let values = row.values();
        if values.len() != TABLE_COLUMNS.len() {
            return Err(CacheError::Encode {
                case: row.case.clone(),
                reason: format!(
                    "row for record {} has {} fields, schema has {}",
                    row.record,
                    values.len(),
                    TABLE_COLUMNS.len()
                ),
            });
        }
        records.push(values);
    }
    let file = File::create(path)
        .map_err(|source| CacheError::Io { path: path.to_path_buf(), source })?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record(TABLE_COLUMNS).map_err(|e| table_err(path, e))?;
    for record in &records {
        writer.write_record(record).map_err(|e| table_err(path, e))?;
    }
    writer
        .flush()
        .map_err(|source| CacheError::Io { path: path.to_path_buf(), source })?;
    info!("wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

fn table_err(path: &Path, err: csv::Error) -> CacheError {
    CacheError::Table { path: path.to_path_buf(), reason: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::window::{nonlinear_features, WindowConfig};
    use crate::case::{Case, FeatureBundle, ProcessedCase};
    use crate::signal::RRSeries;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fs;
    use tempfile::tempdir;

    fn noisy_rr(n: usize, seed: u64) -> RRSeries {
        let mut rng = StdRng::seed_from_u64(seed);
        RRSeries { rr: (0..n).map(|_| rng.gen_range(0.6..1.0)).collect() }
    }

    fn bundle_from(rr: RRSeries) -> FeatureBundle {
        let cfg = WindowConfig::new(16, 0.5).unwrap();
        let nonlinear = Some(nonlinear_features(&rr, &cfg));
        FeatureBundle { rr, linear: None, nonlinear }
    }

    fn processed(id: &str, pathology: &str, bundles: Vec<(&str, FeatureBundle)>) -> ProcessedCase {
        ProcessedCase {
            case: Case {
                id: id.to_string(),
                pathology: pathology.to_string(),
                sig_thresh: 1000,
                records: Vec::new(),
            },
            channel: "II".to_string(),
            bundles: bundles.into_iter().map(|(n, b)| (n.to_string(), b)).collect(),
        }
    }

    #[test]
    fn schema_width_is_stable() {
        assert_eq!(TABLE_COLUMNS.len(), 28);
        assert_eq!(TABLE_COLUMNS[..4], ["case", "record", "condition", "cond_id"]);
        let case = processed(
            "p000001",
            "atrial_fibrillation",
            vec![("r1", bundle_from(noisy_rr(64, 7)))],
        );
        let rows = build_table(&[case]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values().len(), TABLE_COLUMNS.len());
    }

    #[test]
    fn condition_ids_extend_the_registry() {
        let cases = vec![
            processed("p000001", "myocardial_infarction", vec![]),
            processed("p000002", "zz_newest", vec![]),
            processed("p000003", "an_unknown", vec![]),
            processed("p000004", "zz_newest", vec![]),
        ];
        let ids = condition_ids(&cases);
        assert_eq!(ids["atrial_fibrillation"], 0);
        assert_eq!(ids["congestive_heartfailure"], 1);
        assert_eq!(ids["myocardial_infarction"], 2);
        assert_eq!(ids["an_unknown"], 3);
        assert_eq!(ids["zz_newest"], 4);
    }

    #[test]
    fn incomplete_bundles_are_skipped() {
        let complete = bundle_from(noisy_rr(64, 11));
        let no_nonlinear = FeatureBundle {
            rr: noisy_rr(64, 12),
            linear: None,
            nonlinear: None,
        };
        // 4 intervals fit no 16-sample window, so its series are empty
        let too_short = bundle_from(noisy_rr(4, 13));
        let case = processed(
            "p000001",
            "atrial_fibrillation",
            vec![("r1", complete), ("r2", no_nonlinear), ("r3", too_short)],
        );
        let rows = build_table(&[case]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record, "r1");
    }

    #[test]
    fn row_fields_follow_the_column_order() {
        let case = processed(
            "p000009",
            "congestive_heartfailure",
            vec![("r1", bundle_from(noisy_rr(64, 3)))],
        );
        let rows = build_table(&[case]);
        let values = rows[0].values();
        assert_eq!(values[0], "p000009");
        assert_eq!(values[1], "r1");
        assert_eq!(values[2], "congestive_heartfailure");
        assert_eq!(values[3], "1");
        assert_eq!(values[4], rows[0].hurst.to_string());
        assert_eq!(values[11], rows[0].sampen.to_string());
        assert_eq!(values[12], rows[0].app_ent.mean.to_string());
        assert_eq!(values[27], rows[0].dfa.spectral_entropy.to_string());
    }

    #[test]
    fn written_table_round_trips_through_csv() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("complete_data.csv");
        let cases = vec![
            processed(
                "p000001",
                "atrial_fibrillation",
                vec![("r1", bundle_from(noisy_rr(64, 1)))],
            ),
            processed(
                "p000002",
                "congestive_heartfailure",
                vec![("r1", bundle_from(noisy_rr(64, 2)))],
            ),
        ];
        let rows = build_table(&cases);
        assert_eq!(rows.len(), 2);
        write_table(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), TABLE_COLUMNS.join(","));
        assert_eq!(lines.count(), rows.len());
        assert!(text.contains("atrial_fibrillation"));
    }

    #[test]
    fn metronomic_rr_serializes_the_infinite_ratio() {
        let rr = RRSeries { rr: vec![0.8; 64] };
        let case = processed("p000005", "myocardial_infarction", vec![("r1", bundle_from(rr))]);
        let rows = build_table(&[case]);
        assert!(rows[0].ratio_sd2_sd1.is_infinite());

        let tmp = tempdir().unwrap();
        let path = tmp.path().join("t.csv");
        write_table(&path, &rows).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("inf"));
    }
}
