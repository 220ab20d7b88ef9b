use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::aggregate::build_snapshot;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::ingest::{self, ColumnMapping, Field, RejectedRow};
use crate::insights::{self, InsightSection};
use crate::models::{
    AnalysisSnapshot, KeywordStat, MessageGroup, Overview, ResponseSegments, ServiceStat,
    TimingAnalysis, VolumeSplit, WeekdayStat,
};
use crate::synthesizer::{GenerationOutcome, GenerationRequest, Synthesizer};

/// Rejected rows listed individually in a summary; the rest are only counted.
const REJECTED_SAMPLE: usize = 20;

/// Holds the latest snapshot. Readers get an `Arc` and never observe a
/// partially built snapshot.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Option<Arc<AnalysisSnapshot>>>,
}

impl SnapshotStore {
    pub fn replace(&self, snapshot: AnalysisSnapshot) -> Arc<AnalysisSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn current(&self) -> Result<Arc<AnalysisSnapshot>, AnalysisError> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(AnalysisError::NoSnapshotAvailable)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub snapshot_id: Uuid,
    pub total_rows: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub rejection_counts: BTreeMap<String, usize>,
    pub rejected_rows: Vec<RejectedRow>,
    pub rate_mismatches: usize,
    pub columns: BTreeMap<Field, String>,
    pub overview: Overview,
    pub threshold: f64,
    pub high_performers: Vec<MessageGroup>,
    pub keywords: Vec<KeywordStat>,
    pub services: Vec<ServiceStat>,
    pub weekdays: Vec<WeekdayStat>,
    pub timing: TimingAnalysis,
    pub volume: Option<VolumeSplit>,
    pub segments: Option<ResponseSegments>,
}

pub struct AnalysisService {
    config: AnalysisConfig,
    store: SnapshotStore,
    synthesizer: Synthesizer,
}

impl AnalysisService {
    pub fn new(config: AnalysisConfig, synthesizer: Synthesizer) -> Self {
        Self {
            config,
            store: SnapshotStore::default(),
            synthesizer,
        }
    }

    /// Parses and aggregates `raw`, then swaps the new snapshot in. A fatal
    /// error leaves the previous snapshot in place.
    pub fn upload(&self, raw: &[u8], mapping: &ColumnMapping) -> Result<UploadSummary, AnalysisError> {
        let table = ingest::parse_csv(raw, mapping, self.config.max_upload_bytes)?;
        let snapshot = build_snapshot(&table.records, &self.config);

        let mut rejection_counts = BTreeMap::new();
        for row in &table.rejected {
            *rejection_counts.entry(row.reason.kind().to_string()).or_insert(0) += 1;
        }

        let summary = UploadSummary {
            snapshot_id: snapshot.id,
            total_rows: table.total_rows,
            accepted: table.records.len(),
            rejected: table.rejected.len(),
            rejection_counts,
            rejected_rows: table.rejected.iter().take(REJECTED_SAMPLE).cloned().collect(),
            rate_mismatches: table.rate_mismatches,
            columns: table.resolved.clone(),
            overview: snapshot.overview.clone(),
            threshold: snapshot.high_performers.threshold,
            high_performers: snapshot
                .high_performers
                .groups
                .iter()
                .take(self.config.top_n)
                .cloned()
                .collect(),
            keywords: snapshot.keywords.clone(),
            services: snapshot.services.clone(),
            weekdays: snapshot.weekdays.clone(),
            timing: snapshot.timing.clone(),
            volume: snapshot.volume.clone(),
            segments: snapshot.segments.clone(),
        };

        self.store.replace(snapshot);
        info!(
            snapshot_id = %summary.snapshot_id,
            accepted = summary.accepted,
            rejected = summary.rejected,
            high_performers = summary.high_performers.len(),
            "upload analyzed"
        );
        Ok(summary)
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Result<Arc<AnalysisSnapshot>, AnalysisError> {
        self.store.current()
    }

    pub fn insights(&self) -> Result<Vec<InsightSection>, AnalysisError> {
        let snapshot = self.store.current()?;
        Ok(insights::compose(&snapshot))
    }

    pub fn report(&self, source: Option<&str>) -> Result<String, AnalysisError> {
        let snapshot = self.store.current()?;
        Ok(insights::render_report(&snapshot, source))
    }

    /// The snapshot `Arc` is cloned before the external call, so an upload
    /// during generation does not affect this request.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutcome, AnalysisError> {
        let snapshot = self.store.current()?;
        Ok(self.synthesizer.generate(request, &snapshot).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tone;
    use crate::synthesizer::CandidateSource;
    use crate::test_support::SCENARIO_CSV;

    fn service() -> AnalysisService {
        let config = AnalysisConfig::default();
        let synthesizer = Synthesizer::template_only(config.prediction.clone());
        AnalysisService::new(config, synthesizer)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            description: "benefit loan for office workers".to_string(),
            service: Some("credit-loan".to_string()),
            audience: None,
            tone: Tone::Promotional,
            keyword_hints: Vec::new(),
        }
    }

    #[tokio::test]
    async fn reads_before_upload_report_no_snapshot() {
        let service = service();
        assert!(matches!(service.insights(), Err(AnalysisError::NoSnapshotAvailable)));
        assert!(matches!(service.report(None), Err(AnalysisError::NoSnapshotAvailable)));
        assert!(matches!(
            service.generate(&request()).await,
            Err(AnalysisError::NoSnapshotAvailable)
        ));
    }

    #[test]
    fn upload_summarizes_scenario() {
        let service = service();
        let summary = service
            .upload(SCENARIO_CSV.as_bytes(), &ColumnMapping::default())
            .unwrap();

        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 0);
        assert!(summary.rejection_counts.is_empty());
        assert_eq!(summary.columns.get(&Field::Message).map(String::as_str), Some("발송 문구"));
        // mean 10.4 → threshold 12.48, sparse data keeps only the best group.
        assert_eq!(summary.high_performers.len(), 1);
        assert_eq!(summary.high_performers[0].average_click_rate, 12.5);
        assert_eq!(service.snapshot().unwrap().id, summary.snapshot_id);
    }

    #[test]
    fn rejected_rows_are_counted_by_reason() {
        let csv = "서비스명,클릭율,발송 문구\n\
                   신용대출,9.5,(광고) 혜택\n\
                   신용대출,abc,(광고) 금리\n\
                   신용대출,150,(광고) 한도\n\
                   신용대출,7.0,\n";
        let summary = service()
            .upload(csv.as_bytes(), &ColumnMapping::default())
            .unwrap();

        assert_eq!(summary.accepted + summary.rejected, summary.total_rows);
        assert_eq!(summary.rejected, 3);
        assert_eq!(summary.rejection_counts.values().sum::<usize>(), 3);
        assert_eq!(summary.rejected_rows.len(), 3);
    }

    #[test]
    fn fatal_upload_keeps_previous_snapshot() {
        let service = service();
        let first = service
            .upload(SCENARIO_CSV.as_bytes(), &ColumnMapping::default())
            .unwrap();

        let failed = service.upload(b"a,b\n1,2\n", &ColumnMapping::default());
        assert!(matches!(failed, Err(AnalysisError::MalformedInput(_))));
        assert_eq!(service.snapshot().unwrap().id, first.snapshot_id);
    }

    #[test]
    fn new_upload_replaces_snapshot_without_touching_held_copies() {
        let service = service();
        service
            .upload(SCENARIO_CSV.as_bytes(), &ColumnMapping::default())
            .unwrap();
        let held = service.snapshot().unwrap();

        let second = service
            .upload("발송 문구,클릭율\n(광고) 금리 비교,4.0\n".as_bytes(), &ColumnMapping::default())
            .unwrap();

        assert_ne!(held.id, second.snapshot_id);
        assert_eq!(held.overview.record_count, 2);
        assert_eq!(service.snapshot().unwrap().overview.record_count, 1);
    }

    #[test]
    fn insights_and_report_read_the_uploaded_snapshot() {
        let service = service();
        service
            .upload(SCENARIO_CSV.as_bytes(), &ColumnMapping::default())
            .unwrap();

        let sections = service.insights().unwrap();
        assert_eq!(sections.len(), 7);
        let report = service.report(Some("history.csv")).unwrap();
        assert!(report.contains("history.csv"));
        assert!(report.contains("| credit-loan | 2 |"));
    }

    #[test]
    fn duplicate_maximal_send_counts_do_not_abort_the_upload() {
        let csv = "문구,클릭율,발송회원수,클릭회원수\n\
                   (광고) 혜택,5.0,18446744073709551615,1\n\
                   (광고) 혜택,5.0,18446744073709551615,1\n";
        let service = service();
        let summary = service
            .upload(csv.as_bytes(), &ColumnMapping::default())
            .unwrap();

        assert_eq!(summary.accepted, 2);
        let snapshot = service.snapshot().unwrap();
        assert_eq!(snapshot.groups.len(), 1);
        assert_eq!(snapshot.groups[0].total_sent, u64::MAX);
        assert_eq!(snapshot.groups[0].total_clicks, 2);
    }

    #[tokio::test]
    async fn generation_without_external_generator_uses_templates() {
        let service = service();
        service
            .upload(SCENARIO_CSV.as_bytes(), &ColumnMapping::default())
            .unwrap();

        let outcome = service.generate(&request()).await.unwrap();
        assert_eq!(outcome.source, CandidateSource::Template);
        assert_eq!(outcome.candidates.len(), 3);
        assert_eq!(outcome.related.len(), 1);
        assert_eq!(outcome.related[0].message, "(ad) special benefit loan check it out");
    }
}
