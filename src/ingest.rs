use std::collections::BTreeMap;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use encoding_rs::EUC_KR;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AnalysisError, RowRejection};
use crate::models::PerformanceRecord;

/// Supplied and computed rates further apart than this are counted as mismatches.
const RATE_MISMATCH_TOLERANCE: f64 = 0.5;
const DEFAULT_SERVICE: &str = "기타";
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%Y%m%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SendDate,
    Service,
    ClickRate,
    SentCount,
    ClickCount,
    Channel,
    Message,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::SendDate,
        Field::Service,
        Field::ClickRate,
        Field::SentCount,
        Field::ClickCount,
        Field::Channel,
        Field::Message,
    ];

    /// Header aliases in normalized form (see [`normalize_header`]).
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::SendDate => &["발송일", "발송날짜", "날짜", "date", "send_date", "senddate"],
            Field::Service => &["서비스명", "서비스", "상품명", "service", "service_name", "servicename"],
            Field::ClickRate => &["클릭율", "클릭률", "ctr", "click_rate", "clickrate"],
            Field::SentCount => &["발송회원수", "발송수", "send_count", "sent_count", "sendcount"],
            Field::ClickCount => &["클릭회원수", "클릭수", "click_count", "clickcount"],
            Field::Channel => &["발송채널", "채널", "channel"],
            Field::Message => &["발송문구", "문구", "내용", "알림내용", "message", "content", "message_text"],
        }
    }

    pub fn parse(name: &str) -> Option<Field> {
        match normalize_header(name).as_str() {
            "send_date" | "date" => Some(Field::SendDate),
            "service" => Some(Field::Service),
            "click_rate" | "rate" => Some(Field::ClickRate),
            "sent_count" | "sent" => Some(Field::SentCount),
            "click_count" | "clicks" => Some(Field::ClickCount),
            "channel" => Some(Field::Channel),
            "message" | "message_text" => Some(Field::Message),
            _ => None,
        }
    }
}

/// Explicit header names that override alias detection.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    overrides: BTreeMap<Field, String>,
}

impl ColumnMapping {
    pub fn with(mut self, field: Field, header: impl Into<String>) -> Self {
        self.overrides.insert(field, header.into());
        self
    }

    /// Parses `field=header` pairs, e.g. `message=알림 문구`.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, AnalysisError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mapping = ColumnMapping::default();
        for pair in pairs {
            let pair = pair.as_ref();
            let (field, header) = pair.split_once('=').ok_or_else(|| {
                AnalysisError::MalformedInput(format!("column mapping {pair:?} is not field=header"))
            })?;
            let field = Field::parse(field).ok_or_else(|| {
                AnalysisError::MalformedInput(format!("unknown field {field:?} in column mapping"))
            })?;
            mapping = mapping.with(field, header.trim());
        }
        Ok(mapping)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    /// 1-based line in the input, header included.
    pub line: u64,
    pub reason: RowRejection,
}

/// Output of one normalization pass.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub records: Vec<PerformanceRecord>,
    pub rejected: Vec<RejectedRow>,
    pub total_rows: usize,
    pub rate_mismatches: usize,
    pub resolved: BTreeMap<Field, String>,
}

/// Header cell positions, resolved once per upload.
#[derive(Debug)]
struct ColumnIndex {
    send_date: Option<usize>,
    service: Option<usize>,
    click_rate: Option<usize>,
    sent_count: Option<usize>,
    click_count: Option<usize>,
    channel: Option<usize>,
    message: usize,
}

pub fn parse_csv(
    raw: &[u8],
    mapping: &ColumnMapping,
    max_bytes: usize,
) -> Result<ParsedTable, AnalysisError> {
    if raw.len() > max_bytes {
        return Err(AnalysisError::InputTooLarge {
            size: raw.len(),
            limit: max_bytes,
        });
    }

    let text = decode(raw);
    let delimiter = sniff_delimiter(&text);
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AnalysisError::MalformedInput(format!("unreadable header row: {e}")))?
        .clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AnalysisError::MalformedInput("input has no header row".to_string()));
    }

    let (index, resolved) = resolve_columns(&headers, mapping)?;
    debug!(?resolved, delimiter = %(delimiter as char), "resolved CSV columns");

    let mut table = ParsedTable {
        records: Vec::new(),
        rejected: Vec::new(),
        total_rows: 0,
        rate_mismatches: 0,
        resolved,
    };

    for (offset, result) in reader.records().enumerate() {
        let fallback_line = offset as u64 + 2;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                table.total_rows += 1;
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                table.rejected.push(RejectedRow {
                    line,
                    reason: RowRejection::Unreadable(e.to_string()),
                });
                continue;
            }
        };
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        table.total_rows += 1;
        let line = row.position().map(|p| p.line()).unwrap_or(fallback_line);
        match parse_row(&row, &index) {
            Ok((record, mismatch)) => {
                if mismatch {
                    debug!(line, rate = record.click_rate, "supplied click rate disagrees with counts");
                    table.rate_mismatches += 1;
                }
                table.records.push(record);
            }
            Err(reason) => table.rejected.push(RejectedRow { line, reason }),
        }
    }

    Ok(table)
}

fn resolve_columns(
    headers: &StringRecord,
    mapping: &ColumnMapping,
) -> Result<(ColumnIndex, BTreeMap<Field, String>), AnalysisError> {
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
    let mut positions: BTreeMap<Field, usize> = BTreeMap::new();

    for field in Field::ALL {
        let position = match mapping.overrides.get(&field) {
            Some(header) => {
                let wanted = normalize_header(header);
                let found = normalized.iter().position(|h| *h == wanted);
                if found.is_none() {
                    warn!(?field, header = %header, "mapped column not present in header row");
                }
                found
            }
            None => normalized
                .iter()
                .position(|h| field.aliases().contains(&h.as_str())),
        };
        if let Some(position) = position {
            positions.insert(field, position);
        }
    }

    let message = *positions.get(&Field::Message).ok_or_else(|| {
        AnalysisError::MalformedInput(format!(
            "no message text column among headers [{}]",
            headers.iter().collect::<Vec<_>>().join(", ")
        ))
    })?;

    let resolved = positions
        .iter()
        .map(|(field, &position)| (*field, headers.get(position).unwrap_or_default().to_string()))
        .collect();

    let index = ColumnIndex {
        send_date: positions.get(&Field::SendDate).copied(),
        service: positions.get(&Field::Service).copied(),
        click_rate: positions.get(&Field::ClickRate).copied(),
        sent_count: positions.get(&Field::SentCount).copied(),
        click_count: positions.get(&Field::ClickCount).copied(),
        channel: positions.get(&Field::Channel).copied(),
        message,
    };
    Ok((index, resolved))
}

fn cell(row: &StringRecord, position: Option<usize>) -> Option<&str> {
    position
        .and_then(|p| row.get(p))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Returns the record and whether its supplied rate disagreed with its counts.
fn parse_row(
    row: &StringRecord,
    index: &ColumnIndex,
) -> Result<(PerformanceRecord, bool), RowRejection> {
    let message_text =
        normalize_message(cell(row, Some(index.message)).ok_or(RowRejection::MissingMessage)?);
    if message_text.is_empty() {
        return Err(RowRejection::MissingMessage);
    }

    let sent_count = cell(row, index.sent_count).map(parse_count).transpose()?;
    let click_count = cell(row, index.click_count).map(parse_count).transpose()?;
    if let (Some(sent), Some(clicks)) = (sent_count, click_count) {
        if clicks > sent {
            return Err(RowRejection::ClicksExceedSent);
        }
    }

    let computed = match (sent_count, click_count) {
        (Some(sent), Some(clicks)) if sent > 0 => Some(clicks as f64 / sent as f64 * 100.0),
        _ => None,
    };

    let (click_rate, mismatch) = match cell(row, index.click_rate) {
        Some(raw) => {
            let rate = parse_rate(raw)?;
            let mismatch = computed
                .map(|c| (c - rate).abs() > RATE_MISMATCH_TOLERANCE)
                .unwrap_or(false);
            (rate, mismatch)
        }
        None => (computed.ok_or(RowRejection::MissingClickRate)?, false),
    };
    if !(0.0..=100.0).contains(&click_rate) {
        return Err(RowRejection::RateOutOfRange(click_rate.to_string()));
    }

    let send_date = cell(row, index.send_date).map(parse_date).transpose()?;

    let record = PerformanceRecord {
        send_date,
        service: cell(row, index.service)
            .unwrap_or(DEFAULT_SERVICE)
            .to_string(),
        channel: cell(row, index.channel).map(str::to_string),
        message_text,
        sent_count,
        click_count,
        click_rate,
    };
    Ok((record, mismatch))
}

fn parse_count(raw: &str) -> Result<u64, RowRejection> {
    let cleaned = raw.replace(',', "");
    if let Ok(value) = cleaned.parse::<u64>() {
        return Ok(value);
    }
    // Spreadsheet exports sometimes write counts as "1000.0".
    match cleaned.parse::<f64>() {
        Ok(value) if (0.0..u64::MAX as f64).contains(&value) && value.fract() == 0.0 => {
            Ok(value as u64)
        }
        _ => Err(RowRejection::NonNumericCount(raw.to_string())),
    }
}

fn parse_rate(raw: &str) -> Result<f64, RowRejection> {
    let cleaned = raw.trim_end_matches('%').replace(',', "");
    match cleaned.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(RowRejection::NonNumericRate(raw.to_string())),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, RowRejection> {
    // Timestamps such as "2025-01-01 09:30:00" keep only the date part.
    let date_part = raw.split_whitespace().next().unwrap_or(raw);
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
        .ok_or_else(|| RowRejection::InvalidDate(raw.to_string()))
}

/// Trimmed, whitespace-collapsed message text; the grouping key.
pub fn normalize_message(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased, whitespace-free header with any parenthesized suffix removed,
/// so "발송채널 (noti : 네이버앱)" becomes "발송채널".
pub fn normalize_header(header: &str) -> String {
    let header = header.trim_start_matches('\u{feff}');
    let header = header.split('(').next().unwrap_or(header);
    header
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn decode(raw: &[u8]) -> String {
    if let Some(rest) = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = raw.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = raw.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    let invalid_at = match std::str::from_utf8(raw) {
        Ok(text) => return text.to_string(),
        Err(e) => e.valid_up_to(),
    };
    // Korean spreadsheet exports are usually CP949, which EUC_KR covers.
    if let Some(text) = EUC_KR.decode_without_bom_handling_and_without_replacement(raw) {
        debug!(invalid_at, "input is not UTF-8, decoded as EUC-KR");
        return text.into_owned();
    }
    warn!(invalid_at, "input is neither UTF-8 nor EUC-KR, decoding lossily");
    String::from_utf8_lossy(raw).into_owned()
}

fn decode_utf16(bytes: &[u8], combine: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| combine([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    [b',', b'\t', b';']
        .into_iter()
        .max_by_key(|&d| (header.matches(d as char).count(), d == b','))
        .unwrap_or(b',')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SCENARIO_CSV;

    const LIMIT: usize = 1024 * 1024;

    fn parse(text: &str) -> ParsedTable {
        parse_csv(text.as_bytes(), &ColumnMapping::default(), LIMIT).unwrap()
    }

    #[test]
    fn parses_scenario_rows() {
        let table = parse(SCENARIO_CSV);
        assert_eq!(table.total_rows, 2);
        assert_eq!(table.records.len(), 2);
        assert!(table.rejected.is_empty());

        let first = &table.records[0];
        assert_eq!(first.service, "credit-loan");
        assert_eq!(first.click_rate, 12.5);
        assert_eq!(first.sent_count, Some(1000));
        assert_eq!(first.click_count, Some(125));
        assert_eq!(first.send_date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[test]
    fn accepted_and_rejected_sum_to_total() {
        let csv = "발송일,서비스명,클릭율,발송회원수,클릭회원수,발송 문구\n\
                   2025-01-01,신용대출,10.0,1000,100,(광고) 혜택 확인\n\
                   2025-01-02,신용대출,abc,1000,100,(광고) 금리 비교\n\
                   2025-01-03,신용대출,5.0,1000,100,\n\
                   2025-01-04,신용대출,,100,200,(광고) 한도 확인\n\
                   2025-01-05,신용대출,150,1000,100,(광고) 최대 한도\n\
                   2025/01/06,신용대출,,1000,80,(광고) 대출 갈아타기\n\
                   not-a-date,신용대출,4.0,1000,40,(광고) 특가\n";
        let table = parse(csv);

        assert_eq!(table.total_rows, 7);
        assert_eq!(table.records.len() + table.rejected.len(), table.total_rows);
        assert_eq!(table.records.len(), 2);

        let reasons: Vec<&str> = table.rejected.iter().map(|r| r.reason.kind()).collect();
        assert_eq!(
            reasons,
            vec![
                "non_numeric_rate",
                "missing_message",
                "clicks_exceed_sent",
                "rate_out_of_range",
                "invalid_date"
            ]
        );
        assert_eq!(table.rejected[0].line, 3);
        assert!((table.records[1].click_rate - 8.0).abs() < 1e-9);
        assert_eq!(table.records[1].send_date, NaiveDate::from_ymd_opt(2025, 1, 6));
    }

    #[test]
    fn missing_message_column_is_fatal() {
        let err = parse_csv(
            "발송일,클릭율\n2025-01-01,3.0\n".as_bytes(),
            &ColumnMapping::default(),
            LIMIT,
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput(_)));
    }

    #[test]
    fn oversized_input_is_rejected_before_parsing() {
        let err = parse_csv(SCENARIO_CSV.as_bytes(), &ColumnMapping::default(), 10).unwrap_err();
        assert!(matches!(err, AnalysisError::InputTooLarge { limit: 10, .. }));
    }

    #[test]
    fn rate_is_optional_when_counts_exist_and_counts_when_rate_exists() {
        let table = parse("message,sent_count,click_count\n(광고) 혜택,200,30\n");
        assert_eq!(table.records[0].click_rate, 15.0);
        assert_eq!(table.records[0].service, "기타");

        let table = parse("문구,CTR\n(광고) 혜택,7.5%\n(광고) 금리,\n");
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].sent_count, None);
        assert_eq!(table.records[0].click_rate, 7.5);
        assert_eq!(table.rejected[0].reason, RowRejection::MissingClickRate);
    }

    #[test]
    fn tolerates_reordered_extra_and_suffixed_headers() {
        let csv = "\u{feff}요일,발송 문구,\"발송채널 (noti : 네이버앱, npay: 페이앱)\",클릭율,비고\n\
                   수,\"(광고)  혜택   확인 \",noti,9.5,메모\n";
        let table = parse(csv);
        assert_eq!(table.records.len(), 1);
        let record = &table.records[0];
        assert_eq!(record.message_text, "(광고) 혜택 확인");
        assert_eq!(record.channel.as_deref(), Some("noti"));
        assert_eq!(record.send_date, None);
        assert_eq!(
            table.resolved.get(&Field::Channel).map(String::as_str),
            Some("발송채널 (noti : 네이버앱, npay: 페이앱)")
        );
    }

    #[test]
    fn explicit_mapping_overrides_aliases() {
        let mapping = ColumnMapping::from_pairs(["message=headline", "rate=score"]).unwrap();
        let csv = "headline;score;문구\n(광고) 최대 혜택;11.5;ignored\n";
        let table = parse_csv(csv.as_bytes(), &mapping, LIMIT).unwrap();
        assert_eq!(table.records[0].message_text, "(광고) 최대 혜택");
        assert_eq!(table.records[0].click_rate, 11.5);
    }

    #[test]
    fn bad_mapping_pairs_are_malformed() {
        assert!(ColumnMapping::from_pairs(["message"]).is_err());
        assert!(ColumnMapping::from_pairs(["colour=x"]).is_err());
    }

    #[test]
    fn counts_rate_mismatches() {
        let table = parse(
            "문구,클릭율,발송회원수,클릭회원수\n(광고) 혜택,20.0,1000,100\n(광고) 금리,10.2,1000,100\n",
        );
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.rate_mismatches, 1);
        assert_eq!(table.records[0].click_rate, 20.0);
    }

    #[test]
    fn decodes_cp949_exports() {
        let (raw, _, unmappable) = EUC_KR.encode("발송 문구,클릭율\n(광고) 혜택,3\n");
        assert!(!unmappable);
        assert!(std::str::from_utf8(&raw).is_err());

        let table = parse_csv(&raw, &ColumnMapping::default(), LIMIT).unwrap();
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].message_text, "(광고) 혜택");
        assert_eq!(table.resolved.get(&Field::Message).map(String::as_str), Some("발송 문구"));
    }

    #[test]
    fn undecodable_bytes_fall_back_to_lossy_text() {
        let mut raw = b"message,rate\n(ad) benefit ".to_vec();
        raw.extend_from_slice(&[0xFF, 0xFF]);
        raw.extend_from_slice(b",3\n");
        let table = parse_csv(&raw, &ColumnMapping::default(), LIMIT).unwrap();
        assert_eq!(table.records.len(), 1);
        assert!(table.records[0].message_text.starts_with("(ad) benefit"));
    }

    #[test]
    fn counts_beyond_u64_are_rejected() {
        let table = parse(
            "문구,클릭율,발송회원수,클릭회원수\n\
             (광고) 혜택,5.0,1e20,1\n\
             (광고) 혜택,5.0,18446744073709551616.0,1\n\
             (광고) 혜택,5.0,18446744073709551615,1\n",
        );
        assert_eq!(table.rejected.len(), 2);
        assert!(table
            .rejected
            .iter()
            .all(|r| matches!(r.reason, RowRejection::NonNumericCount(_))));
        assert_eq!(table.records[0].sent_count, Some(u64::MAX));
    }

    #[test]
    fn decodes_utf16_with_bom() {
        let mut raw = vec![0xFF, 0xFE];
        for unit in "문구,클릭율\n(광고) 혜택,3\n".encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        let table = parse_csv(&raw, &ColumnMapping::default(), LIMIT).unwrap();
        assert_eq!(table.records[0].message_text, "(광고) 혜택");
    }
}
