use chrono::NaiveDate;

use crate::models::PerformanceRecord;

pub const SCENARIO_CSV: &str = "서비스명,클릭율,발송 문구,발송일,요일,발송회원수,클릭회원수
credit-loan,12.5,(ad) special benefit loan check it out,2025-01-01,Wed,1000,125
credit-loan,8.3,(ad) mortgage rate comparison,2025-01-02,Thu,1500,124
";

pub fn record(message: &str, service: &str, click_rate: f64) -> PerformanceRecord {
    PerformanceRecord {
        send_date: None,
        service: service.to_string(),
        channel: None,
        message_text: message.to_string(),
        sent_count: Some(1000),
        click_count: Some((click_rate * 10.0).round() as u64),
        click_rate,
    }
}

pub fn dated(
    message: &str,
    service: &str,
    click_rate: f64,
    (year, month, day): (i32, u32, u32),
) -> PerformanceRecord {
    PerformanceRecord {
        send_date: NaiveDate::from_ymd_opt(year, month, day),
        ..record(message, service, click_rate)
    }
}
