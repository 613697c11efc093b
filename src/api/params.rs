//! Query-string parsing for the HTTP layer.
//!
//! Every parameter arrives as an optional string so that empty values
//! (`?module=`) mean "no filter" instead of a deserialization failure.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::chain::Severity;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{AuditFilter, LogFilter};
use crate::store::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQueryParams {
    pub module: Option<String>,
    pub action: Option<String>,
    pub user: Option<String>,
    pub severity: Option<String>,
    pub success: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub q: Option<String>,
    pub page: Option<String>,
    #[serde(alias = "per_page")]
    pub page_size: Option<String>,
}

impl LogQueryParams {
    pub fn filter(&self) -> LedgerResult<LogFilter> {
        Ok(LogFilter {
            module: non_empty(&self.module),
            action: non_empty(&self.action),
            user: non_empty(&self.user),
            severity: match non_empty(&self.severity) {
                Some(raw) => Some(raw.parse::<Severity>()?),
                None => None,
            },
            success: parse_flag("success", &self.success)?,
            from: parse_bound("from", &self.from, false)?,
            to: parse_bound("to", &self.to, true)?,
            text: non_empty(&self.q),
        })
    }

    pub fn page(&self) -> LedgerResult<(u32, u32)> {
        Ok((
            parse_number("page", &self.page)?.unwrap_or(1),
            parse_number("page_size", &self.page_size)?.unwrap_or(DEFAULT_PAGE_SIZE),
        ))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQueryParams {
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub actor: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub q: Option<String>,
    pub page: Option<String>,
    #[serde(alias = "page_size")]
    pub per_page: Option<String>,
}

impl AuditQueryParams {
    pub fn filter(&self) -> LedgerResult<AuditFilter> {
        Ok(AuditFilter {
            entry_type: non_empty(&self.entry_type),
            actor: non_empty(&self.actor),
            from: parse_bound("from", &self.from, false)?,
            to: parse_bound("to", &self.to, true)?,
            text: non_empty(&self.q),
        })
    }

    pub fn page(&self) -> LedgerResult<(u32, u32)> {
        Ok((
            parse_number("page", &self.page)?.unwrap_or(1),
            parse_number("per_page", &self.per_page)?.unwrap_or(DEFAULT_PAGE_SIZE),
        ))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindowParams {
    pub window: Option<String>,
}

impl WindowParams {
    pub fn window(&self) -> LedgerResult<Option<i64>> {
        parse_number("window", &self.window)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyParams {
    pub from_id: Option<String>,
    pub to_id: Option<String>,
}

impl VerifyParams {
    pub fn range(&self) -> LedgerResult<Option<(i64, Option<i64>)>> {
        let from_id = parse_number("from_id", &self.from_id)?;
        let to_id = parse_number("to_id", &self.to_id)?;
        Ok(from_id.map(|from| (from, to_id)))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &Option<String>) -> LedgerResult<Option<T>> {
    match non_empty(value) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| LedgerError::Validation(format!("{} must be a number, got '{}'", name, raw))),
        None => Ok(None),
    }
}

fn parse_flag(name: &str, value: &Option<String>) -> LedgerResult<Option<bool>> {
    match non_empty(value).as_deref() {
        None => Ok(None),
        Some("1") | Some("true") => Ok(Some(true)),
        Some("0") | Some("false") => Ok(Some(false)),
        Some(other) => Err(LedgerError::Validation(format!(
            "{} must be 0 or 1, got '{}'",
            name, other
        ))),
    }
}

/// A unix timestamp, or a `YYYY-MM-DD` date expanded to the start (or, for
/// upper bounds, the last second) of that day in UTC.
pub fn parse_bound(name: &str, value: &Option<String>, end_of_day: bool) -> LedgerResult<Option<i64>> {
    let raw = match non_empty(value) {
        Some(raw) => raw,
        None => return Ok(None),
    };
    if let Ok(ts) = raw.parse::<i64>() {
        return Ok(Some(ts));
    }

    let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
        LedgerError::Validation(format!(
            "{} must be a unix timestamp or YYYY-MM-DD, got '{}'",
            name, raw
        ))
    })?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    Ok(time.map(|t| t.and_utc().timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn test_parse_bound() {
        assert_eq!(parse_bound("from", &None, false).unwrap(), None);
        assert_eq!(parse_bound("from", &some("1700000000"), false).unwrap(), Some(1_700_000_000));
        assert_eq!(parse_bound("from", &some("2024-01-02"), false).unwrap(), Some(1_704_153_600));
        assert_eq!(parse_bound("to", &some("2024-01-02"), true).unwrap(), Some(1_704_239_999));
        assert!(parse_bound("to", &some("yesterday"), true).is_err());
    }

    #[test]
    fn test_log_filter_from_params() {
        let params = LogQueryParams {
            module: some("Auth"),
            user: some(""),
            severity: some("danger"),
            success: some("0"),
            q: some("acme"),
            ..Default::default()
        };
        let filter = params.filter().unwrap();
        assert_eq!(filter.module.as_deref(), Some("Auth"));
        assert_eq!(filter.user, None);
        assert_eq!(filter.severity, Some(Severity::Danger));
        assert_eq!(filter.success, Some(false));
        assert_eq!(filter.text.as_deref(), Some("acme"));

        let bad = LogQueryParams {
            success: some("maybe"),
            ..Default::default()
        };
        assert!(matches!(bad.filter(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_paging_defaults() {
        assert_eq!(LogQueryParams::default().page().unwrap(), (1, DEFAULT_PAGE_SIZE));
        let params = LogQueryParams {
            page: some("x"),
            ..Default::default()
        };
        assert!(params.page().is_err());
    }
}
