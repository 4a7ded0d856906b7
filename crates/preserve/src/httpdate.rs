//! HTTP-date parsing and formatting (RFC 7231 section 7.1.1.1)

use chrono::{DateTime, NaiveDateTime, Utc};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850_DATE: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_DATE: &str = "%a %b %e %H:%M:%S %Y";

/// Parse any of the three HTTP-date formats; IMF-fixdate is tried first
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    [IMF_FIXDATE, RFC850_DATE, ASCTIME_DATE]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Format as IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(IMF_FIXDATE).to_string()
}

/// Drop sub-second precision, matching what an HTTP-date can carry
pub fn truncate(ts: &DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(*ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap()
    }

    #[test]
    fn test_parse_imf_fixdate() {
        assert_eq!(parse("Sun, 06 Nov 1994 08:49:37 GMT"), Some(reference()));
    }

    #[test]
    fn test_parse_obsolete_formats() {
        assert_eq!(parse("Sunday, 06-Nov-94 08:49:37 GMT"), Some(reference()));
        assert_eq!(parse("Sun Nov  6 08:49:37 1994"), Some(reference()));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("yesterday"), None);
        assert_eq!(parse("1994-11-06T08:49:37Z"), None);
    }

    #[test]
    fn test_format() {
        assert_eq!(format(&reference()), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_truncate() {
        let ts = reference() + chrono::Duration::milliseconds(750);
        assert_eq!(truncate(&ts), reference());
    }
}
