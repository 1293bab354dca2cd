use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use log::warn;

/// An MS-DOS timestamp as stored in local and central file headers.
///
/// The packed form is `date << 16 | time` with seconds halved, so the
/// resolution is two seconds and the epoch is 1980-01-01. Two values
/// compare equal iff their packed forms are identical.
#[derive(Debug, Clone, Copy)]
pub struct DosDateTime {
    date: u16,
    time: u16,
}

impl DosDateTime {
    pub fn from_parts(date: u16, time: u16) -> DosDateTime {
        DosDateTime { date, time }
    }

    pub fn from_packed(packed: u32) -> DosDateTime {
        DosDateTime {
            date: (packed >> 16) as u16,
            time: packed as u16,
        }
    }

    pub fn date(&self) -> u16 {
        self.date
    }

    pub fn time(&self) -> u16 {
        self.time
    }

    pub fn packed(&self) -> u32 {
        (self.date as u32) << 16 | self.time as u32
    }

    /// Current local time, truncated to the two-second resolution.
    pub fn now() -> DosDateTime {
        DosDateTime::from_chrono(&Local::now().naive_local())
    }

    /// Local time for `seconds` since the Unix epoch.
    pub fn at(seconds: i64) -> DosDateTime {
        let naive = match Local.timestamp_opt(seconds, 0) {
            chrono::LocalResult::Single(dt) => dt.naive_local(),
            chrono::LocalResult::Ambiguous(dt, _) => dt.naive_local(),
            chrono::LocalResult::None => return DosDateTime::default(),
        };
        DosDateTime::from_chrono(&naive)
    }

    pub fn from_system_time(time: SystemTime) -> DosDateTime {
        match time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => DosDateTime::at(elapsed.as_secs() as i64),
            Err(before) => DosDateTime::at(-(before.duration().as_secs() as i64)),
        }
    }

    /// Packs a calendar time. Dates before 1980 collapse to the DOS epoch.
    pub fn from_chrono(datetime: &NaiveDateTime) -> DosDateTime {
        if datetime.year() < 1980 {
            return DosDateTime::default();
        }

        // The seven year bits run out at 2107.
        let year = (datetime.year() as u16).saturating_sub(1980).min(0x7F);
        let date = datetime.day() as u16 | (datetime.month() as u16) << 5 | year << 9;
        let time = (datetime.second() as u16) / 2
            | (datetime.minute() as u16) << 5
            | (datetime.hour() as u16) << 11;

        DosDateTime { date, time }
    }

    /// Unpacks to a calendar time, clamping out-of-range fields.
    pub fn to_chrono(&self) -> NaiveDateTime {
        let seconds = ((self.time & 0b0000000000011111) << 1).min(59);
        let minutes = ((self.time & 0b0000011111100000) >> 5).min(59);
        let hours = ((self.time & 0b1111100000000000) >> 11).min(23);
        let day = (self.date & 0b0000000000011111).max(1);
        let month = (((self.date & 0b0000000111100000) >> 5).max(1)).min(12);
        let year = 1980 + ((self.date & 0b1111111000000000) >> 9);

        let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .or_else(|| {
                warn!(
                    "clamping out-of-range DOS date {:04}-{:02}-{:02}",
                    year, month, day
                );
                NaiveDate::from_ymd_opt(year as i32, month as u32, 1)
            })
            .unwrap_or_default();

        date.and_hms_opt(hours as u32, minutes as u32, seconds as u32)
            .unwrap_or_default()
    }

    /// Seconds since the Unix epoch for the decoded local time.
    pub fn to_unix(&self) -> i64 {
        let naive = self.to_chrono();
        match naive.and_local_timezone(Local) {
            chrono::LocalResult::Single(dt) => dt.timestamp(),
            chrono::LocalResult::Ambiguous(dt, _) => dt.timestamp(),
            chrono::LocalResult::None => 0,
        }
    }
}

impl Default for DosDateTime {
    /// The DOS epoch, 1980-01-01 00:00:00.
    fn default() -> Self {
        DosDateTime {
            date: 1 << 5 | 1,
            time: 0,
        }
    }
}

impl PartialEq for DosDateTime {
    fn eq(&self, other: &Self) -> bool {
        self.packed() == other.packed()
    }
}

impl Eq for DosDateTime {}

impl std::hash::Hash for DosDateTime {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.packed().hash(state);
    }
}

impl std::fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_chrono())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_epoch_packing() {
        let epoch = DosDateTime::default();
        assert_eq!(epoch.date(), 33);
        assert_eq!(epoch.time(), 0);
        assert_eq!(epoch.to_chrono().to_string(), "1980-01-01 00:00:00");
    }

    #[test]
    fn test_known_date_round_trip() {
        let naive = NaiveDate::from_ymd_opt(2018, 7, 16)
            .unwrap()
            .and_hms_opt(20, 15, 42)
            .unwrap();
        let dos = DosDateTime::from_chrono(&naive);
        let back = dos.to_chrono();
        assert_eq!(back.year(), 2018);
        assert_eq!(back.month(), 7);
        assert_eq!(back.day(), 16);
        assert_eq!(back.hour(), 20);
        assert_eq!(back.minute(), 15);
        assert_eq!(back.second(), 42);
    }

    #[test]
    fn test_two_second_truncation() {
        let odd = NaiveDate::from_ymd_opt(2001, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 43)
            .unwrap();
        let dos = DosDateTime::from_chrono(&odd);
        assert_eq!(dos.to_chrono().second(), 42);
    }

    #[test]
    fn test_equality_by_packed_form() {
        let a = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 58)
            .unwrap();
        let b = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(DosDateTime::from_chrono(&a), DosDateTime::from_chrono(&b));
    }

    #[test]
    fn test_pre_epoch_collapses() {
        let old = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(DosDateTime::from_chrono(&old), DosDateTime::default());
    }

    #[test]
    fn test_at_matches_two_second_resolution() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let truncated = now - (now % 2);
        assert_eq!(DosDateTime::at(now), DosDateTime::at(truncated));
    }

    #[test]
    fn test_clamps_bogus_fields() {
        // Month 0 and day 0 are illegal on disk but tolerated on read.
        let dos = DosDateTime::from_parts(0, 0);
        let decoded = dos.to_chrono();
        assert_eq!(decoded.year(), 1980);
        assert_eq!(decoded.month(), 1);
        assert_eq!(decoded.day(), 1);
    }

    #[test]
    fn test_packed_round_trip() {
        let dos = DosDateTime::from_parts(0x4CEF, 0xA1F5);
        assert_eq!(DosDateTime::from_packed(dos.packed()), dos);
    }
}
