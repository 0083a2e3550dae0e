// =============================================================================
// Market-Hours Gate — single source of truth for "is the exchange open"
// =============================================================================
//
// NSE/BSE cash and derivatives sessions: Monday to Friday, 09:15:00 to
// 15:30:00 IST inclusive. All time math happens in Asia/Kolkata regardless of
// the host timezone.
//
// Exits (liquidations) bypass this gate; new entries do not.
// =============================================================================

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;

/// Session open, IST.
const OPEN_H: u32 = 9;
const OPEN_M: u32 = 15;
/// Session close, IST. 15:30:00 is the last tradeable second.
const CLOSE_H: u32 = 15;
const CLOSE_M: u32 = 30;

/// Current wall-clock time in IST.
pub fn now_ist() -> DateTime<Tz> {
    Utc::now().with_timezone(&Kolkata)
}

/// Convert a UTC instant into IST.
pub fn to_ist(ts: DateTime<Utc>) -> DateTime<Tz> {
    ts.with_timezone(&Kolkata)
}

/// The trading day (IST calendar date) an instant belongs to.
pub fn trading_day(ts: DateTime<Utc>) -> NaiveDate {
    to_ist(ts).date_naive()
}

/// Answer from the gate: whether entries may be opened right now, and why not
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub can_trade: bool,
    pub reason: String,
}

/// Market-hours gate. Stateless; every query recomputes from the clock so the
/// gate can never go stale.
#[derive(Debug, Clone, Default)]
pub struct MarketHours;

impl MarketHours {
    pub fn new() -> Self {
        Self
    }

    /// Whether new entries are allowed at `now`.
    pub fn can_trade_at(&self, now: DateTime<Utc>) -> GateDecision {
        let ist = to_ist(now);

        if matches!(ist.weekday(), Weekday::Sat | Weekday::Sun) {
            return GateDecision {
                can_trade: false,
                reason: format!("weekend ({})", ist.weekday()),
            };
        }

        let open = session_open(ist.date_naive());
        let close = session_close(ist.date_naive());

        if ist < open {
            return GateDecision {
                can_trade: false,
                reason: format!("pre-open, market opens {}", open.format("%H:%M IST")),
            };
        }
        if ist > close {
            return GateDecision {
                can_trade: false,
                reason: "market closed for the day".to_string(),
            };
        }

        GateDecision {
            can_trade: true,
            reason: "market open".to_string(),
        }
    }

    /// Gate against the live clock.
    pub fn can_trade(&self) -> GateDecision {
        self.can_trade_at(Utc::now())
    }

    /// Time remaining until today's close, or `None` when the session is not
    /// in progress (weekend, pre-open, or already closed).
    pub fn time_until_close_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.can_trade_at(now).can_trade {
            return None;
        }
        let ist = to_ist(now);
        let close = session_close(ist.date_naive());
        Some(close - ist)
    }

    pub fn time_until_close(&self) -> Option<Duration> {
        self.time_until_close_at(Utc::now())
    }

    /// True when the session is open and within `minutes` of the close. Used
    /// by the day-close liquidation window.
    pub fn within_minutes_of_close(&self, now: DateTime<Utc>, minutes: i64) -> bool {
        match self.time_until_close_at(now) {
            Some(left) => left <= Duration::minutes(minutes),
            None => false,
        }
    }

    /// True once the IST wall clock has crossed today's close boundary.
    pub fn after_close(&self, now: DateTime<Utc>) -> bool {
        let ist = to_ist(now);
        !matches!(ist.weekday(), Weekday::Sat | Weekday::Sun)
            && ist > session_close(ist.date_naive())
    }
}

fn session_open(day: NaiveDate) -> DateTime<Tz> {
    ist_at(day, OPEN_H, OPEN_M, 0)
}

fn session_close(day: NaiveDate) -> DateTime<Tz> {
    ist_at(day, CLOSE_H, CLOSE_M, 0)
}

fn ist_at(day: NaiveDate, h: u32, m: u32, s: u32) -> DateTime<Tz> {
    // IST has no DST; a naive local time on a valid date always maps to
    // exactly one instant.
    let t = NaiveTime::from_hms_opt(h, m, s).expect("valid wall-clock time");
    Kolkata
        .from_local_datetime(&day.and_time(t))
        .single()
        .expect("IST local time is unambiguous")
}

/// Build a UTC instant from IST wall-clock components. Test helper shared by
/// other modules' tests as well.
#[cfg(test)]
pub fn ist_instant(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    let day = NaiveDate::from_ymd_opt(y, mo, d).expect("valid date");
    ist_at(day, h, mi, s).with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-08-03 is a Monday.

    #[test]
    fn open_during_session() {
        let gate = MarketHours::new();
        let now = ist_instant(2026, 8, 3, 11, 0, 0);
        let d = gate.can_trade_at(now);
        assert!(d.can_trade, "reason: {}", d.reason);
    }

    #[test]
    fn closed_on_weekend() {
        let gate = MarketHours::new();
        // 2026-08-01 is a Saturday, 2026-08-02 a Sunday.
        assert!(!gate.can_trade_at(ist_instant(2026, 8, 1, 11, 0, 0)).can_trade);
        assert!(!gate.can_trade_at(ist_instant(2026, 8, 2, 11, 0, 0)).can_trade);
    }

    #[test]
    fn closed_before_open() {
        let gate = MarketHours::new();
        let d = gate.can_trade_at(ist_instant(2026, 8, 3, 9, 14, 59));
        assert!(!d.can_trade);
        assert!(d.reason.contains("pre-open"));
    }

    #[test]
    fn open_boundary_is_inclusive() {
        let gate = MarketHours::new();
        assert!(gate.can_trade_at(ist_instant(2026, 8, 3, 9, 15, 0)).can_trade);
    }

    #[test]
    fn close_boundary_exact() {
        let gate = MarketHours::new();
        // Exactly 15:30:00 is tradeable; one second later is not.
        assert!(gate.can_trade_at(ist_instant(2026, 8, 3, 15, 30, 0)).can_trade);
        assert!(!gate.can_trade_at(ist_instant(2026, 8, 3, 15, 30, 1)).can_trade);
    }

    #[test]
    fn time_until_close_counts_down() {
        let gate = MarketHours::new();
        let left = gate
            .time_until_close_at(ist_instant(2026, 8, 3, 15, 0, 0))
            .unwrap();
        assert_eq!(left, Duration::minutes(30));
        assert!(gate
            .time_until_close_at(ist_instant(2026, 8, 3, 16, 0, 0))
            .is_none());
    }

    #[test]
    fn day_close_window() {
        let gate = MarketHours::new();
        assert!(gate.within_minutes_of_close(ist_instant(2026, 8, 3, 15, 26, 0), 5));
        assert!(!gate.within_minutes_of_close(ist_instant(2026, 8, 3, 15, 20, 0), 5));
        // Not in-window once the session has ended.
        assert!(!gate.within_minutes_of_close(ist_instant(2026, 8, 3, 15, 31, 0), 5));
    }

    #[test]
    fn after_close_flag() {
        let gate = MarketHours::new();
        assert!(gate.after_close(ist_instant(2026, 8, 3, 15, 30, 1)));
        assert!(!gate.after_close(ist_instant(2026, 8, 3, 15, 29, 59)));
        // Weekends never report after_close; the archive trigger keys off
        // trading days only.
        assert!(!gate.after_close(ist_instant(2026, 8, 1, 18, 0, 0)));
    }

    #[test]
    fn trading_day_uses_ist_date() {
        // 20:00 UTC is 01:30 IST the next day.
        let ts = Utc.with_ymd_and_hms(2026, 8, 3, 20, 0, 0).unwrap();
        assert_eq!(trading_day(ts), NaiveDate::from_ymd_opt(2026, 8, 4).unwrap());
    }
}
