// =============================================================================
// Instrument model — F&O symbol parsing, expiry conventions, lot sizes
// =============================================================================
//
// NFO/BFO trading symbols encode the contract inline:
//
//   monthly future:  NIFTY24AUGFUT
//   monthly option:  BANKNIFTY24AUG48500PE      (YY + MMM + strike + CE/PE)
//   weekly option:   NIFTY2480722500CE          (YY + M + DD + strike + CE/PE,
//                                                M in 1-9 / O / N / D)
//
// Parsing fails loud: an unparseable F&O symbol is a `SymbolError`, never a
// silent skip. Expiry-day conventions are per underlying (NIFTY Thursday,
// FINNIFTY Tuesday, BANKNIFTY Wednesday); a monthly code resolves to the last
// such weekday of the month.
// =============================================================================

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::types::ProductType;

/// Option right or future leg of an F&O symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Right {
    Call,
    Put,
    Future,
}

impl std::fmt::Display for Right {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
            Self::Future => write!(f, "FUT"),
        }
    }
}

/// Parsed F&O trading symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnoSymbol {
    pub underlying: String,
    pub expiry: NaiveDate,
    /// `None` for futures.
    pub strike: Option<f64>,
    pub right: Right,
}

impl FnoSymbol {
    pub fn product_type(&self) -> ProductType {
        let index = is_index(&self.underlying);
        match (self.right, index) {
            (Right::Future, true) => ProductType::IndexFuture,
            (Right::Future, false) => ProductType::StockFuture,
            (_, true) => ProductType::IndexOption,
            (_, false) => ProductType::StockOption,
        }
    }
}

/// Why a symbol failed to parse. These are surfaced, not swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("symbol '{0}' has no underlying prefix")]
    MissingUnderlying(String),
    #[error("symbol '{0}' has an unparseable expiry encoding")]
    BadExpiry(String),
    #[error("symbol '{0}' has an unparseable strike")]
    BadStrike(String),
    #[error("symbol '{0}' does not look like an F&O contract")]
    NotFno(String),
    #[error("symbol '{0}' contains invalid characters")]
    BadCharset(String),
}

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Index underlyings traded on NSE/BSE derivatives segments.
const INDEX_UNDERLYINGS: [&str; 6] = [
    "NIFTY", "BANKNIFTY", "FINNIFTY", "MIDCPNIFTY", "SENSEX", "BANKEX",
];

pub fn is_index(underlying: &str) -> bool {
    INDEX_UNDERLYINGS.contains(&underlying)
}

/// Quick structural check mirroring the suffix pattern `(\d+(CE|PE)|FUT)$`.
/// Used for routing only; real parsing goes through [`parse_fno_symbol`].
pub fn looks_like_fno(symbol: &str) -> bool {
    if symbol.ends_with("FUT") {
        return true;
    }
    if let Some(body) = symbol
        .strip_suffix("CE")
        .or_else(|| symbol.strip_suffix("PE"))
    {
        return body.chars().last().is_some_and(|c| c.is_ascii_digit());
    }
    false
}

/// Exchange segment for a symbol: BSE-family indices route to BFO, all other
/// derivatives to NFO, and plain equities to NSE.
pub fn exchange_for(symbol: &str) -> &'static str {
    if looks_like_fno(symbol) {
        if symbol.starts_with("SENSEX") || symbol.starts_with("BANKEX") {
            "BFO"
        } else {
            "NFO"
        }
    } else {
        "NSE"
    }
}

/// Weekly expiry weekday for an underlying. Monthly contracts expire on the
/// last such weekday of their month.
pub fn expiry_weekday(underlying: &str) -> Weekday {
    match underlying {
        "FINNIFTY" => Weekday::Tue,
        "BANKNIFTY" => Weekday::Wed,
        "SENSEX" => Weekday::Fri,
        "BANKEX" => Weekday::Mon,
        // NIFTY, MIDCPNIFTY, and stock derivatives expire Thursday.
        _ => Weekday::Thu,
    }
}

/// Contract lot size per underlying. Stock derivatives fall back to the
/// instrument dump; this table covers the index universe.
pub fn lot_size(underlying: &str) -> i64 {
    match underlying {
        "NIFTY" => 75,
        "BANKNIFTY" => 35,
        "FINNIFTY" => 65,
        "MIDCPNIFTY" => 120,
        "SENSEX" => 20,
        "BANKEX" => 30,
        _ => 1,
    }
}

/// Index family used by the correlation guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFamily {
    Broad,
    Banking,
    Financial,
    Midcap,
    Other,
}

pub fn index_family(underlying: &str) -> IndexFamily {
    match underlying {
        "NIFTY" | "SENSEX" => IndexFamily::Broad,
        "BANKNIFTY" | "BANKEX" => IndexFamily::Banking,
        "FINNIFTY" => IndexFamily::Financial,
        "MIDCPNIFTY" => IndexFamily::Midcap,
        _ => IndexFamily::Other,
    }
}

/// High-correlation pairs that may never be held together (~95% correlated).
pub fn highly_correlated(a: &str, b: &str) -> bool {
    matches!(
        (a, b),
        ("NIFTY", "SENSEX")
            | ("SENSEX", "NIFTY")
            | ("BANKNIFTY", "BANKEX")
            | ("BANKEX", "BANKNIFTY")
    )
}

/// Medium-correlation group: broad, banking, and financial indices all carry
/// heavy overlapping constituents.
pub fn medium_correlated(a: &str, b: &str) -> bool {
    if a == b || highly_correlated(a, b) {
        return false;
    }
    let fam = |u: &str| index_family(u);
    matches!(
        (fam(a), fam(b)),
        (
            IndexFamily::Broad | IndexFamily::Banking | IndexFamily::Financial,
            IndexFamily::Broad | IndexFamily::Banking | IndexFamily::Financial,
        )
    )
}

/// Underlying of any symbol: the leading run of `A-Z` and `&`.
pub fn underlying_of(symbol: &str) -> Option<&str> {
    let end = symbol
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_uppercase() || *c == '&'))
        .map(|(i, _)| i)
        .unwrap_or(symbol.len());
    (end > 0).then(|| &symbol[..end])
}

/// Validate a plain equity symbol: non-empty, `A-Z` and `&` only.
pub fn validate_equity(symbol: &str) -> Result<(), SymbolError> {
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_uppercase() || c == '&') {
        return Err(SymbolError::BadCharset(symbol.to_string()));
    }
    Ok(())
}

/// Parse an F&O trading symbol. Fails loud on anything it cannot decode.
pub fn parse_fno_symbol(symbol: &str) -> Result<FnoSymbol, SymbolError> {
    if !looks_like_fno(symbol) {
        return Err(SymbolError::NotFno(symbol.to_string()));
    }

    let (body, right) = if let Some(b) = symbol.strip_suffix("FUT") {
        (b, Right::Future)
    } else if let Some(b) = symbol.strip_suffix("CE") {
        (b, Right::Call)
    } else if let Some(b) = symbol.strip_suffix("PE") {
        (b, Right::Put)
    } else {
        return Err(SymbolError::NotFno(symbol.to_string()));
    };

    let underlying = underlying_of(body)
        .ok_or_else(|| SymbolError::MissingUnderlying(symbol.to_string()))?
        .to_string();
    let rest = &body[underlying.len()..];

    if !rest.is_ascii() || rest.len() < 5 {
        return Err(SymbolError::BadExpiry(symbol.to_string()));
    }

    let year: i32 = rest[..2]
        .parse::<i32>()
        .map(|y| 2000 + y)
        .map_err(|_| SymbolError::BadExpiry(symbol.to_string()))?;

    let monthly_code = &rest[2..5];
    let (expiry, strike_str) = if let Some(m) = month_from_name(monthly_code) {
        // Monthly encoding: expiry is the last expiry-weekday of the month.
        let date = last_weekday_of_month(year, m, expiry_weekday(&underlying))
            .ok_or_else(|| SymbolError::BadExpiry(symbol.to_string()))?;
        (date, &rest[5..])
    } else {
        // Weekly encoding: M + DD after the year digits.
        if right == Right::Future {
            // Index futures only list monthly contracts.
            return Err(SymbolError::BadExpiry(symbol.to_string()));
        }
        let month = month_from_code(rest.as_bytes()[2] as char)
            .ok_or_else(|| SymbolError::BadExpiry(symbol.to_string()))?;
        let day: u32 = rest[3..5]
            .parse()
            .map_err(|_| SymbolError::BadExpiry(symbol.to_string()))?;
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| SymbolError::BadExpiry(symbol.to_string()))?;
        (date, &rest[5..])
    };

    let strike = match right {
        Right::Future => {
            if !strike_str.is_empty() {
                return Err(SymbolError::BadStrike(symbol.to_string()));
            }
            None
        }
        Right::Call | Right::Put => {
            if strike_str.is_empty() {
                return Err(SymbolError::BadStrike(symbol.to_string()));
            }
            let v: f64 = strike_str
                .parse()
                .map_err(|_| SymbolError::BadStrike(symbol.to_string()))?;
            if v <= 0.0 {
                return Err(SymbolError::BadStrike(symbol.to_string()));
            }
            Some(v)
        }
    };

    Ok(FnoSymbol {
        underlying,
        expiry,
        strike,
        right,
    })
}

/// Compose a trading symbol from contract parts (monthly encoding).
pub fn format_monthly_symbol(
    underlying: &str,
    expiry: NaiveDate,
    strike: Option<f64>,
    right: Right,
) -> String {
    let yy = expiry.year() % 100;
    let mon = MONTH_NAMES[expiry.month0() as usize];
    match right {
        Right::Future => format!("{underlying}{yy:02}{mon}FUT"),
        Right::Call | Right::Put => {
            let strike = strike.unwrap_or(0.0);
            format!("{underlying}{yy:02}{mon}{strike:.0}{right}")
        }
    }
}

/// Next weekly expiry for `underlying` strictly on-or-after `from`.
pub fn next_weekly_expiry(underlying: &str, from: NaiveDate) -> NaiveDate {
    let target = expiry_weekday(underlying);
    let mut d = from;
    while d.weekday() != target {
        d += Duration::days(1);
    }
    d
}

fn month_from_name(name: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .position(|m| *m == name)
        .map(|i| i as u32 + 1)
}

fn month_from_code(c: char) -> Option<u32> {
    match c {
        '1'..='9' => Some(c as u32 - '0' as u32),
        'O' => Some(10),
        'N' => Some(11),
        'D' => Some(12),
        _ => None,
    }
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut d = first_next - Duration::days(1);
    while d.weekday() != weekday {
        d -= Duration::days(1);
    }
    Some(d)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_fno_suffixes() {
        assert!(looks_like_fno("NIFTY24AUGFUT"));
        assert!(looks_like_fno("NIFTY24AUG22500CE"));
        assert!(looks_like_fno("BANKNIFTY2480748500PE"));
        assert!(!looks_like_fno("RELIANCE"));
        // CE/PE without a digit before them is an equity name, not a contract.
        assert!(!looks_like_fno("AMBUJACE"));
    }

    #[test]
    fn parses_monthly_future() {
        let s = parse_fno_symbol("NIFTY24AUGFUT").unwrap();
        assert_eq!(s.underlying, "NIFTY");
        assert_eq!(s.right, Right::Future);
        assert_eq!(s.strike, None);
        // Last Thursday of August 2024 is the 29th.
        assert_eq!(s.expiry, NaiveDate::from_ymd_opt(2024, 8, 29).unwrap());
        assert_eq!(s.product_type(), ProductType::IndexFuture);
    }

    #[test]
    fn parses_monthly_option() {
        let s = parse_fno_symbol("BANKNIFTY24SEP48500PE").unwrap();
        assert_eq!(s.underlying, "BANKNIFTY");
        assert_eq!(s.right, Right::Put);
        assert_eq!(s.strike, Some(48500.0));
        // Last Wednesday of September 2024 is the 25th.
        assert_eq!(s.expiry, NaiveDate::from_ymd_opt(2024, 9, 25).unwrap());
        assert_eq!(s.product_type(), ProductType::IndexOption);
    }

    #[test]
    fn parses_weekly_option() {
        // YY=24, month code 8, day 07.
        let s = parse_fno_symbol("NIFTY2480722500CE").unwrap();
        assert_eq!(s.underlying, "NIFTY");
        assert_eq!(s.expiry, NaiveDate::from_ymd_opt(2024, 8, 7).unwrap());
        assert_eq!(s.strike, Some(22500.0));
        assert_eq!(s.right, Right::Call);
    }

    #[test]
    fn parses_weekly_october_code() {
        let s = parse_fno_symbol("FINNIFTY24O2223400CE").unwrap();
        assert_eq!(s.expiry, NaiveDate::from_ymd_opt(2024, 10, 22).unwrap());
    }

    #[test]
    fn ampersand_underlying() {
        let s = parse_fno_symbol("M&M24AUG3000CE").unwrap();
        assert_eq!(s.underlying, "M&M");
        assert_eq!(s.product_type(), ProductType::StockOption);
    }

    #[test]
    fn rejects_garbage_loudly() {
        assert!(matches!(
            parse_fno_symbol("RELIANCE"),
            Err(SymbolError::NotFno(_))
        ));
        assert!(matches!(
            parse_fno_symbol("NIFTYXXFUT"),
            Err(SymbolError::BadExpiry(_))
        ));
        // CE with no strike digits fails the structural suffix check.
        assert!(matches!(
            parse_fno_symbol("NIFTY24AUGCE"),
            Err(SymbolError::NotFno(_))
        ));
        // Weekly-coded futures do not exist.
        assert!(matches!(
            parse_fno_symbol("NIFTY24807FUT"),
            Err(SymbolError::BadExpiry(_))
        ));
    }

    #[test]
    fn expiry_weekday_conventions() {
        assert_eq!(expiry_weekday("NIFTY"), Weekday::Thu);
        assert_eq!(expiry_weekday("FINNIFTY"), Weekday::Tue);
        assert_eq!(expiry_weekday("BANKNIFTY"), Weekday::Wed);
        assert_eq!(expiry_weekday("RELIANCE"), Weekday::Thu);
    }

    #[test]
    fn finnifty_monthly_lands_on_tuesday() {
        let s = parse_fno_symbol("FINNIFTY24AUG23000CE").unwrap();
        assert_eq!(s.expiry.weekday(), Weekday::Tue);
        assert_eq!(s.expiry, NaiveDate::from_ymd_opt(2024, 8, 27).unwrap());
    }

    #[test]
    fn exchange_routing() {
        assert_eq!(exchange_for("SENSEX24AUG81000CE"), "BFO");
        assert_eq!(exchange_for("BANKEX24AUGFUT"), "BFO");
        assert_eq!(exchange_for("NIFTY24AUGFUT"), "NFO");
        assert_eq!(exchange_for("RELIANCE"), "NSE");
    }

    #[test]
    fn correlation_pairs() {
        assert!(highly_correlated("NIFTY", "SENSEX"));
        assert!(highly_correlated("BANKEX", "BANKNIFTY"));
        assert!(!highly_correlated("NIFTY", "BANKNIFTY"));
        assert!(medium_correlated("NIFTY", "BANKNIFTY"));
        assert!(medium_correlated("FINNIFTY", "SENSEX"));
        assert!(!medium_correlated("NIFTY", "NIFTY"));
        assert!(!medium_correlated("NIFTY", "MIDCPNIFTY"));
    }

    #[test]
    fn lot_sizes_known_indices() {
        assert_eq!(lot_size("NIFTY"), 75);
        assert_eq!(lot_size("BANKNIFTY"), 35);
        assert_eq!(lot_size("SENSEX"), 20);
        assert_eq!(lot_size("UNKNOWN"), 1);
    }

    #[test]
    fn round_trip_monthly_format() {
        let expiry = NaiveDate::from_ymd_opt(2024, 8, 29).unwrap();
        let sym = format_monthly_symbol("NIFTY", expiry, Some(22500.0), Right::Call);
        assert_eq!(sym, "NIFTY24AUG22500CE");
        let parsed = parse_fno_symbol(&sym).unwrap();
        assert_eq!(parsed.expiry, expiry);
        assert_eq!(parsed.strike, Some(22500.0));
    }

    #[test]
    fn next_weekly_expiry_walks_forward() {
        // From Monday 2024-08-05, the next NIFTY expiry is Thursday the 8th.
        let from = NaiveDate::from_ymd_opt(2024, 8, 5).unwrap();
        assert_eq!(
            next_weekly_expiry("NIFTY", from),
            NaiveDate::from_ymd_opt(2024, 8, 8).unwrap()
        );
        // A Thursday maps to itself.
        let thu = NaiveDate::from_ymd_opt(2024, 8, 8).unwrap();
        assert_eq!(next_weekly_expiry("NIFTY", thu), thu);
    }

    #[test]
    fn equity_charset() {
        assert!(validate_equity("RELIANCE").is_ok());
        assert!(validate_equity("M&M").is_ok());
        assert!(validate_equity("bad").is_err());
        assert!(validate_equity("").is_err());
    }
}
