//! Slot normalisation: relative dates, colloquial times, contact data.
//!
//! All date arithmetic is computed against the message timestamp in the
//! locale's timezone, never against the server clock, so the same snapshot
//! always normalises to the same values.

use decisor::slots::{SlotKey, Slots};
use once_cell::sync::Lazy;
use regex::Regex;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset, Weekday};

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex"));
static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[/.](\d{1,2})(?:[/.](\d{2,4}))?$").expect("static regex"));
static TIME_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:a las\s+)?(\d{1,2})(?:[:.h](\d{2}))?\s*(hs|hrs|h|am|pm)?\.?$")
        .expect("static regex")
});

/// UTC offset for a BCP-47 locale region. DST is deliberately ignored: an
/// off-by-one hour on "mañana" never changes the calendar day in these
/// longitudes at the times people book services.
pub fn locale_offset(locale: &str) -> UtcOffset {
    let region = locale
        .rsplit(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let hours = match region.as_str() {
        "AR" | "UY" => -3,
        "CL" | "PY" | "BO" | "VE" => -4,
        "CO" | "PE" | "EC" | "PA" => -5,
        "MX" | "CR" | "GT" | "SV" | "HN" | "NI" => -6,
        "ES" => 1,
        _ => -3,
    };
    UtcOffset::from_hms(hours, 0, 0).unwrap_or(UtcOffset::UTC)
}

/// The "today" used for relative date resolution.
pub fn reference_date(timestamp: Option<OffsetDateTime>, locale: &str) -> Date {
    timestamp
        .unwrap_or_else(OffsetDateTime::now_utc)
        .to_offset(locale_offset(locale))
        .date()
}

fn to_iso(date: Date) -> String {
    let format = format_description!("[year]-[month]-[day]");
    date.format(&format).unwrap_or_else(|_| date.to_string())
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name {
        "lunes" => Some(Weekday::Monday),
        "martes" => Some(Weekday::Tuesday),
        "miércoles" | "miercoles" => Some(Weekday::Wednesday),
        "jueves" => Some(Weekday::Thursday),
        "viernes" => Some(Weekday::Friday),
        "sábado" | "sabado" => Some(Weekday::Saturday),
        "domingo" => Some(Weekday::Sunday),
        _ => None,
    }
}

fn next_weekday(today: Date, target: Weekday) -> Date {
    let current = today.weekday().number_days_from_monday() as i64;
    let wanted = target.number_days_from_monday() as i64;
    let mut delta = (wanted - current).rem_euclid(7);
    if delta == 0 {
        // "el lunes" said on a Monday means next week's.
        delta = 7;
    }
    today.checked_add(Duration::days(delta)).unwrap_or(today)
}

/// Normalise a user-supplied date expression to ISO-8601.
pub fn normalize_date(raw: &str, today: Date) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    if ISO_DATE.is_match(&lowered) {
        return Some(lowered);
    }
    match lowered.as_str() {
        "hoy" => return Some(to_iso(today)),
        "mañana" | "manana" => {
            return today.checked_add(Duration::days(1)).map(to_iso);
        }
        "pasado mañana" | "pasado manana" => {
            return today.checked_add(Duration::days(2)).map(to_iso);
        }
        _ => {}
    }
    let name = lowered.strip_prefix("el ").unwrap_or(&lowered);
    if let Some(weekday) = weekday_from_name(name) {
        return Some(to_iso(next_weekday(today, weekday)));
    }
    if let Some(caps) = NUMERIC_DATE.captures(&lowered) {
        let day: u8 = caps[1].parse().ok()?;
        let month: u8 = caps[2].parse().ok()?;
        let year: i32 = match caps.get(3) {
            Some(m) => {
                let y: i32 = m.as_str().parse().ok()?;
                if y < 100 { y + 2000 } else { y }
            }
            None => today.year(),
        };
        let month = Month::try_from(month).ok()?;
        let mut date = Date::from_calendar_date(year, month, day).ok()?;
        // A day-first date without a year that already passed means next year.
        if caps.get(3).is_none() && date < today {
            date = Date::from_calendar_date(year + 1, month, day).ok()?;
        }
        return Some(to_iso(date));
    }
    None
}

/// Normalise a colloquial time expression to `HH:MM` 24 h.
pub fn normalize_time(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let caps = TIME_FORM.captures(&lowered)?;
    let mut hour: u8 = caps[1].parse().ok()?;
    let minute: u8 = caps
        .get(2)
        .map(|m| m.as_str().parse().ok())
        .unwrap_or(Some(0))?;
    match caps.get(3).map(|m| m.as_str()) {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}"))
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalise every known slot in place. Values that do not parse are left
/// as extracted; downstream tools receive them verbatim.
pub fn normalize_slots(slots: &mut Slots, today: Date) {
    if let Some(raw) = slots.get(SlotKey::PreferredDate.as_str()).cloned() {
        if let Some(iso) = normalize_date(&raw, today) {
            slots.insert(SlotKey::PreferredDate.as_str().to_string(), iso);
        }
    }
    if let Some(raw) = slots.get(SlotKey::PreferredTime.as_str()).cloned() {
        if let Some(hhmm) = normalize_time(&raw) {
            slots.insert(SlotKey::PreferredTime.as_str().to_string(), hhmm);
        }
    }
    if let Some(raw) = slots.get(SlotKey::ClientEmail.as_str()).cloned() {
        slots.insert(
            SlotKey::ClientEmail.as_str().to_string(),
            normalize_email(&raw),
        );
    }
    if let Some(raw) = slots.get(SlotKey::ClientPhone.as_str()).cloned() {
        let digits = normalize_phone(&raw);
        if !digits.is_empty() {
            slots.insert(SlotKey::ClientPhone.as_str().to_string(), digits);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const TODAY: Date = date!(2026 - 08 - 01); // a Saturday

    #[test]
    fn relative_dates_resolve_against_the_reference() {
        assert_eq!(normalize_date("hoy", TODAY).unwrap(), "2026-08-01");
        assert_eq!(normalize_date("mañana", TODAY).unwrap(), "2026-08-02");
        assert_eq!(normalize_date("MAÑANA", TODAY).unwrap(), "2026-08-02");
        assert_eq!(normalize_date("pasado mañana", TODAY).unwrap(), "2026-08-03");
    }

    #[test]
    fn weekday_names_pick_the_next_occurrence() {
        assert_eq!(normalize_date("lunes", TODAY).unwrap(), "2026-08-03");
        assert_eq!(normalize_date("el viernes", TODAY).unwrap(), "2026-08-07");
        // saying the current weekday means next week
        assert_eq!(normalize_date("sábado", TODAY).unwrap(), "2026-08-08");
    }

    #[test]
    fn numeric_dates_are_day_first_and_roll_forward() {
        assert_eq!(normalize_date("15/8", TODAY).unwrap(), "2026-08-15");
        assert_eq!(normalize_date("02/03", TODAY).unwrap(), "2027-03-02");
        assert_eq!(normalize_date("15/08/2026", TODAY).unwrap(), "2026-08-15");
    }

    #[test]
    fn iso_dates_pass_through() {
        assert_eq!(normalize_date("2026-12-24", TODAY).unwrap(), "2026-12-24");
    }

    #[test]
    fn nonsense_dates_do_not_normalize() {
        assert!(normalize_date("algún día", TODAY).is_none());
        assert!(normalize_date("32/13", TODAY).is_none());
    }

    #[test]
    fn colloquial_times_normalize_to_24h() {
        assert_eq!(normalize_time("15hs").unwrap(), "15:00");
        assert_eq!(normalize_time("15:30").unwrap(), "15:30");
        assert_eq!(normalize_time("15.30").unwrap(), "15:30");
        assert_eq!(normalize_time("3pm").unwrap(), "15:00");
        assert_eq!(normalize_time("3:30pm").unwrap(), "15:30");
        assert_eq!(normalize_time("12am").unwrap(), "00:00");
        assert_eq!(normalize_time("a las 9").unwrap(), "09:00");
    }

    #[test]
    fn out_of_range_times_do_not_normalize() {
        assert!(normalize_time("25hs").is_none());
        assert!(normalize_time("12:75").is_none());
    }

    #[test]
    fn contact_slots_are_canonicalised() {
        assert_eq!(normalize_email("  Ana.Lopez@Mail.COM "), "ana.lopez@mail.com");
        assert_eq!(normalize_phone("+54 9 11 5555-0001"), "5491155550001");
    }

    #[test]
    fn locale_offsets_default_to_argentina() {
        assert_eq!(locale_offset("es-AR").whole_hours(), -3);
        assert_eq!(locale_offset("es-MX").whole_hours(), -6);
        assert_eq!(locale_offset("klingon").whole_hours(), -3);
    }

    #[test]
    fn normalize_slots_rewrites_known_keys_only() {
        let mut slots = Slots::new();
        slots.insert("preferred_date".into(), "mañana".into());
        slots.insert("preferred_time".into(), "15hs".into());
        slots.insert("client_email".into(), "A@B.com".into());
        slots.insert("nota_interna".into(), "VIP".into());
        normalize_slots(&mut slots, TODAY);
        assert_eq!(slots["preferred_date"], "2026-08-02");
        assert_eq!(slots["preferred_time"], "15:00");
        assert_eq!(slots["client_email"], "a@b.com");
        assert_eq!(slots["nota_interna"], "VIP");
    }
}
