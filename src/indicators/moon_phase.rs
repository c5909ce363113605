// =============================================================================
// Moon phase — novelty ANALYZE tool
// =============================================================================
//
// Some bot authors include lunar-cycle features in their trading logic. This
// is a deterministic astronomical calculation, not a market indicator: given
// a timestamp, it returns where in the ~29.53-day synodic month the moon
// currently sits.
//
// Reference new moon: 2000-01-06 18:14 UTC (a well-known epoch new moon).
// Synodic month length: 29.530588853 days.

use chrono::{DateTime, Utc};

const SYNODIC_MONTH_DAYS: f64 = 29.530588853;

/// Returns `(age_days, phase_fraction, phase_name)` for the given `at` time.
///
/// `phase_fraction` is in `[0.0, 1.0)`, where `0.0` is new moon and `0.5` is
/// full moon. `age_days` is how many days into the current cycle `at` falls.
pub fn moon_phase(at: DateTime<Utc>) -> (f64, f64, &'static str) {
    let reference = DateTime::parse_from_rfc3339("2000-01-06T18:14:00+00:00")
        .expect("valid reference timestamp")
        .with_timezone(&Utc);

    let elapsed_days = (at - reference).num_milliseconds() as f64 / 86_400_000.0;
    let cycles = elapsed_days / SYNODIC_MONTH_DAYS;
    let fraction = cycles.fract();
    // `.fract()` can be negative for timestamps before the reference epoch.
    let fraction = if fraction < 0.0 { fraction + 1.0 } else { fraction };
    let age_days = fraction * SYNODIC_MONTH_DAYS;

    let name = phase_name(fraction);

    (age_days, fraction, name)
}

fn phase_name(fraction: f64) -> &'static str {
    match fraction {
        f if f < 0.03 || f >= 0.97 => "NEW_MOON",
        f if f < 0.22 => "WAXING_CRESCENT",
        f if f < 0.28 => "FIRST_QUARTER",
        f if f < 0.47 => "WAXING_GIBBOUS",
        f if f < 0.53 => "FULL_MOON",
        f if f < 0.72 => "WANING_GIBBOUS",
        f if f < 0.78 => "LAST_QUARTER",
        _ => "WANING_CRESCENT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reference_epoch_is_new_moon() {
        let at = Utc.with_ymd_and_hms(2000, 1, 6, 18, 14, 0).unwrap();
        let (age, fraction, name) = moon_phase(at);
        assert!(age < 0.01);
        assert!(fraction < 0.01);
        assert_eq!(name, "NEW_MOON");
    }

    #[test]
    fn half_cycle_later_is_full_moon() {
        let reference = Utc.with_ymd_and_hms(2000, 1, 6, 18, 14, 0).unwrap();
        let half_cycle_ms = (SYNODIC_MONTH_DAYS / 2.0 * 86_400_000.0) as i64;
        let at = reference + chrono::Duration::milliseconds(half_cycle_ms);
        let (_, fraction, name) = moon_phase(at);
        assert!((fraction - 0.5).abs() < 0.01);
        assert_eq!(name, "FULL_MOON");
    }

    #[test]
    fn fraction_always_in_unit_range() {
        let at = Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap();
        let (age, fraction, _) = moon_phase(at);
        assert!((0.0..1.0).contains(&fraction));
        assert!(age >= 0.0 && age < SYNODIC_MONTH_DAYS);
    }

    #[test]
    fn predates_reference_epoch_still_normalises() {
        let at = Utc.with_ymd_and_hms(1999, 6, 1, 0, 0, 0).unwrap();
        let (_, fraction, _) = moon_phase(at);
        assert!((0.0..1.0).contains(&fraction));
    }
}
