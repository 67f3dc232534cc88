//! Horizontal/equatorial coordinate transform
//!
//! The GOTO path converts a requested right ascension/declination into the
//! azimuth/altitude the head actually understands, and incoming AHRS
//! orientation updates are converted back so the host sees equatorial
//! coordinates. This is the only celestial calculation the driver performs;
//! the julian date comes from the [`Clock`](crate::clock::Clock)
//! collaborator as an opaque input.
//!
//! Azimuth follows the compass convention (degrees from North, increasing
//! eastward), matching the head's `compass`/`yaw` fields. Right ascension is
//! in hours, everything else in degrees.

/// Observer site supplied by the host; read-only to this driver
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObserverLocation {
    /// Latitude in degrees, north positive
    pub latitude: f64,
    /// Longitude in degrees, east positive
    pub longitude: f64,
    /// Elevation in meters above sea level
    pub elevation: f64,
}

/// Altitude/azimuth pair in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalCoordinates {
    pub altitude: f64,
    pub azimuth: f64,
}

/// Right ascension (hours) / declination (degrees) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquatorialCoordinates {
    pub right_ascension: f64,
    pub declination: f64,
}

/// Normalize an angle in degrees to `[0, 360)`
fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Rounding at the zenith can push sine arguments a hair outside `[-1, 1]`,
/// which would turn `asin` into NaN and poison orientation reporting.
fn clamped_asin(value: f64) -> f64 {
    value.clamp(-1.0, 1.0).asin()
}

/// Local sidereal time in degrees for a julian date and site longitude.
///
/// Uses the linear GMST expansion around J2000; sub-arcsecond terms are
/// irrelevant at the head's pointing accuracy.
pub fn local_sidereal_time(julian_date: f64, longitude: f64) -> f64 {
    let days_since_j2000 = julian_date - 2_451_545.0;
    let gmst = 280.460_618_37 + 360.985_647_366_29 * days_since_j2000;
    normalize_degrees(gmst + longitude)
}

/// Convert equatorial target coordinates to the horizontal frame
pub fn equatorial_to_horizontal(
    equatorial: &EquatorialCoordinates,
    location: &ObserverLocation,
    julian_date: f64,
) -> HorizontalCoordinates {
    let lst = local_sidereal_time(julian_date, location.longitude);
    let hour_angle = normalize_degrees(lst - equatorial.right_ascension * 15.0).to_radians();
    let dec = equatorial.declination.to_radians();
    let lat = location.latitude.to_radians();

    let altitude =
        clamped_asin(dec.sin() * lat.sin() + dec.cos() * lat.cos() * hour_angle.cos());
    let azimuth = (-dec.cos() * hour_angle.sin())
        .atan2(dec.sin() * lat.cos() - dec.cos() * hour_angle.cos() * lat.sin());

    HorizontalCoordinates {
        altitude: altitude.to_degrees(),
        azimuth: normalize_degrees(azimuth.to_degrees()),
    }
}

/// Convert a horizontal orientation report to equatorial coordinates
pub fn horizontal_to_equatorial(
    horizontal: &HorizontalCoordinates,
    location: &ObserverLocation,
    julian_date: f64,
) -> EquatorialCoordinates {
    let lst = local_sidereal_time(julian_date, location.longitude);
    let alt = horizontal.altitude.to_radians();
    let az = horizontal.azimuth.to_radians();
    let lat = location.latitude.to_radians();

    let declination =
        clamped_asin(alt.sin() * lat.sin() + alt.cos() * lat.cos() * az.cos());
    let hour_angle = (-az.sin() * alt.cos())
        .atan2(alt.sin() * lat.cos() - alt.cos() * lat.sin() * az.cos());

    let right_ascension = normalize_degrees(lst - hour_angle.to_degrees()) / 15.0;

    EquatorialCoordinates {
        right_ascension,
        declination: declination.to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_negative_angles() {
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert_eq!(normalize_degrees(720.0), 0.0);
        assert_eq!(normalize_degrees(359.5), 359.5);
    }

    #[test]
    fn clamped_asin_survives_rounding_overshoot() {
        assert!(clamped_asin(1.000_000_000_2).is_finite());
        assert!(clamped_asin(-1.000_000_000_2).is_finite());
    }

    #[test]
    fn sidereal_time_is_in_range() {
        let lst = local_sidereal_time(2_460_000.5, 11.6);
        assert!((0.0..360.0).contains(&lst));
    }
}
