//! Pure geospatial kernel: haversine distance and geohash tiling.
//!
//! Everything in this module is deterministic and side-effect free. The
//! presence index and broadcast fabric build on these primitives; nothing
//! here performs I/O or suspends.

use std::collections::BTreeSet;

/// Mean Earth radius in meters, as used by the haversine distance.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geohash base-32 alphabet (the standard one, omitting a/i/l/o).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Meters per degree of latitude, used to size the cover sampling grid.
const METERS_PER_DEGREE_LAT: f64 = 111_000.0;

/// Great-circle distance in meters between two WGS-84 points.
///
/// Inputs are decimal degrees. The result is non-negative, symmetric, and
/// stable to roughly 1 m for points less than 100 km apart.
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Encode a coordinate to a geohash tile of the given precision.
///
/// Bit decisions interleave longitude-first; precision 6 yields tiles of
/// roughly 1.2 km x 0.6 km, the default for city-scale dispatch.
pub fn encode_geohash(lat: f64, lon: f64, precision: usize) -> String {
    let precision = precision.clamp(1, 12);
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);

    let mut out = String::with_capacity(precision);
    let mut bit = 0u8;
    let mut ch = 0usize;
    let mut is_lon = true;

    while out.len() < precision {
        if is_lon {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                ch |= 1 << (4 - bit);
                lon_range.0 = mid;
            } else {
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                ch |= 1 << (4 - bit);
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        is_lon = !is_lon;

        if bit < 4 {
            bit += 1;
        } else {
            out.push(BASE32[ch] as char);
            bit = 0;
            ch = 0;
        }
    }

    out
}

/// Decode a geohash tile back to its bounding box.
///
/// Returns `((lat_min, lat_max), (lon_min, lon_max))`, or `None` when the
/// string contains characters outside the base-32 alphabet.
fn decode_bounds(tile: &str) -> Option<((f64, f64), (f64, f64))> {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut is_lon = true;

    for c in tile.bytes() {
        let value = BASE32.iter().position(|&b| b == c.to_ascii_lowercase())?;
        for bit in 0..5 {
            let set = value & (1 << (4 - bit)) != 0;
            let range = if is_lon { &mut lon_range } else { &mut lat_range };
            let mid = (range.0 + range.1) / 2.0;
            if set {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            is_lon = !is_lon;
        }
    }

    Some((lat_range, lon_range))
}

/// The tile itself plus its 8 cardinal and diagonal neighbors.
///
/// Fan-out over this set is what makes tile-boundary subscribers reachable:
/// a passenger sitting at the edge of one tile still observes a driver just
/// across the boundary in the adjacent tile.
pub fn neighbors(tile: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    out.insert(tile.to_string());

    let Some((lat_range, lon_range)) = decode_bounds(tile) else {
        return out;
    };

    let center_lat = (lat_range.0 + lat_range.1) / 2.0;
    let center_lon = (lon_range.0 + lon_range.1) / 2.0;
    let cell_height = lat_range.1 - lat_range.0;
    let cell_width = lon_range.1 - lon_range.0;

    for d_lat in [-1.0, 0.0, 1.0] {
        for d_lon in [-1.0, 0.0, 1.0] {
            let lat = (center_lat + d_lat * cell_height).clamp(-90.0, 90.0);
            let lon = wrap_longitude(center_lon + d_lon * cell_width);
            out.insert(encode_geohash(lat, lon, tile.len()));
        }
    }

    out
}

/// Every tile that can intersect the disc of `radius_m` around a point.
///
/// Samples a 7x7 grid spanning the disc's bounding box in degree space and
/// encodes each sample. The result over-approximates: tiles outside the
/// disc may appear, tiles containing any point of the disc must appear.
pub fn cover(lat: f64, lon: f64, radius_m: f64, precision: usize) -> BTreeSet<String> {
    let radius_m = radius_m.max(0.0);
    let lat_offset = radius_m / METERS_PER_DEGREE_LAT;
    // Longitude degrees shrink with latitude; clamp the cosine away from
    // zero so polar inputs stay finite.
    let lon_offset = lat_offset / lat.to_radians().cos().abs().max(1e-6);

    let mut tiles = BTreeSet::new();
    const STEPS: i32 = 3;
    for lat_step in -STEPS..=STEPS {
        for lon_step in -STEPS..=STEPS {
            let sample_lat =
                (lat + f64::from(lat_step) * lat_offset / f64::from(STEPS)).clamp(-90.0, 90.0);
            let sample_lon = wrap_longitude(lon + f64::from(lon_step) * lon_offset / f64::from(STEPS));
            tiles.insert(encode_geohash(sample_lat, sample_lon, precision));
        }
    }

    tiles
}

fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        return lon;
    }
    let mut wrapped = (lon + 180.0) % 360.0;
    if wrapped < 0.0 {
        wrapped += 360.0;
    }
    wrapped - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELHI: (f64, f64) = (28.6139, 77.2090);

    #[test]
    fn test_distance_zero_for_identical_points() {
        assert_eq!(distance_m(DELHI.0, DELHI.1, DELHI.0, DELHI.1), 0.0);
    }

    #[test]
    fn test_distance_symmetric() {
        let d1 = distance_m(28.6139, 77.2090, 28.7041, 77.1025);
        let d2 = distance_m(28.7041, 77.1025, 28.6139, 77.2090);
        assert!((d1 - d2).abs() < 1e-9);
        assert!(d1 > 0.0);
    }

    #[test]
    fn test_distance_one_degree_longitude_at_equator() {
        // One degree of longitude at the equator is R * pi / 180.
        let d = distance_m(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111_194.9).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_distance_short_city_hop() {
        // 0.0001 degrees in each axis near Delhi is about 15 m.
        let d = distance_m(28.6139, 77.2090, 28.6140, 77.2091);
        assert!(d > 10.0 && d < 20.0, "got {d}");
    }

    #[test]
    fn test_encode_known_vector() {
        // Classic reference vector for geohash implementations.
        assert_eq!(encode_geohash(57.64911, 10.40744, 11), "u4pruydqqvj");
        assert_eq!(encode_geohash(57.64911, 10.40744, 6), "u4pruy");
    }

    #[test]
    fn test_encode_second_known_vector() {
        assert_eq!(encode_geohash(42.605, -5.603, 5), "ezs42");
    }

    #[test]
    fn test_encode_precision_is_prefix_stable() {
        let full = encode_geohash(DELHI.0, DELHI.1, 12);
        for precision in 1..12 {
            assert_eq!(encode_geohash(DELHI.0, DELHI.1, precision), full[..precision]);
        }
    }

    #[test]
    fn test_decode_bounds_contains_original_point() {
        let tile = encode_geohash(DELHI.0, DELHI.1, 6);
        let (lat_range, lon_range) = decode_bounds(&tile).unwrap();
        assert!(lat_range.0 <= DELHI.0 && DELHI.0 <= lat_range.1);
        assert!(lon_range.0 <= DELHI.1 && DELHI.1 <= lon_range.1);
    }

    #[test]
    fn test_neighbors_includes_center_and_full_ring() {
        let tile = encode_geohash(DELHI.0, DELHI.1, 6);
        let ring = neighbors(&tile);
        assert!(ring.contains(&tile));
        // An interior tile has exactly 8 distinct neighbors.
        assert_eq!(ring.len(), 9);
    }

    #[test]
    fn test_neighbors_covers_point_just_across_boundary() {
        let tile = encode_geohash(DELHI.0, DELHI.1, 6);
        let (lat_range, _) = decode_bounds(&tile).unwrap();
        // A point a hair north of the tile's top edge lands in a neighbor.
        let across = encode_geohash(lat_range.1 + 1e-9, DELHI.1, 6);
        assert_ne!(across, tile);
        assert!(neighbors(&tile).contains(&across));
    }

    #[test]
    fn test_neighbors_of_garbage_input_is_just_the_input() {
        let ring = neighbors("not a tile!");
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_cover_is_sound_for_points_inside_the_disc() {
        // Any point within the radius must land in a covered tile.
        let (lat, lon, radius) = (DELHI.0, DELHI.1, 1200.0);
        let tiles = cover(lat, lon, radius, 6);

        for angle_deg in (0..360).step_by(15) {
            for fraction in [0.2, 0.5, 0.8, 1.0] {
                let theta = f64::from(angle_deg).to_radians();
                let d_lat = fraction * radius * theta.cos() / METERS_PER_DEGREE_LAT;
                let d_lon = fraction * radius * theta.sin()
                    / (METERS_PER_DEGREE_LAT * lat.to_radians().cos());
                let tile = encode_geohash(lat + d_lat, lon + d_lon, 6);
                assert!(
                    tiles.contains(&tile),
                    "tile {tile} for angle {angle_deg} fraction {fraction} not covered"
                );
            }
        }
    }

    #[test]
    fn test_cover_zero_radius_is_the_center_tile() {
        let tiles = cover(DELHI.0, DELHI.1, 0.0, 6);
        assert_eq!(tiles.len(), 1);
        assert!(tiles.contains(&encode_geohash(DELHI.0, DELHI.1, 6)));
    }

    #[test]
    fn test_cover_grows_with_radius() {
        let small = cover(DELHI.0, DELHI.1, 200.0, 6);
        let large = cover(DELHI.0, DELHI.1, 2000.0, 6);
        let center = encode_geohash(DELHI.0, DELHI.1, 6);
        assert!(large.len() >= small.len());
        assert!(small.contains(&center));
        assert!(large.contains(&center));
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(0.0), 0.0);
        assert_eq!(wrap_longitude(179.5), 179.5);
        assert!((wrap_longitude(180.5) - (-179.5)).abs() < 1e-9);
        assert!((wrap_longitude(-180.5) - 179.5).abs() < 1e-9);
    }
}
