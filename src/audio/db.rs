// Conversion dB <-> niveau linéaire - tables précalculées
//
// The hot loop converts between sample levels and decibels on every sample
// (limiter, normalizer, headroom). Table lookups keep that cheap.

use std::sync::OnceLock;

/// Lowest dB value covered by the antilog table. Anything below is silence.
const DB_TABLE_MIN: f32 = -128.0;
/// Highest dB value covered by the antilog table.
const DB_TABLE_MAX: f32 = 32.0;
/// Table entries per dB.
const DB_TABLE_STEP: f32 = 8.0;

/// 20 * log10(2), the dB value of one octave of signal level.
const DB_PER_OCTAVE: f32 = 6.020_599_9;

/// dB value reported for a zero or negative level. Finite on purpose so
/// gain arithmetic downstream never sees an infinity.
pub const DB_SILENCE: f32 = -1000.0;

fn antilog_table() -> &'static [f32] {
    static TABLE: OnceLock<Vec<f32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let n = ((DB_TABLE_MAX - DB_TABLE_MIN) * DB_TABLE_STEP) as usize + 2;
        (0..n)
            .map(|i| {
                let db = DB_TABLE_MIN + i as f32 / DB_TABLE_STEP;
                10.0f32.powf(db / 20.0)
            })
            .collect()
    })
}

fn log_table() -> &'static [f32] {
    static TABLE: OnceLock<Vec<f32>> = OnceLock::new();
    // dB of mantissa values in [1, 2), 256 steps plus a guard entry
    TABLE.get_or_init(|| {
        (0..=256)
            .map(|i| 20.0 * (1.0 + i as f64 / 256.0).log10() as f32)
            .collect()
    })
}

/// Warm both tables. Called once at startup so the first audio callback
/// never pays the initialisation cost.
pub fn init_tables() {
    let _ = antilog_table();
    let _ = log_table();
}

/// Convert a decibel value into a linear gain factor.
#[inline]
pub fn db2level(db: f32) -> f32 {
    if db <= DB_TABLE_MIN {
        return 0.0;
    }
    if db >= DB_TABLE_MAX {
        return 10.0f32.powf(db / 20.0);
    }
    let table = antilog_table();
    let pos = (db - DB_TABLE_MIN) * DB_TABLE_STEP;
    let idx = pos as usize;
    let frac = pos - idx as f32;
    table[idx] + (table[idx + 1] - table[idx]) * frac
}

/// Convert a linear signal level into decibels.
///
/// Splits the float into exponent and mantissa so the table stays small:
/// the exponent contributes whole octaves, the mantissa is interpolated
/// from a 256-entry table.
#[inline]
pub fn level2db(level: f32) -> f32 {
    if level <= 0.0 || !level.is_finite() {
        return DB_SILENCE;
    }
    let bits = level.to_bits();
    let exp = ((bits >> 23) & 0xFF) as i32 - 127;
    if exp == -127 {
        // denormal, far below anything audible
        return DB_SILENCE;
    }
    let table = log_table();
    let mant = bits & 0x007F_FFFF;
    let idx = (mant >> 15) as usize;
    let frac = (mant & 0x7FFF) as f32 / 32768.0;
    exp as f32 * DB_PER_OCTAVE + table[idx] + (table[idx + 1] - table[idx]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db2level_reference_points() {
        assert!((db2level(0.0) - 1.0).abs() < 1e-4);
        assert!((db2level(-6.0206) - 0.5).abs() < 1e-4);
        assert!((db2level(-20.0) - 0.1).abs() < 1e-4);
        assert!((db2level(20.0) - 10.0).abs() < 1e-3);
        assert_eq!(db2level(-500.0), 0.0);
    }

    #[test]
    fn test_level2db_reference_points() {
        assert!(level2db(1.0).abs() < 1e-3);
        assert!((level2db(0.5) + 6.0206).abs() < 1e-2);
        assert!((level2db(0.1) + 20.0).abs() < 1e-2);
        assert_eq!(level2db(0.0), DB_SILENCE);
        assert_eq!(level2db(-1.0), DB_SILENCE);
    }

    #[test]
    fn test_round_trip_accuracy() {
        // both directions should agree to well under a tenth of a dB
        let mut db = -120.0f32;
        while db < 30.0 {
            let back = level2db(db2level(db));
            assert!(
                (back - db).abs() < 0.05,
                "round trip at {} dB came back as {}",
                db,
                back
            );
            db += 0.37;
        }
    }
}
