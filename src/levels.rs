//! X32 value encodings
//!
//! Faders travel on the wire as a 0.0–1.0 float following a four-segment
//! piecewise-linear dB law. Pan is a plain 0.0–1.0 float.

/// Lowest level the fader law can express; anything at or below is -inf
pub const MIN_DB: f64 = -90.0;
/// Top of fader travel
pub const MAX_DB: f64 = 10.0;

/// Map a level in dB onto the console's fader float
pub fn db_to_float(db: f64) -> f32 {
    if db.is_nan() || db <= MIN_DB {
        return 0.0;
    }
    let f = if db < -60.0 {
        (db + 90.0) / 480.0
    } else if db < -30.0 {
        (db + 70.0) / 160.0
    } else if db < -10.0 {
        (db + 50.0) / 80.0
    } else {
        (db + 30.0) / 40.0
    };
    f.clamp(0.0, 1.0) as f32
}

/// Inverse of [`db_to_float`]; a closed fader is `-inf`
pub fn float_to_db(f: f32) -> f64 {
    let f = f64::from(f).clamp(0.0, 1.0);
    if f <= 0.0 {
        f64::NEG_INFINITY
    } else if f >= 0.5 {
        f * 40.0 - 30.0
    } else if f >= 0.25 {
        f * 80.0 - 50.0
    } else if f >= 0.0625 {
        f * 160.0 - 70.0
    } else {
        f * 480.0 - 90.0
    }
}

/// Pan position -100 (hard left) ..= 100 (hard right) to wire float
pub fn pan_to_float(pan: f64) -> f32 {
    ((pan.clamp(-100.0, 100.0) + 100.0) / 200.0) as f32
}

pub fn float_to_pan(f: f32) -> f64 {
    f64::from(f).clamp(0.0, 1.0) * 200.0 - 100.0
}

/// Clamp a dB target into fader range, treating -inf as the bottom
pub fn clamp_db(db: f64) -> f64 {
    if db.is_nan() {
        MIN_DB
    } else {
        db.clamp(MIN_DB, MAX_DB)
    }
}
