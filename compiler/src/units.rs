// units.rs — Parameter unit conversions
//
// Pure display↔code conversions used by block parameters. Each pair is an
// exact inverse within `TOLERANCE` for in-range inputs; every function is a
// function of the sample rate only.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Relative tolerance shared by constant-pool deduplication and the
/// conversion round-trip guarantee.
pub const TOLERANCE: f64 = 1e-6;

/// Sine LFO rate scale: `f = code * fs / (2^17 * 2π)`.
const LFO_RATE_SCALE: f64 = 131_072.0;

/// True if `a` and `b` are equal within `TOLERANCE` (relative, with an
/// absolute floor of `TOLERANCE` near zero).
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE * 1f64.max(a.abs()).max(b.abs())
}

// ── Conversions ─────────────────────────────────────────────────────────────

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

pub fn linear_to_db(linear: f64) -> f64 {
    20.0 * linear.log10()
}

/// One-pole lowpass coefficient for a cutoff in Hz.
pub fn hz_to_onepole(hz: f64, sample_rate: f64) -> f64 {
    1.0 - (-2.0 * PI * hz / sample_rate).exp()
}

pub fn onepole_to_hz(coefficient: f64, sample_rate: f64) -> f64 {
    -(1.0 - coefficient).ln() * sample_rate / (2.0 * PI)
}

/// Chamberlin state-variable filter frequency coefficient.
pub fn hz_to_svf(hz: f64, sample_rate: f64) -> f64 {
    2.0 * (PI * hz / sample_rate).sin()
}

pub fn svf_to_hz(coefficient: f64, sample_rate: f64) -> f64 {
    (coefficient / 2.0).asin() * sample_rate / PI
}

pub fn ms_to_samples(ms: f64, sample_rate: f64) -> f64 {
    ms * sample_rate / 1000.0
}

pub fn samples_to_ms(samples: f64, sample_rate: f64) -> f64 {
    samples * 1000.0 / sample_rate
}

/// Sine LFO frequency field for a rate in Hz.
pub fn hz_to_lfo_rate(hz: f64, sample_rate: f64) -> f64 {
    hz * LFO_RATE_SCALE * 2.0 * PI / sample_rate
}

pub fn lfo_rate_to_hz(code: f64, sample_rate: f64) -> f64 {
    code * sample_rate / (LFO_RATE_SCALE * 2.0 * PI)
}

// ── Declared conversion kinds ───────────────────────────────────────────────

/// The display↔code conversion a parameter declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    /// Display dB, code linear gain.
    Decibels,
    /// Display Hz, code one-pole coefficient.
    OnePoleHz,
    /// Display Hz, code state-variable coefficient.
    SvfHz,
    /// Display milliseconds, code samples.
    Milliseconds,
    /// Display Hz, code sine LFO rate field.
    LfoRate,
}

impl Conversion {
    pub const ALL: [Conversion; 5] = [
        Conversion::Decibels,
        Conversion::OnePoleHz,
        Conversion::SvfHz,
        Conversion::Milliseconds,
        Conversion::LfoRate,
    ];

    pub fn to_code(self, display: f64, sample_rate: f64) -> f64 {
        match self {
            Conversion::Decibels => db_to_linear(display),
            Conversion::OnePoleHz => hz_to_onepole(display, sample_rate),
            Conversion::SvfHz => hz_to_svf(display, sample_rate),
            Conversion::Milliseconds => ms_to_samples(display, sample_rate),
            Conversion::LfoRate => hz_to_lfo_rate(display, sample_rate),
        }
    }

    pub fn to_display(self, code: f64, sample_rate: f64) -> f64 {
        match self {
            Conversion::Decibels => linear_to_db(code),
            Conversion::OnePoleHz => onepole_to_hz(code, sample_rate),
            Conversion::SvfHz => svf_to_hz(code, sample_rate),
            Conversion::Milliseconds => samples_to_ms(code, sample_rate),
            Conversion::LfoRate => lfo_rate_to_hz(code, sample_rate),
        }
    }

    /// Display-unit label for comments.
    pub fn unit(self) -> &'static str {
        match self {
            Conversion::Decibels => "dB",
            Conversion::OnePoleHz | Conversion::SvfHz | Conversion::LfoRate => "Hz",
            Conversion::Milliseconds => "ms",
        }
    }
}

/// Look up a conversion function by its template-visible name.
pub fn by_name(name: &str) -> Option<fn(f64, f64) -> f64> {
    let f: fn(f64, f64) -> f64 = match name {
        "db_to_linear" => |v, _| db_to_linear(v),
        "linear_to_db" => |v, _| linear_to_db(v),
        "hz_to_onepole" => hz_to_onepole,
        "onepole_to_hz" => onepole_to_hz,
        "hz_to_svf" => hz_to_svf,
        "svf_to_hz" => svf_to_hz,
        "ms_to_samples" => ms_to_samples,
        "samples_to_ms" => samples_to_ms,
        "hz_to_lfo_rate" => hz_to_lfo_rate,
        "lfo_rate_to_hz" => lfo_rate_to_hz,
        _ => return None,
    };
    Some(f)
}
