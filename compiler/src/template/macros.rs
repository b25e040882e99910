// macros.rs — Fixed macro catalogue for block templates
//
// Each macro expands deterministically to a short run of primitive
// instructions in the currently active section. Arguments arrive with
// placeholders already substituted: register-like arguments are symbols,
// the rest must parse as numbers.
//
// Preconditions: the accumulator is clear on entry (block convention).
// Postconditions: every macro except `onepole`/`smooth` leaves the
//                 accumulator clear.
// Failure modes: wrong arity or non-numeric arguments → `MacroError::Argument`;
//                LFO exhaustion → `MacroError::Alloc`.
// Side effects: appends IR nodes through the block context.

use thiserror::Error;

use crate::alloc::{AllocError, BlockContext};
use crate::ir::{format_number, parse_number, Section, MAX_COEFFICIENT};

#[derive(Debug, Error)]
pub enum MacroError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("{0}")]
    Argument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Macro {
    /// `@onepole IN STATE COEF`
    OnePole,
    /// `@smooth TARGET STATE COEF`
    Smooth,
    /// `@lfo RATE AMP [DEST]`
    Lfo,
    /// `@gain IN GAIN OUT`
    Gain,
    /// `@chorus_tap MEM LFO OFFSET DEST`
    ChorusTap,
    /// `@coef CTRL MIN MAX DEST`
    Coef,
}

/// Sine LFO rate field width (9 bits) and amplitude field width (15 bits).
const LFO_RATE_MAX: f64 = 511.0;
const LFO_AMP_MAX: f64 = 32_767.0;

impl Macro {
    pub fn parse(name: &str) -> Option<Macro> {
        match name {
            "onepole" => Some(Macro::OnePole),
            "smooth" => Some(Macro::Smooth),
            "lfo" => Some(Macro::Lfo),
            "gain" => Some(Macro::Gain),
            "chorus_tap" => Some(Macro::ChorusTap),
            "coef" => Some(Macro::Coef),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Macro::OnePole => "onepole",
            Macro::Smooth => "smooth",
            Macro::Lfo => "lfo",
            Macro::Gain => "gain",
            Macro::ChorusTap => "chorus_tap",
            Macro::Coef => "coef",
        }
    }

    /// Inclusive (min, max) argument count.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Macro::OnePole | Macro::Smooth | Macro::Gain => (3, 3),
            Macro::Lfo => (2, 3),
            Macro::ChorusTap | Macro::Coef => (4, 4),
        }
    }

    /// Expand into `section`. Returns the LFO bound by `@lfo`, if any.
    pub fn expand(
        self,
        args: &[String],
        section: Section,
        ctx: &mut BlockContext<'_>,
    ) -> Result<Option<String>, MacroError> {
        let (min, max) = self.arity();
        if args.len() < min || args.len() > max {
            return Err(MacroError::Argument(format!(
                "@{} takes {} argument(s), got {}",
                self.name(),
                if min == max {
                    min.to_string()
                } else {
                    format!("{min}-{max}")
                },
                args.len()
            )));
        }
        let a = Args(args);
        match self {
            Macro::OnePole => {
                let coef = a.coefficient(2)?;
                ctx.emit(section, "ldax", &[&args[0]]);
                ctx.emit(section, "rdfx", &[&args[1], &coef]);
                ctx.emit(section, "wrax", &[&args[1], "1.0"]);
                Ok(None)
            }
            Macro::Smooth => {
                let coef = a.coefficient(2)?;
                ctx.emit(section, "ldax", &[&args[0]]);
                ctx.emit(section, "rdax", &[&args[1], "-1.0"]);
                ctx.emit(section, "sof", &[&coef, "0.0"]);
                ctx.emit(section, "rdax", &[&args[1], "1.0"]);
                ctx.emit(section, "wrax", &[&args[1], "1.0"]);
                Ok(None)
            }
            Macro::Lfo => {
                let rate = a.number(0)?.round().clamp(0.0, LFO_RATE_MAX);
                let amp = a.number(1)?.round().clamp(0.0, LFO_AMP_MAX);
                let lfo = ctx.lfo()?;
                ctx.emit(
                    Section::Init,
                    "wlds",
                    &[&lfo, &format!("{rate:.0}"), &format!("{amp:.0}")],
                );
                if let Some(dest) = args.get(2) {
                    ctx.emit(section, "cho", &["rdal", &lfo]);
                    ctx.emit(section, "wrax", &[dest, "0.0"]);
                }
                Ok(Some(lfo))
            }
            Macro::Gain => {
                let gain = a.number(1)?;
                let reads = (gain.abs() / MAX_COEFFICIENT).ceil().max(1.0);
                if gain == 1.0 {
                    ctx.emit(section, "ldax", &[&args[0]]);
                } else {
                    let step = format_number(gain / reads);
                    for _ in 0..reads as usize {
                        ctx.emit(section, "rdax", &[&args[0], &step]);
                    }
                }
                ctx.emit(section, "wrax", &[&args[2], "0.0"]);
                Ok(None)
            }
            Macro::ChorusTap => {
                let offset = a.number(2)?;
                if offset < 0.0 || offset.fract() != 0.0 {
                    return Err(MacroError::Argument(format!(
                        "@chorus_tap offset must be a non-negative integer, got {offset}"
                    )));
                }
                let (mem, lfo, dest) = (&args[0], &args[1], &args[3]);
                let first = format!("{mem}+{offset:.0}");
                let second = format!("{mem}+{:.0}", offset + 1.0);
                ctx.emit(section, "cho", &["rda", lfo, "SIN|REG|COMPC", &first]);
                ctx.emit(section, "cho", &["rda", lfo, "SIN", &second]);
                ctx.emit(section, "wrax", &[dest, "0.0"]);
                Ok(None)
            }
            Macro::Coef => {
                let lo = a.number(1)?;
                let hi = a.number(2)?;
                let scale = hi - lo;
                if scale.abs() > MAX_COEFFICIENT {
                    return Err(MacroError::Argument(format!(
                        "@coef range {lo}..{hi} exceeds the coefficient range"
                    )));
                }
                ctx.emit(section, "ldax", &[&args[0]]);
                ctx.emit(section, "sof", &[&format_number(scale), &format_number(lo)]);
                ctx.emit(section, "wrax", &[&args[3], "0.0"]);
                Ok(None)
            }
        }
    }
}

struct Args<'a>(&'a [String]);

impl Args<'_> {
    fn number(&self, i: usize) -> Result<f64, MacroError> {
        let text = self.0.get(i).map(String::as_str).unwrap_or_default();
        parse_number(text)
            .ok_or_else(|| MacroError::Argument(format!("expected a number, got '{text}'")))
    }

    /// A number that fits a signed coefficient field, formatted.
    fn coefficient(&self, i: usize) -> Result<String, MacroError> {
        let v = self.number(i)?;
        if v.abs() > MAX_COEFFICIENT {
            return Err(MacroError::Argument(format!(
                "coefficient {v} is outside ±{MAX_COEFFICIENT}"
            )));
        }
        Ok(format_number(v))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
