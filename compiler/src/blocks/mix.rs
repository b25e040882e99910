// mix.rs — Hand-written mixing blocks

use crate::alloc::BlockContext;
use crate::ir::{format_number, Section};
use crate::registry::{
    BlockCategory, BlockDescriptor, BlockKind, GenerateError, ParamSpec, PortSpec,
};
use crate::units::Conversion;

// ── mixer ───────────────────────────────────────────────────────────────────

/// Two audio inputs summed with per-input gain in dB.
pub struct Mixer {
    descriptor: BlockDescriptor,
}

impl Mixer {
    pub fn new() -> Self {
        Mixer {
            descriptor: BlockDescriptor::new("mixer", "Mixer", BlockCategory::Utility)
                .with_input(PortSpec::audio("in1", "Input 1"))
                .with_input(PortSpec::audio("in2", "Input 2"))
                .with_output(PortSpec::audio("out", "Out"))
                .with_param(
                    ParamSpec::new("gain1", "Gain 1", 0.0, -60.0, 6.0).convert(Conversion::Decibels),
                )
                .with_param(
                    ParamSpec::new("gain2", "Gain 2", 0.0, -60.0, 6.0).convert(Conversion::Decibels),
                ),
        }
    }
}

impl BlockKind for Mixer {
    fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    fn generate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError> {
        let mut summed = 0;
        for (port, param) in [("in1", "gain1"), ("in2", "gain2")] {
            if let Some(src) = ctx.input(port)? {
                let gain = format_number(ctx.param(param)?);
                ctx.emit(Section::Main, "rdax", &[&src, &gain]);
                summed += 1;
            }
        }
        if summed == 0 {
            let text = format!("{}: mixer has no inputs", ctx.id());
            ctx.comment(Section::Main, text);
            return Ok(());
        }
        let out = ctx.output("out")?;
        ctx.emit(Section::Main, "wrax", &[&out, "0.0"]);
        Ok(())
    }
}

// ── volume ──────────────────────────────────────────────────────────────────

/// Audio scaled by a control input, or by the `level` parameter when the
/// control is unconnected.
pub struct Volume {
    descriptor: BlockDescriptor,
}

impl Volume {
    pub fn new() -> Self {
        Volume {
            descriptor: BlockDescriptor::new("volume", "Volume", BlockCategory::Effect)
                .with_input(PortSpec::audio("in", "In").required())
                .with_input(PortSpec::control("level", "Level"))
                .with_output(PortSpec::audio("out", "Out"))
                .with_param(ParamSpec::new("level", "Level", 1.0, 0.0, 1.0)),
        }
    }
}

impl BlockKind for Volume {
    fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    fn generate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError> {
        let src = match ctx.input("in")? {
            Some(src) => src,
            None => {
                let text = format!("{} (Volume): input 'in' unconnected, bypassed", ctx.id());
                ctx.comment(Section::Main, text);
                return Ok(());
            }
        };
        let out = ctx.output("out")?;
        match ctx.input("level")? {
            Some(level) => {
                ctx.emit(Section::Main, "ldax", &[&src]);
                ctx.emit(Section::Main, "mulx", &[&level]);
            }
            None => {
                let level = format_number(ctx.param("level")?);
                ctx.emit(Section::Main, "rdax", &[&src, &level]);
            }
        }
        ctx.emit(Section::Main, "wrax", &[&out, "0.0"]);
        Ok(())
    }
}
