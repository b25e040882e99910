// library.rs — Template-based effect blocks
//
// Each entry pairs a descriptor with template source. Every template starts
// and ends with a clear accumulator in the main section.

use crate::registry::{BlockCategory, BlockDescriptor, ParamSpec, PortSpec};
use crate::units::Conversion;

const GAIN: &str = "\
// Gain stage; gains above the coefficient range become repeated reads.
@gain ${input.in} ${param.gain} ${output.out}
";

const LOWPASS: &str = "\
@reg state
@onepole ${input.in} ${reg.state} ${param.freq}
wrax ${output.out}, 0.0
";

// Chamberlin state-variable filter:
//   lp += f*bp;  hp = in - lp - d*bp;  bp += f*hp
const SVF: &str = "\
@reg lp
@reg bp
@tmp hp
@let damp = -min(1.99, 1 / display.q)
rdax ${reg.bp}, ${param.freq}
rdax ${reg.lp}, 1.0
wrax ${reg.lp}, -1.0
rdax ${input.in}, 1.0
rdax ${reg.bp}, ${local.damp}
wrax ${local.hp}, ${param.freq}
rdax ${reg.bp}, 1.0
wrax ${reg.bp}, 0.0
@if display.mode == 0
  rdax ${reg.lp}, 1.0             ; lowpass
@else
  @if display.mode == 1
    rdax ${reg.bp}, 1.0           ; bandpass
  @else
    rdax ${local.hp}, 1.0         ; highpass
  @endif
@endif
wrax ${output.out}, 0.0
";

const DELAY: &str = "\
@mem line param.time + 1
@let dry = 1 - param.mix
rda ${mem.line}#, ${param.feedback}
rdax ${input.in}, 1.0
wra ${mem.line}, 0.0
rdax ${input.in}, ${local.dry}
rda ${mem.line}#, ${param.mix}
wrax ${output.out}, 0.0
";

const TREMOLO: &str = "\
@tmp gain
@let half = display.depth / 2
@let base = 1 - half
@lfo ${param.rate} 32767 ${local.gain}
rdax ${local.gain}, ${local.half}
sof 1.0, ${local.base}
wrax ${local.gain}, 0.0
ldax ${input.in}
mulx ${local.gain}
wrax ${output.out}, 0.0
";

const CHORUS: &str = "\
@mem line 2 * param.depth + 64
@let amp = min(32767, param.depth * 16)
@let center = ceil(param.depth) + 2
@let dry = 1 - param.mix
@lfo ${param.rate} ${local.amp}
ldax ${input.in}
wra ${mem.line}, 0.0
@chorus_tap ${mem.line} ${local.lfo} ${local.center} ${output.out}
rdax ${output.out}, ${param.mix}
rdax ${input.in}, ${local.dry}
wrax ${output.out}, 0.0
";

const SMOOTHER: &str = "\
@reg state
@smooth ${input.in} ${reg.state} ${param.cutoff}
wrax ${output.out}, 0.0
";

const CONTROL_RANGE: &str = "\
// Map a 0..1 control onto min..max.
@if display.max < display.min
  ; inverted range
@endif
@coef ${input.in} ${param.min} ${param.max} ${output.out}
";

fn effect(tag: &str, name: &str) -> BlockDescriptor {
    BlockDescriptor::new(tag, name, BlockCategory::Effect)
        .with_input(PortSpec::audio("in", "In").required())
        .with_output(PortSpec::audio("out", "Out"))
}

fn control(tag: &str, name: &str) -> BlockDescriptor {
    BlockDescriptor::new(tag, name, BlockCategory::Control)
        .with_input(PortSpec::control("in", "In").required())
        .with_output(PortSpec::control("out", "Out"))
}

/// Descriptor and template source for every template-based block.
pub fn templates() -> Vec<(BlockDescriptor, &'static str)> {
    vec![
        (
            effect("gain", "Gain").with_param(
                ParamSpec::new("gain", "Gain", 0.0, -40.0, 12.0).convert(Conversion::Decibels),
            ),
            GAIN,
        ),
        (
            effect("lowpass", "Lowpass").with_param(
                ParamSpec::new("freq", "Cutoff", 1000.0, 20.0, 12_000.0)
                    .convert(Conversion::OnePoleHz),
            ),
            LOWPASS,
        ),
        (
            effect("svf", "State Variable Filter")
                .with_param(
                    ParamSpec::new("freq", "Frequency", 800.0, 20.0, 8_000.0)
                        .convert(Conversion::SvfHz),
                )
                .with_param(ParamSpec::new("q", "Resonance", 0.707, 0.55, 10.0))
                .with_param(ParamSpec::new("mode", "Mode", 0.0, 0.0, 2.0)),
            SVF,
        ),
        (
            effect("delay", "Delay")
                .with_param(
                    ParamSpec::new("time", "Time", 300.0, 1.0, 900.0)
                        .convert(Conversion::Milliseconds),
                )
                .with_param(ParamSpec::new("feedback", "Feedback", 0.4, 0.0, 0.95))
                .with_param(ParamSpec::new("mix", "Mix", 0.5, 0.0, 1.0)),
            DELAY,
        ),
        (
            effect("tremolo", "Tremolo")
                .with_param(
                    ParamSpec::new("rate", "Rate", 4.0, 0.1, 20.0).convert(Conversion::LfoRate),
                )
                .with_param(ParamSpec::new("depth", "Depth", 0.5, 0.05, 1.0)),
            TREMOLO,
        ),
        (
            effect("chorus", "Chorus")
                .with_param(
                    ParamSpec::new("rate", "Rate", 0.8, 0.1, 5.0).convert(Conversion::LfoRate),
                )
                .with_param(
                    ParamSpec::new("depth", "Depth", 5.0, 0.5, 20.0)
                        .convert(Conversion::Milliseconds),
                )
                .with_param(ParamSpec::new("mix", "Mix", 0.5, 0.0, 1.0)),
            CHORUS,
        ),
        (
            control("smoother", "Control Smoother").with_param(
                ParamSpec::new("cutoff", "Cutoff", 5.0, 0.1, 50.0).convert(Conversion::OnePoleHz),
            ),
            SMOOTHER,
        ),
        (
            control("control_range", "Control Range")
                .with_param(ParamSpec::new("min", "Minimum", 0.0, 0.0, 0.99))
                .with_param(ParamSpec::new("max", "Maximum", 1.0, 0.0, 1.0)),
            CONTROL_RANGE,
        ),
    ]
}
