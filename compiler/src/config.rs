// config.rs — Target limits and compile options
//
// The physical ceilings of the target chip plus the knobs that shape a
// single compilation. Everything defaults to the standard part; a JSON file
// may override any subset of the target fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::graph::LoadError;

// ── Target ──────────────────────────────────────────────────────────────────

/// Resource ceilings of the target chip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetConfig {
    /// General registers (`REG0..REGn-1`).
    pub registers: u32,
    /// Instruction words per program.
    pub instructions: u32,
    /// Delay memory words.
    pub memory: u32,
    /// Sample rate in Hz; every unit conversion depends on it.
    pub sample_rate: f64,
    /// Sine LFOs available to blocks.
    pub lfos: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            registers: 32,
            instructions: 128,
            memory: 32_768,
            sample_rate: 32_768.0,
            lfos: 2,
        }
    }
}

impl TargetConfig {
    /// Load a target description from a JSON file. Missing fields keep
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Compile options ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub target: TargetConfig,
    /// Run the accumulator peephole passes and load elision.
    pub optimize: bool,
    /// Emit the `; Parameter mapping:` comment block.
    pub parameter_comments: bool,
    /// Utilization above which a near-capacity warning is issued.
    pub near_capacity_ratio: f64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            target: TargetConfig::default(),
            optimize: true,
            parameter_comments: true,
            near_capacity_ratio: 0.95,
        }
    }
}

impl CompileOptions {
    pub fn with_target(target: TargetConfig) -> Self {
        CompileOptions {
            target,
            ..CompileOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_standard_part() {
        let t = TargetConfig::default();
        assert_eq!(t.registers, 32);
        assert_eq!(t.instructions, 128);
        assert_eq!(t.memory, 32_768);
        assert_eq!(t.sample_rate, 32_768.0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let t: TargetConfig = serde_json::from_str(r#"{ "instructions": 256 }"#).unwrap();
        assert_eq!(t.instructions, 256);
        assert_eq!(t.registers, 32);
        assert_eq!(t.lfos, 2);
    }

    #[test]
    fn sample_rate_field_is_camel_case() {
        let t: TargetConfig = serde_json::from_str(r#"{ "sampleRate": 48000.0 }"#).unwrap();
        assert_eq!(t.sample_rate, 48_000.0);
    }
}
