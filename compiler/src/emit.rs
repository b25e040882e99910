// emit.rs — Assembly text formatting
//
// Lays out the banner, header declarations and the four code sections into
// the program text handed to the optimizer and the encoder. Section
// boundaries are marked by a fixed rule/title/rule triple that the textual
// optimizer passes rely on to find the input/main boundary.
//
// Preconditions: `ctx` holds fully generated (and possibly elided) sections.
// Postconditions: empty sections are omitted; init code is skipped after
//                 the first tick via `skp run, init_done`.
// Failure modes: none.
// Side effects: none.

use crate::alloc::CodegenContext;
use crate::graph::Metadata;
use crate::ir::{IrNode, Section};

/// Width of the `=`/`-` rules after the leading `; `.
const RULE_WIDTH: usize = 58;

/// Label closing the first-tick initialization block.
pub const INIT_LABEL: &str = "init_done";

pub fn banner_rule() -> String {
    format!("; {}", "=".repeat(RULE_WIDTH))
}

pub fn section_rule() -> String {
    format!("; {}", "-".repeat(RULE_WIDTH))
}

/// The title line between a section's two rules.
pub fn heading(section: Section) -> String {
    format!("; {}", section.title())
}

/// Format the complete program.
pub fn assemble(metadata: &Metadata, ctx: &CodegenContext, parameter_comments: bool) -> String {
    let mut out = banner(metadata);

    if parameter_comments && !ctx.parameter_mappings().is_empty() {
        out.push(";".to_string());
        out.push("; Parameter mapping:".to_string());
        out.extend(ctx.parameter_mappings().iter().map(|m| format!(";   {m}")));
    }

    let declarations = ctx.header_declarations();
    if !declarations.is_empty() {
        out.push(String::new());
        out.extend(declarations);
    }

    for section in Section::CODE {
        let lines = ctx.sections().get(section);
        if lines.is_empty() {
            continue;
        }
        out.push(String::new());
        out.push(section_rule());
        out.push(heading(section));
        out.push(section_rule());
        if section == Section::Init {
            let skip = IrNode::new(
                Section::Init,
                "skp",
                vec!["run".to_string(), INIT_LABEL.to_string()],
            );
            out.push(skip.to_string());
        }
        out.extend(lines.iter().map(|l| l.to_string()));
        if section == Section::Init {
            out.push(format!("{INIT_LABEL}:"));
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

fn banner(metadata: &Metadata) -> Vec<String> {
    let name = if metadata.name.trim().is_empty() {
        "Untitled"
    } else {
        metadata.name.trim()
    };
    let mut out = vec![
        banner_rule(),
        format!("; {name}"),
        format!("; Generated by fxc {}", env!("CARGO_PKG_VERSION")),
        banner_rule(),
    ];
    if let Some(author) = metadata.author.as_deref().filter(|a| !a.trim().is_empty()) {
        out.push(format!("; Author: {}", author.trim()));
    }
    if let Some(description) = metadata.description.as_deref() {
        out.extend(
            description
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| format!("; {}", l.trim_end())),
        );
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;

    fn meta(name: &str) -> Metadata {
        Metadata {
            name: name.to_string(),
            ..Metadata::default()
        }
    }

    #[test]
    fn empty_program_is_banner_only() {
        let ctx = CodegenContext::new(TargetConfig::default());
        let text = assemble(&meta("Test"), &ctx, true);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "; Test");
        assert!(lines[2].starts_with("; Generated by fxc "));
        assert_eq!(lines[0], lines[3]);
    }

    #[test]
    fn author_and_description_follow_banner() {
        let ctx = CodegenContext::new(TargetConfig::default());
        let m = Metadata {
            name: "Echo".to_string(),
            author: Some("Ada".to_string()),
            description: Some("line one\n\nline two".to_string()),
        };
        let text = assemble(&m, &ctx, true);
        assert!(text.contains("; Author: Ada\n; line one\n; line two\n"));
    }

    #[test]
    fn untitled_graph_gets_placeholder_name() {
        let ctx = CodegenContext::new(TargetConfig::default());
        assert!(assemble(&meta("  "), &ctx, true).contains("; Untitled\n"));
    }

    #[test]
    fn init_is_wrapped_and_empty_sections_omitted() {
        let mut ctx = CodegenContext::new(TargetConfig::default());
        ctx.emit(IrNode::new(
            Section::Init,
            "wlds",
            vec!["SIN0".into(), "40".into(), "32767".into()],
        ));
        ctx.emit(IrNode::new(Section::Main, "clr", vec![]));
        let text = assemble(&meta("t"), &ctx, true);
        assert!(text.contains("; Initialization\n"));
        assert!(text.contains("skp   run, init_done\nwlds  SIN0, 40, 32767\ninit_done:\n"));
        assert!(text.contains("; Main Program\n"));
        assert!(!text.contains("; Input Section"));
        assert!(!text.contains("; Output Section"));
    }

    #[test]
    fn parameter_mapping_respects_option() {
        let mut ctx = CodegenContext::new(TargetConfig::default());
        ctx.add_parameter_mapping("POT0 -> knob");
        let with = assemble(&meta("t"), &ctx, true);
        assert!(with.contains("; Parameter mapping:\n;   POT0 -> knob\n"));
        let without = assemble(&meta("t"), &ctx, false);
        assert!(!without.contains("Parameter mapping"));
    }

    #[test]
    fn declarations_precede_sections() {
        let mut ctx = CodegenContext::new(TargetConfig::default());
        let alias = ctx.allocate("a", "out").unwrap();
        ctx.emit(IrNode::new(
            Section::Main,
            "wrax",
            vec![alias.clone(), "0.0".into()],
        ));
        let text = assemble(&meta("t"), &ctx, true);
        let equ = text.find("equ a_out REG0").unwrap();
        let main = text.find("; Main Program").unwrap();
        assert!(equ < main);
    }
}
