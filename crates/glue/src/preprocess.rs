//! Turns user-authored shader source into GLSL 450 that `naga` accepts.
//!
//! Steps performed for each stage:
//!
//! 1. Emit the fixed prelude: version and precision, the position attribute
//!    (vertex only), the `GlueParams` uniform block holding `iResolution` and
//!    one member per declarable setting, the `iTexture` sampler, and the
//!    WebGL-style aliases (`texture2D` for both stages, `gl_FragColor` for
//!    fragments).
//! 2. Copy user lines, inlining `use <module>` directives on first
//!    occurrence, blanking redeclarations of prelude-owned names, and
//!    turning `varying` declarations into located stage outputs (vertex)
//!    or inputs (fragment).
//! 3. Record a [`LineMap`] from every emitted user line back to the line the
//!    user wrote, so diagnostics point at the editor, not at the prelude.
//!
//! The transform is pure: identical input yields identical output.
use std::collections::{BTreeMap, HashSet};

use tracing::{trace, warn};

use crate::settings::{is_identifier, Setting};
use crate::types::Stage;

/// Prefix of every block member synthesized for a setting.
pub(crate) const SETTING_MEMBER_PREFIX: &str = "glue_";
/// Name of the block member that carries `iResolution`.
pub(crate) const RESOLUTION_MEMBER: &str = "resolution";

const MATH_MODULE: &str = "#define PI 3.1415926538
#define PI2 6.283185307179586
#define PI_HALF 1.5707963267948966
#define RECIPROCAL_PI 0.3183098861837907
#define RECIPROCAL_PI2 0.15915494309189535
#define EPSILON 1e-6

float pow2(in float x) { return x*x; }
float pow3(in float x) { return x*x*x; }
float pow4(in float x) { float x2 = x*x; return x2*x2; }

float atan2(in float a, in float b) { return asin(a) > 0.0 ? acos(b) : -acos(b); }";

/// Library modules available to `use` directives.
pub const MODULES: [(&str, &str); 1] = [("math", MATH_MODULE)];

fn module_source(name: &str) -> Option<&'static str> {
    MODULES
        .iter()
        .find(|(module, _)| *module == name)
        .map(|(_, source)| *source)
}

/// Maps 1-based lines of transformed source to 1-based lines of the source
/// the user wrote. Prelude lines have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    entries: BTreeMap<u32, u32>,
}

impl LineMap {
    /// Map for source that was not transformed: every line maps to itself.
    pub fn identity(source: &str) -> Self {
        let count = source.split('\n').count() as u32;
        Self {
            entries: (1..=count).map(|line| (line, line)).collect(),
        }
    }

    fn insert(&mut self, output_line: u32, input_line: u32) {
        self.entries.insert(output_line, input_line);
    }

    pub fn get(&self, output_line: u32) -> Option<u32> {
        self.entries.get(&output_line).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().map(|(output, input)| (*output, *input))
    }
}

/// Interface locations for `varying` declarations.
///
/// A location is the index of the name's first declaration across the
/// sources the table was collected from. Both stages of a program must be
/// processed with the same table so vertex outputs meet fragment inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Varyings {
    names: Vec<String>,
}

impl Varyings {
    pub fn collect<'a>(sources: impl IntoIterator<Item = &'a str>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for source in sources {
            for declaration in source.lines().filter_map(parse_varying) {
                for name in declaration.names {
                    if !names.iter().any(|known| known == name) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        Self { names }
    }

    pub fn location(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|known| known == name)
            .map(|index| index as u32)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

struct VaryingDeclaration<'a> {
    ty: &'a str,
    names: Vec<&'a str>,
}

const PRECISION_QUALIFIERS: [&str; 3] = ["lowp", "mediump", "highp"];

/// Parses `varying [precision] <type> <name>[, <name>...];`. Anything after
/// the semicolon is dropped. Arrays and other shapes are left to the
/// compiler to reject.
fn parse_varying(line: &str) -> Option<VaryingDeclaration<'_>> {
    let rest = line.trim_start().strip_prefix("varying")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (body, _) = rest.split_once(';')?;
    let (mut ty, mut names) = body.trim().split_once(char::is_whitespace)?;
    if PRECISION_QUALIFIERS.contains(&ty) {
        (ty, names) = names.trim_start().split_once(char::is_whitespace)?;
    }
    let names: Vec<&str> = names.split(',').map(str::trim).collect();
    if !is_identifier(ty) || !names.iter().all(|name| is_identifier(name)) {
        return None;
    }
    Some(VaryingDeclaration { ty, names })
}

fn rewrite_varying(
    declaration: &VaryingDeclaration<'_>,
    stage: Stage,
    varyings: &Varyings,
) -> Option<String> {
    let direction = match stage {
        Stage::Vertex => "out",
        Stage::Fragment => "in",
    };
    let mut declared = Vec::with_capacity(declaration.names.len());
    for name in &declaration.names {
        let location = varyings.location(name)?;
        declared.push(format!(
            "layout(location = {location}) {direction} {} {name};",
            declaration.ty
        ));
    }
    Some(declared.join(" "))
}

/// Result of preprocessing one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub source: String,
    pub line_map: LineMap,
    /// Number of prelude lines emitted ahead of the first user line.
    pub prefix_lines: u32,
}

/// Preprocesses `source` for `stage` without setting uniforms.
pub fn process(source: &str, stage: Stage) -> Processed {
    process_with_settings(source, stage, &[])
}

/// Preprocesses `source` for `stage`, declaring one uniform per setting.
/// Varying locations come from `source` alone.
pub fn process_with_settings(source: &str, stage: Stage, settings: &[Setting]) -> Processed {
    process_with_varyings(source, stage, settings, &Varyings::collect([source]))
}

/// Preprocesses one stage of a program whose varying locations were
/// collected from both stages.
pub fn process_with_varyings(
    source: &str,
    stage: Stage,
    settings: &[Setting],
    varyings: &Varyings,
) -> Processed {
    let prelude = prelude(stage, settings);
    let prefix_lines = prelude.len() as u32;

    let mut output = String::new();
    for line in &prelude {
        output.push_str(line);
        output.push('\n');
    }

    let mut line_map = LineMap::default();
    let mut next_output_line = prefix_lines + 1;
    let mut included = HashSet::new();

    for (index, raw_line) in source.split('\n').enumerate() {
        let input_line = index as u32 + 1;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if let Some(module) = parse_use_directive(line) {
            if !included.insert(module) {
                trace!(module, input_line, "module already inlined; dropping directive");
                continue;
            }
            match module_source(module) {
                Some(body) => {
                    for module_line in body.split('\n') {
                        output.push_str(module_line);
                        output.push('\n');
                        line_map.insert(next_output_line, input_line);
                        next_output_line += 1;
                    }
                }
                None => trace!(module, input_line, "unknown module; dropping directive"),
            }
            continue;
        }

        if redeclares_prelude(line, stage) {
            output.push('\n');
        } else if let Some(rewritten) = parse_varying(line)
            .and_then(|declaration| rewrite_varying(&declaration, stage, varyings))
        {
            output.push_str(&rewritten);
            output.push('\n');
        } else {
            output.push_str(line);
            output.push('\n');
        }
        line_map.insert(next_output_line, input_line);
        next_output_line += 1;
    }

    Processed {
        source: output,
        line_map,
        prefix_lines,
    }
}

/// Recognises `use <module>` and `@use <module>` lines, with an optional
/// trailing semicolon.
fn parse_use_directive(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix('@').unwrap_or(trimmed);
    let rest = rest.strip_prefix("use")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let name = rest.trim().trim_end_matches(';').trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some(name)
}

/// Lines the user may carry over from WebGL sources that would clash with
/// the prelude: `#version`, and re-declarations of the standard inputs.
fn redeclares_prelude(line: &str, stage: Stage) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("#version") {
        return true;
    }
    let declares = |prefix: &str, name: &str| {
        trimmed.starts_with(prefix)
            && trimmed
                .trim_end()
                .trim_end_matches(';')
                .split_whitespace()
                .last()
                == Some(name)
    };
    declares("uniform ", "iResolution")
        || declares("uniform ", "iTexture")
        || (stage == Stage::Vertex && declares("attribute ", "position"))
}

fn prelude(stage: Stage, settings: &[Setting]) -> Vec<String> {
    let mut lines = vec![
        "#version 450".to_string(),
        "precision mediump float;".to_string(),
    ];
    if stage == Stage::Vertex {
        lines.push("layout(location = 0) in vec3 position;".to_string());
    }

    let declared = declarable_settings(settings);
    lines.push("layout(std140, set = 0, binding = 0) uniform GlueParams {".to_string());
    lines.push(format!("    vec3 {RESOLUTION_MEMBER};"));
    for setting in &declared {
        let ty = match setting.glsl_type() {
            // Uniform blocks cannot hold `bool`; carry it as an int and
            // compare in the alias below.
            "bool" => "int",
            other => other,
        };
        lines.push(format!(
            "    {ty} {SETTING_MEMBER_PREFIX}{};",
            setting.key
        ));
    }
    lines.push("} glue;".to_string());
    lines.push(format!("#define iResolution glue.{RESOLUTION_MEMBER}"));
    for setting in &declared {
        let member = format!("glue.{SETTING_MEMBER_PREFIX}{}", setting.key);
        if setting.glsl_type() == "bool" {
            lines.push(format!("#define {} ({member} != 0)", setting.key));
        } else {
            lines.push(format!("#define {} {member}", setting.key));
        }
    }

    lines.push("layout(set = 1, binding = 0) uniform texture2D glue_texture;".to_string());
    lines.push("layout(set = 1, binding = 1) uniform sampler glue_sampler;".to_string());
    lines.push("#define iTexture sampler2D(glue_texture, glue_sampler)".to_string());

    match stage {
        // Implicit-LOD sampling needs derivatives, which vertex shaders lack.
        Stage::Vertex => lines.push(
            "#define texture2D(tex, coord) textureLod(tex, coord, 0.0)".to_string(),
        ),
        Stage::Fragment => {
            lines.push("layout(location = 0) out vec4 glue_FragColor;".to_string());
            lines.push("#define gl_FragColor glue_FragColor".to_string());
            lines.push("#define texture2D texture".to_string());
        }
    }
    lines
}

/// Settings that become uniform declarations, in list order. Unusable or
/// duplicate keys are skipped.
pub(crate) fn declarable_settings(settings: &[Setting]) -> Vec<&Setting> {
    let mut seen = HashSet::new();
    let mut declared = Vec::with_capacity(settings.len());
    for setting in settings {
        if setting.key.is_empty() {
            continue;
        }
        if !setting.is_declarable() {
            warn!(key = %setting.key, "setting key is not a usable uniform name; skipping");
            continue;
        }
        if !seen.insert(setting.key.as_str()) {
            warn!(key = %setting.key, "duplicate setting key; skipping");
            continue;
        }
        declared.push(setting);
    }
    declared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingKind;

    const SOURCE: &str = "void main()\n{\n  gl_FragColor = vec4(1.0);\n}";

    #[test]
    fn output_is_prefix_plus_input_lines() {
        for stage in [Stage::Vertex, Stage::Fragment] {
            let processed = process(SOURCE, stage);
            let output_lines = processed.source.lines().count() as u32;
            assert_eq!(output_lines, processed.prefix_lines + 4);
            assert_eq!(processed.line_map.len(), 4);
            for (output, input) in processed.line_map.iter() {
                assert_eq!(input, output - processed.prefix_lines);
            }
        }
    }

    #[test]
    fn vertex_prelude_declares_position_only_for_vertex() {
        let vertex = process(SOURCE, Stage::Vertex);
        let fragment = process(SOURCE, Stage::Fragment);
        assert!(vertex.source.contains("in vec3 position;"));
        assert!(!fragment.source.contains("in vec3 position;"));
        assert!(fragment.source.contains("#define gl_FragColor glue_FragColor"));
        assert!(vertex.source.starts_with("#version 450\nprecision mediump float;\n"));
        assert_eq!(vertex.prefix_lines, fragment.prefix_lines - 1);
        assert!(vertex.source.contains("#define texture2D(tex, coord) textureLod("));
    }

    #[test]
    fn standard_uniforms_precede_setting_uniforms() {
        let settings = vec![
            Setting::new("strength", SettingKind::Float),
            Setting::new("enabled", SettingKind::Boolean),
        ];
        let processed = process_with_settings(SOURCE, Stage::Fragment, &settings);
        let resolution = processed.source.find("vec3 resolution;").unwrap();
        let strength = processed.source.find("float glue_strength;").unwrap();
        let enabled = processed.source.find("int glue_enabled;").unwrap();
        let user = processed.source.find("void main()").unwrap();
        assert!(resolution < strength && strength < enabled && enabled < user);
        assert!(processed
            .source
            .contains("#define enabled (glue.glue_enabled != 0)"));
        assert!(processed.source.contains("#define strength glue.glue_strength"));
    }

    #[test]
    fn module_is_inlined_once() {
        let source = "use math\n@use math\nvoid main() {}\nuse math;";
        let processed = process(source, Stage::Fragment);
        assert_eq!(processed.source.matches("#define PI ").count(), 1);
        assert!(!processed.source.contains("use math"));
        // The inlined body maps back to the directive that pulled it in.
        let first_body_line = processed.prefix_lines + 1;
        assert_eq!(processed.line_map.get(first_body_line), Some(1));
        let body_lines = MATH_MODULE.split('\n').count() as u32;
        assert_eq!(
            processed.line_map.get(first_body_line + body_lines),
            Some(3)
        );
    }

    #[test]
    fn unknown_module_is_dropped_silently() {
        let processed = process("use nothing\nvoid main() {}", Stage::Fragment);
        assert!(!processed.source.contains("nothing"));
        assert_eq!(
            processed.line_map.get(processed.prefix_lines + 1),
            Some(2)
        );
        assert_eq!(processed.line_map.len(), 1);
    }

    #[test]
    fn redeclared_standard_uniforms_are_blanked() {
        let source = "#version 100\nuniform vec3 iResolution;\nuniform sampler2D iTexture;\nvoid main() {}";
        let processed = process(source, Stage::Fragment);
        assert_eq!(processed.source.matches("#version").count(), 1);
        assert!(!processed.source.contains("uniform vec3 iResolution"));
        assert_eq!(processed.line_map.len(), 4);
    }

    #[test]
    fn use_directive_requires_a_module_name() {
        assert_eq!(parse_use_directive("  @use math  "), Some("math"));
        assert_eq!(parse_use_directive("use math;"), Some("math"));
        assert_eq!(parse_use_directive("user = 1;"), None);
        assert_eq!(parse_use_directive("use"), None);
        assert_eq!(parse_use_directive("use a b"), None);
    }

    #[test]
    fn processing_is_deterministic() {
        let settings = vec![Setting::new("tint", SettingKind::Color)];
        let first = process_with_settings(SOURCE, Stage::Vertex, &settings);
        let second = process_with_settings(SOURCE, Stage::Vertex, &settings);
        assert_eq!(first, second);
    }

    #[test]
    fn varyings_become_located_stage_interfaces() {
        let vertex = "varying vec2 uv;\nvarying highp float fade, glow; // lit\nvoid main() {}";
        let fragment = "varying float glow;\nvarying vec2 uv;\nvoid main() {}";
        let varyings = Varyings::collect([vertex, fragment]);
        assert_eq!(varyings.len(), 3);
        assert_eq!(varyings.location("glow"), Some(2));

        let vertex = process_with_varyings(vertex, Stage::Vertex, &[], &varyings);
        let fragment = process_with_varyings(fragment, Stage::Fragment, &[], &varyings);
        assert!(vertex.source.contains("layout(location = 0) out vec2 uv;"));
        assert!(vertex.source.contains(
            "layout(location = 1) out float fade; layout(location = 2) out float glow;"
        ));
        assert!(fragment.source.contains("layout(location = 2) in float glow;"));
        assert!(fragment.source.contains("layout(location = 0) in vec2 uv;"));
        assert!(!fragment.source.contains("varying"));
        assert_eq!(vertex.line_map.len(), 3);
    }

    #[test]
    fn malformed_varyings_pass_through() {
        assert!(parse_varying("varying vec2 uv[2];").is_none());
        assert!(parse_varying("varying vec2 uv").is_none());
        assert!(parse_varying("varyingvec2 uv;").is_none());
        let processed = process("varying vec2 uv[2];\nvoid main() {}", Stage::Fragment);
        assert!(processed.source.contains("varying vec2 uv[2];"));
    }
}
