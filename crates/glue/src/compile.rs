use std::collections::BTreeMap;

use tracing::debug;
use wgpu::naga;

use crate::error::{CompileError, StageDiagnostics};
use crate::preprocess::{self, LineMap, Varyings};
use crate::settings::Setting;
use crate::types::{Stage, DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER};
use crate::uniforms::UniformLayout;

/// Everything needed to build one compositing program.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramDescriptor {
    fragment: String,
    vertex: Option<String>,
    settings: Vec<Setting>,
    preprocessed: bool,
}

impl Default for ProgramDescriptor {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_SHADER)
    }
}

impl ProgramDescriptor {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            vertex: None,
            settings: Vec::new(),
            preprocessed: false,
        }
    }

    /// Replaces the pass-through vertex stage. An empty string keeps the
    /// default.
    pub fn with_vertex(mut self, vertex: impl Into<String>) -> Self {
        let vertex = vertex.into();
        self.vertex = (!vertex.trim().is_empty()).then_some(vertex);
        self
    }

    /// Settings whose uniforms the prelude should declare.
    pub fn with_settings(mut self, settings: Vec<Setting>) -> Self {
        self.settings = settings;
        self
    }

    /// Marks both sources as complete GLSL 450; the preprocessor is skipped.
    pub fn preprocessed(mut self, preprocessed: bool) -> Self {
        self.preprocessed = preprocessed;
        self
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn vertex(&self) -> &str {
        self.vertex.as_deref().unwrap_or(DEFAULT_VERTEX_SHADER)
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    pub fn is_preprocessed(&self) -> bool {
        self.preprocessed
    }

    fn source(&self, stage: Stage) -> &str {
        match stage {
            Stage::Vertex => self.vertex(),
            Stage::Fragment => self.fragment(),
        }
    }
}

/// Both stages parsed and validated, ready to hand to the GPU.
#[derive(Debug)]
pub struct CheckedProgram {
    pub(crate) vertex: naga::Module,
    pub(crate) fragment: naga::Module,
    pub(crate) layout: UniformLayout,
}

impl CheckedProgram {
    /// Uniform block layout reflected from the compiled stages.
    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }
}

struct StageSource {
    stage: Stage,
    source: String,
    line_map: LineMap,
}

impl StageSource {
    fn prepare(descriptor: &ProgramDescriptor, stage: Stage, varyings: &Varyings) -> Self {
        let raw = descriptor.source(stage);
        if descriptor.is_preprocessed() {
            return Self {
                stage,
                source: raw.to_string(),
                line_map: LineMap::identity(raw),
            };
        }
        let processed =
            preprocess::process_with_varyings(raw, stage, descriptor.settings(), varyings);
        Self {
            stage,
            source: processed.source,
            line_map: processed.line_map,
        }
    }

    /// Line in user-authored source for a 1-based line of the compiled
    /// source; 0 when it points into generated code.
    fn original_line(&self, line: u32) -> u32 {
        self.line_map.get(line).unwrap_or(0)
    }
}

/// Runs the front end and validator for both stages without touching the
/// GPU. Diagnostics from both stages are collected before failing.
pub fn check_program(descriptor: &ProgramDescriptor) -> Result<CheckedProgram, CompileError> {
    let varyings = Varyings::collect([descriptor.vertex(), descriptor.fragment()]);
    let vertex = StageSource::prepare(descriptor, Stage::Vertex, &varyings);
    let fragment = StageSource::prepare(descriptor, Stage::Fragment, &varyings);

    match (compile_stage(&vertex), compile_stage(&fragment)) {
        (Ok(vertex), Ok(fragment)) => {
            let layout = UniformLayout::reflect(&fragment)
                .or_else(|| UniformLayout::reflect(&vertex))
                .unwrap_or_default();
            debug!(
                uniforms = layout.len(),
                block_size = layout.size(),
                "program stages compiled"
            );
            Ok(CheckedProgram {
                vertex,
                fragment,
                layout,
            })
        }
        (vertex, fragment) => {
            let mut diagnostics = Vec::new();
            for result in [vertex, fragment] {
                if let Err(stage_diagnostics) = result {
                    diagnostics.extend(stage_diagnostics);
                }
            }
            Err(CompileError::new(diagnostics))
        }
    }
}

fn compile_stage(stage: &StageSource) -> Result<naga::Module, Vec<StageDiagnostics>> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(stage.stage.naga());
    let module = match frontend.parse(&options, &stage.source) {
        Ok(module) => module,
        Err(parse_errors) => {
            let reports = parse_errors
                .errors
                .iter()
                .map(|error| (span_line(&error.meta, &stage.source), error.kind.to_string()));
            return Err(group_by_line(stage, reports));
        }
    };

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    );
    if let Err(error) = validator.validate(&module) {
        let line = error
            .spans()
            .map(|(span, _)| span_line(span, &stage.source))
            .find(|line| *line > 0)
            .unwrap_or(0);
        let message = describe(error.as_inner());
        return Err(group_by_line(stage, std::iter::once((line, message))));
    }

    Ok(module)
}

/// 1-based line of `span` in `source`, or 0 for spans without a location.
fn span_line(span: &naga::Span, source: &str) -> u32 {
    if span.is_defined() {
        span.location(source).line_number
    } else {
        0
    }
}

fn describe(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn group_by_line(
    stage: &StageSource,
    reports: impl Iterator<Item = (u32, String)>,
) -> Vec<StageDiagnostics> {
    let mut by_line: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for (line, message) in reports {
        let original = if line == 0 {
            0
        } else {
            stage.original_line(line)
        };
        by_line.entry(original).or_default().push(message);
    }
    by_line
        .into_iter()
        .map(|(line, messages)| StageDiagnostics {
            stage: stage.stage,
            line,
            messages,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingKind;
    use crate::uniforms::SlotType;

    #[test]
    fn default_program_compiles() {
        let checked = check_program(&ProgramDescriptor::default()).expect("default program");
        let resolution = checked.layout().resolution().expect("resolution member");
        assert_eq!(resolution.offset, 0);
        assert_eq!(resolution.ty, SlotType::Vec3);
    }

    #[test]
    fn fragment_error_reports_original_line() {
        let descriptor = ProgramDescriptor::new(
            "void main() {\n  gl_FragColor = vec4(undefined_value);\n}",
        );
        let err = check_program(&descriptor).expect_err("should fail");
        assert!(err.stage(Stage::Vertex).is_empty());
        let fragment = err.stage(Stage::Fragment);
        assert!(!fragment.is_empty());
        assert!(fragment.iter().any(|entry| entry.line == 2));
        assert!(fragment.iter().all(|entry| !entry.messages.is_empty()));
    }

    #[test]
    fn dropped_directives_do_not_shift_lines() {
        let descriptor = ProgramDescriptor::new(
            "use nothing\nvoid main() {\n  gl_FragColor = vec4(missing);\n}",
        );
        let err = check_program(&descriptor).expect_err("should fail");
        let lines: Vec<u32> = err
            .stage(Stage::Fragment)
            .iter()
            .map(|entry| entry.line)
            .collect();
        assert!(lines.contains(&3), "lines: {lines:?}");
    }

    #[test]
    fn vertex_error_leaves_fragment_clean() {
        let descriptor = ProgramDescriptor::default()
            .with_vertex("void main() {\n\n  gl_Position = vec4(nowhere, 1.0);\n}");
        let err = check_program(&descriptor).expect_err("should fail");
        assert!(err.stage(Stage::Fragment).is_empty());
        assert!(err
            .stage(Stage::Vertex)
            .iter()
            .any(|entry| entry.line == 3));
    }

    #[test]
    fn settings_become_uniform_slots() {
        let mut tint = Setting::new("tint", SettingKind::Color);
        tint.alpha = Some(true);
        let descriptor = ProgramDescriptor::new(
            "void main() {\n  gl_FragColor = enabled ? tint * strength : vec4(float(steps));\n}",
        )
        .with_settings(vec![
            Setting::new("strength", SettingKind::Float),
            tint,
            Setting::new("enabled", SettingKind::Boolean),
            Setting::new("steps", SettingKind::Integer),
        ]);
        let checked = check_program(&descriptor).expect("compiles");
        let layout = checked.layout();
        assert_eq!(layout.slot("strength").map(|slot| slot.ty), Some(SlotType::Float));
        assert_eq!(layout.slot("tint").map(|slot| slot.ty), Some(SlotType::Vec4));
        assert_eq!(layout.slot("enabled").map(|slot| slot.ty), Some(SlotType::Int));
        assert_eq!(layout.slot("steps").map(|slot| slot.ty), Some(SlotType::Int));
        assert!(layout.slot("missing").is_none());
        // vec3 resolution is followed by a scalar in the same 16-byte row.
        assert_eq!(layout.slot("strength").map(|slot| slot.offset), Some(12));
    }

    #[test]
    fn preprocessed_sources_use_identity_lines() {
        let fragment = "#version 450\nlayout(location = 0) out vec4 color;\nvoid main() {\n  color = vec4(oops);\n}";
        let vertex = "#version 450\nvoid main() {\n  gl_Position = vec4(0.0);\n}";
        let descriptor = ProgramDescriptor::new(fragment)
            .with_vertex(vertex)
            .preprocessed(true);
        let err = check_program(&descriptor).expect_err("should fail");
        assert!(err
            .stage(Stage::Fragment)
            .iter()
            .any(|entry| entry.line == 4));
    }

    #[test]
    fn empty_vertex_keeps_default() {
        let descriptor = ProgramDescriptor::default().with_vertex("   ");
        assert_eq!(descriptor.vertex(), DEFAULT_VERTEX_SHADER);
    }

    #[test]
    fn varyings_link_vertex_to_fragment() {
        let descriptor = ProgramDescriptor::new(
            "varying vec2 uv;\nvoid main() {\n  gl_FragColor = vec4(uv, 0.0, 1.0);\n}",
        )
        .with_vertex(
            "attribute vec3 position;\nvarying vec2 uv;\nvoid main() {\n  uv = position.xy;\n  gl_Position = vec4(position, 1.0);\n}",
        );
        check_program(&descriptor).expect("varyings compile");
    }

    #[test]
    fn vertex_stage_can_sample_the_input() {
        let descriptor = ProgramDescriptor::default().with_vertex(
            "void main() {\n  float lift = texture2D(iTexture, vec2(0.5)).r;\n  gl_Position = vec4(position.xy, lift, 1.0);\n}",
        );
        check_program(&descriptor).expect("vertex texture2D compiles");
    }

    #[test]
    fn settings_named_like_generated_code_are_skipped() {
        let descriptor = ProgramDescriptor::new(
            "void main() {\n  gl_FragColor = texture2D(iTexture, gl_FragCoord.xy / iResolution.xy);\n}",
        )
        .with_settings(vec![
            Setting::new("texture", SettingKind::Float),
            Setting::new("glue_texture", SettingKind::Float),
            Setting::new("amount", SettingKind::Float),
        ]);
        let checked = check_program(&descriptor).expect("reserved keys are skipped");
        assert!(checked.layout().slot("texture").is_none());
        assert!(checked.layout().slot("glue_texture").is_none());
        assert!(checked.layout().slot("amount").is_some());
    }

    #[test]
    fn math_module_functions_are_callable() {
        let descriptor = ProgramDescriptor::new(
            "@use math\nvoid main() {\n  float angle = atan2(0.5, 0.5) / PI;\n  gl_FragColor = vec4(pow2(angle), pow3(angle), pow4(angle), EPSILON + 1.0);\n}",
        );
        check_program(&descriptor).expect("math module compiles");
    }

    #[test]
    fn inlined_module_does_not_shift_lines() {
        let descriptor =
            ProgramDescriptor::new("use math\nvoid main() {\n  gl_FragColor = vec4(bad_value);\n}");
        let err = check_program(&descriptor).expect_err("should fail");
        let lines: Vec<u32> = err
            .stage(Stage::Fragment)
            .iter()
            .map(|entry| entry.line)
            .collect();
        assert!(lines.contains(&3), "lines: {lines:?}");
        assert!(!lines.contains(&1), "module body blamed: {lines:?}");
    }
}
