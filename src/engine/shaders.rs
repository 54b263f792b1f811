use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Serialize;

const NOISE_WGSL: &str = include_str!("../../shaders/noise.wgsl");
const VERTEX_WGSL: &str = include_str!("../../shaders/vertex.wgsl");
const FRAGMENT_WGSL: &str = include_str!("../../shaders/fragment.wgsl");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Noise,
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Order in which stages are concatenated into one WGSL module.
    pub const ALL: [ShaderStage; 3] = [Self::Noise, Self::Vertex, Self::Fragment];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Noise => "noise",
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Noise => "noise.wgsl",
            Self::Vertex => "vertex.wgsl",
            Self::Fragment => "fragment.wgsl",
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            Self::Noise => NOISE_WGSL,
            Self::Vertex => VERTEX_WGSL,
            Self::Fragment => FRAGMENT_WGSL,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShaderStage {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "noise" => Ok(Self::Noise),
            "vertex" => Ok(Self::Vertex),
            "fragment" => Ok(Self::Fragment),
            other => bail!("unknown shader stage '{other}' (expected noise, vertex or fragment)"),
        }
    }
}

/// Resolves WGSL sources. Files in the override directory win over the
/// sources compiled into the binary; missing files fall back silently.
#[derive(Debug, Clone, Default)]
pub struct ShaderSourceLoader {
    override_dir: Option<PathBuf>,
}

impl ShaderSourceLoader {
    pub fn embedded() -> Self {
        Self::default()
    }

    pub fn with_override_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(dir.into()),
        }
    }

    pub fn override_dir(&self) -> Option<&Path> {
        self.override_dir.as_deref()
    }

    pub fn load(&self, stage: ShaderStage) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(stage.file_name());
            if path.is_file() {
                tracing::debug!(stage = %stage, path = %path.display(), "loading shader override");
                return fs::read_to_string(&path)
                    .with_context(|| format!("failed to read shader {}", path.display()));
            }
        }
        Ok(stage.embedded().to_owned())
    }

    /// Concatenates every stage into the single module the pipeline compiles.
    pub fn compose_module(&self) -> Result<String> {
        compose_stages(|stage| self.load(stage))
    }
}

pub fn compose_stages(mut load: impl FnMut(ShaderStage) -> Result<String>) -> Result<String> {
    let mut module = String::new();
    for stage in ShaderStage::ALL {
        module.push_str(&format!("// --- {stage} ---\n"));
        module.push_str(&load(stage)?);
        module.push('\n');
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_sources_define_entry_points() {
        let module = ShaderSourceLoader::embedded()
            .compose_module()
            .expect("compose");
        assert!(module.contains("fn vs_main"));
        assert!(module.contains("fn fs_main"));
        assert!(module.find("gs_noise3").expect("noise") < module.find("vs_main").expect("vs"));
    }

    #[test]
    fn override_directory_replaces_only_present_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("fragment.wgsl"), "// custom fragment\n").expect("write");

        let loader = ShaderSourceLoader::with_override_dir(dir.path());
        assert_eq!(
            loader.load(ShaderStage::Fragment).expect("fragment"),
            "// custom fragment\n"
        );
        assert!(loader
            .load(ShaderStage::Vertex)
            .expect("vertex")
            .contains("vs_main"));
    }

    #[test]
    fn parses_stage_names() {
        assert_eq!("vertex".parse::<ShaderStage>().expect("stage"), ShaderStage::Vertex);
        assert!("geometry".parse::<ShaderStage>().is_err());
    }
}
