//! Config file loading and resolution into a [`ProcessingConfig`].
//!
//! The YAML file supplies site defaults (tool locations, format tables,
//! colorspaces); command-line flags override it. Everything is folded into
//! one immutable [`ProcessingConfig`] here so the pipeline never touches the
//! environment again.

use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use debayer_core::{DebayerEngine, ExposureMode, FormatSettings, ProcessingConfig};

use crate::Cli;

/// Config file names searched in the working directory when `--config` is
/// not given.
const CONFIG_FILENAMES: &[&str] = &["debayer.yaml", "debayer.yml"];

/// External tool locations; bare names are looked up on `$PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutableLocations {
    pub dcraw: Option<String>,
    pub rawtherapee_cli: Option<String>,
    pub oiiotool: Option<String>,
    pub exiftool: Option<String>,
}

/// Raw shape of the YAML config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub executable_locations: ExecutableLocations,
    pub rt_default_profile: Option<PathBuf>,
    pub possible_output_formats: Vec<String>,
    pub default_output_formats: Vec<String>,
    pub compression: HashMap<String, Vec<String>>,
    pub datatype: HashMap<String, String>,
    pub debayer_engine: String,
    pub colorspace_in: String,
    pub colorspaces_out: HashMap<String, String>,
    pub autoexpose: String,
    pub autoexposure_target: f32,
    pub autoexposure_center_percentage: f32,
    pub default_ocioconfig: Option<PathBuf>,
    pub resize_filter: Option<String>,
    pub default_format_resize: HashMap<String, String>,
    pub raw_formats: Vec<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            executable_locations: ExecutableLocations::default(),
            rt_default_profile: None,
            possible_output_formats: strings(&["exr", "tif", "jpg"]),
            default_output_formats: strings(&["exr"]),
            compression: HashMap::from([
                ("exr".into(), strings(&["--compression", "dwaa:45"])),
                ("tif".into(), strings(&["--compression", "zip"])),
                ("jpg".into(), strings(&["--quality", "92"])),
            ]),
            datatype: HashMap::from([
                ("exr".into(), "half".into()),
                ("tif".into(), "uint16".into()),
                ("jpg".into(), "uint8".into()),
            ]),
            debayer_engine: "dcraw".into(),
            colorspace_in: "lin_ap0".into(),
            colorspaces_out: HashMap::from([
                ("exr".into(), "lin_ap1".into()),
                ("tif".into(), "lin_ap1".into()),
                ("jpg".into(), "out_rec709".into()),
            ]),
            autoexpose: "none".into(),
            autoexposure_target: 0.18,
            autoexposure_center_percentage: 0.2,
            default_ocioconfig: None,
            resize_filter: None,
            default_format_resize: HashMap::new(),
            raw_formats: strings(&[
                "crw", "cr2", "cr3", "nef", "nrw", "arw", "srf", "sr2", "raf", "orf", "rw2",
                "dng", "pef", "3fr", "fff", "iiq", "x3f",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl FileConfig {
    /// Loads the explicit config file, or the first candidate found in the
    /// working directory, or built-in defaults.
    pub fn load(custom: Option<&Path>) -> Result<Self> {
        if let Some(path) = custom {
            return Self::parse_file(path);
        }
        for name in CONFIG_FILENAMES {
            let candidate = PathBuf::from(name);
            if candidate.is_file() {
                return Self::parse_file(&candidate);
            }
        }
        debug!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }
}

/// Everything `main` needs after resolution.
pub struct Resolved {
    pub config: ProcessingConfig,
    /// Canonicalized input paths.
    pub inputs: Vec<PathBuf>,
    /// Keeps a rewritten aberration profile alive for the length of the run.
    #[allow(dead_code)]
    profile_guard: Option<tempfile::NamedTempFile>,
}

/// Folds the config file and CLI flags into a [`ProcessingConfig`].
pub fn resolve(file: FileConfig, cli: &Cli) -> Result<Resolved> {
    let engine = match file.debayer_engine.as_str() {
        "dcraw" => DebayerEngine::Dcraw,
        "rt" | "rawtherapee" => DebayerEngine::RawTherapee,
        other => bail!("unknown debayer engine {other:?}, expected \"dcraw\" or \"rt\""),
    };

    let engine_path = match engine {
        DebayerEngine::Dcraw => {
            required_tool(file.executable_locations.dcraw.as_deref(), "dcraw")?
        }
        DebayerEngine::RawTherapee => required_tool(
            file.executable_locations.rawtherapee_cli.as_deref(),
            "rawtherapee-cli",
        )?,
    };
    let converter_path = required_tool(file.executable_locations.oiiotool.as_deref(), "oiiotool")?;
    let metadata_tool = optional_tool(file.executable_locations.exiftool.as_deref(), "exiftool");

    let (rt_profile, profile_guard) = resolve_profile(&file, cli, engine)?;

    let output_formats = match &cli.output_formats {
        Some(list) => split_list(list),
        None => file.default_output_formats.clone(),
    };
    for format in &output_formats {
        if !file.possible_output_formats.contains(format) {
            bail!(
                "unknown output format {format:?}, expected one of {}",
                file.possible_output_formats.join(", ")
            );
        }
    }

    let colorspaces_out = match &cli.colorspaces_out {
        Some(spec) => parse_colorspaces(spec),
        None => file.colorspaces_out.clone(),
    };

    let formats = file
        .possible_output_formats
        .iter()
        .map(|format| {
            let settings = FormatSettings {
                datatype: file.datatype.get(format).cloned(),
                compression: file.compression.get(format).cloned().unwrap_or_default(),
                resize: file.default_format_resize.get(format).cloned(),
                colorspace_out: colorspaces_out.get(format).cloned(),
            };
            (format.clone(), settings)
        })
        .collect();

    let exposure = if let Some(gain) = cli.exposure {
        ExposureMode::Fixed(gain)
    } else if cli.autoexpose_each {
        ExposureMode::PerFrame
    } else if cli.autoexpose {
        ExposureMode::Static
    } else {
        match file.autoexpose.as_str() {
            "a" => ExposureMode::Static,
            "ae" => ExposureMode::PerFrame,
            _ => ExposureMode::None,
        }
    };

    let dest_root = match &cli.output {
        Some(path) => expand_user(path),
        None => env::current_dir().context("cannot determine the current directory")?,
    };
    std::fs::create_dir_all(&dest_root)
        .with_context(|| format!("cannot create output directory {}", dest_root.display()))?;

    let inputs = cli
        .input_paths
        .iter()
        .map(|path| {
            let expanded = expand_user(path);
            expanded.canonicalize().unwrap_or(expanded)
        })
        .collect();

    let config = ProcessingConfig {
        engine,
        engine_path,
        converter_path,
        metadata_tool,
        rt_profile,
        output_formats,
        formats,
        resize: cli.resize.clone(),
        resize_filter: file.resize_filter.clone(),
        colorspace_in: file.colorspace_in.clone(),
        ocio_config: resolve_ocio(&file, cli),
        exposure,
        autoexposure_target: file.autoexposure_target,
        autoexposure_center: file.autoexposure_center_percentage,
        overwrite: cli.overwrite,
        exclude: cli.search_exclude.as_deref().map(split_list).unwrap_or_default(),
        include: cli.search_include.as_deref().map(split_list).unwrap_or_default(),
        dest_root,
        raw_extensions: file.raw_formats.iter().map(|e| e.to_lowercase()).collect(),
        threads: cli.threads,
    };

    Ok(Resolved {
        config,
        inputs,
        profile_guard,
    })
}

/// Profile selection, with the chromatic aberration rewrite.
///
/// `--aberration` flips `CA=false` to `CA=true` in a temp copy of the
/// profile; the original file on disk is never modified.
fn resolve_profile(
    file: &FileConfig,
    cli: &Cli,
    engine: DebayerEngine,
) -> Result<(Option<PathBuf>, Option<tempfile::NamedTempFile>)> {
    let profile = cli
        .profile
        .as_deref()
        .or(file.rt_default_profile.as_deref())
        .map(expand_user);
    let Some(profile) = profile else {
        return Ok((None, None));
    };

    if cli.aberration && engine == DebayerEngine::RawTherapee {
        let contents = std::fs::read_to_string(&profile)
            .with_context(|| format!("failed to read profile {}", profile.display()))?;
        let rewritten = contents.replace("CA=false", "CA=true");
        let mut tmp = tempfile::Builder::new()
            .prefix("debayer")
            .suffix(".pp3")
            .tempfile()
            .context("failed to create temp profile")?;
        tmp.write_all(rewritten.as_bytes())
            .context("failed to write temp profile")?;
        debug!(path = %tmp.path().display(), "using aberration-corrected profile copy");
        let path = tmp.path().to_path_buf();
        return Ok((Some(path), Some(tmp)));
    }
    if cli.aberration {
        warn!("--aberration only applies to the rawtherapee engine, ignoring");
    }
    Ok((Some(profile), None))
}

/// OCIO config precedence: flag, then `$OCIO`, then the config file default.
/// A path that does not exist degrades to no color management.
fn resolve_ocio(file: &FileConfig, cli: &Cli) -> Option<PathBuf> {
    let candidate = cli
        .ocioconfig
        .as_deref()
        .map(expand_user)
        .or_else(|| env::var_os("OCIO").map(PathBuf::from))
        .or_else(|| file.default_ocioconfig.as_deref().map(expand_user))?;
    if candidate.is_file() {
        Some(candidate)
    } else {
        warn!(
            path = %candidate.display(),
            "OCIO config not found, output will not be color managed"
        );
        None
    }
}

fn required_tool(configured: Option<&str>, default_name: &str) -> Result<PathBuf> {
    let spec = configured.unwrap_or(default_name);
    find_executable(spec)
        .with_context(|| format!("required tool {spec:?} not found, check executable_locations"))
}

fn optional_tool(configured: Option<&str>, default_name: &str) -> Option<PathBuf> {
    let spec = configured.unwrap_or(default_name);
    let found = find_executable(spec).ok();
    if found.is_none() {
        debug!(tool = spec, "optional tool not found");
    }
    found
}

/// Locates an executable. Specs with a path separator are taken as paths;
/// bare names are searched on `$PATH`.
fn find_executable(spec: &str) -> Result<PathBuf> {
    let candidate = expand_user(Path::new(spec));
    if candidate.components().count() > 1 || candidate.is_absolute() {
        if candidate.is_file() {
            return Ok(candidate);
        }
        bail!("{} does not exist", candidate.display());
    }
    let path_var = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path_var) {
        let full = dir.join(spec);
        if full.is_file() {
            return Ok(full);
        }
    }
    bail!("{spec} not found on PATH");
}

fn expand_user(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn split_list(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Per-format colorspace spec: `fmt:space` entries separated by commas; a
/// bare colorspace applies to exr.
fn parse_colorspaces(spec: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for entry in split_list(spec) {
        match entry.split_once(':') {
            Some((format, space)) => {
                out.insert(format.trim().to_string(), space.trim().to_string());
            }
            None => {
                out.insert("exr".to_string(), entry);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs::File;
    use tempfile::TempDir;

    fn write_tool(dir: &TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        File::create(&path).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// A file config whose tool paths exist, pointing into a temp dir.
    fn test_file_config(dir: &TempDir) -> FileConfig {
        FileConfig {
            executable_locations: ExecutableLocations {
                dcraw: Some(write_tool(dir, "dcraw")),
                rawtherapee_cli: None,
                oiiotool: Some(write_tool(dir, "oiiotool")),
                exiftool: None,
            },
            ..FileConfig::default()
        }
    }

    fn parse_cli(dir: &TempDir, extra: &[&str]) -> Cli {
        let out = dir.path().join("out");
        let mut args = vec![
            "debayer".to_string(),
            dir.path().to_string_lossy().into_owned(),
            "-o".to_string(),
            out.to_string_lossy().into_owned(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        Cli::parse_from(args)
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "
debayer_engine: rt
rt_default_profile: /profiles/neutral.pp3
default_output_formats: [exr, jpg]
datatype:
  exr: half
  jpg: uint8
compression:
  exr: [\"--compression\", \"dwaa:45\"]
autoexposure_target: 0.2
";
        let config: FileConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.debayer_engine, "rt");
        assert_eq!(
            config.rt_default_profile.as_deref(),
            Some(Path::new("/profiles/neutral.pp3"))
        );
        assert_eq!(config.default_output_formats, vec!["exr", "jpg"]);
        assert_eq!(config.autoexposure_target, 0.2);
        // Unset keys keep their defaults.
        assert_eq!(config.colorspace_in, "lin_ap0");
        assert!(config.raw_formats.contains(&"cr2".to_string()));
    }

    #[test]
    fn test_unknown_yaml_key_rejected() {
        assert!(serde_yaml::from_str::<FileConfig>("debayer_enigne: dcraw").is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &[]);
        let resolved = resolve(test_file_config(&dir), &cli).unwrap();
        let config = &resolved.config;
        assert_eq!(config.engine, DebayerEngine::Dcraw);
        assert_eq!(config.output_formats, vec!["exr"]);
        assert_eq!(config.exposure, ExposureMode::None);
        assert_eq!(config.threads, 1);
        assert!(!config.overwrite);
        assert_eq!(
            config.settings("exr").datatype.as_deref(),
            Some("half")
        );
        assert_eq!(
            config.settings("jpg").colorspace_out.as_deref(),
            Some("out_rec709")
        );
        assert!(resolved.config.dest_root.is_dir());
    }

    #[test]
    fn test_unknown_output_format_rejected() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &["-f", "exr,webm"]);
        assert!(resolve(test_file_config(&dir), &cli).is_err());
    }

    #[test]
    fn test_manual_exposure_beats_autoexpose_flags() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &["-e", "1.5", "-a", "--autoexpose-each"]);
        let resolved = resolve(test_file_config(&dir), &cli).unwrap();
        assert_eq!(resolved.config.exposure, ExposureMode::Fixed(1.5));
    }

    #[test]
    fn test_autoexpose_each_beats_static() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &["-a", "--autoexpose-each"]);
        let resolved = resolve(test_file_config(&dir), &cli).unwrap();
        assert_eq!(resolved.config.exposure, ExposureMode::PerFrame);
    }

    #[test]
    fn test_autoexpose_from_config_file() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &[]);
        let mut file = test_file_config(&dir);
        file.autoexpose = "a".into();
        let resolved = resolve(file, &cli).unwrap();
        assert_eq!(resolved.config.exposure, ExposureMode::Static);
    }

    #[test]
    fn test_colorspace_override_replaces_table() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &["-c", "exr:lin_srgb,jpg:srgb"]);
        let resolved = resolve(test_file_config(&dir), &cli).unwrap();
        assert_eq!(
            resolved.config.settings("exr").colorspace_out.as_deref(),
            Some("lin_srgb")
        );
        assert_eq!(
            resolved.config.settings("jpg").colorspace_out.as_deref(),
            Some("srgb")
        );
        // tif was in the file table but the flag replaces the whole table.
        assert_eq!(resolved.config.settings("tif").colorspace_out, None);
    }

    #[test]
    fn test_bare_colorspace_applies_to_exr() {
        let parsed = parse_colorspaces("lin_ap1");
        assert_eq!(parsed.get("exr").map(String::as_str), Some("lin_ap1"));
    }

    #[test]
    fn test_search_filters_split() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &["--se", "_trash, _old", "--si", "day1"]);
        let resolved = resolve(test_file_config(&dir), &cli).unwrap();
        assert_eq!(resolved.config.exclude, vec!["_trash", "_old"]);
        assert_eq!(resolved.config.include, vec!["day1"]);
    }

    #[test]
    fn test_missing_converter_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &[]);
        let mut file = test_file_config(&dir);
        file.executable_locations.oiiotool =
            Some(dir.path().join("missing").to_string_lossy().into_owned());
        assert!(resolve(file, &cli).is_err());
    }

    #[test]
    fn test_missing_metadata_tool_degrades() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &[]);
        let mut file = test_file_config(&dir);
        file.executable_locations.exiftool =
            Some(dir.path().join("missing").to_string_lossy().into_owned());
        let resolved = resolve(file, &cli).unwrap();
        assert_eq!(resolved.config.metadata_tool, None);
    }

    #[test]
    fn test_aberration_rewrites_profile_copy() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join("neutral.pp3");
        std::fs::write(&profile, "[RAW]\nCA=false\nHotPixelFilter=true\n").unwrap();
        let rt = write_tool(&dir, "rawtherapee-cli");

        let mut file = test_file_config(&dir);
        file.debayer_engine = "rt".into();
        file.executable_locations.rawtherapee_cli = Some(rt);
        file.rt_default_profile = Some(profile.clone());

        let cli = parse_cli(&dir, &["--ca"]);
        let resolved = resolve(file, &cli).unwrap();
        let used = resolved.config.rt_profile.clone().unwrap();
        assert_ne!(used, profile);
        let rewritten = std::fs::read_to_string(&used).unwrap();
        assert!(rewritten.contains("CA=true"));
        assert!(!rewritten.contains("CA=false"));
        // The original profile is untouched.
        assert!(std::fs::read_to_string(&profile).unwrap().contains("CA=false"));
    }

    #[test]
    fn test_missing_ocio_degrades_to_none() {
        let dir = TempDir::new().unwrap();
        let mut file = test_file_config(&dir);
        file.default_ocioconfig = Some(dir.path().join("missing.ocio"));
        let cli = parse_cli(&dir, &[]);
        let resolved = resolve(file, &cli).unwrap();
        assert_eq!(resolved.config.ocio_config, None);
    }

    #[test]
    fn test_ocio_flag_used_when_present() {
        let dir = TempDir::new().unwrap();
        let ocio = dir.path().join("config.ocio");
        File::create(&ocio).unwrap();
        let ocio_arg = ocio.to_string_lossy().into_owned();
        let cli = parse_cli(&dir, &["--ocioconfig", &ocio_arg]);
        let resolved = resolve(test_file_config(&dir), &cli).unwrap();
        assert_eq!(resolved.config.ocio_config, Some(ocio));
    }

    #[test]
    fn test_find_executable_by_path() {
        let dir = TempDir::new().unwrap();
        let tool = write_tool(&dir, "sometool");
        assert!(find_executable(&tool).is_ok());
        assert!(find_executable(
            &dir.path().join("nothere").to_string_lossy()
        )
        .is_err());
    }

    #[test]
    fn test_raw_extensions_lowercased() {
        let dir = TempDir::new().unwrap();
        let cli = parse_cli(&dir, &[]);
        let mut file = test_file_config(&dir);
        file.raw_formats = vec!["CR2".into(), "Dng".into()];
        let resolved = resolve(file, &cli).unwrap();
        assert_eq!(resolved.config.raw_extensions, vec!["cr2", "dng"]);
    }
}
