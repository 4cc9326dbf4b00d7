use std::path::{Path, PathBuf};

use brj_codegen::OptLevel;
use brj_reader::{read_all, Form, FormKind, ReadError};

pub const MANIFEST_NAME: &str = "brj.pkg";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error: {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("manifest read error: {0}")]
    Read(#[from] ReadError),

    #[error("manifest parse error: [{range}] {message}")]
    Parse { message: String, range: brj_reader::Range },

    #[error("missing required field `{0}` in manifest")]
    MissingField(&'static str),

    #[error("no {MANIFEST_NAME} manifest found in {0}")]
    NoManifest(PathBuf),
}

/// Parsed `brj.pkg`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    pub version: Option<String>,
    /// Evaluated in order, relative paths resolved against the manifest's directory.
    pub sources: Vec<PathBuf>,
    pub opt_level: Option<OptLevel>,
}

/// Finds and parses the manifest in `dir`.
pub fn load_manifest(dir: &Path) -> Result<PackageManifest, ManifestError> {
    let path = dir.join(MANIFEST_NAME);
    if !path.is_file() {
        return Err(ManifestError::NoManifest(dir.to_path_buf()));
    }
    let source = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
        path: path.clone(),
        source,
    })?;
    parse_manifest(&source, &path)
}

/// Parses `(package (name "...") (sources "..." ...) ...)`.
pub fn parse_manifest(source: &str, manifest_path: &Path) -> Result<PackageManifest, ManifestError> {
    let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let forms = read_all(source)?;
    let [package] = forms.as_slice() else {
        return Err(parse_error(
            "expected exactly one `(package ...)` form",
            forms.get(1).map(|f| f.range).unwrap_or_default(),
        ));
    };
    let FormKind::List(items) = &package.kind else {
        return Err(parse_error("expected `(package ...)`", package.range));
    };
    let Some((head, fields)) = items.split_first() else {
        return Err(parse_error("expected `package`", package.range));
    };
    if !head.is_symbol("package") {
        return Err(parse_error(format!("expected `package`, got {}", head), head.range));
    }

    let mut name = None;
    let mut version = None;
    let mut sources = Vec::new();
    let mut opt_level = None;

    for field in fields {
        let FormKind::List(parts) = &field.kind else {
            return Err(parse_error(format!("expected a field, got {}", field.describe()), field.range));
        };
        let Some((key, values)) = parts.split_first() else {
            return Err(parse_error("empty field", field.range));
        };
        match key.as_symbol() {
            Some("name") => name = Some(single_string(values, field)?),
            Some("version") => version = Some(single_string(values, field)?),
            Some("sources") => {
                for value in values {
                    sources.push(manifest_dir.join(read_string(value)?));
                }
            }
            Some("opt-level") => {
                let level = single_string(values, field)?;
                opt_level = Some(level.parse().map_err(|e: String| parse_error(e, field.range))?);
            }
            _ => return Err(parse_error(format!("unknown field `{}`", key), key.range)),
        }
    }

    let name = name.ok_or(ManifestError::MissingField("name"))?;
    if sources.is_empty() {
        return Err(ManifestError::MissingField("sources"));
    }

    Ok(PackageManifest {
        name,
        version,
        sources,
        opt_level,
    })
}

fn parse_error(message: impl Into<String>, range: brj_reader::Range) -> ManifestError {
    ManifestError::Parse {
        message: message.into(),
        range,
    }
}

fn read_string(form: &Form) -> Result<String, ManifestError> {
    match &form.kind {
        FormKind::Str(s) => Ok(s.clone()),
        _ => Err(parse_error(format!("expected string, got {}", form.describe()), form.range)),
    }
}

fn single_string(values: &[Form], field: &Form) -> Result<String, ManifestError> {
    match values {
        [value] => read_string(value),
        _ => Err(parse_error("expected exactly one string", field.range)),
    }
}
