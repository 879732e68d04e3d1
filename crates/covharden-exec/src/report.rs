//! Cobertura coverage report reader.
//!
//! Read: the root `line-rate` (project-wide), the `<source>` directories and
//! each `<class filename=".." line-rate="..">`. Rates are fractions in the
//! file and percentages everywhere else. A relative `filename` is joined onto
//! the first `<source>`, as coverage.py writes it relative to that directory.

use std::collections::BTreeMap;
use std::path::Path;

use covharden_core::{ModuleId, clamp_coverage, normalize_module_id};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::ExecError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageReport {
    /// Project-wide line coverage, percent.
    pub overall: f64,
    /// Per-module line coverage, percent.
    pub modules: BTreeMap<ModuleId, f64>,
}

impl CoverageReport {
    pub fn module(&self, module_id: &str) -> Option<f64> {
        self.modules.get(ModuleId::new(module_id).as_str()).copied()
    }

    /// Strip the `workdir` prefix from every module id, so ids line up with
    /// [`discover_modules`](crate::discover_modules). Ids outside `workdir`
    /// are kept as they are.
    #[must_use]
    pub fn relative_to(self, workdir: &Path) -> Self {
        let base = normalize_module_id(&workdir.to_string_lossy());
        let prefix = format!("{}/", base.trim_end_matches('/'));
        let modules = self
            .modules
            .into_iter()
            .map(|(id, coverage)| match id.as_str().strip_prefix(&prefix) {
                Some(rest) if !rest.is_empty() => (ModuleId::new(rest), coverage),
                _ => (id, coverage),
            })
            .collect();
        Self {
            overall: self.overall,
            modules,
        }
    }
}

fn is_absolute_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    id.starts_with('/') || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

fn resolve_filename(sources: &[String], filename: &str) -> ModuleId {
    let filename = normalize_module_id(filename);
    match sources.first() {
        Some(source) if !source.is_empty() && !is_absolute_id(&filename) => {
            ModuleId::new(format!("{source}/{filename}"))
        }
        _ => ModuleId::new(filename),
    }
}

/// Parse a Cobertura XML document.
pub fn parse_cobertura(xml: &str) -> Result<CoverageReport, ExecError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut report = CoverageReport::default();
    let mut sources: Vec<String> = Vec::new();
    let mut in_source = false;
    loop {
        let position = reader.buffer_position() as u64;
        match reader.read_event() {
            Ok(Event::Start(element)) if element.name().as_ref() == b"source" => {
                in_source = true;
            }
            Ok(Event::End(element)) if element.name().as_ref() == b"source" => {
                in_source = false;
            }
            Ok(Event::Text(text)) if in_source => {
                let dir = text.unescape().map_err(|e| ExecError::Report {
                    position,
                    detail: e.to_string(),
                })?;
                sources.push(normalize_module_id(&dir));
            }
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                match element.name().as_ref() {
                    b"coverage" => {
                        report.overall = rate_percent(&element, position)?.unwrap_or(0.0);
                    }
                    b"class" => {
                        let Some(filename) = attribute(&element, b"filename", position)? else {
                            continue;
                        };
                        let coverage = rate_percent(&element, position)?.unwrap_or(0.0);
                        report
                            .modules
                            .insert(resolve_filename(&sources, &filename), coverage);
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExecError::Report {
                    position,
                    detail: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

/// Read the report at `path`. A missing file is `Ok(None)`: no test has
/// produced coverage yet.
pub fn load_report(path: &Path) -> Result<Option<CoverageReport>, ExecError> {
    if !path.exists() {
        return Ok(None);
    }
    let xml = std::fs::read_to_string(path)?;
    parse_cobertura(&xml).map(Some)
}

fn attribute(
    element: &BytesStart<'_>,
    key: &[u8],
    position: u64,
) -> Result<Option<String>, ExecError> {
    let malformed = |detail: String| ExecError::Report { position, detail };
    let Some(attr) = element
        .try_get_attribute(key)
        .map_err(|e| malformed(e.to_string()))?
    else {
        return Ok(None);
    };
    let value = attr
        .unescape_value()
        .map_err(|e| malformed(e.to_string()))?;
    Ok(Some(value.into_owned()))
}

fn rate_percent(element: &BytesStart<'_>, position: u64) -> Result<Option<f64>, ExecError> {
    let Some(raw) = attribute(element, b"line-rate", position)? else {
        return Ok(None);
    };
    let rate: f64 = raw.trim().parse().map_err(|_| ExecError::Report {
        position,
        detail: format!("line-rate is not a number: {raw:?}"),
    })?;
    Ok(Some(clamp_coverage(rate * 100.0)))
}
