use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use url::Url;
use zip::ZipArchive;

/// Report formats the engine can write, in declaration order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum ReportKind {
    Xml,
    Html,
    Text,
    Sarif,
}

impl ReportKind {
    pub(crate) const ALL: [ReportKind; 4] = [Self::Xml, Self::Html, Self::Text, Self::Sarif];

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Text => "text",
            Self::Sarif => "sarif",
        }
    }

    pub(crate) fn extension(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Text => "txt",
            Self::Sarif => "sarif",
        }
    }

    fn flag(self) -> &'static str {
        match self {
            Self::Xml => "-xml:withMessages",
            Self::Html => "-html",
            Self::Text => "-emacs",
            Self::Sarif => "-sarif",
        }
    }
}

/// Text that is either a plain file or an entry inside an archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum TextResource {
    File(PathBuf),
    ArchiveEntry { archive: PathBuf, entry: String },
}

impl TextResource {
    pub(crate) fn read_to_string(&self) -> Result<String> {
        match self {
            Self::File(path) => fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display())),
            Self::ArchiveEntry { archive, entry } => {
                let file = File::open(archive)
                    .with_context(|| format!("failed to open {}", archive.display()))?;
                let mut archive_reader = ZipArchive::new(file)
                    .with_context(|| format!("failed to read {}", archive.display()))?;
                let mut entry_reader = archive_reader.by_name(entry).with_context(|| {
                    format!("{entry} not found in {}", archive.display())
                })?;
                let mut content = String::new();
                entry_reader
                    .read_to_string(&mut content)
                    .with_context(|| format!("failed to read {entry} in {}", archive.display()))?;
                Ok(content)
            }
        }
    }

    /// Writes the resource to `target` unless it is already a plain file.
    pub(crate) fn materialize(&self, target: &Path) -> Result<PathBuf> {
        match self {
            Self::File(path) => Ok(path.clone()),
            Self::ArchiveEntry { .. } => {
                let content = self.read_to_string()?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                fs::write(target, content)
                    .with_context(|| format!("failed to write {}", target.display()))?;
                Ok(target.to_path_buf())
            }
        }
    }
}

/// One output format of a unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ReportSpec {
    pub(crate) kind: ReportKind,
    pub(crate) enabled: bool,
    pub(crate) output_location: PathBuf,
    pub(crate) stylesheet: Option<TextResource>,
}

impl ReportSpec {
    pub(crate) fn new(kind: ReportKind, enabled: bool, output_location: PathBuf) -> Self {
        Self {
            kind,
            enabled,
            output_location,
            stylesheet: None,
        }
    }

    /// Engine flag selecting this report, without the output path.
    ///
    /// `stylesheet_path` is the on-disk stylesheet for HTML reports.
    pub(crate) fn to_command_line_option(&self, stylesheet_path: Option<&Path>) -> String {
        match (self.kind, stylesheet_path) {
            (ReportKind::Html, Some(path)) => format!("-html:{}", path.display()),
            _ => self.kind.flag().to_string(),
        }
    }

    /// `file:` URI of the report destination.
    pub(crate) fn uri(&self) -> String {
        Url::from_file_path(&self.output_location)
            .map(|url| url.to_string())
            .unwrap_or_else(|()| self.output_location.display().to_string())
    }
}

/// Report settings of a unit, one slot per [`ReportKind`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Reports {
    xml: ReportSpec,
    html: ReportSpec,
    text: ReportSpec,
    sarif: ReportSpec,
}

impl Reports {
    pub(crate) fn from_specs(specs: Vec<ReportSpec>) -> Result<Self> {
        let mut xml = None;
        let mut html = None;
        let mut text = None;
        let mut sarif = None;
        for spec in specs {
            let slot = match spec.kind {
                ReportKind::Xml => &mut xml,
                ReportKind::Html => &mut html,
                ReportKind::Text => &mut text,
                ReportKind::Sarif => &mut sarif,
            };
            if slot.is_some() {
                bail!("{} report is declared twice", spec.kind.name());
            }
            *slot = Some(spec);
        }
        match (xml, html, text, sarif) {
            (Some(xml), Some(html), Some(text), Some(sarif)) => Ok(Self {
                xml,
                html,
                text,
                sarif,
            }),
            _ => bail!("every report kind must be declared once"),
        }
    }

    pub(crate) fn get(&self, kind: ReportKind) -> &ReportSpec {
        match kind {
            ReportKind::Xml => &self.xml,
            ReportKind::Html => &self.html,
            ReportKind::Text => &self.text,
            ReportKind::Sarif => &self.sarif,
        }
    }

    pub(crate) fn all_enabled(&self) -> Vec<&ReportSpec> {
        ReportKind::ALL
            .into_iter()
            .map(|kind| self.get(kind))
            .filter(|spec| spec.enabled)
            .collect()
    }

    pub(crate) fn first_enabled(&self) -> Option<&ReportSpec> {
        self.all_enabled().into_iter().next()
    }

    pub(crate) fn enabled_uris(&self) -> Vec<String> {
        self.all_enabled().iter().map(|spec| spec.uri()).collect()
    }
}
