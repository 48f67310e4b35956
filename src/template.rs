//! Rendering of request templates.
//!
//! Templates are plain text files containing Go-style placeholders. Three placeholders are
//! understood: `{{ .Org }}`, `{{ .CommonName }}` and `{{ .CaCert }}`. Anything else between
//! `{{` and `}}` is rejected so a typo in a template never silently produces an empty field.

use crate::Error;
use std::{
    io::{ErrorKind, Write},
    path::PathBuf,
};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const TEMP_PREFIX: &str = "ca-req";

/// Values substituted into a template.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TemplateValues {
    pub organization: String,
    pub common_name: String,
    pub ca_certificate: String,
}

impl TemplateValues {
    fn lookup(&self, placeholder: &str) -> Option<&str> {
        match placeholder {
            ".Org" => Some(&self.organization),
            ".CommonName" => Some(&self.common_name),
            ".CaCert" => Some(&self.ca_certificate),
            _ => None,
        }
    }
}

/// Fills templates from a templates directory.
#[derive(Clone, Debug)]
pub struct TemplateRenderer {
    dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn template_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Renders the named template into a string.
    pub async fn render(&self, name: &str, values: &TemplateValues) -> Result<String, Error> {
        let path = self.template_path(name);
        let source = fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::InvalidData => Error::Template {
                template: name.to_owned(),
                reason: e.to_string(),
            },
            _ => Error::io(format!("cannot read template {}", path.display()), e),
        })?;

        render_str(name, &source, values)
    }

    /// Renders the named template into a freshly created, uniquely named temporary file.
    ///
    /// The file is deleted when the returned handle is dropped.
    pub async fn render_to_temp(
        &self,
        name: &str,
        values: &TemplateValues,
    ) -> Result<NamedTempFile, Error> {
        let document = self.render(name, values).await?;

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .suffix(".json")
                .tempfile()?;
            file.write_all(document.as_bytes())?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::io("temporary file task failed", std::io::Error::other(e)))?
        .map_err(|e| Error::io("cannot write temporary request file", e))?;

        debug!(path = %file.path().display(), template = name, "rendered request document");
        Ok(file)
    }
}

/// Substitutes `values` into `source`.
///
/// `name` is only used for error reporting.
pub fn render_str(name: &str, source: &str, values: &TemplateValues) -> Result<String, Error> {
    let malformed = |reason: String| Error::Template {
        template: name.to_owned(),
        reason,
    };

    let mut output = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find(OPEN) {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let end = after_open
            .find(CLOSE)
            .ok_or_else(|| malformed("unterminated placeholder".to_owned()))?;
        let placeholder = after_open[..end].trim();

        let value = values
            .lookup(placeholder)
            .ok_or_else(|| malformed(format!("unknown placeholder `{placeholder}`")))?;
        output.push_str(value);

        rest = &after_open[end + CLOSE.len()..];
    }

    output.push_str(rest);
    Ok(output)
}
