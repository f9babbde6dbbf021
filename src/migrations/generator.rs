//! # Migration Generator
//!
//! Scaffolds a new migration file named after the current UTC time,
//! `Version<YYYYMMDDHHMMSS>.<ext>`, in the migrations directory.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use tracing::info;

use super::errors::{MigrationError, MigrationResult};
use super::version_id::VersionId;

/// Kind of file to scaffold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateFormat {
    /// Declarative YAML steps
    #[default]
    Yaml,
    /// Rust source implementing `Migration`
    Rust,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateFormat::Yaml => "yaml",
            TemplateFormat::Rust => "rs",
        }
    }
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateFormat::Yaml => f.write_str("yaml"),
            TemplateFormat::Rust => f.write_str("rust"),
        }
    }
}

/// Migration generator
pub struct MigrationGenerator {
    migrations_dir: PathBuf,
    namespace: Option<String>,
}

impl MigrationGenerator {
    pub fn new(migrations_dir: PathBuf) -> Self {
        Self {
            migrations_dir,
            namespace: None,
        }
    }

    /// Namespace mentioned in Rust templates.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Generate a migration for the current time.
    pub fn create(&self, format: TemplateFormat) -> MigrationResult<PathBuf> {
        self.create_version(format, VersionId::now())
    }

    /// Generate a migration for `version`. Fails if the file already exists.
    pub fn create_version(
        &self,
        format: TemplateFormat,
        version: VersionId,
    ) -> MigrationResult<PathBuf> {
        if version.is_zero() {
            return Err(MigrationError::InvalidVersion(version.to_string()));
        }

        if !self.migrations_dir.exists() {
            fs::create_dir_all(&self.migrations_dir).map_err(|e| MigrationError::FileWrite {
                path: self.migrations_dir.clone(),
                source: e,
            })?;
        }

        let filename = format!("Version{}.{}", version, format.extension());
        let file_path = self.migrations_dir.join(&filename);
        if file_path.exists() {
            return Err(MigrationError::invalid_argument(format!(
                "Migration {} already exists",
                file_path.display()
            )));
        }

        let content = match format {
            TemplateFormat::Yaml => yaml_template(version),
            TemplateFormat::Rust => rust_template(version, self.namespace.as_deref()),
        };

        fs::write(&file_path, content).map_err(|e| MigrationError::FileWrite {
            path: file_path.clone(),
            source: e,
        })?;

        info!(path = %file_path.display(), format = %format, "Generated migration");
        Ok(file_path)
    }
}

fn yaml_template(version: VersionId) -> String {
    format!(
        r#"# Migration {version}
# Created: {created}
#
# Steps run in order. Leave 'down' empty to make the migration irreversible.

description: ""

up:
  # - analyze:
  #     collection: my_collection
  # - create_index:
  #     collection: my_collection
  #     fields: [field_name]
  #     unique: true
  - write:
      message: "Nothing to migrate yet"

down:
  - write:
      message: "Nothing to revert yet"
"#,
        version = version,
        created = version.formatted(),
    )
}

fn rust_template(version: VersionId, namespace: Option<&str>) -> String {
    let namespace = namespace.unwrap_or("crate::migrations");
    format!(
        r#"// Register in the migration catalog as "{namespace}::Version{version}".

use docmigrate::migrations::{{Migration, MigrationContext, MigrationResult}};

#[derive(Default)]
pub struct Version{version};

impl Migration for Version{version} {{
    fn description(&self) -> String {{
        String::new()
    }}

    fn up(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {{
        Ok(())
    }}

    fn down(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {{
        Ok(())
    }}
}}
"#,
        namespace = namespace,
        version = version,
    )
}
