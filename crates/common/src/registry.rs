//! Read-only named-query registry.
//!
//! Loaded once at startup from a file and never mutated afterwards.
//! Clients reference a query by logical name instead of shipping raw SQL;
//! the registry maps that name to the statement text and its timeout.
//!
//! Two formats are supported, selected by file extension:
//! - `.yml` / `.yaml`: a flat list of `{name, sql, timeout}` entries.
//! - `.toml`: a `[query.<name>]` block per query with `sql` and an
//!   optional `timeout`.
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::anyhow;
use serde::Deserialize;

use crate::config::DEFAULT_QUERY_TIMEOUT_SECS;
use crate::error::GatewayError;

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedQuery {
    pub name: String,
    pub sql: String,
    /// Execution timeout in seconds for this query.
    #[serde(default = "default_query_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Deserialize)]
struct TomlQueryBody {
    sql: String,
    #[serde(default = "default_query_timeout")]
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct TomlRoot {
    #[serde(default)]
    query: BTreeMap<String, TomlQueryBody>,
}

#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: HashMap<String, NamedQuery>,
}

impl QueryRegistry {
    /// Build the registry from an ordered list of definitions. The load
    /// source is a flat list without uniqueness enforcement, so later
    /// duplicates overwrite earlier ones (last-wins).
    pub fn from_entries(entries: Vec<NamedQuery>) -> Self {
        let mut queries = HashMap::with_capacity(entries.len());
        for entry in entries {
            queries.insert(entry.name.clone(), entry);
        }
        Self { queries }
    }

    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::ConfigLoad(anyhow!("reading {}: {e}", path.display())))?;

        let entries = match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => serde_yaml::from_str::<Vec<NamedQuery>>(&raw)
                .map_err(|e| GatewayError::ConfigLoad(e.into()))?,
            Some("toml") => {
                let root: TomlRoot =
                    toml::from_str(&raw).map_err(|e| GatewayError::ConfigLoad(e.into()))?;
                root.query
                    .into_iter()
                    .map(|(name, body)| NamedQuery {
                        name,
                        sql: body.sql,
                        timeout: body.timeout,
                    })
                    .collect()
            }
            _ => {
                return Err(GatewayError::ConfigLoad(anyhow!(
                    "unsupported query config format: {}",
                    path.display()
                )))
            }
        };

        Ok(Self::from_entries(entries))
    }

    /// Load the registry, falling back to an empty one when the source is
    /// absent or malformed. Named-query execution thereafter reports
    /// NotFound; the process still serves ad hoc queries.
    pub fn load_or_empty(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!(
                "named query source {} not found, registry is empty",
                path.display()
            );
            return Self::default();
        }

        match Self::load(path) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!("unable to load named queries: {e}, registry is empty");
                Self::default()
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&NamedQuery> {
        self.queries.get(name)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).expect("create file");
        f.write_all(contents.as_bytes()).expect("write file");
        path
    }

    #[test]
    fn test_yaml_list_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(
            &dir,
            "queries.yml",
            "- name: recent\n  sql: select * from events order by at desc limit 10\n  timeout: 5\n- name: count\n  sql: select count(*) from events\n",
        );

        let registry = QueryRegistry::load(&path).expect("yaml loads");
        assert_eq!(registry.len(), 2);

        let recent = registry.resolve("recent").expect("recent registered");
        assert_eq!(recent.timeout, 5);
        assert!(recent.sql.starts_with("select * from events"));

        // Timeout falls back to the default when unspecified.
        assert_eq!(registry.resolve("count").expect("count registered").timeout, 10);
    }

    #[test]
    fn test_toml_block_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(
            &dir,
            "queries.toml",
            "[query.recent]\nsql = \"select 1\"\ntimeout = 3\n\n[query.count]\nsql = \"select count(*) from events\"\n",
        );

        let registry = QueryRegistry::load(&path).expect("toml loads");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("recent").expect("recent").timeout, 3);
        assert_eq!(registry.resolve("count").expect("count").timeout, 10);
    }

    #[test]
    fn test_duplicate_names_last_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(
            &dir,
            "queries.yml",
            "- name: q\n  sql: select 1\n- name: q\n  sql: select 2\n",
        );

        let registry = QueryRegistry::load(&path).expect("yaml loads");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("q").expect("q registered").sql, "select 2");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "queries.ini", "[q]\nsql=select 1\n");

        assert!(matches!(
            QueryRegistry::load(&path),
            Err(GatewayError::ConfigLoad(_))
        ));
    }

    #[test]
    fn test_missing_or_malformed_source_falls_back_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");

        let registry = QueryRegistry::load_or_empty(&dir.path().join("absent.yml"));
        assert!(registry.is_empty());
        assert!(registry.resolve("anything").is_none());

        let bad = write_file(&dir, "queries.yml", "{ not a list");
        let registry = QueryRegistry::load_or_empty(&bad);
        assert!(registry.is_empty());
    }
}
