use anyhow::{Context, Result, bail};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("Invalid placeholder regex")
});

/// Rendered config files are readable by the owner's group only
const CONFIG_MODE: u32 = 0o640;

/// Writes configuration files from templates
pub trait ConfigWriter {
    fn write(&self, template: &str, vars: &BTreeMap<String, String>, dest: &Path) -> Result<()>;
}

/// Substitute `{{ name }}` placeholders; every placeholder must have a value
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let missing: BTreeSet<&str> = PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| !vars.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        bail!(
            "Template variables without a value: {}",
            missing.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| vars[&caps[1]].clone())
        .into_owned())
}

/// Renders and replaces the destination atomically
pub struct TemplateWriter;

impl ConfigWriter for TemplateWriter {
    fn write(&self, template: &str, vars: &BTreeMap<String, String>, dest: &Path) -> Result<()> {
        let content = render(template, vars)?;
        let parent = dest
            .parent()
            .with_context(|| format!("{} has no parent directory", dest.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Could not create temp file in {}", parent.display()))?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(CONFIG_MODE))?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest)
            .with_context(|| format!("Could not write {}", dest.display()))?;

        log::debug!("Rendered {}", dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes() {
        let out = render(
            "HOST={{hostname}}\nMAIL={{ admin_email }}\n",
            &vars(&[("hostname", "intel"), ("admin_email", "ops@example.org")]),
        )
        .unwrap();
        assert_eq!(out, "HOST=intel\nMAIL=ops@example.org\n");
    }

    #[test]
    fn test_render_reports_all_missing() {
        let err = render("{{ a }} {{ b }} {{ c }}", &vars(&[("b", "1")])).unwrap_err();
        assert_eq!(err.to_string(), "Template variables without a value: a, c");
    }

    #[test]
    fn test_render_leaves_other_braces() {
        let out = render("${PATH} {x} {{ y }}", &vars(&[("y", "1")])).unwrap();
        assert_eq!(out, "${PATH} {x} 1");
    }

    #[test]
    fn test_write_is_atomic_and_private() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("conf").join(".env");
        TemplateWriter
            .write("A={{ a }}\n", &vars(&[("a", "1")]), &dest)
            .unwrap();
        TemplateWriter
            .write("A={{ a }}\n", &vars(&[("a", "2")]), &dest)
            .unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "A=2\n");
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, CONFIG_MODE);
        let entries = fs::read_dir(dest.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_write_missing_var_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("compose.yml");
        assert!(TemplateWriter.write("{{ nope }}", &vars(&[]), &dest).is_err());
        assert!(!dest.exists());
    }
}
