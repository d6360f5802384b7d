//! MOTD module: stamps `/etc/motd` with the current OS version.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ModuleError;
use crate::modules::{ModuleAction, ModuleContext};
use crate::util::os_product_version;

const MOTD_FILE: &str = "/etc/motd";

/// Configuration of an MOTD module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotdModule {
    /// Whether the version line should be rewritten at all.
    #[serde(rename = "UpdateName", default)]
    pub update_name: bool,
}

#[async_trait]
impl ModuleAction for MotdModule {
    async fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        if !self.update_name {
            return Ok("not requested to update MOTD".into());
        }

        let product_version = os_product_version().await?;
        let motd_line = version_line(&product_version);

        let path = Path::new(MOTD_FILE);
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ModuleError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        let updated = rewrite_version_lines(&contents, &motd_line);
        tokio::fs::write(path, updated)
            .await
            .map_err(|source| ModuleError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(format!(
            "successfully updated motd file [{MOTD_FILE}] with version string [{motd_line}]"
        ))
    }
}

/// Builds the version line, including the marketing name when known.
fn version_line(product_version: &str) -> String {
    match version_name(product_version) {
        Some(name) => format!("macOS {name} {product_version}"),
        None => format!("macOS {product_version}"),
    }
}

/// Maps product version numbers to marketing names; unknown versions get
/// none.
fn version_name(product_version: &str) -> Option<&'static str> {
    let major = product_version.split('.').next()?;
    match major {
        "10" if product_version.starts_with("10.14") => Some("Mojave"),
        "10" if product_version.starts_with("10.15") => Some("Catalina"),
        "11" => Some("Big Sur"),
        "12" => Some("Monterey"),
        "13" => Some("Ventura"),
        "14" => Some("Sonoma"),
        "15" => Some("Sequoia"),
        _ => None,
    }
}

/// Replaces everything from `macOS` to end-of-line on each line that
/// mentions it, leaving other lines untouched.
fn rewrite_version_lines(contents: &str, motd_line: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    for line in contents.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        match body.find("macOS") {
            Some(idx) => {
                out.push_str(&body[..idx]);
                out.push_str(motd_line);
            }
            None => out.push_str(body),
        }
        out.push_str(newline);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_versions_get_marketing_names() {
        assert_eq!(version_line("10.15.7"), "macOS Catalina 10.15.7");
        assert_eq!(version_line("14.4.1"), "macOS Sonoma 14.4.1");
    }

    #[test]
    fn unknown_versions_keep_bare_number() {
        assert_eq!(version_line("99.0"), "macOS 99.0");
    }

    #[test]
    fn rewrite_touches_only_matching_lines() {
        let contents = "Welcome!\nmacOS Catalina 10.15.6\nauthorized use only\n";
        let updated = rewrite_version_lines(contents, "macOS Big Sur 11.2");
        assert_eq!(
            updated,
            "Welcome!\nmacOS Big Sur 11.2\nauthorized use only\n"
        );
    }

    #[test]
    fn rewrite_replaces_to_end_of_line() {
        let contents = "banner macOS old junk here\n";
        let updated = rewrite_version_lines(contents, "macOS 12.1");
        assert_eq!(updated, "banner macOS 12.1\n");
    }
}
