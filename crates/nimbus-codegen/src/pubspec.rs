//! Minimal pubspec scanning for structural validation.
//!
//! This is not a YAML parser. Deployment only needs two facts from the
//! manifest: the package name and whether the platform package is
//! declared, and both sit at fixed indentation in every real pubspec.
//! Anything fancier belongs to the Dart toolchain inside the build
//! container.

/// The platform package every function depends on.
pub const PLATFORM_PACKAGE: &str = "dart_cloud";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PubspecInfo {
    pub name: Option<String>,
    pub dependencies: Vec<String>,
}

impl PubspecInfo {
    pub fn depends_on(&self, package: &str) -> bool {
        self.dependencies.iter().any(|d| d == package)
    }
}

/// Scan pubspec content for the package name and top-level dependency
/// keys.
pub fn parse_pubspec(content: &str) -> PubspecInfo {
    let mut info = PubspecInfo::default();
    let mut in_dependencies = false;

    for raw_line in content.lines() {
        let line = strip_comment(raw_line);
        if line.trim().is_empty() {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            in_dependencies = false;
            if let Some(value) = line.strip_prefix("name:") {
                let value = value.trim();
                if !value.is_empty() {
                    info.name = Some(value.trim_matches(['"', '\'']).to_string());
                }
            } else if line.trim_end() == "dependencies:" {
                in_dependencies = true;
            }
            continue;
        }

        if in_dependencies {
            // Direct children only: two-space indent, `package:` or
            // `package:` with an inline version.
            let trimmed = line.trim_start();
            let depth = line.len() - trimmed.len();
            if depth > 2 {
                continue;
            }
            if let Some((key, _)) = trimmed.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    info.dependencies.push(key.to_string());
                }
            }
        }
    }

    info
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}
