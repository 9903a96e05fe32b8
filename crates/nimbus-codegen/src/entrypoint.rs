//! Entry-point synthesis from annotated Dart source.
//!
//! The scan is purely syntactic: comments and string literals are blanked
//! out, then top-level class heads and their annotations are recognized
//! by a small token walk. Nothing is executed, nothing is resolved; a
//! class counts if and only if it is annotated `@cloudFunction` and
//! extends `CloudFunction` by name.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// The well-known filename the synthesized program is written to.
pub const ENTRY_FILE_NAME: &str = "main.dart";

/// The platform base class a function class must extend.
pub const FUNCTION_BASE_CLASS: &str = "CloudFunction";

/// The annotation marking the handler class.
pub const FUNCTION_ANNOTATION: &str = "cloudFunction";

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("archive contains no class annotated @{FUNCTION_ANNOTATION} extending {FUNCTION_BASE_CLASS}")]
    NoFunctionClass,

    #[error("archive contains multiple annotated function classes: {}", .0.join(", "))]
    MultipleFunctionClasses(Vec<String>),

    #[error("archive already defines a top-level entry function in {0}")]
    ExistingEntrypoint(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A top-level class head recognized in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassHead {
    name: String,
    extends: Option<String>,
    annotations: Vec<String>,
}

/// What the scan found across the whole source tree.
#[derive(Debug)]
struct ScanResult {
    /// Annotated function classes with the file (relative path) defining them.
    candidates: Vec<(String, PathBuf)>,
    /// First file defining a top-level `main`, if any.
    entrypoint_file: Option<PathBuf>,
}

/// Scan `dir` and synthesize the entry-point program.
///
/// Returns the relative output path and the file content; the caller owns
/// writing it. Output is deterministic: the same tree yields byte-equal
/// content on every run.
pub fn synthesize_entrypoint(dir: &Path) -> Result<(PathBuf, String), SynthesisError> {
    let scan = scan_tree(dir)?;

    if let Some(file) = scan.entrypoint_file {
        return Err(SynthesisError::ExistingEntrypoint(
            file.display().to_string(),
        ));
    }

    match scan.candidates.as_slice() {
        [] => Err(SynthesisError::NoFunctionClass),
        [(class_name, file)] => Ok((
            PathBuf::from(ENTRY_FILE_NAME),
            render_entrypoint(class_name, file),
        )),
        many => Err(SynthesisError::MultipleFunctionClasses(
            many.iter().map(|(name, _)| name.clone()).collect(),
        )),
    }
}

fn scan_tree(dir: &Path) -> Result<ScanResult, SynthesisError> {
    let mut files = Vec::new();
    collect_dart_files(dir, dir, &mut files)?;
    // Deterministic order regardless of directory enumeration.
    files.sort();

    let mut result = ScanResult {
        candidates: Vec::new(),
        entrypoint_file: None,
    };

    for relative in files {
        let absolute = dir.join(&relative);
        let source = std::fs::read_to_string(&absolute).map_err(|source| SynthesisError::Io {
            path: absolute.clone(),
            source,
        })?;
        let stripped = strip_comments_and_strings(&source);

        if result.entrypoint_file.is_none() && has_top_level_main(&stripped) {
            result.entrypoint_file = Some(relative.clone());
        }

        for class in scan_classes(&stripped) {
            let annotated = class
                .annotations
                .iter()
                .any(|a| a == FUNCTION_ANNOTATION);
            let extends_base = class.extends.as_deref() == Some(FUNCTION_BASE_CLASS);
            if annotated && extends_base {
                result.candidates.push((class.name, relative.clone()));
            }
        }
    }

    Ok(result)
}

fn collect_dart_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<PathBuf>,
) -> Result<(), SynthesisError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SynthesisError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| SynthesisError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| SynthesisError::Io {
            path: path.clone(),
            source,
        })?;
        if file_type.is_dir() {
            // Tool and dependency caches carry generated Dart that is not
            // user source.
            let name = entry.file_name();
            if name != ".dart_tool" && name != "build" {
                collect_dart_files(root, &path, out)?;
            }
        } else if file_type.is_file()
            && path.extension().map(|e| e == "dart").unwrap_or(false)
            && path.file_name().map(|n| n != ENTRY_FILE_NAME).unwrap_or(true)
        {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

/// Blank out comments and string literals, preserving length and line
/// structure so token positions stay meaningful.
fn strip_comments_and_strings(source: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment(u32),
        Single,
        Double,
        TripleSingle,
        TripleDouble,
    }

    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut i = 0;

    let peek = |chars: &Vec<char>, i: usize, offset: usize| -> Option<char> {
        chars.get(i + offset).copied()
    };

    while i < chars.len() {
        let c = chars[i];
        match state {
            State::Code => {
                if c == '/' && peek(&chars, i, 1) == Some('/') {
                    state = State::LineComment;
                    out.push(' ');
                } else if c == '/' && peek(&chars, i, 1) == Some('*') {
                    state = State::BlockComment(1);
                    out.push(' ');
                } else if c == '\''
                    && peek(&chars, i, 1) == Some('\'')
                    && peek(&chars, i, 2) == Some('\'')
                {
                    state = State::TripleSingle;
                    out.push_str("   ");
                    i += 3;
                    continue;
                } else if c == '"'
                    && peek(&chars, i, 1) == Some('"')
                    && peek(&chars, i, 2) == Some('"')
                {
                    state = State::TripleDouble;
                    out.push_str("   ");
                    i += 3;
                    continue;
                } else if c == '\'' {
                    state = State::Single;
                    out.push(' ');
                } else if c == '"' {
                    state = State::Double;
                    out.push(' ');
                } else {
                    out.push(c);
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment(depth) => {
                if c == '/' && peek(&chars, i, 1) == Some('*') {
                    state = State::BlockComment(depth + 1);
                    out.push_str("  ");
                    i += 2;
                    continue;
                } else if c == '*' && peek(&chars, i, 1) == Some('/') {
                    state = if depth == 1 {
                        State::Code
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    out.push_str("  ");
                    i += 2;
                    continue;
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Single | State::Double => {
                let quote = if state == State::Single { '\'' } else { '"' };
                if c == '\\' {
                    out.push_str("  ");
                    i += 2;
                    continue;
                } else if c == quote {
                    state = State::Code;
                    out.push(' ');
                } else if c == '\n' {
                    // Unterminated literal; recover at the line break.
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::TripleSingle | State::TripleDouble => {
                let quote = if state == State::TripleSingle { '\'' } else { '"' };
                if c == quote
                    && peek(&chars, i, 1) == Some(quote)
                    && peek(&chars, i, 2) == Some(quote)
                {
                    state = State::Code;
                    out.push_str("   ");
                    i += 3;
                    continue;
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
        }
        i += 1;
    }

    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Split pre-stripped source into identifier and punctuation tokens,
/// remembering the brace depth each token appears at.
fn tokenize(stripped: &str) -> Vec<(String, i32)> {
    let mut tokens = Vec::new();
    let mut depth = 0;
    let mut current = String::new();

    for c in stripped.chars() {
        if is_ident_char(c) {
            current.push(c);
            continue;
        }
        if !current.is_empty() {
            tokens.push((std::mem::take(&mut current), depth));
        }
        match c {
            '{' => {
                tokens.push(("{".to_string(), depth));
                depth += 1;
            }
            '}' => {
                depth -= 1;
                tokens.push(("}".to_string(), depth));
            }
            '@' | '(' | ')' | ';' | '<' | '>' | ',' | '=' => {
                tokens.push((c.to_string(), depth));
            }
            _ => {}
        }
    }
    if !current.is_empty() {
        tokens.push((current, depth));
    }

    tokens
}

/// Recognize top-level class heads with their annotations.
fn scan_classes(stripped: &str) -> Vec<ClassHead> {
    let tokens = tokenize(stripped);
    let mut classes = Vec::new();
    let mut pending_annotations: Vec<String> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let (token, depth) = &tokens[i];
        if *depth != 0 {
            i += 1;
            continue;
        }

        if token == "@" {
            if let Some((name, 0)) = tokens.get(i + 1).map(|(t, d)| (t.clone(), *d)) {
                pending_annotations.push(name);
                i += 2;
                // Skip annotation arguments: `@name(...)`.
                if tokens.get(i).map(|(t, _)| t == "(").unwrap_or(false) {
                    let mut parens = 0;
                    while i < tokens.len() {
                        match tokens[i].0.as_str() {
                            "(" => parens += 1,
                            ")" => {
                                parens -= 1;
                                if parens == 0 {
                                    i += 1;
                                    break;
                                }
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                }
                continue;
            }
        } else if token == "class" {
            if let Some((name, 0)) = tokens.get(i + 1).map(|(t, d)| (t.clone(), *d)) {
                let mut extends = None;
                let mut j = i + 2;
                // `extends` inside a generic parameter list is a type
                // bound, not a superclass.
                let mut angle_depth = 0i32;
                while j < tokens.len() {
                    let (t, d) = &tokens[j];
                    if *d != 0 || t == "{" || t == ";" {
                        break;
                    }
                    match t.as_str() {
                        "<" => angle_depth += 1,
                        ">" => angle_depth -= 1,
                        "extends" if angle_depth == 0 => {
                            if let Some((superclass, 0)) =
                                tokens.get(j + 1).map(|(t, d)| (t.clone(), *d))
                            {
                                extends = Some(superclass);
                            }
                            break;
                        }
                        _ => {}
                    }
                    j += 1;
                }
                classes.push(ClassHead {
                    name,
                    extends,
                    annotations: std::mem::take(&mut pending_annotations),
                });
                i += 2;
                continue;
            }
        } else if token != "abstract" && token != "final" && token != "base" && token != "sealed" {
            // Any other top-level token breaks the annotation chain.
            pending_annotations.clear();
        }
        i += 1;
    }

    classes
}

/// A file defines a top-level entry function if `main` appears at depth 0
/// immediately followed by an opening parenthesis.
fn has_top_level_main(stripped: &str) -> bool {
    let tokens = tokenize(stripped);
    tokens.windows(2).any(|pair| {
        matches!(
            (&pair[0], &pair[1]),
            ((name, 0), (paren, 0)) if name == "main" && paren == "("
        )
    })
}

/// Render the top-level program for the selected class.
fn render_entrypoint(class_name: &str, class_file: &Path) -> String {
    // Dart import paths always use forward slashes.
    let import_path = class_file
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");

    format!(
        r#"// Generated entry point. Regenerated on every deployment; do not edit.
import 'dart:async';
import 'dart:convert';
import 'dart:io';

import 'package:dart_cloud/dart_cloud.dart';

import '{import_path}';

Future<Map<String, String>> _loadEnvConfig(String path) async {{
  final file = File(path);
  if (!await file.exists()) {{
    return <String, String>{{}};
  }}
  final env = <String, String>{{}};
  for (final line in await file.readAsLines()) {{
    final trimmed = line.trim();
    if (trimmed.isEmpty || trimmed.startsWith('#')) {{
      continue;
    }}
    final separator = trimmed.indexOf('=');
    if (separator <= 0) {{
      continue;
    }}
    env[trimmed.substring(0, separator)] = trimmed.substring(separator + 1);
  }}
  return env;
}}

Future<void> _writeJsonAtomic(String path, Object? document) async {{
  final tmp = File('$path.tmp');
  await tmp.writeAsString(jsonEncode(document), flush: true);
  await tmp.rename(path);
}}

List<Map<String, Object?>> _collectLogs(CloudFunction function) {{
  return function.logs
      .map((entry) => {{
            'level': entry.level,
            'message': entry.message,
            'timestamp': entry.timestamp.toUtc().toIso8601String(),
          }})
      .toList();
}}

Future<void> main() async {{
  final shared = Directory.current.path;
  final environment = await _loadEnvConfig('$shared/.env.config');
  final function = {class_name}();
  try {{
    final raw = jsonDecode(await File('$shared/request.json').readAsString())
        as Map<String, dynamic>;
    final request = CloudRequest.fromJson(raw, environment);
    final response = await function.handle(request);
    await _writeJsonAtomic('$shared/result.json', response.toJson());
    await _writeJsonAtomic('$shared/logs.json', {{'logs': _collectLogs(function)}});
    exit(0);
  }} catch (error, stackTrace) {{
    await _writeJsonAtomic('$shared/result.json', {{
      'statusCode': 500,
      'headers': {{'content-type': 'application/json'}},
      'body': {{'error': error.toString()}},
    }});
    await _writeJsonAtomic('$shared/logs.json', {{'logs': _collectLogs(function)}});
    stderr.writeln(stackTrace);
    exit(1);
  }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    const HANDLER: &str = r#"
import 'package:dart_cloud/dart_cloud.dart';

@cloudFunction
class EchoFunction extends CloudFunction {
  @override
  Future<CloudResponse> handle(CloudRequest request) async {
    return CloudResponse.json({'echo': request.body['x']});
  }
}
"#;

    #[test]
    fn single_annotated_class_synthesizes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/handler.dart", HANDLER);
        write(dir.path(), "pubspec.yaml", "name: echo\n");

        let (path, content) = synthesize_entrypoint(dir.path()).unwrap();
        assert_eq!(path, PathBuf::from("main.dart"));
        assert!(content.contains("import 'lib/handler.dart';"));
        assert!(content.contains("final function = EchoFunction();"));
        assert!(content.contains("request.json"));
        assert!(content.contains(".env.config"));
        assert!(content.contains("'logs':"));
    }

    #[test]
    fn synthesis_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/handler.dart", HANDLER);
        write(dir.path(), "lib/util.dart", "int add(int a, int b) => a + b;\n");

        let first = synthesize_entrypoint(dir.path()).unwrap();
        let second = synthesize_entrypoint(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_candidates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib/handler.dart",
            "class Plain extends CloudFunction {}\n",
        );

        assert!(matches!(
            synthesize_entrypoint(dir.path()),
            Err(SynthesisError::NoFunctionClass)
        ));
    }

    #[test]
    fn multiple_candidates_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/a.dart", HANDLER);
        write(
            dir.path(),
            "lib/b.dart",
            HANDLER.replace("EchoFunction", "OtherFunction").as_str(),
        );

        match synthesize_entrypoint(dir.path()) {
            Err(SynthesisError::MultipleFunctionClasses(names)) => {
                assert_eq!(names, vec!["EchoFunction", "OtherFunction"]);
            }
            other => panic!("expected MultipleFunctionClasses, got {other:?}"),
        }
    }

    #[test]
    fn existing_top_level_main_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/handler.dart", HANDLER);
        write(dir.path(), "lib/cli.dart", "void main() { print('hi'); }\n");

        assert!(matches!(
            synthesize_entrypoint(dir.path()),
            Err(SynthesisError::ExistingEntrypoint(_))
        ));
    }

    #[test]
    fn annotation_inside_comment_or_string_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib/handler.dart",
            r#"
// @cloudFunction
class Commented extends CloudFunction {}

class Stringy extends CloudFunction {
  final doc = '@cloudFunction class Fake extends CloudFunction {}';
}
"#,
        );

        assert!(matches!(
            synthesize_entrypoint(dir.path()),
            Err(SynthesisError::NoFunctionClass)
        ));
    }

    #[test]
    fn nested_class_main_method_is_not_an_entrypoint() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/handler.dart", HANDLER);
        write(
            dir.path(),
            "lib/util.dart",
            r#"
class Runner {
  void main() {}
}
"#,
        );

        assert!(synthesize_entrypoint(dir.path()).is_ok());
    }

    #[test]
    fn generic_bound_is_not_a_superclass() {
        let stripped = strip_comments_and_strings(
            "class Box<T extends Comparable> extends CloudFunction {}\n",
        );
        let classes = scan_classes(&stripped);
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].extends.as_deref(), Some("CloudFunction"));
    }

    #[test]
    fn wrong_superclass_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib/handler.dart",
            r#"
@cloudFunction
class Wrong extends SomethingElse {}
"#,
        );

        assert!(matches!(
            synthesize_entrypoint(dir.path()),
            Err(SynthesisError::NoFunctionClass)
        ));
    }

    #[test]
    fn strip_preserves_line_structure() {
        let source = "a /* multi\nline */ b // tail\nc '\\'' d";
        let stripped = strip_comments_and_strings(source);
        assert_eq!(stripped.lines().count(), source.lines().count());
        assert!(stripped.contains('a'));
        assert!(stripped.contains('b'));
        assert!(stripped.contains('c'));
        assert!(!stripped.contains("multi"));
        assert!(!stripped.contains("tail"));
    }

    #[test]
    fn scanner_reads_annotations_with_arguments() {
        let stripped = strip_comments_and_strings(
            r#"
@cloudFunction
@Deprecated('old')
class WithArgs extends CloudFunction {}
"#,
        );
        let classes = scan_classes(&stripped);
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "WithArgs");
        assert_eq!(
            classes[0].annotations,
            vec!["cloudFunction".to_string(), "Deprecated".to_string()]
        );
        assert_eq!(classes[0].extends.as_deref(), Some("CloudFunction"));
    }
}
