//! JavaScript harness piped into the sandbox interpreter.
//!
//! The submission is compiled in its own function scope and must expose a
//! top-level function; the test body is compiled in a second, async scope
//! whose only parameter, `solution`, is that function. The harness reports a
//! single line on stdout prefixed with a marker that is fresh for every run,
//! so nothing the submission prints can pass for a verdict.
//!
//! Every global the reporting path relies on is captured before the
//! submission runs, and the promise machinery is frozen.
//!
//! [`sanitize`] is plain text filtering. It is not a security boundary, the
//! interpreter process around the harness is.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use uuid::Uuid;

use super::{SandboxError, Verdict};

pub const VERDICT_MARKER_PREFIX: &str = "__COURSEFORGE_VERDICT_";

static EXPORT_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\s*)export\s+(?:default\s+)?").expect("valid regex"));

static BLOCKED_IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(require|process|module|exports|globalThis|global|eval|Function|import|child_process|Deno|Bun|fetch|XMLHttpRequest|WebSocket)\b",
    )
    .expect("valid regex")
});

static EXPORTED_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(|^(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=",
    )
    .expect("valid regex")
});

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__(MARKER|SUBMISSION|EXPORT|TEST)__").expect("valid regex"));

// Error text is cut so a verdict line stays below PIPE_BUF and is written
// in one piece.
const TEMPLATE: &str = r#""use strict";
(() => {
  const marker = __MARKER__;
  const writeSync = require("fs").writeSync;
  const exit = process.exit.bind(process);
  const toBoolean = Boolean;
  const toString = String;
  const stringify = JSON.stringify;
  const sliceString = Function.prototype.call.bind(String.prototype.slice);
  const SyncFunction = Function;
  const AsyncFunction = (async function () {}).constructor;
  const freeze = Object.freeze;
  freeze(Promise);
  freeze(Promise.prototype);

  const describe = (e) => {
    try {
      const text = e && typeof e === "object" && typeof e.message === "string" ? e.message : toString(e);
      return typeof text === "string" ? sliceString(text, 0, 500) : "Unknown error";
    } catch (_) {
      return "Unknown error";
    }
  };
  const report = (passed, error) => {
    const line = "\n" + marker + '{"passed":' + (passed ? "true" : "false") +
      ',"error":' + (error === null ? "null" : stringify(error)) + "}\n";
    for (;;) {
      try {
        writeSync(1, line);
        break;
      } catch (e) {
        if (!e || e.code !== "EAGAIN") break;
      }
    }
    exit(0);
  };

  (async () => {
    let solution;
    try {
      solution = new SyncFunction(__SUBMISSION__ + "\n;return " + __EXPORT__ + ";")();
    } catch (e) {
      return report(false, "Submission error: " + describe(e));
    }
    if (typeof solution !== "function") {
      return report(false, __EXPORT__ + " is not a function");
    }
    let test;
    try {
      test = new AsyncFunction("solution", __TEST__);
    } catch (e) {
      return report(false, "Test error: " + describe(e));
    }
    try {
      const outcome = await test(solution);
      report(outcome === undefined || toBoolean(outcome), null);
    } catch (e) {
      report(false, describe(e));
    }
  })();
})();
"#;

/// A harness ready to pipe into the interpreter, with the marker its verdict
/// line will carry.
#[derive(Debug, Clone)]
pub struct HarnessScript {
    pub source: String,
    pub marker: String,
}

/// Neutralises references to module, process, filesystem and network
/// primitives, and drops `export` keywords.
pub fn sanitize(code: &str) -> String {
    let without_exports = EXPORT_KEYWORD_RE.replace_all(code, "$1");
    BLOCKED_IDENT_RE
        .replace_all(&without_exports, "__blocked_${1}__")
        .into_owned()
}

/// Name of the first top-level function or binding declared in `code`.
pub fn exported_name(code: &str) -> Option<String> {
    EXPORTED_NAME_RE.captures(code).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    })
}

pub fn new_marker() -> String {
    format!("{VERDICT_MARKER_PREFIX}{}__", Uuid::new_v4().simple())
}

pub fn build_script(submission: &str, test_code: &str) -> Result<HarnessScript, SandboxError> {
    let sanitized = sanitize(submission);
    let name = exported_name(&sanitized).ok_or(SandboxError::NoExportedFunction)?;
    let marker = new_marker();

    // Single pass, so placeholder text inside user code is never expanded.
    let source = PLACEHOLDER_RE.replace_all(TEMPLATE, |caps: &Captures| match &caps[1] {
        "MARKER" => js_string(&marker),
        "SUBMISSION" => js_string(&sanitized),
        "EXPORT" => js_string(&name),
        _ => js_string(test_code),
    });

    Ok(HarnessScript {
        source: source.into_owned(),
        marker,
    })
}

/// Last line carrying `marker`, if the harness got to report.
pub fn parse_verdict(stdout: &str, marker: &str) -> Option<Result<Verdict, SandboxError>> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim_end().strip_prefix(marker))
        .map(|json| {
            serde_json::from_str::<Verdict>(json)
                .map_err(|source| SandboxError::InvalidVerdict { source })
        })
}

fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_blocks_dangerous_identifiers() {
        let code = "const fs = require('fs');\nprocess.exit(1);\nglobalThis.x = 1;";
        let cleaned = sanitize(code);

        assert!(cleaned.contains("__blocked_require__('fs')"));
        assert!(cleaned.contains("__blocked_process__.exit(1)"));
        assert!(cleaned.contains("__blocked_globalThis__.x"));
        assert!(!cleaned.contains("require("));
    }

    #[test]
    fn test_sanitize_leaves_ordinary_words_alone() {
        let code = "function add(a, b) { return a + b; }";
        assert_eq!(sanitize(code), code);
    }

    #[test]
    fn test_sanitize_strips_export_keywords() {
        let code = "export default function greet() {}\nexport const x = 1;";
        assert_eq!(sanitize(code), "function greet() {}\nconst x = 1;");
    }

    #[test]
    fn test_exported_name_prefers_first_declaration() {
        assert_eq!(exported_name("function add(a, b) {}\nfunction sub() {}").as_deref(), Some("add"));
        assert_eq!(exported_name("const double = (n) => n * 2;").as_deref(), Some("double"));
        assert_eq!(exported_name("async function load() {}").as_deref(), Some("load"));
    }

    #[test]
    fn test_exported_name_ignores_nested_declarations() {
        let code = "  function inner() {}\n1 + 1;";
        assert_eq!(exported_name(code), None);
    }

    #[test]
    fn test_build_script_requires_a_function() {
        let err = build_script("1 + 1;", "return true;").unwrap_err();
        assert!(matches!(err, SandboxError::NoExportedFunction));
    }

    #[test]
    fn test_build_script_embeds_sources_as_string_literals() {
        let script = build_script("function f() { return \"hi\"; }", "return solution() === \"hi\";")
            .unwrap();

        assert!(script.source.contains(r#""function f() { return \"hi\"; }""#));
        assert!(script.source.contains(r#""return solution() === \"hi\";""#));
        assert!(script.source.contains(r#""f""#));
        assert!(!script.source.contains("__SUBMISSION__"));
    }

    #[test]
    fn test_build_script_does_not_expand_placeholders_in_user_code() {
        let script = build_script("function f() { return '__TEST__'; }", "return true;").unwrap();
        assert!(script.source.contains("return '__TEST__';"));
    }

    #[test]
    fn test_every_script_gets_its_own_marker() {
        let first = build_script("function f() {}", "return true;").unwrap();
        let second = build_script("function f() {}", "return true;").unwrap();

        assert_ne!(first.marker, second.marker);
        assert!(first.marker.starts_with(VERDICT_MARKER_PREFIX));
        assert!(first.source.contains(&format!("\"{}\"", first.marker)));
    }

    #[test]
    fn test_globals_are_captured_before_the_submission_runs() {
        let script = build_script("function f() {}", "return true;").unwrap();
        let source = &script.source;

        let submission_at = source.find("new SyncFunction(").unwrap();
        for capture in ["const toBoolean = Boolean", "const stringify = JSON.stringify", "freeze(Promise.prototype)"] {
            assert!(source.find(capture).unwrap() < submission_at, "{capture}");
        }
    }

    #[test]
    fn test_parse_verdict_uses_last_marker_line() {
        let marker = new_marker();
        let stdout = format!(
            "noise\n{marker}{{\"passed\":false,\"error\":\"first\"}}\n\n{marker}{{\"passed\":true,\"error\":null}}\n"
        );
        let verdict = parse_verdict(&stdout, &marker).unwrap().unwrap();
        assert_eq!(verdict, Verdict::pass());
    }

    #[test]
    fn test_parse_verdict_ignores_lines_with_another_marker() {
        let marker = new_marker();
        let forged = format!("{VERDICT_MARKER_PREFIX}_{{\"passed\":true,\"error\":null}}\n");
        let other = format!("{}{{\"passed\":true,\"error\":null}}\n", new_marker());

        assert!(parse_verdict(&forged, &marker).is_none());
        assert!(parse_verdict(&other, &marker).is_none());
    }

    #[test]
    fn test_parse_verdict_absent() {
        assert!(parse_verdict("hello\nworld\n", &new_marker()).is_none());
    }
}
