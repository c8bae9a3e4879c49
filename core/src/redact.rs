// Argument redaction for spawn logs

use regex::Regex;
use std::sync::LazyLock;

static SENSITIVE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(pass|password|token|secret|key|bearer)").expect("static regex")
});

/// Copy of `args` with sensitive `NAME=value` assignments masked.
///
/// The argument after `-e` is an env assignment (as in `docker run -e`); a
/// bare sensitive name there is masked too, since its value comes from the
/// caller's environment.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out = args.to_vec();
    let mut i = 0;
    while i < out.len() {
        if out[i] == "-e" && i + 1 < out.len() {
            let assignment = &out[i + 1];
            let masked = match assignment.split_once('=') {
                Some((name, _)) if !name.is_empty() && SENSITIVE_KEY.is_match(name) => {
                    Some(format!("{name}=***"))
                }
                None if SENSITIVE_KEY.is_match(assignment) => Some(format!("{assignment}=***")),
                _ => None,
            };
            if let Some(masked) = masked {
                out[i + 1] = masked;
            }
            i += 2;
            continue;
        }
        if let Some((name, _)) = out[i].split_once('=') {
            if !name.is_empty() && SENSITIVE_KEY.is_match(name) {
                out[i] = format!("{name}=***");
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_redacts_assignments() {
        let out = redact_args(&args(&["--db", "API_TOKEN=abc", "MODE=fast", "x"]));
        assert_eq!(out, args(&["--db", "API_TOKEN=***", "MODE=fast", "x"]));
    }

    #[test]
    fn test_redacts_env_flag_values() {
        let out = redact_args(&args(&[
            "run", "-e", "GITHUB_PERSONAL_ACCESS_TOKEN", "-e", "Password=hunter2", "-e", "LANG=C",
        ]));
        assert_eq!(
            out,
            args(&[
                "run",
                "-e",
                "GITHUB_PERSONAL_ACCESS_TOKEN=***",
                "-e",
                "Password=***",
                "-e",
                "LANG=C",
            ])
        );
    }

    #[test]
    fn test_leaves_plain_args_alone() {
        let input = args(&["server.js", "--port", "9000", "=value"]);
        assert_eq!(redact_args(&input), input);
    }
}
