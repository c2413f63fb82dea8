/// Replace `${ENV_VAR}` placeholders in config text.
///
/// Unresolvable variables are left as-is; `$${VAR}` yields a literal
/// `${VAR}`.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// [`substitute_env`] with a custom lookup, testable without touching the
/// process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
                if chars.peek() != Some(&'{') {
                    result.push('$');
                }
            },
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                match (closed, lookup(&name)) {
                    (true, Some(value)) if !name.is_empty() => result.push_str(&value),
                    (true, _) => {
                        result.push_str("${");
                        result.push_str(&name);
                        result.push('}');
                    },
                    // Unterminated: emit the literal text.
                    (false, _) => {
                        result.push_str("${");
                        result.push_str(&name);
                    },
                }
            },
            _ => result.push('$'),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "RUNBOX_CLI" => Some("podman".to_string()),
            "RUNBOX_MEM" => Some("256m".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_vars() {
        assert_eq!(
            substitute_env_with("cli=${RUNBOX_CLI} memory=${RUNBOX_MEM}", lookup),
            "cli=podman memory=256m"
        );
    }

    #[test]
    fn leaves_unknown_and_unterminated() {
        assert_eq!(
            substitute_env_with("${RUNBOX_NONEXISTENT_XYZ}", lookup),
            "${RUNBOX_NONEXISTENT_XYZ}"
        );
        assert_eq!(substitute_env_with("x ${open", lookup), "x ${open");
        assert_eq!(substitute_env_with("${}", lookup), "${}");
    }

    #[test]
    fn escaped_placeholder_is_literal() {
        assert_eq!(substitute_env_with("$${RUNBOX_CLI}", lookup), "${RUNBOX_CLI}");
        assert_eq!(substitute_env_with("cost: $5 $$", lookup), "cost: $5 $$");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
