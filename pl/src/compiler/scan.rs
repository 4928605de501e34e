//! Directive scanning helpers
//!
//! Directives look like `@name`, `@name(args)` or `@name (args)`. Arguments are
//! delimited by balanced parentheses; quoted strings are skipped so a `)` inside
//! `'...'` does not close the list.

/// How a directive takes arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Args {
    /// `@name` only
    None,
    /// `@name(...)` only; a bare `@name` is left untouched
    Required,
    /// Either form; the parenthesis must follow on the same line
    Optional,
}

/// Which surrounding whitespace a directive swallows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Trim {
    pub before: bool,
    pub after: bool,
}

impl Trim {
    pub const NONE: Trim = Trim {
        before: false,
        after: false,
    };
    pub const BEFORE: Trim = Trim {
        before: true,
        after: false,
    };
    pub const AFTER: Trim = Trim {
        before: false,
        after: true,
    };
    pub const BOTH: Trim = Trim {
        before: true,
        after: true,
    };
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Returns the byte index just past the `)` matching the `(` at `open`
pub(crate) fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Rewrites every `@name` occurrence with the output of `f`
///
/// `f` receives the argument text without the outer parentheses, or `None`
/// for a bare directive.
pub(crate) fn rewrite<F>(text: &str, name: &str, args: Args, trim: Trim, mut f: F) -> String
where
    F: FnMut(Option<&str>) -> String,
{
    let marker = format!("@{}", name);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(&marker) {
        let start = cursor + found;
        let name_end = start + marker.len();

        if text[name_end..].chars().next().is_some_and(is_word) {
            out.push_str(&text[cursor..name_end]);
            cursor = name_end;
            continue;
        }

        let arg_span = match args {
            Args::None => None,
            Args::Required | Args::Optional => {
                let rest = &text[name_end..];
                // Arguments stay on the directive's line
                let gap = rest
                    .char_indices()
                    .find(|(_, c)| *c != ' ' && *c != '\t')
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let open = name_end + gap;
                if text[open..].starts_with('(') {
                    matching_paren(text, open).map(|close| (open, close))
                } else {
                    None
                }
            }
        };

        if args == Args::Required && arg_span.is_none() {
            out.push_str(&text[cursor..name_end]);
            cursor = name_end;
            continue;
        }

        out.push_str(&text[cursor..start]);
        if trim.before {
            let kept = out.trim_end().len();
            out.truncate(kept);
        }

        let (arg_text, end) = match arg_span {
            Some((open, close)) => (Some(&text[open + 1..close - 1]), close),
            None => (None, name_end),
        };
        out.push_str(&f(arg_text));

        cursor = end;
        if trim.after {
            cursor += text[cursor..].len() - text[cursor..].trim_start().len();
        }
    }

    out.push_str(&text[cursor..]);
    out
}

/// Splits an argument list at top-level commas
pub(crate) fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in args.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }

    let last = args[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

/// Returns the contents of a single- or double-quoted literal
pub(crate) fn string_literal(arg: &str) -> Option<String> {
    let arg = arg.trim();
    let quote = arg.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    if arg.len() < 2 || !arg.ends_with(quote) {
        return None;
    }

    let inner = &arg[1..arg.len() - 1];
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => value.push(chars.next()?),
            c if c == quote => return None,
            c => value.push(c),
        }
    }
    Some(value)
}

/// Quotes text as a single-quoted script literal
pub(crate) fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_paren_skips_quoted() {
        let text = "(foo(')'), \"(\")tail";
        let end = matching_paren(text, 0).unwrap();
        assert_eq!(&text[..end], "(foo(')'), \"(\")");
    }

    #[test]
    fn test_rewrite_required_args() {
        let out = rewrite("a @if($x) b @if(($y)) c", "if", Args::Required, Trim::NONE, |args| {
            format!("[{}]", args.unwrap())
        });
        assert_eq!(out, "a [$x] b [($y)] c");
    }

    #[test]
    fn test_rewrite_respects_word_boundary() {
        let out = rewrite("@include('a') @includeIf('b')", "include", Args::Required, Trim::NONE, |_| {
            "X".to_string()
        });
        assert_eq!(out, "X @includeIf('b')");
    }

    #[test]
    fn test_rewrite_leaves_bare_required_directive() {
        let out = rewrite("mail me @if you can", "if", Args::Required, Trim::NONE, |_| "X".to_string());
        assert_eq!(out, "mail me @if you can");
    }

    #[test]
    fn test_rewrite_trims_whitespace() {
        let out = rewrite("a   @endif\n b", "endif", Args::None, Trim::BEFORE, |_| "E".to_string());
        assert_eq!(out, "aE\n b");

        let out = rewrite("@if($a)   \n b", "if", Args::Required, Trim::AFTER, |_| "I".to_string());
        assert_eq!(out, "Ib");
    }

    #[test]
    fn test_required_args_stay_on_the_directive_line() {
        let out = rewrite("@empty\n($note)", "empty", Args::Required, Trim::NONE, |_| "X".to_string());
        assert_eq!(out, "@empty\n($note)");

        let out = rewrite("@empty \t($note)", "empty", Args::Required, Trim::NONE, |args| {
            format!("[{}]", args.unwrap())
        });
        assert_eq!(out, "[$note]");
    }

    #[test]
    fn test_rewrite_optional_args() {
        let out = rewrite("@break @break($i > 2)", "break", Args::Optional, Trim::NONE, |args| match args {
            Some(cond) => format!("<{}>", cond),
            None => "<>".to_string(),
        });
        assert_eq!(out, "<> <$i > 2>");
    }

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args("'view', ['a' => 1, 'b' => f(2, 3)], 'x,y'"),
            vec!["'view'", "['a' => 1, 'b' => f(2, 3)]", "'x,y'"]
        );
        assert!(split_args("").is_empty());
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal("'users.profile'"), Some("users.profile".to_string()));
        assert_eq!(string_literal("\"it\\\"s\""), Some("it\"s".to_string()));
        assert_eq!(string_literal("$name"), None);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("it's \\ ok"), "'it\\'s \\\\ ok'");
    }
}
