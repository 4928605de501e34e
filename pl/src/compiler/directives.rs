//! Built-in directive passes
//!
//! Each pass is a pure text rewrite. They run in the order of [`PASSES`]; later
//! passes see the output of earlier ones, so the order is part of the language.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::CompileContext;
use super::scan::{Args, Trim, quote, rewrite, split_args, string_literal};

/// A named rewrite pass
pub struct Pass {
    pub name: &'static str,
    pub rewrite: fn(&str, &CompileContext<'_>) -> String,
}

/// Built-in passes in execution order
pub static PASSES: &[Pass] = &[
    Pass { name: "comment", rewrite: comment },
    Pass { name: "html_comment", rewrite: html_comment },
    Pass { name: "ternary", rewrite: ternary },
    Pass { name: "preserved", rewrite: preserved },
    Pass { name: "echo", rewrite: echo },
    Pass { name: "variable", rewrite: variable },
    Pass { name: "forelse", rewrite: forelse },
    Pass { name: "empty", rewrite: forelse_empty },
    Pass { name: "endforelse", rewrite: endforelse },
    Pass { name: "opening_statements", rewrite: opening_statements },
    Pass { name: "else", rewrite: else_branch },
    Pass { name: "continue", rewrite: continue_stmt },
    Pass { name: "break", rewrite: break_stmt },
    Pass { name: "closing_statements", rewrite: closing_statements },
    Pass { name: "each", rewrite: each },
    Pass { name: "unless", rewrite: unless },
    Pass { name: "endunless", rewrite: endunless },
    Pass { name: "include_if", rewrite: include_if },
    Pass { name: "include", rewrite: include },
    Pass { name: "head", rewrite: head },
    Pass { name: "partial", rewrite: partial },
    Pass { name: "section", rewrite: section },
    Pass { name: "component", rewrite: component },
    Pass { name: "extends", rewrite: extends },
    Pass { name: "yield", rewrite: yield_section },
    Pass { name: "show", rewrite: show },
    Pass { name: "start_section", rewrite: start_section },
    Pass { name: "close_section", rewrite: close_section },
    Pass { name: "php", rewrite: raw_open },
    Pass { name: "endphp", rewrite: raw_close },
    Pass { name: "json", rewrite: json },
    Pass { name: "endhtml", rewrite: endhtml },
    Pass { name: "doctype", rewrite: doctype },
    Pass { name: "script", rewrite: script },
    Pass { name: "endscript", rewrite: endscript },
    Pass { name: "javascript", rewrite: javascript },
    Pass { name: "lang", rewrite: lang },
    Pass { name: "choice", rewrite: choice },
    Pass { name: "csrf", rewrite: csrf },
];

static BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{\{--.*?--\}\}").expect("static regex"));
static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{--[^\n]*\n?").expect("static regex"));
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"###(.*?)###").expect("static regex"));
static TERNARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\{\s*\$?([A-Za-z_]\w*)\s+or\s+['"]([^'"]*)['"]\s*\}\}"#).expect("static regex")
});
static PRESERVED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\{\{(.+?)\}\}").expect("static regex"));
static ECHO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{(.+?)\}\}").expect("static regex"));
static AS_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+as\s+").expect("static regex"));

fn code(statement: &str) -> String {
    format!("<% {} %>", statement)
}

fn echo_call(call: &str) -> String {
    format!("<%= {} %>", call)
}

fn args_or_empty(args: Option<&str>) -> &str {
    args.unwrap_or_default()
}

/// `{{-- ... --}}` block comments, then unterminated `{{--` line comments
fn comment(text: &str, _ctx: &CompileContext<'_>) -> String {
    let text = BLOCK_COMMENT.replace_all(text, "");
    LINE_COMMENT.replace_all(&text, "").into_owned()
}

/// `###note###` becomes a literal HTML comment
fn html_comment(text: &str, _ctx: &CompileContext<'_>) -> String {
    HTML_COMMENT
        .replace_all(text, |caps: &Captures<'_>| format!("<!-- {} -->", caps[1].trim()))
        .into_owned()
}

/// `{{ $name or 'fallback' }}` checks the binding at render time
fn ternary(text: &str, _ctx: &CompileContext<'_>) -> String {
    TERNARY
        .replace_all(text, |caps: &Captures<'_>| {
            let var = &caps[1];
            echo_call(&format!("isset(${var}) ? ${var} : {}", quote(&caps[2])))
        })
        .into_owned()
}

/// `@{{ expr }}` renders the braces themselves
fn preserved(text: &str, _ctx: &CompileContext<'_>) -> String {
    PRESERVED
        .replace_all(text, |caps: &Captures<'_>| echo_call(&format!("untouch({})", quote(&caps[1]))))
        .into_owned()
}

fn echo(text: &str, _ctx: &CompileContext<'_>) -> String {
    ECHO.replace_all(text, |caps: &Captures<'_>| echo_call(caps[1].trim()))
        .into_owned()
}

/// `@isset(x)` and `@empty(x)` open conditional blocks
fn variable(text: &str, _ctx: &CompileContext<'_>) -> String {
    let text = rewrite(text, "isset", Args::Required, Trim::AFTER, |args| {
        code(&format!("if (isset({})):", args_or_empty(args)))
    });
    rewrite(&text, "empty", Args::Required, Trim::AFTER, |args| {
        code(&format!("if (empty({})):", args_or_empty(args)))
    })
}

/// `@forelse(items as item)` guards the loop with a count check
fn forelse(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "forelse", Args::Required, Trim::AFTER, |args| {
        let args = args_or_empty(args);
        let iterable = AS_KEYWORD.split(args).next().unwrap_or(args).trim();
        format!(
            "{}{}",
            code(&format!("if (count({}) > 0):", iterable)),
            code(&format!("foreach ({}):", args.trim()))
        )
    })
}

fn forelse_empty(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "empty", Args::None, Trim::BOTH, |_| {
        format!("{}{}", code("endforeach;"), code("else:"))
    })
}

fn endforelse(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "endforelse", Args::None, Trim::BEFORE, |_| code("endif;"))
}

fn opening_statements(text: &str, _ctx: &CompileContext<'_>) -> String {
    let mut text = text.to_string();
    for keyword in ["if", "elseif", "foreach", "for", "while"] {
        let trim = if keyword == "elseif" { Trim::BOTH } else { Trim::AFTER };
        text = rewrite(&text, keyword, Args::Required, trim, |args| {
            code(&format!("{} ({}):", keyword, args_or_empty(args)))
        });
    }
    text
}

fn else_branch(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "else", Args::None, Trim::BOTH, |_| code("else:"))
}

fn loop_control(text: &str, keyword: &str) -> String {
    rewrite(text, keyword, Args::Optional, Trim::AFTER, |args| match args {
        Some(cond) => format!(
            "{}{}{}",
            code(&format!("if ({}):", cond)),
            code(&format!("{};", keyword)),
            code("endif;")
        ),
        None => code(&format!("{};", keyword)),
    })
}

fn continue_stmt(text: &str, _ctx: &CompileContext<'_>) -> String {
    loop_control(text, "continue")
}

fn break_stmt(text: &str, _ctx: &CompileContext<'_>) -> String {
    loop_control(text, "break")
}

fn closing_statements(text: &str, _ctx: &CompileContext<'_>) -> String {
    let mut text = text.to_string();
    for keyword in ["endif", "endforeach", "endfor", "endwhile"] {
        text = rewrite(&text, keyword, Args::None, Trim::BEFORE, |_| code(&format!("{};", keyword)));
    }
    text
}

fn each(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "each", Args::Required, Trim::NONE, |args| {
        echo_call(&format!("each({})", args_or_empty(args)))
    })
}

fn unless(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "unless", Args::Required, Trim::AFTER, |args| {
        code(&format!("if (!({})):", args_or_empty(args)))
    })
}

fn endunless(text: &str, _ctx: &CompileContext<'_>) -> String {
    let mut text = text.to_string();
    for keyword in ["endunless", "endisset", "endempty"] {
        text = rewrite(&text, keyword, Args::None, Trim::BEFORE, |_| code("endif;"));
    }
    text
}

/// `@includeIf('view')` is dropped at compile time when the view is missing
fn include_if(text: &str, ctx: &CompileContext<'_>) -> String {
    rewrite(text, "includeIf", Args::Required, Trim::NONE, |args| {
        let args = args_or_empty(args);
        let first = split_args(args).first().copied().unwrap_or_default();
        match string_literal(first) {
            Some(name) if ctx.exists(&name) => echo_call(&format!("include({})", args)),
            Some(_) => String::new(),
            None => echo_call(&format!("exists({}) ? include({}) : ''", first, args)),
        }
    })
}

fn include_call(text: &str, directive: &str, helper: &str) -> String {
    rewrite(text, directive, Args::Required, Trim::NONE, |args| {
        echo_call(&format!("{}({})", helper, args_or_empty(args)))
    })
}

fn include(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "include", "include")
}

fn head(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "head", "partial")
}

fn partial(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "partial", "partial")
}

fn section(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "section", "section")
}

fn component(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "component", "component")
}

/// `@extends` moves to the end: the child body fills sections before the
/// layout renders them
fn extends(text: &str, _ctx: &CompileContext<'_>) -> String {
    let mut layouts = Vec::new();
    let mut text = rewrite(text, "extends", Args::Required, Trim::BEFORE, |args| {
        layouts.push(args_or_empty(args).to_string());
        String::new()
    });
    for layout in layouts {
        text.push_str(&echo_call(&format!("include({})", layout)));
    }
    text
}

fn yield_section(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "yield", Args::Required, Trim::NONE, |args| {
        echo_call(&format!("yield({})", args_or_empty(args)))
    })
}

fn show(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "show", Args::None, Trim::BEFORE, |_| echo_call("yield(close_section())"))
}

fn start_section(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "usesection", Args::Required, Trim::AFTER, |args| {
        code(&format!("start_section({});", args_or_empty(args)))
    })
}

fn close_section(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "endsection", Args::None, Trim::BEFORE, |_| code("close_section();"))
}

fn raw_open(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "php", Args::None, Trim::NONE, |_| "<%".to_string())
}

fn raw_close(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "endphp", Args::None, Trim::NONE, |_| "%>".to_string())
}

fn json(text: &str, _ctx: &CompileContext<'_>) -> String {
    rewrite(text, "json", Args::Required, Trim::NONE, |args| {
        echo_call(&format!("json({})", args_or_empty(args)))
    })
}

fn literal(text: &str, directive: &str, replacement: &str) -> String {
    rewrite(text, directive, Args::None, Trim::NONE, |_| replacement.to_string())
}

fn endhtml(text: &str, _ctx: &CompileContext<'_>) -> String {
    literal(text, "endhtml", "</html>")
}

fn doctype(text: &str, _ctx: &CompileContext<'_>) -> String {
    literal(text, "doctype", "<!DOCTYPE html>")
}

fn script(text: &str, _ctx: &CompileContext<'_>) -> String {
    literal(text, "script", "<script>")
}

fn endscript(text: &str, _ctx: &CompileContext<'_>) -> String {
    literal(text, "endscript", "</script>")
}

fn javascript(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "javascript", "javascript")
}

fn lang(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "lang", "lang")
}

fn choice(text: &str, _ctx: &CompileContext<'_>) -> String {
    include_call(text, "choice", "choice")
}

fn csrf(text: &str, _ctx: &CompileContext<'_>) -> String {
    literal(text, "csrf", "<%= csrf() %>")
}
