//! # Restricted Template Language
//!
//! A small, intentionally limited Go-template-like renderer: field access
//! (`.Secrets.password`), `range $k, $v := .Secrets` / `if` / `else` / `end`
//! blocks, `-}}`/`{{-` whitespace trimming, and a fixed pipe-function
//! allow-list. There is no user-reachable filesystem, network, or
//! arbitrary-code escape hatch — every function a template can call is
//! named explicitly in [`call_function`]. Errors are redacted to avoid
//! leaking secret material into reconcile logs or `Status.Conditions`.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template syntax error")]
    Syntax,
    #[error("unknown field path")]
    UnknownPath,
    #[error("unknown template function")]
    UnknownFunction,
    #[error("template function received the wrong argument type")]
    BadArgument,
}

/// Evaluation context: `.` resolves against `root`, `$name` resolves
/// against `vars`.
pub struct TemplateContext<'a> {
    pub root: &'a Value,
    pub vars: HashMap<String, Value>,
}

impl<'a> TemplateContext<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            vars: HashMap::new(),
        }
    }
}

/// Render `template` against `ctx`, returning the output bytes.
pub fn render(template: &str, ctx: &mut TemplateContext) -> Result<String, RenderError> {
    let nodes = lex(template)?;
    let ast = parse(&nodes)?;
    let mut out = String::new();
    eval_block(&ast, ctx, &mut out)?;
    Ok(out)
}

#[derive(Debug, Clone)]
enum Token {
    Text(String),
    Action { body: String, trim_left: bool, trim_right: bool },
}

fn lex(input: &str) -> Result<Vec<Token>, RenderError> {
    let mut tokens = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or(RenderError::Syntax)?;
        let mut body = &after_open[..end];
        let trim_left = body.starts_with('-');
        if trim_left {
            body = body[1..].trim_start();
        }
        let trim_right = body.ends_with('-');
        if trim_right {
            body = body[..body.len() - 1].trim_end();
        }
        tokens.push(Token::Action {
            body: body.trim().to_string(),
            trim_left,
            trim_right,
        });
        rest = &after_open[end + 2..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(apply_trim(tokens))
}

/// Strip trailing/leading whitespace around trim-marked actions, mirroring
/// the `{{-`/`-}}` convention.
fn apply_trim(mut tokens: Vec<Token>) -> Vec<Token> {
    for i in 0..tokens.len() {
        let (trim_left, trim_right) = match &tokens[i] {
            Token::Action { trim_left, trim_right, .. } => (*trim_left, *trim_right),
            Token::Text(_) => continue,
        };
        if trim_left {
            if let Some(Token::Text(prev)) = tokens.get_mut(i.wrapping_sub(1)).filter(|_| i > 0) {
                *prev = prev.trim_end().to_string();
            }
        }
        if trim_right {
            if let Some(Token::Text(next)) = tokens.get_mut(i + 1) {
                *next = next.trim_start().to_string();
            }
        }
    }
    tokens
}

#[derive(Debug)]
enum Node {
    Text(String),
    Print(Expr),
    If {
        cond: Expr,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },
    Range {
        key_var: Option<String>,
        value_var: String,
        source: Expr,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
enum Expr {
    Path(Vec<String>),
    Var(String),
    Literal(Value),
    Pipeline(Box<Expr>, Vec<(String, Vec<Expr>)>),
    /// A bare function call used as a standalone expression, e.g.
    /// `printf "%s=%v\n" $k $v`, as opposed to a pipeline stage.
    Call(String, Vec<Expr>),
}

fn parse(tokens: &[Token]) -> Result<Vec<Node>, RenderError> {
    let mut pos = 0;
    let (nodes, next) = parse_block(tokens, &mut pos, &["end", "else"])?;
    let _ = next;
    Ok(nodes)
}

/// Parses nodes until a control keyword in `stop_on` is encountered (which
/// is left unconsumed) or the token stream ends. Returns the parsed nodes
/// and which stop keyword (if any) was found.
fn parse_block(
    tokens: &[Token],
    pos: &mut usize,
    stop_on: &[&str],
) -> Result<(Vec<Node>, Option<String>), RenderError> {
    let mut nodes = Vec::new();
    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::Text(t) => {
                nodes.push(Node::Text(t.clone()));
                *pos += 1;
            }
            Token::Action { body, .. } => {
                let head = body.split_whitespace().next().unwrap_or("");
                if stop_on.contains(&head) {
                    return Ok((nodes, Some(head.to_string())));
                }
                match head {
                    "if" => {
                        *pos += 1;
                        let cond = parse_expr(body.trim_start_matches("if").trim())?;
                        let (then_branch, stop) = parse_block(tokens, pos, &["end", "else"])?;
                        let else_branch = if stop.as_deref() == Some("else") {
                            *pos += 1;
                            let (b, _) = parse_block(tokens, pos, &["end"])?;
                            b
                        } else {
                            Vec::new()
                        };
                        *pos += 1; // consume "end"
                        nodes.push(Node::If {
                            cond,
                            then_branch,
                            else_branch,
                        });
                    }
                    "range" => {
                        *pos += 1;
                        let (key_var, value_var, source) = parse_range_header(body)?;
                        let (body_nodes, _) = parse_block(tokens, pos, &["end"])?;
                        *pos += 1; // consume "end"
                        nodes.push(Node::Range {
                            key_var,
                            value_var,
                            source,
                            body: body_nodes,
                        });
                    }
                    _ => {
                        nodes.push(Node::Print(parse_expr(body)?));
                        *pos += 1;
                    }
                }
            }
        }
    }
    Ok((nodes, None))
}

fn parse_range_header(body: &str) -> Result<(Option<String>, String, Expr), RenderError> {
    // `range $k, $v := .Secrets` or `range $v := .Secrets`
    let rest = body.trim_start_matches("range").trim();
    let (vars_part, expr_part) = rest.split_once(":=").ok_or(RenderError::Syntax)?;
    let vars: Vec<&str> = vars_part.split(',').map(str::trim).collect();
    let source = parse_expr(expr_part.trim())?;
    match vars.len() {
        1 => Ok((None, strip_dollar(vars[0])?, source)),
        2 => Ok((Some(strip_dollar(vars[0])?), strip_dollar(vars[1])?, source)),
        _ => Err(RenderError::Syntax),
    }
}

fn strip_dollar(s: &str) -> Result<String, RenderError> {
    s.strip_prefix('$').map(str::to_string).ok_or(RenderError::Syntax)
}

fn parse_expr(input: &str) -> Result<Expr, RenderError> {
    let mut parts = input.split('|').map(str::trim);
    let head = parts.next().ok_or(RenderError::Syntax)?;
    let base = parse_head(head)?;
    let mut pipeline_calls = Vec::new();
    for stage in parts {
        let mut words = stage.split_whitespace();
        let name = words.next().ok_or(RenderError::Syntax)?.to_string();
        let args = words
            .map(parse_term)
            .collect::<Result<Vec<_>, _>>()?;
        pipeline_calls.push((name, args));
    }
    if pipeline_calls.is_empty() {
        Ok(base)
    } else {
        Ok(Expr::Pipeline(Box::new(base), pipeline_calls))
    }
}

/// Parses the leading term of a pipeline (before the first `|`), which may
/// itself be a bare function call like `printf "%s=%v\n" $k $v` rather than
/// a single path/var/literal term.
fn parse_head(head: &str) -> Result<Expr, RenderError> {
    let mut words = head.split_whitespace();
    let first = words.next().ok_or(RenderError::Syntax)?;
    let rest: Vec<&str> = words.collect();
    if !rest.is_empty() && is_bare_call_name(first) {
        let args = rest.into_iter().map(parse_term).collect::<Result<Vec<_>, _>>()?;
        return Ok(Expr::Call(first.to_string(), args));
    }
    parse_term(head)
}

fn is_bare_call_name(s: &str) -> bool {
    s != "true" && s != "false" && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

fn parse_term(token: &str) -> Result<Expr, RenderError> {
    if let Some(rest) = token.strip_prefix('$') {
        return Ok(Expr::Var(rest.to_string()));
    }
    if let Some(rest) = token.strip_prefix('.') {
        if rest.is_empty() {
            return Ok(Expr::Path(vec![]));
        }
        return Ok(Expr::Path(rest.split('.').map(str::to_string).collect()));
    }
    if let Ok(n) = token.parse::<i64>() {
        return Ok(Expr::Literal(Value::from(n)));
    }
    if token.starts_with('"') && token.ends_with('"') && token.len() >= 2 {
        return Ok(Expr::Literal(Value::String(unescape_string_literal(&token[1..token.len() - 1]))));
    }
    match token {
        "true" => Ok(Expr::Literal(Value::Bool(true))),
        "false" => Ok(Expr::Literal(Value::Bool(false))),
        _ => Err(RenderError::Syntax),
    }
}

/// Resolves the handful of backslash escapes a quoted template literal can
/// carry (`\n`, `\t`, `\"`, `\\`); anything else passes through unchanged.
fn unescape_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn eval_block(nodes: &[Node], ctx: &mut TemplateContext, out: &mut String) -> Result<(), RenderError> {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Print(expr) => {
                let v = eval_expr(expr, ctx)?;
                out.push_str(&value_to_string(&v));
            }
            Node::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&eval_expr(cond, ctx)?) {
                    eval_block(then_branch, ctx, out)?;
                } else {
                    eval_block(else_branch, ctx, out)?;
                }
            }
            Node::Range {
                key_var,
                value_var,
                source,
                body,
            } => {
                let collection = eval_expr(source, ctx)?;
                let Value::Object(map) = &collection else {
                    continue;
                };
                for (k, v) in map {
                    if let Some(kv) = key_var {
                        ctx.vars.insert(kv.clone(), Value::String(k.clone()));
                    }
                    ctx.vars.insert(value_var.clone(), v.clone());
                    eval_block(body, ctx, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval_expr(expr: &Expr, ctx: &TemplateContext) -> Result<Value, RenderError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => ctx.vars.get(name).cloned().ok_or(RenderError::UnknownPath),
        Expr::Path(segments) => resolve_path(ctx.root, segments),
        Expr::Pipeline(base, calls) => {
            let mut value = eval_expr(base, ctx)?;
            for (name, arg_exprs) in calls {
                let args = arg_exprs
                    .iter()
                    .map(|a| eval_expr(a, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                value = call_function(name, &value, &args)?;
            }
            Ok(value)
        }
        Expr::Call(name, arg_exprs) => {
            let args = arg_exprs
                .iter()
                .map(|a| eval_expr(a, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            call_bare_function(name, &args)
        }
    }
}

fn resolve_path(root: &Value, segments: &[String]) -> Result<Value, RenderError> {
    let mut current = root;
    for seg in segments {
        current = current.get(seg).ok_or(RenderError::UnknownPath)?;
    }
    Ok(current.clone())
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_str(v: &Value) -> Result<String, RenderError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

/// The complete allow-listed function set available to a template pipeline.
/// Anything not named here is rejected at parse-time error reporting as
/// [`RenderError::UnknownFunction`].
fn call_function(name: &str, input: &Value, args: &[Value]) -> Result<Value, RenderError> {
    match name {
        "upper" => Ok(Value::String(as_str(input)?.to_uppercase())),
        "lower" => Ok(Value::String(as_str(input)?.to_lowercase())),
        "trim" => Ok(Value::String(as_str(input)?.trim().to_string())),
        "quote" => Ok(Value::String(format!("{:?}", as_str(input)?))),
        "toString" => Ok(Value::String(as_str(input)?)),
        "b64enc" => {
            use base64::Engine;
            Ok(Value::String(
                base64::engine::general_purpose::STANDARD.encode(as_str(input)?.as_bytes()),
            ))
        }
        "b64dec" => {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(as_str(input)?.as_bytes())
                .map_err(|_| RenderError::BadArgument)?;
            Ok(Value::String(String::from_utf8_lossy(&decoded).into_owned()))
        }
        "default" => {
            if matches!(input, Value::Null) || as_str(input)?.is_empty() {
                Ok(args.first().cloned().unwrap_or(Value::Null))
            } else {
                Ok(input.clone())
            }
        }
        // In a pipeline, `fmt | printf` treats the piped-in value as the
        // last formatted argument: `{{ .v | printf "got %v" }}`.
        "printf" => {
            let fmt = as_str(args.first().ok_or(RenderError::BadArgument)?)?;
            let mut values: Vec<Value> = args[1..].to_vec();
            values.push(input.clone());
            Ok(Value::String(format_printf(&fmt, &values)?))
        }
        _ => Err(RenderError::UnknownFunction),
    }
}

/// Function set reachable only as a bare, standalone call (not piped into),
/// e.g. `{{ printf "%s=%v\n" $k $v }}`.
fn call_bare_function(name: &str, args: &[Value]) -> Result<Value, RenderError> {
    match name {
        "printf" => {
            let fmt = as_str(args.first().ok_or(RenderError::BadArgument)?)?;
            Ok(Value::String(format_printf(&fmt, &args[1..])?))
        }
        _ => Err(RenderError::UnknownFunction),
    }
}

/// Minimal `printf`-style formatter: `%s`/`%v` substitute the next value
/// as a string, `%d` as an integer, `%%` is a literal percent. Extra
/// arguments beyond the verbs consumed are ignored; a verb with no
/// remaining argument renders empty.
fn format_printf(fmt: &str, args: &[Value]) -> Result<String, RenderError> {
    let mut out = String::with_capacity(fmt.len());
    let mut arg_idx = 0;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') | Some('v') => {
                if let Some(v) = args.get(arg_idx) {
                    out.push_str(&value_to_string(v));
                }
                arg_idx += 1;
            }
            Some('d') => {
                if let Some(v) = args.get(arg_idx) {
                    let n = v.as_i64().ok_or(RenderError::BadArgument)?;
                    out.push_str(&n.to_string());
                }
                arg_idx += 1;
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_simple_field_access() {
        let root = json!({ "Secrets": { "password": "hunter2" } });
        let mut ctx = TemplateContext::new(&root);
        let out = render("pw={{ .Secrets.password }}", &mut ctx).unwrap();
        assert_eq!(out, "pw=hunter2");
    }

    #[test]
    fn pipeline_applies_functions_left_to_right() {
        let root = json!({ "v": "Hello" });
        let mut ctx = TemplateContext::new(&root);
        let out = render("{{ .v | upper | b64enc }}", &mut ctx).unwrap();
        use base64::Engine;
        assert_eq!(out, base64::engine::general_purpose::STANDARD.encode(b"HELLO"));
    }

    #[test]
    fn range_iterates_a_map_with_key_and_value_vars() {
        let root = json!({ "Secrets": { "a": "1", "b": "2" } });
        let mut ctx = TemplateContext::new(&root);
        let out = render("{{- range $k, $v := .Secrets }}{{ $k }}={{ $v }};{{ end -}}", &mut ctx).unwrap();
        assert!(out.contains("a=1;"));
        assert!(out.contains("b=2;"));
    }

    #[test]
    fn if_else_picks_the_matching_branch() {
        let root = json!({ "flag": true });
        let mut ctx = TemplateContext::new(&root);
        let out = render("{{ if .flag }}yes{{ else }}no{{ end }}", &mut ctx).unwrap();
        assert_eq!(out, "yes");
    }

    #[test]
    fn unknown_function_is_rejected() {
        let root = json!({ "v": "x" });
        let mut ctx = TemplateContext::new(&root);
        let err = render("{{ .v | exec }}", &mut ctx).unwrap_err();
        assert!(matches!(err, RenderError::UnknownFunction));
    }

    #[test]
    fn default_substitutes_for_missing_value() {
        let root = json!({ "v": "" });
        let mut ctx = TemplateContext::new(&root);
        let out = render(r#"{{ .v | default "fallback" }}"#, &mut ctx).unwrap();
        assert_eq!(out, "fallback");
    }

    #[test]
    fn bare_printf_call_formats_ranged_key_value_pairs() {
        let root = json!({ "Secrets": { "a": "1", "b": "2" } });
        let mut ctx = TemplateContext::new(&root);
        let out = render(
            r#"{{- range $k, $v := .Secrets }}{{printf "%s=%v\n" $k $v}}{{end -}}"#,
            &mut ctx,
        )
        .unwrap();
        assert!(out.contains("a=1\n"));
        assert!(out.contains("b=2\n"));
    }
}
