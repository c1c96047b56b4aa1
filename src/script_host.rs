use super::*;
use fancy_regex::Regex;
use std::sync::LazyLock;

/// Where a piece of source text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOrigin {
    /// Inline `<script>` body, including replayed deferred scripts.
    Inline,
    /// Body fetched for a `<script src>`.
    External(String),
    /// Listener body (event handlers, `data-pagespeed-onload`).
    Listener,
}

#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub source: &'a str,
    pub origin: ScriptOrigin,
    pub event: Option<&'a SyntheticEvent>,
}

/// Executes page script. The page never interprets source text itself.
pub trait ScriptHost {
    fn evaluate(&mut self, invocation: &Invocation<'_>, doc: &mut Document<'_>) -> Result<()>;

    /// Checks that `source` can be turned into a function body.
    fn compile(&mut self, source: &str) -> Result<()> {
        let _ = source;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Undefined,
    Number(i64),
    Str(String),
}

impl Value {
    fn as_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Number(n) => n.to_string(),
            Self::Str(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stmt {
    Assign { name: String, expr: Vec<Term> },
    Write { text: Vec<Term>, newline: bool },
    Open,
    Close,
    Log(Vec<Term>),
    Probe(String),
    Count(String),
    Listen { target: EventTarget, event: String, body: String },
    Inject(String),
    Throw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Number(i64),
    Str(String),
    Global(String),
    EventType,
    ReadyState,
}

/// A deterministic host for a tiny statement language, enough to drive and
/// observe replay:
///
/// ```text
/// window.x = 1; window.y = window.x + 1;
/// document.write('<p>hi</p>'); document.writeln("..."); document.open(); document.close();
/// log('tag ' + window.y); log(event.type); log(document.readyState);
/// probe('late');            // getElementById, logs "late=found" / "late=null"
/// count('div');             // getElementsByTagName, logs "div=2"
/// listen(window, 'load', "log('loaded')");
/// inject('a.js');           // createElement('script') + append to body
/// throw('boom');
/// ```
#[derive(Debug, Clone, Default)]
pub struct StatementHost {
    globals: HashMap<String, Value>,
    output: Vec<String>,
    evaluated: usize,
}

impl StatementHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines produced by `log`, `probe` and `count`, in execution order.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn global(&self, name: &str) -> Option<String> {
        self.globals.get(name).map(Value::as_string)
    }

    pub fn global_number(&self, name: &str) -> Option<i64> {
        match self.globals.get(name)? {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Number of successful and failed evaluations so far.
    pub fn evaluated(&self) -> usize {
        self.evaluated
    }

    fn eval_terms(
        &self,
        terms: &[Term],
        event: Option<&SyntheticEvent>,
        doc: &Document<'_>,
    ) -> Value {
        let mut acc: Option<Value> = None;
        for term in terms {
            let value = match term {
                Term::Number(n) => Value::Number(*n),
                Term::Str(s) => Value::Str(s.clone()),
                Term::Global(name) => self.globals.get(name).cloned().unwrap_or(Value::Undefined),
                Term::EventType => event
                    .map(|event| Value::Str(event.event_type.clone()))
                    .unwrap_or(Value::Undefined),
                Term::ReadyState => Value::Str(doc.ready_state().as_str().to_string()),
            };
            acc = Some(match (acc, value) {
                (None, value) => value,
                (Some(Value::Number(a)), Value::Number(b)) => Value::Number(a.saturating_add(b)),
                (Some(a), b) => Value::Str(format!("{}{}", a.as_string(), b.as_string())),
            });
        }
        acc.unwrap_or(Value::Undefined)
    }

    fn exec(
        &mut self,
        stmt: &Stmt,
        event: Option<&SyntheticEvent>,
        doc: &mut Document<'_>,
    ) -> Result<()> {
        match stmt {
            Stmt::Assign { name, expr } => {
                let value = self.eval_terms(expr, event, doc);
                self.globals.insert(name.clone(), value);
            }
            Stmt::Write { text, newline } => {
                let text = self.eval_terms(text, event, doc).as_string();
                if *newline {
                    doc.writeln(&text)?;
                } else {
                    doc.write(&text)?;
                }
            }
            Stmt::Open => doc.open()?,
            Stmt::Close => doc.close()?,
            Stmt::Log(expr) => {
                let line = self.eval_terms(expr, event, doc).as_string();
                self.output.push(line);
            }
            Stmt::Probe(id) => {
                let found = doc.get_element_by_id(id)?;
                let state = if found.is_some() { "found" } else { "null" };
                self.output.push(format!("{id}={state}"));
            }
            Stmt::Count(tag) => {
                let count = doc.get_elements_by_tag_name(tag)?.len();
                self.output.push(format!("{tag}={count}"));
            }
            Stmt::Listen {
                target,
                event: name,
                body,
            } => doc.add_event_listener(*target, name, Listener::script(body.clone()))?,
            Stmt::Inject(url) => {
                let script = doc.create_element("script")?;
                doc.set_attribute(script, "src", url)?;
                let parent = doc
                    .body()
                    .ok_or_else(|| Error::ScriptRuntime("document has no body".into()))?;
                doc.append_child(parent, script)?;
            }
            Stmt::Throw(message) => return Err(Error::ScriptRuntime(message.clone())),
        }
        Ok(())
    }
}

impl ScriptHost for StatementHost {
    fn evaluate(&mut self, invocation: &Invocation<'_>, doc: &mut Document<'_>) -> Result<()> {
        self.evaluated += 1;
        let stmts = parse_program(invocation.source)?;
        for stmt in &stmts {
            self.exec(stmt, invocation.event, doc)?;
        }
        Ok(())
    }

    fn compile(&mut self, source: &str) -> Result<()> {
        parse_program(source).map(|_| ())
    }
}

fn parse_program(source: &str) -> Result<Vec<Stmt>> {
    split_top_level(source, ';')?
        .iter()
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .map(parse_stmt)
        .collect()
}

type Pattern = LazyLock<Result<Regex>>;

static ASSIGN: Pattern = LazyLock::new(|| regex(r"^window\.([A-Za-z_$][\w$.]*)\s*=(?!=)\s*(.+)$"));
static CALL: Pattern = LazyLock::new(|| regex(r"^((?:document\.)?[A-Za-z_]\w*)\s*\((.*)\)$"));
static GLOBAL: Pattern = LazyLock::new(|| regex(r"^window\.([A-Za-z_$][\w$.]*)$"));

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| Error::ScriptRuntime(err.to_string()))
}

fn compiled(pattern: &'static Pattern) -> Result<&'static Regex> {
    pattern.as_ref().map_err(Clone::clone)
}

fn captures<'t>(re: &Regex, text: &'t str) -> Result<Option<fancy_regex::Captures<'t>>> {
    re.captures(text)
        .map_err(|err| Error::ScriptRuntime(err.to_string()))
}

fn parse_stmt(src: &str) -> Result<Stmt> {
    if let Some(caps) = captures(compiled(&ASSIGN)?, src)? {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let expr = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        return Ok(Stmt::Assign {
            name: name.to_string(),
            expr: parse_expr(expr)?,
        });
    }

    let Some(caps) = captures(compiled(&CALL)?, src)? else {
        return Err(Error::ScriptRuntime(format!("unsupported statement: {src}")));
    };
    let callee = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let raw_args = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let args = split_top_level(raw_args, ',')?
        .into_iter()
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect::<Vec<_>>();

    let arity = |expected: usize| -> Result<()> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(Error::ScriptRuntime(format!(
                "{callee} expects {expected} argument(s), got {}",
                args.len()
            )))
        }
    };

    match callee {
        "document.write" | "document.writeln" => {
            arity(1)?;
            Ok(Stmt::Write {
                text: parse_expr(&args[0])?,
                newline: callee == "document.writeln",
            })
        }
        "document.open" => {
            arity(0)?;
            Ok(Stmt::Open)
        }
        "document.close" => {
            arity(0)?;
            Ok(Stmt::Close)
        }
        "log" => {
            arity(1)?;
            Ok(Stmt::Log(parse_expr(&args[0])?))
        }
        "probe" => {
            arity(1)?;
            Ok(Stmt::Probe(parse_string_literal(&args[0])?))
        }
        "count" => {
            arity(1)?;
            Ok(Stmt::Count(parse_string_literal(&args[0])?))
        }
        "listen" => {
            arity(3)?;
            let target = match args[0].as_str() {
                "window" => EventTarget::Window,
                "document" => EventTarget::Document,
                other => {
                    return Err(Error::ScriptRuntime(format!("unknown listen target: {other}")));
                }
            };
            Ok(Stmt::Listen {
                target,
                event: parse_string_literal(&args[1])?,
                body: parse_string_literal(&args[2])?,
            })
        }
        "inject" => {
            arity(1)?;
            Ok(Stmt::Inject(parse_string_literal(&args[0])?))
        }
        "throw" => {
            arity(1)?;
            Ok(Stmt::Throw(parse_string_literal(&args[0])?))
        }
        other => Err(Error::ScriptRuntime(format!("unknown function: {other}"))),
    }
}

fn parse_expr(src: &str) -> Result<Vec<Term>> {
    split_top_level(src, '+')?
        .iter()
        .map(|part| parse_term(part.trim()))
        .collect()
}

fn parse_term(src: &str) -> Result<Term> {
    if src.starts_with('\'') || src.starts_with('"') {
        return parse_string_literal(src).map(Term::Str);
    }
    if let Ok(n) = src.parse::<i64>() {
        return Ok(Term::Number(n));
    }
    if src == "event.type" {
        return Ok(Term::EventType);
    }
    if src == "document.readyState" {
        return Ok(Term::ReadyState);
    }
    if let Some(caps) = captures(compiled(&GLOBAL)?, src)? {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return Ok(Term::Global(name.to_string()));
    }
    Err(Error::ScriptRuntime(format!("unsupported expression: {src}")))
}

fn parse_string_literal(src: &str) -> Result<String> {
    let quote = src
        .chars()
        .next()
        .filter(|ch| *ch == '\'' || *ch == '"')
        .ok_or_else(|| Error::ScriptRuntime(format!("expected string literal: {src}")))?;
    if src.len() < 2 || !src.ends_with(quote) {
        return Err(Error::ScriptRuntime(format!("unterminated string literal: {src}")));
    }
    Ok(unescape_string(&src[1..src.len() - 1]))
}

fn unescape_string(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Splits on `sep` outside of quotes and parentheses.
fn split_top_level(src: &str, sep: char) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in src.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::ScriptRuntime("unbalanced ')'".into()))?;
                current.push(ch);
            }
            c if c == sep && depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    if quote.is_some() {
        return Err(Error::ScriptRuntime("unterminated string literal".into()));
    }
    if depth != 0 {
        return Err(Error::ScriptRuntime("unbalanced '('".into()));
    }
    parts.push(current);
    Ok(parts)
}
