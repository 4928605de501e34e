//! Tree-walking interpreter for template script
//!
//! The interpreter can only read and write its own scope, call the pure
//! built-ins, and call whatever the [`Host`] chooses to expose. There is no
//! path from a template to the filesystem, the network or process control.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::ast::{AssignOp, BinaryOp, Expr, Node, Program, Stmt, UnaryOp};
use super::builtins;
use super::value::{Num, ValueExt, compare, expect_number, loose_eq};
use crate::error::RenderError;

type Result<T> = std::result::Result<T, RenderError>;

/// Variable bindings visible to a template
pub type Scope = HashMap<String, Value>;

/// Capabilities a template may use beyond its own scope
pub trait Host {
    /// Append text to the current output buffer
    fn write(&mut self, text: &str);

    /// Call a host function; `None` when the host does not provide `name`
    fn call(&mut self, name: &str, args: Vec<Value>, scope: &Scope) -> Option<Result<Value>>;
}

/// Control flow signal from executing a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Continue,
    Break,
}

enum Seg {
    Key(String),
    Pos(usize),
}

pub struct Interpreter<'h> {
    scope: Scope,
    host: &'h mut dyn Host,
}

impl<'h> Interpreter<'h> {
    pub fn new(scope: Scope, host: &'h mut dyn Host) -> Self {
        Self { scope, host }
    }

    pub fn run(&mut self, program: &Program) -> Result<()> {
        match self.exec_nodes(&program.nodes)? {
            Flow::Normal => Ok(()),
            flow => Err(RenderError::syntax(0, format!("{:?} outside of a loop", flow).to_lowercase())),
        }
    }

    fn exec_nodes(&mut self, nodes: &[Node]) -> Result<Flow> {
        for node in nodes {
            match self.exec_node(node)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_node(&mut self, node: &Node) -> Result<Flow> {
        match node {
            Node::Text(text) => self.host.write(text),
            Node::Echo(expr) => {
                let value = self.eval(expr)?;
                self.host.write(&value.render_to_string());
            }
            Node::Stmt(stmt) => self.exec_stmt(stmt)?,
            Node::If { branches, otherwise } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.is_truthy() {
                        return self.exec_nodes(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_nodes(body);
                }
            }
            Node::Foreach {
                iterable,
                key,
                value,
                body,
            } => {
                let items: Vec<(Value, Value)> = match self.eval(iterable)? {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| (Value::from(i), item))
                        .collect(),
                    Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
                    Value::Null => Vec::new(),
                    other => {
                        return Err(RenderError::type_error(format!(
                            "foreach expects array or object, got {}",
                            other.type_name()
                        )));
                    }
                };

                for (k, v) in items {
                    if let Some(key) = key {
                        self.scope.insert(key.clone(), k);
                    }
                    self.scope.insert(value.clone(), v);
                    if self.exec_nodes(body)? == Flow::Break {
                        break;
                    }
                }
            }
            Node::For { init, cond, step, body } => {
                for stmt in init {
                    self.exec_stmt(stmt)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !self.eval(cond)?.is_truthy() {
                            break;
                        }
                    }
                    if self.exec_nodes(body)? == Flow::Break {
                        break;
                    }
                    for stmt in step {
                        self.exec_stmt(stmt)?;
                    }
                }
            }
            Node::While { cond, body } => {
                while self.eval(cond)?.is_truthy() {
                    if self.exec_nodes(body)? == Flow::Break {
                        break;
                    }
                }
            }
            Node::Continue => return Ok(Flow::Continue),
            Node::Break => return Ok(Flow::Break),
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Echo(expr) => {
                let value = self.eval(expr)?;
                self.host.write(&value.render_to_string());
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                let new = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => arithmetic(BinaryOp::Add, &self.eval(target)?, &rhs)?,
                    AssignOp::Sub => arithmetic(BinaryOp::Sub, &self.eval(target)?, &rhs)?,
                    AssignOp::Concat => {
                        let current = self.eval_soft(target)?.unwrap_or(Value::Null);
                        Value::String(current.render_to_string() + &rhs.render_to_string())
                    }
                };
                self.assign(target, new)?;
            }
            Stmt::Step { target, delta } => {
                let current = self.eval(target)?;
                let new = arithmetic(BinaryOp::Add, &current, &Value::from(*delta))?;
                self.assign(target, new)?;
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<()> {
        let mut path = Vec::new();
        let root = self.place(target, &mut path)?;
        let slot = self.scope.entry(root).or_insert(Value::Null);
        let slot = path.iter().try_fold(slot, descend_mut)?;
        *slot = value;
        Ok(())
    }

    /// Resolves an assignable expression to its root variable and path
    fn place(&mut self, target: &Expr, path: &mut Vec<Seg>) -> Result<String> {
        match target {
            Expr::Var(name) => Ok(name.clone()),
            Expr::Member(base, key) => {
                let root = self.place(base, path)?;
                path.push(Seg::Key(key.clone()));
                Ok(root)
            }
            Expr::Index(base, index) => {
                let root = self.place(base, path)?;
                let seg = match self.eval(index)? {
                    Value::String(key) => Seg::Key(key),
                    Value::Number(n) if n.as_u64().is_some() => Seg::Pos(n.as_u64().unwrap_or_default() as usize),
                    other => return Err(RenderError::type_error(format!("cannot index with {}", other.type_name()))),
                };
                path.push(seg);
                Ok(root)
            }
            _ => Err(RenderError::type_error("cannot assign to this expression")),
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| RenderError::UndefinedVariable { name: name.clone() }),
            Expr::Member(base, key) => {
                let base = self.eval(base)?;
                Ok(member(&base, key))
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                Ok(element(&base, &index))
            }
            Expr::Array(items) => self.array(items),
            Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!self.eval(operand)?.is_truthy())),
            Expr::Unary(UnaryOp::Neg, operand) => {
                let value = self.eval(operand)?;
                arithmetic(BinaryOp::Sub, &Value::from(0), &value)
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                Ok(Value::Bool(self.eval(left)?.is_truthy() && self.eval(right)?.is_truthy()))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                Ok(Value::Bool(self.eval(left)?.is_truthy() || self.eval(right)?.is_truthy()))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Coalesce(left, right) => match self.eval_soft(left)? {
                Some(value) if !value.is_null() => Ok(value),
                _ => self.eval(right),
            },
            Expr::Ternary { cond, then, otherwise } => {
                let cond_value = self.eval(cond)?;
                if cond_value.is_truthy() {
                    match then {
                        Some(then) => self.eval(then),
                        None => Ok(cond_value),
                    }
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { name, args } => self.call(name, args),
        }
    }

    /// Evaluates without faulting on undefined names; `None` when unresolved
    fn eval_soft(&mut self, expr: &Expr) -> Result<Option<Value>> {
        match expr {
            Expr::Var(name) => Ok(self.scope.get(name).cloned()),
            Expr::Member(base, key) => Ok(self
                .eval_soft(base)?
                .map(|base| member(&base, key))
                .filter(|v| !v.is_null())),
            Expr::Index(base, index) => match self.eval_soft(base)? {
                Some(base) => {
                    let index = self.eval(index)?;
                    Ok(Some(element(&base, &index)).filter(|v| !v.is_null()))
                }
                None => Ok(None),
            },
            _ => self.eval(expr).map(Some),
        }
    }

    fn array(&mut self, items: &[super::ast::ArrayItem]) -> Result<Value> {
        if items.iter().all(|item| item.key.is_none()) {
            let values = items
                .iter()
                .map(|item| self.eval(&item.value))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Value::Array(values));
        }

        let mut map = Map::new();
        let mut next_index = 0usize;
        for item in items {
            let key = match &item.key {
                Some(key) => {
                    let key = self.eval(key)?;
                    if let Some(next) = key.as_u64().and_then(|n| usize::try_from(n).ok()?.checked_add(1)) {
                        next_index = next_index.max(next);
                    }
                    key.render_to_string()
                }
                None => {
                    next_index += 1;
                    (next_index - 1).to_string()
                }
            };
            let value = self.eval(&item.value)?;
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value> {
        match name {
            "isset" => {
                for arg in args {
                    if !self.eval_soft(arg)?.is_some_and(|v| !v.is_null()) {
                        return Ok(Value::Bool(false));
                    }
                }
                return Ok(Value::Bool(!args.is_empty()));
            }
            "empty" => {
                let Some(arg) = args.first() else {
                    return Err(RenderError::Function {
                        name: "empty".to_string(),
                        message: "missing argument 1".to_string(),
                    });
                };
                let value = self.eval_soft(arg)?;
                return Ok(Value::Bool(!value.is_some_and(|v| v.is_truthy())));
            }
            _ => {}
        }

        let values = args.iter().map(|arg| self.eval(arg)).collect::<Result<Vec<_>>>()?;

        if let Some(result) = builtins::call(name, &values) {
            return result;
        }

        self.host
            .call(name, values, &self.scope)
            .unwrap_or_else(|| Err(RenderError::UndefinedFunction { name: name.to_string() }))
    }
}

fn descend_mut<'a>(slot: &'a mut Value, seg: &Seg) -> Result<&'a mut Value> {
    if slot.is_null() {
        *slot = match seg {
            Seg::Key(_) => Value::Object(Map::new()),
            Seg::Pos(_) => Value::Array(Vec::new()),
        };
    }

    match (slot, seg) {
        (Value::Object(map), Seg::Key(key)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
        (Value::Object(map), Seg::Pos(pos)) => Ok(map.entry(pos.to_string()).or_insert(Value::Null)),
        (Value::Array(items), Seg::Pos(pos)) => {
            if *pos == items.len() {
                items.push(Value::Null);
            }
            let len = items.len();
            items
                .get_mut(*pos)
                .ok_or_else(|| RenderError::type_error(format!("index {} out of bounds for length {}", pos, len)))
        }
        (other, _) => Err(RenderError::type_error(format!(
            "cannot assign into {}",
            other.type_name()
        ))),
    }
}

/// `value.key`; missing members are null
fn member(base: &Value, key: &str) -> Value {
    match base {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        Value::Array(items) => key
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// `value[index]`; missing elements are null
fn element(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        (_, key) => member(base, &key.render_to_string()),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let result = match op {
        BinaryOp::Concat => Value::String(left.render_to_string() + &right.render_to_string()),
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(left, right)),
        BinaryOp::Identical => Value::Bool(left == right),
        BinaryOp::NotIdentical => Value::Bool(left != right),
        BinaryOp::Lt => Value::Bool(compare(left, right)?.is_lt()),
        BinaryOp::Le => Value::Bool(compare(left, right)?.is_le()),
        BinaryOp::Gt => Value::Bool(compare(left, right)?.is_gt()),
        BinaryOp::Ge => Value::Bool(compare(left, right)?.is_ge()),
        _ => return arithmetic(op, left, right),
    };
    Ok(result)
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        other => return Err(RenderError::type_error(format!("{:?} is not arithmetic", other))),
    };
    let a = expect_number(left, symbol)?;
    let b = expect_number(right, symbol)?;

    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b.as_f64() == 0.0 {
        return Err(RenderError::DivisionByZero);
    }

    let overflow = || RenderError::type_error(format!("integer overflow in {}", symbol));
    let result = match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            BinaryOp::Add => Num::Int(x.checked_add(y).ok_or_else(overflow)?),
            BinaryOp::Sub => Num::Int(x.checked_sub(y).ok_or_else(overflow)?),
            BinaryOp::Mul => Num::Int(x.checked_mul(y).ok_or_else(overflow)?),
            BinaryOp::Rem => Num::Int(x.checked_rem(y).ok_or_else(overflow)?),
            _ if x.checked_rem(y) == Some(0) => Num::Int(x.checked_div(y).ok_or_else(overflow)?),
            _ => Num::Float(x as f64 / y as f64),
        },
        (x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            Num::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                _ => x % y,
            })
        }
    };
    result.into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        out: String,
    }

    impl Host for Recorder {
        fn write(&mut self, text: &str) {
            self.out.push_str(text);
        }

        fn call(&mut self, name: &str, args: Vec<Value>, _scope: &Scope) -> Option<Result<Value>> {
            match name {
                "shout" => Some(Ok(Value::from(args[0].render_to_string().to_uppercase() + "!"))),
                _ => None,
            }
        }
    }

    fn run_with(source: &str, data: Value) -> Result<String> {
        let program = parse(source)?;
        let scope: Scope = match data {
            Value::Object(map) => map.into_iter().collect(),
            _ => Scope::new(),
        };
        let mut host = Recorder::default();
        Interpreter::new(scope, &mut host).run(&program)?;
        Ok(host.out)
    }

    fn run(source: &str, data: Value) -> String {
        run_with(source, data).unwrap()
    }

    #[test]
    fn test_conditionals() {
        let source = "Hello <%= name %>! <% if ($vip): %>VIP<% endif; %>";
        assert_eq!(run(source, json!({"name": "Ada", "vip": true})), "Hello Ada! VIP");
        assert_eq!(run(source, json!({"name": "Ada", "vip": false})), "Hello Ada! ");
    }

    #[test]
    fn test_elseif_chain() {
        let source = "<% if ($n > 10): %>big<% elseif ($n > 5): %>mid<% else: %>small<% endif; %>";
        assert_eq!(run(source, json!({"n": 7})), "mid");
        assert_eq!(run(source, json!({"n": 1})), "small");
    }

    #[test]
    fn test_foreach_continue_break() {
        let source = "<% foreach ($xs as $i => $x): %><% if ($x == 2): %><% continue; %><% endif; %>\
                      <% if ($x == 4): %><% break; %><% endif; %><%= $i %>:<%= $x %> <% endforeach; %>";
        assert_eq!(run(source, json!({"xs": [1, 2, 3, 4, 5]})), "0:1 2:3 ");
    }

    #[test]
    fn test_for_and_while_loops() {
        assert_eq!(
            run("<% for ($i = 0; $i < 3; $i++): %><%= $i %><% endfor; %>", json!({})),
            "012"
        );
        assert_eq!(
            run("<% $n = 3; %><% while ($n > 0): %><%= $n %><% $n -= 1; %><% endwhile; %>", json!({})),
            "321"
        );
    }

    #[test]
    fn test_members_indexes_and_assignment() {
        let data = json!({"user": {"name": "Ada", "tags": ["a", "b"]}});
        assert_eq!(run("<%= user.name %>/<%= $user->tags[1] %>", data.clone()), "Ada/b");
        assert_eq!(run("<%= $user.missing %>|", data.clone()), "|");
        assert_eq!(
            run("<% $cfg.theme.color = 'red'; %><%= cfg.theme.color %>", json!({})),
            "red"
        );
        assert_eq!(run("<% $t ~= 'a'; $t ~= 'b'; %><%= $t %>", json!({})), "ab");
    }

    #[test]
    fn test_isset_empty_and_coalesce_are_soft() {
        let source = "<%= isset($title) ? $title : 'Untitled' %>|<%= $sub ?? 'none' %>|<%= empty($items) ? 'e' : 'f' %>";
        assert_eq!(run(source, json!({})), "Untitled|none|e");
        assert_eq!(
            run(source, json!({"title": "Home", "sub": "s", "items": [1]})),
            "Home|s|f"
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("<%= 7 / 2 %> <%= 6 / 3 %> <%= 7 % 3 %> <%= -2 * 1.5 %>", json!({})), "3.5 2 1 -3");
        assert_eq!(run("<%= 'a' ~ (1 + 2) %>", json!({})), "a3");
        assert!(matches!(run_with("<%= 'a' ~ 1 + 2 %>", json!({})), Err(RenderError::Type(_))));
    }

    #[test]
    fn test_faults() {
        assert!(matches!(
            run_with("<%= $nope %>", json!({})),
            Err(RenderError::UndefinedVariable { ref name }) if name == "nope"
        ));
        assert!(matches!(run_with("<%= 1 / 0 %>", json!({})), Err(RenderError::DivisionByZero)));
        assert!(matches!(
            run_with("<%= system('ls') %>", json!({})),
            Err(RenderError::UndefinedFunction { .. })
        ));
        assert!(matches!(run_with("<%= 'a' * 2 %>", json!({})), Err(RenderError::Type(_))));
        assert!(matches!(run_with("<% break; %>", json!({})), Err(RenderError::Syntax { .. })));
    }

    #[test]
    fn test_host_functions_and_builtins() {
        assert_eq!(run("<%= shout(name) %> <%= count(xs) %>", json!({"name": "hi", "xs": [1, 2]})), "HI! 2");
    }

    #[test]
    fn test_keyed_array_literal() {
        let out = run("<%= ['a' => 1, 2] %>", json!({}));
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!({"a": 1, "0": 2}));
    }

    #[test]
    fn test_largest_integer_key_does_not_advance_index() {
        let out = run("<%= [$k => 1, 2] %>", json!({"k": u64::MAX}));
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!({"18446744073709551615": 1, "0": 2}));

        assert_eq!(run("<%= count([$k => 1, 2]) %>", json!({"k": u64::MAX})), "2");
    }
}
