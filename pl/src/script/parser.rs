//! Recursive-descent parser for template script
//!
//! Block statements use the colon form (`if (...): ... endif;`) so that a
//! block may span any number of tags and text runs.

use serde_json::Value;

use super::ast::{ArrayItem, AssignOp, BinaryOp, Expr, Node, Program, Stmt, UnaryOp};
use super::lexer::{Tok, Token, tokenize};
use crate::error::RenderError;

type Result<T> = std::result::Result<T, RenderError>;

/// Words that may only appear as block terminators
const BLOCK_WORDS: &[&str] = &["elseif", "else", "endif", "endforeach", "endfor", "endwhile"];

/// Deepest nesting of blocks and expressions a template may use
pub const MAX_DEPTH: usize = 128;

pub fn parse(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
    };
    let (nodes, _) = parser.nodes(&[])?;
    Ok(Program { nodes })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    /// Current nesting, bounded by [`MAX_DEPTH`]
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + ahead).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.offset).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        self.pos += 1;
        tok
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct)
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(w)) if w == word)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", punct)))
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.is_word(word) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", word)))
        }
    }

    fn error(&self, message: impl Into<String>) -> RenderError {
        let found = match self.peek() {
            Some(tok) => describe(tok),
            None => "end of template".to_string(),
        };
        RenderError::syntax(self.offset(), format!("{}, found {}", message.into(), found))
    }

    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {} levels", MAX_DEPTH)));
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `f` one nesting level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.descend()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Parses nodes until one of `terminators` (or the end when empty)
    fn nodes(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<String>)> {
        self.nested(|p| p.nodes_inner(terminators))
    }

    fn nodes_inner(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<String>)> {
        let mut nodes = Vec::new();

        loop {
            let Some(tok) = self.peek() else {
                if terminators.is_empty() {
                    return Ok((nodes, None));
                }
                return Err(self.error(format!("expected {}", terminators.join(" or "))));
            };

            match tok {
                Tok::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    self.pos += 1;
                }
                Tok::OpenCode | Tok::Close | Tok::Punct(";") => self.pos += 1,
                Tok::OpenEcho => {
                    self.pos += 1;
                    let expr = self.expr()?;
                    self.eat_punct(";");
                    self.expect_close()?;
                    nodes.push(Node::Echo(expr));
                }
                Tok::Ident(word) if terminators.contains(&word.as_str()) => {
                    let word = word.clone();
                    self.pos += 1;
                    return Ok((nodes, Some(word)));
                }
                Tok::Ident(word) => match word.as_str() {
                    "if" => nodes.push(self.if_block()?),
                    "foreach" => nodes.push(self.foreach_block()?),
                    "for" => nodes.push(self.for_block()?),
                    "while" => nodes.push(self.while_block()?),
                    "continue" => {
                        self.pos += 1;
                        nodes.push(Node::Continue);
                    }
                    "break" => {
                        self.pos += 1;
                        nodes.push(Node::Break);
                    }
                    "echo" => {
                        self.pos += 1;
                        nodes.push(Node::Stmt(Stmt::Echo(self.expr()?)));
                    }
                    w if BLOCK_WORDS.contains(&w) => return Err(self.error("unexpected block keyword")),
                    _ => nodes.push(Node::Stmt(self.stmt()?)),
                },
                _ => nodes.push(Node::Stmt(self.stmt()?)),
            }
        }
    }

    fn expect_close(&mut self) -> Result<()> {
        match self.peek() {
            Some(Tok::Close) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error("expected '%>'")),
        }
    }

    fn if_block(&mut self) -> Result<Node> {
        self.expect_word("if")?;
        let cond = self.expr()?;
        self.expect_punct(":")?;

        let mut branches = Vec::new();
        let mut otherwise = None;
        let (body, mut term) = self.nodes(&["elseif", "else", "endif"])?;
        branches.push((cond, body));

        loop {
            match term.as_deref() {
                Some("elseif") => {
                    let cond = self.expr()?;
                    self.expect_punct(":")?;
                    let (body, next) = self.nodes(&["elseif", "else", "endif"])?;
                    branches.push((cond, body));
                    term = next;
                }
                Some("else") => {
                    self.expect_punct(":")?;
                    let (body, _) = self.nodes(&["endif"])?;
                    otherwise = Some(body);
                    break;
                }
                _ => break,
            }
        }

        Ok(Node::If { branches, otherwise })
    }

    fn foreach_block(&mut self) -> Result<Node> {
        self.expect_word("foreach")?;
        self.expect_punct("(")?;
        let iterable = self.expr()?;
        self.expect_word("as")?;
        let first = self.binding_name()?;
        let (key, value) = if self.eat_punct("=>") {
            (Some(first), self.binding_name()?)
        } else {
            (None, first)
        };
        self.expect_punct(")")?;
        self.expect_punct(":")?;
        let (body, _) = self.nodes(&["endforeach"])?;

        Ok(Node::Foreach {
            iterable,
            key,
            value,
            body,
        })
    }

    fn binding_name(&mut self) -> Result<String> {
        match self.peek() {
            Some(Tok::Var(name)) | Some(Tok::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected loop variable")),
        }
    }

    fn for_block(&mut self) -> Result<Node> {
        self.expect_word("for")?;
        self.expect_punct("(")?;
        let init = self.stmt_list(";")?;
        self.expect_punct(";")?;
        let cond = if self.is_punct(";") { None } else { Some(self.expr()?) };
        self.expect_punct(";")?;
        let step = self.stmt_list(")")?;
        self.expect_punct(")")?;
        self.expect_punct(":")?;
        let (body, _) = self.nodes(&["endfor"])?;

        Ok(Node::For { init, cond, step, body })
    }

    fn stmt_list(&mut self, end: &str) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        if self.is_punct(end) {
            return Ok(stmts);
        }
        loop {
            stmts.push(self.stmt()?);
            if !self.eat_punct(",") {
                return Ok(stmts);
            }
        }
    }

    fn while_block(&mut self) -> Result<Node> {
        self.expect_word("while")?;
        let cond = self.expr()?;
        self.expect_punct(":")?;
        let (body, _) = self.nodes(&["endwhile"])?;
        Ok(Node::While { cond, body })
    }

    fn stmt(&mut self) -> Result<Stmt> {
        let start = self.offset();
        let target = self.expr()?;

        let op = match self.peek() {
            Some(Tok::Punct("=")) => Some(AssignOp::Set),
            Some(Tok::Punct("+=")) => Some(AssignOp::Add),
            Some(Tok::Punct("-=")) => Some(AssignOp::Sub),
            Some(Tok::Punct("~=")) => Some(AssignOp::Concat),
            _ => None,
        };
        let delta = match self.peek() {
            Some(Tok::Punct("++")) => Some(1),
            Some(Tok::Punct("--")) => Some(-1),
            _ => None,
        };

        if (op.is_some() || delta.is_some()) && !target.is_place() {
            return Err(RenderError::syntax(start, "cannot assign to this expression"));
        }

        if let Some(op) = op {
            self.pos += 1;
            let value = self.expr()?;
            return Ok(Stmt::Assign { target, op, value });
        }
        if let Some(delta) = delta {
            self.pos += 1;
            return Ok(Stmt::Step { target, delta });
        }
        Ok(Stmt::Expr(target))
    }

    pub(crate) fn expr(&mut self) -> Result<Expr> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr> {
        self.nested(Self::ternary_inner)
    }

    fn ternary_inner(&mut self) -> Result<Expr> {
        let cond = self.coalesce()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }

        if self.eat_punct(":") {
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: None,
                otherwise: Box::new(otherwise),
            });
        }

        let then = self.ternary()?;
        self.expect_punct(":")?;
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Some(Box::new(then)),
            otherwise: Box::new(otherwise),
        })
    }

    fn coalesce(&mut self) -> Result<Expr> {
        let left = self.or()?;
        if self.eat_punct("??") {
            let right = self.nested(Self::coalesce)?;
            return Ok(Expr::Coalesce(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr> {
        self.logical(["||", "or"], BinaryOp::Or, Self::and)
    }

    fn and(&mut self) -> Result<Expr> {
        self.logical(["&&", "and"], BinaryOp::And, Self::equality)
    }

    /// `||`/`or` and `&&`/`and` levels, which accept a keyword spelling
    fn logical(&mut self, spellings: [&str; 2], op: BinaryOp, next: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        let entered = self.depth;
        let result = self.logical_chain(spellings, op, next);
        self.depth = entered;
        result
    }

    fn logical_chain(&mut self, spellings: [&str; 2], op: BinaryOp, next: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        let mut left = next(self)?;
        while self.eat_punct(spellings[0]) || self.eat_keyword(spellings[1]) {
            self.descend()?;
            let right = next(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let entered = self.depth;
        let result = self.binary_chain(ops, next);
        self.depth = entered;
        result
    }

    /// Each operator deepens the left-leaning tree by one level
    fn binary_chain(&mut self, ops: &[(&str, BinaryOp)], next: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat_punct(punct) {
                    self.descend()?;
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("===", BinaryOp::Identical),
                ("!==", BinaryOp::NotIdentical),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub), ("~", BinaryOp::Concat)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_punct("!") || self.eat_keyword("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.nested(Self::unary)?)));
        }
        if self.eat_punct("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(Self::unary)?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let entered = self.depth;
        let result = self.postfix_chain();
        self.depth = entered;
        result
    }

    fn postfix_chain(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.is_punct(".") || self.is_punct("->") {
                self.descend()?;
                self.pos += 1;
                expr = match self.advance() {
                    Some(Tok::Ident(name)) => Expr::Member(Box::new(expr), name),
                    Some(Tok::Int(index)) => Expr::Index(Box::new(expr), Box::new(Expr::Literal(Value::from(index)))),
                    _ => {
                        self.pos -= 1;
                        return Err(self.error("expected member name"));
                    }
                };
            } else if self.eat_punct("[") {
                self.descend()?;
                let index = self.expr()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error("expected expression"));
        };

        match tok {
            Tok::Var(name) => {
                self.pos += 1;
                Ok(Expr::Var(name))
            }
            Tok::Str(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(value)))
            }
            Tok::Int(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::from(value)))
            }
            Tok::Float(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::from(value)))
            }
            Tok::Ident(name) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    _ if self.is_punct("(") => {
                        self.pos += 1;
                        let args = self.call_args()?;
                        Ok(Expr::Call { name, args })
                    }
                    _ => Ok(Expr::Var(name)),
                }
            }
            Tok::Punct("(") => {
                self.pos += 1;
                let expr = self.expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                self.pos += 1;
                self.array()
            }
            _ => Err(self.error("expected expression")),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.expr()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn array(&mut self) -> Result<Expr> {
        let mut items = Vec::new();
        while !self.eat_punct("]") {
            let first = self.expr()?;
            let item = if self.eat_punct("=>") {
                ArrayItem {
                    key: Some(first),
                    value: self.expr()?,
                }
            } else {
                ArrayItem {
                    key: None,
                    value: first,
                }
            };
            items.push(item);
            if !self.eat_punct(",") {
                self.expect_punct("]")?;
                break;
            }
        }
        Ok(Expr::Array(items))
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Text(_) => "template text".to_string(),
        Tok::OpenEcho => "'<%='".to_string(),
        Tok::OpenCode => "'<%'".to_string(),
        Tok::Close => "'%>'".to_string(),
        Tok::Var(name) => format!("${}", name),
        Tok::Ident(name) => format!("'{}'", name),
        Tok::Str(_) => "string".to_string(),
        Tok::Int(n) => n.to_string(),
        Tok::Float(n) => n.to_string(),
        Tok::Punct(p) => format!("'{}'", p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        let program = parse(&format!("<%= {} %>", source)).unwrap();
        match program.nodes.into_iter().next() {
            Some(Node::Echo(expr)) => expr,
            other => panic!("expected echo, got {:?}", other),
        }
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    fn int(n: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::from(n)))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("$a + 2 * 3"),
            Expr::Binary(
                BinaryOp::Add,
                var("a"),
                Box::new(Expr::Binary(BinaryOp::Mul, int(2), int(3)))
            )
        );
        assert_eq!(
            expr("!$a && $b"),
            Expr::Binary(
                BinaryOp::And,
                Box::new(Expr::Unary(UnaryOp::Not, var("a"))),
                var("b")
            )
        );
    }

    #[test]
    fn test_ternary_and_coalesce() {
        assert_eq!(
            expr("isset($t) ? $t : 'x'"),
            Expr::Ternary {
                cond: Box::new(Expr::Call {
                    name: "isset".to_string(),
                    args: vec![Expr::Var("t".to_string())],
                }),
                then: Some(var("t")),
                otherwise: Box::new(Expr::Literal(Value::from("x"))),
            }
        );
        assert!(matches!(expr("$a ?: $b"), Expr::Ternary { then: None, .. }));
        assert!(matches!(expr("$a ?? $b ?? 1"), Expr::Coalesce(_, ref right) if matches!(**right, Expr::Coalesce(..))));
    }

    #[test]
    fn test_member_index_and_bare_names() {
        assert_eq!(
            expr("user.name"),
            Expr::Member(var("user"), "name".to_string())
        );
        assert_eq!(
            expr("$user->tags[0]"),
            Expr::Index(Box::new(Expr::Member(var("user"), "tags".to_string())), int(0))
        );
    }

    #[test]
    fn test_array_literals() {
        match expr("['a' => 1, 'b' => [2, 3],]") {
            Expr::Array(items) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|item| item.key.is_some()));
            }
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(expr("[]"), Expr::Array(vec![]));
    }

    #[test]
    fn test_if_elseif_else_blocks() {
        let program =
            parse("<% if ($a): %>A<% elseif ($b): %>B<% else: %>C<% endif; %>").unwrap();
        match &program.nodes[..] {
            [Node::If { branches, otherwise }] => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.as_deref(), Some(&[Node::Text("C".to_string())][..]));
            }
            other => panic!("unexpected nodes {:?}", other),
        }
    }

    #[test]
    fn test_foreach_with_key() {
        let program = parse("<% foreach ($map as $k => $v): %><%= $k %><% endforeach; %>").unwrap();
        assert!(matches!(
            &program.nodes[..],
            [Node::Foreach { key: Some(k), value, .. }] if k == "k" && value == "v"
        ));
    }

    #[test]
    fn test_for_and_statements() {
        let program = parse("<% for ($i = 0; $i < 3; $i++): %>x<% endfor; %><% $t ~= 'a'; %>").unwrap();
        match &program.nodes[..] {
            [Node::For { init, cond: Some(_), step, .. }, Node::Stmt(Stmt::Assign { op: AssignOp::Concat, .. })] => {
                assert_eq!(init.len(), 1);
                assert!(matches!(step[..], [Stmt::Step { delta: 1, .. }]));
            }
            other => panic!("unexpected nodes {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("<% if ($a): %>x"), Err(RenderError::Syntax { .. })));
        assert!(matches!(parse("<% endif; %>"), Err(RenderError::Syntax { .. })));
        assert!(matches!(parse("<%= 1 + %>"), Err(RenderError::Syntax { .. })));
        assert!(matches!(parse("<% 1 = 2; %>"), Err(RenderError::Syntax { .. })));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("<%= {}1{} %>", "(".repeat(20_000), ")".repeat(20_000));
        assert!(matches!(
            parse(&deep),
            Err(RenderError::Syntax { ref message, .. }) if message.contains("nesting deeper")
        ));

        let negations = format!("<%= {}true %>", "!".repeat(20_000));
        assert!(matches!(parse(&negations), Err(RenderError::Syntax { .. })));

        let chain = format!("<%= 1{} %>", " + 1".repeat(20_000));
        assert!(matches!(parse(&chain), Err(RenderError::Syntax { .. })));

        let members = format!("<%= $a{} %>", ".b".repeat(20_000));
        assert!(matches!(parse(&members), Err(RenderError::Syntax { .. })));

        let blocks = format!("{}x{}", "<% if (true): %>".repeat(20_000), "<% endif; %>".repeat(20_000));
        assert!(matches!(parse(&blocks), Err(RenderError::Syntax { .. })));

        let shallow = format!("<%= {}1{} %>", "(".repeat(20), ")".repeat(20));
        assert!(parse(&shallow).is_ok());
    }
}
