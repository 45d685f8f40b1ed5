//! Parser for the SQL-like query dialect accepted by the in-memory store.
//!
//! The supported grammar is the subset emitted by the query builder and the
//! model layer, plus a few common built-ins for hand-written queries:
//!
//! ```text
//! SELECT [VALUE] (* | item [, item]*) FROM <ident> [<alias>]
//!     [WHERE expr]
//!     [ORDER BY expr [ASC|DESC] [, ...]]
//!     [OFFSET n LIMIT m]
//!
//! item := expr [AS ident]
//! expr := expr OR expr | expr AND expr | NOT expr
//!       | expr (= | != | <> | < | <= | > | >=) expr
//!       | expr [NOT] IN (expr, ...)
//!       | FUNC(expr, ...) | COUNT(expr)
//!       | literal | @param | path | (expr)
//! path := <alias> (.ident | ["name"] | [n])*
//! ```

use serde_json::{Number, Value};

use docmodel_core::{
    error::{ModelError, ModelResult},
    query::SortDirection,
};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Number),
    String(String),
    Param(String),
    Symbol(&'static str),
}

const SYMBOLS: [&str; 14] = [
    "<=", ">=", "!=", "<>", "=", "<", ">", "(", ")", "[", "]", ",", ".", "*",
];

fn tokenize(input: &str) -> ModelResult<Vec<Token>> {
    let chars = input.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Token::Ident(chars[start..pos].iter().collect()));
        } else if c == '@' {
            let start = pos;
            pos += 1;
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            if pos == start + 1 {
                return Err(syntax("expected a parameter name after '@'"));
            }
            tokens.push(Token::Param(chars[start..pos].iter().collect()));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(pos + 1).is_some_and(char::is_ascii_digit)) {
            let start = pos;
            pos += 1;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            let text = chars[start..pos].iter().collect::<String>();
            tokens.push(Token::Number(parse_number(&text)?));
        } else if c == '\'' || c == '"' {
            let (literal, next) = read_string(&chars, pos)?;
            tokens.push(Token::String(literal));
            pos = next;
        } else if let Some(symbol) = SYMBOLS.iter().find(|symbol| {
            symbol.chars().enumerate().all(|(offset, s)| chars.get(pos + offset) == Some(&s))
        }) {
            tokens.push(Token::Symbol(*symbol));
            pos += symbol.len();
        } else {
            return Err(syntax(format!("unexpected character '{c}'")));
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> ModelResult<Number> {
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Number::from(int));
    }

    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| syntax(format!("invalid number '{text}'")))
}

/// Reads a quoted string starting at `start`, returning it and the position after the closing quote.
fn read_string(chars: &[char], start: usize) -> ModelResult<(String, usize)> {
    let quote = chars[start];
    let mut literal = String::new();
    let mut pos = start + 1;

    while pos < chars.len() {
        match chars[pos] {
            '\\' => {
                let escaped = chars.get(pos + 1).ok_or_else(|| syntax("unterminated string"))?;
                literal.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                pos += 2;
            }
            c if c == quote => return Ok((literal, pos + 1)),
            c => {
                literal.push(c);
                pos += 1;
            }
        }
    }

    Err(syntax("unterminated string"))
}

fn syntax(message: impl AsRef<str>) -> ModelError {
    ModelError::Query(format!("Syntax error: {}", message.as_ref()))
}

/// A built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Lower,
    Upper,
    Contains,
    StartsWith,
    EndsWith,
    ArrayContains,
    IsDefined,
    /// Aggregate; only valid as a whole projection item.
    Count,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "LOWER" => Function::Lower,
            "UPPER" => Function::Upper,
            "CONTAINS" => Function::Contains,
            "STARTSWITH" => Function::StartsWith,
            "ENDSWITH" => Function::EndsWith,
            "ARRAY_CONTAINS" => Function::ArrayContains,
            "IS_DEFINED" => Function::IsDefined,
            "COUNT" => Function::Count,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Lower | Function::Upper | Function::IsDefined | Function::Count => (1, 1),
            Function::Contains
            | Function::StartsWith
            | Function::EndsWith
            | Function::ArrayContains => (2, 3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Param(String),
    /// A property path; `root` must name the `FROM` alias.
    Path { root: String, segments: Vec<Value> },
    Not(Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    In { target: Box<Expr>, items: Vec<Expr>, negated: bool },
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Visits this expression and every nested one.
    pub(crate) fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);

        match self {
            Expr::Literal(_) | Expr::Param(_) | Expr::Path { .. } => {}
            Expr::Not(inner) => inner.walk(visit),
            Expr::Binary(left, _, right) => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::In { target, items, .. } => {
                target.walk(visit);
                items.iter().for_each(|item| item.walk(visit));
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.walk(visit)),
        }
    }

    /// The name a projected expression gets when it has no alias.
    fn implicit_name(&self) -> Option<String> {
        match self {
            Expr::Path { segments, .. } => segments.last().and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectItem {
    pub expr: Expr,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    /// `SELECT *`: whole documents.
    All,
    /// `SELECT VALUE expr`: bare values.
    Value(Expr),
    /// `SELECT a AS x, b`: one object per row.
    Items(Vec<SelectItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub projection: Projection,
    pub alias: String,
    pub filter: Option<Expr>,
    pub order_by: Vec<(Expr, SortDirection)>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Select {
    /// Every expression of the statement.
    pub(crate) fn expressions(&self) -> Vec<&Expr> {
        let mut exprs = match &self.projection {
            Projection::All => Vec::new(),
            Projection::Value(expr) => vec![expr],
            Projection::Items(items) => items.iter().map(|item| &item.expr).collect(),
        };
        exprs.extend(self.filter.iter());
        exprs.extend(self.order_by.iter().map(|(expr, _)| expr));
        exprs
    }
}

/// Parses a full `SELECT` statement.
pub(crate) fn parse(query: &str) -> ModelResult<Select> {
    let mut parser = Parser { tokens: tokenize(query)?, pos: 0 };
    let select = parser.select()?;

    match parser.peek() {
        None => Ok(select),
        Some(token) => Err(syntax(format!("unexpected trailing {token:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> ModelResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(format!("expected {keyword}, found {:?}", self.peek())))
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        let found = matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_symbol(&mut self, symbol: &str) -> ModelResult<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(syntax(format!("expected '{symbol}', found {:?}", self.peek())))
        }
    }

    fn identifier(&mut self) -> ModelResult<String> {
        match self.next() {
            Some(Token::Ident(ident)) => Ok(ident),
            other => Err(syntax(format!("expected an identifier, found {other:?}"))),
        }
    }

    fn unsigned(&mut self, clause: &str) -> ModelResult<usize> {
        match self.next() {
            Some(Token::Number(number)) => number
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| syntax(format!("{clause} must be a non-negative integer"))),
            other => Err(syntax(format!("expected a number after {clause}, found {other:?}"))),
        }
    }

    fn select(&mut self) -> ModelResult<Select> {
        self.expect_keyword("SELECT")?;

        let projection = if self.eat_keyword("VALUE") {
            Projection::Value(self.expr()?)
        } else if self.eat_symbol("*") {
            Projection::All
        } else {
            Projection::Items(self.select_items()?)
        };

        self.expect_keyword("FROM")?;
        let source = self.identifier()?;
        let alias = match self.peek() {
            Some(Token::Ident(ident)) if !is_clause_keyword(ident) => self.identifier()?,
            _ => source,
        };

        let filter = if self.eat_keyword("WHERE") { Some(self.expr()?) } else { None };

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.expr()?;
                let direction = if self.eat_keyword("DESC") {
                    SortDirection::Desc
                } else {
                    self.eat_keyword("ASC");
                    SortDirection::Asc
                };
                order_by.push((expr, direction));

                if !self.eat_symbol(",") {
                    break;
                }
            }
        }

        let (offset, limit) = if self.eat_keyword("OFFSET") {
            let offset = self.unsigned("OFFSET")?;
            self.expect_keyword("LIMIT")?;
            (Some(offset), Some(self.unsigned("LIMIT")?))
        } else {
            (None, None)
        };

        Ok(Select { projection, alias, filter, order_by, offset, limit })
    }

    fn select_items(&mut self) -> ModelResult<Vec<SelectItem>> {
        let mut items = Vec::new();

        loop {
            let expr = self.expr()?;
            let alias = if self.eat_keyword("AS") {
                self.identifier()?
            } else {
                expr.implicit_name().unwrap_or_else(|| format!("${}", items.len() + 1))
            };
            items.push(SelectItem { expr, alias });

            if !self.eat_symbol(",") {
                return Ok(items);
            }
        }
    }

    fn expr(&mut self) -> ModelResult<Expr> {
        let mut left = self.and_expr()?;

        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::Binary(Box::new(left), BinaryOp::Or, Box::new(right));
        }

        Ok(left)
    }

    fn and_expr(&mut self) -> ModelResult<Expr> {
        let mut left = self.not_expr()?;

        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = Expr::Binary(Box::new(left), BinaryOp::And, Box::new(right));
        }

        Ok(left)
    }

    fn not_expr(&mut self) -> ModelResult<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }

        self.comparison()
    }

    fn comparison(&mut self) -> ModelResult<Expr> {
        let left = self.primary()?;

        let negated = self.peek_keyword("NOT")
            && matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("IN"));
        if negated {
            self.pos += 1;
        }
        if self.eat_keyword("IN") {
            self.expect_symbol("(")?;
            let items = self.arguments()?;
            return Ok(Expr::In { target: Box::new(left), items, negated });
        }

        let op = match self.peek() {
            Some(Token::Symbol("=")) => BinaryOp::Eq,
            Some(Token::Symbol("!=" | "<>")) => BinaryOp::Ne,
            Some(Token::Symbol("<")) => BinaryOp::Lt,
            Some(Token::Symbol("<=")) => BinaryOp::Lte,
            Some(Token::Symbol(">")) => BinaryOp::Gt,
            Some(Token::Symbol(">=")) => BinaryOp::Gte,
            _ => return Ok(left),
        };
        self.pos += 1;

        let right = self.primary()?;
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    /// Parses a comma-separated list up to and including the closing parenthesis.
    fn arguments(&mut self) -> ModelResult<Vec<Expr>> {
        let mut args = Vec::new();

        if self.eat_symbol(")") {
            return Ok(args);
        }

        loop {
            args.push(self.expr()?);

            if self.eat_symbol(")") {
                return Ok(args);
            }
            self.expect_symbol(",")?;
        }
    }

    fn primary(&mut self) -> ModelResult<Expr> {
        match self.next() {
            Some(Token::Number(number)) => Ok(Expr::Literal(Value::Number(number))),
            Some(Token::String(literal)) => Ok(Expr::Literal(Value::String(literal))),
            Some(Token::Param(name)) => Ok(Expr::Param(name)),
            Some(Token::Symbol("(")) => {
                let inner = self.expr()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Some(Token::Symbol("[")) => {
                let mut items = Vec::new();
                if !self.eat_symbol("]") {
                    loop {
                        match self.primary()? {
                            Expr::Literal(value) => items.push(value),
                            _ => return Err(syntax("array literals may only contain literals")),
                        }
                        if self.eat_symbol("]") {
                            break;
                        }
                        self.expect_symbol(",")?;
                    }
                }
                Ok(Expr::Literal(Value::Array(items)))
            }
            Some(Token::Ident(ident)) => self.identifier_expr(ident),
            other => Err(syntax(format!("unexpected {other:?}"))),
        }
    }

    fn identifier_expr(&mut self, ident: String) -> ModelResult<Expr> {
        match ident.to_ascii_lowercase().as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            _ => {}
        }

        if self.eat_symbol("(") {
            let function = Function::from_name(&ident)
                .ok_or_else(|| ModelError::Query(format!("Unknown function '{ident}'")))?;
            let args = self.arguments()?;
            let (min, max) = function.arity();
            if args.len() < min || args.len() > max {
                return Err(ModelError::Query(format!(
                    "{ident} expects {min} to {max} arguments, received {}",
                    args.len()
                )));
            }
            return Ok(Expr::Call(function, args));
        }

        let mut segments = Vec::new();
        loop {
            if self.eat_symbol(".") {
                segments.push(Value::String(self.identifier()?));
            } else if self.eat_symbol("[") {
                match self.next() {
                    Some(Token::String(name)) => segments.push(Value::String(name)),
                    Some(Token::Number(index)) if index.is_u64() => segments.push(Value::Number(index)),
                    other => return Err(syntax(format!("invalid property accessor {other:?}"))),
                }
                self.expect_symbol("]")?;
            } else {
                break;
            }
        }

        Ok(Expr::Path { root: ident, segments })
    }
}

fn is_clause_keyword(ident: &str) -> bool {
    ["WHERE", "ORDER", "OFFSET", "LIMIT"]
        .iter()
        .any(|keyword| ident.eq_ignore_ascii_case(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> Expr {
        Expr::Path {
            root: "c".into(),
            segments: segments.iter().map(|s| json!(s)).collect(),
        }
    }

    #[test]
    fn parses_builder_output() {
        let select = parse(
            "SELECT * FROM c WHERE (c.status = @param1) AND (c.age >= @param2) \
             ORDER BY c.name ASC, c.age DESC OFFSET 2 LIMIT 10",
        )
        .unwrap();

        assert_eq!(select.projection, Projection::All);
        assert_eq!(select.alias, "c");
        assert_eq!(select.offset, Some(2));
        assert_eq!(select.limit, Some(10));
        assert_eq!(select.order_by[1], (path(&["age"]), SortDirection::Desc));
        assert_eq!(
            select.filter,
            Some(Expr::Binary(
                Box::new(Expr::Binary(
                    Box::new(path(&["status"])),
                    BinaryOp::Eq,
                    Box::new(Expr::Param("@param1".into()))
                )),
                BinaryOp::And,
                Box::new(Expr::Binary(
                    Box::new(path(&["age"])),
                    BinaryOp::Gte,
                    Box::new(Expr::Param("@param2".into()))
                )),
            ))
        );
    }

    #[test]
    fn parses_projections() {
        let select = parse("SELECT c.id AS id, c.address.city FROM c").unwrap();
        let Projection::Items(items) = select.projection else {
            panic!("expected items");
        };
        assert_eq!(items[0].alias, "id");
        assert_eq!(items[1].alias, "city");

        let count = parse("SELECT VALUE COUNT(1) FROM c WHERE c.active = true").unwrap();
        assert_eq!(
            count.projection,
            Projection::Value(Expr::Call(Function::Count, vec![Expr::Literal(json!(1))]))
        );
    }

    #[test]
    fn parses_bracket_paths_and_functions() {
        let select = parse(
            r#"SELECT * FROM c WHERE CONTAINS(LOWER(c["first name"]), @p) OR c.tags[0] NOT IN ('a', "b")"#,
        )
        .unwrap();

        let mut calls = Vec::new();
        select.filter.unwrap().walk(&mut |expr| {
            if let Expr::Call(function, _) = expr {
                calls.push(*function);
            }
        });
        assert_eq!(calls, vec![Function::Contains, Function::Lower]);
    }

    #[test]
    fn parses_negative_numbers_and_empty_in() {
        let select = parse("SELECT * FROM c WHERE c.n > -1.5 AND c.x IN ()").unwrap();

        assert!(matches!(
            select.filter,
            Some(Expr::Binary(_, BinaryOp::And, _))
        ));
    }

    #[test]
    fn rejects_malformed_queries() {
        for query in [
            "",
            "SELECT FROM c",
            "SELECT * FROM",
            "SELECT * FROM c WHERE",
            "SELECT * FROM c WHERE c.a = 'open",
            "SELECT * FROM c OFFSET 1",
            "SELECT * FROM c WHERE FOO(c.a)",
            "SELECT * FROM c WHERE LOWER(c.a, c.b)",
            "SELECT * FROM c extra tokens",
        ] {
            assert!(matches!(parse(query), Err(ModelError::Query(_))), "{query}");
        }
    }
}
