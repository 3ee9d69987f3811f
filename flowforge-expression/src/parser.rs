use crate::ast::{BinaryOp, Expr, PathSegment, ResolverKind, UnaryOp};
use crate::error::ExpressionError;
use crate::lexer::{tokenize, Token};
use serde_json::Value;

/// 模板片段
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text(String),
    Span { source: String, expr: Expr },
}

/// 已解析的模板：文本与 `$[...]` 片段交替
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Template {
    pub segments: Vec<Segment>,
    /// 整个输入（去除首尾空白后）恰好是一个 span
    pub whole_span: bool,
}

impl Template {
    pub fn has_spans(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Span { .. }))
    }

    pub fn references_secrets(&self) -> bool {
        self.segments.iter().any(|s| match s {
            Segment::Span { expr, .. } => expr.references_secrets(),
            Segment::Text(_) => false,
        })
    }
}

/// 扫描输入中的 `$[...]` 片段并逐个解析
pub(crate) fn parse_template(input: &str) -> Result<Template, ExpressionError> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("$[") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let body_start = start + 2;
        let end = find_closing_bracket(rest, body_start)
            .ok_or_else(|| ExpressionError::unbalanced_brackets(input))?;
        let source = &rest[body_start..end];
        let expr = parse_expression(source)?;

        segments.push(Segment::Span {
            source: source.to_string(),
            expr,
        });
        rest = &rest[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    let span_count = segments
        .iter()
        .filter(|s| matches!(s, Segment::Span { .. }))
        .count();
    let whole_span = span_count == 1
        && segments.iter().all(|s| match s {
            Segment::Text(text) => text.trim().is_empty(),
            Segment::Span { .. } => true,
        });

    Ok(Template {
        segments,
        whole_span,
    })
}

/// 从 `from` 开始寻找与 `$[` 匹配的 `]`，跳过引号内的内容
fn find_closing_bracket(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in text[from..].char_indices() {
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
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(from + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// 解析单个 span 的内部表达式
pub(crate) fn parse_expression(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ExpressionError::invalid(source));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
    };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(Token::RParen) => Err(ExpressionError::unbalanced_parentheses(source)),
        Some(Token::RBracket) => Err(ExpressionError::unbalanced_brackets(source)),
        Some(_) => Err(ExpressionError::invalid(source)),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn invalid(&self) -> ExpressionError {
        ExpressionError::invalid(self.source)
    }

    fn expect_close_paren(&mut self) -> Result<(), ExpressionError> {
        match self.peek() {
            Some(Token::RParen) => {
                self.pos += 1;
                Ok(())
            }
            None | Some(Token::RBracket) => {
                Err(ExpressionError::unbalanced_parentheses(self.source))
            }
            Some(_) => Err(self.invalid()),
        }
    }

    fn expect_close_bracket(&mut self) -> Result<(), ExpressionError> {
        match self.peek() {
            Some(Token::RBracket) => {
                self.pos += 1;
                Ok(())
            }
            None | Some(Token::RParen) => {
                Err(ExpressionError::unbalanced_brackets(self.source))
            }
            Some(_) => Err(self.invalid()),
        }
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr, ExpressionError> {
        let condition = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then_branch = self.expression()?;
        if !self.eat(&Token::Colon) {
            return Err(self.invalid());
        }
        let else_branch = self.expression()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Equal,
                Some(Token::NotEq) => BinaryOp::NotEqual,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Greater) => BinaryOp::Greater,
                Some(Token::GreaterEq) => BinaryOp::GreaterOrEqual,
                Some(Token::Less) => BinaryOp::Less,
                Some(Token::LessEq) => BinaryOp::LessOrEqual,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let target = self.primary()?;
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(name)) => {
                            segments.push(PathSegment::Property(name))
                        }
                        _ => return Err(self.invalid()),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect_close_bracket()?;
                    segments.push(PathSegment::Index(Box::new(index)));
                }
                _ => break,
            }
        }

        if segments.is_empty() {
            Ok(target)
        } else {
            Ok(Expr::Path {
                target: Box::new(target),
                segments,
            })
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Integer(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Decimal(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect_close_paren()?;
                Ok(inner)
            }
            Some(Token::SpanOpen) => {
                let inner = self.expression()?;
                self.expect_close_bracket()?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.identifier(name),
            _ => Err(self.invalid()),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, ExpressionError> {
        match name.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            _ => {}
        }

        // 裸标识符不是合法表达式
        if !self.eat(&Token::LParen) {
            return Err(self.invalid());
        }
        let args = self.arguments()?;

        match ResolverKind::from_name(&name) {
            Some(kind) => {
                let mut args = args;
                if args.len() != 1 {
                    return Err(self.invalid());
                }
                Ok(Expr::Resolver {
                    kind,
                    key: Box::new(args.remove(0)),
                })
            }
            None => Ok(Expr::Call { name, args }),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect_close_paren()?;
            return Ok(args);
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
