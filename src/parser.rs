//! Recursive descent parser.
//!
//! Binary operators are parsed with one function per precedence level, from
//! loosest to tightest:
//!
//! | level          | operators                          | associativity |
//! |----------------|------------------------------------|---------------|
//! | assignment     | `=`                                | right         |
//! | or             | `\|\|`                             | left          |
//! | and            | `&&`                               | left          |
//! | not            | prefix `!`                         |               |
//! | comparison     | `==` `!=` `<` `<=` `>` `>=`        | left          |
//! | additive       | `+` `-`                            | left          |
//! | modulo         | `%`                                | left          |
//! | multiplicative | `*` `/`                            | left          |
//! | negation       | prefix `-`                         |               |
//! | exponent       | `**`                               | right         |
//! | postfix        | `.field` `[index]`                 | left          |
//!
//! A dangling `else` belongs to the nearest `if`.
use tracing::trace;

use crate::{
    error::Error,
    lexer::{Keyword, Lexeme, Lexer, LexerError, LexerState, Operator, Span, TokenKind},
    stage::{Feature, Stage},
};

pub mod ast;

use ast::{BinaryOp, Class, Expr, Function, Item, Stmt, Type, UnaryOp, VarDecl};

/// Which operators a binary precedence level accepts.
type Level = &'static [(Operator, BinaryOp)];

const OR: Level = &[(Operator::OrOr, BinaryOp::Or)];
const AND: Level = &[(Operator::AndAnd, BinaryOp::And)];
const COMPARISON: Level = &[
    (Operator::EqualEqual, BinaryOp::Equal),
    (Operator::BangEqual, BinaryOp::NotEqual),
    (Operator::Less, BinaryOp::Less),
    (Operator::LessEqual, BinaryOp::LessEqual),
    (Operator::Greater, BinaryOp::Greater),
    (Operator::GreaterEqual, BinaryOp::GreaterEqual),
];
const ADDITIVE: Level = &[
    (Operator::Plus, BinaryOp::Add),
    (Operator::Minus, BinaryOp::Subtract),
];
const MODULO: Level = &[(Operator::Percent, BinaryOp::Remainder)];
const MULTIPLICATIVE: Level = &[
    (Operator::Star, BinaryOp::Multiply),
    (Operator::Slash, BinaryOp::Divide),
];

/// Deepest nesting of parentheses, brackets, prefix operators and statements
/// the parser descends into.
pub const MAX_NESTING: usize = 64;

pub struct Parser<'s> {
    lexer: Lexer<'s>,
    /// The lookahead token. A lexer error is kept here until something looks
    /// at the token, so a complete unit never fails on the input after it.
    current: Result<Lexeme, Error>,
    /// Lexer position right before `current`.
    before_current: LexerState,
    depth: usize,
}

impl<'s> Parser<'s> {
    pub fn new(mut lexer: Lexer<'s>) -> Self {
        let before_current = lexer.state();
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            before_current,
            depth: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.lexer.stage()
    }

    /// Position of the first token that has not been consumed yet.
    pub fn resume_state(&self) -> LexerState {
        self.before_current
    }

    pub fn peek(&self) -> Result<&Lexeme, &Error> {
        self.current.as_ref()
    }

    fn kind(&self) -> Option<TokenKind> {
        self.current.as_ref().ok().map(|lexeme| lexeme.kind)
    }

    fn span(&self) -> Span {
        match &self.current {
            Ok(lexeme) => lexeme.span.clone(),
            Err(error) => error.span().unwrap_or_default(),
        }
    }

    fn advance(&mut self) -> Result<Lexeme, Error> {
        if let Err(error) = &self.current {
            return Err(error.clone());
        }
        let before_next = self.lexer.state();
        let next = self.lexer.next_token();
        self.before_current = before_next;
        std::mem::replace(&mut self.current, next)
    }

    fn at(&self, operator: Operator) -> bool {
        self.kind() == Some(TokenKind::Operator(operator))
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.kind() == Some(TokenKind::Keyword(keyword))
    }

    fn eat(&mut self, operator: Operator) -> Result<bool, Error> {
        let found = self.at(operator);
        if found {
            self.advance()?;
        }
        Ok(found)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> Result<bool, Error> {
        let found = self.at_keyword(keyword);
        if found {
            self.advance()?;
        }
        Ok(found)
    }

    fn expect(&mut self, operator: Operator, expected: &'static str) -> Result<Span, Error> {
        if self.at(operator) {
            Ok(self.advance()?.span)
        } else {
            Err(self.unexpected(&[expected]))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, expected: &'static str) -> Result<Span, Error> {
        if self.at_keyword(keyword) {
            Ok(self.advance()?.span)
        } else {
            Err(self.unexpected(&[expected]))
        }
    }

    fn expect_identifier(&mut self) -> Result<(Box<str>, Span), Error> {
        if self.kind() == Some(TokenKind::Identifier) {
            let lexeme = self.advance()?;
            Ok((lexeme.value, lexeme.span))
        } else {
            Err(self.unexpected(&["identifier"]))
        }
    }

    /// A syntax error at the lookahead, or the lexer error that took its place.
    fn unexpected(&self, expected: &[&'static str]) -> Error {
        let lexeme = match &self.current {
            Ok(lexeme) => lexeme,
            Err(error) => return error.clone(),
        };
        let found = match lexeme.kind {
            TokenKind::End => Box::from("end of input"),
            TokenKind::String => Box::from("string literal"),
            _ => Box::from(format!("`{}`", lexeme.value)),
        };
        Error::Syntax {
            found,
            expected: expected.to_vec(),
            span: lexeme.span.clone(),
        }
    }

    fn require(&self, feature: Feature) -> Result<(), Error> {
        if self.stage().supports(feature) {
            Ok(())
        } else {
            Err(Error::Unsupported {
                feature,
                stage: self.stage(),
                span: self.span(),
            })
        }
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.depth >= MAX_NESTING {
            return Err(Error::NestingTooDeep {
                limit: MAX_NESTING,
                span: self.span(),
            });
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    /// Fails unless all input has been consumed.
    pub fn expect_end(&self) -> Result<(), Error> {
        if self.kind() == Some(TokenKind::End) {
            Ok(())
        } else {
            Err(self.unexpected(&["end of input"]))
        }
    }

    pub fn expression(&mut self) -> Result<Expr, Error> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> Result<Expr, Error> {
        let start = self.span().start;
        let target = self.binary(OR, Self::and)?;
        if !self.at(Operator::Assign) {
            return Ok(target);
        }
        let span = start..self.span().start;
        if !matches!(
            target,
            Expr::Variable(_) | Expr::Member { .. } | Expr::Subscript { .. }
        ) {
            return Err(Error::InvalidAssignmentTarget { span });
        }
        self.advance()?;
        let value = self.nested(Self::assignment)?;
        Ok(Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// Parses one left associative level made of `operand`s joined by the
    /// operators in `level`.
    fn binary(
        &mut self,
        level: Level,
        mut operand: impl FnMut(&mut Self) -> Result<Expr, Error>,
    ) -> Result<Expr, Error> {
        let mut lhs = operand(self)?;
        loop {
            let Some(&(_, op)) = level.iter().find(|(operator, _)| self.at(*operator)) else {
                return Ok(lhs);
            };
            self.advance()?;
            let rhs = operand(self)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn and(&mut self) -> Result<Expr, Error> {
        self.binary(AND, Self::not)
    }

    fn not(&mut self) -> Result<Expr, Error> {
        if self.eat(Operator::Bang)? {
            return Ok(Expr::unary(UnaryOp::Not, self.nested(Self::not)?));
        }
        self.binary(COMPARISON, |p| {
            p.binary(ADDITIVE, |p| {
                p.binary(MODULO, |p| p.binary(MULTIPLICATIVE, Self::negation))
            })
        })
    }

    fn negation(&mut self) -> Result<Expr, Error> {
        if self.eat(Operator::Minus)? {
            return Ok(Expr::unary(UnaryOp::Negate, self.nested(Self::negation)?));
        }
        self.exponent()
    }

    fn exponent(&mut self) -> Result<Expr, Error> {
        let base = self.postfix()?;
        if self.eat(Operator::StarStar)? {
            let power = self.nested(Self::exponent)?;
            return Ok(Expr::binary(BinaryOp::Power, base, power));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.primary()?;
        loop {
            if self.at(Operator::Dot) {
                self.require(Feature::MemberAccess)?;
                self.advance()?;
                let (field, _) = self.expect_identifier()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    field,
                };
            } else if self.at(Operator::LBracket) {
                self.require(Feature::MemberAccess)?;
                self.advance()?;
                let index = self.expression()?;
                self.expect(Operator::RBracket, "`]`")?;
                expr = Expr::Subscript {
                    array: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, Error> {
        let Some(kind) = self.kind() else {
            return Err(self.unexpected(&["expression"]));
        };
        match kind {
            TokenKind::Number => {
                let lexeme = self.advance()?;
                let value = lexeme.value.parse().map_err(|_| Error::Lex {
                    error: LexerError::NumberTooBig,
                    span: lexeme.span,
                })?;
                Ok(Expr::Number(value))
            }
            TokenKind::String => Ok(Expr::String(self.advance()?.value)),
            TokenKind::Identifier => {
                let (name, _) = self.expect_identifier()?;
                if self.at(Operator::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::Call { callee: name, args })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            TokenKind::Operator(Operator::LParen) => {
                self.advance()?;
                let inner = self.expression()?;
                self.expect(Operator::RParen, "`)`")?;
                Ok(inner)
            }
            TokenKind::Keyword(Keyword::New) => {
                self.require(Feature::ObjectConstruction)?;
                self.advance()?;
                let class = self.type_name()?;
                self.expect(Operator::LParen, "`(`")?;
                self.expect(Operator::RParen, "`)`")?;
                Ok(Expr::New { class })
            }
            _ => Err(self.unexpected(&["expression"])),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, Error> {
        self.expect(Operator::LParen, "`(`")?;
        let mut args = vec![];
        if self.eat(Operator::RParen)? {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(Operator::RParen)? {
                return Ok(args);
            }
            if !self.eat(Operator::Comma)? {
                return Err(self.unexpected(&["`,`", "`)`"]));
            }
        }
    }

    fn type_name(&mut self) -> Result<Type, Error> {
        let (name, _) = self.expect_identifier()?;
        let argument = if self.eat(Operator::Less)? {
            let argument = self.type_name()?;
            self.expect(Operator::Greater, "`>`")?;
            Some(Box::new(argument))
        } else {
            None
        };
        Ok(Type { name, argument })
    }

    /// `name (: Type)? (= expr)?`, with the initializer only where `init` allows it.
    fn declaration(&mut self, init: bool) -> Result<VarDecl, Error> {
        let (name, span) = self.expect_identifier()?;
        let ty = if self.at(Operator::Colon) {
            self.require(Feature::TypeAnnotations)?;
            self.advance()?;
            Some(self.type_name()?)
        } else {
            None
        };
        let init = if init && self.eat(Operator::Assign)? {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(VarDecl {
            name,
            ty,
            init,
            span,
        })
    }

    /// The declarations of a `let` up to and including its `;`.
    fn let_declarations(&mut self) -> Result<Vec<VarDecl>, Error> {
        self.expect_keyword(Keyword::Let, "`let`")?;
        let mut decls = vec![self.declaration(true)?];
        while self.eat(Operator::Comma)? {
            decls.push(self.declaration(true)?);
        }
        self.expect(Operator::Semicolon, "`;`")?;
        Ok(decls)
    }

    pub fn statement(&mut self) -> Result<Stmt, Error> {
        self.nested(Self::nested_statement)
    }

    fn nested_statement(&mut self) -> Result<Stmt, Error> {
        let Some(TokenKind::Keyword(keyword)) = self.kind() else {
            let expr = self.expression()?;
            self.expect(Operator::Semicolon, "`;`")?;
            return Ok(Stmt::Expr(expr));
        };
        match keyword {
            Keyword::Let => Ok(Stmt::Let(self.let_declarations()?)),
            Keyword::If => {
                self.advance()?;
                let condition = self.condition()?;
                let then = self.body()?;
                let otherwise = if self.eat_keyword(Keyword::Else)? {
                    Some(self.body()?)
                } else {
                    None
                };
                Ok(Stmt::If {
                    condition,
                    then,
                    otherwise,
                })
            }
            Keyword::While => {
                self.advance()?;
                let condition = self.condition()?;
                let body = self.body()?;
                Ok(Stmt::While { condition, body })
            }
            Keyword::Break => {
                self.advance()?;
                self.expect(Operator::Semicolon, "`;`")?;
                Ok(Stmt::Break)
            }
            Keyword::Continue => {
                self.advance()?;
                self.expect(Operator::Semicolon, "`;`")?;
                Ok(Stmt::Continue)
            }
            Keyword::Return => {
                self.advance()?;
                if self.eat(Operator::Semicolon)? {
                    return Ok(Stmt::Return(None));
                }
                let value = self.expression()?;
                self.expect(Operator::Semicolon, "`;`")?;
                Ok(Stmt::Return(Some(value)))
            }
            Keyword::New => {
                let expr = self.expression()?;
                self.expect(Operator::Semicolon, "`;`")?;
                Ok(Stmt::Expr(expr))
            }
            Keyword::Fn | Keyword::Else | Keyword::Class | Keyword::Import => {
                Err(self.unexpected(&["statement"]))
            }
        }
    }

    fn condition(&mut self) -> Result<Expr, Error> {
        self.expect(Operator::LParen, "`(`")?;
        let condition = self.expression()?;
        self.expect(Operator::RParen, "`)`")?;
        Ok(condition)
    }

    /// A braced block or a single statement.
    fn body(&mut self) -> Result<Vec<Stmt>, Error> {
        if self.at(Operator::LBrace) {
            self.block()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    pub fn block(&mut self) -> Result<Vec<Stmt>, Error> {
        self.expect(Operator::LBrace, "`{`")?;
        let mut stmts = vec![];
        while !self.eat(Operator::RBrace)? {
            if self.kind() == Some(TokenKind::End) {
                return Err(self.unexpected(&["statement", "`}`"]));
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    pub fn function(&mut self) -> Result<Function, Error> {
        self.expect_keyword(Keyword::Fn, "`fn`")?;
        let (name, _) = self.expect_identifier()?;
        self.expect(Operator::LParen, "`(`")?;
        let mut params = vec![];
        if !self.eat(Operator::RParen)? {
            loop {
                params.push(self.declaration(false)?);
                if self.eat(Operator::RParen)? {
                    break;
                }
                if !self.eat(Operator::Comma)? {
                    return Err(self.unexpected(&["`,`", "`)`"]));
                }
            }
        }
        // Result annotations are accepted, and ignored, from the first stage on.
        let result = if self.eat(Operator::Colon)? {
            Some(self.type_name()?)
        } else {
            None
        };
        let body = self.block()?;
        trace!(name = &*name, params = params.len(), "parsed function");
        Ok(Function {
            name,
            params,
            result,
            body,
        })
    }

    pub fn class(&mut self) -> Result<Class, Error> {
        self.require(Feature::Classes)?;
        self.expect_keyword(Keyword::Class, "`class`")?;
        let (name, _) = self.expect_identifier()?;
        self.expect(Operator::LBrace, "`{`")?;
        let mut fields = vec![];
        while !self.eat(Operator::RBrace)? {
            fields.push(self.declaration(false)?);
            self.expect(Operator::Semicolon, "`;`")?;
        }
        Ok(Class { name, fields })
    }

    pub fn item(&mut self) -> Result<Item, Error> {
        match self.kind() {
            Some(TokenKind::Keyword(Keyword::Fn)) => Ok(Item::Function(self.function()?)),
            Some(TokenKind::Keyword(Keyword::Let)) => Ok(Item::Global(self.let_declarations()?)),
            Some(TokenKind::Keyword(Keyword::Class)) => Ok(Item::Class(self.class()?)),
            Some(TokenKind::Keyword(Keyword::Import)) => {
                self.require(Feature::Imports)?;
                self.advance()?;
                if self.kind() != Some(TokenKind::String) {
                    return Err(self.unexpected(&["string literal"]));
                }
                let path = self.advance()?.value;
                self.expect(Operator::Semicolon, "`;`")?;
                Ok(Item::Import(path))
            }
            _ if self.stage().supports(Feature::Classes) => {
                Err(self.unexpected(&["`fn`", "`let`", "`class`", "`import`"]))
            }
            _ => Err(self.unexpected(&["`fn`", "`let`"])),
        }
    }

    pub fn module(&mut self) -> Result<Vec<Item>, Error> {
        let mut items = vec![];
        while self.kind() != Some(TokenKind::End) {
            items.push(self.item()?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ast::{BinaryOp, Expr, Item, Stmt, Type, UnaryOp},
        Parser, MAX_NESTING,
    };
    use crate::{
        error::Error,
        lexer::{Lexer, LexerError},
        stage::Stage,
    };
    use assert2::{check, let_assert};

    fn parser(stage: Stage, source: &str) -> Parser<'_> {
        Parser::new(Lexer::new(source, stage))
    }

    fn expr(source: &str) -> Result<Expr, Error> {
        parser(Stage::Two, source).expression()
    }

    fn num(n: i64) -> Expr {
        Expr::Number(n)
    }

    #[test]
    fn left_associative_levels() {
        check!(
            expr("1 - 2 - 3")
                == Ok(Expr::binary(
                    BinaryOp::Subtract,
                    Expr::binary(BinaryOp::Subtract, num(1), num(2)),
                    num(3)
                ))
        );
        check!(
            expr("1 / 2 * 3")
                == Ok(Expr::binary(
                    BinaryOp::Multiply,
                    Expr::binary(BinaryOp::Divide, num(1), num(2)),
                    num(3)
                ))
        );
    }

    #[test]
    fn right_associative_levels() {
        check!(
            expr("2 ** 3 ** 4")
                == Ok(Expr::binary(
                    BinaryOp::Power,
                    num(2),
                    Expr::binary(BinaryOp::Power, num(3), num(4))
                ))
        );
        let_assert!(Ok(Expr::Assign { target, value }) = expr("a = b = 1"));
        check!(*target == Expr::variable("a"));
        let_assert!(Expr::Assign { .. } = *value);
    }

    #[test]
    fn precedence_ladder() {
        // modulo is looser than multiplication
        check!(
            expr("1 * 2 % 3")
                == Ok(Expr::binary(
                    BinaryOp::Remainder,
                    Expr::binary(BinaryOp::Multiply, num(1), num(2)),
                    num(3)
                ))
        );
        // a minus glued to its digits is part of the literal
        check!(expr("-2 ** 2") == Ok(Expr::binary(BinaryOp::Power, num(-2), num(2))));
        // unary minus binds looser than exponent
        check!(
            expr("- 2 ** 2")
                == Ok(Expr::unary(
                    UnaryOp::Negate,
                    Expr::binary(BinaryOp::Power, num(2), num(2))
                ))
        );
        // `!` applies to a whole comparison
        check!(
            expr("!1 == 2")
                == Ok(Expr::unary(
                    UnaryOp::Not,
                    Expr::binary(BinaryOp::Equal, num(1), num(2))
                ))
        );
        check!(
            expr("1 || 2 && 3")
                == Ok(Expr::binary(
                    BinaryOp::Or,
                    num(1),
                    Expr::binary(BinaryOp::And, num(2), num(3))
                ))
        );
    }

    #[test]
    fn postfix_chains() {
        check!(
            expr("a.b[1].c")
                == Ok(Expr::Member {
                    object: Box::new(Expr::Subscript {
                        array: Box::new(Expr::Member {
                            object: Box::new(Expr::variable("a")),
                            field: Box::from("b"),
                        }),
                        index: Box::new(num(1)),
                    }),
                    field: Box::from("c"),
                })
        );
        check!(
            expr("new List<Foo>()")
                == Ok(Expr::New {
                    class: Type {
                        name: Box::from("List"),
                        argument: Some(Box::new(Type::named("Foo"))),
                    }
                })
        );
    }

    #[test]
    fn invalid_expressions() {
        let_assert!(Err(Error::Syntax { found, .. }) = expr(";"));
        check!(&*found == "`;`");
        let_assert!(Err(Error::Syntax { found, expected, .. }) = expr("(3"));
        check!(&*found == "end of input");
        check!(expected == ["`)`"]);
        let_assert!(Err(Error::InvalidAssignmentTarget { span }) = expr("f() = 1"));
        check!(span == (0..4));
    }

    #[test]
    fn later_stage_syntax_is_gated() {
        let_assert!(Err(Error::Unsupported { .. }) = parser(Stage::One, "a.b").expression());
        let_assert!(Err(Error::Unsupported { .. }) = parser(Stage::One, "let x: Foo;").statement());
        let_assert!(Err(Error::Unsupported { .. }) = parser(Stage::One, "class A {}").class());
        let_assert!(Err(Error::Unsupported { .. }) = parser(Stage::Zero, "fn f(x: A) {}").function());
        let_assert!(Ok(function) = parser(Stage::Zero, "fn f(x): Int {}").function());
        check!(function.result == Some(Type::named("Int")));
        // `new` is an ordinary name before stage two
        check!(parser(Stage::One, "new").expression() == Ok(Expr::variable("new")));
    }

    #[test]
    fn dangling_else_binds_to_nearest_if() {
        let_assert!(Ok(Stmt::If { then, otherwise, .. }) =
            parser(Stage::One, "if (1) if (2) f(); else g();").statement());
        check!(otherwise == None);
        let_assert!([Stmt::If { otherwise: Some(_), .. }] = then.as_slice());
    }

    #[test]
    fn module_items() {
        let mut parser = parser(
            Stage::Two,
            r#"import "lib"; class A { x; y: B; } let g = 3; fn f(a: A): A { return a; }"#,
        );
        let_assert!(Ok(items) = parser.module());
        check!(items.len() == 4);
        let_assert!(Item::Import(path) = &items[0]);
        check!(&**path == "lib");
        let_assert!(Item::Class(class) = &items[1]);
        check!(class.fields[1].ty == Some(Type::named("B")));
        let_assert!(Item::Global(globals) = &items[2]);
        check!(globals[0].init == Some(num(3)));
        let_assert!(Item::Function(function) = &items[3]);
        check!(function.result == Some(Type::named("A")));
    }

    #[test]
    fn resume_state_points_after_the_last_consumed_token() {
        let source = "1; 2;";
        let mut first = parser(Stage::One, source);
        check!(first.statement() == Ok(Stmt::Expr(num(1))));
        let state = first.resume_state();
        let mut second = Parser::new(Lexer::resume(source, Stage::One, state));
        check!(second.statement() == Ok(Stmt::Expr(num(2))));
        check!(second.expect_end() == Ok(()));
    }

    #[test]
    fn nesting_is_limited() {
        let_assert!(Err(Error::NestingTooDeep { limit, span }) = expr(&"(".repeat(1000)));
        check!(limit == MAX_NESTING);
        check!(span == (MAX_NESTING..MAX_NESTING + 1));
        let_assert!(Err(Error::NestingTooDeep { .. }) = expr(&format!("{}1", "!".repeat(1000))));
        let_assert!(Err(Error::NestingTooDeep { .. }) = expr(&format!("{}1", "- ".repeat(1000))));
        let_assert!(Err(Error::NestingTooDeep { .. }) = expr(&"a = ".repeat(1000)));
        let_assert!(Err(Error::NestingTooDeep { .. }) = expr(&"2 ** ".repeat(1000)));
        let_assert!(
            Err(Error::NestingTooDeep { .. }) =
                parser(Stage::One, &"while (1) {".repeat(1000)).statement()
        );
        let_assert!(
            Err(Error::NestingTooDeep { .. }) =
                parser(Stage::One, &"if (1) ".repeat(1000)).statement()
        );

        let nested = format!("{}1{}", "(".repeat(MAX_NESTING - 1), ")".repeat(MAX_NESTING - 1));
        check!(expr(&nested) == Ok(num(1)));
    }

    #[test]
    fn lexer_errors_wait_for_the_token_to_be_needed() {
        let mut parser = parser(Stage::One, "42; \"oops");
        check!(parser.statement() == Ok(Stmt::Expr(num(42))));
        check!(parser.resume_state().offset() == 3);
        let_assert!(Err(Error::Lex { error, span }) = parser.expect_end());
        check!(error == LexerError::UnterminatedString);
        check!(span == (4..9));

        let_assert!(Err(Error::Lex { .. }) = parser.statement());
        let_assert!(Err(Error::Lex { .. }) = expr("\"oops"));
    }
}
