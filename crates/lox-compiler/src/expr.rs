//! Expression parsing: the Pratt rule table and its productions.
//!
//! Every production emits bytecode as it parses. `can_assign` threads the
//! one piece of context Pratt parsing needs for assignment targets: only a
//! prefix parsed at assignment precedence may consume a following `=`.

use lox_lex::{Token, TokenKind};
use lox_runtime::{ObjRef, Op, Value};

use crate::compiler::{Compiler, Resolved};

/// Operator precedence, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'vm> = fn(&mut Compiler<'src, 'vm>, bool);

struct Rule<'src, 'vm> {
    prefix: Option<ParseFn<'src, 'vm>>,
    infix: Option<ParseFn<'src, 'vm>>,
    precedence: Precedence,
}

fn rule<'src, 'vm>(kind: TokenKind) -> Rule<'src, 'vm> {
    use TokenKind::*;

    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'vm>>,
        Option<ParseFn<'src, 'vm>>,
        Precedence,
    ) = match kind {
        LeftParen => (
            Some(Compiler::grouping),
            Some(Compiler::call),
            Precedence::Call,
        ),
        Dot => (None, Some(Compiler::dot), Precedence::Call),
        Minus => (
            Some(Compiler::unary),
            Some(Compiler::binary),
            Precedence::Term,
        ),
        Plus => (None, Some(Compiler::binary), Precedence::Term),
        Slash | Star => (None, Some(Compiler::binary), Precedence::Factor),
        Bang => (Some(Compiler::unary), None, Precedence::None),
        BangEqual | EqualEqual => (None, Some(Compiler::binary), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            (None, Some(Compiler::binary), Precedence::Comparison)
        }
        Identifier => (Some(Compiler::variable), None, Precedence::None),
        String => (Some(Compiler::string), None, Precedence::None),
        Number => (Some(Compiler::number), None, Precedence::None),
        And => (None, Some(Compiler::and_operator), Precedence::And),
        Or => (None, Some(Compiler::or_operator), Precedence::Or),
        False | True | Nil => (Some(Compiler::literal), None, Precedence::None),
        Super => (Some(Compiler::super_access), None, Precedence::None),
        This => (Some(Compiler::this_access), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };

    Rule {
        prefix,
        infix,
        precedence,
    }
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    pub fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match rule(self.previous.kind).prefix {
            Some(prefix) => prefix,
            None => {
                self.error("Expect expression.");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            let infix = rule(self.previous.kind)
                .infix
                .expect("token with infix precedence has an infix rule");
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(Op::Negate),
            TokenKind::Bang => self.emit_op(Op::Not),
            _ => unreachable!("unary rule on non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let next = rule(operator).precedence.next();
        self.parse_precedence(next);

        match operator {
            TokenKind::BangEqual => {
                self.emit_op(Op::Equal);
                self.emit_op(Op::Not);
            }
            TokenKind::EqualEqual => self.emit_op(Op::Equal),
            TokenKind::Greater => self.emit_op(Op::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(Op::Less);
                self.emit_op(Op::Not);
            }
            TokenKind::Less => self.emit_op(Op::Less),
            TokenKind::LessEqual => {
                self.emit_op(Op::Greater);
                self.emit_op(Op::Not);
            }
            TokenKind::Plus => self.emit_op(Op::Add),
            TokenKind::Minus => self.emit_op(Op::Subtract),
            TokenKind::Star => self.emit_op(Op::Multiply),
            TokenKind::Slash => self.emit_op(Op::Divide),
            _ => unreachable!("binary rule on non-binary token"),
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self
            .previous
            .lexeme
            .parse()
            .expect("scanner produced an unparsable number");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // Trim the surrounding quotes.
        let id = self.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Obj(ObjRef::String(id)));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(Op::False),
            TokenKind::True => self.emit_op(Op::True),
            TokenKind::Nil => self.emit_op(Op::Nil),
            _ => unreachable!("literal rule on non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    /// Emit a load or store for `name`, wherever it resolves.
    pub(crate) fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve(name.lexeme) {
            Resolved::Local(slot) => (Op::GetLocal, Op::SetLocal, slot),
            Resolved::Upvalue(slot) => (Op::GetUpvalue, Op::SetUpvalue, slot),
            Resolved::Global => {
                let index = self.identifier_constant(name);
                (Op::GetGlobal, Op::SetGlobal, index)
            }
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
        } else {
            self.emit_op(get_op);
        }
        self.emit_byte(arg);
    }

    /// `and` short-circuits: the left value is the result when falsey.
    fn and_operator(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    /// `or` short-circuits: the left value is the result when truthy.
    fn or_operator(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(Op::JumpIfFalse);
        let end_jump = self.emit_jump(Op::Jump);
        self.patch_jump(else_jump);
        self.emit_op(Op::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_byte(Op::call(argc));
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let token = self.previous;
        let name = self.identifier_constant(token);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(Op::SetProperty);
            self.emit_byte(name);
        } else if self.match_token(TokenKind::LeftParen) {
            // Fused property access + call.
            let argc = self.argument_list();
            self.emit_byte(Op::invoke(argc));
            self.emit_byte(name);
        } else {
            self.emit_op(Op::GetProperty);
            self.emit_byte(name);
        }
    }

    fn this_access(&mut self, _can_assign: bool) {
        if self.class.is_none() {
            self.error("Cannot use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_access(&mut self, _can_assign: bool) {
        match &self.class {
            None => self.error("Cannot use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Cannot use 'super' in a class with no superclass.");
            }
            _ => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let token = self.previous;
        let name = self.identifier_constant(token);

        // The receiver, then the superclass the compiler stashed in the
        // synthetic `super` local.
        self.named_variable(Token::synthetic("this"), false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(Token::synthetic("super"), false);
            self.emit_byte(Op::super_invoke(argc));
        } else {
            self.named_variable(Token::synthetic("super"), false);
            self.emit_op(Op::GetSuper);
        }
        self.emit_byte(name);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == Op::MAX_CALL_ARGS {
                    self.error("Cannot have more than 8 arguments.");
                } else {
                    argc += 1;
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc
    }
}
