//! ECMAScript condition oracle built on the `boa` parser stack.
//!
//! Transition `cond` attributes are compiled once with [`boa_parser`] into
//! [`boa_ast`] expressions and kept behind the opaque handles the optimized
//! document stores. Evaluation interprets the AST directly against the
//! evaluation context: identifiers resolve into the triggering event's
//! payload, `_event.name` and `_event.data.<field>` read the event itself,
//! and the SCXML `In('state_id')` predicate queries the configuration.
//!
//! Only the expression subset conditions actually need is interpreted.
//! Anything else is an [`OracleError`]: at compile time that fails
//! validation, at evaluation time the interpreter absorbs it as `false`.

use boa_ast::expression::access::{PropertyAccess, PropertyAccessField};
use boa_ast::expression::literal::Literal;
use boa_ast::expression::operator::binary::{ArithmeticOp, BinaryOp, LogicalOp, RelationalOp};
use boa_ast::expression::operator::unary::UnaryOp;
use boa_ast::scope::Scope;
use boa_ast::{Expression, Statement, StatementListItem};
use boa_interner::{Interner, Sym};
use log::trace;
use statechart_core::Val;
use statechart_core::oracle::{Cond, ConditionOracle, EvalContext, OracleError};

/// Compiler and evaluator for ECMAScript transition conditions.
#[derive(Debug, Default)]
pub struct EcmaOracle {
    interner: Interner,
    conditions: Vec<Expression>,
}

impl EcmaOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, sym: Sym) -> Result<&str, OracleError> {
        self.interner
            .resolve(sym)
            .ok_or_else(|| OracleError::Unsupported("unknown interned symbol".to_owned()))?
            .utf8()
            .ok_or_else(|| OracleError::Unsupported("identifier is not utf8".to_owned()))
    }

    fn eval_expression(
        &self,
        expression: &Expression,
        ctx: &EvalContext<'_>,
    ) -> Result<Val, OracleError> {
        match expression {
            Expression::Literal(literal) => match literal {
                Literal::String(sym) => Ok(Val::Text(self.resolve(*sym)?.to_owned())),
                Literal::Num(n) => Ok(Val::Number(*n)),
                Literal::Int(i) => Ok(Val::Integer(*i)),
                Literal::Bool(b) => Ok(Val::Boolean(*b)),
                Literal::BigInt(_) | Literal::Null | Literal::Undefined => Err(
                    OracleError::Unsupported("bigint, null and undefined literals".to_owned()),
                ),
            },
            Expression::Identifier(ident) => {
                let name = self.resolve(ident.sym())?;
                ctx.event_data(name)
                    .cloned()
                    .ok_or_else(|| OracleError::UnknownIdentifier(name.to_owned()))
            }
            Expression::PropertyAccess(access) => self.eval_property(access, ctx),
            Expression::Call(call) => {
                let Expression::Identifier(function) = call.function() else {
                    return Err(OracleError::Unsupported("computed call targets".to_owned()));
                };
                let name = self.resolve(function.sym())?;
                if name != "In" {
                    return Err(OracleError::Unsupported(format!("call to `{name}`")));
                }
                let [argument] = call.args() else {
                    return Err(OracleError::Unsupported(
                        "In() takes exactly one argument".to_owned(),
                    ));
                };
                match self.eval_expression(argument, ctx)? {
                    Val::Text(id) => Ok(Val::Boolean(ctx.in_state(&id))),
                    _ => Err(OracleError::Unsupported(
                        "In() takes a state id string".to_owned(),
                    )),
                }
            }
            Expression::Unary(unary) => {
                let target = self.eval_expression(unary.target(), ctx)?;
                match unary.op() {
                    UnaryOp::Not => match target {
                        Val::Boolean(b) => Ok(Val::Boolean(!b)),
                        _ => Err(OracleError::NotABoolean),
                    },
                    UnaryOp::Minus => target
                        .as_number()
                        .map(|n| Val::Number(-n))
                        .ok_or_else(|| OracleError::Unsupported("negating a non-number".to_owned())),
                    UnaryOp::Plus => target
                        .as_number()
                        .map(Val::Number)
                        .ok_or_else(|| OracleError::Unsupported("unary plus on a non-number".to_owned())),
                    op => Err(OracleError::Unsupported(format!("unary operator `{op}`"))),
                }
            }
            Expression::Binary(binary) => match binary.op() {
                BinaryOp::Arithmetic(op) => {
                    let lhs = self.number(binary.lhs(), ctx)?;
                    let rhs = self.number(binary.rhs(), ctx)?;
                    let value = match op {
                        ArithmeticOp::Add => lhs + rhs,
                        ArithmeticOp::Sub => lhs - rhs,
                        ArithmeticOp::Mul => lhs * rhs,
                        ArithmeticOp::Div => lhs / rhs,
                        ArithmeticOp::Mod => lhs % rhs,
                        ArithmeticOp::Exp => lhs.powf(rhs),
                    };
                    Ok(Val::Number(value))
                }
                BinaryOp::Relational(op) => {
                    let lhs = self.eval_expression(binary.lhs(), ctx)?;
                    let rhs = self.eval_expression(binary.rhs(), ctx)?;
                    let pass = match op {
                        RelationalOp::Equal => lhs.loose_eq(&rhs),
                        RelationalOp::NotEqual => !lhs.loose_eq(&rhs),
                        RelationalOp::StrictEqual => lhs == rhs,
                        RelationalOp::StrictNotEqual => lhs != rhs,
                        RelationalOp::GreaterThan
                        | RelationalOp::GreaterThanOrEqual
                        | RelationalOp::LessThan
                        | RelationalOp::LessThanOrEqual => {
                            let ordering = lhs.loose_cmp(&rhs).ok_or_else(|| {
                                OracleError::Unsupported(
                                    "ordering of non-numeric values".to_owned(),
                                )
                            })?;
                            match op {
                                RelationalOp::GreaterThan => ordering.is_gt(),
                                RelationalOp::GreaterThanOrEqual => ordering.is_ge(),
                                RelationalOp::LessThan => ordering.is_lt(),
                                RelationalOp::LessThanOrEqual => ordering.is_le(),
                                _ => unreachable!("outer match covers the ordering operators"),
                            }
                        }
                        op => {
                            return Err(OracleError::Unsupported(format!(
                                "relational operator `{op}`"
                            )));
                        }
                    };
                    Ok(Val::Boolean(pass))
                }
                BinaryOp::Logical(op) => {
                    let lhs = self.boolean(binary.lhs(), ctx)?;
                    match op {
                        LogicalOp::And if !lhs => Ok(Val::Boolean(false)),
                        LogicalOp::Or if lhs => Ok(Val::Boolean(true)),
                        LogicalOp::And | LogicalOp::Or => {
                            Ok(Val::Boolean(self.boolean(binary.rhs(), ctx)?))
                        }
                        LogicalOp::Coalesce => {
                            Err(OracleError::Unsupported("`??` operator".to_owned()))
                        }
                    }
                }
                op => Err(OracleError::Unsupported(format!("binary operator `{op}`"))),
            },
            Expression::Conditional(conditional) => {
                if self.boolean(conditional.condition(), ctx)? {
                    self.eval_expression(conditional.if_true(), ctx)
                } else {
                    self.eval_expression(conditional.if_false(), ctx)
                }
            }
            Expression::Parenthesized(parenthesized) => {
                self.eval_expression(parenthesized.expression(), ctx)
            }
            expression => Err(OracleError::Unsupported(format!(
                "expression {expression:?}"
            ))),
        }
    }

    /// Resolves `_event.name` and `_event.data.<field>` accesses.
    fn eval_property(
        &self,
        access: &PropertyAccess,
        ctx: &EvalContext<'_>,
    ) -> Result<Val, OracleError> {
        let mut path: Vec<&str> = Vec::new();
        let mut current = access;
        loop {
            let PropertyAccess::Simple(simple) = current else {
                return Err(OracleError::Unsupported(
                    "private or super property access".to_owned(),
                ));
            };
            match simple.field() {
                PropertyAccessField::Const(sym) => path.push(self.resolve(*sym)?),
                PropertyAccessField::Expr(_) => {
                    return Err(OracleError::Unsupported(
                        "computed property access".to_owned(),
                    ));
                }
            }
            match simple.target() {
                Expression::PropertyAccess(inner) => current = inner,
                Expression::Identifier(ident) => {
                    path.push(self.resolve(ident.sym())?);
                    break;
                }
                _ => {
                    return Err(OracleError::Unsupported(
                        "property access on a computed value".to_owned(),
                    ));
                }
            }
        }
        path.reverse();
        match path.as_slice() {
            ["_event", "name"] => ctx
                .event_name()
                .map(|name| Val::Text(name.to_owned()))
                .ok_or_else(|| OracleError::UnknownIdentifier("_event.name".to_owned())),
            ["_event", "data", field] => ctx
                .event_data(field)
                .cloned()
                .ok_or_else(|| OracleError::UnknownIdentifier(format!("_event.data.{field}"))),
            _ => Err(OracleError::Unsupported(format!(
                "property access `{}`",
                path.join(".")
            ))),
        }
    }

    fn number(&self, expression: &Expression, ctx: &EvalContext<'_>) -> Result<f64, OracleError> {
        self.eval_expression(expression, ctx)?
            .as_number()
            .ok_or_else(|| OracleError::Unsupported("arithmetic on a non-number".to_owned()))
    }

    fn boolean(&self, expression: &Expression, ctx: &EvalContext<'_>) -> Result<bool, OracleError> {
        match self.eval_expression(expression, ctx)? {
            Val::Boolean(b) => Ok(b),
            _ => Err(OracleError::NotABoolean),
        }
    }
}

impl ConditionOracle for EcmaOracle {
    fn compile(&mut self, source: &str) -> Result<Cond, OracleError> {
        trace!(target: "oracle", "compiling condition `{source}`");
        let script = boa_parser::Parser::new(boa_parser::Source::from_bytes(source))
            .parse_script(&Scope::new_global(), &mut self.interner)
            .map_err(|err| OracleError::Parse(source.to_owned(), err.to_string()))?;
        let Some(StatementListItem::Statement(Statement::Expression(expression))) =
            script.statements().first()
        else {
            return Err(OracleError::Parse(
                source.to_owned(),
                "expected a single expression".to_owned(),
            ));
        };
        let index = self.conditions.len() as u32;
        self.conditions.push(expression.clone());
        Ok(Cond::new(index))
    }

    fn eval(&self, cond: Cond, ctx: &EvalContext<'_>) -> Result<bool, OracleError> {
        let expression = self
            .conditions
            .get(cond.index())
            .ok_or(OracleError::MissingCond(cond))?;
        match self.eval_expression(expression, ctx)? {
            Val::Boolean(pass) => Ok(pass),
            _ => Err(OracleError::NotABoolean),
        }
    }
}
