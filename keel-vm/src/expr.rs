//! Expression trees: structural optimization and lowering to the logical IR.

use crate::error::CompileError;
use crate::ir::{CompilationResult, CompileCtx, LInstr, TempId};

use keel_asm::{SlotId, Tag, ValueCell};

/// Binary operator kinds. `And` is rewritten to its n-ary short-circuit form
/// before lowering; `Add` lowers directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    /// Integer addition with nothing-propagation.
    Add,
    /// Short-circuit conjunction over maybe-nothing values.
    And,
}

/// One binding of a `let`.
#[derive(Debug, Clone, PartialEq)]
pub struct LetBind {
    /// Variable name visible in the body.
    pub name: String,
    /// Bound expression, evaluated once before the body.
    pub expr: Expression,
}

/// An expression tree, built programmatically by the embedder.
///
/// There is no surface syntax; the embedder owns the tree and hands the root
/// to [`crate::compiler::compile`]. Each variant knows how to
/// [`optimize`](Self::optimize) itself structurally and how to
/// [`compile`](Self::compile) itself to IR.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal cell. `Slot`-tagged cells are read through the slot table
    /// at run time rather than materialized from the constant pool.
    Const(ValueCell),
    /// Reference to a `let`-bound variable.
    Variable(String),
    /// Sequential bindings installed around a body.
    Let {
        /// Bindings, evaluated in order; later ones see earlier ones.
        binds: Vec<LetBind>,
        /// Body evaluated with all bindings in scope.
        body: Box<Expression>,
    },
    /// Binary operation.
    BinOp {
        /// Operator.
        op: BinOpKind,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// n-ary operation. Produced by optimization of `BinOp(And)` chains.
    NOp {
        /// Operator.
        op: BinOpKind,
        /// Operands in evaluation order.
        operands: Vec<Expression>,
    },
    /// Conditional. Yields the condition itself when it is nothing.
    If {
        /// Tested expression.
        condition: Box<Expression>,
        /// Value when the condition is truthy.
        then: Box<Expression>,
        /// Value when the condition is falsey (and not nothing).
        otherwise: Box<Expression>,
    },
    /// Call to a named builtin. Only `fillEmpty` is known.
    Call {
        /// Function name.
        function: String,
        /// Arguments in evaluation order.
        args: Vec<Expression>,
    },
}

impl Expression {
    /// Structural rewrite, bottom-up: children first, then this node's rule.
    ///
    /// `BinOp(And)` becomes `NOp(And, [left, right])`, and `NOp(And)`
    /// flattens any operand that is itself an `And` chain, so nested
    /// conjunctions collapse into one n-ary short-circuit form.
    pub fn optimize(self) -> Self {
        match self {
            Expression::BinOp { op, left, right } => {
                let left = left.optimize();
                let right = right.optimize();
                if op == BinOpKind::And {
                    Expression::NOp {
                        op,
                        operands: vec![left, right],
                    }
                    .optimize()
                } else {
                    Expression::BinOp {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
            }
            Expression::NOp { op, operands } => {
                let operands: Vec<_> = operands.into_iter().map(Expression::optimize).collect();
                if op == BinOpKind::And {
                    let mut flat = Vec::with_capacity(operands.len());
                    for operand in operands {
                        match operand {
                            Expression::NOp {
                                op: inner,
                                operands: nested,
                            } if inner == op => flat.extend(nested),
                            other => flat.push(other),
                        }
                    }
                    Expression::NOp { op, operands: flat }
                } else {
                    Expression::NOp { op, operands }
                }
            }
            Expression::Let { binds, body } => Expression::Let {
                binds: binds
                    .into_iter()
                    .map(|bind| LetBind {
                        name: bind.name,
                        expr: bind.expr.optimize(),
                    })
                    .collect(),
                body: Box::new(body.optimize()),
            },
            Expression::If {
                condition,
                then,
                otherwise,
            } => Expression::If {
                condition: Box::new(condition.optimize()),
                then: Box::new(then.optimize()),
                otherwise: Box::new(otherwise.optimize()),
            },
            Expression::Call { function, args } => Expression::Call {
                function,
                args: args.into_iter().map(Expression::optimize).collect(),
            },
            leaf @ (Expression::Const(_) | Expression::Variable(_)) => leaf,
        }
    }

    /// Lower this expression to IR, drawing temps and labels from `ctx`.
    pub fn compile(&self, ctx: &mut CompileCtx) -> Result<CompilationResult, CompileError> {
        match self {
            Expression::Const(value) if value.tag == Tag::Slot => {
                let id = ctx.next_id();
                let mut res = CompilationResult::new(id);
                res.instructions.push(LInstr::LoadSlot {
                    dst: id,
                    slot: value.val as SlotId,
                });
                Ok(res)
            }
            Expression::Const(value) => {
                let id = ctx.next_id();
                let mut res = CompilationResult::new(id);
                res.instructions.push(LInstr::LoadConst {
                    dst: id,
                    value: *value,
                });
                Ok(res)
            }
            Expression::Variable(name) => {
                let temp = ctx
                    .var(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                Ok(CompilationResult::new(temp))
            }
            Expression::Let { binds, body } => {
                let mut res = CompilationResult::default();
                let mut saved = Vec::with_capacity(binds.len());
                for bind in binds {
                    let bound = bind.expr.compile(ctx)?;
                    let temp = bound.temp;
                    res.append(bound);
                    saved.push((bind.name.as_str(), ctx.bind(&bind.name, temp)));
                }

                let body_res = body.compile(ctx)?;
                res.temp = body_res.temp;
                res.append(body_res);

                for (name, shadowed) in saved.into_iter().rev() {
                    ctx.unbind(name, shadowed);
                }
                Ok(res)
            }
            Expression::BinOp { op, left, right } => {
                let id = ctx.next_id();
                match op {
                    BinOpKind::Add => {
                        let mut res = CompilationResult::new(id);
                        let left_res = left.compile(ctx)?;
                        let right_res = right.compile(ctx)?;
                        let (l, r) = (left_res.temp, right_res.temp);
                        res.append(left_res);
                        res.append(right_res);
                        res.instructions.push(LInstr::Add {
                            dst: id,
                            left: l,
                            right: r,
                        });
                        Ok(res)
                    }
                    // Normally rewritten to the n-ary form by `optimize`;
                    // lower an un-optimized pair the same way.
                    BinOpKind::And => {
                        compile_and_chain(ctx, id, &[left.as_ref(), right.as_ref()])
                    }
                }
            }
            Expression::NOp { op, operands } => {
                let id = ctx.next_id();
                match op {
                    BinOpKind::And => {
                        compile_and_chain(ctx, id, &operands.iter().collect::<Vec<_>>())
                    }
                    BinOpKind::Add => Err(CompileError::UnsupportedOperation(*op)),
                }
            }
            Expression::If {
                condition,
                then,
                otherwise,
            } => {
                let id = ctx.next_id();
                let mut res = CompilationResult::new(id);

                let cond_res = condition.compile(ctx)?;
                let cond = cond_res.temp;
                res.append(cond_res);

                let true_label = ctx.next_label();
                let end_label = ctx.next_label();

                // A nothing condition skips both branches and yields itself.
                res.instructions.push(LInstr::TestNothing { reg: cond });
                res.instructions.push(LInstr::Jmp {
                    target: end_label.clone(),
                });

                res.instructions.push(LInstr::TestTruthy { reg: cond });
                res.instructions.push(LInstr::Jmp {
                    target: true_label.clone(),
                });

                let otherwise_res = otherwise.compile(ctx)?;
                let otherwise_temp = otherwise_res.temp;
                res.append(otherwise_res);
                res.instructions.push(LInstr::Jmp {
                    target: end_label.clone(),
                });

                res.instructions.push(LInstr::Label { name: true_label });
                let then_res = then.compile(ctx)?;
                let then_temp = then_res.temp;
                res.append(then_res);

                res.instructions.push(LInstr::Label { name: end_label });
                res.instructions.push(LInstr::MovePhi {
                    dst: id,
                    sources: vec![cond, otherwise_temp, then_temp],
                });
                Ok(res)
            }
            Expression::Call { function, args } => {
                let id = ctx.next_id();
                match function.as_str() {
                    "fillEmpty" => {
                        if args.len() != 2 {
                            return Err(CompileError::BadArity {
                                function: function.clone(),
                                expected: 2,
                                actual: args.len(),
                            });
                        }
                        let mut res = CompilationResult::new(id);
                        let left_res = args[0].compile(ctx)?;
                        let right_res = args[1].compile(ctx)?;
                        let (l, r) = (left_res.temp, right_res.temp);
                        res.append(left_res);
                        res.append(right_res);
                        res.instructions.push(LInstr::FillEmpty {
                            dst: id,
                            left: l,
                            right: r,
                        });
                        Ok(res)
                    }
                    _ => Err(CompileError::UnknownFunction(function.clone())),
                }
            }
        }
    }
}

/// Lower an n-ary short-circuit `And`: every operand but the last jumps to
/// the merge point when it is nothing or falsey; the φ merges whichever
/// operand the taken path produced.
fn compile_and_chain(
    ctx: &mut CompileCtx,
    id: TempId,
    operands: &[&Expression],
) -> Result<CompilationResult, CompileError> {
    let (last, init) = operands.split_last().ok_or(CompileError::EmptyOperation)?;

    let mut res = CompilationResult::new(id);
    let end_label = ctx.next_label();
    let mut sources = Vec::with_capacity(operands.len());

    for operand in init {
        let operand_res = operand.compile(ctx)?;
        let temp = operand_res.temp;
        res.append(operand_res);

        // Nothing short-circuits, and so does falsey.
        res.instructions.push(LInstr::TestNothing { reg: temp });
        res.instructions.push(LInstr::Jmp {
            target: end_label.clone(),
        });
        res.instructions.push(LInstr::TestFalsey { reg: temp });
        res.instructions.push(LInstr::Jmp {
            target: end_label.clone(),
        });

        sources.push(temp);
    }

    // The last operand needs no jumps; it falls through to the merge.
    let last_res = last.compile(ctx)?;
    sources.push(last_res.temp);
    res.append(last_res);

    res.instructions.push(LInstr::Label { name: end_label });
    res.instructions.push(LInstr::MovePhi { dst: id, sources });
    Ok(res)
}

impl Expression {
    /// Integer literal.
    pub fn int(v: i64) -> Self {
        Expression::Const(ValueCell::int(v))
    }

    /// Boolean literal.
    pub fn boolean(b: bool) -> Self {
        Expression::Const(ValueCell::boolean(b))
    }

    /// The nothing literal.
    pub fn nothing() -> Self {
        Expression::Const(ValueCell::nothing())
    }

    /// A read of the external slot at `index`.
    pub fn slot(index: SlotId) -> Self {
        Expression::Const(ValueCell::slot(index))
    }

    /// A variable reference.
    pub fn var(name: impl Into<String>) -> Self {
        Expression::Variable(name.into())
    }

    /// `left + right`.
    pub fn add(left: Expression, right: Expression) -> Self {
        Expression::BinOp {
            op: BinOpKind::Add,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left && right` over maybe-nothing values.
    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::BinOp {
            op: BinOpKind::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `if condition { then } else { otherwise }`.
    pub fn if_else(condition: Expression, then: Expression, otherwise: Expression) -> Self {
        Expression::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// `let` with the given `(name, value)` bindings around `body`.
    pub fn let_in(binds: Vec<(&str, Expression)>, body: Expression) -> Self {
        Expression::Let {
            binds: binds
                .into_iter()
                .map(|(name, expr)| LetBind {
                    name: name.to_owned(),
                    expr,
                })
                .collect(),
            body: Box::new(body),
        }
    }

    /// A call to a named builtin.
    pub fn call(function: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call {
            function: function.into(),
            args,
        }
    }

    /// `fillEmpty(value, fallback)`.
    pub fn fill_empty(value: Expression, fallback: Expression) -> Self {
        Expression::call("fillEmpty", vec![value, fallback])
    }

    /// `fillEmpty(value, false)` — the usual guard in front of a truth test.
    pub fn fill_empty_false(value: Expression) -> Self {
        Expression::fill_empty(value, Expression::boolean(false))
    }
}
