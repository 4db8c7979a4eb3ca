//! Structured statement tree and expression model.
//!
//! This is the input contract of the data-flow passes. An external structuring
//! stage turns the inlined [`ControlFlowGraph`](crate::analysis::ControlFlowGraph)
//! into nested statements and reconstructs the expressions inside them; the
//! passes in [`crate::analysis`] then version, type and rename the variables in
//! place.
//!
//! # Key Components
//!
//! - [`StatementTree`] - Arena of statements with root and dummy exit
//! - [`Statement`] / [`StatementKind`] - Statement nodes and their payload
//! - [`StatEdge`] - Regular, exception, break, continue and finally-exit edges
//! - [`Expr`] / [`ExprKind`] - Expressions with child enumeration and type bounds
//! - [`StatementTreeBuilder`] - Bottom-up construction with validation

mod builder;
mod expr;
mod statement;

pub use builder::StatementTreeBuilder;
pub use expr::{
    ArrayExpr, AssignmentExpr, Bound, ConstExpr, ConstValue, ExitExpr, ExitKind, Expr, ExprId, ExprIdGenerator,
    ExprKind, FieldExpr, FunctionExpr, FunctionType, InvocationExpr, MonitorKind, NewExpr, TypeConstraint, VarExpr,
    VarVersionPair, STACK_BASE,
};
pub use statement::{
    EdgeKind, ExprSlot, IfType, LoopType, StatEdge, StatId, Statement, StatementKind, StatementTree,
};
