//! Statement-level expression model.
//!
//! Expressions are produced by the external reconstruction stage and stored in
//! the statements of a [`StatementTree`](crate::structure::StatementTree). The
//! analysis passes read and rewrite variable references ([`VarExpr`]) in place
//! and use [`Expr::check_type_bounds`] to drive type inference.
//!
//! # Identity
//!
//! Every expression carries an [`ExprId`] from an [`ExprIdGenerator`]. Integer
//! constants are typed through the pseudo variable `(id, -1)`, so ids must be
//! unique within one method.
//!
//! # Variable Keyspaces
//!
//! | Index range | Meaning |
//! |-------------|---------|
//! | `0..STACK_BASE` | local variable slots |
//! | `>= STACK_BASE` | operand stack temporaries |
//! | `< 0` | heap field pseudo variables (live SSA only) |

use std::fmt;

use strum::{Display, EnumIter};

use crate::assembly::{MethodDescriptor, TypeCode, TypeFamily, VarType};

/// First index of operand stack temporaries.
pub const STACK_BASE: i32 = 10_000;

/// Unique expression identifier within one method.
pub type ExprId = u32;

/// Hands out expression ids.
#[derive(Debug, Clone, Default)]
pub struct ExprIdGenerator {
    next: ExprId,
}

impl ExprIdGenerator {
    /// Generator starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator whose first id is `first`.
    #[must_use]
    pub fn starting_at(first: ExprId) -> Self {
        ExprIdGenerator { next: first }
    }

    /// Returns a fresh id.
    pub fn next_id(&mut self) -> ExprId {
        let id = self.next;
        self.next += 1;
        id
    }

    /// The id the next call will return.
    #[must_use]
    pub fn peek(&self) -> ExprId {
        self.next
    }
}

/// `(variable, version)` identity of a value.
///
/// Version 0 is unversioned; version -1 marks the constant pseudo variable
/// keyed by an expression id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarVersionPair {
    /// Variable index (slot, stack temporary or field pseudo variable)
    pub var: i32,
    /// SSA version
    pub version: i32,
}

impl VarVersionPair {
    /// Creates a pair.
    #[must_use]
    pub const fn new(var: i32, version: i32) -> Self {
        VarVersionPair { var, version }
    }

    /// Pseudo variable typing the integer constant with expression id `id`.
    #[must_use]
    pub fn constant(id: ExprId) -> Self {
        VarVersionPair {
            var: i32::try_from(id).unwrap_or(i32::MAX),
            version: -1,
        }
    }
}

impl fmt::Display for VarVersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.var, self.version)
    }
}

/// Operator of a [`FunctionExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum FunctionType {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Rem,
    Shl,
    Shr,
    Ushr,
    BitNot,
    BoolNot,
    Neg,
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    Cast,
    InstanceOf,
    ArrayLength,
    /// `x--`
    Imm,
    /// `--x`
    Mmi,
    /// `x++`
    Ipp,
    /// `++x`
    Ppi,
    /// `c ? a : b`
    Iif,
    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    /// Short-circuit `&&`
    Cadd,
    /// Short-circuit `||`
    Cor,
    StrConcat,
}

impl FunctionType {
    /// `++`/`--` in prefix or postfix form.
    #[must_use]
    pub fn is_increment(self) -> bool {
        matches!(self, FunctionType::Imm | FunctionType::Mmi | FunctionType::Ipp | FunctionType::Ppi)
    }

    /// Comparisons, `&&`, `||` and `instanceof`.
    #[must_use]
    pub fn is_boolean_valued(self) -> bool {
        matches!(
            self,
            FunctionType::Eq
                | FunctionType::Ne
                | FunctionType::Lt
                | FunctionType::Ge
                | FunctionType::Gt
                | FunctionType::Le
                | FunctionType::Cadd
                | FunctionType::Cor
                | FunctionType::BoolNot
                | FunctionType::InstanceOf
        )
    }

    /// Fixed result type of conversions and comparisons.
    fn fixed_type(self) -> Option<VarType> {
        let ty = match self {
            FunctionType::I2L | FunctionType::F2L | FunctionType::D2L => VarType::LONG,
            FunctionType::I2F | FunctionType::L2F | FunctionType::D2F => VarType::FLOAT,
            FunctionType::I2D | FunctionType::L2D | FunctionType::F2D => VarType::DOUBLE,
            FunctionType::L2I | FunctionType::F2I | FunctionType::D2I => VarType::INT,
            FunctionType::I2B => VarType::BYTE,
            FunctionType::I2C => VarType::CHAR,
            FunctionType::I2S => VarType::SHORT,
            FunctionType::ArrayLength
            | FunctionType::LCmp
            | FunctionType::FCmpL
            | FunctionType::FCmpG
            | FunctionType::DCmpL
            | FunctionType::DCmpG => VarType::INT,
            FunctionType::StrConcat => VarType::object("java/lang/String"),
            f if f.is_boolean_valued() => VarType::BOOLEAN,
            _ => return None,
        };
        Some(ty)
    }
}

/// Value of a constant.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(String),
    Null,
}

/// A variable reference or definition.
#[derive(Debug, Clone, PartialEq)]
pub struct VarExpr {
    /// Slot, stack temporary or field pseudo variable index
    pub index: i32,
    /// SSA version, 0 when unversioned
    pub version: i32,
    /// Declared type, [`VarType::UNKNOWN`] while inference runs
    pub var_type: VarType,
    /// Set on the occurrence that declares the variable
    pub is_definition: bool,
}

impl VarExpr {
    /// Identity of this occurrence.
    #[must_use]
    pub fn pair(&self) -> VarVersionPair {
        VarVersionPair::new(self.index, self.version)
    }
}

/// A literal.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr {
    /// The literal value
    pub value: ConstValue,
    /// Current type; integer constants narrow and widen during inference
    pub const_type: VarType,
    /// `0`/`1` may be read as `false`/`true`
    pub bool_permitted: bool,
}

impl ConstExpr {
    /// Integer payload, `None` for other literals.
    #[must_use]
    pub fn int_value(&self) -> Option<i32> {
        match self.value {
            ConstValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// `0` or `1`.
    #[must_use]
    pub fn has_boolean_value(&self) -> bool {
        matches!(self.value, ConstValue::Int(0 | 1))
    }

    /// The type of an integer constant before any inference.
    #[must_use]
    pub fn initial_int_type(&self) -> Option<VarType> {
        self.int_value().map(|v| VarType::of_int_constant(v, self.bool_permitted))
    }
}

/// `left = right`, or a compound assignment when `op` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentExpr {
    /// Assigned location
    pub left: Box<Expr>,
    /// Assigned value
    pub right: Box<Expr>,
    /// Operator of `left op= right`
    pub op: Option<FunctionType>,
}

/// Operator application.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    /// Operator
    pub func: FunctionType,
    /// Operands in evaluation order
    pub operands: Vec<Expr>,
    /// Cast target, or the operand type of `++`/`--`
    pub implicit_type: VarType,
}

/// Field read or write target.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldExpr {
    /// Declaring class
    pub class_name: String,
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: VarType,
    /// Receiver, `None` for static fields
    pub instance: Option<Box<Expr>>,
}

impl FieldExpr {
    /// `class.name:type`, the identity of the heap location.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}:{}", self.class_name, self.name, self.field_type)
    }
}

/// Method call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationExpr {
    /// Declaring class
    pub class_name: String,
    /// Method name
    pub name: String,
    /// Parameter and return types
    pub descriptor: MethodDescriptor,
    /// Receiver, `None` for static calls
    pub instance: Option<Box<Expr>>,
    /// Arguments
    pub args: Vec<Expr>,
}

/// Object or array creation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpr {
    /// Created type
    pub new_type: VarType,
    /// Constructor descriptor for objects
    pub constructor: Option<MethodDescriptor>,
    /// Constructor arguments
    pub args: Vec<Expr>,
    /// Array dimension lengths
    pub dimensions: Vec<Expr>,
    /// Array initializer elements
    pub initializer: Vec<Expr>,
}

/// Array element access.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayExpr {
    /// Array reference
    pub array: Box<Expr>,
    /// Element index
    pub index: Box<Expr>,
    /// Element type known from the load/store opcode
    pub hard_type: VarType,
}

/// `return` or `throw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[allow(missing_docs)]
pub enum ExitKind {
    Return,
    Throw,
}

/// Method exit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitExpr {
    /// Return or throw
    pub kind: ExitKind,
    /// Returned or thrown value
    pub value: Option<Box<Expr>>,
    /// Declared return type of the method
    pub ret_type: VarType,
}

/// `monitorenter` or `monitorexit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[allow(missing_docs)]
pub enum MonitorKind {
    Enter,
    Exit,
}

/// Expression payload.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ExprKind {
    Var(VarExpr),
    Const(ConstExpr),
    Assignment(AssignmentExpr),
    Function(FunctionExpr),
    Field(FieldExpr),
    Invocation(InvocationExpr),
    New(NewExpr),
    Array(ArrayExpr),
    Exit(ExitExpr),
    /// Condition of an `if` head
    If(Box<Expr>),
    /// Selector of a `switch` head
    Switch(Box<Expr>),
    Monitor(MonitorKind, Box<Expr>),
}

/// Which bound of a type interval a constraint applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Lower bound: the value needs at least this type
    Min,
    /// Upper bound: the value must fit into this type
    Max,
}

/// A constraint on a direct child, addressed by its position in
/// [`Expr::children`].
#[derive(Debug, Clone, PartialEq)]
pub struct TypeConstraint {
    /// Child position
    pub child: usize,
    /// Lower or upper bound
    pub bound: Bound,
    /// Constraining type
    pub ty: VarType,
}

/// One expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Unique id within the method
    pub id: ExprId,
    /// Payload
    pub kind: ExprKind,
}

impl Expr {
    // ── Constructors ─────────────────────────────────────────────────────

    /// Unversioned reference to variable `index`.
    pub fn var(ids: &mut ExprIdGenerator, index: i32) -> Self {
        Self::new(
            ids,
            ExprKind::Var(VarExpr {
                index,
                version: 0,
                var_type: VarType::UNKNOWN,
                is_definition: false,
            }),
        )
    }

    /// Variable reference with a declared type (catch variables, parameters).
    pub fn typed_var(ids: &mut ExprIdGenerator, index: i32, var_type: VarType) -> Self {
        Self::new(
            ids,
            ExprKind::Var(VarExpr {
                index,
                version: 0,
                var_type,
                is_definition: false,
            }),
        )
    }

    /// Integer constant.
    pub fn int_const(ids: &mut ExprIdGenerator, value: i32, bool_permitted: bool) -> Self {
        Self::new(
            ids,
            ExprKind::Const(ConstExpr {
                value: ConstValue::Int(value),
                const_type: VarType::of_int_constant(value, bool_permitted),
                bool_permitted,
            }),
        )
    }

    /// Any other constant.
    pub fn constant(ids: &mut ExprIdGenerator, value: ConstValue, const_type: VarType) -> Self {
        Self::new(
            ids,
            ExprKind::Const(ConstExpr {
                value,
                const_type,
                bool_permitted: false,
            }),
        )
    }

    /// `null`.
    pub fn null(ids: &mut ExprIdGenerator) -> Self {
        Self::constant(ids, ConstValue::Null, VarType::NULL)
    }

    /// `left = right`.
    pub fn assign(ids: &mut ExprIdGenerator, left: Expr, right: Expr) -> Self {
        Self::new(
            ids,
            ExprKind::Assignment(AssignmentExpr {
                left: Box::new(left),
                right: Box::new(right),
                op: None,
            }),
        )
    }

    /// `left op= right`.
    pub fn compound_assign(ids: &mut ExprIdGenerator, op: FunctionType, left: Expr, right: Expr) -> Self {
        Self::new(
            ids,
            ExprKind::Assignment(AssignmentExpr {
                left: Box::new(left),
                right: Box::new(right),
                op: Some(op),
            }),
        )
    }

    /// Operator application; `++`/`--` default to `int` operands.
    pub fn function(ids: &mut ExprIdGenerator, func: FunctionType, operands: Vec<Expr>) -> Self {
        Self::new(
            ids,
            ExprKind::Function(FunctionExpr {
                func,
                operands,
                implicit_type: VarType::INT,
            }),
        )
    }

    /// `(target) value`.
    pub fn cast(ids: &mut ExprIdGenerator, value: Expr, target: VarType) -> Self {
        Self::new(
            ids,
            ExprKind::Function(FunctionExpr {
                func: FunctionType::Cast,
                operands: vec![value],
                implicit_type: target,
            }),
        )
    }

    /// Field access; `instance == None` for static fields.
    pub fn field(
        ids: &mut ExprIdGenerator,
        class_name: &str,
        name: &str,
        field_type: VarType,
        instance: Option<Expr>,
    ) -> Self {
        Self::new(
            ids,
            ExprKind::Field(FieldExpr {
                class_name: class_name.to_string(),
                name: name.to_string(),
                field_type,
                instance: instance.map(Box::new),
            }),
        )
    }

    /// Method call.
    pub fn invoke(
        ids: &mut ExprIdGenerator,
        class_name: &str,
        name: &str,
        descriptor: MethodDescriptor,
        instance: Option<Expr>,
        args: Vec<Expr>,
    ) -> Self {
        Self::new(
            ids,
            ExprKind::Invocation(InvocationExpr {
                class_name: class_name.to_string(),
                name: name.to_string(),
                descriptor,
                instance: instance.map(Box::new),
                args,
            }),
        )
    }

    /// `new T(args)`.
    pub fn new_object(ids: &mut ExprIdGenerator, class_name: &str, constructor: MethodDescriptor, args: Vec<Expr>) -> Self {
        Self::new(
            ids,
            ExprKind::New(NewExpr {
                new_type: VarType::object(class_name),
                constructor: Some(constructor),
                args,
                dimensions: Vec::new(),
                initializer: Vec::new(),
            }),
        )
    }

    /// `new T[d0][d1]...`.
    pub fn new_array(ids: &mut ExprIdGenerator, array_type: VarType, dimensions: Vec<Expr>) -> Self {
        Self::new(
            ids,
            ExprKind::New(NewExpr {
                new_type: array_type,
                constructor: None,
                args: Vec::new(),
                dimensions,
                initializer: Vec::new(),
            }),
        )
    }

    /// `array[index]`.
    pub fn array_element(ids: &mut ExprIdGenerator, array: Expr, index: Expr, hard_type: VarType) -> Self {
        Self::new(
            ids,
            ExprKind::Array(ArrayExpr {
                array: Box::new(array),
                index: Box::new(index),
                hard_type,
            }),
        )
    }

    /// `return value` for a method returning `ret_type`.
    pub fn ret(ids: &mut ExprIdGenerator, value: Option<Expr>, ret_type: VarType) -> Self {
        Self::new(
            ids,
            ExprKind::Exit(ExitExpr {
                kind: ExitKind::Return,
                value: value.map(Box::new),
                ret_type,
            }),
        )
    }

    /// `throw value`.
    pub fn throw(ids: &mut ExprIdGenerator, value: Expr) -> Self {
        Self::new(
            ids,
            ExprKind::Exit(ExitExpr {
                kind: ExitKind::Throw,
                value: Some(Box::new(value)),
                ret_type: VarType::VOID,
            }),
        )
    }

    /// `if (condition)` head.
    pub fn if_head(ids: &mut ExprIdGenerator, condition: Expr) -> Self {
        Self::new(ids, ExprKind::If(Box::new(condition)))
    }

    /// `switch (value)` head.
    pub fn switch_head(ids: &mut ExprIdGenerator, value: Expr) -> Self {
        Self::new(ids, ExprKind::Switch(Box::new(value)))
    }

    /// `monitorenter`/`monitorexit`.
    pub fn monitor(ids: &mut ExprIdGenerator, kind: MonitorKind, value: Expr) -> Self {
        Self::new(ids, ExprKind::Monitor(kind, Box::new(value)))
    }

    fn new(ids: &mut ExprIdGenerator, kind: ExprKind) -> Self {
        Expr { id: ids.next_id(), kind }
    }

    // ── Structure ────────────────────────────────────────────────────────

    /// Direct children in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Var(_) | ExprKind::Const(_) => Vec::new(),
            ExprKind::Assignment(a) => vec![&a.left, &a.right],
            ExprKind::Function(f) => f.operands.iter().collect(),
            ExprKind::Field(f) => f.instance.iter().map(AsRef::as_ref).collect(),
            ExprKind::Invocation(i) => i.instance.iter().map(AsRef::as_ref).chain(&i.args).collect(),
            ExprKind::New(n) => n.args.iter().chain(&n.dimensions).chain(&n.initializer).collect(),
            ExprKind::Array(a) => vec![&a.array, &a.index],
            ExprKind::Exit(e) => e.value.iter().map(AsRef::as_ref).collect(),
            ExprKind::If(c) | ExprKind::Switch(c) | ExprKind::Monitor(_, c) => vec![c],
        }
    }

    /// Direct children in evaluation order, mutably.
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Var(_) | ExprKind::Const(_) => Vec::new(),
            ExprKind::Assignment(a) => vec![&mut a.left, &mut a.right],
            ExprKind::Function(f) => f.operands.iter_mut().collect(),
            ExprKind::Field(f) => f.instance.iter_mut().map(AsMut::as_mut).collect(),
            ExprKind::Invocation(i) => i
                .instance
                .iter_mut()
                .map(AsMut::as_mut)
                .chain(i.args.iter_mut())
                .collect(),
            ExprKind::New(n) => n
                .args
                .iter_mut()
                .chain(n.dimensions.iter_mut())
                .chain(n.initializer.iter_mut())
                .collect(),
            ExprKind::Array(a) => vec![&mut a.array, &mut a.index],
            ExprKind::Exit(e) => e.value.iter_mut().map(AsMut::as_mut).collect(),
            ExprKind::If(c) | ExprKind::Switch(c) | ExprKind::Monitor(_, c) => vec![c],
        }
    }

    /// Visits this expression and all descendants, children first.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        for child in self.children() {
            child.visit(f);
        }
        f(self);
    }

    /// Mutable post-order visit.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        for child in self.children_mut() {
            child.visit_mut(f);
        }
        f(self);
    }

    /// The variable payload, if this is a variable.
    #[must_use]
    pub fn as_var(&self) -> Option<&VarExpr> {
        match &self.kind {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable variable payload.
    pub fn as_var_mut(&mut self) -> Option<&mut VarExpr> {
        match &mut self.kind {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` if any descendant (or this node) references variable `index`.
    #[must_use]
    pub fn references_var(&self, index: i32) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if e.as_var().is_some_and(|v| v.index == index) {
                found = true;
            }
        });
        found
    }

    /// The variable written by `var = value` or `var op= value`, if this is
    /// one of them.
    #[must_use]
    pub fn written_var(&self) -> Option<&VarExpr> {
        match &self.kind {
            ExprKind::Assignment(AssignmentExpr { left, .. }) => left.as_var(),
            _ => None,
        }
    }

    // ── Typing ───────────────────────────────────────────────────────────

    /// Static type of this expression. Variables are resolved through `lookup`
    /// unless they carry a known declared type.
    pub fn expr_type(&self, lookup: &dyn Fn(VarVersionPair) -> Option<VarType>) -> VarType {
        match &self.kind {
            ExprKind::Var(v) => {
                if v.var_type.code != TypeCode::Unknown {
                    return v.var_type.clone();
                }
                lookup(v.pair()).unwrap_or(VarType::UNKNOWN)
            }
            ExprKind::Const(c) => c.const_type.clone(),
            ExprKind::Assignment(a) => a.left.expr_type(lookup),
            ExprKind::Function(f) => f.result_type(lookup),
            ExprKind::Field(f) => f.field_type.clone(),
            ExprKind::Invocation(i) => i.descriptor.ret.clone(),
            ExprKind::New(n) => n.new_type.clone(),
            ExprKind::Array(a) => {
                let array = a.array.expr_type(lookup);
                if array.code == TypeCode::Unknown {
                    a.hard_type.clone()
                } else {
                    array.element_type().unwrap_or_else(|| a.hard_type.clone())
                }
            }
            ExprKind::Exit(_) | ExprKind::If(_) | ExprKind::Switch(_) | ExprKind::Monitor(..) => VarType::VOID,
        }
    }

    /// Type constraints this expression places on its direct children.
    pub fn check_type_bounds(&self, lookup: &dyn Fn(VarVersionPair) -> Option<VarType>) -> Vec<TypeConstraint> {
        let mut out = Vec::new();
        match &self.kind {
            ExprKind::Assignment(a) => {
                let left = a.left.expr_type(lookup);
                let right = a.right.expr_type(lookup);
                match left.family().cmp(&right.family()) {
                    std::cmp::Ordering::Greater => push_min(&mut out, 1, left.family().min_type()),
                    std::cmp::Ordering::Less => push_min(&mut out, 0, right),
                    std::cmp::Ordering::Equal => {
                        if let Some(joined) = left.join(&right) {
                            push_min(&mut out, 0, joined);
                        }
                    }
                }
            }
            ExprKind::Function(f) => return f.check_type_bounds(lookup),
            ExprKind::Invocation(i) => {
                let offset = usize::from(i.instance.is_some());
                for (n, param) in i.descriptor.params.iter().enumerate() {
                    push_range(&mut out, offset + n, param);
                }
            }
            ExprKind::New(n) => {
                if let Some(ctor) = &n.constructor {
                    for (i, param) in ctor.params.iter().enumerate().take(n.args.len()) {
                        push_range(&mut out, i, param);
                    }
                }
                let dims_start = n.args.len();
                for i in 0..n.dimensions.len() {
                    push_range(&mut out, dims_start + i, &VarType::INT);
                }
                if let Some(element) = n.new_type.element_type() {
                    let init_start = dims_start + n.dimensions.len();
                    for i in 0..n.initializer.len() {
                        push_range(&mut out, init_start + i, &element);
                    }
                }
            }
            ExprKind::Array(_) => push_range(&mut out, 1, &VarType::INT),
            ExprKind::Exit(e) => match e.kind {
                ExitKind::Return if e.value.is_some() && e.ret_type.code != TypeCode::Void => {
                    push_range(&mut out, 0, &e.ret_type);
                }
                ExitKind::Throw => push_min(&mut out, 0, VarType::root_object()),
                ExitKind::Return => {}
            },
            ExprKind::If(_) => {
                out.push(TypeConstraint { child: 0, bound: Bound::Min, ty: VarType::BOOLEAN });
                out.push(TypeConstraint { child: 0, bound: Bound::Max, ty: VarType::BOOLEAN });
            }
            ExprKind::Switch(_) => push_range(&mut out, 0, &VarType::INT),
            ExprKind::Var(_) | ExprKind::Const(_) | ExprKind::Field(_) | ExprKind::Monitor(..) => {}
        }
        out
    }
}

fn push_min(out: &mut Vec<TypeConstraint>, child: usize, ty: VarType) {
    out.push(TypeConstraint {
        child,
        bound: Bound::Min,
        ty,
    });
}

/// `min = family minimum, max = ty` on child `child`.
fn push_range(out: &mut Vec<TypeConstraint>, child: usize, ty: &VarType) {
    out.push(TypeConstraint {
        child,
        bound: Bound::Min,
        ty: ty.family().min_type(),
    });
    out.push(TypeConstraint {
        child,
        bound: Bound::Max,
        ty: ty.clone(),
    });
}

/// `double`, `float`, `long` or `int`, whichever is widest among `types`.
fn widest_numeric(types: &[VarType]) -> VarType {
    for (code, ty) in [
        (TypeCode::Double, VarType::DOUBLE),
        (TypeCode::Float, VarType::FLOAT),
        (TypeCode::Long, VarType::LONG),
    ] {
        if types.iter().any(|t| t.code == code && t.array_dim == 0) {
            return ty;
        }
    }
    VarType::INT
}

impl FunctionExpr {
    fn operand_type(&self, index: usize, lookup: &dyn Fn(VarVersionPair) -> Option<VarType>) -> VarType {
        self.operands
            .get(index)
            .map_or(VarType::UNKNOWN, |e| e.expr_type(lookup))
    }

    /// Result type of the operator.
    pub fn result_type(&self, lookup: &dyn Fn(VarVersionPair) -> Option<VarType>) -> VarType {
        if let Some(ty) = self.func.fixed_type() {
            return ty;
        }
        let first = self.operand_type(0, lookup);
        match self.func {
            FunctionType::Imm | FunctionType::Mmi | FunctionType::Ipp | FunctionType::Ppi | FunctionType::Cast => {
                self.implicit_type.clone()
            }
            FunctionType::Shl | FunctionType::Shr | FunctionType::Ushr | FunctionType::BitNot | FunctionType::Neg => {
                widest_numeric(&[first])
            }
            FunctionType::Add | FunctionType::Sub | FunctionType::Mul | FunctionType::Div | FunctionType::Rem => {
                widest_numeric(&[first, self.operand_type(1, lookup)])
            }
            FunctionType::And | FunctionType::Or | FunctionType::Xor => {
                let second = self.operand_type(1, lookup);
                if first.code == TypeCode::Boolean && second.code == TypeCode::Boolean {
                    VarType::BOOLEAN
                } else {
                    widest_numeric(&[first, second])
                }
            }
            FunctionType::Iif => {
                let a = self.operand_type(1, lookup);
                let b = self.operand_type(2, lookup);
                let joined = a.join(&b).unwrap_or(a);
                let both_const = self
                    .operands
                    .get(1..3)
                    .is_some_and(|ops| ops.iter().all(|o| matches!(o.kind, ExprKind::Const(_))));
                if both_const && joined.code != TypeCode::Boolean && VarType::INT.is_superset(&joined) {
                    VarType::INT
                } else {
                    joined
                }
            }
            _ => VarType::UNKNOWN,
        }
    }

    fn check_type_bounds(&self, lookup: &dyn Fn(VarVersionPair) -> Option<VarType>) -> Vec<TypeConstraint> {
        let mut out = Vec::new();
        let first = self.operand_type(0, lookup);
        let second = self.operand_type(1, lookup);

        match self.func {
            FunctionType::Iif => {
                let family = self.result_type(lookup).family();
                push_min(&mut out, 0, VarType::BOOLEAN);
                push_min(&mut out, 1, family.min_type());
                push_min(&mut out, 2, family.min_type());
            }
            FunctionType::I2L | FunctionType::I2F | FunctionType::I2D | FunctionType::I2B | FunctionType::I2C | FunctionType::I2S => {
                push_range(&mut out, 0, &VarType::INT);
            }
            FunctionType::Imm | FunctionType::Mmi | FunctionType::Ipp | FunctionType::Ppi => {
                out.push(TypeConstraint { child: 0, bound: Bound::Min, ty: self.implicit_type.clone() });
                out.push(TypeConstraint { child: 0, bound: Bound::Max, ty: self.implicit_type.clone() });
            }
            FunctionType::Add
            | FunctionType::Sub
            | FunctionType::Mul
            | FunctionType::Div
            | FunctionType::Rem
            | FunctionType::Shl
            | FunctionType::Shr
            | FunctionType::Ushr
            | FunctionType::Lt
            | FunctionType::Ge
            | FunctionType::Gt
            | FunctionType::Le => {
                push_min(&mut out, 1, VarType::BYTECHAR);
                push_min(&mut out, 0, VarType::BYTECHAR);
            }
            FunctionType::BitNot | FunctionType::Neg => push_min(&mut out, 0, VarType::BYTECHAR),
            FunctionType::And | FunctionType::Or | FunctionType::Xor | FunctionType::Eq | FunctionType::Ne => {
                let non_boolean_const = |i: usize| {
                    self.operands.get(i).is_some_and(|o| match &o.kind {
                        ExprKind::Const(c) => c.int_value().is_some() && !c.has_boolean_value(),
                        _ => false,
                    })
                };
                if first.code == TypeCode::Boolean && first.array_dim == 0 {
                    if second.is_strict_superset(&first) {
                        push_min(&mut out, 0, VarType::BYTECHAR);
                    } else if non_boolean_const(0) || non_boolean_const(1) {
                        push_min(&mut out, 0, VarType::BYTECHAR);
                        push_min(&mut out, 1, VarType::BYTECHAR);
                    }
                } else if second.code == TypeCode::Boolean && second.array_dim == 0 && first.is_strict_superset(&second) {
                    push_min(&mut out, 1, VarType::BYTECHAR);
                }
            }
            _ => {}
        }
        out
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Var(v) => write!(f, "var{}_{}", v.index, v.version),
            ExprKind::Const(c) => match &c.value {
                ConstValue::Int(v) => write!(f, "{v}"),
                ConstValue::Long(v) => write!(f, "{v}L"),
                ConstValue::Float(v) => write!(f, "{v}F"),
                ConstValue::Double(v) => write!(f, "{v}D"),
                ConstValue::String(s) => write!(f, "{s:?}"),
                ConstValue::Class(c) => write!(f, "{c}.class"),
                ConstValue::Null => write!(f, "null"),
            },
            ExprKind::Assignment(a) => match a.op {
                Some(op) => write!(f, "{} {op}= {}", a.left, a.right),
                None => write!(f, "{} = {}", a.left, a.right),
            },
            ExprKind::Function(func) => {
                write!(f, "{}(", func.func)?;
                for (i, op) in func.operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{op}")?;
                }
                write!(f, ")")
            }
            ExprKind::Field(field) => match &field.instance {
                Some(inst) => write!(f, "{inst}.{}", field.name),
                None => write!(f, "{}.{}", field.class_name, field.name),
            },
            ExprKind::Invocation(inv) => {
                match &inv.instance {
                    Some(inst) => write!(f, "{inst}.{}(", inv.name)?,
                    None => write!(f, "{}.{}(", inv.class_name, inv.name)?,
                }
                for (i, arg) in inv.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            ExprKind::New(n) => write!(f, "new {}", n.new_type),
            ExprKind::Array(a) => write!(f, "{}[{}]", a.array, a.index),
            ExprKind::Exit(e) => match (&e.kind, &e.value) {
                (ExitKind::Return, Some(v)) => write!(f, "return {v}"),
                (ExitKind::Return, None) => write!(f, "return"),
                (ExitKind::Throw, Some(v)) => write!(f, "throw {v}"),
                (ExitKind::Throw, None) => write!(f, "throw"),
            },
            ExprKind::If(c) => write!(f, "if ({c})"),
            ExprKind::Switch(v) => write!(f, "switch ({v})"),
            ExprKind::Monitor(kind, v) => write!(f, "monitor_{kind}({v})"),
        }
    }
}
