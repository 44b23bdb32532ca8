use std::fmt::Debug;
use std::sync::Arc;

pub type Ident = Arc<String>;

#[derive(Clone)]
pub struct Span {
    pub as_string: String,
}

impl Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_tuple("Span").field(&self.as_string).finish()
    }
}

#[derive(Debug)]
pub struct Spanned<X> {
    pub span: Span,
    pub x: X,
}

impl<X> Spanned<X> {
    pub fn new(span: Span, x: X) -> Arc<Spanned<X>> {
        Arc::new(Spanned { span, x })
    }
}

// Positions are irrelevant for structural comparison (e.g. wand matching).
impl<X: PartialEq> PartialEq for Spanned<X> {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x
    }
}
impl<X: Eq> Eq for Spanned<X> {}

pub type Typ = Arc<TypX>;
pub type Typs = Arc<Vec<Typ>>;
#[derive(Debug, PartialEq, Eq)]
pub enum TypX {
    Bool,
    Int,
    Perm,
    Ref,
    Seq(Typ),
    Set(Typ),
    Multiset(Typ),
}

pub type Param = Arc<ParamX>;
pub type Params = Arc<Vec<Param>>;
#[derive(Debug, PartialEq, Eq)]
pub struct ParamX {
    pub name: Ident,
    pub typ: Typ,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Const {
    Bool(bool),
    Int(Arc<String>),
    Null,
    NoPerm,
    FullPerm,
    EmptySet(Typ),
    EmptySeq(Typ),
    EmptyMultiset(Typ),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    SetCard,
    SeqLen,
    MultisetCard,
    SetSingleton,
    SeqSingleton,
    MultisetSingleton,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Implies,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// permission fraction n/d
    Frac,
    SetIn,
    SetAdd,
    SetUnion,
    SetIntersection,
    SetDifference,
    SetSubset,
    SeqAppend,
    SeqIndex,
    SeqTake,
    SeqDrop,
    MultisetUnion,
    MultisetCount,
}

/// A location: a field of a receiver, or a predicate instance.
pub type Loc = Arc<LocX>;
#[derive(Debug, PartialEq, Eq)]
pub enum LocX {
    Field(Expr, Ident),
    Predicate(Ident, Exprs),
}

pub type Expr = Arc<Spanned<ExprX>>;
pub type Exprs = Arc<Vec<Expr>>;
#[derive(Debug, PartialEq, Eq)]
pub enum ExprX {
    Const(Const),
    Var(Ident),
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    CondExp(Expr, Expr, Expr),
    Let(Ident, Expr, Expr),
    SeqUpdate(Expr, Expr, Expr),
    /// Heap read in a pure position
    FieldAccess(Expr, Ident),
    /// Access predicate acc(loc, perm)
    Acc(Loc, Expr),
    /// forall xs :: cond ==> acc(loc, perm)
    QuantifiedPermission(Params, Expr, Loc, Expr),
    /// Pure quantification
    Forall(Params, Expr),
    /// lhs --* rhs, optionally bound to a user label
    MagicWand(Option<Ident>, Expr, Expr),
    InhaleExhale(Expr, Expr),
    /// Application of a declared (heap-independent) function
    FuncApp(Ident, Exprs),
}

pub type Stmt = Arc<Spanned<StmtX>>;
pub type Stmts = Arc<Vec<Stmt>>;
#[derive(Debug)]
pub enum StmtX {
    Inhale(Expr),
    Exhale(Expr),
    Assert(Expr),
}

pub type Field = Arc<FieldX>;
#[derive(Debug)]
pub struct FieldX {
    pub name: Ident,
    pub typ: Typ,
}

pub type Predicate = Arc<PredicateX>;
#[derive(Debug)]
pub struct PredicateX {
    pub name: Ident,
    pub params: Params,
}

pub type Function = Arc<FunctionX>;
#[derive(Debug)]
pub struct FunctionX {
    pub name: Ident,
    pub typs: Typs,
    pub ret: Typ,
}

pub type Method = Arc<MethodX>;
#[derive(Debug)]
pub struct MethodX {
    pub name: Ident,
    pub params: Params,
    pub requires: Exprs,
    pub ensures: Exprs,
    pub body: Stmts,
}

pub type Program = Arc<ProgramX>;
#[derive(Debug)]
pub struct ProgramX {
    pub fields: Arc<Vec<Field>>,
    pub predicates: Arc<Vec<Predicate>>,
    pub functions: Arc<Vec<Function>>,
    pub axioms: Exprs,
    pub methods: Arc<Vec<Method>>,
}

impl ProgramX {
    pub fn field(&self, name: &Ident) -> Option<&Field> {
        self.fields.iter().find(|f| &f.name == name)
    }

    pub fn predicate(&self, name: &Ident) -> Option<&Predicate> {
        self.predicates.iter().find(|p| &p.name == name)
    }

    pub fn function(&self, name: &Ident) -> Option<&Function> {
        self.functions.iter().find(|f| &f.name == name)
    }
}
