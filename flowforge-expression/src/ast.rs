use serde_json::Value;

/// 表达式语法树
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// 字面量：数字、字符串、布尔、null
    Literal(Value),
    /// 根解析器：`Outputs('key')` / `Variables('key')` / `Secrets('key')`
    Resolver { kind: ResolverKind, key: Box<Expr> },
    /// 函数调用（内置或自定义）
    Call { name: String, args: Vec<Expr> },
    /// 属性/索引访问
    Path {
        target: Box<Expr>,
        segments: Vec<PathSegment>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `cond ? a : b`
    Ternary {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    Outputs,
    Variables,
    Secrets,
}

impl ResolverKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Outputs" => Some(Self::Outputs),
            "Variables" => Some(Self::Variables),
            "Secrets" => Some(Self::Secrets),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Outputs => "Outputs",
            Self::Variables => "Variables",
            Self::Secrets => "Secrets",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// `.Name`
    Property(String),
    /// `[expr]`，只有整数字面量会被当作下标
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl Expr {
    /// 是否引用了 `Secrets(...)`
    pub fn references_secrets(&self) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Resolver { kind, key } => {
                *kind == ResolverKind::Secrets || key.references_secrets()
            }
            Expr::Call { args, .. } => args.iter().any(Expr::references_secrets),
            Expr::Path { target, segments } => {
                target.references_secrets()
                    || segments.iter().any(|s| match s {
                        PathSegment::Property(_) => false,
                        PathSegment::Index(e) => e.references_secrets(),
                    })
            }
            Expr::Unary { operand, .. } => operand.references_secrets(),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.references_secrets() || rhs.references_secrets()
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.references_secrets()
                    || then_branch.references_secrets()
                    || else_branch.references_secrets()
            }
        }
    }
}
