//! Minimal Cairo 0 syntax tree for synthesized wrapper programs.

/// Index of a randomized input slot.
pub type PlaceholderId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub members: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Placeholder(PlaceholderId),
    Ident(String),
    /// `Type(field=expr, ...)`
    Construct {
        ty: String,
        fields: Vec<(String, Expr)>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Single(String),
    Tuple(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    AllocLocals,
    Local { name: String, ty: String },
    Let { pattern: Pattern, value: Expr },
    Expr(Expr),
    /// Hint body, embedded line by line without modification.
    Hint(Vec<String>),
    Return(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Vec<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    pub structs: Vec<StructDef>,
    pub functions: Vec<Function>,
}

impl Program {
    /// Every placeholder in the tree, in rendering order.
    pub fn placeholders(&self) -> Vec<PlaceholderId> {
        fn visit(expr: &Expr, out: &mut Vec<PlaceholderId>) {
            match expr {
                Expr::Placeholder(id) => out.push(*id),
                Expr::Ident(_) => {}
                Expr::Construct { fields, .. } => {
                    fields.iter().for_each(|(_, e)| visit(e, out));
                }
                Expr::Call { args, .. } => args.iter().for_each(|e| visit(e, out)),
            }
        }

        let mut out = Vec::new();
        for function in &self.functions {
            for statement in &function.body {
                match statement {
                    Statement::Let { value, .. } | Statement::Expr(value) => visit(value, &mut out),
                    Statement::Return(values) => values.iter().for_each(|e| visit(e, &mut out)),
                    Statement::AllocLocals | Statement::Local { .. } | Statement::Hint(_) => {}
                }
            }
        }
        out
    }
}
