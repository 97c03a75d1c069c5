//! Serialization of a [`Program`] to Cairo source text.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::ast::{Expr, Function, Pattern, PlaceholderId, Program, Statement, StructDef};

const INDENT: &str = "    ";

/// What to print in place of each placeholder.
#[derive(Debug, Clone, Copy)]
pub enum Bindings<'a> {
    /// The placeholder token itself, see [`placeholder_token`].
    Tokens,
    /// Concrete field element values.
    Values(&'a BTreeMap<PlaceholderId, u128>),
}

/// Lexical form of an unbound placeholder.
///
/// `$` is not valid in Cairo or Python identifiers, and the closing `$` keeps
/// one token from being a prefix of another.
pub fn placeholder_token(id: PlaceholderId) -> String {
    format!("$fuzz_{id}$")
}

/// Renders `program`. Fails with the first placeholder `bindings` cannot bind.
pub fn render(program: &Program, bindings: Bindings<'_>) -> Result<String, PlaceholderId> {
    let mut out = String::new();
    for def in &program.structs {
        render_struct(&mut out, def);
        out.push('\n');
    }
    for (i, function) in program.functions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_function(&mut out, function, bindings)?;
    }
    Ok(out)
}

fn render_struct(out: &mut String, def: &StructDef) {
    let _ = writeln!(out, "struct {} {{", def.name);
    for (name, ty) in &def.members {
        let _ = writeln!(out, "{INDENT}{name}: {ty},");
    }
    out.push_str("}\n");
}

fn render_function(
    out: &mut String,
    function: &Function,
    bindings: Bindings<'_>,
) -> Result<(), PlaceholderId> {
    let params = function
        .params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.ty))
        .collect::<Vec<_>>()
        .join(", ");
    let returns = match function.returns.as_slice() {
        [] => String::new(),
        [single] => format!(" -> {single}"),
        many => format!(" -> ({})", many.join(", ")),
    };
    let _ = writeln!(out, "func {}({params}){returns} {{", function.name);

    for statement in &function.body {
        match statement {
            Statement::AllocLocals => {
                let _ = writeln!(out, "{INDENT}alloc_locals;");
            }
            Statement::Local { name, ty } => {
                let _ = writeln!(out, "{INDENT}local {name}: {ty};");
            }
            Statement::Let { pattern, value } => {
                let target = match pattern {
                    Pattern::Single(name) => name.clone(),
                    Pattern::Tuple(names) => format!("({})", names.join(", ")),
                };
                let value = render_expr(value, bindings)?;
                let _ = writeln!(out, "{INDENT}let {target} = {value};");
            }
            Statement::Expr(expr) => {
                let expr = render_expr(expr, bindings)?;
                let _ = writeln!(out, "{INDENT}{expr};");
            }
            Statement::Hint(lines) => {
                let _ = writeln!(out, "{INDENT}%{{");
                for line in lines {
                    out.push_str(line);
                    out.push('\n');
                }
                let _ = writeln!(out, "{INDENT}%}}");
            }
            Statement::Return(values) => {
                let rendered = values
                    .iter()
                    .map(|v| render_expr(v, bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = match rendered.as_slice() {
                    [single] => single.clone(),
                    many => format!("({})", many.join(", ")),
                };
                let _ = writeln!(out, "{INDENT}return {value};");
            }
        }
    }
    out.push_str("}\n");
    Ok(())
}

fn render_expr(expr: &Expr, bindings: Bindings<'_>) -> Result<String, PlaceholderId> {
    Ok(match expr {
        Expr::Placeholder(id) => match bindings {
            Bindings::Tokens => placeholder_token(*id),
            Bindings::Values(values) => values.get(id).ok_or(*id)?.to_string(),
        },
        Expr::Ident(name) => name.clone(),
        Expr::Construct { ty, fields } => {
            let fields = fields
                .iter()
                .map(|(name, value)| {
                    render_expr(value, bindings).map(|value| format!("{name}={value}"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            format!("{ty}({})", fields.join(", "))
        }
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|a| render_expr(a, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            format!("{function}({})", args.join(", "))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ast::Param;

    fn sample() -> Program {
        Program {
            structs: vec![StructDef {
                name: "Pair".into(),
                members: vec![("a".into(), "felt".into()), ("b".into(), "felt".into())],
            }],
            functions: vec![Function {
                name: "main".into(),
                params: vec![Param { name: "n".into(), ty: "felt".into() }],
                returns: vec![],
                body: vec![
                    Statement::Let {
                        pattern: Pattern::Single("p".into()),
                        value: Expr::Construct {
                            ty: "Pair".into(),
                            fields: vec![
                                ("a".into(), Expr::Placeholder(0)),
                                ("b".into(), Expr::Placeholder(1)),
                            ],
                        },
                    },
                    Statement::Return(vec![]),
                ],
            }],
        }
    }

    #[test]
    fn renders_tokens() {
        let text = render(&sample(), Bindings::Tokens).unwrap();
        assert_eq!(
            text,
            "struct Pair {\n    a: felt,\n    b: felt,\n}\n\n\
             func main(n: felt) {\n    let p = Pair(a=$fuzz_0$, b=$fuzz_1$);\n    return ();\n}\n"
        );
    }

    #[test]
    fn renders_values_and_reports_unbound() {
        let mut values = BTreeMap::new();
        values.insert(0, 7u128);
        assert_eq!(render(&sample(), Bindings::Values(&values)), Err(1));
        values.insert(1, u128::MAX);
        let text = render(&sample(), Bindings::Values(&values)).unwrap();
        assert!(text.contains("Pair(a=7, b=340282366920938463463374607431768211455)"));
    }
}
