#[cfg(test)]
mod tests {
    use hintdiff::analyzer::{analyze, Role};
    use hintdiff::catalog::HintEntry;
    use hintdiff::program::render::placeholder_token;
    use hintdiff::program::synthesize;
    use hintdiff::values::ValueGenerator;
    use proptest::prelude::*;
    use regex::Regex;
    use std::collections::BTreeSet;

    const ROOTS: [&str; 6] = ["a", "b", "point", "res", "value", "n"];
    const FIELDS: [&str; 8] = ["", ".d0", ".d1", ".d2", ".low", ".high", ".x", ".y"];

    fn reference() -> impl Strategy<Value = String> {
        (prop::sample::select(ROOTS.to_vec()), prop::sample::select(FIELDS.to_vec()))
            .prop_map(|(root, field)| format!("ids.{root}{field}"))
    }

    /// Lines shaped like real hints: assignments, asserts, bare reads and
    /// calls to `pack`.
    fn hint_line() -> impl Strategy<Value = String> {
        prop_oneof![
            (reference(), reference(), reference())
                .prop_map(|(lhs, x, y)| format!("{lhs} = {x} + {y}")),
            (reference(), reference()).prop_map(|(lhs, x)| format!("{lhs} = pack({x}, PRIME)")),
            (reference(), reference()).prop_map(|(x, y)| format!("assert {x} < {y}")),
            reference().prop_map(|x| format!("v = {x} # {x} again")),
            (reference(), reference())
                .prop_map(|(lhs, x)| format!("{lhs}, q = divmod({x}, 2**128)")),
        ]
    }

    fn hint() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(hint_line(), 1..5)
    }

    fn referenced_roots(lines: &[String]) -> BTreeSet<String> {
        let chain = Regex::new(r"\bids\.([A-Za-z_][A-Za-z0-9_]*)").unwrap();
        lines
            .iter()
            .map(|line| line.split('#').next().unwrap_or_default())
            .flat_map(|code| {
                chain
                    .captures_iter(code)
                    .map(|c| c[1].to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    proptest! {
        #[test]
        fn roles_partition_referenced_roots(lines in hint()) {
            let entry = HintEntry::new(0, lines.clone());
            if let Ok(signature) = analyze(&entry) {
                let inputs: BTreeSet<_> = signature.inputs().map(|r| r.name.clone()).collect();
                let outputs: BTreeSet<_> = signature.outputs().map(|r| r.name.clone()).collect();
                prop_assert!(inputs.is_disjoint(&outputs));
                let all: BTreeSet<_> = inputs.union(&outputs).cloned().collect();
                prop_assert_eq!(all, referenced_roots(&lines));
            }
        }

        #[test]
        fn instantiated_programs_have_no_placeholders(lines in hint(), seed in any::<u64>()) {
            let entry = HintEntry::new(0, lines.clone());
            let Ok(signature) = analyze(&entry) else { return Ok(()) };
            let Ok(program) = synthesize(&entry, &signature) else { return Ok(()) };

            for placeholder in &program.placeholders {
                let token = placeholder_token(placeholder.id);
                prop_assert_eq!(program.text.matches(&token).count(), 1);
                prop_assert_eq!(placeholder.binding.role, Role::Input);
            }
            for line in &lines {
                prop_assert!(program.text.contains(line.as_str()));
            }

            let values = ValueGenerator::from_seed(seed).generate(&program.placeholder_ids());
            let text = program.instantiate(&values).unwrap();
            prop_assert!(!text.contains("$fuzz_"));
            for value in &values {
                prop_assert!(text.contains(&value.value.to_string()));
            }
        }
    }
}
