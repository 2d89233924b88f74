use pged::query::{compile, Comparer, Condition, Operand, QuerySpec};
use pged::schema::Schema;
use pged::PgedConfig;
use proptest::prelude::*;
use serde_json::Value;

const COLUMNS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

// Strategy to generate arbitrarily nested AND/OR trees
fn arb_condition() -> impl Strategy<Value = Condition> {
    let leaf = (0..COLUMNS.len(), any::<i32>())
        .prop_map(|(column, value)| Condition::leaf(COLUMNS[column], Comparer::Eq, value));

    leaf.prop_recursive(5, 64, 4, |inner| {
        (any::<bool>(), prop::collection::vec(inner, 1..4)).prop_map(|(or, children)| {
            if or {
                Condition::or(children)
            } else {
                Condition::and(children)
            }
        })
    })
}

/// Reference rendering: every group is wrapped, leaves are numbered in order.
fn render(condition: &Condition, params: &mut Vec<Value>) -> String {
    match condition {
        Condition::Leaf {
            column,
            value: Operand::Value(value),
            ..
        } => {
            params.push(value.clone());
            format!("\"{}\" = ${}", column, params.len())
        }
        Condition::Leaf { .. } => unreachable!("strategy only builds value leaves"),
        Condition::Group { operator, children } => {
            let parts: Vec<String> = children.iter().map(|c| render(c, params)).collect();
            format!("({})", parts.join(&format!(" {} ", operator.sql())))
        }
    }
}

proptest! {
    /// Property: parenthesization mirrors the tree and parameters follow leaf order
    #[test]
    fn prop_compiled_where_matches_tree(tree in arb_condition()) {
        let mut spec = QuerySpec::new("items");
        spec.conditions = vec![tree.clone()];

        let compiled = compile(&spec, &PgedConfig::default(), &Schema::default()).unwrap();

        let mut expected_params = Vec::new();
        let expected = render(&tree, &mut expected_params);

        prop_assert_eq!(compiled.sql, format!("SELECT * FROM items WHERE {}", expected));
        prop_assert_eq!(compiled.params, expected_params);
    }

    /// Property: parameters equal leaf values in left-to-right order
    #[test]
    fn prop_params_follow_leaves(tree in arb_condition()) {
        let mut spec = QuerySpec::new("items");
        spec.conditions = vec![tree.clone()];

        let compiled = compile(&spec, &PgedConfig::default(), &Schema::default()).unwrap();
        let leaf_values: Vec<Value> = tree
            .leaves()
            .into_iter()
            .map(|leaf| match leaf {
                Condition::Leaf { value: Operand::Value(value), .. } => value.clone(),
                _ => unreachable!(),
            })
            .collect();

        prop_assert_eq!(compiled.params, leaf_values);
    }

    /// Property: several top-level terms are wrapped once as an AND group
    #[test]
    fn prop_top_level_terms_are_anded(terms in prop::collection::vec(arb_condition(), 2..5)) {
        let mut spec = QuerySpec::new("items");
        spec.conditions = terms.clone();

        let compiled = compile(&spec, &PgedConfig::default(), &Schema::default()).unwrap();
        let expected = render(&Condition::and(terms), &mut Vec::new());

        prop_assert_eq!(compiled.sql, format!("SELECT * FROM items WHERE {}", expected));
    }
}
