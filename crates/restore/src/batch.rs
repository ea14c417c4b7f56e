use std::collections::BTreeSet;

use crate::catalog::Statement;

/// Splits postdata statements into three batches that are safe to replay
/// sequentially, each internally parallel.
///
/// Creating two indexes concurrently on an append-optimized table that had
/// none before can deadlock in the storage engine. The first batch therefore
/// takes one index per referenced table; once every such table has an index,
/// the hazard is gone and the second batch holds everything else. The third
/// batch isolates `" METADATA"` statements (ALTER INDEX, COMMENT ON, ...)
/// from the second, where their target objects are still being created.
///
/// With `skip_index` set, all `INDEX` and `INDEX METADATA` statements are
/// routed to the first batch instead, so a caller deferring index work can
/// drop that batch wholesale.
///
/// Every input lands in exactly one batch and relative input order is
/// preserved within each batch.
pub fn batch_postdata_statements(
    statements: Vec<Statement>,
    skip_index: bool,
) -> (Vec<Statement>, Vec<Statement>, Vec<Statement>) {
    let mut indexed_objects = BTreeSet::new();
    let mut first_batch = Vec::new();
    let mut second_batch = Vec::new();
    let mut third_batch = Vec::new();
    for statement in statements {
        let is_index = statement.object_type == "INDEX";
        let to_first_batch = if skip_index {
            is_index || statement.object_type == "INDEX METADATA"
        } else {
            is_index && !indexed_objects.contains(&statement.reference_object)
        };
        if to_first_batch {
            indexed_objects.insert(statement.reference_object.clone());
            first_batch.push(statement);
        } else if statement.object_type.contains(" METADATA") {
            third_batch.push(statement);
        } else {
            second_batch.push(statement);
        }
    }
    (first_batch, second_batch, third_batch)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::batch_postdata_statements;
    use crate::catalog::Statement;

    fn statement(object_type: &str, reference_object: &str) -> Statement {
        Statement {
            text: format!("CREATE {object_type} ON {reference_object};"),
            schema: "public".to_owned(),
            name: format!("{object_type}_{reference_object}"),
            object_type: object_type.to_owned(),
            reference_object: reference_object.to_owned(),
        }
    }

    #[test]
    fn test_one_index_per_table_goes_first() {
        let input = vec![
            statement("INDEX", "t1"),
            statement("INDEX", "t1"),
            statement("INDEX", "t2"),
            statement("COMMENT METADATA", "t1"),
        ];
        let (first, second, third) = batch_postdata_statements(input.clone(), false);
        assert_eq!(first, vec![input[0].clone(), input[2].clone()]);
        // The second index on t1 is neither first (t1 already has one) nor
        // metadata, so it replays with the bulk of the postdata objects.
        assert_eq!(second, vec![input[1].clone()]);
        assert_eq!(third, vec![input[3].clone()]);
    }

    #[test]
    fn test_skip_index_routes_all_index_work_first() {
        let input = vec![
            statement("INDEX", "t1"),
            statement("INDEX", "t1"),
            statement("INDEX METADATA", "t1"),
            statement("TRIGGER", "t1"),
            statement("EVENT TRIGGER METADATA", ""),
        ];
        let (first, second, third) = batch_postdata_statements(input.clone(), true);
        assert_eq!(first, input[0..3].to_vec());
        assert_eq!(second, vec![input[3].clone()]);
        assert_eq!(third, vec![input[4].clone()]);
    }

    #[test]
    fn test_table_without_indexes_stays_out_of_first() {
        let input = vec![
            statement("TRIGGER", "t9"),
            statement("RULE", "t9"),
            statement("COMMENT METADATA", "t9"),
        ];
        let (first, second, third) = batch_postdata_statements(input.clone(), false);
        assert!(first.is_empty());
        assert_eq!(second, input[0..2].to_vec());
        assert_eq!(third, vec![input[2].clone()]);
    }

    fn arb_statement() -> impl Strategy<Value = Statement> {
        (
            prop_oneof![
                Just("INDEX"),
                Just("INDEX METADATA"),
                Just("TRIGGER"),
                Just("RULE"),
                Just("COMMENT METADATA"),
                Just("EVENT TRIGGER"),
            ],
            prop_oneof![Just("t1"), Just("t2"), Just("t3"), Just("t4")],
        )
            .prop_map(|(object_type, reference_object)| statement(object_type, reference_object))
    }

    fn is_subsequence(needle: &[Statement], haystack: &[Statement]) -> bool {
        let mut iter = haystack.iter();
        needle.iter().all(|s| iter.any(|h| h == s))
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, failure_persistence: None, ..ProptestConfig::default() })]

        #[test]
        fn proptest_partition_is_complete_and_ordered(
            input in prop::collection::vec(arb_statement(), 0..64),
            skip_index in any::<bool>(),
        ) {
            let (first, second, third) = batch_postdata_statements(input.clone(), skip_index);
            prop_assert_eq!(first.len() + second.len() + third.len(), input.len());
            prop_assert!(is_subsequence(&first, &input));
            prop_assert!(is_subsequence(&second, &input));
            prop_assert!(is_subsequence(&third, &input));
        }

        #[test]
        fn proptest_each_indexed_table_gets_exactly_one_leading_index(
            input in prop::collection::vec(arb_statement(), 0..64),
        ) {
            let (first, second, third) = batch_postdata_statements(input.clone(), false);
            for statement in &first {
                prop_assert_eq!(&statement.object_type, "INDEX");
            }
            // One first-batch index per referenced table, and the remaining
            // index statements are all in the second batch.
            let mut leading: Vec<&str> =
                first.iter().map(|s| s.reference_object.as_str()).collect();
            leading.sort_unstable();
            leading.dedup();
            prop_assert_eq!(leading.len(), first.len());
            let index_count = input.iter().filter(|s| s.object_type == "INDEX").count();
            let second_indexes = second.iter().filter(|s| s.object_type == "INDEX").count();
            prop_assert_eq!(first.len() + second_indexes, index_count);
            for statement in &third {
                prop_assert!(statement.object_type.contains(" METADATA"));
            }
        }
    }
}
